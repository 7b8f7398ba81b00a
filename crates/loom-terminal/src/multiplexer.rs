//! Per-socket private shells plus one shared run process per workspace.
//!
//! Private shell output goes only to its owning socket. Run output is
//! published to the whole room and kept in a scrollback buffer, so sockets
//! attaching mid-run see what they missed before any new output.
//!
//! The run slot is a single resource. Replacing it always kills the old
//! process before the new one is spawned.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use loom_types::{EventSender, Room, ServerEvent, SocketId};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{Result, TerminalError};
use crate::pty::{PtyCommand, PtyProcess};
use crate::run::run_command;
use crate::scrollback::{DEFAULT_SCROLLBACK_BYTES, Scrollback};

/// Default shell for private terminals.
pub const DEFAULT_SHELL: &str = "/bin/bash";

#[derive(Debug, Clone)]
pub struct TerminalConfig {
    /// Program started for `requestTerminal` (default: `/bin/bash`).
    pub shell: String,
    /// Run-output bytes kept for late joiners (default: 256 KiB).
    pub scrollback_bytes: usize,
    pub rows: u16,
    pub cols: u16,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            shell: DEFAULT_SHELL.to_string(),
            scrollback_bytes: DEFAULT_SCROLLBACK_BYTES,
            rows: 24,
            cols: 80,
        }
    }
}

impl TerminalConfig {
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn with_scrollback_bytes(mut self, bytes: usize) -> Self {
        self.scrollback_bytes = bytes;
        self
    }

    pub fn with_size(mut self, rows: u16, cols: u16) -> Self {
        self.rows = rows;
        self.cols = cols;
        self
    }
}

struct ShellSession {
    generation: u64,
    pty: Arc<PtyProcess>,
}

type ShellRegistry = Arc<parking_lot::Mutex<HashMap<SocketId, ShellSession>>>;

/// The shared run process slot.
struct RunSlot {
    /// Bumped on every start and stop; output and exit notices from an older
    /// generation are ignored.
    generation: u64,
    process: Option<Arc<PtyProcess>>,
    running: bool,
    scrollback: Scrollback,
}

/// Owns every PTY of one workspace.
pub struct TerminalMultiplexer {
    config: TerminalConfig,
    cwd: PathBuf,
    room: Arc<Room>,
    shells: ShellRegistry,
    shell_generation: AtomicU64,
    run: Arc<tokio::sync::Mutex<RunSlot>>,
}

impl std::fmt::Debug for TerminalMultiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminalMultiplexer")
            .field("cwd", &self.cwd)
            .field("shells", &self.shells.lock().len())
            .finish()
    }
}

impl TerminalMultiplexer {
    pub fn new(config: TerminalConfig, cwd: impl Into<PathBuf>, room: Arc<Room>) -> Self {
        let scrollback = Scrollback::new(config.scrollback_bytes);
        Self {
            config,
            cwd: cwd.into(),
            room,
            shells: Arc::new(parking_lot::Mutex::new(HashMap::new())),
            shell_generation: AtomicU64::new(0),
            run: Arc::new(tokio::sync::Mutex::new(RunSlot {
                generation: 0,
                process: None,
                running: false,
                scrollback,
            })),
        }
    }

    pub fn room(&self) -> &Arc<Room> {
        &self.room
    }

    // ─────────────────────────────────────────────────────────────────────
    // Room membership
    // ─────────────────────────────────────────────────────────────────────

    /// Add a socket to the room.
    ///
    /// The socket first receives the current run status and, when a run is
    /// live, its scrollback. Joining happens under the run lock, so no run
    /// output can slip between the replay and the first live chunk.
    pub async fn attach(&self, socket: SocketId, tx: EventSender) {
        let slot = self.run.lock().await;
        let _ = tx.send(ServerEvent::status(slot.running));
        if slot.running && !slot.scrollback.is_empty() {
            let _ = tx.send(ServerEvent::run_output(slot.scrollback.snapshot()));
        }
        self.room.join(socket, tx);
        debug!(socket_id = %socket, running = slot.running, "Attached socket");
    }

    /// Remove a socket from the room and kill its private shell.
    pub async fn detach(&self, socket: SocketId) {
        self.room.leave(socket);
        self.release(socket).await;
    }

    // ─────────────────────────────────────────────────────────────────────
    // Private shells
    // ─────────────────────────────────────────────────────────────────────

    /// Start a private shell for `socket`, replacing any previous one.
    pub async fn request_terminal(&self, socket: SocketId, tx: EventSender) -> Result<()> {
        let previous = self.shells.lock().remove(&socket);
        if let Some(previous) = previous {
            kill_process(previous.pty).await;
        }

        let command = PtyCommand::new(&self.config.shell)
            .cwd(&self.cwd)
            .size(self.config.rows, self.config.cols);
        let (pty, output) = PtyProcess::spawn(command)?;
        let pty = Arc::new(pty);
        let generation = self.shell_generation.fetch_add(1, Ordering::SeqCst) + 1;

        self.shells.lock().insert(
            socket,
            ShellSession {
                generation,
                pty: pty.clone(),
            },
        );
        info!(socket_id = %socket, pid = pty.pid(), "Started private shell");

        tokio::spawn(pump_shell(
            self.shells.clone(),
            socket,
            generation,
            output,
            tx,
        ));
        Ok(())
    }

    /// Write input to the socket's own shell.
    pub fn terminal_data(&self, socket: SocketId, data: &[u8]) -> Result<()> {
        self.shell(socket)?.write(data)
    }

    pub fn resize(&self, socket: SocketId, rows: u16, cols: u16) -> Result<()> {
        self.shell(socket)?.resize(rows, cols)
    }

    pub fn has_terminal(&self, socket: SocketId) -> bool {
        self.shells.lock().contains_key(&socket)
    }

    pub fn shell_count(&self) -> usize {
        self.shells.lock().len()
    }

    /// Kill the socket's shell, if any.
    pub async fn release(&self, socket: SocketId) {
        let session = self.shells.lock().remove(&socket);
        if let Some(session) = session {
            debug!(socket_id = %socket, pid = session.pty.pid(), "Releasing private shell");
            kill_process(session.pty).await;
        }
    }

    fn shell(&self, socket: SocketId) -> Result<Arc<PtyProcess>> {
        self.shells
            .lock()
            .get(&socket)
            .map(|s| s.pty.clone())
            .ok_or(TerminalError::NoTerminal)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Shared run process
    // ─────────────────────────────────────────────────────────────────────

    /// Start the run process for `language`, killing any current run first.
    ///
    /// An unsupported language fails before anything is killed or spawned.
    pub async fn process_run(&self, language: &str, entry: Option<&str>) -> Result<()> {
        let script = run_command(language, entry)?;

        let mut slot = self.run.lock().await;
        let was_running = slot.running;
        if let Some(previous) = slot.process.take() {
            kill_process(previous).await;
        }
        slot.generation += 1;
        slot.running = false;
        slot.scrollback.clear();

        let command = PtyCommand::script(&script)
            .cwd(&self.cwd)
            .size(self.config.rows, self.config.cols);
        let (pty, output) = match PtyProcess::spawn(command) {
            Ok(spawned) => spawned,
            Err(e) => {
                if was_running {
                    self.room.broadcast(&ServerEvent::status(false));
                }
                return Err(e);
            }
        };

        let pty = Arc::new(pty);
        let generation = slot.generation;
        slot.process = Some(pty.clone());
        slot.running = true;
        self.room.broadcast(&ServerEvent::status(true));
        drop(slot);

        info!(language, script = %script, pid = pty.pid(), "Started run process");
        tokio::spawn(pump_run(
            self.run.clone(),
            self.room.clone(),
            generation,
            output,
        ));
        Ok(())
    }

    /// Interrupt and kill the run process, then tell the room it stopped.
    ///
    /// Returns whether a process was live.
    pub async fn process_stop(&self) -> bool {
        let mut slot = self.run.lock().await;
        let process = slot.process.take();
        slot.generation += 1;
        slot.running = false;

        let stopped = process.is_some();
        if let Some(process) = process {
            if let Err(e) = process.interrupt() {
                debug!(error = %e, "Failed to interrupt run process");
            }
            kill_process(process).await;
        }
        self.room.broadcast(&ServerEvent::status(false));
        info!(stopped, "Stopped run process");
        stopped
    }

    pub async fn is_running(&self) -> bool {
        self.run.lock().await.running
    }

    /// The live run process, if any.
    pub async fn run_process(&self) -> Option<Arc<PtyProcess>> {
        self.run.lock().await.process.clone()
    }

    /// Buffered run output.
    pub async fn scrollback(&self) -> Vec<u8> {
        self.run.lock().await.scrollback.snapshot()
    }

    /// Kill every PTY. Used when the workspace session ends.
    pub async fn shutdown(&self) {
        let shells: Vec<_> = self.shells.lock().drain().map(|(_, s)| s.pty).collect();
        for pty in shells {
            kill_process(pty).await;
        }

        let mut slot = self.run.lock().await;
        slot.generation += 1;
        slot.running = false;
        if let Some(process) = slot.process.take() {
            kill_process(process).await;
        }
        debug!("Terminal multiplexer shut down");
    }
}

/// Forward a private shell's output to its socket until the shell exits.
async fn pump_shell(
    shells: ShellRegistry,
    socket: SocketId,
    generation: u64,
    mut output: mpsc::UnboundedReceiver<Vec<u8>>,
    tx: EventSender,
) {
    while let Some(chunk) = output.recv().await {
        if tx.send(ServerEvent::shell_output(chunk)).is_err() {
            break;
        }
    }

    let exited = {
        let mut shells = shells.lock();
        let current = shells
            .get(&socket)
            .is_some_and(|s| s.generation == generation);
        let removed = if current { shells.remove(&socket) } else { None };
        removed
    };
    if let Some(session) = exited {
        kill_process(session.pty).await;
        let _ = tx.send(ServerEvent::TerminalExit);
        debug!(socket_id = %socket, "Private shell exited");
    }
}

/// Publish run output to the room until the process exits or is replaced.
async fn pump_run(
    run: Arc<tokio::sync::Mutex<RunSlot>>,
    room: Arc<Room>,
    generation: u64,
    mut output: mpsc::UnboundedReceiver<Vec<u8>>,
) {
    while let Some(chunk) = output.recv().await {
        let mut slot = run.lock().await;
        if slot.generation != generation {
            return;
        }
        slot.scrollback.push(&chunk);
        room.broadcast(&ServerEvent::run_output(chunk));
    }

    let mut slot = run.lock().await;
    if slot.generation != generation || !slot.running {
        return;
    }
    slot.running = false;
    let process = slot.process.take();
    room.broadcast(&ServerEvent::status(false));
    drop(slot);

    if let Some(process) = process {
        kill_process(process).await;
    }
    info!("Run process exited");
}

/// Kill and reap off the async runtime; the PTY API blocks.
async fn kill_process(process: Arc<PtyProcess>) {
    let pid = process.pid();
    match tokio::task::spawn_blocking(move || process.kill()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(pid, error = %e, "Failed to kill PTY process"),
        Err(e) => warn!(pid, error = %e, "PTY kill task failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builders() {
        let config = TerminalConfig::default()
            .with_shell("/bin/sh")
            .with_scrollback_bytes(1024)
            .with_size(40, 120);
        assert_eq!(config.shell, "/bin/sh");
        assert_eq!(config.scrollback_bytes, 1024);
        assert_eq!((config.rows, config.cols), (40, 120));
        assert_eq!(TerminalConfig::default().shell, DEFAULT_SHELL);
    }

    #[tokio::test]
    async fn test_unsupported_language_spawns_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mux = TerminalMultiplexer::new(TerminalConfig::default(), dir.path(), Arc::new(Room::new()));
        let err = mux.process_run("cobol", None).await.unwrap_err();
        assert_eq!(err.to_string(), "Language not supported");
        assert!(!mux.is_running().await);
        assert!(mux.run_process().await.is_none());
    }

    #[tokio::test]
    async fn test_terminal_data_without_shell() {
        let dir = tempfile::tempdir().unwrap();
        let mux = TerminalMultiplexer::new(TerminalConfig::default(), dir.path(), Arc::new(Room::new()));
        assert!(matches!(
            mux.terminal_data(SocketId::new(), b"ls\n"),
            Err(TerminalError::NoTerminal)
        ));
    }

    #[tokio::test]
    async fn test_attach_sends_idle_status() {
        let dir = tempfile::tempdir().unwrap();
        let room = Arc::new(Room::new());
        let mux = TerminalMultiplexer::new(TerminalConfig::default(), dir.path(), room.clone());
        let (tx, mut rx) = loom_types::event_channel();
        let socket = SocketId::new();
        mux.attach(socket, tx).await;
        assert_eq!(rx.try_recv().unwrap(), ServerEvent::status(false));
        assert!(room.contains(socket));

        mux.detach(socket).await;
        assert!(!room.contains(socket));
    }
}
