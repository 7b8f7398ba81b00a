//! A pseudo-terminal process with its output exposed as an async channel.

use std::io::{Read, Write};
use std::path::PathBuf;

use parking_lot::Mutex;
use portable_pty::{Child, ChildKiller, CommandBuilder, MasterPty, NativePtySystem, PtySize, PtySystem};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::error::{Result, TerminalError};

/// Interrupt (Ctrl-C).
pub const ETX: &[u8] = b"\x03";

/// What to run inside a PTY.
#[derive(Debug, Clone)]
pub struct PtyCommand {
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    env: Vec<(String, String)>,
    rows: u16,
    cols: u16,
}

impl PtyCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: vec![("TERM".to_string(), "xterm-256color".to_string())],
            rows: 24,
            cols: 80,
        }
    }

    /// `sh -c <script>`.
    pub fn script(script: impl Into<String>) -> Self {
        Self::new("sh").arg("-c").arg(script)
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn size(mut self, rows: u16, cols: u16) -> Self {
        self.rows = rows;
        self.cols = cols;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    fn builder(&self) -> CommandBuilder {
        let mut cmd = CommandBuilder::new(&self.program);
        cmd.args(&self.args);
        if let Some(cwd) = &self.cwd {
            cmd.cwd(cwd);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd
    }
}

/// A live PTY child.
///
/// Output is read on a dedicated thread (the PTY API is blocking) and
/// delivered through the receiver returned by [`PtyProcess::spawn`]. The
/// receiver closes when the child's side of the terminal is gone.
pub struct PtyProcess {
    master: Mutex<Box<dyn MasterPty + Send>>,
    writer: Mutex<Box<dyn Write + Send>>,
    child: Mutex<Box<dyn Child + Send + Sync>>,
    pid: Option<u32>,
}

impl std::fmt::Debug for PtyProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyProcess").field("pid", &self.pid).finish()
    }
}

impl PtyProcess {
    pub fn spawn(command: PtyCommand) -> Result<(Self, mpsc::UnboundedReceiver<Vec<u8>>)> {
        let pair = NativePtySystem::default()
            .openpty(PtySize {
                rows: command.rows,
                cols: command.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| TerminalError::Pty(format!("Failed to open PTY: {}", e)))?;

        let child = pair
            .slave
            .spawn_command(command.builder())
            .map_err(|e| TerminalError::Pty(format!("Failed to spawn {}: {}", command.program, e)))?;

        // Drop the slave so reads hit EOF once the child exits.
        drop(pair.slave);

        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| TerminalError::Pty(format!("Failed to clone PTY reader: {}", e)))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| TerminalError::Pty(format!("Failed to take PTY writer: {}", e)))?;

        let pid = child.process_id();
        let (tx, rx) = mpsc::unbounded_channel();

        std::thread::Builder::new()
            .name(format!("pty-reader-{}", pid.unwrap_or_default()))
            .spawn(move || {
                let mut buf = [0u8; 4096];
                loop {
                    match reader.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => {
                            trace!(bytes = n, "PTY output");
                            if tx.send(buf[..n].to_vec()).is_err() {
                                break;
                            }
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                        // EIO once the child side closes on Linux.
                        Err(_) => break,
                    }
                }
                debug!(pid, "PTY reader finished");
            })?;

        debug!(program = %command.program, pid, "Spawned PTY process");

        Ok((
            Self {
                master: Mutex::new(pair.master),
                writer: Mutex::new(writer),
                child: Mutex::new(child),
                pid,
            },
            rx,
        ))
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn write(&self, data: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock();
        writer.write_all(data)?;
        writer.flush()?;
        Ok(())
    }

    /// Send Ctrl-C to the foreground process.
    pub fn interrupt(&self) -> Result<()> {
        self.write(ETX)
    }

    pub fn resize(&self, rows: u16, cols: u16) -> Result<()> {
        self.master
            .lock()
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| TerminalError::Pty(format!("Failed to resize PTY: {}", e)))
    }

    pub fn is_alive(&self) -> bool {
        matches!(self.child.lock().try_wait(), Ok(None))
    }

    /// Kill the child and reap it. Blocks briefly; call from a blocking
    /// context when on the runtime.
    pub fn kill(&self) -> Result<()> {
        let mut child = self.child.lock();
        if matches!(child.try_wait(), Ok(Some(_))) {
            return Ok(());
        }
        child.kill()?;
        child.wait()?;
        debug!(pid = self.pid, "Killed PTY process");
        Ok(())
    }
}

impl Drop for PtyProcess {
    fn drop(&mut self) {
        let child = self.child.get_mut();
        if matches!(child.try_wait(), Ok(None)) {
            let _ = child.kill();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn collect(mut rx: mpsc::UnboundedReceiver<Vec<u8>>) -> Vec<u8> {
        let mut out = Vec::new();
        while let Ok(Some(chunk)) = tokio::time::timeout(Duration::from_secs(10), rx.recv()).await
        {
            out.extend(chunk);
        }
        out
    }

    #[tokio::test]
    async fn test_spawn_reads_output_until_exit() {
        let (pty, rx) = PtyProcess::spawn(PtyCommand::script("echo hello")).unwrap();
        assert!(pty.pid().is_some());
        let output = collect(rx).await;
        assert!(String::from_utf8_lossy(&output).contains("hello"));
    }

    #[tokio::test]
    async fn test_write_reaches_child() {
        let (pty, rx) = PtyProcess::spawn(PtyCommand::script("read line; echo got:$line")).unwrap();
        pty.write(b"abc\n").unwrap();
        let output = collect(rx).await;
        assert!(String::from_utf8_lossy(&output).contains("got:abc"));
    }

    #[tokio::test]
    async fn test_kill_stops_long_running_child() {
        let (pty, rx) = PtyProcess::spawn(PtyCommand::script("sleep 30")).unwrap();
        assert!(pty.is_alive());
        pty.kill().unwrap();
        assert!(!pty.is_alive());
        drop(pty);
        // Channel closes once the terminal is gone.
        let _ = collect(rx).await;
    }

    #[test]
    fn test_command_builder() {
        let cmd = PtyCommand::script("ls").cwd("/tmp").size(40, 120);
        assert_eq!(cmd.program(), "sh");
        assert_eq!(cmd.args(), ["-c", "ls"]);
        assert_eq!((cmd.rows, cmd.cols), (40, 120));
    }
}
