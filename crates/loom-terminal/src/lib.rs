//! Terminal multiplexing for Loom workspaces.
//!
//! Two kinds of PTY live here:
//!
//! - **Private shells**, one per socket, started on `requestTerminal` and
//!   killed as soon as the socket goes away.
//! - **The run process**, at most one per workspace, started from a fixed
//!   per-language template. Its output is published to the whole room and
//!   buffered for sockets that attach later.
//!
//! PTY output is delivered through async channels and fanned out by the
//! multiplexer, never by the PTY wrapper itself.

pub mod error;
pub mod multiplexer;
pub mod ports;
pub mod pty;
pub mod run;
pub mod scrollback;

pub use error::{Result, TerminalError};
pub use multiplexer::{DEFAULT_SHELL, TerminalConfig, TerminalMultiplexer};
pub use ports::{DEFAULT_PROBE_TIMEOUT, PortStatus, check_port};
pub use pty::{ETX, PtyCommand, PtyProcess};
pub use run::{run_command, supported_languages};
pub use scrollback::{DEFAULT_SCROLLBACK_BYTES, Scrollback};
