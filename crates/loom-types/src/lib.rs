//! Shared types for the Loom workspace runner.
//!
//! Everything the file-sync, terminal and session crates exchange with each
//! other (and with connected clients) lives here:
//!
//! - [`FileSystemNode`] - the tagged file tree node sent to clients
//! - [`ServerEvent`] - the outbound event protocol
//! - [`Room`] - fan-out registry of connected sockets for one workspace
//! - [`Access`] - per-socket permission flag supplied by the identity layer

pub mod access;
pub mod event;
pub mod node;
pub mod room;

pub use access::Access;
pub use event::{OpResult, ServerEvent, TerminalOrigin};
pub use node::{FileSystemNode, ItemKind, language_for_path};
pub use room::{EventReceiver, EventSender, Room, SocketId, event_channel};
