//! Inbound message types. Outbound messages are [`loom_types::ServerEvent`].

use loom_types::ItemKind;
use serde::{Deserialize, Serialize};

/// A client request plus its optional correlation id.
///
/// ```json
/// {"id": 7, "type": "renameItem", "oldPath": "/a", "newPath": "/b", "kind": "file"}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientEnvelope {
    /// Echoed back as `requestId` on the reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(flatten)]
    pub message: ClientMessage,
}

/// Messages from client to server.
///
/// The item kind travels as `kind` because `type` names the message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    FetchDir {
        path: String,
    },
    FetchContent {
        path: String,
    },
    CreateItem {
        path: String,
        kind: ItemKind,
        #[serde(default)]
        content: Option<String>,
    },
    DeleteItem {
        path: String,
        kind: ItemKind,
    },
    RenameItem {
        old_path: String,
        new_path: String,
        kind: ItemKind,
    },
    UpdateContent {
        path: String,
        content: String,
    },
    /// Spawn (or respawn) this socket's private shell.
    RequestTerminal,
    /// Keystrokes for the private shell.
    TerminalData {
        data: String,
    },
    ResizeTerminal {
        cols: u16,
        rows: u16,
    },
    ProcessRun {
        language: String,
        #[serde(default)]
        path: Option<String>,
    },
    ProcessStop,
    CheckPort {
        port: u16,
    },
    Ping,
}

impl ClientMessage {
    /// Whether the message changes workspace state or drives a PTY.
    pub fn requires_write(&self) -> bool {
        !matches!(
            self,
            ClientMessage::FetchDir { .. }
                | ClientMessage::FetchContent { .. }
                | ClientMessage::CheckPort { .. }
                | ClientMessage::Ping
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            ClientMessage::FetchDir { .. } => "fetchDir",
            ClientMessage::FetchContent { .. } => "fetchContent",
            ClientMessage::CreateItem { .. } => "createItem",
            ClientMessage::DeleteItem { .. } => "deleteItem",
            ClientMessage::RenameItem { .. } => "renameItem",
            ClientMessage::UpdateContent { .. } => "updateContent",
            ClientMessage::RequestTerminal => "requestTerminal",
            ClientMessage::TerminalData { .. } => "terminalData",
            ClientMessage::ResizeTerminal { .. } => "resizeTerminal",
            ClientMessage::ProcessRun { .. } => "processRun",
            ClientMessage::ProcessStop => "processStop",
            ClientMessage::CheckPort { .. } => "checkPort",
            ClientMessage::Ping => "ping",
        }
    }
}
