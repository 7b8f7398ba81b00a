//! Outbound event protocol sent from the runner to connected clients.

use serde::{Deserialize, Serialize};

use crate::node::{FileSystemNode, ItemKind};

/// Which PTY produced a chunk of terminal output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerminalOrigin {
    /// The socket's private shell.
    Shell,
    /// The workspace-wide shared run process.
    Run,
}

/// Events pushed to a socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Root listing sent once when a socket connects.
    #[serde(rename = "tree-snapshot")]
    TreeSnapshot { nodes: Vec<FileSystemNode> },

    #[serde(rename = "item-created")]
    ItemCreated { path: String, kind: ItemKind },

    #[serde(rename = "item-deleted")]
    ItemDeleted { path: String, kind: ItemKind },

    #[serde(rename = "item-renamed", rename_all = "camelCase")]
    ItemRenamed {
        old_path: String,
        new_path: String,
        kind: ItemKind,
    },

    #[serde(rename = "item-updated")]
    ItemUpdated { path: String, content: String },

    /// Raw PTY output. Bytes are base64 encoded on the wire.
    #[serde(rename = "terminal:output")]
    TerminalOutput {
        origin: TerminalOrigin,
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },

    /// The socket's private shell exited.
    #[serde(rename = "terminal:exit")]
    TerminalExit,

    #[serde(rename = "process:status", rename_all = "camelCase")]
    ProcessStatus { is_running: bool },

    /// Reply to a client request, correlated by `request_id`.
    #[serde(rename = "response", rename_all = "camelCase")]
    Response {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<u64>,
        body: serde_json::Value,
    },

    #[serde(rename = "error")]
    Error { code: String, message: String },
}

impl ServerEvent {
    /// Create an error event.
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn run_output(data: Vec<u8>) -> Self {
        Self::TerminalOutput {
            origin: TerminalOrigin::Run,
            data,
        }
    }

    pub fn shell_output(data: Vec<u8>) -> Self {
        Self::TerminalOutput {
            origin: TerminalOrigin::Shell,
            data,
        }
    }

    pub fn status(is_running: bool) -> Self {
        Self::ProcessStatus { is_running }
    }
}

/// Result of a CRUD RPC.
///
/// File operations report failure in-band instead of returning `Err`, so the
/// transport can show the message without tearing the session down.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OpResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_tags() {
        let json = serde_json::to_value(ServerEvent::status(true)).unwrap();
        assert_eq!(json["type"], "process:status");
        assert_eq!(json["isRunning"], true);

        let json = serde_json::to_value(ServerEvent::ItemRenamed {
            old_path: "/a".into(),
            new_path: "/b".into(),
            kind: ItemKind::Directory,
        })
        .unwrap();
        assert_eq!(json["type"], "item-renamed");
        assert_eq!(json["oldPath"], "/a");
        assert_eq!(json["newPath"], "/b");
        assert_eq!(json["kind"], "directory");
    }

    #[test]
    fn test_terminal_output_is_base64() {
        let event = ServerEvent::run_output(b"1\r\n".to_vec());
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"terminal:output\""));
        assert!(json.contains("\"origin\":\"run\""));
        assert!(json.contains("\"data\":\"MQ0K\""));

        let back: ServerEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_op_result_omits_empty_error() {
        let json = serde_json::to_string(&OpResult::ok()).unwrap();
        assert_eq!(json, r#"{"success":true}"#);

        let failed = OpResult::failed("already exists");
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("already exists"));
    }
}
