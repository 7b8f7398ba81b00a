//! File tree nodes exposed to clients.

use serde::{Deserialize, Serialize};

/// Kind of item addressed by a file operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    File,
    Directory,
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemKind::File => write!(f, "file"),
            ItemKind::Directory => write!(f, "directory"),
        }
    }
}

/// A node in a workspace's file tree.
///
/// Identity is the workspace-relative `path` (always starting with `/`).
/// Parent/child relations are implied by path prefix; nodes never hold a
/// pointer to their parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FileSystemNode {
    File {
        path: String,
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        language: Option<String>,
    },
    Directory {
        path: String,
        name: String,
        /// `None` means the children have not been fetched yet, which is
        /// distinct from `Some(vec![])` (fetched, empty).
        #[serde(default)]
        children: Option<Vec<FileSystemNode>>,
    },
}

impl FileSystemNode {
    /// Build a file node, detecting its language from the extension.
    pub fn file(path: impl Into<String>, name: impl Into<String>) -> Self {
        let path = path.into();
        let language = language_for_path(&path).map(str::to_string);
        Self::File {
            path,
            name: name.into(),
            language,
        }
    }

    /// Build a directory node whose children are not yet known.
    pub fn directory(path: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Directory {
            path: path.into(),
            name: name.into(),
            children: None,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Self::File { path, .. } | Self::Directory { path, .. } => path,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::File { name, .. } | Self::Directory { name, .. } => name,
        }
    }

    pub fn kind(&self) -> ItemKind {
        match self {
            Self::File { .. } => ItemKind::File,
            Self::Directory { .. } => ItemKind::Directory,
        }
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, Self::Directory { .. })
    }
}

/// Map a file path to the editor language id used by clients.
pub fn language_for_path(path: &str) -> Option<&'static str> {
    let name = path.rsplit('/').next().unwrap_or(path);
    match name {
        "Dockerfile" => return Some("dockerfile"),
        "Makefile" => return Some("makefile"),
        _ => {}
    }
    let (_, ext) = name.rsplit_once('.')?;
    let language = match ext.to_ascii_lowercase().as_str() {
        "py" => "python",
        "js" | "mjs" | "cjs" => "javascript",
        "jsx" => "javascript",
        "ts" | "tsx" => "typescript",
        "rs" => "rust",
        "go" => "go",
        "rb" => "ruby",
        "java" => "java",
        "c" | "h" => "c",
        "cpp" | "cc" | "cxx" | "hpp" => "cpp",
        "sh" | "bash" => "shell",
        "json" => "json",
        "html" | "htm" => "html",
        "css" => "css",
        "scss" => "scss",
        "md" => "markdown",
        "yaml" | "yml" => "yaml",
        "toml" => "toml",
        "sql" => "sql",
        "vue" => "vue",
        _ => return None,
    };
    Some(language)
}
