//! Workspace-relative path validation.
//!
//! Client paths look like `/src/main.py`. Every path is normalized before it
//! touches disk or the object store:
//!
//! - `.` and empty segments are dropped, so `//src/./main.py` == `/src/main.py`
//! - `..` segments are rejected outright rather than resolved
//! - NUL bytes and backslashes are rejected
//!
//! A normalized path can therefore never escape the workspace root.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors produced while validating a client-supplied path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("path is empty")]
    Empty,

    #[error("path traversal is not allowed: {0}")]
    Traversal(String),

    #[error("illegal character in path: {0}")]
    IllegalCharacter(String),

    #[error("operation not allowed on the workspace root")]
    Root,
}

/// A validated, normalized workspace-relative path (always starts with `/`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkspacePath(String);

impl WorkspacePath {
    /// The workspace root, `/`.
    pub fn root() -> Self {
        Self("/".to_string())
    }

    /// Validate and normalize a client path.
    pub fn parse(raw: &str) -> Result<Self, PathError> {
        if raw.trim().is_empty() {
            return Err(PathError::Empty);
        }
        if raw.contains('\0') || raw.contains('\\') {
            return Err(PathError::IllegalCharacter(raw.to_string()));
        }

        let mut segments = Vec::new();
        for segment in raw.split('/') {
            match segment {
                "" | "." => continue,
                ".." => return Err(PathError::Traversal(raw.to_string())),
                s => segments.push(s),
            }
        }

        if segments.is_empty() {
            return Ok(Self::root());
        }
        Ok(Self(format!("/{}", segments.join("/"))))
    }

    /// Like [`parse`](Self::parse), but rejects the root itself.
    pub fn parse_item(raw: &str) -> Result<Self, PathError> {
        let path = Self::parse(raw)?;
        if path.is_root() {
            return Err(PathError::Root);
        }
        Ok(path)
    }

    /// Build from a path relative to the workspace root on disk.
    pub fn from_relative(relative: &Path) -> Result<Self, PathError> {
        let raw = relative.to_string_lossy().replace(std::path::MAIN_SEPARATOR, "/");
        Self::parse(&format!("/{}", raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// Final segment, or empty for the root.
    pub fn name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or("")
    }

    /// Parent directory; the root is its own parent.
    pub fn parent(&self) -> Self {
        match self.0.rfind('/') {
            Some(0) | None => Self::root(),
            Some(idx) => Self(self.0[..idx].to_string()),
        }
    }

    pub fn join(&self, name: &str) -> Result<Self, PathError> {
        Self::parse(&format!("{}/{}", self.0, name))
    }

    /// Whether `self` is `ancestor` or lies beneath it.
    pub fn starts_with(&self, ancestor: &WorkspacePath) -> bool {
        if ancestor.is_root() || self == ancestor {
            return true;
        }
        self.0.starts_with(&ancestor.0) && self.0.as_bytes().get(ancestor.0.len()) == Some(&b'/')
    }

    /// Re-root a descendant of `from` under `to`.
    ///
    /// For every descendant `D` of a renamed directory, the new path is
    /// `to + D[from.len()..]`.
    pub fn rebase(&self, from: &WorkspacePath, to: &WorkspacePath) -> Option<Self> {
        if !self.starts_with(from) || from.is_root() {
            return None;
        }
        Some(Self(format!("{}{}", to.0, &self.0[from.0.len()..])))
    }

    /// Absolute location of this path under a workspace root on disk.
    pub fn to_disk(&self, root: &Path) -> PathBuf {
        let relative = self.0.trim_start_matches('/');
        if relative.is_empty() {
            root.to_path_buf()
        } else {
            root.join(relative)
        }
    }
}

impl std::fmt::Display for WorkspacePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for WorkspacePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_normalizes() {
        assert_eq!(WorkspacePath::parse("/src/main.py").unwrap().as_str(), "/src/main.py");
        assert_eq!(WorkspacePath::parse("src//./main.py").unwrap().as_str(), "/src/main.py");
        assert_eq!(WorkspacePath::parse("/").unwrap().as_str(), "/");
        assert_eq!(WorkspacePath::parse("/src/").unwrap().as_str(), "/src");
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert_eq!(WorkspacePath::parse(""), Err(PathError::Empty));
        assert!(matches!(
            WorkspacePath::parse("/../etc/passwd"),
            Err(PathError::Traversal(_))
        ));
        assert!(matches!(
            WorkspacePath::parse("/a/../../b"),
            Err(PathError::Traversal(_))
        ));
        assert!(matches!(
            WorkspacePath::parse("/a\\b"),
            Err(PathError::IllegalCharacter(_))
        ));
        assert_eq!(WorkspacePath::parse_item("/"), Err(PathError::Root));
    }

    #[test]
    fn test_parent_and_name() {
        let path = WorkspacePath::parse("/src/lib/mod.rs").unwrap();
        assert_eq!(path.name(), "mod.rs");
        assert_eq!(path.parent().as_str(), "/src/lib");
        assert_eq!(path.parent().parent().as_str(), "/src");
        assert_eq!(path.parent().parent().parent(), WorkspacePath::root());
        assert_eq!(WorkspacePath::root().parent(), WorkspacePath::root());
    }

    #[test]
    fn test_starts_with_respects_segment_boundaries() {
        let src = WorkspacePath::parse("/src").unwrap();
        assert!(WorkspacePath::parse("/src/a.rs").unwrap().starts_with(&src));
        assert!(src.starts_with(&src));
        assert!(!WorkspacePath::parse("/srcs/a.rs").unwrap().starts_with(&src));
        assert!(src.starts_with(&WorkspacePath::root()));
    }

    #[test]
    fn test_rebase_descendants() {
        let old = WorkspacePath::parse("/app").unwrap();
        let new = WorkspacePath::parse("/web/app2").unwrap();
        let descendant = WorkspacePath::parse("/app/components/Button.tsx").unwrap();

        let moved = descendant.rebase(&old, &new).unwrap();
        assert_eq!(
            moved.as_str(),
            format!("{}{}", new.as_str(), &descendant.as_str()[old.as_str().len()..])
        );
        assert_eq!(moved.as_str(), "/web/app2/components/Button.tsx");
        assert!(WorkspacePath::parse("/other").unwrap().rebase(&old, &new).is_none());
    }

    #[test]
    fn test_to_disk() {
        let root = Path::new("/workspace");
        assert_eq!(WorkspacePath::root().to_disk(root), PathBuf::from("/workspace"));
        assert_eq!(
            WorkspacePath::parse("/src/main.py").unwrap().to_disk(root),
            PathBuf::from("/workspace/src/main.py")
        );
    }

    #[test]
    fn test_from_relative() {
        let path = WorkspacePath::from_relative(Path::new("src/main.py")).unwrap();
        assert_eq!(path.as_str(), "/src/main.py");
    }
}
