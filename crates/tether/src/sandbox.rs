//! Path confinement: every filesystem operation resolves its argument here
//! before touching the disk.
//!
//! A [`SandboxRoot`] is canonicalized once at construction. Resolution walks
//! the user path component by component from the root, canonicalizing each
//! prefix that exists on disk (so symlinks are followed) and normalizing the
//! non-existent tail lexically. A component below a regular file counts as
//! non-existent too. The final path must be the root itself or a
//! descendant of it.

use std::fmt;
use std::io;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, trace};

use crate::ToolError;

/// The single directory all confined operations are restricted to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SandboxRoot {
    root: PathBuf,
}

impl SandboxRoot {
    /// Canonicalize `path` and use it as the sandbox root.
    ///
    /// Fails with [`ToolError::Io`] if the path does not exist or is not a
    /// directory.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, ToolError> {
        let path = path.as_ref();
        let root = std::fs::canonicalize(path).map_err(|e| ToolError::io(path, e))?;
        if !root.is_dir() {
            return Err(ToolError::io(
                root,
                io::Error::new(
                    io::ErrorKind::NotADirectory,
                    "sandbox root is not a directory",
                ),
            ));
        }
        debug!("Sandbox root: {}", root.display());
        Ok(Self { root })
    }

    /// The canonical root path.
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Resolve `relative` against the root.
    ///
    /// Absolute-looking input (`/etc/passwd`, `C:\x`) is still interpreted
    /// relative to the root. Returns [`ToolError::PathEscape`] if the result
    /// lands outside the root, and [`ToolError::Io`] if canonicalizing an
    /// existing prefix fails (for example a dangling symlink).
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, ToolError> {
        let mut resolved = self.root.clone();

        for component in Path::new(relative).components() {
            match component {
                Component::Prefix(_) | Component::RootDir | Component::CurDir => {}
                Component::ParentDir => {
                    resolved.pop();
                }
                Component::Normal(part) => {
                    resolved.push(part);
                    match std::fs::symlink_metadata(&resolved) {
                        Ok(_) => {
                            resolved = std::fs::canonicalize(&resolved)
                                .map_err(|e| ToolError::io(&resolved, e))?;
                        }
                        Err(e) if is_missing(&e) => {}
                        Err(e) => return Err(ToolError::io(&resolved, e)),
                    }
                }
            }
        }

        // Component-wise prefix: `/work-other` does not start with `/work`.
        if !resolved.starts_with(&self.root) {
            debug!(
                "Rejected '{relative}': resolves to {} outside {}",
                resolved.display(),
                self.root.display()
            );
            return Err(ToolError::PathEscape {
                path: relative.to_string(),
                root: self.root.clone(),
            });
        }

        trace!("Resolved '{relative}' -> {}", resolved.display());
        Ok(resolved)
    }

    /// Render a resolved path relative to the root for human-readable
    /// messages. The root itself renders as `.`.
    pub fn display_relative(&self, resolved: &Path) -> String {
        match resolved.strip_prefix(&self.root) {
            Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
            Ok(rel) => rel.display().to_string(),
            Err(_) => resolved.display().to_string(),
        }
    }
}

/// `NotFound`, or `NotADirectory` when an earlier component is a file.
pub(crate) fn is_missing(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
    )
}

impl fmt::Display for SandboxRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root.display())
    }
}
