//! Sandboxed filesystem operations.
//!
//! [`FileTools`] owns a [`SandboxRoot`] and a [`ProgressChannel`]. Every
//! operation emits [`ProgressEvent::Started`], resolves its path through the
//! root, performs the action, and emits [`ProgressEvent::Finished`] or
//! [`ProgressEvent::Failed`]. A path that escapes the root fails before the
//! disk is touched.
//!
//! Conditions that leave nothing to do (creating something that exists,
//! deleting something that is already gone) are [`Outcome::Advisory`], not
//! errors. The seven `Tool` adapters at the bottom of this file expose the
//! operations to the model by name.

use std::fmt;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};

use regex::Regex;
use schemars::JsonSchema;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::ToolDef;
use crate::ToolError;
use crate::progress::{ProgressChannel, ProgressEvent};
use crate::sandbox::{SandboxRoot, is_missing};
use crate::tools::core::{Tool, ToolFuture, parse_tool_args};
use crate::tools::names;
use crate::tools::spec::ToolSpec;

/// Returned by `search_in_file` when the pattern never matches.
pub const NO_MATCHES: &str = "No matches found";

// ── Operations and outcomes ────────────────────────────────────────

/// The seven filesystem operations. `Display` gives the tool name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileOperation {
    CreateDirectory,
    CreateFile,
    DeleteDirectory,
    DeleteFile,
    ListDirectory,
    ReadFile,
    SearchInFile,
}

impl FileOperation {
    pub fn tool_name(self) -> &'static str {
        match self {
            FileOperation::CreateDirectory => names::CREATE_DIRECTORY,
            FileOperation::CreateFile => names::CREATE_FILE,
            FileOperation::DeleteDirectory => names::DELETE_DIRECTORY,
            FileOperation::DeleteFile => names::DELETE_FILE,
            FileOperation::ListDirectory => names::LIST_DIRECTORY,
            FileOperation::ReadFile => names::READ_FILE,
            FileOperation::SearchInFile => names::SEARCH_IN_FILE,
        }
    }

    /// Status-line verb, e.g. `"Creating file"`.
    pub fn present_participle(self) -> &'static str {
        match self {
            FileOperation::CreateDirectory => "Creating directory",
            FileOperation::CreateFile => "Creating file",
            FileOperation::DeleteDirectory => "Deleting directory",
            FileOperation::DeleteFile => "Deleting file",
            FileOperation::ListDirectory => "Listing directory",
            FileOperation::ReadFile => "Reading file",
            FileOperation::SearchInFile => "Searching file",
        }
    }

    /// Whether the operation changes the filesystem.
    pub fn is_mutation(self) -> bool {
        matches!(
            self,
            FileOperation::CreateDirectory
                | FileOperation::CreateFile
                | FileOperation::DeleteDirectory
                | FileOperation::DeleteFile
        )
    }
}

impl fmt::Display for FileOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tool_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

impl EntryKind {
    fn of(metadata: &std::fs::Metadata) -> Self {
        if metadata.is_dir() {
            EntryKind::Directory
        } else {
            EntryKind::File
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryKind::File => f.write_str("File"),
            EntryKind::Directory => f.write_str("Directory"),
        }
    }
}

/// A benign condition that made the operation a no-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advisory {
    AlreadyExists { kind: EntryKind, path: String },
    NotFound { kind: EntryKind, path: String },
    NotADirectory { path: String },
    NotAFile { path: String },
}

impl fmt::Display for Advisory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Advisory::AlreadyExists { kind, path } => write!(f, "{kind} already exists: {path}"),
            Advisory::NotFound { kind, path } => write!(f, "{kind} not found: {path}"),
            Advisory::NotADirectory { path } => write!(f, "Not a directory: {path}"),
            Advisory::NotAFile { path } => write!(f, "Not a file: {path}"),
        }
    }
}

/// Successful result of a filesystem operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The operation ran; the string is its result text.
    Completed(String),
    /// Nothing was done.
    Advisory(Advisory),
}

impl Outcome {
    pub fn is_advisory(&self) -> bool {
        matches!(self, Outcome::Advisory(_))
    }

    /// The result text of a completed operation.
    pub fn completed(&self) -> Option<&str> {
        match self {
            Outcome::Completed(text) => Some(text),
            Outcome::Advisory(_) => None,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Completed(text) => f.write_str(text),
            Outcome::Advisory(advisory) => write!(f, "{advisory}"),
        }
    }
}

// ── FileTools ──────────────────────────────────────────────────────

/// Filesystem operations confined to one root.
///
/// Cheap to clone; clones share the progress channel.
#[derive(Debug, Clone)]
pub struct FileTools {
    root: SandboxRoot,
    progress: ProgressChannel,
}

impl FileTools {
    pub fn new(root: SandboxRoot) -> Self {
        Self {
            root,
            progress: ProgressChannel::new(),
        }
    }

    /// Report progress to `progress` instead of a private channel.
    pub fn with_progress(mut self, progress: ProgressChannel) -> Self {
        self.progress = progress;
        self
    }

    pub fn root(&self) -> &SandboxRoot {
        &self.root
    }

    pub fn progress(&self) -> &ProgressChannel {
        &self.progress
    }

    /// Create a directory and any missing parents.
    pub async fn create_directory(&self, path: &str) -> Result<Outcome, ToolError> {
        self.perform(FileOperation::CreateDirectory, path, |resolved| async move {
            if let Some(metadata) = metadata_if_exists(&resolved).await? {
                return Ok(Outcome::Advisory(Advisory::AlreadyExists {
                    kind: EntryKind::of(&metadata),
                    path: path.to_string(),
                }));
            }
            tokio::fs::create_dir_all(&resolved)
                .await
                .map_err(|e| ToolError::io(&resolved, e))?;
            Ok(Outcome::Completed(format!("Directory created: {path}")))
        })
        .await
    }

    /// Create a file (and any missing parents) holding `content`, or empty.
    ///
    /// An existing file is never overwritten.
    pub async fn create_file(
        &self,
        path: &str,
        content: Option<&str>,
    ) -> Result<Outcome, ToolError> {
        self.perform(FileOperation::CreateFile, path, |resolved| async move {
            let already_exists = |kind| {
                Outcome::Advisory(Advisory::AlreadyExists {
                    kind,
                    path: path.to_string(),
                })
            };
            if let Some(metadata) = metadata_if_exists(&resolved).await? {
                return Ok(already_exists(EntryKind::of(&metadata)));
            }
            if let Some(parent) = resolved.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| ToolError::io(parent, e))?;
            }
            let mut file = match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&resolved)
                .await
            {
                Ok(f) => f,
                // Lost a race with another writer.
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    return Ok(already_exists(EntryKind::File));
                }
                Err(e) => return Err(ToolError::io(&resolved, e)),
            };
            let content = content.unwrap_or_default();
            file.write_all(content.as_bytes())
                .await
                .map_err(|e| ToolError::io(&resolved, e))?;
            file.flush().await.map_err(|e| ToolError::io(&resolved, e))?;
            Ok(Outcome::Completed(format!("File created: {path}")))
        })
        .await
    }

    /// Delete an empty directory. A non-empty directory is an I/O error.
    pub async fn delete_directory(&self, path: &str) -> Result<Outcome, ToolError> {
        self.perform(FileOperation::DeleteDirectory, path, |resolved| async move {
            match metadata_if_exists(&resolved).await? {
                None => Ok(Outcome::Advisory(Advisory::NotFound {
                    kind: EntryKind::Directory,
                    path: path.to_string(),
                })),
                Some(m) if !m.is_dir() => Ok(Outcome::Advisory(Advisory::NotADirectory {
                    path: path.to_string(),
                })),
                Some(_) => {
                    tokio::fs::remove_dir(&resolved)
                        .await
                        .map_err(|e| ToolError::io(&resolved, e))?;
                    Ok(Outcome::Completed(format!("Directory deleted: {path}")))
                }
            }
        })
        .await
    }

    pub async fn delete_file(&self, path: &str) -> Result<Outcome, ToolError> {
        self.perform(FileOperation::DeleteFile, path, |resolved| async move {
            match metadata_if_exists(&resolved).await? {
                None => Ok(Outcome::Advisory(Advisory::NotFound {
                    kind: EntryKind::File,
                    path: path.to_string(),
                })),
                Some(m) if m.is_dir() => Ok(Outcome::Advisory(Advisory::NotAFile {
                    path: path.to_string(),
                })),
                Some(_) => {
                    tokio::fs::remove_file(&resolved)
                        .await
                        .map_err(|e| ToolError::io(&resolved, e))?;
                    Ok(Outcome::Completed(format!("File deleted: {path}")))
                }
            }
        })
        .await
    }

    /// Immediate children sorted by name, one per line; directories end
    /// in `/`. An empty directory yields an empty string.
    pub async fn list_directory(&self, path: &str) -> Result<Outcome, ToolError> {
        self.perform(FileOperation::ListDirectory, path, |resolved| async move {
            match metadata_if_exists(&resolved).await? {
                None => {
                    return Ok(Outcome::Advisory(Advisory::NotFound {
                        kind: EntryKind::Directory,
                        path: path.to_string(),
                    }));
                }
                Some(m) if !m.is_dir() => {
                    return Ok(Outcome::Advisory(Advisory::NotADirectory {
                        path: path.to_string(),
                    }));
                }
                Some(_) => {}
            }

            let mut reader = tokio::fs::read_dir(&resolved)
                .await
                .map_err(|e| ToolError::io(&resolved, e))?;
            let mut entries = Vec::new();
            while let Some(entry) = reader
                .next_entry()
                .await
                .map_err(|e| ToolError::io(&resolved, e))?
            {
                let mut name = entry.file_name().to_string_lossy().into_owned();
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| ToolError::io(entry.path(), e))?;
                if file_type.is_dir() {
                    name.push('/');
                }
                entries.push(name);
            }
            entries.sort();
            Ok(Outcome::Completed(entries.join("\n")))
        })
        .await
    }

    /// Full contents as text. Invalid UTF-8 is replaced, not rejected.
    pub async fn read_file(&self, path: &str) -> Result<Outcome, ToolError> {
        self.perform(FileOperation::ReadFile, path, |resolved| async move {
            let bytes = tokio::fs::read(&resolved)
                .await
                .map_err(|e| ToolError::io(&resolved, e))?;
            Ok(Outcome::Completed(
                String::from_utf8_lossy(&bytes).into_owned(),
            ))
        })
        .await
    }

    /// Every match of `pattern` in document order as
    /// `Match at <byte offset>: <text>`, or [`NO_MATCHES`].
    pub async fn search_in_file(&self, path: &str, pattern: &str) -> Result<Outcome, ToolError> {
        self.perform(FileOperation::SearchInFile, path, |resolved| async move {
            let regex = Regex::new(pattern)?;
            let bytes = tokio::fs::read(&resolved)
                .await
                .map_err(|e| ToolError::io(&resolved, e))?;
            let text = String::from_utf8_lossy(&bytes);
            Ok(Outcome::Completed(format_matches(&regex, &text)))
        })
        .await
    }

    /// Report `Started`, resolve, run `action`, report the result.
    async fn perform<F, Fut>(
        &self,
        operation: FileOperation,
        path: &str,
        action: F,
    ) -> Result<Outcome, ToolError>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = Result<Outcome, ToolError>>,
    {
        self.progress
            .emit(ProgressEvent::Started { operation, path });
        let resolved = match self.root.resolve(path) {
            Ok(p) => p,
            Err(e) => {
                self.report_failure(operation, path, &e);
                return Err(e);
            }
        };
        debug!(
            "{operation} {} ({})",
            self.root.display_relative(&resolved),
            resolved.display()
        );

        match action(resolved).await {
            Ok(outcome) => {
                let message = finished_message(operation, path, &outcome);
                self.progress.emit(ProgressEvent::Finished {
                    operation,
                    path,
                    message: &message,
                });
                Ok(outcome)
            }
            Err(e) => {
                self.report_failure(operation, path, &e);
                Err(e)
            }
        }
    }

    fn report_failure(&self, operation: FileOperation, path: &str, error: &ToolError) {
        let error = error.to_string();
        self.progress.emit(ProgressEvent::Failed {
            operation,
            path,
            error: &error,
        });
    }
}

async fn metadata_if_exists(path: &Path) -> Result<Option<std::fs::Metadata>, ToolError> {
    match tokio::fs::metadata(path).await {
        Ok(m) => Ok(Some(m)),
        Err(e) if is_missing(&e) => Ok(None),
        Err(e) => Err(ToolError::io(path, e)),
    }
}

fn format_matches(regex: &Regex, text: &str) -> String {
    let lines: Vec<String> = regex
        .find_iter(text)
        .map(|m| format!("Match at {}: {}", m.start(), m.as_str()))
        .collect();
    if lines.is_empty() {
        NO_MATCHES.to_string()
    } else {
        lines.join("\n")
    }
}

/// Status line for `Finished`. Read-only operations summarize instead of
/// echoing their whole payload.
fn finished_message(operation: FileOperation, path: &str, outcome: &Outcome) -> String {
    let text = match outcome {
        Outcome::Advisory(advisory) => return advisory.to_string(),
        Outcome::Completed(text) => text,
    };
    match operation {
        FileOperation::ListDirectory => {
            let count = text.lines().count();
            format!("Listed {count} entr{} in {path}", if count == 1 { "y" } else { "ies" })
        }
        FileOperation::ReadFile => format!("Read {} bytes from {path}", text.len()),
        FileOperation::SearchInFile if text == NO_MATCHES => format!("No matches in {path}"),
        FileOperation::SearchInFile => {
            let count = text.lines().count();
            format!("Found {count} match{} in {path}", if count == 1 { "" } else { "es" })
        }
        _ => text.clone(),
    }
}

// ── Typed argument structs ──────────────────────────────────────────

/// Typed arguments for the single-path tools.
#[derive(Deserialize, JsonSchema)]
pub struct PathArgs {
    /// Path relative to the project root (e.g. 'src/main.rs').
    pub path: String,
}

/// Typed arguments for `create_file`.
#[derive(Deserialize, JsonSchema)]
pub struct CreateFileArgs {
    /// Path of the new file relative to the project root.
    pub path: String,
    /// Initial file content (default: empty).
    #[serde(default)]
    pub content: Option<String>,
}

/// Typed arguments for `search_in_file`.
#[derive(Deserialize, JsonSchema)]
pub struct SearchInFileArgs {
    /// File path relative to the project root.
    pub path: String,
    /// Regular expression to search for (Rust `regex` syntax).
    pub pattern: String,
}

fn render(result: Result<Outcome, ToolError>) -> String {
    match result {
        Ok(outcome) => outcome.to_string(),
        Err(e) => format!("Error: {e}"),
    }
}

// ── Tool adapters ──────────────────────────────────────────────────

/// Declares a tool struct wrapping [`FileTools`].
macro_rules! file_tool {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        pub struct $name {
            files: FileTools,
        }

        impl $name {
            pub fn new(files: FileTools) -> Self {
                Self { files }
            }
        }
    };
}

file_tool!(
    /// `create_directory`: make a directory and its parents.
    CreateDirectory
);
file_tool!(
    /// `create_file`: make a new file with optional content.
    CreateFile
);
file_tool!(
    /// `delete_directory`: remove an empty directory.
    DeleteDirectory
);
file_tool!(
    /// `delete_file`: remove a file.
    DeleteFile
);
file_tool!(
    /// `list_directory`: list immediate children.
    ListDirectory
);
file_tool!(
    /// `read_file`: return a file's text.
    ReadFile
);
file_tool!(
    /// `search_in_file`: regex matches with byte offsets.
    SearchInFile
);

impl Tool for CreateDirectory {
    fn definition(&self) -> ToolDef {
        ToolSpec::builder(names::CREATE_DIRECTORY)
            .purpose("Create a directory, including any missing parent directories")
            .when_to_use("When the project needs a new directory before files are added to it")
            .when_not_to_use(
                "When creating a file; create_file creates missing parents itself. \
                 Do not use run_command with mkdir",
            )
            .parameters_for::<PathArgs>()
            .example(
                "create_directory(path='src/handlers')",
                "Directory created: src/handlers",
            )
            .output_format("One status line; an existing directory is reported, not an error")
            .to_tool_def()
    }

    fn is_mutation(&self) -> bool {
        true
    }

    fn execute(&self, arguments: &str) -> ToolFuture<'_> {
        let arguments = arguments.to_string();
        Box::pin(async move {
            let args: PathArgs = match parse_tool_args(&arguments) {
                Ok(a) => a,
                Err(e) => return e,
            };
            render(self.files.create_directory(&args.path).await)
        })
    }
}

impl Tool for CreateFile {
    fn definition(&self) -> ToolDef {
        ToolSpec::builder(names::CREATE_FILE)
            .purpose("Create a new file with optional initial content")
            .when_to_use("When adding a file that does not exist yet")
            .when_not_to_use(
                "When the file already exists; it is never overwritten. \
                 Do not use run_command with touch or echo redirection",
            )
            .parameters_for::<CreateFileArgs>()
            .example(
                "create_file(path='src/lib.rs', content='pub mod api;')",
                "File created: src/lib.rs",
            )
            .output_format("One status line")
            .to_tool_def()
    }

    fn is_mutation(&self) -> bool {
        true
    }

    fn execute(&self, arguments: &str) -> ToolFuture<'_> {
        let arguments = arguments.to_string();
        Box::pin(async move {
            let args: CreateFileArgs = match parse_tool_args(&arguments) {
                Ok(a) => a,
                Err(e) => return e,
            };
            render(
                self.files
                    .create_file(&args.path, args.content.as_deref())
                    .await,
            )
        })
    }
}

impl Tool for DeleteDirectory {
    fn definition(&self) -> ToolDef {
        ToolSpec::builder(names::DELETE_DIRECTORY)
            .purpose("Delete an empty directory")
            .when_to_use("When removing a directory whose files have already been deleted")
            .when_not_to_use(
                "When the directory still has contents; delete the files first. \
                 When deleting a file; use delete_file instead",
            )
            .parameters_for::<PathArgs>()
            .example(
                "delete_directory(path='old')",
                "Directory deleted: old",
            )
            .output_format("One status line")
            .to_tool_def()
    }

    fn is_mutation(&self) -> bool {
        true
    }

    fn execute(&self, arguments: &str) -> ToolFuture<'_> {
        let arguments = arguments.to_string();
        Box::pin(async move {
            let args: PathArgs = match parse_tool_args(&arguments) {
                Ok(a) => a,
                Err(e) => return e,
            };
            render(self.files.delete_directory(&args.path).await)
        })
    }
}

impl Tool for DeleteFile {
    fn definition(&self) -> ToolDef {
        ToolSpec::builder(names::DELETE_FILE)
            .purpose("Delete a single file")
            .when_to_use("When a file is no longer needed")
            .when_not_to_use("When deleting a directory; use delete_directory instead")
            .parameters_for::<PathArgs>()
            .example("delete_file(path='tmp/out.log')", "File deleted: tmp/out.log")
            .output_format("One status line")
            .to_tool_def()
    }

    fn is_mutation(&self) -> bool {
        true
    }

    fn execute(&self, arguments: &str) -> ToolFuture<'_> {
        let arguments = arguments.to_string();
        Box::pin(async move {
            let args: PathArgs = match parse_tool_args(&arguments) {
                Ok(a) => a,
                Err(e) => return e,
            };
            render(self.files.delete_file(&args.path).await)
        })
    }
}

impl Tool for ListDirectory {
    fn definition(&self) -> ToolDef {
        ToolSpec::builder(names::LIST_DIRECTORY)
            .purpose("List the immediate children of a directory")
            .when_to_use("When you need to see what a directory contains")
            .when_not_to_use(
                "When you already know the file path; use read_file. \
                 Do not use run_command with ls",
            )
            .parameters_for::<PathArgs>()
            .example("list_directory(path='.')", "Cargo.toml\\nsrc/")
            .output_format("One name per line, sorted; directories end with '/'")
            .to_tool_def()
    }

    fn execute(&self, arguments: &str) -> ToolFuture<'_> {
        let arguments = arguments.to_string();
        Box::pin(async move {
            let args: PathArgs = match parse_tool_args(&arguments) {
                Ok(a) => a,
                Err(e) => return e,
            };
            render(self.files.list_directory(&args.path).await)
        })
    }
}

impl Tool for ReadFile {
    fn definition(&self) -> ToolDef {
        ToolSpec::builder(names::READ_FILE)
            .purpose("Read a file from the project")
            .when_to_use("When you need the contents of a file whose path you know")
            .when_not_to_use(
                "When you only need where a pattern occurs; use search_in_file. \
                 Do not use run_command with cat",
            )
            .parameters_for::<PathArgs>()
            .example(
                "read_file(path='Cargo.toml')",
                "Returns the full text content of the file",
            )
            .output_format("Raw file content as text")
            .to_tool_def()
    }

    fn execute(&self, arguments: &str) -> ToolFuture<'_> {
        let arguments = arguments.to_string();
        Box::pin(async move {
            let args: PathArgs = match parse_tool_args(&arguments) {
                Ok(a) => a,
                Err(e) => return e,
            };
            render(self.files.read_file(&args.path).await)
        })
    }
}

impl Tool for SearchInFile {
    fn definition(&self) -> ToolDef {
        ToolSpec::builder(names::SEARCH_IN_FILE)
            .purpose("Search one file for a regular expression")
            .when_to_use("When you need the exact locations of a pattern inside a known file")
            .when_not_to_use(
                "When you need the whole file; use read_file instead. \
                 Do not use run_command with grep",
            )
            .parameters_for::<SearchInFileArgs>()
            .example(
                "search_in_file(path='src/lib.rs', pattern='fn \\\\w+')",
                "Match at 120: fn parse",
            )
            .output_format(
                "One 'Match at <byte offset>: <text>' line per match in document order, \
                 or 'No matches found'",
            )
            .to_tool_def()
    }

    fn execute(&self, arguments: &str) -> ToolFuture<'_> {
        let arguments = arguments.to_string();
        Box::pin(async move {
            let args: SearchInFileArgs = match parse_tool_args(&arguments) {
                Ok(a) => a,
                Err(e) => return e,
            };
            render(self.files.search_in_file(&args.path, &args.pattern).await)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::progress::FnObserver;

    fn files() -> (tempfile::TempDir, FileTools) {
        let dir = tempfile::tempdir().unwrap();
        let root = SandboxRoot::new(dir.path()).unwrap();
        (dir, FileTools::new(root))
    }

    #[tokio::test]
    async fn create_then_read_round_trips() {
        let (_dir, files) = files();
        let created = files.create_file("a.txt", Some("hello")).await.unwrap();
        assert_eq!(created, Outcome::Completed("File created: a.txt".into()));
        let read = files.read_file("a.txt").await.unwrap();
        assert_eq!(read.completed(), Some("hello"));
    }

    #[tokio::test]
    async fn create_file_defaults_to_empty_and_makes_parents() {
        let (dir, files) = files();
        files.create_file("deep/nested/empty.txt", None).await.unwrap();
        let content = std::fs::read_to_string(dir.path().join("deep/nested/empty.txt")).unwrap();
        assert!(content.is_empty());
    }

    #[tokio::test]
    async fn second_create_is_advisory_and_keeps_content() {
        let (_dir, files) = files();
        files.create_file("a.txt", Some("first")).await.unwrap();
        let again = files.create_file("a.txt", Some("second")).await.unwrap();
        assert_eq!(
            again,
            Outcome::Advisory(Advisory::AlreadyExists {
                kind: EntryKind::File,
                path: "a.txt".into()
            })
        );
        assert_eq!(again.to_string(), "File already exists: a.txt");
        let read = files.read_file("a.txt").await.unwrap();
        assert_eq!(read.completed(), Some("first"));
    }

    #[tokio::test]
    async fn create_directory_and_advisory_when_present() {
        let (dir, files) = files();
        let out = files.create_directory("x/y").await.unwrap();
        assert_eq!(out.to_string(), "Directory created: x/y");
        assert!(dir.path().join("x/y").is_dir());
        let again = files.create_directory("x/y").await.unwrap();
        assert_eq!(again.to_string(), "Directory already exists: x/y");
    }

    #[tokio::test]
    async fn delete_missing_file_is_advisory() {
        let (_dir, files) = files();
        let out = files.delete_file("ghost.txt").await.unwrap();
        assert!(out.is_advisory());
        assert_eq!(out.to_string(), "File not found: ghost.txt");
    }

    #[tokio::test]
    async fn delete_file_on_directory_is_advisory() {
        let (dir, files) = files();
        std::fs::create_dir(dir.path().join("d")).unwrap();
        let out = files.delete_file("d").await.unwrap();
        assert_eq!(out.to_string(), "Not a file: d");
        assert!(dir.path().join("d").exists());
    }

    #[tokio::test]
    async fn delete_file_removes_it() {
        let (dir, files) = files();
        std::fs::write(dir.path().join("f.txt"), "x").unwrap();
        let out = files.delete_file("f.txt").await.unwrap();
        assert_eq!(out.to_string(), "File deleted: f.txt");
        assert!(!dir.path().join("f.txt").exists());
    }

    #[tokio::test]
    async fn delete_empty_directory_succeeds() {
        let (dir, files) = files();
        std::fs::create_dir(dir.path().join("empty")).unwrap();
        let out = files.delete_directory("empty").await.unwrap();
        assert_eq!(out.to_string(), "Directory deleted: empty");
        assert!(!dir.path().join("empty").exists());
    }

    #[tokio::test]
    async fn delete_non_empty_directory_is_io_error() {
        let (dir, files) = files();
        std::fs::create_dir(dir.path().join("full")).unwrap();
        std::fs::write(dir.path().join("full/f.txt"), "x").unwrap();
        let err = files.delete_directory("full").await.unwrap_err();
        assert!(matches!(err, ToolError::Io { .. }), "got {err:?}");
        assert!(dir.path().join("full/f.txt").exists());
    }

    #[tokio::test]
    async fn delete_directory_advisories() {
        let (dir, files) = files();
        std::fs::write(dir.path().join("f.txt"), "x").unwrap();
        assert_eq!(
            files.delete_directory("nope").await.unwrap().to_string(),
            "Directory not found: nope"
        );
        assert_eq!(
            files.delete_directory("f.txt").await.unwrap().to_string(),
            "Not a directory: f.txt"
        );
    }

    #[tokio::test]
    async fn list_directory_sorted_with_dir_suffix() {
        let (dir, files) = files();
        std::fs::write(dir.path().join("b.txt"), "").unwrap();
        std::fs::write(dir.path().join("a.txt"), "").unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        let out = files.list_directory(".").await.unwrap();
        assert_eq!(out.completed(), Some("a.txt\nb.txt\nsrc/"));
    }

    #[tokio::test]
    async fn list_directory_advisories() {
        let (dir, files) = files();
        std::fs::write(dir.path().join("f.txt"), "").unwrap();
        assert!(files.list_directory("missing").await.unwrap().is_advisory());
        assert_eq!(
            files.list_directory("f.txt").await.unwrap().to_string(),
            "Not a directory: f.txt"
        );
    }

    #[tokio::test]
    async fn list_empty_directory_is_empty_text() {
        let (dir, files) = files();
        std::fs::create_dir(dir.path().join("empty")).unwrap();
        let out = files.list_directory("empty").await.unwrap();
        assert_eq!(out, Outcome::Completed(String::new()));
    }

    #[tokio::test]
    async fn paths_below_a_file_are_not_found() {
        let (dir, files) = files();
        std::fs::write(dir.path().join("a.txt"), "x").unwrap();
        assert_eq!(
            files.delete_file("a.txt/ghost").await.unwrap().to_string(),
            "File not found: a.txt/ghost"
        );
        assert_eq!(
            files.delete_directory("a.txt/ghost").await.unwrap().to_string(),
            "Directory not found: a.txt/ghost"
        );
        assert_eq!(
            files.list_directory("a.txt/ghost").await.unwrap().to_string(),
            "Directory not found: a.txt/ghost"
        );
        assert!(dir.path().join("a.txt").is_file());
    }

    #[tokio::test]
    async fn read_missing_file_is_io_error() {
        let (_dir, files) = files();
        let err = files.read_file("missing.txt").await.unwrap_err();
        assert!(matches!(err, ToolError::Io { .. }));
    }

    #[tokio::test]
    async fn read_replaces_invalid_utf8() {
        let (dir, files) = files();
        std::fs::write(dir.path().join("bin"), [b'o', b'k', 0xff]).unwrap();
        let out = files.read_file("bin").await.unwrap();
        assert_eq!(out.completed(), Some("ok\u{fffd}"));
    }

    #[tokio::test]
    async fn search_reports_byte_offsets_in_order() {
        let (dir, files) = files();
        std::fs::write(dir.path().join("s.txt"), "xx abb yy ab").unwrap();
        let out = files.search_in_file("s.txt", "ab+").await.unwrap();
        assert_eq!(out.completed(), Some("Match at 3: abb\nMatch at 10: ab"));
    }

    #[tokio::test]
    async fn search_without_matches() {
        let (dir, files) = files();
        std::fs::write(dir.path().join("s.txt"), "nothing here").unwrap();
        let out = files.search_in_file("s.txt", "zzz").await.unwrap();
        assert_eq!(out.completed(), Some(NO_MATCHES));
    }

    #[tokio::test]
    async fn search_with_bad_pattern_is_regex_error() {
        let (dir, files) = files();
        std::fs::write(dir.path().join("s.txt"), "x").unwrap();
        let err = files.search_in_file("s.txt", "(oops").await.unwrap_err();
        assert!(matches!(err, ToolError::Regex(_)));
    }

    #[tokio::test]
    async fn escaping_paths_fail_without_touching_disk() {
        let (dir, files) = files();
        let err = files.create_file("../escape.txt", Some("x")).await.unwrap_err();
        assert!(matches!(err, ToolError::PathEscape { .. }));
        assert!(!dir.path().parent().unwrap().join("escape.txt").exists());
    }

    #[tokio::test]
    async fn emits_started_then_finished() {
        let (_dir, files) = files();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        files.progress().subscribe(FnObserver::new(move |e| {
            sink.lock().unwrap().push(e.to_string());
        }));

        files.create_file("a.txt", Some("hi")).await.unwrap();
        files.read_file("a.txt").await.unwrap();
        files.read_file("../outside").await.unwrap_err();

        let events = events.lock().unwrap();
        assert_eq!(events[0], "Creating file: a.txt");
        assert_eq!(events[1], "File created: a.txt");
        assert_eq!(events[2], "Reading file: a.txt");
        assert_eq!(events[3], "Read 2 bytes from a.txt");
        assert_eq!(events[4], "Reading file: ../outside");
        assert!(events[5].starts_with("read_file failed for ../outside:"));
        assert_eq!(events.len(), 6);
    }

    #[tokio::test]
    async fn tool_adapters_render_outcomes_and_errors() {
        let (_dir, files) = files();
        let create = CreateFile::new(files.clone());
        assert_eq!(
            create.execute(r#"{"path": "n.txt", "content": "x"}"#).await,
            "File created: n.txt"
        );
        let read = ReadFile::new(files.clone());
        assert_eq!(read.execute(r#"{"path": "n.txt"}"#).await, "x");
        let err = read.execute(r#"{"path": "../../etc/passwd"}"#).await;
        assert!(err.starts_with("Error: path '../../etc/passwd' escapes"), "{err}");
        let bad = read.execute("{}").await;
        assert!(bad.starts_with("Error: invalid tool arguments"));
    }

    #[test]
    fn definitions_use_canonical_names() {
        let (_dir, files) = files();
        assert_eq!(SearchInFile::new(files.clone()).name(), names::SEARCH_IN_FILE);
        assert!(DeleteFile::new(files.clone()).is_mutation());
        assert!(!ListDirectory::new(files).is_mutation());
    }
}
