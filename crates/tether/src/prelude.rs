//! Convenience re-exports for common `tether` types.
//!
//! ```ignore
//! use tether::prelude::*;
//! ```
//!
//! Ring-buffer internals, store errors, and the tool adapter structs are
//! left out; import those from their modules when needed.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::{Message, MessageRole, ToolDef, ToolError, json_schema_for};

// ── Configuration ───────────────────────────────────────────────────
pub use crate::config::WorkspaceConfig;

// ── Sandbox and tools ───────────────────────────────────────────────
pub use crate::sandbox::SandboxRoot;
pub use crate::tools::spec::ToolSpec;
pub use crate::tools::{
    Advisory, CommandResult, CommandRunner, FileOperation, FileTools, Outcome, Platform, Tool,
    ToolFuture, ToolSet, parse_tool_args, shell_for,
};

// ── Progress and console ────────────────────────────────────────────
pub use crate::console::{ConsoleRegistry, ConsoleSink};
pub use crate::progress::{
    FnObserver, LoggingObserver, ObserverId, ProgressChannel, ProgressEvent, ProgressObserver,
};

// ── Responses and usage ─────────────────────────────────────────────
pub use crate::response::{BlockKind, ParsedResponse, ResponseBlock, parse as parse_response};
pub use crate::usage::{
    Clock, Direction, Granularity, ManualClock, SystemClock, TokenCounter, TokenUsageMeter,
    UsageStore,
};
