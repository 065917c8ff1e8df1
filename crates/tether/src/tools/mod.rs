//! Operations the model can invoke, and the dispatch surface that exposes
//! them.
//!
//! # Submodules
//!
//! - [`core`]: [`Tool`] trait and [`ToolSet`] dispatch (validation,
//!   timeouts, truncation).
//! - [`fs`]: [`FileTools`]: the seven sandboxed filesystem operations and
//!   their `Tool` adapters.
//! - [`command`]: [`CommandRunner`] and the `run_command` tool.
//! - [`spec`]: [`ToolSpec`](spec::ToolSpec) builder for descriptions with
//!   `when_to_use` / `when_not_to_use` guidance.
//! - [`names`]: canonical tool name constants.

pub mod command;
pub mod core;
pub mod fs;
pub mod names;
pub mod spec;

pub use self::command::{CommandResult, CommandRunner, Platform, RunCommand, shell_for};
pub use self::core::{
    DEFAULT_MAX_RESULT_BYTES, Tool, ToolFuture, ToolSet, parse_tool_args, truncate_result,
    validate_tool_arguments,
};
pub use self::fs::{Advisory, EntryKind, FileOperation, FileTools, Outcome};
