//! Sandboxed execution layer for LLM coding agents.
//!
//! `tether` is the part of a coding assistant that actually touches the
//! project: it turns model-issued tool calls into filesystem mutations and
//! build/test invocations, confines every path to a single project root,
//! splits raw model output into prose and fenced code, and meters token
//! usage over time.
//!
//! # Getting started
//!
//! ```ignore
//! use tether::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), ToolError> {
//!     let config = WorkspaceConfig::new("/path/to/project");
//!     let tools = config.build_tool_set()?;
//!
//!     // Dispatch by name, the way an LLM tool-calling loop does.
//!     let result = tools
//!         .execute("create_file", r#"{"path": "notes/todo.md", "content": "- ship it"}"#)
//!         .await;
//!     println!("{result}");
//!
//!     // Or call the typed API directly.
//!     let files = FileTools::new(config.sandbox()?);
//!     match files.read_file("notes/todo.md").await? {
//!         Outcome::Completed(text) => println!("{text}"),
//!         Outcome::Advisory(note) => println!("{note}"),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Where to find things
//!
//! - **Confine paths to the project:** [`SandboxRoot`](sandbox::SandboxRoot).
//! - **Create, delete, read, list, search:** [`FileTools`](tools::fs::FileTools).
//! - **Run builds and tests:** [`CommandRunner`](tools::command::CommandRunner)
//!   and the per-root [`ConsoleRegistry`](console::ConsoleRegistry).
//! - **Expose operations to the model:** the [`Tool`](tools::core::Tool)
//!   trait and [`ToolSet`](tools::core::ToolSet) dispatch.
//! - **Observe progress:** [`ProgressChannel`](progress::ProgressChannel).
//! - **Split model output into blocks:** [`response::parse`].
//! - **Meter token usage:** [`TokenUsageMeter`](usage::TokenUsageMeter).
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`sandbox`] | Path confinement resolver |
//! | [`tools`] | Filesystem tool set, subprocess runner, `Tool`/`ToolSet` dispatch |
//! | [`progress`] | Progress events and observer registry |
//! | [`console`] | Named per-root output sinks for subprocess transcripts |
//! | [`response`] | Response segmenter (prose vs. fenced code) |
//! | [`usage`] | Token counting and time-bucketed usage tables |
//! | [`config`] | Workspace configuration and tool set assembly |

pub mod config;
pub mod console;
pub mod error;
pub mod prelude;
pub mod progress;
pub mod response;
pub mod sandbox;
pub mod tools;
pub mod usage;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub use error::ToolError;

// Re-export schemars for downstream crates.
pub use schemars;

// ── Schema generation ──────────────────────────────────────────────

/// Generate a JSON Schema `serde_json::Value` from a type that implements
/// `schemars::JsonSchema`. This is the bridge between the typed argument
/// structs and the `serde_json::Value` that function-calling APIs expect.
///
/// # Example
///
/// ```
/// use tether::json_schema_for;
/// use schemars::JsonSchema;
/// use serde::Deserialize;
///
/// #[derive(Deserialize, JsonSchema)]
/// struct SearchArgs {
///     path: String,
///     pattern: String,
/// }
///
/// let schema = json_schema_for::<SearchArgs>();
/// assert_eq!(schema["type"], "object");
/// assert!(schema["required"].as_array().unwrap().contains(&"pattern".into()));
/// ```
pub fn json_schema_for<T: JsonSchema>() -> serde_json::Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema)
        .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}))
}

// ── Message types ──────────────────────────────────────────────────

/// Role of a message in the conversation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::Tool => write!(f, "tool"),
        }
    }
}

/// A message in an exchange with the model.
///
/// Only the parts the usage meter accounts for are modeled; transport
/// concerns (tool call ids, streaming deltas) belong to the chat client.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub role: MessageRole,
    #[serde(default)]
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Tool,
            content: content.into(),
        }
    }
}

// ── Tool types ─────────────────────────────────────────────────────

/// The type of a tool definition. Currently always `Function`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum ToolType {
    #[serde(rename = "function")]
    Function,
}

/// Tool definition handed to the model (OpenAI function-calling format).
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ToolDef {
    #[serde(rename = "type")]
    pub tool_type: ToolType,
    pub function: FunctionDef,
}

impl ToolDef {
    /// Create a function-calling tool definition.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            tool_type: ToolType::Function,
            function: FunctionDef {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct FunctionDef {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}
