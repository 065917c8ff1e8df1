//! Tool abstraction for LLM function-calling.
//!
//! The [`Tool`] trait is the contract a tool-calling layer binds against:
//! a static definition (name, description, JSON schema) and an async
//! `execute` that takes raw JSON arguments and returns a string. Tools are
//! collected into a [`ToolSet`] which handles dispatch by name, optional
//! argument validation, timeouts, and result truncation.
//!
//! Typed failures ([`ToolError`](crate::ToolError)) only become strings at
//! this boundary, rendered as `"Error: ..."` so the model can read them.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::{debug, info, trace};

use crate::ToolDef;
use crate::tools::command::CommandRunner;
use crate::tools::fs::FileTools;

/// Maximum size (in bytes) for tool output before truncation.
pub const DEFAULT_MAX_RESULT_BYTES: usize = 30_000;

/// Boxed future returned by [`Tool::execute`].
pub type ToolFuture<'a> = Pin<Box<dyn Future<Output = String> + Send + 'a>>;

// ── Tool trait ─────────────────────────────────────────────────────

/// A single-purpose operation the model can invoke by name.
///
/// # Example
///
/// ```ignore
/// struct Echo;
///
/// impl Tool for Echo {
///     fn definition(&self) -> ToolDef { /* ... */ }
///
///     fn execute(&self, arguments: &str) -> ToolFuture<'_> {
///         let arguments = arguments.to_string();
///         Box::pin(async move { arguments })
///     }
/// }
/// ```
pub trait Tool: Send + Sync {
    /// The definition handed to the model.
    fn definition(&self) -> ToolDef;

    /// Execute with the raw JSON arguments string.
    ///
    /// Failures are returned as `"Error: ..."` strings rather than
    /// panicking; the orchestrator passes the string back to the model
    /// either way.
    fn execute(&self, arguments: &str) -> ToolFuture<'_>;

    /// The tool's name (delegates to the definition).
    fn name(&self) -> String {
        self.definition().function.name.clone()
    }

    /// Whether this tool mutates the project. Defaults to `false`.
    fn is_mutation(&self) -> bool {
        false
    }
}

// ── ToolSet ────────────────────────────────────────────────────────

/// A collection of tools dispatched by name.
///
/// # Example
///
/// ```ignore
/// let tools = ToolSet::new()
///     .with_max_result_bytes(15_000)
///     .with_arg_validation(true)
///     .with_workspace_tools(files, runner);
///
/// let defs = tools.definitions();
/// let out = tools.execute("read_file", r#"{"path": "Cargo.toml"}"#).await;
/// ```
pub struct ToolSet {
    tools: BTreeMap<String, Box<dyn Tool>>,
    max_result_bytes: usize,
    /// Whether to validate tool arguments against JSON Schema before execution.
    validate_args: bool,
    /// Timeout for tool execution. `None` disables timeouts.
    default_timeout: Option<Duration>,
}

impl fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolSet")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .field("max_result_bytes", &self.max_result_bytes)
            .field("validate_args", &self.validate_args)
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}

impl ToolSet {
    /// Create an empty tool set.
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
            max_result_bytes: DEFAULT_MAX_RESULT_BYTES,
            validate_args: false,
            default_timeout: None,
        }
    }

    /// Set the maximum result size in bytes before truncation.
    pub fn with_max_result_bytes(mut self, max: usize) -> Self {
        self.max_result_bytes = max;
        self
    }

    /// Enable JSON Schema argument validation before tool execution.
    pub fn with_arg_validation(mut self, enabled: bool) -> Self {
        self.validate_args = enabled;
        self
    }

    /// Set a timeout for tool execution. Pass `None` to disable.
    ///
    /// A timed-out `run_command` drops its future, which kills the child.
    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name(), Box::new(tool));
    }

    /// Register a tool (builder pattern).
    pub fn with(mut self, tool: impl Tool + 'static) -> Self {
        self.register(tool);
        self
    }

    /// Conditionally register a tool (builder pattern).
    pub fn with_if(self, condition: bool, tool: impl Tool + 'static) -> Self {
        if condition { self.with(tool) } else { self }
    }

    /// Register the seven filesystem tools and `run_command`.
    pub fn with_workspace_tools(self, files: FileTools, runner: CommandRunner) -> Self {
        use crate::tools::command::RunCommand;
        use crate::tools::fs::{
            CreateDirectory, CreateFile, DeleteDirectory, DeleteFile, ListDirectory, ReadFile,
            SearchInFile,
        };
        self.with(CreateDirectory::new(files.clone()))
            .with(CreateFile::new(files.clone()))
            .with(DeleteDirectory::new(files.clone()))
            .with(DeleteFile::new(files.clone()))
            .with(ListDirectory::new(files.clone()))
            .with(ReadFile::new(files.clone()))
            .with(SearchInFile::new(files))
            .with(RunCommand::new(runner))
    }

    /// All tool definitions, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDef> {
        self.tools.values().map(|t| t.definition()).collect()
    }

    /// Registered tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Whether the named tool mutates the project.
    pub fn is_mutation_tool(&self, name: &str) -> bool {
        self.tools.get(name).is_some_and(|t| t.is_mutation())
    }

    /// Execute a tool call by name.
    ///
    /// Unknown names, invalid arguments, and timeouts come back as
    /// `"Error: ..."` strings. The result is truncated to
    /// `max_result_bytes`.
    pub async fn execute(&self, name: &str, arguments: &str) -> String {
        let tool = match self.tools.get(name) {
            Some(t) => t,
            None => return format!("Error: unknown tool '{name}'"),
        };

        if self.validate_args
            && let Some(error) = validate_tool_arguments(tool.as_ref(), arguments)
        {
            return error;
        }

        log_tool_call(name, arguments);
        let start = std::time::Instant::now();

        let result = if let Some(timeout_duration) = self.default_timeout {
            match tokio::time::timeout(timeout_duration, tool.execute(arguments)).await {
                Ok(r) => r,
                Err(_) => {
                    info!(
                        "Tool {name} timed out after {:.1}s",
                        timeout_duration.as_secs_f64()
                    );
                    format!(
                        "Error: tool '{name}' timed out after {:.0} seconds",
                        timeout_duration.as_secs_f64(),
                    )
                }
            }
        } else {
            tool.execute(arguments).await
        };

        debug!(
            "Tool {name} completed in {:.0}ms ({} bytes)",
            start.elapsed().as_secs_f64() * 1000.0,
            result.len()
        );
        trace!(
            "Tool {name} result preview: {}",
            result.chars().take(300).collect::<String>()
        );

        truncate_result(result, self.max_result_bytes)
    }
}

impl Default for ToolSet {
    fn default() -> Self {
        Self::new()
    }
}

// ── Helpers ────────────────────────────────────────────────────────

/// Validate tool arguments against the tool's declared JSON Schema.
///
/// Returns `None` if valid, or `Some(error_string)` formatted for the model
/// to self-correct.
pub fn validate_tool_arguments(tool: &dyn Tool, arguments: &str) -> Option<String> {
    let args_value: serde_json::Value = match serde_json::from_str(arguments) {
        Ok(v) => v,
        Err(e) => {
            return Some(format!(
                "Error: invalid JSON arguments for tool '{}': {e}",
                tool.name()
            ));
        }
    };

    let schema = tool.definition().function.parameters;
    let validator = match jsonschema::validator_for(&schema) {
        Ok(v) => v,
        Err(_) => return None, // If the schema itself is invalid, skip validation.
    };

    let errors: Vec<String> = validator
        .iter_errors(&args_value)
        .map(|e| format!("  - {}: {e}", e.instance_path()))
        .collect();

    if errors.is_empty() {
        None
    } else {
        Some(format!(
            "Error: argument validation failed for tool '{}':\n{}",
            tool.name(),
            errors.join("\n")
        ))
    }
}

/// Log a tool call at INFO level with a truncated preview of arguments.
pub fn log_tool_call(name: &str, arguments: &str) {
    let args_preview: String = arguments.chars().take(120).collect();
    info!(
        "[tool] {}({args_preview}{})",
        name,
        if arguments.chars().count() > 120 { "..." } else { "" }
    );
    trace!("[tool] {name} arguments: {arguments}");
}

/// Truncate a string to at most `max` bytes (on a char boundary),
/// appending a notice if trimmed.
pub fn truncate_result(s: String, max: usize) -> String {
    if s.len() <= max {
        return s;
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    #[allow(clippy::string_slice)] // cut is on a char boundary
    let kept = &s[..cut];
    format!("{kept}...\n[truncated: {} bytes total]", s.len())
}

/// Parse raw JSON arguments into a typed struct.
///
/// The error string is suitable for returning directly from
/// [`Tool::execute`].
pub fn parse_tool_args<T: serde::de::DeserializeOwned>(arguments: &str) -> Result<T, String> {
    serde_json::from_str(arguments).map_err(|e| {
        format!(
            "Error: invalid tool arguments: {e}. \
             Please provide valid JSON matching the tool's parameter schema."
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    impl Tool for EchoTool {
        fn definition(&self) -> ToolDef {
            ToolDef::new(
                "echo",
                "Echo the input",
                serde_json::json!({
                    "type": "object",
                    "properties": { "text": { "type": "string" } },
                    "required": ["text"]
                }),
            )
        }

        fn execute(&self, arguments: &str) -> ToolFuture<'_> {
            let result = match serde_json::from_str::<serde_json::Value>(arguments) {
                Ok(v) => v["text"].as_str().unwrap_or("Error: no text").to_string(),
                Err(_) => "Error: no text".to_string(),
            };
            Box::pin(async move { result })
        }
    }

    struct SlowTool;

    impl Tool for SlowTool {
        fn definition(&self) -> ToolDef {
            ToolDef::new("slow", "Sleeps", serde_json::json!({"type": "object"}))
        }

        fn execute(&self, _arguments: &str) -> ToolFuture<'_> {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "done".to_string()
            })
        }
    }

    #[test]
    fn tool_name_from_definition() {
        assert_eq!(EchoTool.name(), "echo");
    }

    #[tokio::test]
    async fn execute_known_tool() {
        let set = ToolSet::new().with(EchoTool);
        assert_eq!(set.execute("echo", r#"{"text": "hello"}"#).await, "hello");
    }

    #[tokio::test]
    async fn execute_unknown_tool() {
        let set = ToolSet::new().with(EchoTool);
        let result = set.execute("nonexistent", "{}").await;
        assert_eq!(result, "Error: unknown tool 'nonexistent'");
    }

    #[tokio::test]
    async fn validation_rejects_missing_required_field() {
        let set = ToolSet::new().with_arg_validation(true).with(EchoTool);
        let result = set.execute("echo", "{}").await;
        assert!(result.starts_with("Error: argument validation failed"), "{result}");
    }

    #[tokio::test]
    async fn validation_rejects_malformed_json() {
        let set = ToolSet::new().with_arg_validation(true).with(EchoTool);
        let result = set.execute("echo", "not json").await;
        assert!(result.starts_with("Error: invalid JSON arguments"), "{result}");
    }

    #[tokio::test]
    async fn timeout_reports_error() {
        let set = ToolSet::new()
            .with_default_timeout(Some(Duration::from_millis(20)))
            .with(SlowTool);
        let result = set.execute("slow", "{}").await;
        assert!(result.contains("timed out"), "{result}");
    }

    #[tokio::test]
    async fn truncates_long_results() {
        let set = ToolSet::new().with_max_result_bytes(10).with(EchoTool);
        let arguments = serde_json::json!({ "text": "a".repeat(50) }).to_string();
        let result = set.execute("echo", &arguments).await;
        assert!(result.contains("[truncated: 50 bytes total]"));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let s = "é".repeat(10); // 20 bytes
        let result = truncate_result(s, 5);
        assert!(result.starts_with("éé..."));
    }

    #[test]
    fn truncate_short_unchanged() {
        assert_eq!(truncate_result("hello".into(), 100), "hello");
    }

    #[test]
    fn with_if_false_skips_tool() {
        let set = ToolSet::new().with_if(false, EchoTool);
        assert!(set.is_empty());
    }

    #[test]
    fn parse_tool_args_reports_error() {
        #[derive(serde::Deserialize, Debug)]
        #[allow(dead_code)]
        struct Args {
            path: String,
        }
        let err = parse_tool_args::<Args>("{}").unwrap_err();
        assert!(err.starts_with("Error: invalid tool arguments"));
    }
}
