//! Workspace configuration and assembly of the tool set and usage meter.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::ToolError;
use crate::console::ConsoleRegistry;
use crate::progress::ProgressChannel;
use crate::sandbox::SandboxRoot;
use crate::tools::command::CommandRunner;
use crate::tools::core::{DEFAULT_MAX_RESULT_BYTES, ToolSet};
use crate::tools::fs::FileTools;
use crate::usage::counter::EstimatingTokenCounter;
use crate::usage::meter::{Granularity, TokenUsageMeter};
use crate::usage::store::{JsonFileUsageStore, UsageStoreError};

/// Default per-call tool timeout.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(600);

/// Everything needed to build the tools for one project.
///
/// # Example
///
/// ```ignore
/// let config = WorkspaceConfig::new("/path/to/project")
///     .with_tool_timeout(Some(Duration::from_secs(120)))
///     .with_granularity(Granularity::Hour);
/// let tools = config.build_tool_set()?;
/// ```
#[derive(Debug, Clone)]
pub struct WorkspaceConfig {
    /// Project root; every path is confined to it.
    pub root: PathBuf,
    /// Tool output beyond this many bytes is truncated.
    pub max_result_bytes: usize,
    /// `None` disables the timeout.
    pub tool_timeout: Option<Duration>,
    /// Validate tool arguments against their JSON Schema before dispatch.
    pub validate_args: bool,
    pub granularity: Granularity,
    /// Count tokens with the character-ratio estimate instead of BPE.
    pub estimate_tokens: bool,
    /// Where usage tables are persisted. `None` keeps them in memory only.
    pub usage_store: Option<PathBuf>,
    /// Shared by every tool built from this config.
    pub progress: ProgressChannel,
    /// Per-root console sinks for command output.
    pub consoles: Arc<ConsoleRegistry>,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self::new(".")
    }
}

impl WorkspaceConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_result_bytes: DEFAULT_MAX_RESULT_BYTES,
            tool_timeout: Some(DEFAULT_TOOL_TIMEOUT),
            validate_args: true,
            granularity: Granularity::default(),
            estimate_tokens: false,
            usage_store: None,
            progress: ProgressChannel::new(),
            consoles: Arc::new(ConsoleRegistry::new()),
        }
    }

    pub fn with_max_result_bytes(mut self, max: usize) -> Self {
        self.max_result_bytes = max;
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn with_arg_validation(mut self, enabled: bool) -> Self {
        self.validate_args = enabled;
        self
    }

    pub fn with_granularity(mut self, granularity: Granularity) -> Self {
        self.granularity = granularity;
        self
    }

    pub fn with_token_estimate(mut self, estimate: bool) -> Self {
        self.estimate_tokens = estimate;
        self
    }

    pub fn with_usage_store(mut self, path: impl AsRef<Path>) -> Self {
        self.usage_store = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_progress(mut self, progress: ProgressChannel) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_consoles(mut self, consoles: Arc<ConsoleRegistry>) -> Self {
        self.consoles = consoles;
        self
    }

    /// Canonicalize the root.
    pub fn sandbox(&self) -> Result<SandboxRoot, ToolError> {
        SandboxRoot::new(&self.root)
    }

    pub fn file_tools(&self) -> Result<FileTools, ToolError> {
        Ok(FileTools::new(self.sandbox()?).with_progress(self.progress.clone()))
    }

    pub fn command_runner(&self) -> Result<CommandRunner, ToolError> {
        Ok(CommandRunner::new(self.sandbox()?, self.consoles.clone())
            .with_progress(self.progress.clone()))
    }

    /// All eight workspace tools with this config's dispatch settings.
    pub fn build_tool_set(&self) -> Result<ToolSet, ToolError> {
        Ok(ToolSet::new()
            .with_max_result_bytes(self.max_result_bytes)
            .with_arg_validation(self.validate_args)
            .with_default_timeout(self.tool_timeout)
            .with_workspace_tools(self.file_tools()?, self.command_runner()?))
    }

    /// A meter at this config's granularity, loaded from the usage store if
    /// one is configured.
    pub fn build_meter(&self) -> Result<TokenUsageMeter, UsageStoreError> {
        let meter = if self.estimate_tokens {
            TokenUsageMeter::from_counter(EstimatingTokenCounter::default())
        } else {
            TokenUsageMeter::new()
        }
        .with_granularity(self.granularity);
        if let Some(store) = self.json_store() {
            meter.load(&store)?;
        }
        Ok(meter)
    }

    /// The configured JSON usage store, if any.
    pub fn json_store(&self) -> Option<JsonFileUsageStore> {
        self.usage_store.as_ref().map(JsonFileUsageStore::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::names;
    use crate::usage::meter::Direction;

    #[test]
    fn defaults() {
        let config = WorkspaceConfig::default();
        assert_eq!(config.max_result_bytes, DEFAULT_MAX_RESULT_BYTES);
        assert_eq!(config.tool_timeout, Some(DEFAULT_TOOL_TIMEOUT));
        assert!(config.validate_args);
        assert_eq!(config.granularity, Granularity::Minute);
        assert!(!config.estimate_tokens);
    }

    #[test]
    fn estimate_meter_uses_char_ratio() {
        let meter = WorkspaceConfig::default()
            .with_token_estimate(true)
            .build_meter()
            .unwrap();
        // 7 chars at 3.5 chars per token.
        assert_eq!(meter.record_output("abcdefg"), 2);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn runner_prints_to_configured_consoles() {
        let dir = tempfile::tempdir().unwrap();
        let consoles = Arc::new(ConsoleRegistry::new().with_echo(true));
        let config = WorkspaceConfig::new(dir.path()).with_consoles(consoles.clone());
        let runner = config.command_runner().unwrap();
        runner.run("echo hi", "Echo").await.unwrap();

        let sink = consoles.sink_for(runner.root());
        assert!(sink.echoes());
        let texts: Vec<_> = sink.lines().into_iter().map(|l| l.text).collect();
        assert_eq!(texts, ["hi", "Echo successful"]);
    }

    #[test]
    fn tool_set_registers_all_tools() {
        let dir = tempfile::tempdir().unwrap();
        let tools = WorkspaceConfig::new(dir.path()).build_tool_set().unwrap();
        assert_eq!(tools.len(), names::ALL.len());
        for name in names::ALL {
            assert!(tools.names().contains(name), "missing {name}");
        }
    }

    #[test]
    fn missing_root_fails_to_build() {
        let config = WorkspaceConfig::new("/definitely/not/a/real/dir");
        assert!(matches!(
            config.build_tool_set().unwrap_err(),
            ToolError::Io { .. }
        ));
    }

    #[test]
    fn meter_loads_from_store() {
        let dir = tempfile::tempdir().unwrap();
        let config = WorkspaceConfig::new(dir.path())
            .with_usage_store(dir.path().join("usage.json"))
            .with_granularity(Granularity::Day);

        let first = config.build_meter().unwrap();
        first.record(Direction::Output, 42);
        first.persist(&config.json_store().unwrap()).unwrap();

        let second = config.build_meter().unwrap();
        assert_eq!(second.granularity(), Granularity::Day);
        assert_eq!(second.usage_over_last_n(Direction::Output, 1), 42);
    }
}
