//! Subprocess execution in the sandbox root.
//!
//! [`CommandRunner::run`] launches a shell command with the root as working
//! directory, merges stdout and stderr into one line stream in arrival
//! order, and returns the transcript with a pass/fail classification. Each
//! line is also printed to the root's [`ConsoleSink`] and emitted as a
//! [`ProgressEvent::OutputLine`].

use std::io;
use std::process::Stdio;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::ToolDef;
use crate::ToolError;
use crate::console::{ConsoleRegistry, ConsoleSink};
use crate::progress::{ProgressChannel, ProgressEvent};
use crate::sandbox::SandboxRoot;
use crate::tools::core::{Tool, ToolFuture, parse_tool_args};
use crate::tools::names;
use crate::tools::spec::ToolSpec;

/// Label used when the caller does not supply one.
pub const DEFAULT_LABEL: &str = "Command";

/// Host family, which decides the shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    Unix,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::Unix
        }
    }
}

/// Shell program and its "run this string" flag.
pub fn shell_for(platform: Platform) -> (&'static str, &'static str) {
    match platform {
        Platform::Windows => ("cmd", "/c"),
        Platform::Unix => ("sh", "-c"),
    }
}

/// Transcript and exit status of one finished command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandResult {
    /// Merged output lines followed by one summary line.
    pub transcript: Vec<String>,
    /// Process exit code; `-1` when killed by a signal.
    pub exit_code: i32,
    pub succeeded: bool,
}

impl CommandResult {
    /// The transcript joined with newlines.
    pub fn text(&self) -> String {
        self.transcript.join("\n")
    }
}

/// Runs shell commands in a sandbox root.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    root: SandboxRoot,
    consoles: Arc<ConsoleRegistry>,
    progress: ProgressChannel,
    shell: (&'static str, &'static str),
}

impl CommandRunner {
    pub fn new(root: SandboxRoot, consoles: Arc<ConsoleRegistry>) -> Self {
        Self {
            root,
            consoles,
            progress: ProgressChannel::new(),
            shell: shell_for(Platform::current()),
        }
    }

    pub fn with_progress(mut self, progress: ProgressChannel) -> Self {
        self.progress = progress;
        self
    }

    pub fn root(&self) -> &SandboxRoot {
        &self.root
    }

    /// Run `command` to completion.
    ///
    /// The final transcript line is `"<label> successful"` on exit 0 and
    /// `"<label> failed with exit code <N>"` otherwise.
    pub async fn run(&self, command: &str, label: &str) -> Result<CommandResult, ToolError> {
        let (shell, flag) = self.shell;
        debug!("[{label}] {shell} {flag} {command} (in {})", self.root);

        let mut child = Command::new(shell)
            .arg(flag)
            .arg(command)
            .current_dir(self.root.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ToolError::ProcessLaunch {
                command: command.to_string(),
                source,
            })?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, tx.clone()));
        }
        drop(tx);

        let sink = self.consoles.sink_for(&self.root);
        let mut transcript = Vec::new();

        while let Some(line) = rx.recv().await {
            match line {
                Ok(line) => self.record(&sink, label, &mut transcript, line),
                Err(source) => {
                    warn!("[{label}] output stream failed: {source}");
                    return Err(ToolError::ProcessIo {
                        command: command.to_string(),
                        source,
                        transcript,
                    });
                }
            }
        }

        let status = match child.wait().await {
            Ok(status) => status,
            Err(source) => {
                return Err(ToolError::ProcessIo {
                    command: command.to_string(),
                    source,
                    transcript,
                });
            }
        };

        let exit_code = status.code().unwrap_or(-1);
        let succeeded = exit_code == 0;
        let summary = if succeeded {
            info!("[{label}] '{command}' succeeded");
            format!("{label} successful")
        } else {
            warn!("[{label}] '{command}' exited with {exit_code}");
            format!("{label} failed with exit code {exit_code}")
        };
        self.record(&sink, label, &mut transcript, summary);

        Ok(CommandResult {
            transcript,
            exit_code,
            succeeded,
        })
    }

    fn record(&self, sink: &ConsoleSink, label: &str, transcript: &mut Vec<String>, line: String) {
        sink.print(&line);
        self.progress.emit(ProgressEvent::OutputLine { label, line: &line });
        transcript.push(line);
    }
}

/// Send each line of `reader` (lossily decoded, newline stripped) until EOF
/// or the first read error.
async fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<io::Result<String>>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                while matches!(buf.last(), Some(b'\n' | b'\r')) {
                    buf.pop();
                }
                let line = String::from_utf8_lossy(&buf).into_owned();
                if tx.send(Ok(line)).is_err() {
                    break;
                }
            }
            Err(e) => {
                let _ = tx.send(Err(e));
                break;
            }
        }
    }
}

// ── RunCommand tool ────────────────────────────────────────────────

/// Typed arguments for `run_command`.
#[derive(Deserialize, JsonSchema)]
pub struct RunCommandArgs {
    /// Shell command to run in the project root (e.g. 'cargo test').
    pub command: String,
    /// Short label for status lines (e.g. 'Build', 'Test'). Default 'Command'.
    #[serde(default)]
    pub label: Option<String>,
}

/// `run_command`: build, test, or otherwise execute in the project root.
pub struct RunCommand {
    runner: CommandRunner,
}

impl RunCommand {
    pub fn new(runner: CommandRunner) -> Self {
        Self { runner }
    }
}

impl Tool for RunCommand {
    fn definition(&self) -> ToolDef {
        ToolSpec::builder(names::RUN_COMMAND)
            .purpose("Run a shell command in the project root and return its output")
            .when_to_use("When you need to build, test, lint, or run the project")
            .when_not_to_use(
                "When a file tool covers the task; use create_file, read_file, \
                 list_directory, or search_in_file instead of shell equivalents",
            )
            .parameters_for::<RunCommandArgs>()
            .example(
                "run_command(command='cargo test', label='Test')",
                "Test output lines, then 'Test successful' or 'Test failed with exit code 101'",
            )
            .output_format("Merged stdout/stderr lines followed by one status line")
            .to_tool_def()
    }

    fn is_mutation(&self) -> bool {
        true
    }

    fn execute(&self, arguments: &str) -> ToolFuture<'_> {
        let arguments = arguments.to_string();
        Box::pin(async move {
            let args: RunCommandArgs = match parse_tool_args(&arguments) {
                Ok(a) => a,
                Err(e) => return e,
            };
            let label = args.label.as_deref().unwrap_or(DEFAULT_LABEL);
            match self.runner.run(&args.command, label).await {
                Ok(result) => result.text(),
                Err(e) => match e.partial_transcript() {
                    Some(lines) if !lines.is_empty() => {
                        format!("{}\nError: {e}", lines.join("\n"))
                    }
                    _ => format!("Error: {e}"),
                },
            }
        })
    }
}
