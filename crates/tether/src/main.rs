//! Run sandboxed workspace operations from the command line.
//!
//! # Examples
//!
//! ```sh
//! # Filesystem operations, confined to --root
//! tether --root ./project touch notes/todo.md --content "- ship it"
//! tether --root ./project ls notes
//! tether --root ./project search src/lib.rs 'fn \w+'
//!
//! # Build and test with live output
//! tether --root ./project run "cargo test" --label Test
//!
//! # Split a model response into blocks
//! cat response.md | tether parse
//!
//! # Meter tokens of a prompt and show the last day
//! cat prompt.txt | tether tokens --store usage.json --granularity hour --last 24
//! ```

use std::io::{self, Read};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tether::config::WorkspaceConfig;
use tether::console::ConsoleRegistry;
use tether::progress::{FnObserver, LoggingObserver, ProgressChannel, ProgressEvent};
use tether::tools::fs::{FileTools, Outcome};
use tether::usage::meter::BUCKET_WINDOW;
use tether::usage::{Direction, Granularity};
use tether::{Message, ToolError, response};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Sandboxed file, command, and response-parsing tools for coding agents.
#[derive(Parser)]
#[command(name = "tether", version)]
struct Cli {
    /// Project root; every path is confined to it
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Log at debug level (overrides RUST_LOG)
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Per-call timeout in seconds for `run` (0 disables)
    #[arg(long, global = true, default_value_t = 600)]
    timeout: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a directory and its parents
    Mkdir { path: String },
    /// Create a new file
    Touch {
        path: String,
        /// Initial content
        #[arg(long)]
        content: Option<String>,
    },
    /// Delete an empty directory
    Rmdir { path: String },
    /// Delete a file
    Rm { path: String },
    /// List a directory
    Ls {
        #[arg(default_value = ".")]
        path: String,
    },
    /// Print a file
    Cat { path: String },
    /// Print regex matches with byte offsets
    Search { path: String, pattern: String },
    /// Run a shell command in the root
    Run {
        command: String,
        /// Label for status lines
        #[arg(long, default_value = "Command")]
        label: String,
        /// Echo output to stderr instead of stdout
        #[arg(long)]
        stderr: bool,
    },
    /// Split a response (file or stdin) into blocks, printed as JSON
    Parse { file: Option<PathBuf> },
    /// Print the tool definitions as JSON
    Tools {
        /// Only tools that leave the project unchanged
        #[arg(long)]
        read_only: bool,
    },
    /// Count tokens on stdin, record them, and print windowed usage
    Tokens {
        /// JSON file holding the usage tables
        #[arg(long, default_value = "tether-usage.json")]
        store: PathBuf,
        /// Bucket width: minute, hour, day, week, or month
        #[arg(long, default_value = "minute")]
        granularity: Granularity,
        /// Number of buckets to sum, at most the 31 retained
        #[arg(
            long,
            default_value_t = 1,
            value_parser = clap::value_parser!(u32).range(0..=BUCKET_WINDOW as i64)
        )]
        last: u32,
        /// Record as model output instead of input
        #[arg(long)]
        output: bool,
        /// Estimate from character count instead of BPE
        #[arg(long)]
        estimate: bool,
    },
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(io::stderr),
        )
        .init();
}

fn read_input(file: Option<&PathBuf>) -> Result<String, String> {
    match file {
        Some(path) => std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read '{}': {e}", path.display())),
        None => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .map_err(|e| format!("failed to read stdin: {e}"))?;
            Ok(buf)
        }
    }
}

fn print_outcome(result: Result<Outcome, ToolError>) -> Result<i32, String> {
    match result {
        Ok(Outcome::Completed(text)) => {
            if !text.is_empty() {
                println!("{text}");
            }
            Ok(0)
        }
        Ok(Outcome::Advisory(advisory)) => {
            eprintln!("{advisory}");
            Ok(0)
        }
        Err(e) => Err(e.to_string()),
    }
}

fn to_json(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("failed to serialize: {e}"))
}

async fn run(cli: Cli) -> Result<i32, String> {
    let progress = ProgressChannel::new().with(LoggingObserver);
    let timeout = (cli.timeout > 0).then(|| Duration::from_secs(cli.timeout));
    let config = WorkspaceConfig::new(&cli.root)
        .with_tool_timeout(timeout)
        .with_progress(progress.clone());

    let files = || -> Result<FileTools, String> { config.file_tools().map_err(|e| e.to_string()) };

    match cli.command {
        Command::Mkdir { path } => print_outcome(files()?.create_directory(&path).await),
        Command::Touch { path, content } => {
            print_outcome(files()?.create_file(&path, content.as_deref()).await)
        }
        Command::Rmdir { path } => print_outcome(files()?.delete_directory(&path).await),
        Command::Rm { path } => print_outcome(files()?.delete_file(&path).await),
        Command::Ls { path } => print_outcome(files()?.list_directory(&path).await),
        Command::Cat { path } => print_outcome(files()?.read_file(&path).await),
        Command::Search { path, pattern } => {
            print_outcome(files()?.search_in_file(&path, &pattern).await)
        }
        Command::Run {
            command,
            label,
            stderr,
        } => {
            let config = if stderr {
                config.with_consoles(Arc::new(ConsoleRegistry::new().with_echo(true)))
            } else {
                progress.subscribe(FnObserver::new(|event| {
                    if let ProgressEvent::OutputLine { line, .. } = event {
                        println!("{line}");
                    }
                }));
                config
            };
            let runner = config.command_runner().map_err(|e| e.to_string())?;
            let result = match timeout {
                Some(limit) => tokio::time::timeout(limit, runner.run(&command, &label))
                    .await
                    .map_err(|_| format!("'{command}' timed out after {}s", limit.as_secs()))?,
                None => runner.run(&command, &label).await,
            }
            .map_err(|e| e.to_string())?;
            Ok(if result.succeeded {
                0
            } else if result.exit_code > 0 {
                result.exit_code
            } else {
                1
            })
        }
        Command::Parse { file } => {
            let text = read_input(file.as_ref())?;
            let parsed = response::parse(&text);
            println!("{}", to_json(&parsed.into_blocks())?);
            Ok(0)
        }
        Command::Tools { read_only } => {
            let tools = config.build_tool_set().map_err(|e| e.to_string())?;
            let definitions: Vec<_> = tools
                .definitions()
                .into_iter()
                .filter(|def| !read_only || !tools.is_mutation_tool(&def.function.name))
                .collect();
            println!("{}", to_json(&definitions)?);
            Ok(0)
        }
        Command::Tokens {
            store,
            granularity,
            last,
            output,
            estimate,
        } => {
            let text = read_input(None)?;
            let config = config
                .with_usage_store(&store)
                .with_granularity(granularity)
                .with_token_estimate(estimate);
            let meter = config.build_meter().map_err(|e| e.to_string())?;
            let (direction, counted) = if output {
                (Direction::Output, meter.record_output(&text))
            } else {
                (Direction::Input, meter.record_input(&[Message::user(text)]))
            };
            meter.prune_old();
            if let Some(store) = config.json_store() {
                meter.persist(&store).map_err(|e| e.to_string())?;
            }
            let report = serde_json::json!({
                "counted": counted,
                "granularity": granularity.to_string(),
                "buckets": last,
                "input": meter.usage_over_last_n(Direction::Input, last),
                "output": meter.usage_over_last_n(Direction::Output, last),
                "direction": format!("{direction:?}").to_lowercase(),
            });
            println!("{}", to_json(&report)?);
            Ok(0)
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}
