//! Named output sinks for subprocess transcripts, one per sandbox root.
//!
//! The orchestrator owns a [`ConsoleRegistry`] and hands it to every
//! [`CommandRunner`](crate::tools::command::CommandRunner). Runners fetch
//! the sink for their root lazily, so all commands run in one project print
//! to the same console. Concurrent runs may interleave lines.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::sandbox::SandboxRoot;

/// Lines kept per sink before trimming.
pub const MAX_CONSOLE_LINES: usize = 2000;
/// Trim to this many when the cap is exceeded.
pub const CONSOLE_TRIM_TO: usize = 1200;

/// One line printed to a console, stamped with local wall-clock time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleLine {
    pub time: String,
    pub text: String,
}

/// A named, bounded console buffer.
#[derive(Debug)]
pub struct ConsoleSink {
    name: String,
    echo: bool,
    lines: Mutex<Vec<ConsoleLine>>,
}

impl ConsoleSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            echo: false,
            lines: Mutex::new(Vec::with_capacity(128)),
        }
    }

    /// Also write every printed line to stderr.
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn echoes(&self) -> bool {
        self.echo
    }

    /// Append a line, trimming the oldest lines past [`MAX_CONSOLE_LINES`].
    pub fn print(&self, text: &str) {
        if self.echo {
            eprintln!("{text}");
        }
        let line = ConsoleLine {
            time: Local::now().format("%H:%M:%S").to_string(),
            text: text.to_string(),
        };
        let mut lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        lines.push(line);
        if lines.len() > MAX_CONSOLE_LINES {
            let trim_to = lines.len() - CONSOLE_TRIM_TO;
            lines.drain(..trim_to);
        }
    }

    /// Copy of the buffered lines.
    pub fn lines(&self) -> Vec<ConsoleLine> {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Take all buffered lines, leaving the sink empty.
    pub fn drain(&self) -> Vec<ConsoleLine> {
        let mut lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *lines)
    }
}

/// Hands out one [`ConsoleSink`] per sandbox root.
#[derive(Debug, Default)]
pub struct ConsoleRegistry {
    echo: bool,
    sinks: Mutex<HashMap<PathBuf, Arc<ConsoleSink>>>,
}

impl ConsoleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sinks created from now on echo to stderr.
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// The sink for `root`, created on first use and named after the root
    /// directory.
    pub fn sink_for(&self, root: &SandboxRoot) -> Arc<ConsoleSink> {
        let mut sinks = self.sinks.lock().unwrap_or_else(|e| e.into_inner());
        sinks
            .entry(root.path().to_path_buf())
            .or_insert_with(|| {
                let name = match root.path().file_name() {
                    Some(dir) => format!("tether: {}", dir.to_string_lossy()),
                    None => "tether".to_string(),
                };
                debug!("Opening console '{name}'");
                Arc::new(ConsoleSink::new(name).with_echo(self.echo))
            })
            .clone()
    }

    pub fn len(&self) -> usize {
        self.sinks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_root_shares_a_sink() {
        let dir = tempfile::tempdir().unwrap();
        let root = SandboxRoot::new(dir.path()).unwrap();
        let registry = ConsoleRegistry::new();
        let a = registry.sink_for(&root);
        let b = registry.sink_for(&root);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn different_roots_get_different_sinks() {
        let one = tempfile::tempdir().unwrap();
        let two = tempfile::tempdir().unwrap();
        let registry = ConsoleRegistry::new();
        let a = registry.sink_for(&SandboxRoot::new(one.path()).unwrap());
        let b = registry.sink_for(&SandboxRoot::new(two.path()).unwrap());
        assert!(!Arc::ptr_eq(&a, &b));
        assert!(a.name().starts_with("tether: "));
    }

    #[test]
    fn print_and_drain() {
        let sink = ConsoleSink::new("test");
        sink.print("one");
        sink.print("two");
        assert_eq!(sink.lines().len(), 2);
        let drained = sink.drain();
        assert_eq!(drained[1].text, "two");
        assert!(sink.lines().is_empty());
    }

    #[test]
    fn trims_oldest_lines() {
        let sink = ConsoleSink::new("test");
        for i in 0..=MAX_CONSOLE_LINES {
            sink.print(&i.to_string());
        }
        let lines = sink.lines();
        assert_eq!(lines.len(), CONSOLE_TRIM_TO);
        assert_eq!(lines.last().unwrap().text, MAX_CONSOLE_LINES.to_string());
    }
}
