//! Progress events and the observer registry.
//!
//! Filesystem tools emit a [`ProgressEvent::Started`] before touching the
//! disk and a [`ProgressEvent::Finished`] (or [`ProgressEvent::Failed`])
//! afterwards; the command runner emits one [`ProgressEvent::OutputLine`]
//! per line of subprocess output. Events are delivered synchronously, in
//! emission order, to every observer registered on a [`ProgressChannel`].
//!
//! # Choosing an observer
//!
//! | Observer | Use case |
//! |---------|----------|
//! | [`LoggingObserver`] | Structured logging via `tracing` |
//! | [`FnObserver`] | Quick closures (status bars, test capture) |
//! | Custom `impl ProgressObserver` | Full control |

use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::{debug, info, trace, warn};

use crate::tools::fs::FileOperation;

// ── Events ─────────────────────────────────────────────────────────

/// A progress notification. `Display` renders the human-readable status
/// line shown to the user.
#[derive(Debug, Clone, Copy)]
pub enum ProgressEvent<'a> {
    /// A filesystem operation is about to run.
    Started {
        operation: FileOperation,
        path: &'a str,
    },
    /// A filesystem operation completed (including advisory outcomes).
    Finished {
        operation: FileOperation,
        path: &'a str,
        message: &'a str,
    },
    /// A filesystem operation failed.
    Failed {
        operation: FileOperation,
        path: &'a str,
        error: &'a str,
    },
    /// One line of merged stdout/stderr from a running command.
    OutputLine { label: &'a str, line: &'a str },
}

impl fmt::Display for ProgressEvent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressEvent::Started { operation, path } => {
                write!(f, "{}: {path}", operation.present_participle())
            }
            ProgressEvent::Finished { message, .. } => write!(f, "{message}"),
            ProgressEvent::Failed {
                operation,
                path,
                error,
            } => write!(f, "{operation} failed for {path}: {error}"),
            ProgressEvent::OutputLine { label, line } => write!(f, "[{label}] {line}"),
        }
    }
}

// ── Observers ──────────────────────────────────────────────────────

/// Receives progress events.
///
/// Observers run on the caller's task, so they must return quickly; hand
/// the event off to a channel if you need to do real work with it.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, event: &ProgressEvent<'_>);
}

/// Wraps a closure into a [`ProgressObserver`].
///
/// ```ignore
/// let lines = Arc::new(Mutex::new(Vec::new()));
/// let sink = lines.clone();
/// channel.subscribe(FnObserver::new(move |event| {
///     sink.lock().unwrap().push(event.to_string());
/// }));
/// ```
pub struct FnObserver<F>(F)
where
    F: Fn(&ProgressEvent<'_>) + Send + Sync;

impl<F> FnObserver<F>
where
    F: Fn(&ProgressEvent<'_>) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> ProgressObserver for FnObserver<F>
where
    F: Fn(&ProgressEvent<'_>) + Send + Sync,
{
    fn on_progress(&self, event: &ProgressEvent<'_>) {
        (self.0)(event);
    }
}

/// An observer that logs events via `tracing`.
pub struct LoggingObserver;

impl ProgressObserver for LoggingObserver {
    fn on_progress(&self, event: &ProgressEvent<'_>) {
        match event {
            ProgressEvent::Started { .. } => debug!("{event}"),
            ProgressEvent::Finished { .. } => info!("{event}"),
            ProgressEvent::Failed { .. } => warn!("{event}"),
            ProgressEvent::OutputLine { .. } => trace!("{event}"),
        }
    }
}

// ── Channel ────────────────────────────────────────────────────────

/// Handle returned by [`ProgressChannel::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

#[derive(Default)]
struct Registry {
    next_id: u64,
    observers: Vec<(ObserverId, Arc<dyn ProgressObserver>)>,
}

/// A cloneable fan-out point for progress events.
///
/// Clones share the same observer list, so a channel handed to several
/// tools reports all of them to the same observers.
#[derive(Clone, Default)]
pub struct ProgressChannel {
    registry: Arc<Mutex<Registry>>,
}

impl fmt::Debug for ProgressChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressChannel")
            .field("observers", &self.len())
            .finish()
    }
}

impl ProgressChannel {
    /// Create a channel with no observers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer (builder pattern).
    pub fn with(self, observer: impl ProgressObserver + 'static) -> Self {
        self.subscribe(observer);
        self
    }

    /// Register an observer. Observers are called in registration order.
    pub fn subscribe(&self, observer: impl ProgressObserver + 'static) -> ObserverId {
        let mut registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        let id = ObserverId(registry.next_id);
        registry.next_id += 1;
        registry.observers.push((id, Arc::new(observer)));
        id
    }

    /// Remove an observer. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        let before = registry.observers.len();
        registry.observers.retain(|(oid, _)| *oid != id);
        registry.observers.len() != before
    }

    /// Number of registered observers.
    pub fn len(&self) -> usize {
        self.registry
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .observers
            .len()
    }

    /// Whether no observers are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `event` to every observer.
    ///
    /// The observer list is snapshotted first so observers may subscribe or
    /// unsubscribe from inside a callback without deadlocking.
    pub fn emit(&self, event: ProgressEvent<'_>) {
        let observers: Vec<Arc<dyn ProgressObserver>> = {
            let registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
            registry.observers.iter().map(|(_, o)| o.clone()).collect()
        };
        for observer in observers {
            observer.on_progress(&event);
        }
    }
}
