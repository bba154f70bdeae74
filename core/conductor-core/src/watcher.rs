//! Filesystem watch scopes for one project.
//!
//! A scope is one `notify` watcher plus one consumer thread:
//!
//! ```text
//! notify callback ──► mpsc channel ──► consumer (debounce per path) ──► Broadcaster
//! ```
//!
//! The consumer keeps a deadline per changed path. Every new event on a path
//! pushes its deadline out by the scope's window; once a path has been quiet
//! for the whole window it is dispatched exactly once.
//!
//! | Scope | Directory | Window | Publishes |
//! |---|---|---|---|
//! | state | `<state-dir>` | 100 ms | `StateChanged` |
//! | log | `<agent-dir>/logs` | 50 ms | `NewLogLines` |
//! | knowledge | `<agent-dir>/knowledge` (recursive) | 200 ms | `KnowledgeChanged` |
//! | signals | `<agent-dir>/signals` | 0 ms | `SignalFired` |
//!
//! Stopping is synchronous. The watcher is dropped, the consumer is told to
//! stop and joined; pending deadlines die with it, so nothing is published
//! after [`ScopeHandle::stop`] returns.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime};

use chrono::{DateTime, Utc};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};

use crate::error::{ConductorError, Result};
use crate::events::partition;
use crate::knowledge::relative_name;
use crate::layout::{ProjectLayout, LOG_FILE_NAME};
use crate::store::is_document_name;
use crate::subscription::{Broadcaster, Notification};
use crate::tailer::LogTailer;

/// Upper bound on an idle consumer's sleep; it wakes earlier for deadlines.
const IDLE_WAIT: Duration = Duration::from_secs(3600);

// ═══════════════════════════════════════════════════════════════════════════════
// Configuration
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
    State,
    Log,
    Knowledge,
    Signals,
}

impl ScopeKind {
    pub const ALL: [ScopeKind; 4] = [
        ScopeKind::State,
        ScopeKind::Log,
        ScopeKind::Knowledge,
        ScopeKind::Signals,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ScopeKind::State => "state",
            ScopeKind::Log => "log",
            ScopeKind::Knowledge => "knowledge",
            ScopeKind::Signals => "signals",
        }
    }

    /// Directory the scope watches inside a project.
    pub fn dir(self, layout: &ProjectLayout) -> PathBuf {
        match self {
            ScopeKind::State => layout.state_dir(),
            ScopeKind::Log => layout.logs_dir(),
            ScopeKind::Knowledge => layout.knowledge_dir(),
            ScopeKind::Signals => layout.signals_dir(),
        }
    }
}

impl std::fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `[watch]` section of the observer config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub state_debounce_ms: u64,
    pub log_debounce_ms: u64,
    pub knowledge_debounce_ms: u64,
    pub signal_debounce_ms: u64,
    /// Subdirectory levels below the knowledge dir that are watched.
    pub knowledge_depth: usize,
    /// How often a long-running client retries scopes whose directory was missing.
    pub retry_interval_secs: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            state_debounce_ms: 100,
            log_debounce_ms: 50,
            knowledge_debounce_ms: 200,
            signal_debounce_ms: 0,
            knowledge_depth: 2,
            retry_interval_secs: 5,
        }
    }
}

impl WatchConfig {
    pub fn window(&self, kind: ScopeKind) -> Duration {
        Duration::from_millis(match kind {
            ScopeKind::State => self.state_debounce_ms,
            ScopeKind::Log => self.log_debounce_ms,
            ScopeKind::Knowledge => self.knowledge_debounce_ms,
            ScopeKind::Signals => self.signal_debounce_ms,
        })
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs.max(1))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Seams
// ═══════════════════════════════════════════════════════════════════════════════

/// A running scope that can be stopped.
pub trait ScopeHandle: Send {
    fn kind(&self) -> ScopeKind;

    /// Stops delivery synchronously. Calling it again is a no-op.
    fn stop(&mut self);

    fn is_running(&self) -> bool;
}

/// Creates scopes. The registry only talks to this trait, so tests can
/// substitute a recording implementation.
pub trait WatchFactory: Send + Sync {
    fn start(&self, kind: ScopeKind, layout: &ProjectLayout) -> Result<Box<dyn ScopeHandle>>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// notify-backed implementation
// ═══════════════════════════════════════════════════════════════════════════════

enum ScopeMessage {
    Fs(notify::Result<Event>),
    Stop,
}

pub struct FsWatchFactory {
    broadcaster: Arc<Broadcaster>,
    tailer: Arc<Mutex<LogTailer>>,
    config: WatchConfig,
}

impl FsWatchFactory {
    pub fn new(
        broadcaster: Arc<Broadcaster>,
        tailer: Arc<Mutex<LogTailer>>,
        config: WatchConfig,
    ) -> Self {
        FsWatchFactory {
            broadcaster,
            tailer,
            config,
        }
    }
}

impl WatchFactory for FsWatchFactory {
    fn start(&self, kind: ScopeKind, layout: &ProjectLayout) -> Result<Box<dyn ScopeHandle>> {
        let dir = kind.dir(layout);
        if !dir.is_dir() {
            return Err(ConductorError::Watch {
                context: format!("Cannot watch {} scope", kind),
                source: notify::Error::path_not_found().add_path(dir),
            });
        }

        if kind == ScopeKind::Log {
            if let Ok(mut tailer) = self.tailer.lock() {
                tailer.prime(&layout.log_file());
            }
        }

        let (tx, rx) = mpsc::channel::<ScopeMessage>();
        let fs_tx = tx.clone();
        let mut watcher: RecommendedWatcher =
            notify::recommended_watcher(move |res: notify::Result<Event>| {
                let _ = fs_tx.send(ScopeMessage::Fs(res));
            })
            .map_err(|e| ConductorError::Watch {
                context: format!("Failed to create {} watcher", kind),
                source: e,
            })?;

        let mode = if kind == ScopeKind::Knowledge {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        watcher.watch(&dir, mode).map_err(|e| ConductorError::Watch {
            context: format!("Failed to watch {}", dir.display()),
            source: e,
        })?;

        let consumer = ScopeConsumer {
            kind,
            project: layout.root().to_path_buf(),
            dirs: equivalent_dirs(&dir),
            log_file: layout.log_file(),
            window: self.config.window(kind),
            knowledge_depth: self.config.knowledge_depth,
            broadcaster: Arc::clone(&self.broadcaster),
            tailer: Arc::clone(&self.tailer),
        };
        let thread = std::thread::Builder::new()
            .name(format!("conductor-{}", kind))
            .spawn(move || consumer.run(rx))
            .map_err(|e| ConductorError::io(format!("Failed to spawn {} consumer", kind), e))?;

        tracing::info!(scope = %kind, path = %dir.display(), "Watch scope started");
        Ok(Box::new(WatchScope {
            kind,
            dir,
            watcher: Some(watcher),
            control: Some(tx),
            thread: Some(thread),
        }))
    }
}

/// The directory as given plus its canonical form; some backends report
/// canonical paths (e.g. `/private/var` on macOS).
fn equivalent_dirs(dir: &Path) -> Vec<PathBuf> {
    let mut dirs = vec![dir.to_path_buf()];
    if let Ok(canonical) = fs_err::canonicalize(dir) {
        if canonical != dir {
            dirs.push(canonical);
        }
    }
    dirs
}

pub struct WatchScope {
    kind: ScopeKind,
    dir: PathBuf,
    watcher: Option<RecommendedWatcher>,
    control: Option<Sender<ScopeMessage>>,
    thread: Option<JoinHandle<()>>,
}

impl ScopeHandle for WatchScope {
    fn kind(&self) -> ScopeKind {
        self.kind
    }

    fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        // Drop the watcher first so no new events are queued behind Stop.
        drop(self.watcher.take());
        if let Some(control) = self.control.take() {
            let _ = control.send(ScopeMessage::Stop);
        }
        if thread.join().is_err() {
            tracing::warn!(scope = %self.kind, "Watch consumer panicked");
        }
        tracing::info!(scope = %self.kind, path = %self.dir.display(), "Watch scope stopped");
    }

    fn is_running(&self) -> bool {
        self.thread.is_some()
    }
}

impl Drop for WatchScope {
    fn drop(&mut self) {
        self.stop();
    }
}

struct ScopeConsumer {
    kind: ScopeKind,
    project: PathBuf,
    dirs: Vec<PathBuf>,
    log_file: PathBuf,
    window: Duration,
    knowledge_depth: usize,
    broadcaster: Arc<Broadcaster>,
    tailer: Arc<Mutex<LogTailer>>,
}

impl ScopeConsumer {
    fn run(self, rx: Receiver<ScopeMessage>) {
        let mut pending: HashMap<PathBuf, Instant> = HashMap::new();

        loop {
            let wait = pending
                .values()
                .min()
                .map(|deadline| deadline.saturating_duration_since(Instant::now()))
                .unwrap_or(IDLE_WAIT);

            let first = match rx.recv_timeout(wait) {
                Ok(message) => Some(message),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => return,
            };

            // Take everything already queued so a burst debounces as one.
            let mut batch: Vec<ScopeMessage> = first.into_iter().collect();
            batch.extend(rx.try_iter());

            for message in batch {
                match message {
                    ScopeMessage::Stop => return,
                    ScopeMessage::Fs(Ok(event)) => {
                        let deadline = Instant::now() + self.window;
                        for key in self.relevant_paths(&event) {
                            pending.insert(key, deadline);
                        }
                    }
                    ScopeMessage::Fs(Err(err)) => {
                        tracing::warn!(scope = %self.kind, error = %err, "Watch backend error");
                    }
                }
            }

            let now = Instant::now();
            let mut due: Vec<PathBuf> = pending
                .iter()
                .filter(|(_, deadline)| **deadline <= now)
                .map(|(path, _)| path.clone())
                .collect();
            due.sort();
            for path in due {
                pending.remove(&path);
                self.dispatch(&path);
            }
        }
    }

    /// Paths from an event this scope cares about, normalised to debounce keys.
    fn relevant_paths(&self, event: &Event) -> Vec<PathBuf> {
        let interesting = match event.kind {
            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Any => true,
            EventKind::Remove(_) => self.kind != ScopeKind::Signals,
            _ => false,
        };
        if !interesting {
            return Vec::new();
        }

        event
            .paths
            .iter()
            .filter_map(|path| self.key_for(path))
            .collect()
    }

    fn key_for(&self, path: &Path) -> Option<PathBuf> {
        let file_name = path.file_name()?.to_string_lossy().to_string();
        match self.kind {
            ScopeKind::State => {
                (self.is_direct_child(path) && is_document_name(&file_name)).then(|| path.to_path_buf())
            }
            ScopeKind::Log => {
                (self.is_direct_child(path) && file_name == LOG_FILE_NAME).then(|| self.log_file.clone())
            }
            ScopeKind::Signals => {
                (self.is_direct_child(path) && file_name.starts_with('.')).then(|| path.to_path_buf())
            }
            ScopeKind::Knowledge => {
                if file_name == ".gitkeep" || path.is_dir() {
                    return None;
                }
                let name = self.knowledge_name(path)?;
                let depth = name.split('/').count();
                (depth <= self.knowledge_depth + 1).then(|| path.to_path_buf())
            }
        }
    }

    fn is_direct_child(&self, path: &Path) -> bool {
        path.parent()
            .is_some_and(|parent| self.dirs.iter().any(|dir| dir == parent))
    }

    fn knowledge_name(&self, path: &Path) -> Option<String> {
        self.dirs.iter().find_map(|dir| relative_name(dir, path))
    }

    fn dispatch(&self, path: &Path) {
        let file_name = || {
            path.file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default()
        };

        let notification = match self.kind {
            ScopeKind::State => Notification::StateChanged {
                project: self.project.clone(),
                name: file_name(),
            },
            ScopeKind::Knowledge => Notification::KnowledgeChanged {
                project: self.project.clone(),
                name: self.knowledge_name(path).unwrap_or_else(file_name),
            },
            ScopeKind::Signals => {
                let Ok(modified) = fs_err::metadata(path).and_then(|m| m.modified()) else {
                    // Gone again before we looked: not a wake-up.
                    return;
                };
                Notification::SignalFired {
                    project: self.project.clone(),
                    signal: file_name(),
                    timestamp: DateTime::<Utc>::from(modified.min(SystemTime::now())),
                }
            }
            ScopeKind::Log => {
                let lines = match self.tailer.lock() {
                    Ok(mut tailer) => tailer.drain(&self.log_file),
                    Err(_) => return,
                };
                if lines.is_empty() {
                    return;
                }
                let (events, unrecognized) = partition(lines.iter().map(String::as_str));
                tracing::debug!(
                    lines = lines.len(),
                    events = events.len(),
                    "New activity log lines"
                );
                Notification::NewLogLines {
                    project: self.project.clone(),
                    lines,
                    events,
                    unrecognized: unrecognized.len(),
                }
            }
        };

        self.broadcaster.publish(&notification);
    }
}
