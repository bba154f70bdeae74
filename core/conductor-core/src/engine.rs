//! Conductor - the main entry point for clients.
//!
//! Owns the project registry, the log tailer and the notification fan-out, and
//! exposes every read/write operation a client needs against the active
//! project.
//!
//! - Reads without an active project return empty values.
//! - Writes and signal touches without one fail with
//!   [`ConductorError::NoActiveProject`].
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use conductor_core::{Conductor, ObserverConfig};
//!
//! let mut conductor = Conductor::new(ObserverConfig::load(None)?);
//! conductor.add_project(Path::new("/work/app"))?;
//! let health = conductor.get_health();
//! ```

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::Value;

use crate::config::ObserverConfig;
use crate::error::{ConductorError, Result};
use crate::events::{correlates, partition, LogEvent};
use crate::health::{evaluate, HealthReport, HEALTH_DOCUMENT};
use crate::knowledge::{list_knowledge, read_knowledge, KnowledgeFile};
use crate::layout::ProjectLayout;
use crate::manifest::{read_manifest, LauncherManifest};
use crate::registry::{
    AddOutcome, ProjectEntry, ProjectRegistry, ProjectSummary, RemoveOutcome, SwitchOutcome,
};
use crate::requests::{discover_requests, session_stats, RequestSummary, SessionStats};
use crate::signals::{Signal, SignalChannel};
use crate::store::{DocumentInfo, StateStore};
use crate::subscription::{Broadcaster, Subscriber, SubscriptionId};
use crate::tailer::{read_tail, LogTailer};
use crate::timeline::{reconstruct, Timeline};
use crate::watcher::{FsWatchFactory, WatchFactory};

/// State document holding the request master-1 is currently handing off.
pub const HANDOFF_DOCUMENT: &str = "handoff.json";

pub struct Conductor {
    config: ObserverConfig,
    broadcaster: Arc<Broadcaster>,
    registry: ProjectRegistry,
}

impl Conductor {
    /// Creates a Conductor that watches the real filesystem.
    pub fn new(config: ObserverConfig) -> Self {
        let broadcaster = Arc::new(Broadcaster::new());
        let tailer = Arc::new(Mutex::new(LogTailer::new()));
        let factory = Arc::new(FsWatchFactory::new(
            Arc::clone(&broadcaster),
            tailer,
            config.watch.clone(),
        ));
        Self::assemble(config, broadcaster, factory)
    }

    /// Creates a Conductor with a custom watch factory.
    ///
    /// Used for testing; `broadcaster` must be the one the factory publishes to.
    pub fn with_factory(
        config: ObserverConfig,
        broadcaster: Arc<Broadcaster>,
        factory: Arc<dyn WatchFactory>,
    ) -> Self {
        Self::assemble(config, broadcaster, factory)
    }

    fn assemble(
        config: ObserverConfig,
        broadcaster: Arc<Broadcaster>,
        factory: Arc<dyn WatchFactory>,
    ) -> Self {
        let registry = ProjectRegistry::new(config.layout.clone(), factory);
        Conductor {
            config,
            broadcaster,
            registry,
        }
    }

    pub fn config(&self) -> &ObserverConfig {
        &self.config
    }

    pub fn active_project(&self) -> Option<&Path> {
        self.registry.active()
    }

    fn layout(&self) -> Option<ProjectLayout> {
        self.registry.active_layout()
    }

    fn require_layout(&self) -> Result<ProjectLayout> {
        self.layout().ok_or(ConductorError::NoActiveProject)
    }

    fn store(&self) -> Option<StateStore> {
        self.layout().map(|layout| StateStore::new(&layout.state_dir()))
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // State Documents
    // ─────────────────────────────────────────────────────────────────────────────

    pub fn get_document(&self, name: &str) -> Option<Value> {
        self.store()?.read(name)
    }

    pub fn get_document_raw(&self, name: &str) -> Option<String> {
        self.store()?.read_raw(name)
    }

    pub fn write_document(&self, name: &str, value: &Value) -> Result<()> {
        let layout = self.require_layout()?;
        StateStore::new(&layout.state_dir()).write(name, value)
    }

    pub fn list_documents(&self) -> Vec<DocumentInfo> {
        self.store().map(|store| store.list()).unwrap_or_default()
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Signals
    // ─────────────────────────────────────────────────────────────────────────────

    pub fn list_signals(&self) -> Vec<Signal> {
        self.layout()
            .map(|layout| SignalChannel::new(&layout.signals_dir()).list())
            .unwrap_or_default()
    }

    pub fn touch_signal(&self, name: &str) -> Result<Signal> {
        let layout = self.require_layout()?;
        SignalChannel::new(&layout.signals_dir()).touch(name)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Activity Log
    // ─────────────────────────────────────────────────────────────────────────────

    /// Every recognized event in the active project's log, in file order.
    /// A trailing line without `\n` is still being written and is skipped.
    fn load_events(&self) -> Vec<LogEvent> {
        let Some(layout) = self.layout() else {
            return Vec::new();
        };
        let path = layout.log_file();
        let bytes = match fs_err::read(&path) {
            Ok(bytes) => bytes,
            Err(err) => {
                if err.kind() != std::io::ErrorKind::NotFound {
                    tracing::debug!(path = %path.display(), error = %err, "Activity log unreadable");
                }
                return Vec::new();
            }
        };
        let complete = bytes.iter().rposition(|b| *b == b'\n').map_or(0, |pos| pos + 1);
        let text = String::from_utf8_lossy(&bytes[..complete]);
        partition(text.lines().filter(|l| !l.trim().is_empty())).0
    }

    /// Events correlated with `token` (all events when `None`), newest last,
    /// limited to the last `limit`.
    pub fn get_recent_events(&self, token: Option<&str>, limit: Option<usize>) -> Vec<LogEvent> {
        let mut events: Vec<LogEvent> = self
            .load_events()
            .into_iter()
            .filter(|e| token.map_or(true, |t| correlates(e, t)))
            .collect();
        if let Some(limit) = limit {
            let skip = events.len().saturating_sub(limit);
            events.drain(..skip);
        }
        events
    }

    pub fn get_timeline(&self, token: Option<&str>) -> Timeline {
        let events = self.get_recent_events(token, None);
        reconstruct(&events, &self.config.timeline, Utc::now())
    }

    pub fn read_log_tail(&self, lines: usize) -> Result<Vec<String>> {
        match self.layout() {
            Some(layout) => read_tail(&layout.log_file(), lines),
            None => Ok(Vec::new()),
        }
    }

    pub fn list_requests(&self) -> Vec<RequestSummary> {
        let events = self.load_events();
        let pending = self
            .get_document(HANDOFF_DOCUMENT)
            .and_then(|doc| doc.get("request_id").and_then(Value::as_str).map(str::to_string));
        discover_requests(&events, pending.as_deref())
    }

    pub fn session_stats(&self) -> SessionStats {
        session_stats(&self.load_events())
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Health, Knowledge, Manifest
    // ─────────────────────────────────────────────────────────────────────────────

    pub fn get_health(&self) -> HealthReport {
        let doc = self.get_document(HEALTH_DOCUMENT);
        evaluate(doc.as_ref(), &self.config.health, Utc::now())
    }

    pub fn list_knowledge(&self) -> Vec<KnowledgeFile> {
        self.layout()
            .map(|layout| list_knowledge(&layout.knowledge_dir(), self.config.watch.knowledge_depth))
            .unwrap_or_default()
    }

    pub fn read_knowledge(&self, name: &str) -> Result<Option<String>> {
        match self.layout() {
            Some(layout) => read_knowledge(&layout.knowledge_dir(), name),
            None => Ok(None),
        }
    }

    pub fn read_manifest(&self) -> Option<LauncherManifest> {
        read_manifest(&self.layout()?.manifest_file())
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Subscriptions
    // ─────────────────────────────────────────────────────────────────────────────

    pub fn subscribe(&self, subscriber: Arc<dyn Subscriber>) -> SubscriptionId {
        self.broadcaster.subscribe(subscriber)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.broadcaster.unsubscribe(id)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Projects
    // ─────────────────────────────────────────────────────────────────────────────

    pub fn add_project(&mut self, path: &Path) -> Result<AddOutcome> {
        self.registry.add(path)
    }

    /// Makes `path` the active project for queries and writes without
    /// starting any watcher.
    pub fn open_project(&mut self, path: &Path) -> Result<ProjectEntry> {
        self.registry.open(path)
    }

    pub fn switch_project(&mut self, path: &Path) -> Result<SwitchOutcome> {
        self.registry.switch_active(path)
    }

    pub fn remove_project(&mut self, path: &Path) -> Result<RemoveOutcome> {
        self.registry.remove(path)
    }

    pub fn list_projects(&self) -> Vec<ProjectSummary> {
        self.registry.list()
    }

    /// Starts any scope of the active project that is not running yet.
    pub fn retry_watchers(&mut self) -> Option<SwitchOutcome> {
        self.registry.retry_missing_scopes()
    }

    /// Stops all watching. Queries keep working.
    pub fn shutdown(&mut self) {
        self.registry.stop_all();
    }
}
