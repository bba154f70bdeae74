//! # conductor-core
//!
//! Observer and reconciler for projects coordinated by a team of autonomous
//! agents that talk to each other only through the filesystem: JSON state
//! documents, an append-only activity log, zero-byte signal files and a
//! knowledge directory.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime. Watch scopes run on plain threads and
//!   notify subscribers through callbacks.
//! - **Atomic writes**: State documents are replaced by rename, never
//!   rewritten in place, so concurrent readers see old or new content.
//! - **Graceful degradation**: Missing or malformed files read as empty values,
//!   not errors. Only writes and explicit user actions fail.
//! - **One active project**: Only the active project is watched; switching
//!   stops every old scope before any new one starts.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use conductor_core::{Conductor, ObserverConfig};
//!
//! let mut conductor = Conductor::new(ObserverConfig::load(None)?);
//! conductor.add_project(Path::new("/work/app"))?;
//! let events = conductor.get_recent_events(Some("req-42"), Some(50));
//! let timeline = conductor.get_timeline(Some("req-42"));
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod health;
pub mod knowledge;
pub mod layout;
pub mod manifest;
pub mod patterns;
pub mod registry;
pub mod requests;
pub mod signals;
pub mod storage;
pub mod store;
pub mod subscription;
pub mod tailer;
pub mod timeline;
pub mod watcher;

pub use config::{ObserverConfig, CONFIG_ENV_VAR};
pub use engine::{Conductor, HANDOFF_DOCUMENT};
pub use error::{ConductorError, Result};
pub use events::{
    correlates, extract_request_id, extract_tier, parse_line, parse_lines, partition, AgentRole,
    LogEvent, ParsedLine, LOG_GRAMMAR_VERSION,
};
pub use health::{
    evaluate, AgentHealthRecord, BudgetMetric, HealthReport, HealthStatus, HealthThresholds,
    HEALTH_DOCUMENT,
};
pub use knowledge::{estimate_tokens, KnowledgeFile};
pub use layout::{LayoutConfig, LayoutPreset, ProjectLayout};
pub use manifest::{parse_manifest, LauncherManifest, ManifestAgent};
pub use registry::{
    AddOutcome, ProjectEntry, ProjectRegistry, ProjectSummary, RemoveOutcome, ScopeWarning,
    SwitchOutcome,
};
pub use requests::{RequestStage, RequestSummary, ResetCounts, SessionStats};
pub use signals::{Signal, SignalChannel};
pub use storage::StoragePaths;
pub use store::{DocumentInfo, StateStore};
pub use subscription::{Broadcaster, ChannelSubscriber, Notification, Subscriber, SubscriptionId};
pub use tailer::{LogCursor, LogTailer, TailBatch};
pub use timeline::{reconstruct, Phase, PhaseTracker, Timeline, TimelineConfig};
pub use watcher::{FsWatchFactory, ScopeHandle, ScopeKind, WatchConfig, WatchFactory};
