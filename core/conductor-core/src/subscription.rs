//! Fan-out of watcher notifications to interested clients.
//!
//! Watch scopes publish through one shared [`Broadcaster`]. Each scope calls
//! it from its own consumer thread, so a subscriber may be invoked from
//! several threads, but never concurrently for the same scope.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::events::LogEvent;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    StateChanged {
        project: PathBuf,
        name: String,
    },
    NewLogLines {
        project: PathBuf,
        /// Raw lines in file order.
        lines: Vec<String>,
        /// The recognized subset of `lines`, parsed.
        events: Vec<LogEvent>,
        unrecognized: usize,
    },
    SignalFired {
        project: PathBuf,
        signal: String,
        timestamp: DateTime<Utc>,
    },
    KnowledgeChanged {
        project: PathBuf,
        name: String,
    },
}

impl Notification {
    pub fn project(&self) -> &Path {
        match self {
            Notification::StateChanged { project, .. }
            | Notification::NewLogLines { project, .. }
            | Notification::SignalFired { project, .. }
            | Notification::KnowledgeChanged { project, .. } => project,
        }
    }
}

/// Receives notifications. Every method defaults to a no-op.
pub trait Subscriber: Send + Sync {
    fn on_state_changed(&self, _project: &Path, _name: &str) {}

    fn on_new_log_lines(&self, _project: &Path, _lines: &[String], _events: &[LogEvent]) {}

    fn on_signal_fired(&self, _project: &Path, _signal: &str, _timestamp: DateTime<Utc>) {}

    fn on_knowledge_changed(&self, _project: &Path, _name: &str) {}

    /// Entry point used by the broadcaster; routes to the methods above.
    fn notify(&self, notification: &Notification) {
        match notification {
            Notification::StateChanged { project, name } => self.on_state_changed(project, name),
            Notification::NewLogLines {
                project,
                lines,
                events,
                ..
            } => self.on_new_log_lines(project, lines, events),
            Notification::SignalFired {
                project,
                signal,
                timestamp,
            } => self.on_signal_fired(project, signal, *timestamp),
            Notification::KnowledgeChanged { project, name } => {
                self.on_knowledge_changed(project, name)
            }
        }
    }
}

/// Forwards every notification into a channel.
pub struct ChannelSubscriber {
    tx: Mutex<Sender<Notification>>,
}

impl ChannelSubscriber {
    pub fn new(tx: Sender<Notification>) -> Self {
        ChannelSubscriber { tx: Mutex::new(tx) }
    }
}

impl Subscriber for ChannelSubscriber {
    fn notify(&self, notification: &Notification) {
        if let Ok(tx) = self.tx.lock() {
            // A dropped receiver just means nobody is listening any more.
            let _ = tx.send(notification.clone());
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SubscriptionId(u64);

#[derive(Default)]
pub struct Broadcaster {
    next_id: AtomicU64,
    subscribers: Mutex<Vec<(SubscriptionId, Arc<dyn Subscriber>)>>,
}

impl std::fmt::Debug for Broadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broadcaster")
            .field("subscribers", &self.len())
            .finish()
    }
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, subscriber: Arc<dyn Subscriber>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push((id, subscriber));
        }
        id
    }

    /// Returns false when the id was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let Ok(mut subscribers) = self.subscribers.lock() else {
            return false;
        };
        let before = subscribers.len();
        subscribers.retain(|(existing, _)| *existing != id);
        subscribers.len() != before
    }

    pub fn len(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn publish(&self, notification: &Notification) {
        // Snapshot so subscribers can (un)subscribe from inside a callback.
        let targets: Vec<Arc<dyn Subscriber>> = match self.subscribers.lock() {
            Ok(subscribers) => subscribers.iter().map(|(_, s)| Arc::clone(s)).collect(),
            Err(_) => return,
        };
        for subscriber in targets {
            subscriber.notify(notification);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[derive(Default)]
    struct CountingSubscriber {
        state: Mutex<Vec<String>>,
    }

    impl Subscriber for CountingSubscriber {
        fn on_state_changed(&self, _project: &Path, name: &str) {
            self.state.lock().unwrap().push(name.to_string());
        }
    }

    fn state_changed(name: &str) -> Notification {
        Notification::StateChanged {
            project: PathBuf::from("/p"),
            name: name.to_string(),
        }
    }

    #[test]
    fn routes_to_typed_callbacks_and_ignores_the_rest() {
        let broadcaster = Broadcaster::new();
        let counting = Arc::new(CountingSubscriber::default());
        broadcaster.subscribe(counting.clone());

        broadcaster.publish(&state_changed("handoff.json"));
        broadcaster.publish(&Notification::KnowledgeChanged {
            project: PathBuf::from("/p"),
            name: "notes.md".to_string(),
        });

        assert_eq!(*counting.state.lock().unwrap(), vec!["handoff.json".to_string()]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let broadcaster = Broadcaster::new();
        let (tx, rx) = mpsc::channel();
        let id = broadcaster.subscribe(Arc::new(ChannelSubscriber::new(tx)));

        broadcaster.publish(&state_changed("a.json"));
        assert!(broadcaster.unsubscribe(id));
        assert!(!broadcaster.unsubscribe(id));
        broadcaster.publish(&state_changed("b.json"));

        let received: Vec<Notification> = rx.try_iter().collect();
        assert_eq!(received, vec![state_changed("a.json")]);
        assert!(broadcaster.is_empty());
    }

    #[test]
    fn notification_serializes_with_type_tag() {
        let json = serde_json::to_value(state_changed("x.json")).unwrap();
        assert_eq!(json["type"], "state_changed");
        assert_eq!(json["name"], "x.json");
        assert_eq!(json["project"], "/p");
    }
}
