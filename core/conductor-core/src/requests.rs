//! Request-level views over the event stream: which requests exist, how far
//! each has progressed, and whole-session counters.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

use crate::events::{correlates, extract_tier, AgentRole, LogEvent};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestStage {
    Pending,
    Classified,
    Decomposing,
    Allocating,
    Executing,
    Completed,
    /// Any other latest action, lowercased.
    Other(String),
}

impl RequestStage {
    fn from_action(action: &str) -> Self {
        match action {
            "COMPLETE" | "MERGE_PR" => RequestStage::Completed,
            "TASK_CLAIMED" => RequestStage::Executing,
            "ALLOCATE" => RequestStage::Allocating,
            "DECOMPOSE_START" => RequestStage::Decomposing,
            "TIER_CLASSIFY" => RequestStage::Classified,
            other => RequestStage::Other(other.to_lowercase()),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            RequestStage::Pending => "pending",
            RequestStage::Classified => "classified",
            RequestStage::Decomposing => "decomposing",
            RequestStage::Allocating => "allocating",
            RequestStage::Executing => "executing",
            RequestStage::Completed => "completed",
            RequestStage::Other(action) => action,
        }
    }
}

impl fmt::Display for RequestStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl Serialize for RequestStage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestSummary {
    pub id: String,
    /// `None` for a request only known from the pending handoff document.
    pub first_seen: Option<DateTime<Utc>>,
    pub agent: String,
    pub action: String,
    pub tier: Option<u8>,
    pub stage: RequestStage,
}

/// Stage of a request from its latest correlated event.
pub fn request_stage(events: &[LogEvent], request_id: &str) -> RequestStage {
    events
        .iter()
        .rev()
        .find(|e| correlates(e, request_id))
        .map(|e| RequestStage::from_action(&e.action))
        .unwrap_or(RequestStage::Pending)
}

/// Tier assigned by the latest `TIER_CLASSIFY` for the request.
pub fn request_tier(events: &[LogEvent], request_id: &str) -> Option<u8> {
    events
        .iter()
        .rev()
        .filter(|e| e.action == "TIER_CLASSIFY" && e.role() == AgentRole::Architect)
        .filter(|e| e.request_id().is_some_and(|id| id == request_id))
        .find_map(|e| extract_tier(&e.detail))
}

/// Requests in first-seen order.
///
/// `pending_handoff` is the `request_id` of the current handoff document; it
/// is listed first when the log has not mentioned it yet.
pub fn discover_requests(events: &[LogEvent], pending_handoff: Option<&str>) -> Vec<RequestSummary> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut requests = Vec::new();

    for event in events {
        let Some(id) = event.request_id() else {
            continue;
        };
        if !seen.insert(id) {
            continue;
        }
        requests.push(RequestSummary {
            id: id.to_string(),
            first_seen: Some(event.timestamp),
            agent: event.agent.clone(),
            action: event.action.clone(),
            tier: request_tier(events, id),
            stage: request_stage(events, id),
        });
    }

    if let Some(id) = pending_handoff.map(str::trim).filter(|id| !id.is_empty()) {
        if !seen.contains(id) {
            requests.insert(
                0,
                RequestSummary {
                    id: id.to_string(),
                    first_seen: None,
                    agent: "master-1".to_string(),
                    action: "REQUEST".to_string(),
                    tier: None,
                    stage: RequestStage::Pending,
                },
            );
        }
    }

    requests
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResetCounts {
    pub architect: u32,
    pub allocator: u32,
    pub workers: u32,
}

impl ResetCounts {
    pub fn total(&self) -> u32 {
        self.architect + self.allocator + self.workers
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub session_start: Option<DateTime<Utc>>,
    pub total_events: usize,
    pub request_ids: Vec<String>,
    /// Tier number to the request ids classified into it.
    pub tiers: BTreeMap<u8, Vec<String>>,
    pub resets: ResetCounts,
}

pub fn session_stats(events: &[LogEvent]) -> SessionStats {
    let mut stats = SessionStats {
        session_start: events.first().map(|e| e.timestamp),
        total_events: events.len(),
        ..Default::default()
    };

    for event in events {
        let request_id = event.request_id();
        if let Some(id) = request_id {
            if !stats.request_ids.iter().any(|known| known == id) {
                stats.request_ids.push(id.to_string());
            }
        }

        match event.action.as_str() {
            "TIER_CLASSIFY" => {
                if let (Some(tier), Some(id)) = (extract_tier(&event.detail), request_id) {
                    if (1..=3).contains(&tier) {
                        stats.tiers.entry(tier).or_default().push(id.to_string());
                    }
                }
            }
            "RESET" | "CONTEXT_RESET" => match event.role() {
                AgentRole::Architect => stats.resets.architect += 1,
                AgentRole::Allocator => stats.resets.allocator += 1,
                AgentRole::Worker => stats.resets.workers += 1,
                _ => {}
            },
            _ => {}
        }
    }

    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::partition;

    fn events(lines: &[&str]) -> Vec<LogEvent> {
        partition(lines.iter().copied()).0
    }

    const LOG: &[&str] = &[
        "[2025-03-01T10:00:00Z] [master-1] [REQUEST] id=req-1 add login",
        "[2025-03-01T10:00:02Z] [master-2] [TIER_CLASSIFY] id=req-1 tier=2",
        "[2025-03-01T10:00:03Z] [master-1] [REQUEST] id=req-2 fix typo",
        "[2025-03-01T10:00:04Z] [master-2] [TIER_CLASSIFY] id=req-2 tier=1",
        "[2025-03-01T10:00:05Z] [master-3] [ALLOCATE] task for req-1",
        "[2025-03-01T10:00:06Z] [worker-1] [TASK_CLAIMED] req-1 task 1",
        "[2025-03-01T10:00:07Z] [master-2] [TIER1_EXECUTE] id=req-2",
        "[2025-03-01T10:00:09Z] [worker-1] [CONTEXT_RESET] budget",
        "[2025-03-01T10:00:10Z] [master-3] [RESET] uptime",
    ];

    #[test]
    fn stage_follows_latest_correlated_event() {
        let events = events(LOG);
        assert_eq!(request_stage(&events, "req-1"), RequestStage::Executing);
        assert_eq!(request_stage(&events, "req-2").label(), "tier1_execute");
        assert_eq!(request_stage(&events, "req-9"), RequestStage::Pending);
    }

    #[test]
    fn discovers_requests_in_first_seen_order_with_tiers() {
        let events = events(LOG);
        let requests = discover_requests(&events, Some("req-3"));

        let ids: Vec<&str> = requests.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["req-3", "req-1", "req-2"]);
        assert_eq!(requests[0].stage, RequestStage::Pending);
        assert_eq!(requests[1].tier, Some(2));
        assert_eq!(requests[2].tier, Some(1));
        assert_eq!(requests[1].action, "REQUEST");
    }

    #[test]
    fn pending_handoff_not_duplicated() {
        let events = events(LOG);
        let requests = discover_requests(&events, Some("req-1"));
        assert_eq!(requests.len(), 2);
    }

    #[test]
    fn session_stats_counts() {
        let stats = session_stats(&events(LOG));
        assert_eq!(stats.total_events, 9);
        assert_eq!(stats.request_ids, vec!["req-1".to_string(), "req-2".to_string()]);
        assert_eq!(stats.tiers.get(&2), Some(&vec!["req-1".to_string()]));
        assert_eq!(stats.tiers.get(&1), Some(&vec!["req-2".to_string()]));
        assert_eq!(
            stats.resets,
            ResetCounts {
                architect: 0,
                allocator: 1,
                workers: 1
            }
        );
        assert_eq!(stats.resets.total(), 2);
    }

    #[test]
    fn empty_log_stats() {
        let stats = session_stats(&[]);
        assert_eq!(stats.session_start, None);
        assert!(stats.request_ids.is_empty());
    }
}
