//! Agent health derived from `agent-health.json`.
//!
//! The document is written by the agents themselves:
//!
//! ```json
//! {
//!   "master-2": { "status": "active", "tier1_count": 2, "decomposition_count": 1 },
//!   "master-3": { "status": "active", "context_budget": 3100, "started_at": "..." },
//!   "workers": {
//!     "worker-1": { "status": "busy", "context_budget": 7300, "tasks_completed": 3,
//!                   "last_heartbeat": "...", "current_task": "...", "domain": "api" }
//!   }
//! }
//! ```
//!
//! [`evaluate`] is a pure function of that value, the thresholds and "now".
//! It keeps nothing between calls. Missing fields count as zero.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::events::{parse_timestamp, AgentRole};

pub const HEALTH_DOCUMENT: &str = "agent-health.json";

// ═══════════════════════════════════════════════════════════════════════════════
// Thresholds
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchitectThresholds {
    pub tier1_quota: i64,
    pub decomposition_quota: i64,
    /// Reset is imminent once either remaining count drops to this.
    pub imminent_remaining: i64,
}

impl Default for ArchitectThresholds {
    fn default() -> Self {
        Self {
            tier1_quota: 4,
            decomposition_quota: 6,
            imminent_remaining: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocatorThresholds {
    pub budget_limit: i64,
    pub imminent_budget: i64,
    pub imminent_uptime_mins: i64,
    pub uptime_display_mins: i64,
}

impl Default for AllocatorThresholds {
    fn default() -> Self {
        Self {
            budget_limit: 5_000,
            imminent_budget: 4_500,
            imminent_uptime_mins: 18,
            uptime_display_mins: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerThresholds {
    pub budget_limit: i64,
    pub imminent_budget_percent: u8,
    pub imminent_tasks: i64,
    pub task_display: i64,
    /// Heartbeats older than this mark the worker dead.
    pub stale_heartbeat_secs: i64,
}

impl Default for WorkerThresholds {
    fn default() -> Self {
        Self {
            budget_limit: 8_000,
            imminent_budget_percent: 90,
            imminent_tasks: 5,
            task_display: 6,
            stale_heartbeat_secs: 90,
        }
    }
}

/// `[health]` section of the observer config.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthThresholds {
    pub architect: ArchitectThresholds,
    pub allocator: AllocatorThresholds,
    pub workers: WorkerThresholds,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Records
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    Warning,
    Resetting,
    Dead,
    Reported(String),
}

impl HealthStatus {
    pub fn label(&self) -> &str {
        match self {
            HealthStatus::Warning => "warning",
            HealthStatus::Resetting => "resetting",
            HealthStatus::Dead => "dead",
            HealthStatus::Reported(status) => status,
        }
    }
}

impl Serialize for HealthStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

/// One gauge on a health card, e.g. "Context budget 7300/8000".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BudgetMetric {
    pub label: &'static str,
    pub value: i64,
    pub limit: i64,
    pub remaining: i64,
    /// 0..=100
    pub percent: u8,
}

impl BudgetMetric {
    /// Context budgets truncate.
    fn floor(label: &'static str, value: i64, limit: i64) -> Self {
        Self::build(label, value, limit, (value as f64 / limit as f64 * 100.0).floor())
    }

    /// Counters round to nearest.
    fn round(label: &'static str, value: i64, limit: i64) -> Self {
        Self::build(label, value, limit, (value as f64 / limit as f64 * 100.0).round())
    }

    fn build(label: &'static str, value: i64, limit: i64, raw_percent: f64) -> Self {
        let percent = if limit <= 0 || !raw_percent.is_finite() {
            100
        } else {
            raw_percent.clamp(0.0, 100.0) as u8
        };
        BudgetMetric {
            label,
            value,
            limit,
            remaining: limit.saturating_sub(value),
            percent,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentHealthRecord {
    pub agent: String,
    pub role: AgentRole,
    /// Status string exactly as reported, if any.
    pub raw_status: Option<String>,
    pub status: HealthStatus,
    pub reset_imminent: bool,
    pub metrics: Vec<BudgetMetric>,
    pub heartbeat_age_secs: Option<i64>,
    pub uptime_mins: Option<i64>,
    pub current_task: Option<String>,
    pub domain: Option<String>,
    pub last_reset: Option<String>,
}

impl AgentHealthRecord {
    pub fn metric(&self, label: &str) -> Option<&BudgetMetric> {
        self.metrics.iter().find(|m| m.label == label)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    /// Architect, allocator, then workers by id.
    pub records: Vec<AgentHealthRecord>,
    /// Masters currently resetting; others defer their own reset meanwhile.
    pub resetting: Vec<String>,
}

impl HealthReport {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, agent: &str) -> Option<&AgentHealthRecord> {
        self.records.iter().find(|r| r.agent == agent)
    }

    /// Banner text shown while a master resets, e.g.
    /// `master-2 resetting, master-3 reset deferred until complete`.
    pub fn stagger_message(&self) -> Option<String> {
        if self.resetting.is_empty() {
            return None;
        }
        let deferred: Vec<&str> = ["master-2", "master-3"]
            .into_iter()
            .filter(|m| !self.resetting.iter().any(|r| r == m))
            .collect();
        let mut message = format!("{} resetting", self.resetting.join(", "));
        if !deferred.is_empty() {
            message.push_str(&format!(
                ", {} reset deferred until complete",
                deferred.join(", ")
            ));
        }
        Some(message)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Evaluation
// ═══════════════════════════════════════════════════════════════════════════════

pub fn evaluate(doc: Option<&Value>, thresholds: &HealthThresholds, now: DateTime<Utc>) -> HealthReport {
    let Some(doc) = doc.and_then(Value::as_object) else {
        return HealthReport::default();
    };

    let mut records = Vec::new();
    if let Some(m2) = doc.get("master-2").filter(|v| v.is_object()) {
        records.push(architect_record(m2, &thresholds.architect));
    }
    if let Some(m3) = doc.get("master-3").filter(|v| v.is_object()) {
        records.push(allocator_record(m3, &thresholds.allocator, now));
    }
    if let Some(workers) = doc.get("workers").and_then(Value::as_object) {
        let mut ids: Vec<&String> = workers.keys().collect();
        ids.sort();
        for id in ids {
            if let Some(worker) = workers.get(id).filter(|v| v.is_object()) {
                records.push(worker_record(id, worker, &thresholds.workers, now));
            }
        }
    }

    let resetting = records
        .iter()
        .filter(|r| matches!(r.role, AgentRole::Architect | AgentRole::Allocator))
        .filter(|r| r.raw_status.as_deref() == Some("resetting"))
        .map(|r| r.agent.clone())
        .collect();

    HealthReport { records, resetting }
}

fn architect_record(v: &Value, t: &ArchitectThresholds) -> AgentHealthRecord {
    let tier1 = BudgetMetric::round("tier1_executions", int(v, "tier1_count"), t.tier1_quota);
    let decomp = BudgetMetric::round(
        "decompositions",
        int(v, "decomposition_count"),
        t.decomposition_quota,
    );
    let reset_imminent =
        tier1.remaining <= t.imminent_remaining || decomp.remaining <= t.imminent_remaining;

    base_record("master-2", AgentRole::Architect, v, "active", reset_imminent, false, vec![tier1, decomp])
}

fn allocator_record(v: &Value, t: &AllocatorThresholds, now: DateTime<Utc>) -> AgentHealthRecord {
    let budget_value = int(v, "context_budget");
    let budget = BudgetMetric::floor("context_budget", budget_value, t.budget_limit);
    let uptime_mins = text(v, "started_at")
        .and_then(|raw| parse_timestamp(&raw))
        .map(|started| (now - started).num_minutes().max(0));

    let mut metrics = vec![budget];
    if let Some(mins) = uptime_mins {
        metrics.push(BudgetMetric::floor("uptime_mins", mins, t.uptime_display_mins));
    }
    let reset_imminent = budget_value >= t.imminent_budget
        || uptime_mins.is_some_and(|mins| mins >= t.imminent_uptime_mins);

    let mut record = base_record("master-3", AgentRole::Allocator, v, "active", reset_imminent, false, metrics);
    record.uptime_mins = uptime_mins;
    record
}

fn worker_record(id: &str, v: &Value, t: &WorkerThresholds, now: DateTime<Utc>) -> AgentHealthRecord {
    let budget = BudgetMetric::floor("context_budget", int(v, "context_budget"), t.budget_limit);
    let tasks_completed = int(v, "tasks_completed");
    let tasks = BudgetMetric::round("tasks_completed", tasks_completed, t.task_display);
    let heartbeat_age_secs = text(v, "last_heartbeat")
        .and_then(|raw| parse_timestamp(&raw))
        .map(|hb| (now - hb).num_seconds());
    let dead = heartbeat_age_secs.is_some_and(|age| age > t.stale_heartbeat_secs);
    let reset_imminent =
        budget.percent >= t.imminent_budget_percent || tasks_completed >= t.imminent_tasks;

    let mut record = base_record(id, AgentRole::Worker, v, "idle", reset_imminent, dead, vec![budget, tasks]);
    record.heartbeat_age_secs = heartbeat_age_secs;
    record.current_task = text(v, "current_task");
    record.domain = text(v, "domain");
    record
}

fn base_record(
    agent: &str,
    role: AgentRole,
    v: &Value,
    default_status: &str,
    reset_imminent: bool,
    dead: bool,
    metrics: Vec<BudgetMetric>,
) -> AgentHealthRecord {
    let raw_status = text(v, "status");
    let status = if reset_imminent {
        HealthStatus::Warning
    } else if raw_status.as_deref() == Some("resetting") {
        HealthStatus::Resetting
    } else if dead {
        HealthStatus::Dead
    } else {
        HealthStatus::Reported(
            raw_status
                .clone()
                .unwrap_or_else(|| default_status.to_string()),
        )
    };

    AgentHealthRecord {
        agent: agent.to_string(),
        role,
        raw_status,
        status,
        reset_imminent,
        metrics,
        heartbeat_age_secs: None,
        uptime_mins: None,
        current_task: None,
        domain: None,
        last_reset: text(v, "last_reset"),
    }
}

/// Integer field; accepts numbers and numeric strings, otherwise 0.
fn int(v: &Value, key: &str) -> i64 {
    match v.get(key) {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

fn text(v: &Value, key: &str) -> Option<String> {
    v.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    fn iso(dt: DateTime<Utc>) -> String {
        dt.to_rfc3339()
    }

    fn eval(doc: Value) -> HealthReport {
        evaluate(Some(&doc), &HealthThresholds::default(), now())
    }

    #[test]
    fn missing_document_yields_empty_report() {
        assert!(evaluate(None, &HealthThresholds::default(), now()).is_empty());
        assert!(eval(json!("not an object")).is_empty());
    }

    #[test]
    fn architect_imminent_when_quota_nearly_spent() {
        let report = eval(json!({"master-2": {"tier1_count": 3, "decomposition_count": 1}}));
        let m2 = report.get("master-2").unwrap();
        assert!(m2.reset_imminent);
        assert_eq!(m2.status, HealthStatus::Warning);
        assert_eq!(m2.metric("tier1_executions").unwrap().remaining, 1);
        assert_eq!(m2.metric("tier1_executions").unwrap().percent, 75);

        let calm = eval(json!({"master-2": {"tier1_count": 1, "decomposition_count": 2, "status": "active"}}));
        let m2 = calm.get("master-2").unwrap();
        assert!(!m2.reset_imminent);
        assert_eq!(m2.status.label(), "active");
    }

    #[test]
    fn allocator_uptime_and_budget() {
        let started = iso(now() - Duration::minutes(19));
        let report = eval(json!({"master-3": {"context_budget": 1000, "started_at": started}}));
        let m3 = report.get("master-3").unwrap();
        assert_eq!(m3.uptime_mins, Some(19));
        assert!(m3.reset_imminent);
        assert_eq!(m3.metric("context_budget").unwrap().percent, 20);
        assert_eq!(m3.metric("uptime_mins").unwrap().percent, 95);

        let over_budget = eval(json!({"master-3": {"context_budget": 4500}}));
        assert!(over_budget.get("master-3").unwrap().reset_imminent);

        let fine = eval(json!({"master-3": {"context_budget": "4499"}}));
        assert!(!fine.get("master-3").unwrap().reset_imminent);
    }

    #[test]
    fn worker_budget_percent_clamped_and_floored() {
        let report = eval(json!({"workers": {
            "worker-2": {"context_budget": 9000},
            "worker-1": {"context_budget": 7199, "tasks_completed": 1, "status": "busy"}
        }}));

        let ids: Vec<&str> = report.records.iter().map(|r| r.agent.as_str()).collect();
        assert_eq!(ids, vec!["worker-1", "worker-2"]);

        let w1 = report.get("worker-1").unwrap();
        assert_eq!(w1.metric("context_budget").unwrap().percent, 89);
        assert!(!w1.reset_imminent);
        assert_eq!(w1.status.label(), "busy");

        let w2 = report.get("worker-2").unwrap();
        assert_eq!(w2.metric("context_budget").unwrap().percent, 100);
        assert_eq!(w2.metric("context_budget").unwrap().remaining, -1000);
        assert!(w2.reset_imminent);
    }

    #[test]
    fn extreme_budget_values_saturate() {
        let report = eval(json!({"workers": {
            "worker-1": {"context_budget": -1e300},
            "worker-2": {"context_budget": 1e300}
        }}));

        let w1 = report.get("worker-1").unwrap().metric("context_budget").unwrap();
        assert_eq!(w1.percent, 0);
        assert_eq!(w1.remaining, i64::MAX);

        let w2 = report.get("worker-2").unwrap().metric("context_budget").unwrap();
        assert_eq!(w2.percent, 100);
        assert!(w2.remaining < 0);
    }

    #[test]
    fn worker_tasks_trigger_imminent_reset() {
        let report = eval(json!({"workers": {"worker-1": {"tasks_completed": 5}}}));
        let w1 = report.get("worker-1").unwrap();
        assert!(w1.reset_imminent);
        assert_eq!(w1.metric("tasks_completed").unwrap().percent, 83);
    }

    #[test]
    fn stale_heartbeat_marks_worker_dead() {
        let report = eval(json!({"workers": {
            "worker-1": {"status": "busy", "last_heartbeat": iso(now() - Duration::seconds(91))},
            "worker-2": {"status": "busy", "last_heartbeat": iso(now() - Duration::seconds(90))}
        }}));
        assert_eq!(report.get("worker-1").unwrap().status, HealthStatus::Dead);
        assert_eq!(report.get("worker-1").unwrap().heartbeat_age_secs, Some(91));
        assert_eq!(report.get("worker-2").unwrap().status.label(), "busy");
    }

    #[test]
    fn resetting_masters_reported_for_stagger_banner() {
        let report = eval(json!({
            "master-2": {"status": "resetting"},
            "master-3": {"status": "active"}
        }));
        assert_eq!(report.resetting, vec!["master-2".to_string()]);
        assert_eq!(report.get("master-2").unwrap().status, HealthStatus::Resetting);
        assert_eq!(
            report.stagger_message().unwrap(),
            "master-2 resetting, master-3 reset deferred until complete"
        );

        assert!(eval(json!({"master-2": {"status": "active"}})).stagger_message().is_none());
    }

    #[test]
    fn custom_thresholds_apply() {
        let mut thresholds = HealthThresholds::default();
        thresholds.workers.budget_limit = 10_000;
        let doc = json!({"workers": {"worker-1": {"context_budget": 8500}}});
        let report = evaluate(Some(&doc), &thresholds, now());
        assert_eq!(report.get("worker-1").unwrap().metric("context_budget").unwrap().percent, 85);
    }
}
