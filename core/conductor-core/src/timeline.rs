//! Phase timeline reconstruction from activity log events.
//!
//! Phases are inferred from a fixed rule table mapping `(agent role, action)`
//! to phase transitions. The tracker folds events in file order; a snapshot
//! turns the accumulated state into a list of phases for a given "now".
//!
//! | Role | Action | Effect |
//! |---|---|---|
//! | interface | `REQUEST` | open `handoff` |
//! | architect | `TIER_CLASSIFY` | close `handoff`, open `triage` |
//! | architect | `TIER1_EXECUTE`, `TIER2_ASSIGN` | close `triage` |
//! | architect | `DECOMPOSE_START` | close `triage`, open `decomposition` |
//! | architect | `DECOMPOSE_DONE` | close `decomposition` |
//! | allocator | `ALLOCATE` | span `allocation` |
//! | worker | `TASK_CLAIMED` | open `worker` |
//! | worker | `COMPLETE` | close `worker` |
//! | allocator | `MERGE_PR` | instant `integration` |
//!
//! Re-opening a phase that is still open closes the earlier one at the new
//! event. Worker phases are reported while open, ending at "now"; the others
//! only appear once closed.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::events::{AgentRole, LogEvent};

// ═══════════════════════════════════════════════════════════════════════════════
// Configuration
// ═══════════════════════════════════════════════════════════════════════════════

/// `[timeline]` section of the observer config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelineConfig {
    /// Gaps longer than this within one agent's lane are dead time.
    pub dead_time_threshold_ms: u64,
    /// Added after the last `ALLOCATE` so the span has visible width.
    pub allocation_settle_ms: u64,
    /// Width of the instant `integration` phase ending at `MERGE_PR`.
    pub integration_lookback_ms: u64,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            dead_time_threshold_ms: 5_000,
            allocation_settle_ms: 2_000,
            integration_lookback_ms: 5_000,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Rule Table
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Open,
    Close,
    /// Reduces every trigger into one phase from the first to the last.
    Span,
    /// A fixed lookback window ending at the event.
    Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    /// The lane is named by the rule, whichever agent id logged the event.
    Fixed(&'static str),
    /// The lane is the logging agent itself (one lane per worker).
    EventAgent,
}

#[derive(Debug, Clone, Copy)]
pub struct PhaseEffect {
    pub phase: &'static str,
    pub owner: Owner,
    pub transition: Transition,
}

#[derive(Debug, Clone, Copy)]
pub struct PhaseRule {
    pub role: AgentRole,
    pub actions: &'static [&'static str],
    pub effects: &'static [PhaseEffect],
}

const fn effect(phase: &'static str, owner: Owner, transition: Transition) -> PhaseEffect {
    PhaseEffect {
        phase,
        owner,
        transition,
    }
}

const M1: Owner = Owner::Fixed("master-1");
const M2: Owner = Owner::Fixed("master-2");
const M3: Owner = Owner::Fixed("master-3");

pub static DEFAULT_RULES: &[PhaseRule] = &[
    PhaseRule {
        role: AgentRole::Interface,
        actions: &["REQUEST"],
        effects: &[effect("handoff", M1, Transition::Open)],
    },
    PhaseRule {
        role: AgentRole::Architect,
        actions: &["TIER_CLASSIFY"],
        effects: &[
            effect("handoff", M1, Transition::Close),
            effect("triage", M2, Transition::Open),
        ],
    },
    PhaseRule {
        role: AgentRole::Architect,
        actions: &["TIER1_EXECUTE", "TIER2_ASSIGN"],
        effects: &[effect("triage", M2, Transition::Close)],
    },
    PhaseRule {
        role: AgentRole::Architect,
        actions: &["DECOMPOSE_START"],
        effects: &[
            effect("triage", M2, Transition::Close),
            effect("decomposition", M2, Transition::Open),
        ],
    },
    PhaseRule {
        role: AgentRole::Architect,
        actions: &["DECOMPOSE_DONE"],
        effects: &[effect("decomposition", M2, Transition::Close)],
    },
    PhaseRule {
        role: AgentRole::Allocator,
        actions: &["ALLOCATE"],
        effects: &[effect("allocation", M3, Transition::Span)],
    },
    PhaseRule {
        role: AgentRole::Worker,
        actions: &["TASK_CLAIMED"],
        effects: &[effect("worker", Owner::EventAgent, Transition::Open)],
    },
    PhaseRule {
        role: AgentRole::Worker,
        actions: &["COMPLETE"],
        effects: &[effect("worker", Owner::EventAgent, Transition::Close)],
    },
    PhaseRule {
        role: AgentRole::Allocator,
        actions: &["MERGE_PR"],
        effects: &[effect("integration", M3, Transition::Instant)],
    },
];

/// Phases reported while still open.
pub static SHOWN_WHILE_OPEN: &[&str] = &["worker"];

// ═══════════════════════════════════════════════════════════════════════════════
// Phases
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Phase {
    pub name: String,
    pub agent: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// True while the end is provisional ("now").
    pub open: bool,
    /// Dead time between the previous phase in this lane and this one.
    pub idle_before_ms: Option<i64>,
}

impl Phase {
    pub fn duration(&self) -> Duration {
        (self.end - self.start).max(Duration::zero())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Timeline {
    /// Sorted by start time.
    pub phases: Vec<Phase>,
}

impl Timeline {
    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    pub fn longest(&self) -> Option<&Phase> {
        // First of equal durations wins.
        self.phases
            .iter()
            .fold(None, |best: Option<&Phase>, phase| match best {
                Some(b) if b.duration() >= phase.duration() => Some(b),
                _ => Some(phase),
            })
    }

    pub fn bounds(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let start = self.phases.iter().map(|p| p.start).min()?;
        let end = self.phases.iter().map(|p| p.end).max()?;
        Some((start, end))
    }

    /// Lane names: non-worker agents first, then workers, each in order of
    /// first appearance.
    pub fn lanes(&self) -> Vec<String> {
        let mut masters: Vec<String> = Vec::new();
        let mut workers: Vec<String> = Vec::new();
        for phase in &self.phases {
            let bucket = if AgentRole::of(&phase.agent) == AgentRole::Worker {
                &mut workers
            } else {
                &mut masters
            };
            if !bucket.contains(&phase.agent) {
                bucket.push(phase.agent.clone());
            }
        }
        masters.extend(workers);
        masters
    }

    pub fn dead_time_total(&self) -> Duration {
        Duration::milliseconds(self.phases.iter().filter_map(|p| p.idle_before_ms).sum())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tracker
// ═══════════════════════════════════════════════════════════════════════════════

type LaneKey = (String, String);

/// Folds events into phases. Keep one per timeline being built.
#[derive(Debug)]
pub struct PhaseTracker {
    config: TimelineConfig,
    rules: &'static [PhaseRule],
    open: BTreeMap<LaneKey, DateTime<Utc>>,
    spans: BTreeMap<LaneKey, (DateTime<Utc>, DateTime<Utc>)>,
    closed: Vec<Phase>,
}

impl PhaseTracker {
    pub fn new(config: TimelineConfig) -> Self {
        Self::with_rules(config, DEFAULT_RULES)
    }

    pub fn with_rules(config: TimelineConfig, rules: &'static [PhaseRule]) -> Self {
        PhaseTracker {
            config,
            rules,
            open: BTreeMap::new(),
            spans: BTreeMap::new(),
            closed: Vec::new(),
        }
    }

    pub fn ingest(&mut self, event: &LogEvent) {
        let role = event.role();
        let rules = self.rules;
        for rule in rules
            .iter()
            .filter(|r| r.role == role && r.actions.contains(&event.action.as_str()))
        {
            for effect in rule.effects {
                self.apply(effect, event);
            }
        }
    }

    fn apply(&mut self, effect: &PhaseEffect, event: &LogEvent) {
        let owner = match effect.owner {
            Owner::Fixed(name) => name.to_string(),
            Owner::EventAgent => event.agent.clone(),
        };
        let key = (effect.phase.to_string(), owner);
        let t = event.timestamp;

        match effect.transition {
            Transition::Open => {
                if let Some(start) = self.open.insert(key.clone(), t) {
                    self.push_closed(&key, start, t);
                }
            }
            Transition::Close => {
                if let Some(start) = self.open.remove(&key) {
                    self.push_closed(&key, start, t);
                }
            }
            Transition::Span => {
                self.spans
                    .entry(key)
                    .and_modify(|(min, max)| {
                        *min = (*min).min(t);
                        *max = (*max).max(t);
                    })
                    .or_insert((t, t));
            }
            Transition::Instant => {
                let lookback = Duration::milliseconds(self.config.integration_lookback_ms as i64);
                self.push_closed(&key, t - lookback, t);
            }
        }
    }

    fn push_closed(&mut self, key: &LaneKey, start: DateTime<Utc>, end: DateTime<Utc>) {
        self.closed.push(Phase {
            name: key.0.clone(),
            agent: key.1.clone(),
            start,
            // Skewed agent clocks can report a close before its open.
            end: end.max(start),
            open: false,
            idle_before_ms: None,
        });
    }

    /// Phases as of `now`. Open phases shown while open end at `now`.
    pub fn snapshot(&self, now: DateTime<Utc>) -> Timeline {
        let settle = Duration::milliseconds(self.config.allocation_settle_ms as i64);

        let mut phases = self.closed.clone();
        phases.extend(self.spans.iter().map(|((name, agent), (min, max))| Phase {
            name: name.clone(),
            agent: agent.clone(),
            start: *min,
            end: *max + settle,
            open: false,
            idle_before_ms: None,
        }));
        phases.extend(
            self.open
                .iter()
                .filter(|((name, _), _)| SHOWN_WHILE_OPEN.contains(&name.as_str()))
                .map(|((name, agent), start)| Phase {
                    name: name.clone(),
                    agent: agent.clone(),
                    start: *start,
                    end: now.max(*start),
                    open: true,
                    idle_before_ms: None,
                }),
        );

        phases.sort_by_key(|p| p.start);
        annotate_dead_time(&mut phases, self.config.dead_time_threshold_ms);
        Timeline { phases }
    }
}

fn annotate_dead_time(phases: &mut [Phase], threshold_ms: u64) {
    let mut previous_end: BTreeMap<String, DateTime<Utc>> = BTreeMap::new();
    for phase in phases.iter_mut() {
        if let Some(prev_end) = previous_end.get(&phase.agent) {
            let gap = (phase.start - *prev_end).num_milliseconds();
            if gap > threshold_ms as i64 {
                phase.idle_before_ms = Some(gap);
            }
        }
        previous_end.insert(phase.agent.clone(), phase.end);
    }
}

/// Builds a timeline from events in file order.
pub fn reconstruct<'a, I>(events: I, config: &TimelineConfig, now: DateTime<Utc>) -> Timeline
where
    I: IntoIterator<Item = &'a LogEvent>,
{
    let mut tracker = PhaseTracker::new(config.clone());
    for event in events {
        tracker.ingest(event);
    }
    tracker.snapshot(now)
}
