//! Activity log line parsing.
//!
//! Agents append lines of the form
//!
//! ```text
//! [2025-03-01T10:15:02Z] [master-2] [TIER_CLASSIFY] id=req-42 tier=2
//! ```
//!
//! Lines that do not match are expected (stack traces, free-form notes) and
//! come back as [`ParsedLine::Unrecognized`] rather than errors. Events keep
//! the order of their lines in the file; agent clocks are never used to
//! reorder them.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;

use crate::patterns::{RE_LOG_LINE, RE_REQUEST_ID, RE_TIER};

/// Bumped whenever the accepted line format changes.
pub const LOG_GRAMMAR_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEvent {
    pub timestamp: DateTime<Utc>,
    pub agent: String,
    pub action: String,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ParsedLine {
    Recognized(LogEvent),
    Unrecognized(String),
}

impl ParsedLine {
    pub fn event(&self) -> Option<&LogEvent> {
        match self {
            ParsedLine::Recognized(event) => Some(event),
            ParsedLine::Unrecognized(_) => None,
        }
    }
}

/// Which part of the pipeline an agent plays, inferred from its id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    /// `master-1`: talks to the user and files requests.
    Interface,
    /// `master-2`: classifies and decomposes requests.
    Architect,
    /// `master-3`: hands tasks to workers and merges results.
    Allocator,
    Worker,
    Other,
}

impl AgentRole {
    pub fn of(agent: &str) -> Self {
        if agent.contains("master-1") {
            AgentRole::Interface
        } else if agent.contains("master-2") {
            AgentRole::Architect
        } else if agent.contains("master-3") {
            AgentRole::Allocator
        } else if agent.contains("worker") {
            AgentRole::Worker
        } else {
            AgentRole::Other
        }
    }
}

impl LogEvent {
    pub fn role(&self) -> AgentRole {
        AgentRole::of(&self.agent)
    }

    pub fn request_id(&self) -> Option<&str> {
        extract_request_id(&self.detail)
    }
}

pub fn parse_line(line: &str) -> ParsedLine {
    let Some(caps) = RE_LOG_LINE.captures(line) else {
        return ParsedLine::Unrecognized(line.to_string());
    };
    let Some(timestamp) = parse_timestamp(&caps[1]) else {
        return ParsedLine::Unrecognized(line.to_string());
    };

    ParsedLine::Recognized(LogEvent {
        timestamp,
        agent: caps[2].trim().to_string(),
        action: caps[3].trim().to_string(),
        detail: caps[4].trim_end().to_string(),
    })
}

pub fn parse_lines<'a, I>(lines: I) -> Vec<ParsedLine>
where
    I: IntoIterator<Item = &'a str>,
{
    lines.into_iter().map(parse_line).collect()
}

/// Parses lines and splits them into events and unrecognized raw lines,
/// each in file order.
pub fn partition<'a, I>(lines: I) -> (Vec<LogEvent>, Vec<String>)
where
    I: IntoIterator<Item = &'a str>,
{
    let mut events = Vec::new();
    let mut unrecognized = Vec::new();
    for parsed in parse_lines(lines) {
        match parsed {
            ParsedLine::Recognized(event) => events.push(event),
            ParsedLine::Unrecognized(raw) => unrecognized.push(raw),
        }
    }
    (events, unrecognized)
}

/// Accepts RFC 3339, `+hhmm` offsets, and zone-less timestamps (read as UTC).
pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// First `request_id`/`id` value in a detail string.
pub fn extract_request_id(detail: &str) -> Option<&str> {
    RE_REQUEST_ID
        .captures(detail)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

pub fn extract_tier(detail: &str) -> Option<u8> {
    RE_TIER
        .captures(detail)
        .and_then(|caps| caps[1].parse().ok())
}

/// Best-effort test of whether an event belongs to a request.
///
/// Matching is textual: the token appears anywhere in the detail, or the
/// extracted request id equals it ignoring case. A token that happens to be a
/// substring of unrelated text will match too.
pub fn correlates(event: &LogEvent, token: &str) -> bool {
    let token = token.trim();
    if token.is_empty() {
        return true;
    }
    event.detail.contains(token)
        || event
            .request_id()
            .is_some_and(|id| id.eq_ignore_ascii_case(token))
}
