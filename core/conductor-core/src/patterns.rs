//! Compiled regex patterns for the activity log and git config.
//!
//! Compiled once on first use. Update these together with
//! [`crate::events::LOG_GRAMMAR_VERSION`] when the agents change their log format.

use once_cell::sync::Lazy;
use regex::Regex;

// ═══════════════════════════════════════════════════════════════════════════════
// Activity Log Grammar
// ═══════════════════════════════════════════════════════════════════════════════

/// `[timestamp] [agent] [ACTION] detail`, with optional whitespace between groups.
pub static RE_LOG_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\u{FEFF}?\s*\[(\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:?\d{2})?)\]\s*\[([^\]]+)\]\s*\[([^\]]+)\]\s*(.*)$",
    )
    .unwrap()
});

// ═══════════════════════════════════════════════════════════════════════════════
// Detail Field Extraction
// ═══════════════════════════════════════════════════════════════════════════════

pub static RE_REQUEST_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:request_id|id)[=:\s]*([^\s,\]]+)").unwrap());
pub static RE_TIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\btier[=:\s]*(\d)").unwrap());

// ═══════════════════════════════════════════════════════════════════════════════
// Git Config
// ═══════════════════════════════════════════════════════════════════════════════

pub static RE_GIT_ORIGIN_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\[remote "origin"\][^\[]*?url\s*=\s*(\S+)"#).unwrap());

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_line_captures_all_groups() {
        let caps = RE_LOG_LINE
            .captures("[2025-01-02T03:04:05Z] [master-2] [TIER_CLASSIFY] id=req-7 tier=2")
            .unwrap();
        assert_eq!(&caps[1], "2025-01-02T03:04:05Z");
        assert_eq!(&caps[2], "master-2");
        assert_eq!(&caps[3], "TIER_CLASSIFY");
        assert_eq!(&caps[4], "id=req-7 tier=2");
    }

    #[test]
    fn log_line_tolerates_missing_spaces_and_offsets() {
        let caps = RE_LOG_LINE
            .captures("[2025-01-02T03:04:05.123+02:00][worker-1][COMPLETE]")
            .unwrap();
        assert_eq!(&caps[2], "worker-1");
        assert_eq!(&caps[4], "");
    }

    #[test]
    fn request_id_matches_any_id_suffix() {
        let caps = RE_REQUEST_ID.captures("request_id: abc-1, tier=1").unwrap();
        assert_eq!(&caps[1], "abc-1");
        let caps = RE_REQUEST_ID.captures("picked task_id=T1").unwrap();
        assert_eq!(&caps[1], "T1");
        let caps = RE_REQUEST_ID.captures("id:REQ-2]").unwrap();
        assert_eq!(&caps[1], "REQ-2");
    }

    #[test]
    fn git_origin_url_found_after_other_sections() {
        let config = "[core]\n\tbare = false\n[remote \"origin\"]\n\turl = git@github.com:acme/app.git\n\tfetch = +refs/heads/*\n";
        let caps = RE_GIT_ORIGIN_URL.captures(config).unwrap();
        assert_eq!(&caps[1], "git@github.com:acme/app.git");
    }
}
