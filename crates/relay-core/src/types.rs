use chrono::{DateTime, Utc};

/// A platform-native message/event timestamp, treated as an opaque string
/// throughout the core — the spec's two-way index keys on these verbatim
/// (Slack-style string timestamps, not integers), see spec.md §3.
pub type PlatformTs = String;

/// Stable platform identifier (user, channel, DM) — also treated opaquely.
pub type PlatformId = String;

/// Current wall-clock time as an RFC3339 string, the format every persisted
/// timestamp in this crate uses — matches `skynet-sessions`'s
/// `chrono::Utc::now().to_rfc3339()` convention.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

/// Parse a persisted RFC3339 timestamp back into a `DateTime<Utc>`.
pub fn parse_rfc3339(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.with_timezone(&Utc))
}

/// Suffix applied to a parent entry's timestamps to synthesize the
/// "uploaded file" log entry's own timestamp pair (spec.md §3).
pub const ATTACHMENT_TS_SUFFIX: &str = "a";

pub fn attachment_ts(parent_ts: &str) -> String {
    format!("{parent_ts}{ATTACHMENT_TS_SUFFIX}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attachment_ts_appends_suffix() {
        assert_eq!(attachment_ts("1234.5678"), "1234.5678a");
    }

    #[test]
    fn rfc3339_roundtrips() {
        let s = now_rfc3339();
        assert!(parse_rfc3339(&s).is_some());
    }
}
