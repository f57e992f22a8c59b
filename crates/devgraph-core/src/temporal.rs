//! Period keys and activity sessions.

use chrono::{DateTime, Datelike, Duration, Utc};

/// ISO-8601 week key, e.g. `2026-W07`. Uses the ISO week-numbering year.
pub fn iso_week(at: DateTime<Utc>) -> String {
    let week = at.iso_week();
    format!("{}-W{:02}", week.year(), week.week())
}

/// Calendar day key, e.g. `2026-02-14`.
pub fn iso_day(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d").to_string()
}

/// Split ascending timestamps into sessions separated by gaps longer than `max_gap`.
///
/// Returns index ranges into `times`.
pub fn split_sessions(times: &[DateTime<Utc>], max_gap: Duration) -> Vec<std::ops::Range<usize>> {
    let mut sessions = Vec::new();
    if times.is_empty() {
        return sessions;
    }
    let mut start = 0;
    for i in 1..times.len() {
        if times[i] - times[i - 1] > max_gap {
            sessions.push(start..i);
            start = i;
        }
    }
    sessions.push(start..times.len());
    sessions
}
