use crate::core::{Record, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status vocabulary of the hosting domain, compared case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusVocabulary {
    pub completed: Vec<String>,
    pub cancelled: Vec<String>,
}

impl Default for StatusVocabulary {
    fn default() -> Self {
        Self {
            completed: vec!["completed".to_string(), "closed".to_string()],
            cancelled: vec!["cancelled".to_string(), "canceled".to_string()],
        }
    }
}

impl StatusVocabulary {
    pub fn is_completed(&self, status: &str) -> bool {
        contains_ignore_case(&self.completed, status)
    }

    pub fn is_cancelled(&self, status: &str) -> bool {
        contains_ignore_case(&self.cancelled, status)
    }
}

fn contains_ignore_case(values: &[String], status: &str) -> bool {
    let status = status.trim();
    values.iter().any(|v| v.eq_ignore_ascii_case(status))
}

/// Mutually exclusive status view selected on a dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusBucket {
    Upcoming,
    Completed,
    Cancelled,
    All,
    Archived,
}

impl StatusBucket {
    pub const ALL: [StatusBucket; 5] = [
        StatusBucket::Upcoming,
        StatusBucket::Completed,
        StatusBucket::Cancelled,
        StatusBucket::All,
        StatusBucket::Archived,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StatusBucket::Upcoming => "upcoming",
            StatusBucket::Completed => "completed",
            StatusBucket::Cancelled => "cancelled",
            StatusBucket::All => "all",
            StatusBucket::Archived => "archived",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        Self::ALL
            .into_iter()
            .find(|bucket| bucket.as_str().eq_ignore_ascii_case(raw))
    }

    /// The Archived bucket reads from the archived partition, every other
    /// bucket from the active one.
    pub fn reads_archived(&self) -> bool {
        matches!(self, StatusBucket::Archived)
    }

    /// Bucket predicate shared by the display pipeline and the stats engine.
    pub fn matches(&self, record: &Record, statuses: &StatusVocabulary, now: Timestamp) -> bool {
        match self {
            StatusBucket::Upcoming => record.date >= now && !statuses.is_cancelled(&record.status),
            StatusBucket::Completed => statuses.is_completed(&record.status),
            StatusBucket::Cancelled => statuses.is_cancelled(&record.status),
            StatusBucket::All | StatusBucket::Archived => true,
        }
    }
}

impl fmt::Display for StatusBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    #[test]
    fn test_upcoming_excludes_past_and_cancelled() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap();
        let vocab = StatusVocabulary::default();
        let future = Record::new("1", "Scheduled", now + Duration::days(2));
        let past = Record::new("2", "Scheduled", now - Duration::days(2));
        let cancelled = Record::new("3", "Cancelled", now + Duration::days(2));

        assert!(StatusBucket::Upcoming.matches(&future, &vocab, now));
        assert!(!StatusBucket::Upcoming.matches(&past, &vocab, now));
        assert!(!StatusBucket::Upcoming.matches(&cancelled, &vocab, now));
    }

    #[test]
    fn test_status_buckets_compare_case_insensitively() {
        let now = Utc::now();
        let vocab = StatusVocabulary::default();
        let closed = Record::new("1", "CLOSED", now);
        assert!(StatusBucket::Completed.matches(&closed, &vocab, now));
        assert!(!StatusBucket::Cancelled.matches(&closed, &vocab, now));
        assert!(StatusBucket::All.matches(&closed, &vocab, now));
    }

    #[test]
    fn test_parse_round_trips_names() {
        for bucket in StatusBucket::ALL {
            assert_eq!(StatusBucket::parse(bucket.as_str()), Some(bucket));
        }
        assert_eq!(StatusBucket::parse("Pending"), None);
    }
}
