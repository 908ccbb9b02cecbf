// ============================================================================
// Sort/filter pipeline
// ============================================================================
//
// Pure projection from the partitioned collection to the list a view renders:
// pick the source partition, apply the bucket predicate and free-text search,
// then stable-sort by the selected key.
//
// ============================================================================

use crate::bucket::StatusBucket;
use crate::config::DashboardConfig;
use crate::core::{FIELD_ARCHIVED_AT, FIELD_DATE, Record, Timestamp, compare_values};
use crate::partition::{PartitionSide, PartitionedCollection};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

// ============================================================================
// SORT KEY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Ascending => "asc",
            SortDirection::Descending => "desc",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Some(SortDirection::Ascending),
            "desc" | "descending" => Some(SortDirection::Descending),
            _ => None,
        }
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Field and direction a display list is ordered by.
///
/// Records missing the field sort after every record that has it, whatever
/// the direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub field: String,
    pub direction: SortDirection,
}

impl SortKey {
    pub fn new(field: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            field: field.into(),
            direction,
        }
    }

    pub fn ascending(field: impl Into<String>) -> Self {
        Self::new(field, SortDirection::Ascending)
    }

    pub fn descending(field: impl Into<String>) -> Self {
        Self::new(field, SortDirection::Descending)
    }

    /// Compare two records by this key.
    pub fn compare(&self, left: &Record, right: &Record) -> Ordering {
        let ordering = match self.field.as_str() {
            FIELD_DATE => Some(left.date.cmp(&right.date)),
            FIELD_ARCHIVED_AT => compare_present(left.archived_at, right.archived_at, |a, b| a.cmp(&b)),
            field => compare_present(left.field(field), right.field(field), |a, b| {
                compare_values(&a, &b)
            }),
        };

        match ordering {
            Some(ordering) if self.direction == SortDirection::Descending => ordering.reverse(),
            Some(ordering) => ordering,
            None => missing_last(self.present_in(left), self.present_in(right)),
        }
    }

    fn present_in(&self, record: &Record) -> bool {
        match self.field.as_str() {
            FIELD_DATE => true,
            FIELD_ARCHIVED_AT => record.archived_at.is_some(),
            field => record.field(field).is_some(),
        }
    }
}

impl Default for SortKey {
    fn default() -> Self {
        Self::descending(FIELD_DATE)
    }
}

/// `Some` only when both sides carry a value.
fn compare_present<T>(
    left: Option<T>,
    right: Option<T>,
    compare: impl FnOnce(T, T) -> Ordering,
) -> Option<Ordering> {
    match (left, right) {
        (Some(a), Some(b)) => Some(compare(a, b)),
        _ => None,
    }
}

fn missing_last(left_present: bool, right_present: bool) -> Ordering {
    match (left_present, right_present) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

// ============================================================================
// FILTERING
// ============================================================================

/// Case-insensitive substring match over `fields`. An empty query matches.
pub fn matches_search<S: AsRef<str>>(record: &Record, query: &str, fields: &[S]) -> bool {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return true;
    }

    fields.iter().any(|field| {
        record
            .field(field.as_ref())
            .map(|value| match value {
                serde_json::Value::String(s) => s.to_lowercase().contains(&query),
                other => other.to_string().to_lowercase().contains(&query),
            })
            .unwrap_or(false)
    })
}

/// Which partition a bucket reads from.
pub fn source_side(bucket: StatusBucket) -> PartitionSide {
    if bucket.reads_archived() {
        PartitionSide::Archived
    } else {
        PartitionSide::Active
    }
}

// ============================================================================
// PIPELINE
// ============================================================================

/// Inputs of [`display_list`] other than the collection itself.
#[derive(Debug, Clone, Copy)]
pub struct ViewQuery<'a> {
    pub bucket: StatusBucket,
    pub search: &'a str,
    pub sort: &'a SortKey,
    pub now: Timestamp,
}

/// Builds the ordered list a view renders. Ties keep insertion order.
pub fn display_list(
    collection: &PartitionedCollection,
    query: ViewQuery<'_>,
    config: &DashboardConfig,
) -> Vec<Record> {
    let mut records: Vec<Record> = collection
        .partition(source_side(query.bucket))
        .iter()
        .filter(|record| query.bucket.matches(record, &config.statuses, query.now))
        .filter(|record| matches_search(record, query.search, &config.search_fields))
        .cloned()
        .collect();

    sort_records(&mut records, query.sort);
    records
}

/// Stable sort in place.
pub fn sort_records(records: &mut [Record], key: &SortKey) {
    records.sort_by(|left, right| key.compare(left, right));
}
