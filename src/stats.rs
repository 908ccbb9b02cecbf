// ============================================================================
// Stats aggregation
// ============================================================================
//
// `compute` restricts the records to the date range, then to the bucket
// predicate shared with the display pipeline, and emits the bucket's fixed
// metric set. Every ratio with a zero denominator is 0.
//
// ============================================================================

use crate::bucket::StatusBucket;
use crate::config::DashboardConfig;
use crate::core::{Record, Timestamp};
use crate::range::DateRange;
use chrono::Duration;
use serde::Serialize;
use std::collections::BTreeMap;

/// Metric names emitted by [`compute`].
pub mod metric {
    pub const TOTAL: &str = "total";
    pub const TOTAL_VALUE: &str = "total_value";
    pub const AVERAGE_VALUE: &str = "average_value";
    pub const TODAY: &str = "today";
    pub const NEXT_7_DAYS: &str = "next_7_days";
    pub const COMPLETION_RATE: &str = "completion_rate";
    pub const CANCELLATION_RATE: &str = "cancellation_rate";
    pub const PER_WEEK: &str = "per_week";
    pub const AVERAGE_DAYS: &str = "average_days";
}

/// Named metrics of one stats pass. Always replaced as a whole.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    values: BTreeMap<String, f64>,
}

impl StatsSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    fn set(&mut self, name: &str, value: f64) {
        self.values.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    /// Like [`get`](Self::get) but 0 for absent metrics.
    pub fn value(&self, name: &str) -> f64 {
        self.get(name).unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.values.iter().map(|(name, value)| (name.as_str(), *value))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

pub fn compute<'a, I>(
    records: I,
    bucket: StatusBucket,
    range: &DateRange,
    config: &DashboardConfig,
    now: Timestamp,
) -> StatsSnapshot
where
    I: IntoIterator<Item = &'a Record>,
{
    let in_range: Vec<&Record> = records
        .into_iter()
        .filter(|record| range.contains(record.date))
        .collect();
    let matched: Vec<&Record> = in_range
        .iter()
        .copied()
        .filter(|record| bucket.matches(record, &config.statuses, now))
        .collect();

    let total = matched.len() as f64;
    let total_value = sum_amount(&matched, config);
    let denominator = in_range.len() as f64;

    let mut snapshot = StatsSnapshot::new();
    snapshot.set(metric::TOTAL, total);
    snapshot.set(metric::TOTAL_VALUE, total_value);
    snapshot.set(metric::PER_WEEK, per_week(matched.len(), range.days()));

    match bucket {
        StatusBucket::Upcoming => {
            let today = now.date_naive();
            let week_out = now + Duration::days(7);
            let due_today = matched
                .iter()
                .filter(|record| record.date.date_naive() == today)
                .count();
            let due_this_week = matched
                .iter()
                .filter(|record| record.date >= now && record.date <= week_out)
                .count();
            snapshot.set(metric::TODAY, due_today as f64);
            snapshot.set(metric::NEXT_7_DAYS, due_this_week as f64);
        }
        StatusBucket::Completed => {
            snapshot.set(metric::AVERAGE_VALUE, ratio(total_value, total));
            snapshot.set(metric::COMPLETION_RATE, percentage(total, denominator));
            set_average_days(&mut snapshot, &matched, config);
        }
        StatusBucket::Cancelled => {
            snapshot.set(metric::CANCELLATION_RATE, percentage(total, denominator));
        }
        StatusBucket::All => {
            let completed = in_range
                .iter()
                .filter(|record| config.statuses.is_completed(&record.status))
                .count() as f64;
            let cancelled = in_range
                .iter()
                .filter(|record| config.statuses.is_cancelled(&record.status))
                .count() as f64;
            snapshot.set(metric::COMPLETION_RATE, percentage(completed, denominator));
            snapshot.set(metric::CANCELLATION_RATE, percentage(cancelled, denominator));
            set_average_days(&mut snapshot, &matched, config);
        }
        StatusBucket::Archived => {}
    }

    snapshot
}

fn sum_amount(records: &[&Record], config: &DashboardConfig) -> f64 {
    let Some(field) = config.amount_field.as_deref() else {
        return 0.0;
    };
    records
        .iter()
        .filter_map(|record| record.number(field))
        .sum()
}

/// Mean whole days from start to end field, each span rounded up. Records
/// missing either timestamp are left out.
fn set_average_days(snapshot: &mut StatsSnapshot, records: &[&Record], config: &DashboardConfig) {
    let Some((start_field, end_field)) = &config.duration_fields else {
        return;
    };
    let spans: Vec<f64> = records
        .iter()
        .filter_map(|record| {
            let start = record.timestamp(start_field)?;
            let end = record.timestamp(end_field)?;
            let seconds = (end - start).num_seconds() as f64;
            Some((seconds / 86_400.0).ceil())
        })
        .collect();
    let average = ratio(spans.iter().sum(), spans.len() as f64);
    snapshot.set(metric::AVERAGE_DAYS, average.round());
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

fn percentage(numerator: f64, denominator: f64) -> f64 {
    round_one(ratio(numerator, denominator) * 100.0)
}

fn per_week(count: usize, days: f64) -> f64 {
    if days <= 0.0 {
        return 0.0;
    }
    round_one(count as f64 / days * 7.0)
}

fn round_one(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::range::{DateRangeToken, resolve_at, resolve_bounds_at};
    use chrono::{TimeZone, Utc};

    fn at(month: u32, day: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2024, month, day, 12, 0, 0).unwrap()
    }

    fn config() -> DashboardConfig {
        DashboardConfig::new("appointment", "appointments").amount_field("fee")
    }

    fn sample() -> Vec<Record> {
        vec![
            Record::new("1", "Completed", at(6, 1)).with_attribute("fee", 100),
            Record::new("2", "Completed", at(6, 2)).with_attribute("fee", 300),
            Record::new("3", "Cancelled", at(6, 3)).with_attribute("fee", 50),
            Record::new("4", "Scheduled", at(6, 4)).with_attribute("fee", "25.5"),
            Record::new("5", "Completed", at(1, 10)).with_attribute("fee", 1000),
        ]
    }

    #[test]
    fn test_completed_bucket_metrics() {
        let now = at(6, 10);
        let range = resolve_at(Some(DateRangeToken::Month), None, None, now);
        let records = sample();

        let stats = compute(&records, StatusBucket::Completed, &range, &config(), now);

        assert_eq!(stats.value(metric::TOTAL), 2.0);
        assert_eq!(stats.value(metric::TOTAL_VALUE), 400.0);
        assert_eq!(stats.value(metric::AVERAGE_VALUE), 200.0);
        assert_eq!(stats.value(metric::COMPLETION_RATE), 50.0);
        assert_eq!(stats.value(metric::PER_WEEK), 0.5);
        assert_eq!(stats.get(metric::TODAY), None);
    }

    #[test]
    fn test_all_bucket_rates() {
        let now = at(6, 10);
        let range = resolve_at(Some(DateRangeToken::Month), None, None, now);
        let records = sample();

        let stats = compute(&records, StatusBucket::All, &range, &config(), now);

        assert_eq!(stats.value(metric::TOTAL), 4.0);
        assert_eq!(stats.value(metric::TOTAL_VALUE), 475.5);
        assert_eq!(stats.value(metric::COMPLETION_RATE), 50.0);
        assert_eq!(stats.value(metric::CANCELLATION_RATE), 25.0);
    }

    #[test]
    fn test_average_days_between_duration_fields() {
        let now = at(6, 10);
        let range = resolve_at(Some(DateRangeToken::Month), None, None, now);
        let with_durations = config().duration_fields("offerDate", "closingDate");
        let records = vec![
            Record::new("1", "Completed", at(6, 1))
                .with_attribute("offerDate", "2024-05-01")
                .with_attribute("closingDate", "2024-05-31"),
            Record::new("2", "Completed", at(6, 2))
                .with_attribute("offerDate", "2024-05-20T00:00:00Z")
                .with_attribute("closingDate", "2024-06-01T06:00:00Z"),
            Record::new("3", "Completed", at(6, 3)).with_attribute("offerDate", "2024-05-01"),
            Record::new("4", "Scheduled", at(6, 4))
                .with_attribute("offerDate", "2024-01-01")
                .with_attribute("closingDate", "2024-06-01"),
        ];

        // 30 and 13 (12.25 rounded up) days; record 3 has no closing date
        let stats = compute(&records, StatusBucket::Completed, &range, &with_durations, now);
        assert_eq!(stats.value(metric::AVERAGE_DAYS), 22.0);

        let stats = compute(&records, StatusBucket::All, &range, &with_durations, now);
        assert_eq!(stats.value(metric::AVERAGE_DAYS), 65.0);

        let stats = compute(&records, StatusBucket::Cancelled, &range, &with_durations, now);
        assert_eq!(stats.get(metric::AVERAGE_DAYS), None);

        let without = compute(&records, StatusBucket::Completed, &range, &config(), now);
        assert_eq!(without.get(metric::AVERAGE_DAYS), None);

        let none_complete = vec![Record::new("5", "Completed", at(6, 5))];
        let stats = compute(&none_complete, StatusBucket::Completed, &range, &with_durations, now);
        assert_eq!(stats.value(metric::AVERAGE_DAYS), 0.0);
    }

    #[test]
    fn test_upcoming_counts_today_and_next_week() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();
        let range = resolve_bounds_at(at(5, 1), at(7, 1), now);
        let records = vec![
            Record::new("today", "Scheduled", at(6, 1)),
            Record::new("soon", "Scheduled", at(6, 5)),
            Record::new("later", "Scheduled", at(6, 20)),
            Record::new("past", "Scheduled", at(5, 20)),
            Record::new("off", "Cancelled", at(6, 2)),
        ];

        let stats = compute(&records, StatusBucket::Upcoming, &range, &config(), now);

        assert_eq!(stats.value(metric::TOTAL), 3.0);
        assert_eq!(stats.value(metric::TODAY), 1.0);
        assert_eq!(stats.value(metric::NEXT_7_DAYS), 2.0);
    }

    #[test]
    fn test_zero_denominators_yield_zero() {
        let now = at(6, 10);
        let empty_range = resolve_bounds_at(now, now, now);
        let records = sample();

        let stats = compute(&records, StatusBucket::Completed, &empty_range, &config(), now);

        assert_eq!(stats.value(metric::TOTAL), 0.0);
        assert_eq!(stats.value(metric::AVERAGE_VALUE), 0.0);
        assert_eq!(stats.value(metric::COMPLETION_RATE), 0.0);
        assert_eq!(stats.value(metric::PER_WEEK), 0.0);
        assert!(stats.iter().all(|(_, value)| value.is_finite()));
    }

    #[test]
    fn test_missing_amount_field_sums_to_zero() {
        let now = at(6, 10);
        let range = resolve_at(Some(DateRangeToken::Month), None, None, now);
        let records = sample();

        let stats = compute(
            &records,
            StatusBucket::Cancelled,
            &range,
            &DashboardConfig::default(),
            now,
        );
        assert_eq!(stats.value(metric::TOTAL_VALUE), 0.0);
        assert_eq!(stats.value(metric::CANCELLATION_RATE), 25.0);
    }
}
