// ============================================================================
// Date range resolution
// ============================================================================
//
// Turns a preset token or a pair of explicit bounds into a concrete interval,
// and classifies explicit bounds back into a preset when they coincide with
// one at calendar-day granularity.
//
// ============================================================================

use crate::core::Timestamp;
use chrono::{Datelike, Duration, NaiveDate, NaiveTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Preset (or custom) date window selected on a dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DateRangeToken {
    /// Start of the current day until now.
    Day,
    /// The last 30 days.
    Month,
    /// The last 365 days.
    Year,
    /// January 1st of the current year until now.
    YearToDate,
    Custom,
}

impl DateRangeToken {
    /// Detection order. Calendar-anchored presets are tried before the rolling
    /// windows, so a window that coincides with both reports the anchored one.
    /// That happens on Jan 1 (Day and YearToDate), on Jan 31 (Month and
    /// YearToDate) and on Dec 31 of a leap year (Year and YearToDate).
    pub const PRESETS: [DateRangeToken; 4] = [
        DateRangeToken::Day,
        DateRangeToken::YearToDate,
        DateRangeToken::Month,
        DateRangeToken::Year,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DateRangeToken::Day => "1D",
            DateRangeToken::Month => "1M",
            DateRangeToken::Year => "1Y",
            DateRangeToken::YearToDate => "YTD",
            DateRangeToken::Custom => "custom",
        }
    }

    /// Accepts the toggle values (`1D`, `1M`, `1Y`, `YTD`) as well as the
    /// spelled-out names, case-insensitively.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "1d" | "day" => Some(DateRangeToken::Day),
            "1m" | "month" => Some(DateRangeToken::Month),
            "1y" | "year" => Some(DateRangeToken::Year),
            "ytd" | "yeartodate" | "year_to_date" => Some(DateRangeToken::YearToDate),
            "custom" => Some(DateRangeToken::Custom),
            _ => None,
        }
    }
}

impl fmt::Display for DateRangeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A concrete, inclusive interval.
///
/// `token` is `None` when the bounds do not coincide with any preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Timestamp,
    pub end: Timestamp,
    pub token: Option<DateRangeToken>,
}

impl DateRange {
    pub fn contains(&self, at: Timestamp) -> bool {
        at >= self.start && at <= self.end
    }

    /// Length of the interval in (fractional) days.
    pub fn days(&self) -> f64 {
        (self.end - self.start).num_seconds() as f64 / 86_400.0
    }

    pub fn is_custom(&self) -> bool {
        self.token.is_none()
    }
}

/// Bounds of a preset anchored at `now`. `Custom` has no bounds.
pub fn preset_bounds(token: DateRangeToken, now: Timestamp) -> Option<(Timestamp, Timestamp)> {
    let start = match token {
        DateRangeToken::Day => start_of_day(now.date_naive()),
        DateRangeToken::Month => now - Duration::days(30),
        DateRangeToken::Year => now - Duration::days(365),
        DateRangeToken::YearToDate => {
            let jan_first = NaiveDate::from_ymd_opt(now.year(), 1, 1)?;
            start_of_day(jan_first)
        }
        DateRangeToken::Custom => return None,
    };
    Some((start, now))
}

/// Resolves against the current wall clock. See [`resolve_at`].
pub fn resolve(
    token: Option<DateRangeToken>,
    explicit_start: Option<&str>,
    explicit_end: Option<&str>,
) -> DateRange {
    resolve_at(token, explicit_start, explicit_end, Utc::now())
}

/// Resolves a token, or explicit textual bounds when both are present.
///
/// Explicit bounds win over the token and are classified with
/// [`detect_at`]. Bounds that fail to parse collapse to `now..=now`.
/// A missing or custom token without bounds falls back to `Month`.
pub fn resolve_at(
    token: Option<DateRangeToken>,
    explicit_start: Option<&str>,
    explicit_end: Option<&str>,
    now: Timestamp,
) -> DateRange {
    if let (Some(raw_start), Some(raw_end)) = (explicit_start, explicit_end) {
        return match (parse_start_bound(raw_start), parse_end_bound(raw_end)) {
            (Some(start), Some(end)) => resolve_bounds_at(start, end, now),
            _ => {
                warn!(
                    "unparseable date range bounds start='{}' end='{}', falling back to now",
                    raw_start, raw_end
                );
                DateRange {
                    start: now,
                    end: now,
                    token: None,
                }
            }
        };
    }

    resolve_token_at(token.unwrap_or(DateRangeToken::Month), now)
}

/// Resolves a preset token; `Custom` resolves like `Month`.
pub fn resolve_token_at(token: DateRangeToken, now: Timestamp) -> DateRange {
    let token = match token {
        DateRangeToken::Custom => DateRangeToken::Month,
        other => other,
    };
    match preset_bounds(token, now) {
        Some((start, end)) => DateRange {
            start,
            end,
            token: Some(token),
        },
        None => DateRange {
            start: now,
            end: now,
            token: None,
        },
    }
}

/// Builds a range from typed bounds, swapping them if reversed.
pub fn resolve_bounds_at(start: Timestamp, end: Timestamp, now: Timestamp) -> DateRange {
    let (start, end) = if start <= end { (start, end) } else { (end, start) };
    DateRange {
        start,
        end,
        token: detect_at(start, end, now),
    }
}

pub fn detect(start: Timestamp, end: Timestamp) -> Option<DateRangeToken> {
    detect_at(start, end, Utc::now())
}

/// Returns the preset whose bounds fall on the same calendar days as
/// `start` and `end`, or `None` for a custom range.
pub fn detect_at(start: Timestamp, end: Timestamp, now: Timestamp) -> Option<DateRangeToken> {
    let start_day = start.date_naive();
    let end_day = end.date_naive();

    DateRangeToken::PRESETS.into_iter().find(|token| {
        preset_bounds(*token, now).is_some_and(|(preset_start, preset_end)| {
            preset_start.date_naive() == start_day && preset_end.date_naive() == end_day
        })
    })
}

fn start_of_day(day: NaiveDate) -> Timestamp {
    day.and_time(NaiveTime::MIN).and_utc()
}

fn parse_start_bound(raw: &str) -> Option<Timestamp> {
    parse_bound(raw, NaiveTime::MIN)
}

fn parse_end_bound(raw: &str) -> Option<Timestamp> {
    let end_of_day = NaiveTime::from_hms_opt(23, 59, 59)?;
    parse_bound(raw, end_of_day)
}

/// RFC 3339 timestamps are taken as-is; bare `YYYY-MM-DD` dates are pinned to
/// `time_of_day`.
fn parse_bound(raw: &str, time_of_day: NaiveTime) -> Option<Timestamp> {
    let raw = raw.trim();
    if let Ok(parsed) = chrono::DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .map(|day| day.and_time(time_of_day).and_utc())
}
