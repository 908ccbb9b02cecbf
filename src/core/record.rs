use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;

pub type RecordId = String;
pub type Timestamp = DateTime<Utc>;

pub const FIELD_ID: &str = "id";
pub const FIELD_STATUS: &str = "status";
pub const FIELD_DATE: &str = "date";
pub const FIELD_ARCHIVED_AT: &str = "archivedAt";

/// A dashboard record: an id, a status, a primary date and an optional
/// archive marker. Everything else the hosting domain cares about lives in
/// `attributes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: RecordId,
    pub status: String,
    pub date: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<Timestamp>,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl Record {
    pub fn new(id: impl Into<RecordId>, status: impl Into<String>, date: Timestamp) -> Self {
        Self {
            id: id.into(),
            status: status.into(),
            date,
            archived_at: None,
            attributes: Map::new(),
        }
    }

    /// Builder-style attribute setter.
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn archived(mut self, at: Timestamp) -> Self {
        self.archived_at = Some(at);
        self
    }

    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }

    /// Reads a field by its wire name. Core fields are rendered as JSON so they
    /// can be compared uniformly with domain attributes.
    pub fn field(&self, name: &str) -> Option<Value> {
        match name {
            FIELD_ID => Some(Value::String(self.id.clone())),
            FIELD_STATUS => Some(Value::String(self.status.clone())),
            FIELD_DATE => Some(Value::String(self.date.to_rfc3339())),
            FIELD_ARCHIVED_AT => self.archived_at.map(|at| Value::String(at.to_rfc3339())),
            other => self.attributes.get(other).filter(|v| !v.is_null()).cloned(),
        }
    }

    /// Numeric view of a field; numeric strings count, anything else is `None`.
    pub fn number(&self, name: &str) -> Option<f64> {
        match self.attributes.get(name)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    /// Timestamp view of a field. Attributes may hold RFC 3339 timestamps or
    /// `YYYY-MM-DD` dates (read as midnight UTC).
    pub fn timestamp(&self, name: &str) -> Option<Timestamp> {
        match name {
            FIELD_DATE => Some(self.date),
            FIELD_ARCHIVED_AT => self.archived_at,
            other => {
                let raw = self.attributes.get(other)?.as_str()?.trim();
                if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
                    return Some(parsed.with_timezone(&Utc));
                }
                NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                    .ok()?
                    .and_hms_opt(0, 0, 0)
                    .map(|midnight| midnight.and_utc())
            }
        }
    }

    /// True when any of `fields` differs between `self` and `other`.
    pub fn differs_on<S: AsRef<str>>(&self, other: &Record, fields: &[S]) -> bool {
        fields
            .iter()
            .any(|field| self.field(field.as_ref()) != other.field(field.as_ref()))
    }

    /// Shallow merge of `patch` into this record.
    pub fn apply(&mut self, patch: &RecordPatch) {
        if let Some(status) = &patch.status {
            self.status = status.clone();
        }
        if let Some(date) = patch.date {
            self.date = date;
        }
        if let Some(archived_at) = patch.archived_at {
            self.archived_at = archived_at;
        }
        for (key, value) in &patch.attributes {
            if is_reserved(key) {
                continue;
            }
            self.attributes.insert(key.clone(), value.clone());
        }
    }
}

fn is_reserved(key: &str) -> bool {
    matches!(key, FIELD_ID | FIELD_STATUS | FIELD_DATE | FIELD_ARCHIVED_AT)
}

/// Partial record used by updates and reconciliation patches.
///
/// `archived_at` is tri-state: absent leaves the marker alone, `Some(None)`
/// clears it and `Some(Some(_))` sets it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<Timestamp>,
    #[serde(
        default,
        deserialize_with = "present_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub archived_at: Option<Option<Timestamp>>,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl RecordPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn date(mut self, date: Timestamp) -> Self {
        self.date = Some(date);
        self
    }

    pub fn archived_at(mut self, archived_at: Option<Timestamp>) -> Self {
        self.archived_at = Some(archived_at);
        self
    }

    pub fn attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.date.is_none()
            && self.archived_at.is_none()
            && self.attributes.is_empty()
    }

    /// Layers `self` over `base`: fields present in `self` win.
    pub fn merged_over(self, mut base: RecordPatch) -> RecordPatch {
        if self.status.is_some() {
            base.status = self.status;
        }
        if self.date.is_some() {
            base.date = self.date;
        }
        if self.archived_at.is_some() {
            base.archived_at = self.archived_at;
        }
        base.attributes.extend(self.attributes);
        base
    }
}

impl From<Record> for RecordPatch {
    fn from(record: Record) -> Self {
        Self {
            status: Some(record.status),
            date: Some(record.date),
            archived_at: Some(record.archived_at),
            attributes: record.attributes,
        }
    }
}

fn present_option<'de, D>(deserializer: D) -> std::result::Result<Option<Option<Timestamp>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<Timestamp>::deserialize(deserializer).map(Some)
}

/// Total order over JSON scalars used for sorting display lists.
///
/// Numbers compare numerically, strings case-insensitively, booleans with
/// `false < true`. Mixed kinds fall back to a fixed kind rank.
pub fn compare_values(left: &Value, right: &Value) -> Ordering {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => {
            let a = a.as_f64().unwrap_or_default();
            let b = b.as_f64().unwrap_or_default();
            a.partial_cmp(&b).unwrap_or(Ordering::Equal)
        }
        (Value::String(a), Value::String(b)) => a.to_lowercase().cmp(&b.to_lowercase()),
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (a, b) => kind_rank(a).cmp(&kind_rank(b)),
    }
}

fn kind_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}
