use crate::bucket::{StatusBucket, StatusVocabulary};
use crate::core::{FIELD_ARCHIVED_AT, FIELD_DATE, FIELD_ID, FIELD_STATUS, Result, SyncError};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// How page fetches map onto the two partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FetchStrategy {
    /// Every fetch returns active and archived records together; the page is
    /// split by archive marker.
    Mixed,
    /// The Archived bucket fetches archived records only, every other bucket
    /// fetches active records only.
    PerPartition,
}

/// Dashboard configuration
///
/// One per hosting view (escrows, listings, clients, appointments...).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    /// Entity type matched against push notifications
    pub entity_type: String,

    /// Plural name, used as the preference key prefix
    pub entity_plural: String,

    /// Fixed page size for paged fetches
    pub page_size: u32,

    pub fetch_strategy: FetchStrategy,

    /// Bucket selected when no valid preference is stored
    pub default_bucket: StatusBucket,

    /// Scope selected when no preference is stored
    pub default_scope: String,

    /// View mode selected when no preference is stored
    pub default_view_mode: String,

    pub statuses: StatusVocabulary,

    /// Fields whose change requires a stats recompute
    pub stats_fields: Vec<String>,

    /// Fields searched by the free-text filter
    pub search_fields: Vec<String>,

    /// Numeric attribute summed by the `total_value` metrics
    pub amount_field: Option<String>,

    /// Start and end timestamp fields averaged by the `average_days` metric
    pub duration_fields: Option<(String, String)>,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self::new("record", "records")
    }
}

impl DashboardConfig {
    /// Create a configuration for an entity type
    pub fn new(entity_type: &str, entity_plural: &str) -> Self {
        Self {
            entity_type: entity_type.to_string(),
            entity_plural: entity_plural.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            fetch_strategy: FetchStrategy::Mixed,
            default_bucket: StatusBucket::All,
            default_scope: "team".to_string(),
            default_view_mode: "list".to_string(),
            statuses: StatusVocabulary::default(),
            stats_fields: vec![
                FIELD_STATUS.to_string(),
                FIELD_DATE.to_string(),
                FIELD_ARCHIVED_AT.to_string(),
            ],
            search_fields: vec![FIELD_ID.to_string(), FIELD_STATUS.to_string()],
            amount_field: None,
            duration_fields: None,
        }
    }

    /// Set the page size
    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Set the fetch strategy
    pub fn fetch_strategy(mut self, strategy: FetchStrategy) -> Self {
        self.fetch_strategy = strategy;
        self
    }

    /// Set the default bucket
    pub fn default_bucket(mut self, bucket: StatusBucket) -> Self {
        self.default_bucket = bucket;
        self
    }

    /// Set the default scope
    pub fn default_scope(mut self, scope: &str) -> Self {
        self.default_scope = scope.to_string();
        self
    }

    /// Set the status vocabulary
    pub fn statuses(mut self, statuses: StatusVocabulary) -> Self {
        self.statuses = statuses;
        self
    }

    /// Add a stats-relevant field
    pub fn stats_field(mut self, field: &str) -> Self {
        if !self.stats_fields.iter().any(|f| f == field) {
            self.stats_fields.push(field.to_string());
        }
        self
    }

    /// Add a searchable field
    pub fn search_field(mut self, field: &str) -> Self {
        if !self.search_fields.iter().any(|f| f == field) {
            self.search_fields.push(field.to_string());
        }
        self
    }

    /// Set the amount field; it also becomes stats-relevant
    pub fn amount_field(mut self, field: &str) -> Self {
        self.amount_field = Some(field.to_string());
        self.stats_field(field)
    }

    /// Set the start/end fields of the duration metric; both become
    /// stats-relevant
    pub fn duration_fields(mut self, start_field: &str, end_field: &str) -> Self {
        self.duration_fields = Some((start_field.to_string(), end_field.to_string()));
        self.stats_field(start_field).stats_field(end_field)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.entity_type.trim().is_empty() {
            return Err(SyncError::InvalidConfig(
                "entity_type must not be empty".to_string(),
            ));
        }

        if self.entity_plural.trim().is_empty() {
            return Err(SyncError::InvalidConfig(
                "entity_plural must not be empty".to_string(),
            ));
        }

        if self.page_size == 0 {
            return Err(SyncError::InvalidConfig(
                "page_size must be greater than 0".to_string(),
            ));
        }

        if self.default_scope.trim().is_empty() {
            return Err(SyncError::InvalidConfig(
                "default_scope must not be empty".to_string(),
            ));
        }

        if let Some((start, end)) = &self.duration_fields {
            if start.trim().is_empty() || end.trim().is_empty() || start == end {
                return Err(SyncError::InvalidConfig(
                    "duration_fields must name two distinct fields".to_string(),
                ));
            }
        }

        Ok(())
    }
}
