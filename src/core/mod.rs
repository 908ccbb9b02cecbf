pub mod error;
pub mod record;

pub use error::{Result, SyncError};
pub use record::{
    FIELD_ARCHIVED_AT, FIELD_DATE, FIELD_ID, FIELD_STATUS, Record, RecordId, RecordPatch,
    Timestamp, compare_values,
};
