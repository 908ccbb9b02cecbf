// ============================================================================
// User preferences
// ============================================================================
//
// Durable key-value storage for the selected bucket, scope, view mode and the
// per-bucket sort order. Read once when a dashboard opens, written on change.
// Keys are prefixed with the entity plural so dashboards never collide.
//
// ============================================================================

use crate::bucket::StatusBucket;
use crate::config::DashboardConfig;
use crate::core::{Result, SyncError};
use crate::view::SortDirection;
use async_trait::async_trait;
use log::{debug, warn};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;

#[async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;
}

/// Process-local store; forgets everything on drop.
#[derive(Debug, Default)]
pub struct MemoryPreferenceStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PreferenceStore for MemoryPreferenceStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.values.lock().await.remove(key);
        Ok(())
    }
}

/// JSON-file store. Every write rewrites the whole file through a temp file
/// and a rename.
#[derive(Debug)]
pub struct FilePreferenceStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl FilePreferenceStore {
    /// Opens the store at `path`. A missing file starts empty; an unreadable
    /// one is logged and replaced on the next write.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let values = match fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<BTreeMap<String, String>>(&bytes) {
                Ok(values) => values,
                Err(err) => {
                    warn!(
                        "ignoring corrupt preference file '{}': {}",
                        path.display(),
                        err
                    );
                    BTreeMap::new()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => {
                return Err(SyncError::Io(format!(
                    "Failed to read preference file '{}': {}",
                    path.display(),
                    err
                )));
            }
        };

        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn flush(&self, values: &BTreeMap<String, String>) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(values)?;
        atomic_write(&self.path, &bytes).await
    }
}

#[async_trait]
impl PreferenceStore for FilePreferenceStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self.values.lock().await;
        values.insert(key.to_string(), value.to_string());
        self.flush(&values).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut values = self.values.lock().await;
        if values.remove(key).is_none() {
            return Ok(());
        }
        self.flush(&values).await
    }
}

async fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await.map_err(|err| {
            SyncError::Io(format!(
                "Failed to create parent directory '{}': {}",
                parent.display(),
                err
            ))
        })?;
    }

    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).await.map_err(|err| {
        SyncError::Io(format!(
            "Failed to write temp file '{}': {}",
            tmp.display(),
            err
        ))
    })?;

    fs::rename(&tmp, path).await.map_err(|err| {
        SyncError::Io(format!(
            "Failed to rename temp file '{}' -> '{}': {}",
            tmp.display(),
            path.display(),
            err
        ))
    })?;
    Ok(())
}

// ============================================================================
// Dashboard preference keys
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreferenceKeys {
    plural: String,
}

impl PreferenceKeys {
    pub fn new(entity_plural: &str) -> Self {
        Self {
            plural: entity_plural.to_string(),
        }
    }

    pub fn status(&self) -> String {
        format!("{}Status", self.plural)
    }

    pub fn scope(&self) -> String {
        format!("{}Scope", self.plural)
    }

    pub fn view_mode(&self) -> String {
        format!("{}ViewMode", self.plural)
    }

    pub fn sort_order(&self, bucket: StatusBucket) -> String {
        format!("{}SortOrder_{}", self.plural, bucket.as_str())
    }
}

/// Maps view modes saved by older clients onto the current ones.
pub fn migrate_view_mode(raw: &str) -> &str {
    match raw {
        "small" => "grid",
        "large" => "list",
        "calendar" => "table",
        other => other,
    }
}

/// Preferences restored when a dashboard opens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DashboardPreferences {
    pub bucket: StatusBucket,
    pub scope: String,
    pub view_mode: String,
    pub sort_direction: SortDirection,
}

impl DashboardPreferences {
    pub fn defaults(config: &DashboardConfig) -> Self {
        Self {
            bucket: config.default_bucket,
            scope: config.default_scope.clone(),
            view_mode: config.default_view_mode.clone(),
            sort_direction: SortDirection::Descending,
        }
    }
}

/// Reads the saved preferences, falling back to `config` defaults.
///
/// A saved bucket that no longer parses is removed from the store. A legacy
/// view mode is migrated and written back.
pub async fn load_preferences(
    store: &dyn PreferenceStore,
    config: &DashboardConfig,
) -> Result<DashboardPreferences> {
    let keys = PreferenceKeys::new(&config.entity_plural);
    let mut prefs = DashboardPreferences::defaults(config);

    if let Some(saved) = store.get(&keys.status()).await? {
        match StatusBucket::parse(&saved) {
            Some(bucket) => prefs.bucket = bucket,
            None => {
                warn!(
                    "removing invalid saved bucket '{}' for {}",
                    saved, config.entity_plural
                );
                store.remove(&keys.status()).await?;
            }
        }
    }

    if let Some(scope) = store.get(&keys.scope()).await? {
        prefs.scope = scope;
    }

    if let Some(saved) = store.get(&keys.view_mode()).await? {
        let migrated = migrate_view_mode(&saved);
        if migrated != saved {
            debug!("migrating saved view mode '{}' to '{}'", saved, migrated);
            store.set(&keys.view_mode(), migrated).await?;
        }
        prefs.view_mode = migrated.to_string();
    }

    prefs.sort_direction = load_sort_direction(store, &keys, prefs.bucket).await?;
    Ok(prefs)
}

/// Saved sort order for `bucket`, descending when absent or unreadable.
pub async fn load_sort_direction(
    store: &dyn PreferenceStore,
    keys: &PreferenceKeys,
    bucket: StatusBucket,
) -> Result<SortDirection> {
    Ok(store
        .get(&keys.sort_order(bucket))
        .await?
        .and_then(|raw| SortDirection::parse(&raw))
        .unwrap_or(SortDirection::Descending))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DashboardConfig {
        DashboardConfig::new("escrow", "escrows")
    }

    #[tokio::test]
    async fn test_defaults_when_nothing_saved() {
        let store = MemoryPreferenceStore::new();
        let prefs = load_preferences(&store, &config()).await.unwrap();
        assert_eq!(prefs, DashboardPreferences::defaults(&config()));
    }

    #[tokio::test]
    async fn test_invalid_bucket_is_removed() {
        let store = MemoryPreferenceStore::new();
        store.set("escrowsStatus", "pending-review").await.unwrap();

        let prefs = load_preferences(&store, &config()).await.unwrap();

        assert_eq!(prefs.bucket, StatusBucket::All);
        assert_eq!(store.get("escrowsStatus").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_legacy_view_mode_is_migrated() {
        let store = MemoryPreferenceStore::new();
        store.set("escrowsViewMode", "calendar").await.unwrap();
        store.set("escrowsStatus", "archived").await.unwrap();
        store.set("escrowsSortOrder_archived", "asc").await.unwrap();

        let prefs = load_preferences(&store, &config()).await.unwrap();

        assert_eq!(prefs.view_mode, "table");
        assert_eq!(prefs.bucket, StatusBucket::Archived);
        assert_eq!(prefs.sort_direction, SortDirection::Ascending);
        assert_eq!(
            store.get("escrowsViewMode").await.unwrap().as_deref(),
            Some("table")
        );
    }

    #[test]
    fn test_keys_are_prefixed_by_plural() {
        let keys = PreferenceKeys::new("clients");
        assert_eq!(keys.status(), "clientsStatus");
        assert_eq!(keys.scope(), "clientsScope");
        assert_eq!(keys.view_mode(), "clientsViewMode");
        assert_eq!(keys.sort_order(StatusBucket::Completed), "clientsSortOrder_completed");
    }
}
