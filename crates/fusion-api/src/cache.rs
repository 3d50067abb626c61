use std::sync::Arc;
use std::time::Duration;

use fusion_core::{CacheEntry, CharacterProfile, Clock, FusionError};

use crate::store::CacheStore;

/// Time-boxed cache of fused character profiles keyed by Source A id.
///
/// A missing entry and an expired one look the same to callers: both are `None`.
#[derive(Clone)]
pub struct CharacterCache {
    store: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
    window: Duration,
}

impl CharacterCache {
    #[must_use]
    pub fn new(store: Arc<dyn CacheStore>, clock: Arc<dyn Clock>, window: Duration) -> Self {
        Self { store, clock, window }
    }

    /// # Errors
    /// Returns [`FusionError::Cache`] when the store read fails or the entry cannot be decoded.
    pub fn get(&self, id: &str) -> Result<Option<CharacterProfile>, FusionError> {
        let entry = self
            .store
            .get_entry(id)
            .map_err(|err| {
                FusionError::Cache(format!("failed to read cached character {id}: {err:#}"))
            })?;
        let Some(entry) = entry else {
            return Ok(None);
        };

        if !entry.is_fresh(self.clock.now_millis(), self.window) {
            tracing::debug!(id, written_at = entry.timestamp, "cached character expired");
            return Ok(None);
        }

        serde_json::from_str(&entry.data).map(Some).map_err(|err| {
            FusionError::Cache(format!("cached character {id} cannot be decoded: {err}"))
        })
    }

    /// # Errors
    /// Returns [`FusionError::Cache`] when serialization or the store write fails.
    pub fn put(&self, id: &str, profile: &CharacterProfile) -> Result<(), FusionError> {
        let data = serde_json::to_string(profile).map_err(|err| {
            FusionError::Cache(format!("failed to serialize character {id} for cache: {err}"))
        })?;
        let timestamp = self.clock.now_millis();
        let window_millis = i64::try_from(self.window.as_millis()).unwrap_or(i64::MAX);
        let entry = CacheEntry {
            id: id.to_string(),
            data,
            timestamp,
            expires_at: timestamp.saturating_add(window_millis),
        };
        self.store
            .put_entry(&entry)
            .map_err(|err| FusionError::Cache(format!("failed to cache character {id}: {err:#}")))
    }
}
