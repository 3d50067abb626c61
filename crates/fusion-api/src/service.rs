use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use fusion_core::{
    new_record_id, CharacterProfile, Clock, FusionConfig, FusionError, HistoryCursor, HistoryPage,
    MergedRecord, MonotonicClock, SystemClock, DEFAULT_HISTORY_LIMIT, MAX_HISTORY_LIMIT,
};

use crate::cache::CharacterCache;
use crate::characters::{CharacterSource, HttpCharacterClient};
use crate::creatures::{CreatureMatcher, HttpCreatureClient};
use crate::retry::RetryPolicy;
use crate::store::{CacheStore, RecordStore, SqliteBackend};

/// Merge orchestrator plus the record-creation and history primitives it builds on.
#[derive(Clone)]
pub struct FusionService {
    characters: Arc<dyn CharacterSource>,
    creatures: Arc<dyn CreatureMatcher>,
    cache: CharacterCache,
    records: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
    partition: String,
    merge_deadline: Duration,
}

impl FusionService {
    #[must_use]
    pub fn new(
        characters: Arc<dyn CharacterSource>,
        creatures: Arc<dyn CreatureMatcher>,
        records: Arc<dyn RecordStore>,
        cache_store: Arc<dyn CacheStore>,
        clock: Arc<dyn Clock>,
        config: &FusionConfig,
    ) -> Self {
        Self {
            characters,
            creatures,
            cache: CharacterCache::new(cache_store, Arc::clone(&clock), config.cache_window),
            records,
            clock,
            partition: config.partition.clone(),
            merge_deadline: config.merge_deadline,
        }
    }

    /// Wire the HTTP upstream clients and a SQLite backend at `db_path`.
    ///
    /// # Errors
    /// Returns [`FusionError::Upstream`] when the HTTP client cannot be built.
    pub fn from_config(config: &FusionConfig, db_path: PathBuf) -> Result<Self, FusionError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|err| FusionError::Upstream(format!("failed to build HTTP client: {err}")))?;
        let retry = RetryPolicy::from_config(config);
        let backend = Arc::new(SqliteBackend::new(db_path));

        Ok(Self::new(
            Arc::new(HttpCharacterClient::new(client.clone(), &config.character_api_base, retry)),
            Arc::new(
                HttpCreatureClient::new(client, &config.creature_api_base, retry)
                    .with_fallback_seed(config.fallback_seed),
            ),
            backend.clone(),
            backend,
            Arc::new(MonotonicClock::new(SystemClock)),
            config,
        ))
    }

    /// Merge Source A character `source_id` with its best creature match and persist it.
    ///
    /// Every call persists a new record, even for a repeated `source_id`.
    ///
    /// # Errors
    /// Returns [`FusionError::Merge`] wrapping whichever step failed, or a deadline error.
    pub async fn merge(&self, source_id: &str) -> Result<MergedRecord, FusionError> {
        match tokio::time::timeout(self.merge_deadline, self.merge_steps(source_id)).await {
            Ok(Ok(record)) => {
                tracing::info!(source_id, record_id = %record.id, "merged character");
                Ok(record)
            }
            Ok(Err(err)) => {
                tracing::warn!(source_id, kind = err.kind(), error = %err, "merge failed");
                Err(FusionError::merge(err))
            }
            Err(_) => {
                tracing::warn!(source_id, "merge deadline exceeded");
                Err(FusionError::merge(FusionError::Upstream(format!(
                    "merge of character {source_id} exceeded deadline of {}ms",
                    self.merge_deadline.as_millis()
                ))))
            }
        }
    }

    async fn merge_steps(&self, source_id: &str) -> Result<MergedRecord, FusionError> {
        if let Some(cached) = self.cache.get(source_id)? {
            tracing::debug!(source_id, "cache hit, skipping upstream lookups");
            return self.create_character(cached);
        }

        let profile = self.characters.fetch_character(source_id).await?;
        let creature =
            self.creatures.find_match(profile.measurement_target(), profile.color_hint()).await?;
        if creature.is_none() {
            tracing::debug!(source_id, "no creature match found");
        }
        let profile = profile.with_match(creature);

        self.cache.put(source_id, &profile)?;
        self.create_character(profile)
    }

    /// Persist `input` as a new merged record with a fresh id and timestamp.
    ///
    /// # Errors
    /// Returns [`FusionError::Create`] when the store write fails.
    pub fn create_character(&self, input: CharacterProfile) -> Result<MergedRecord, FusionError> {
        let record = MergedRecord::new(
            new_record_id(),
            input,
            self.partition.clone(),
            self.clock.now_millis(),
        );
        self.records
            .put_record(&record)
            .map_err(|err| FusionError::Create(format!("{err:#}")))?;
        Ok(record)
    }

    /// Read merged records oldest first, continuing after `cursor` when given.
    ///
    /// # Errors
    /// Returns [`FusionError::Validation`] for a limit outside `1..=100` and
    /// [`FusionError::History`] when the store query fails.
    pub fn get_history(
        &self,
        cursor: Option<&HistoryCursor>,
        limit: Option<u32>,
    ) -> Result<HistoryPage, FusionError> {
        let limit = limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
        if !(1..=MAX_HISTORY_LIMIT).contains(&limit) {
            return Err(FusionError::Validation(format!(
                "limit must be between 1 and {MAX_HISTORY_LIMIT}, got {limit}"
            )));
        }
        self.records
            .query_partition(&self.partition, limit, cursor)
            .map_err(|err| FusionError::History(format!("{err:#}")))
    }
}
