use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub mod clock;
pub mod matching;

pub use clock::{Clock, ManualClock, MonotonicClock, SystemClock};
pub use matching::{
    closest_candidate, parse_measurement, select_match, ColorListing, CreatureDetails,
    CreatureTypeSlot, MeasurementTarget, NamedResource, HEIGHT_SCALE, WEIGHT_SCALE,
};

/// Partition value shared by every merged record so the history index can scan them in order.
pub const DEFAULT_PARTITION: &str = "record";

/// Source A fields that are never carried into a merged record.
pub const EXCLUDED_SOURCE_FIELDS: [&str; 6] =
    ["films", "species", "vehicles", "starships", "created", "edited"];

/// Keys owned by the persistence layer; input values for these are discarded.
pub const RESERVED_RECORD_FIELDS: [&str; 3] = ["id", "dummy", "timestamp"];

pub const DEFAULT_HISTORY_LIMIT: u32 = 10;
pub const MAX_HISTORY_LIMIT: u32 = 100;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum FusionError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("upstream error: {0}")]
    Upstream(String),
    #[error("match error: {0}")]
    Match(String),
    #[error("cache error: {0}")]
    Cache(String),
    #[error("merge failed: {0}")]
    Merge(Box<FusionError>),
    #[error("create failed: {0}")]
    Create(String),
    #[error("history read failed: {0}")]
    History(String),
    #[error("validation error: {0}")]
    Validation(String),
}

impl FusionError {
    /// Wrap any failure of the merge flow, keeping the original error as the cause.
    #[must_use]
    pub fn merge(cause: FusionError) -> Self {
        Self::Merge(Box::new(cause))
    }

    /// The innermost error once every `Merge` wrapper is peeled off.
    #[must_use]
    pub fn root_cause(&self) -> &FusionError {
        match self {
            Self::Merge(cause) => cause.root_cause(),
            other => other,
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self.root_cause(), Self::NotFound(_))
    }

    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self.root_cause(), Self::Validation(_))
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Upstream(_) => "upstream",
            Self::Match(_) => "match",
            Self::Cache(_) => "cache",
            Self::Merge(_) => "merge",
            Self::Create(_) => "create",
            Self::History(_) => "history",
            Self::Validation(_) => "validation",
        }
    }
}

/// Creature attached to a merged record, measured in centimetres and kilograms.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchedCreature {
    pub name: String,
    pub height: f64,
    pub weight: f64,
    /// Type tags joined with `", "`.
    #[serde(rename = "type")]
    pub types: String,
}

/// Character fields accepted by record creation and produced by the Source A client.
///
/// Measurements stay free-form strings because upstream data carries values such as
/// `"unknown"` or `"1,358"`. Fields outside the named set are kept in `extra`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CharacterProfile {
    pub name: String,
    #[serde(deserialize_with = "deserialize_measurement")]
    pub height: String,
    #[serde(deserialize_with = "deserialize_measurement")]
    pub mass: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hair_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skin_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eye_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birth_year: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homeworld: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matching_pokemon: Option<MatchedCreature>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl CharacterProfile {
    #[must_use]
    pub fn measurement_target(&self) -> MeasurementTarget {
        MeasurementTarget::from_raw(&self.height, &self.mass)
    }

    /// Eye color used to pick the Source B candidate bucket; empty when unknown.
    #[must_use]
    pub fn color_hint(&self) -> &str {
        self.eye_color.as_deref().map_or("", str::trim)
    }

    #[must_use]
    pub fn with_match(mut self, creature: Option<MatchedCreature>) -> Self {
        if creature.is_some() {
            self.matching_pokemon = creature;
        }
        self
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawMeasurement {
    Text(String),
    Integer(i64),
    Float(f64),
}

fn deserialize_measurement<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match RawMeasurement::deserialize(deserializer)? {
        RawMeasurement::Text(text) => text,
        RawMeasurement::Integer(value) => value.to_string(),
        RawMeasurement::Float(value) => value.to_string(),
    })
}

/// A persisted merge result.
///
/// `id` is assigned once when the record is created and `timestamp` is the creation
/// time in milliseconds since the Unix epoch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MergedRecord {
    pub id: String,
    #[serde(flatten)]
    pub profile: CharacterProfile,
    #[serde(rename = "dummy")]
    pub partition: String,
    pub timestamp: i64,
}

impl MergedRecord {
    #[must_use]
    pub fn new(
        id: String,
        mut profile: CharacterProfile,
        partition: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        for key in RESERVED_RECORD_FIELDS {
            profile.extra.remove(key);
        }
        Self { id, profile, partition: partition.into(), timestamp }
    }

    #[must_use]
    pub fn cursor(&self) -> HistoryCursor {
        HistoryCursor {
            id: self.id.clone(),
            dummy: self.partition.clone(),
            timestamp: self.timestamp,
        }
    }
}

#[must_use]
pub fn new_record_id() -> String {
    Uuid::new_v4().to_string()
}

/// Continuation key for history reads; same shape as the store's index key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryCursor {
    pub id: String,
    pub dummy: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryPage {
    pub items: Vec<MergedRecord>,
    #[serde(
        rename = "lastEvaluatedKey",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub last_evaluated_key: Option<HistoryCursor>,
}

/// One cached Source A lookup, stored as serialized profile JSON.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheEntry {
    pub id: String,
    pub data: String,
    pub timestamp: i64,
    pub expires_at: i64,
}

impl CacheEntry {
    /// Age check against `window`; an entry exactly `window` old is still fresh.
    #[must_use]
    pub fn is_fresh(&self, now_millis: i64, window: Duration) -> bool {
        let window_millis = i64::try_from(window.as_millis()).unwrap_or(i64::MAX);
        now_millis.saturating_sub(self.timestamp) <= window_millis
    }
}

/// Runtime settings shared by the upstream clients, cache, and orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FusionConfig {
    /// Base URL of the character catalog (Source A), without trailing slash.
    pub character_api_base: String,
    /// Base URL of the creature catalog (Source B), without trailing slash.
    pub creature_api_base: String,
    /// Cached lookups older than this are treated as absent (default: 30 minutes)
    pub cache_window: Duration,
    pub partition: String,
    /// Timeout applied to each outbound request (default: 10s)
    pub request_timeout: Duration,
    /// Upper bound for one whole merge operation (default: 30s)
    pub merge_deadline: Duration,
    /// Retries for transient upstream failures (default: 0, single attempt)
    pub max_retries: u32,
    /// Linear backoff step between retries (default: 250ms)
    pub retry_delay: Duration,
    /// Seed for the random fallback pick; entropy-seeded when `None`.
    pub fallback_seed: Option<u64>,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            character_api_base: "https://swapi.dev/api".to_string(),
            creature_api_base: "https://pokeapi.co/api/v2".to_string(),
            cache_window: Duration::from_secs(30 * 60),
            partition: DEFAULT_PARTITION.to_string(),
            request_timeout: Duration::from_secs(10),
            merge_deadline: Duration::from_secs(30),
            max_retries: 0,
            retry_delay: Duration::from_millis(250),
            fallback_seed: None,
        }
    }
}
