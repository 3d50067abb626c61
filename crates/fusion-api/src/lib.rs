//! Upstream clients, cache, persistence seams, and the merge orchestrator.

pub mod cache;
pub mod characters;
pub mod creatures;
pub mod retry;
pub mod service;
pub mod store;

pub use cache::CharacterCache;
pub use characters::{strip_excluded_fields, CharacterSource, HttpCharacterClient};
pub use creatures::{CreatureMatcher, HttpCreatureClient};
pub use retry::RetryPolicy;
pub use service::FusionService;
pub use store::{CacheStore, RecordStore, SqliteBackend};
