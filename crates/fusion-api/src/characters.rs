//! Source A: the character catalog.

use async_trait::async_trait;
use fusion_core::{CharacterProfile, FusionError, EXCLUDED_SOURCE_FIELDS};
use reqwest::{Client, StatusCode};
use serde_json::{Map, Value};

use crate::retry::RetryPolicy;

#[async_trait]
pub trait CharacterSource: Send + Sync {
    /// Fetch one character by its catalog id.
    ///
    /// # Errors
    /// [`FusionError::NotFound`] when the catalog has no such character,
    /// [`FusionError::Upstream`] for any other failure.
    async fn fetch_character(&self, id: &str) -> Result<CharacterProfile, FusionError>;
}

pub struct HttpCharacterClient {
    client: Client,
    base_url: String,
    retry: RetryPolicy,
}

impl HttpCharacterClient {
    #[must_use]
    pub fn new(client: Client, base_url: &str, retry: RetryPolicy) -> Self {
        Self { client, base_url: base_url.trim_end_matches('/').to_string(), retry }
    }

    fn person_url(&self, id: &str) -> String {
        format!("{}/people/{}/", self.base_url, id)
    }
}

#[async_trait]
impl CharacterSource for HttpCharacterClient {
    async fn fetch_character(&self, id: &str) -> Result<CharacterProfile, FusionError> {
        let url = self.person_url(id);
        let response = self
            .retry
            .send(|| self.client.get(&url).send())
            .await
            .map_err(|err| FusionError::Upstream(format!("request to {url} failed: {err}")))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(FusionError::NotFound(format!("character {id} does not exist")));
        }
        if !status.is_success() {
            return Err(FusionError::Upstream(format!(
                "character catalog returned HTTP {status} for {id}"
            )));
        }

        let mut body: Map<String, Value> = response.json().await.map_err(|err| {
            FusionError::Upstream(format!("character {id} response is not a JSON object: {err}"))
        })?;
        strip_excluded_fields(&mut body);

        serde_json::from_value(Value::Object(body)).map_err(|err| {
            FusionError::Upstream(format!("character {id} response has unexpected shape: {err}"))
        })
    }
}

/// Remove catalog fields that never belong in a merged record.
pub fn strip_excluded_fields(body: &mut Map<String, Value>) {
    for field in EXCLUDED_SOURCE_FIELDS {
        body.remove(field);
    }
}
