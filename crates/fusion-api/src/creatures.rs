//! Source B: the creature catalog and best-match lookup.

use async_trait::async_trait;
use futures::future::join_all;
use fusion_core::{
    select_match, ColorListing, CreatureDetails, FusionError, MatchedCreature, MeasurementTarget,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use reqwest::Client;

use crate::retry::RetryPolicy;

#[async_trait]
pub trait CreatureMatcher: Send + Sync {
    /// Find the creature closest to `target` among those listed under `color_hint`.
    ///
    /// `Ok(None)` covers the expected misses: an unknown color bucket or no
    /// retrievable candidate.
    ///
    /// # Errors
    /// [`FusionError::Match`] when the color listing cannot be fetched or decoded.
    async fn find_match(
        &self,
        target: MeasurementTarget,
        color_hint: &str,
    ) -> Result<Option<MatchedCreature>, FusionError>;
}

pub struct HttpCreatureClient {
    client: Client,
    base_url: String,
    retry: RetryPolicy,
    fallback_seed: Option<u64>,
}

impl HttpCreatureClient {
    #[must_use]
    pub fn new(client: Client, base_url: &str, retry: RetryPolicy) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry,
            fallback_seed: None,
        }
    }

    /// Make the random fallback pick reproducible.
    #[must_use]
    pub fn with_fallback_seed(mut self, seed: Option<u64>) -> Self {
        self.fallback_seed = seed;
        self
    }

    fn fallback_rng(&self) -> StdRng {
        match self.fallback_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }

    async fn fetch_details(&self, name: &str) -> Option<CreatureDetails> {
        let url = format!("{}/pokemon/{}", self.base_url, name);
        let response = match self.retry.send(|| self.client.get(&url).send()).await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(creature = name, error = %err, "creature detail request failed");
                return None;
            }
        };
        if !response.status().is_success() {
            tracing::debug!(
                creature = name,
                status = %response.status(),
                "creature detail unavailable"
            );
            return None;
        }
        match response.json::<CreatureDetails>().await {
            Ok(details) => Some(details),
            Err(err) => {
                tracing::warn!(
                    creature = name,
                    error = %err,
                    "creature detail has unexpected shape"
                );
                None
            }
        }
    }
}

#[async_trait]
impl CreatureMatcher for HttpCreatureClient {
    async fn find_match(
        &self,
        target: MeasurementTarget,
        color_hint: &str,
    ) -> Result<Option<MatchedCreature>, FusionError> {
        let color = color_hint.trim();
        if color.is_empty() {
            tracing::debug!("no color hint, skipping creature match");
            return Ok(None);
        }

        let url = format!("{}/pokemon-color/{}", self.base_url, color);
        let response = self
            .retry
            .send(|| self.client.get(&url).send())
            .await
            .map_err(|err| FusionError::Match(format!("request to {url} failed: {err}")))?;

        if !response.status().is_success() {
            tracing::warn!(
                color,
                status = %response.status(),
                "could not fetch creature list for color"
            );
            return Ok(None);
        }

        let listing: ColorListing = response.json().await.map_err(|err| {
            FusionError::Match(format!(
                "creature list for color {color} has unexpected shape: {err}"
            ))
        })?;

        let details = join_all(
            listing.pokemon_species.iter().map(|species| self.fetch_details(&species.name)),
        )
        .await
        .into_iter()
        .flatten()
        .collect::<Vec<_>>();

        tracing::debug!(
            color,
            listed = listing.pokemon_species.len(),
            retrieved = details.len(),
            "scoring creature candidates"
        );

        let mut rng = self.fallback_rng();
        Ok(select_match(target, &details, &mut rng))
    }
}
