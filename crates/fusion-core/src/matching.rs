//! Nearest-creature selection over Source B candidates.
//!
//! Candidates report height in decimetres and weight in hectograms; both are
//! normalized to centimetres and kilograms before scoring against a character.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::MatchedCreature;

/// Decimetres to centimetres.
pub const HEIGHT_SCALE: f64 = 10.0;
/// Hectograms to kilograms (divisor).
pub const WEIGHT_SCALE: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeasurementTarget {
    pub height: f64,
    pub mass: f64,
}

impl MeasurementTarget {
    #[must_use]
    pub fn new(height: f64, mass: f64) -> Self {
        Self { height, mass }
    }

    #[must_use]
    pub fn from_raw(height: &str, mass: &str) -> Self {
        Self { height: parse_measurement(height), mass: parse_measurement(mass) }
    }
}

/// Lenient numeric read of an upstream measurement.
///
/// Blank input reads as `0.0`; anything else that is not a plain number
/// (`"unknown"`, `"1,358"`) reads as NaN and can never win a comparison.
#[must_use]
pub fn parse_measurement(raw: &str) -> f64 {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    trimmed.parse::<f64>().unwrap_or(f64::NAN)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NamedResource {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Body of `pokemon-color/{color}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColorListing {
    pub pokemon_species: Vec<NamedResource>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreatureTypeSlot {
    #[serde(rename = "type")]
    pub kind: NamedResource,
}

/// Body of `pokemon/{name}`, in the catalog's native units.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreatureDetails {
    pub name: String,
    pub height: f64,
    pub weight: f64,
    #[serde(default)]
    pub types: Vec<CreatureTypeSlot>,
}

impl CreatureDetails {
    #[must_use]
    pub fn normalized_height(&self) -> f64 {
        self.height * HEIGHT_SCALE
    }

    #[must_use]
    pub fn normalized_weight(&self) -> f64 {
        self.weight / WEIGHT_SCALE
    }

    #[must_use]
    pub fn type_tags(&self) -> String {
        self.types.iter().map(|slot| slot.kind.name.as_str()).collect::<Vec<_>>().join(", ")
    }

    /// Combined absolute difference to `target`; NaN when either side is not numeric.
    #[must_use]
    pub fn distance_to(&self, target: MeasurementTarget) -> f64 {
        (target.height - self.normalized_height()).abs()
            + (target.mass - self.normalized_weight()).abs()
    }

    #[must_use]
    pub fn to_matched(&self) -> MatchedCreature {
        MatchedCreature {
            name: self.name.clone(),
            height: self.normalized_height(),
            weight: self.normalized_weight(),
            types: self.type_tags(),
        }
    }
}

/// Lowest-scoring candidate, scanning in order. Ties keep the earlier candidate.
#[must_use]
pub fn closest_candidate(
    target: MeasurementTarget,
    candidates: &[CreatureDetails],
) -> Option<&CreatureDetails> {
    let mut best = None;
    let mut best_score = f64::INFINITY;
    for candidate in candidates {
        let score = candidate.distance_to(target);
        if score < best_score {
            best_score = score;
            best = Some(candidate);
        }
    }
    best
}

/// Pick the creature for `target`: closest by score, otherwise a random candidate.
///
/// Returns `None` only when `candidates` is empty.
pub fn select_match<R>(
    target: MeasurementTarget,
    candidates: &[CreatureDetails],
    rng: &mut R,
) -> Option<MatchedCreature>
where
    R: Rng + ?Sized,
{
    if let Some(best) = closest_candidate(target, candidates) {
        return Some(best.to_matched());
    }
    candidates.choose(rng).map(CreatureDetails::to_matched)
}
