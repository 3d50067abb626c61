//! Request validation for the `/api` routes.
//! Every check runs to completion so one response lists every problem.

use std::collections::HashMap;

use fusion_core::{CharacterProfile, HistoryCursor, MAX_HISTORY_LIMIT};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

const EMAIL_PATTERN: &str = concat!(
    r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@",
    r"[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?",
    r"(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?)+$",
);

const GENDERS: [&str; 4] = ["male", "female", "unknown", "n/a"];

const CHARACTER_FIELDS: [&str; 11] = [
    "name",
    "height",
    "mass",
    "hair_color",
    "skin_color",
    "eye_color",
    "birth_year",
    "gender",
    "homeworld",
    "url",
    "matching_pokemon",
];

const CREATURE_FIELDS: [&str; 4] = ["name", "height", "weight", "type"];

const CURSOR_FIELDS: [&str; 3] = ["id", "dummy", "timestamp"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{}", .0.join(". "))]
    Rejected(Vec<String>),
    #[error("invalid JSON body: {0}")]
    InvalidJson(String),
    #[error("validator misconfigured: {0}")]
    Pattern(String),
}

/// Accumulates problems across one request payload.
#[derive(Debug, Default)]
struct Problems(Vec<String>);

impl Problems {
    fn push(&mut self, problem: impl Into<String>) {
        self.0.push(problem.into());
    }

    fn finish(self) -> Result<(), ValidationError> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::Rejected(self.0))
        }
    }
}

/// # Errors
/// Returns [`ValidationError::InvalidJson`] when `body` is not a JSON object.
pub fn parse_json_object(body: &[u8]) -> Result<Map<String, Value>, ValidationError> {
    match serde_json::from_slice(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ValidationError::InvalidJson("\"value\" must be of type object".into())),
        Err(err) => Err(ValidationError::InvalidJson(err.to_string())),
    }
}

fn reject_unknown_keys(
    map: &Map<String, Value>,
    allowed: &[&str],
    prefix: &str,
    problems: &mut Problems,
) {
    for key in map.keys() {
        if !allowed.contains(&key.as_str()) {
            problems.push(format!("\"{prefix}{key}\" is not allowed"));
        }
    }
}

/// # Errors
/// Returns [`ValidationError::Pattern`] if the email pattern fails to compile.
pub fn is_email(candidate: &str) -> Result<bool, ValidationError> {
    let re = regex_lite::Regex::new(EMAIL_PATTERN)
        .map_err(|err| ValidationError::Pattern(err.to_string()))?;
    Ok(candidate.len() <= 254 && re.is_match(candidate))
}

/// Validate the body of a token request and return the email.
///
/// # Errors
/// Returns [`ValidationError::Rejected`] when `email` is missing or malformed.
pub fn validate_auth_body(body: &Map<String, Value>) -> Result<String, ValidationError> {
    let mut problems = Problems::default();
    reject_unknown_keys(body, &["email"], "", &mut problems);

    let email = match body.get("email") {
        None => {
            problems.push("\"email\" is required");
            None
        }
        Some(Value::String(email)) => {
            if is_email(email)? {
                Some(email.clone())
            } else {
                problems.push("\"email\" must be a valid email");
                None
            }
        }
        Some(_) => {
            problems.push("\"email\" must be a string");
            None
        }
    };

    problems.finish()?;
    email.ok_or_else(|| ValidationError::Rejected(vec!["\"email\" is required".into()]))
}

/// # Errors
/// Returns [`ValidationError::Rejected`] unless `raw` is an integer.
pub fn parse_character_id(raw: &str) -> Result<i64, ValidationError> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| ValidationError::Rejected(vec!["\"characterId\" must be an integer".into()]))
}

// Integers may arrive as JSON numbers or numeric strings.
fn is_integer(value: &Value) -> bool {
    match value {
        Value::Number(number) => {
            number.is_i64() || number.is_u64() || number.as_f64().is_some_and(|f| f.fract() == 0.0)
        }
        Value::String(text) => text.trim().parse::<i64>().is_ok(),
        _ => false,
    }
}

fn require_integer(map: &Map<String, Value>, key: &str, prefix: &str, problems: &mut Problems) {
    match map.get(key) {
        None => problems.push(format!("\"{prefix}{key}\" is required")),
        Some(value) if is_integer(value) => {}
        Some(_) => problems.push(format!("\"{prefix}{key}\" must be an integer")),
    }
}

fn require_string(map: &Map<String, Value>, key: &str, prefix: &str, problems: &mut Problems) {
    match map.get(key) {
        None => problems.push(format!("\"{prefix}{key}\" is required")),
        Some(value) => check_string(value, key, prefix, problems),
    }
}

fn optional_string(map: &Map<String, Value>, key: &str, problems: &mut Problems) {
    if let Some(value) = map.get(key) {
        check_string(value, key, "", problems);
    }
}

fn check_string(value: &Value, key: &str, prefix: &str, problems: &mut Problems) {
    match value {
        Value::String(text) if text.is_empty() => {
            problems.push(format!("\"{prefix}{key}\" is not allowed to be empty"));
        }
        Value::String(_) => {}
        _ => problems.push(format!("\"{prefix}{key}\" must be a string")),
    }
}

fn optional_uri(map: &Map<String, Value>, key: &str, problems: &mut Problems) {
    match map.get(key) {
        None => {}
        Some(Value::String(text)) if url::Url::parse(text).is_ok() => {}
        Some(_) => problems.push(format!("\"{key}\" must be a valid uri")),
    }
}

fn check_matching_creature(value: &Value, problems: &mut Problems) {
    let Value::Object(creature) = value else {
        problems.push("\"matching_pokemon\" must be of type object");
        return;
    };
    let prefix = "matching_pokemon.";
    reject_unknown_keys(creature, &CREATURE_FIELDS, prefix, problems);
    require_string(creature, "name", prefix, problems);
    require_integer(creature, "height", prefix, problems);
    require_integer(creature, "weight", prefix, problems);
    require_string(creature, "type", prefix, problems);
}

/// Validate a direct-create body and convert it into a profile.
///
/// # Errors
/// Returns [`ValidationError::Rejected`] listing every rule the body breaks.
pub fn validate_create_body(body: Map<String, Value>) -> Result<CharacterProfile, ValidationError> {
    let mut problems = Problems::default();
    reject_unknown_keys(&body, &CHARACTER_FIELDS, "", &mut problems);

    require_string(&body, "name", "", &mut problems);
    require_integer(&body, "height", "", &mut problems);
    require_integer(&body, "mass", "", &mut problems);
    for key in ["hair_color", "skin_color", "eye_color", "birth_year"] {
        optional_string(&body, key, &mut problems);
    }
    match body.get("gender") {
        None => problems.push("\"gender\" is required"),
        Some(Value::String(gender)) if GENDERS.contains(&gender.as_str()) => {}
        Some(_) => problems.push(format!("\"gender\" must be one of [{}]", GENDERS.join(", "))),
    }
    optional_uri(&body, "homeworld", &mut problems);
    optional_uri(&body, "url", &mut problems);
    if let Some(creature) = body.get("matching_pokemon") {
        check_matching_creature(creature, &mut problems);
    }
    problems.finish()?;

    serde_json::from_value(Value::Object(body))
        .map_err(|err| ValidationError::Rejected(vec![format!("body has unexpected shape: {err}")]))
}

/// Validated history query: optional page size and continuation key.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct HistoryQuery {
    pub limit: Option<u32>,
    pub last_evaluated_key: Option<HistoryCursor>,
}

fn parse_cursor(raw: &str, problems: &mut Problems) -> Option<HistoryCursor> {
    let invalid = "\"lastEvaluatedKey\" contains an invalid value";
    let Ok(Value::Object(key)) = serde_json::from_str::<Value>(raw) else {
        problems.push(invalid);
        return None;
    };

    let mut key_problems = Problems::default();
    reject_unknown_keys(&key, &CURSOR_FIELDS, "lastEvaluatedKey.", &mut key_problems);
    let id = key.get("id").and_then(Value::as_str).filter(|id| Uuid::parse_str(id).is_ok());
    let dummy = key.get("dummy").and_then(Value::as_str).filter(|dummy| !dummy.is_empty());
    let timestamp = key.get("timestamp").and_then(Value::as_i64);

    match (id, dummy, timestamp, key_problems.0.is_empty()) {
        (Some(id), Some(dummy), Some(timestamp), true) => Some(HistoryCursor {
            id: id.to_string(),
            dummy: dummy.to_string(),
            timestamp,
        }),
        _ => {
            problems.push(invalid);
            None
        }
    }
}

/// # Errors
/// Returns [`ValidationError::Rejected`] for an out-of-range limit, a malformed
/// continuation key, or an unknown query parameter.
pub fn parse_history_query(
    params: &HashMap<String, String>,
) -> Result<HistoryQuery, ValidationError> {
    let mut problems = Problems::default();
    let mut keys: Vec<&String> = params.keys().collect();
    keys.sort();
    for key in keys {
        if key != "limit" && key != "lastEvaluatedKey" {
            problems.push(format!("\"{key}\" is not allowed"));
        }
    }

    let limit = params.get("limit").and_then(|raw| match raw.trim().parse::<i64>() {
        Ok(value) if (1..=i64::from(MAX_HISTORY_LIMIT)).contains(&value) => {
            u32::try_from(value).ok()
        }
        Ok(_) => {
            problems.push(format!("\"limit\" must be between 1 and {MAX_HISTORY_LIMIT}"));
            None
        }
        Err(_) => {
            problems.push("\"limit\" must be an integer");
            None
        }
    });
    let last_evaluated_key =
        params.get("lastEvaluatedKey").and_then(|raw| parse_cursor(raw, &mut problems));

    problems.finish()?;
    Ok(HistoryQuery { limit, last_evaluated_key })
}
