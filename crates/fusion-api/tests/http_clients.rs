use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use fusion_api::{
    CharacterSource, CreatureMatcher, HttpCharacterClient, HttpCreatureClient, RetryPolicy,
};
use fusion_core::{FusionError, MeasurementTarget, EXCLUDED_SOURCE_FIELDS};
use serde_json::{json, Value};

async fn spawn_upstream(router: Router) -> String {
    let listener = match tokio::net::TcpListener::bind("127.0.0.1:0").await {
        Ok(listener) => listener,
        Err(err) => panic!("failed to bind fake upstream: {err}"),
    };
    let addr = match listener.local_addr() {
        Ok(addr) => addr,
        Err(err) => panic!("fake upstream has no address: {err}"),
    };
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    format!("http://{addr}")
}

async fn person(Path(id): Path<String>) -> (StatusCode, Json<Value>) {
    match id.as_str() {
        "1" => (
            StatusCode::OK,
            Json(json!({
                "name": "Luke Skywalker",
                "height": "172",
                "mass": "77",
                "eye_color": "blue",
                "gender": "male",
                "homeworld": "https://swapi.dev/api/planets/1/",
                "films": ["https://swapi.dev/api/films/1/"],
                "species": [],
                "vehicles": [],
                "starships": [],
                "created": "2014-12-09T13:50:51.644000Z",
                "edited": "2014-12-20T21:17:56.891000Z",
                "url": "https://swapi.dev/api/people/1/"
            })),
        ),
        "500" => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "detail": "boom" }))),
        _ => (StatusCode::NOT_FOUND, Json(json!({ "detail": "Not found" }))),
    }
}

fn character_client(base: &str) -> HttpCharacterClient {
    HttpCharacterClient::new(reqwest::Client::new(), base, RetryPolicy::default())
}

// Test IDs: TUP-001
#[tokio::test]
async fn character_fetch_strips_excluded_fields() -> Result<(), FusionError> {
    let base = spawn_upstream(Router::new().route("/people/:id/", get(person))).await;

    let profile = character_client(&base).fetch_character("1").await?;

    assert_eq!(profile.name, "Luke Skywalker");
    assert_eq!(profile.height, "172");
    assert_eq!(profile.eye_color.as_deref(), Some("blue"));
    for field in EXCLUDED_SOURCE_FIELDS {
        assert!(!profile.extra.contains_key(field), "{field} should not survive");
    }
    Ok(())
}

#[tokio::test]
async fn missing_character_is_not_found() {
    let base = spawn_upstream(Router::new().route("/people/:id/", get(person))).await;

    match character_client(&base).fetch_character("9999").await {
        Err(FusionError::NotFound(message)) => assert!(message.contains("9999")),
        other => panic!("expected not found, got {other:?}"),
    }
}

#[tokio::test]
async fn character_server_error_is_upstream_error() {
    let base = spawn_upstream(Router::new().route("/people/:id/", get(person))).await;

    match character_client(&base).fetch_character("500").await {
        Err(FusionError::Upstream(message)) => assert!(message.contains("500")),
        other => panic!("expected upstream error, got {other:?}"),
    }
}

// Test IDs: TUP-002
#[tokio::test]
async fn server_errors_are_retried_until_success() -> Result<(), FusionError> {
    let hits = Arc::new(AtomicUsize::new(0));
    let router = Router::new()
        .route(
            "/people/:id/",
            get(|State(hits): State<Arc<AtomicUsize>>| async move {
                if hits.fetch_add(1, Ordering::SeqCst) < 2 {
                    (StatusCode::SERVICE_UNAVAILABLE, Json(json!({})))
                } else {
                    (StatusCode::OK, Json(json!({ "name": "R2-D2", "height": "96", "mass": "32" })))
                }
            }),
        )
        .with_state(Arc::clone(&hits));
    let base = spawn_upstream(router).await;
    let retry = RetryPolicy { max_retries: 2, base_delay: Duration::from_millis(5) };

    let profile = HttpCharacterClient::new(reqwest::Client::new(), &base, retry)
        .fetch_character("3")
        .await?;

    assert_eq!(profile.name, "R2-D2");
    assert_eq!(hits.load(Ordering::SeqCst), 3);
    Ok(())
}

// Test IDs: TUP-003
#[tokio::test]
async fn exhausted_retries_surface_the_last_server_error() {
    let hits = Arc::new(AtomicUsize::new(0));
    let router = Router::new()
        .route(
            "/people/:id/",
            get(|State(hits): State<Arc<AtomicUsize>>| async move {
                hits.fetch_add(1, Ordering::SeqCst);
                StatusCode::BAD_GATEWAY
            }),
        )
        .with_state(Arc::clone(&hits));
    let base = spawn_upstream(router).await;
    let retry = RetryPolicy { max_retries: 1, base_delay: Duration::from_millis(5) };

    let result =
        HttpCharacterClient::new(reqwest::Client::new(), &base, retry).fetch_character("5").await;

    assert!(matches!(result, Err(FusionError::Upstream(_))));
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let hits = Arc::new(AtomicUsize::new(0));
    let router = Router::new()
        .route(
            "/people/:id/",
            get(|State(hits): State<Arc<AtomicUsize>>| async move {
                hits.fetch_add(1, Ordering::SeqCst);
                StatusCode::NOT_FOUND
            }),
        )
        .with_state(Arc::clone(&hits));
    let base = spawn_upstream(router).await;
    let retry = RetryPolicy { max_retries: 3, base_delay: Duration::from_millis(5) };

    let result =
        HttpCharacterClient::new(reqwest::Client::new(), &base, retry).fetch_character("4").await;

    assert!(matches!(result, Err(FusionError::NotFound(_))));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

async fn color(Path(color): Path<String>) -> (StatusCode, Json<Value>) {
    if color == "yellow" {
        (
            StatusCode::OK,
            Json(json!({
                "name": "yellow",
                "pokemon_species": [
                    { "name": "pikachu", "url": "https://pokeapi.co/api/v2/pokemon-species/25/" },
                    { "name": "raichu", "url": "https://pokeapi.co/api/v2/pokemon-species/26/" },
                    { "name": "missingno" }
                ]
            })),
        )
    } else {
        (StatusCode::NOT_FOUND, Json(json!({})))
    }
}

async fn creature(Path(name): Path<String>) -> (StatusCode, Json<Value>) {
    let (height, weight, kind) = match name.as_str() {
        "pikachu" => (4, 60, "electric"),
        "raichu" => (8, 300, "electric"),
        _ => return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({}))),
    };
    (
        StatusCode::OK,
        Json(json!({
            "name": name,
            "height": height,
            "weight": weight,
            "types": [
                { "slot": 1, "type": { "name": kind, "url": "https://pokeapi.co/api/v2/type/13/" } }
            ]
        })),
    )
}

async fn creature_client() -> HttpCreatureClient {
    let base = spawn_upstream(
        Router::new()
            .route("/pokemon-color/:color", get(color))
            .route("/pokemon/:name", get(creature)),
    )
    .await;
    HttpCreatureClient::new(reqwest::Client::new(), &base, RetryPolicy::default())
}

// Test IDs: TUP-004
#[tokio::test]
async fn closest_creature_wins_and_failed_details_are_skipped() -> Result<(), FusionError> {
    let client = creature_client().await;

    let matched = client.find_match(MeasurementTarget::new(170.0, 70.0), "yellow").await?;

    let Some(matched) = matched else {
        panic!("a yellow candidate should match");
    };
    assert_eq!(matched.name, "raichu");
    assert!((matched.height - 80.0).abs() < f64::EPSILON);
    assert!((matched.weight - 30.0).abs() < f64::EPSILON);
    assert_eq!(matched.types, "electric");
    Ok(())
}

#[tokio::test]
async fn unknown_color_yields_no_match() -> Result<(), FusionError> {
    let client = creature_client().await;
    let matched = client.find_match(MeasurementTarget::new(170.0, 70.0), "plaid").await?;
    assert!(matched.is_none());
    Ok(())
}

#[tokio::test]
async fn unmeasurable_target_falls_back_to_a_seeded_pick() -> Result<(), FusionError> {
    let client = creature_client().await.with_fallback_seed(Some(7));

    let first =
        client.find_match(MeasurementTarget::from_raw("unknown", "unknown"), "yellow").await?;
    let second =
        client.find_match(MeasurementTarget::from_raw("unknown", "unknown"), "yellow").await?;

    let Some(first) = first else {
        panic!("fallback should pick some candidate");
    };
    assert!(first.name == "pikachu" || first.name == "raichu");
    assert_eq!(Some(first), second);
    Ok(())
}

#[tokio::test]
async fn malformed_color_listing_is_a_match_error() {
    let not_json = get(|| async { (StatusCode::OK, "not json") });
    let base = spawn_upstream(Router::new().route("/pokemon-color/:color", not_json)).await;
    let client = HttpCreatureClient::new(reqwest::Client::new(), &base, RetryPolicy::default());

    match client.find_match(MeasurementTarget::new(170.0, 70.0), "yellow").await {
        Err(FusionError::Match(message)) => assert!(message.contains("yellow")),
        other => panic!("expected match error, got {other:?}"),
    }
}

#[tokio::test]
async fn unreachable_creature_catalog_is_a_match_error() {
    let client = HttpCreatureClient::new(
        reqwest::Client::new(),
        "http://127.0.0.1:1",
        RetryPolicy::default(),
    );

    let result = client.find_match(MeasurementTarget::new(170.0, 70.0), "blue").await;

    assert!(matches!(result, Err(FusionError::Match(_))), "got {result:?}");
}
