//! Fixed-window request limiting per client address.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::ApiError;

/// Windows are swept once the table holds this many clients.
const SWEEP_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_after: Duration,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    hits: u32,
}

#[derive(Debug)]
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    clients: Mutex<HashMap<IpAddr, Window>>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self { max_requests, window, clients: Mutex::new(HashMap::new()) }
    }

    /// Count one request from `client` at `now`.
    pub fn check(&self, client: IpAddr, now: Instant) -> Decision {
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        if clients.len() >= SWEEP_THRESHOLD {
            clients.retain(|_, window| now.duration_since(window.started) < self.window);
        }

        let window = clients.entry(client).or_insert(Window { started: now, hits: 0 });
        if now.duration_since(window.started) >= self.window {
            *window = Window { started: now, hits: 0 };
        }
        let allowed = window.hits < self.max_requests;
        if allowed {
            window.hits += 1;
        }

        Decision {
            allowed,
            limit: self.max_requests,
            remaining: self.max_requests.saturating_sub(window.hits),
            reset_after: self.window.saturating_sub(now.duration_since(window.started)),
        }
    }
}

fn client_address(request: &Request) -> IpAddr {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED), |ConnectInfo(addr)| addr.ip())
}

fn apply_headers(response: &mut Response, decision: Decision) {
    let headers = response.headers_mut();
    let reset = decision.reset_after.as_secs_f64().ceil().to_string();
    for (name, value) in [
        ("ratelimit-limit", decision.limit.to_string()),
        ("ratelimit-remaining", decision.remaining.to_string()),
        ("ratelimit-reset", reset.clone()),
    ] {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(HeaderName::from_static(name), value);
        }
    }
    if !decision.allowed {
        if let Ok(value) = HeaderValue::from_str(&reset) {
            headers.insert(axum::http::header::RETRY_AFTER, value);
        }
    }
}

pub async fn enforce(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let client = client_address(&request);
    let decision = limiter.check(client, Instant::now());

    let mut response = if decision.allowed {
        next.run(request).await
    } else {
        tracing::warn!(%client, "rate limit exceeded");
        ApiError::new(
            StatusCode::TOO_MANY_REQUESTS,
            "Too many requests from this IP, please try again later.",
        )
        .into_response()
    };
    apply_headers(&mut response, decision);
    response
}
