//! Test doubles: a scripted transport and a clock that follows tokio's
//! (pausable) time.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use reqwest::header::AUTHORIZATION;
use reqwest::StatusCode;

use crate::api::{ApiError, ApiRequest, ApiResponse, Transport};
use crate::auth::{AccessCredential, Clock};
use crate::utils::lock;

/// 2026-01-01T00:00:00Z
const VIRTUAL_EPOCH_SECS: i64 = 1_767_225_600;

/// Wall clock that advances with `tokio::time`, so paused-time tests see
/// credential expiry move in step with timers.
pub(crate) struct VirtualClock {
    origin: DateTime<Utc>,
    started: tokio::time::Instant,
}

impl VirtualClock {
    pub(crate) fn new() -> Self {
        Self {
            origin: DateTime::from_timestamp(VIRTUAL_EPOCH_SECS, 0).unwrap_or_default(),
            started: tokio::time::Instant::now(),
        }
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.started.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.origin + elapsed
    }
}

/// Build a signed-looking credential for `sub` expiring at `exp`.
pub(crate) fn mint_credential(sub: &str, exp: DateTime<Utc>) -> AccessCredential {
    static SERIAL: AtomicU64 = AtomicU64::new(0);
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = serde_json::json!({
        "sub": sub,
        "role": "requester",
        "exp": exp.timestamp(),
        "jti": SERIAL.fetch_add(1, Ordering::Relaxed),
    });
    let payload = URL_SAFE_NO_PAD.encode(payload.to_string().as_bytes());
    AccessCredential::new(format!("{header}.{payload}.c2lnbmF0dXJl"))
}

pub(crate) fn bearer_of(request: &ApiRequest) -> Option<String> {
    request
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

type Handler = Arc<dyn Fn(&ApiRequest) -> ApiResponse + Send + Sync>;

/// Scripted transport keyed by request path.
///
/// Unscripted paths answer 404, except the anti-forgery endpoint, which sets
/// the `csrf_token` cookie like the real server does.
#[derive(Default)]
pub(crate) struct FakeTransport {
    handlers: Mutex<HashMap<String, Handler>>,
    delays: Mutex<HashMap<String, Duration>>,
    cookies: Mutex<HashMap<String, String>>,
    calls: Mutex<Vec<ApiRequest>>,
    offline: Mutex<Vec<String>>,
}

impl FakeTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn respond<F>(&self, path: &str, handler: F)
    where
        F: Fn(&ApiRequest) -> ApiResponse + Send + Sync + 'static,
    {
        lock(&self.handlers).insert(path.to_string(), Arc::new(handler));
    }

    pub(crate) fn delay(&self, path: &str, delay: Duration) {
        lock(&self.delays).insert(path.to_string(), delay);
    }

    /// Requests to `path` fail as if the network were down.
    pub(crate) fn go_offline(&self, path: &str) {
        lock(&self.offline).push(path.to_string());
    }

    pub(crate) fn set_cookie(&self, name: &str, value: &str) {
        lock(&self.cookies).insert(name.to_string(), value.to_string());
    }

    pub(crate) fn calls_to(&self, path: &str) -> usize {
        lock(&self.calls).iter().filter(|r| r.path == path).count()
    }

    pub(crate) fn requests_to(&self, path: &str) -> Vec<ApiRequest> {
        lock(&self.calls)
            .iter()
            .filter(|r| r.path == path)
            .cloned()
            .collect()
    }
}

impl Transport for FakeTransport {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        lock(&self.calls).push(request.clone());

        let delay = lock(&self.delays).get(&request.path).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if lock(&self.offline).contains(&request.path) {
            return Err(ApiError::InvalidResponse("connection refused".to_string()));
        }

        let handler = lock(&self.handlers).get(&request.path).cloned();
        match handler {
            Some(handler) => Ok(handler(&request)),
            None if request.path == "/session/anti-forgery" => {
                self.set_cookie("csrf_token", "fake-csrf");
                Ok(ApiResponse::new(StatusCode::NO_CONTENT))
            }
            None => Ok(ApiResponse::new(StatusCode::NOT_FOUND)),
        }
    }

    fn cookie(&self, name: &str) -> Option<String> {
        lock(&self.cookies).get(name).cloned()
    }
}
