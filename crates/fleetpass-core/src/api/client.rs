//! API client for ordinary calls to the reservation server.
//!
//! This module provides the `ApiClient` struct, a typed JSON layer over the
//! [`RequestGate`]. Credentials, anti-forgery headers and renewal are the
//! gate's business; the client adds status mapping and rate-limit backoff.

use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use tracing::warn;

use super::{ApiError, ApiRequest, ApiResponse, RequestGate, SessionError, Transport};
use crate::config::SessionConfig;

/// API client for the reservation server.
/// Clone is cheap - the gate is shared, so renewal stays single-flight.
pub struct ApiClient<T> {
    gate: RequestGate<T>,
    max_rate_limit_retries: u32,
    initial_backoff: Duration,
}

impl<T> Clone for ApiClient<T> {
    fn clone(&self) -> Self {
        Self {
            gate: self.gate.clone(),
            max_rate_limit_retries: self.max_rate_limit_retries,
            initial_backoff: self.initial_backoff,
        }
    }
}

impl<T: Transport> ApiClient<T> {
    pub fn new(gate: RequestGate<T>, config: &SessionConfig) -> Self {
        Self {
            gate,
            max_rate_limit_retries: config.max_rate_limit_retries,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
        }
    }

    pub fn gate(&self) -> &RequestGate<T> {
        &self.gate
    }

    /// Send a request, backing off on 429 and mapping error statuses.
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, SessionError> {
        let mut retries = 0;
        let mut backoff = self.initial_backoff;

        loop {
            let response = self.gate.send(request.clone()).await?;

            if response.status.as_u16() != 429 {
                return Ok(response.error_for_status()?);
            }

            // Rate limited
            retries += 1;
            if retries > self.max_rate_limit_retries {
                return Err(ApiError::RateLimited.into());
            }
            warn!(
                path = %request.path,
                retry = retries,
                backoff_ms = backoff.as_millis() as u64,
                "Rate limited, backing off"
            );
            tokio::time::sleep(backoff).await;
            backoff *= 2; // Exponential backoff
        }
    }

    pub async fn get<R: DeserializeOwned>(&self, path: &str) -> Result<R, SessionError> {
        let response = self.send(ApiRequest::get(path)).await?;
        Ok(response.json()?)
    }

    pub async fn post<R: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, SessionError> {
        let response = self.send(ApiRequest::post(path).json(body)?).await?;
        Ok(response.json()?)
    }

    pub async fn delete(&self, path: &str) -> Result<(), SessionError> {
        self.send(ApiRequest::delete(path)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AccessCredential, TokenStore};
    use crate::testing::FakeTransport;
    use reqwest::StatusCode;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Deserialize, PartialEq)]
    #[serde(rename_all = "camelCase")]
    struct Vehicle {
        plate: String,
        seats: u8,
    }

    fn client(transport: &Arc<FakeTransport>) -> ApiClient<FakeTransport> {
        let config = SessionConfig::default();
        let store = TokenStore::new();
        store.set(Some(AccessCredential::new("t0")));
        let gate = RequestGate::new(&config, Arc::clone(transport), store).expect("valid config");
        ApiClient::new(gate, &config)
    }

    #[tokio::test]
    async fn test_get_parses_json() {
        let transport = Arc::new(FakeTransport::new());
        transport.respond("/vehicles/7", |_| {
            ApiResponse::with_json(StatusCode::OK, &serde_json::json!({"plate": "XYZ-0001", "seats": 5}))
        });

        let vehicle: Vehicle = client(&transport).get("/vehicles/7").await.expect("vehicle");
        assert_eq!(
            vehicle,
            Vehicle {
                plate: "XYZ-0001".into(),
                seats: 5
            }
        );
    }

    #[tokio::test]
    async fn test_post_sends_body() {
        let transport = Arc::new(FakeTransport::new());
        transport.respond("/reservations", |request| {
            ApiResponse::with_json(StatusCode::CREATED, request.body.as_ref().unwrap())
        });

        let echoed: serde_json::Value = client(&transport)
            .post("/reservations", &serde_json::json!({"vehicleId": 7}))
            .await
            .expect("created");
        assert_eq!(echoed["vehicleId"], 7);
    }

    #[tokio::test]
    async fn test_error_status_maps_to_api_error() {
        let transport = Arc::new(FakeTransport::new());
        let result: Result<serde_json::Value, _> = client(&transport).get("/missing").await;
        assert!(matches!(
            result,
            Err(SessionError::Api(ApiError::NotFound(_)))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_backoff_then_success() {
        let transport = Arc::new(FakeTransport::new());
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        transport.respond("/reports", move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                ApiResponse::new(StatusCode::TOO_MANY_REQUESTS)
            } else {
                ApiResponse::with_json(StatusCode::OK, &serde_json::json!({"rows": 0}))
            }
        });

        let started = tokio::time::Instant::now();
        let report: serde_json::Value = client(&transport).get("/reports").await.expect("report");
        assert_eq!(report["rows"], 0);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        // 1s + 2s of backoff
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_gives_up() {
        let transport = Arc::new(FakeTransport::new());
        transport.respond("/reports", |_| ApiResponse::new(StatusCode::TOO_MANY_REQUESTS));

        let result = client(&transport).delete("/reports").await;
        assert!(matches!(result, Err(SessionError::Api(ApiError::RateLimited))));
        // First attempt plus three retries
        assert_eq!(transport.calls_to("/reports"), 4);
    }
}
