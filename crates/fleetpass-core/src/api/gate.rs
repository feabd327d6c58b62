//! Request gate: credential attachment and single-flight renewal.
//!
//! Every outgoing call goes through the gate, which attaches the current
//! bearer credential (and the anti-forgery header on renew/terminate). When an
//! ordinary call is rejected with 401, the gate renews the credential once -
//! however many calls failed at the same time - and replays each failed call
//! with the new credential.
//!
//! ```text
//!   Idle ──first eligible 401──▶ Renewing { waiters }
//!    ▲                                │
//!    └──── renewal settles, drain ◀───┘
//! ```
//!
//! The pending queue only exists inside `Renewing`. The decision to renew and
//! the switch to `Renewing` happen under one lock, with no await in between.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::StatusCode;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::{ApiError, ApiRequest, ApiResponse, SessionError, Transport};
use crate::auth::credential::CredentialResponse;
use crate::auth::{AccessCredential, CsrfGuard, TokenStore};
use crate::config::{SessionConfig, SessionEndpoints};
use crate::utils::lock;

/// Outcome broadcast to every waiter of one renewal cycle.
type RenewalOutcome = Result<AccessCredential, String>;

enum GateState {
    Idle,
    Renewing {
        waiters: Vec<oneshot::Sender<RenewalOutcome>>,
    },
}

struct GateInner<T> {
    transport: Arc<T>,
    store: TokenStore,
    csrf: CsrfGuard<T>,
    endpoints: SessionEndpoints,
    state: Mutex<GateState>,
    renewals: AtomicU64,
    /// Bumped on logout; a renewal that straddles a bump is discarded.
    epoch: AtomicU64,
}

/// Clone is cheap - clones share state, so single-flight holds across them.
pub struct RequestGate<T> {
    inner: Arc<GateInner<T>>,
}

impl<T> Clone for RequestGate<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Non-owning handle, for callbacks stored inside the token store.
pub struct WeakRequestGate<T> {
    inner: Weak<GateInner<T>>,
}

impl<T> Clone for WeakRequestGate<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<T> WeakRequestGate<T> {
    pub fn upgrade(&self) -> Option<RequestGate<T>> {
        self.inner.upgrade().map(|inner| RequestGate { inner })
    }
}

impl<T: Transport> RequestGate<T> {
    pub fn new(
        config: &SessionConfig,
        transport: Arc<T>,
        store: TokenStore,
    ) -> Result<Self, ApiError> {
        let csrf = CsrfGuard::new(config, Arc::clone(&transport))?;
        Ok(Self {
            inner: Arc::new(GateInner {
                transport,
                store,
                csrf,
                endpoints: config.endpoints.clone(),
                state: Mutex::new(GateState::Idle),
                renewals: AtomicU64::new(0),
                epoch: AtomicU64::new(0),
            }),
        })
    }

    pub fn downgrade(&self) -> WeakRequestGate<T> {
        WeakRequestGate {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Drop the credential and discard the result of any renewal in flight.
    pub fn end_session(&self) {
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.store.clear();
    }

    pub fn store(&self) -> &TokenStore {
        &self.inner.store
    }

    pub fn csrf(&self) -> &CsrfGuard<T> {
        &self.inner.csrf
    }

    pub fn endpoints(&self) -> &SessionEndpoints {
        &self.inner.endpoints
    }

    /// Number of renewal calls issued to the server so far.
    pub fn renewal_count(&self) -> u64 {
        self.inner.renewals.load(Ordering::Relaxed)
    }

    pub fn is_renewing(&self) -> bool {
        matches!(*lock(&self.inner.state), GateState::Renewing { .. })
    }

    /// Send `request`, recovering from one authorization failure.
    ///
    /// Statuses other than 401 come back as responses. For ordinary calls a
    /// 401 never does: it is either recovered, or escalated to
    /// `RenewalFailed` / `AuthorizationExpired`. Session operations
    /// (exchange, renew, terminate) get their responses back unmodified.
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, SessionError> {
        let sent_with = self.inner.store.get();
        let response = self.inner.dispatch(&request, sent_with.as_ref()).await?;

        if response.status != StatusCode::UNAUTHORIZED
            || self.inner.endpoints.is_session_operation(&request.path)
        {
            return Ok(response);
        }

        let credential = match (self.inner.store.get(), sent_with) {
            // Renewed while this call was in flight: replay without renewing again
            (Some(current), sent_with) if sent_with.as_ref() != Some(&current) => {
                debug!(path = %request.path, "Credential changed in flight, replaying");
                current
            }
            // Signed out while in flight: do not bring the session back
            (None, Some(_)) => return Err(SessionError::NotAuthenticated),
            _ => {
                debug!(path = %request.path, "Authorization expired, waiting for renewal");
                self.renew().await?
            }
        };

        let replayed = self.inner.dispatch(&request, Some(&credential)).await?;
        if replayed.status == StatusCode::UNAUTHORIZED {
            warn!(path = %request.path, "Request rejected again after renewal");
            return Err(SessionError::AuthorizationExpired);
        }
        Ok(replayed)
    }

    /// Renew the access credential, joining the renewal already in flight if
    /// there is one. This is the only path that calls the renewal endpoint.
    pub async fn renew(&self) -> Result<AccessCredential, SessionError> {
        let (tx, rx) = oneshot::channel();
        // Epoch of the session this renewal belongs to, taken with the state
        // switch so a logout before the task first runs still discards it
        let leader_epoch = {
            let mut state = lock(&self.inner.state);
            match &mut *state {
                GateState::Renewing { waiters } => {
                    waiters.push(tx);
                    None
                }
                GateState::Idle => {
                    *state = GateState::Renewing { waiters: vec![tx] };
                    Some(self.inner.epoch.load(Ordering::SeqCst))
                }
            }
        };

        if let Some(epoch) = leader_epoch {
            // Own task: a caller that gives up must not strand the queue
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move { inner.run_renewal(epoch).await });
        }

        match rx.await {
            Ok(Ok(credential)) => Ok(credential),
            Ok(Err(reason)) => Err(SessionError::RenewalFailed(reason)),
            Err(_) => Err(SessionError::RenewalFailed(
                "renewal was abandoned".to_string(),
            )),
        }
    }
}

impl<T: Transport> GateInner<T> {
    /// Attach credential and anti-forgery headers, then execute.
    async fn dispatch(
        &self,
        request: &ApiRequest,
        credential: Option<&AccessCredential>,
    ) -> Result<ApiResponse, SessionError> {
        let mut prepared = request.clone();

        if let Some(credential) = credential {
            if !prepared.headers.contains_key(AUTHORIZATION) {
                let value = HeaderValue::from_str(&format!("Bearer {}", credential.as_str()))
                    .map_err(|_| {
                        ApiError::InvalidRequest("Credential is not a valid header value".into())
                    })?;
                prepared.headers.insert(AUTHORIZATION, value);
            }
        }

        if self.endpoints.requires_anti_forgery(&prepared.path) {
            match self.csrf.header_for() {
                Some((name, value)) => {
                    prepared.headers.insert(name, value);
                }
                None => warn!(path = %prepared.path, "No anti-forgery cookie for session call"),
            }
        }

        Ok(self.transport.execute(prepared).await?)
    }

    async fn run_renewal(&self, epoch: u64) {
        let mut outcome = self.request_new_credential().await;

        if self.epoch.load(Ordering::SeqCst) != epoch {
            debug!("Session ended during renewal, discarding result");
            outcome = Err(SessionError::NotAuthenticated);
        }

        match &outcome {
            Err(SessionError::NotAuthenticated) => {}
            Ok(credential) => {
                info!("Access credential renewed");
                self.store.set(Some(credential.clone()));
            }
            Err(e) => {
                warn!(error = %e, "Credential renewal failed, ending session");
                self.store.clear();
            }
        }

        // Back to Idle before waking anyone: failures from here on start a
        // new cycle instead of joining this one.
        let waiters = match std::mem::replace(&mut *lock(&self.state), GateState::Idle) {
            GateState::Renewing { waiters } => waiters,
            GateState::Idle => Vec::new(),
        };
        debug!(waiters = waiters.len(), "Releasing requests queued on renewal");

        let outcome = outcome.map_err(|e| e.to_string());
        for waiter in waiters {
            // Receiver gone means the caller stopped waiting
            let _ = waiter.send(outcome.clone());
        }
    }

    async fn request_new_credential(&self) -> Result<AccessCredential, SessionError> {
        self.renewals.fetch_add(1, Ordering::Relaxed);
        self.csrf.ensure().await?;

        let request = ApiRequest::post(self.endpoints.renew.clone()).json(&serde_json::json!({}))?;
        let current = self.store.get();
        let response = self.dispatch(&request, current.as_ref()).await?;

        match response.status {
            status if status.is_success() => {
                let body: CredentialResponse = response.json()?;
                Ok(body.access_credential)
            }
            StatusCode::FORBIDDEN => Err(SessionError::AntiForgeryMismatch),
            _ => Err(ApiError::from_status(response.status, &response.text()).into()),
        }
    }
}
