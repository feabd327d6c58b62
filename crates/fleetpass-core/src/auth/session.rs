use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use super::clock::{Clock, SystemClock};
use super::credential::{AccessCredential, CredentialResponse, SessionIdentity};
use super::scheduler::RefreshScheduler;
use super::store::{Subscription, TokenStore};
use crate::api::{
    ApiClient, ApiError, ApiRequest, RequestGate, SessionError, Transport, WeakRequestGate,
};
use crate::config::SessionConfig;
use crate::utils::lock;

#[derive(Serialize)]
struct ExchangeRequest<'a> {
    identifier: &'a str,
    secret: &'a str,
    remember: bool,
}

/// A signed-in (or signed-out) client session.
///
/// Created once at application start and handed to whatever needs to talk to
/// the server. The credential lives only in memory; the long-lived refresh
/// cookie lives in the transport's cookie jar.
pub struct Session<T: Transport> {
    config: SessionConfig,
    gate: RequestGate<T>,
    client: ApiClient<T>,
    scheduler: Arc<RefreshScheduler>,
    identity: Arc<Mutex<Option<SessionIdentity>>>,
    watcher: Mutex<Option<Subscription>>,
}

impl<T: Transport> Session<T> {
    pub fn new(config: SessionConfig, transport: Arc<T>) -> Result<Self, ApiError> {
        Self::with_clock(config, transport, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: SessionConfig,
        transport: Arc<T>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ApiError> {
        let store = TokenStore::new();
        let gate = RequestGate::new(&config, transport, store.clone())?;
        let client = ApiClient::new(gate.clone(), &config);
        let scheduler = Arc::new(RefreshScheduler::new(clock));
        let identity = Arc::new(Mutex::new(None));

        let watcher = store.subscribe(credential_watcher(
            gate.downgrade(),
            Arc::clone(&scheduler),
            Arc::clone(&identity),
            &config,
        ));

        Ok(Self {
            config,
            gate,
            client,
            scheduler,
            identity,
            watcher: Mutex::new(Some(watcher)),
        })
    }

    /// Exchange login credentials for an access credential and load the
    /// signed-in identity.
    pub async fn login(
        &self,
        identifier: &str,
        secret: &str,
        remember: bool,
    ) -> Result<SessionIdentity, SessionError> {
        self.gate.csrf().ensure().await?;

        let request = ApiRequest::post(self.config.endpoints.exchange.clone()).json(
            &ExchangeRequest {
                identifier,
                secret,
                remember,
            },
        )?;
        let response = self.gate.send(request).await?;

        match response.status.as_u16() {
            200..=299 => {}
            401 => return Err(SessionError::InvalidCredentials),
            403 => return Err(SessionError::AccountDisabled),
            429 => return Err(SessionError::RateLimited),
            _ => return Err(ApiError::from_status(response.status, &response.text()).into()),
        }

        let body: CredentialResponse = response.json()?;
        // Arms the refresh timer through the credential watcher
        self.gate.store().set(Some(body.access_credential));

        let identity = match self.me().await {
            Ok(identity) => identity,
            Err(e) => {
                // No identity, no session: drop the credential and its timer
                warn!(error = %e, "Could not load identity after login, signing out");
                self.scheduler.cancel();
                self.gate.end_session();
                *lock(&self.identity) = None;
                return Err(e);
            }
        };
        info!(user = %identity.id, role = %identity.role, "Logged in");
        Ok(identity)
    }

    /// End the session. Local state is cleared even when the server cannot
    /// be reached.
    pub async fn logout(&self) {
        if let Err(e) = self.terminate_on_server().await {
            warn!(error = %e, "Server logout failed, clearing local session anyway");
        }

        self.scheduler.cancel();
        self.gate.end_session();
        *lock(&self.identity) = None;
        info!("Logged out");
    }

    async fn terminate_on_server(&self) -> Result<(), SessionError> {
        self.gate.csrf().ensure().await?;
        let request =
            ApiRequest::post(self.config.endpoints.terminate.clone()).json(&serde_json::json!({}))?;
        self.gate.send(request).await?.error_for_status()?;
        Ok(())
    }

    /// Renew the credential (sharing any renewal already in flight) and
    /// reload the identity.
    pub async fn refresh(&self) -> Result<SessionIdentity, SessionError> {
        self.gate.renew().await?;
        self.me().await
    }

    /// Fetch the signed-in identity from the server.
    pub async fn me(&self) -> Result<SessionIdentity, SessionError> {
        let identity: SessionIdentity = self.client.get(&self.config.endpoints.whoami).await?;

        // A logout may have landed while the call was in flight
        if !self.gate.store().is_set() {
            return Err(SessionError::NotAuthenticated);
        }
        *lock(&self.identity) = Some(identity.clone());
        Ok(identity)
    }

    pub fn current_user(&self) -> Option<SessionIdentity> {
        lock(&self.identity).clone()
    }

    pub fn credential(&self) -> Option<AccessCredential> {
        self.gate.store().get()
    }

    pub fn is_authenticated(&self) -> bool {
        self.gate.store().is_set()
    }

    /// Observe credential changes (login, renewal, logout).
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(Option<&AccessCredential>) + Send + Sync + 'static,
    {
        self.gate.store().subscribe(callback)
    }

    /// Client for ordinary calls; shares this session's credential and
    /// renewal.
    pub fn client(&self) -> &ApiClient<T> {
        &self.client
    }

    pub fn gate(&self) -> &RequestGate<T> {
        &self.gate
    }

    /// When the next preemptive renewal is due, if one is scheduled.
    pub fn next_renewal_at(&self) -> Option<DateTime<Utc>> {
        self.scheduler.next_fire_at()
    }

    /// Stop background renewal. The session keeps its credential but will no
    /// longer renew it ahead of expiry.
    pub fn shutdown(&self) {
        lock(&self.watcher).take();
        self.scheduler.cancel();
    }
}

impl<T: Transport> Drop for Session<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Keeps the refresh timer and identity in step with the stored credential.
fn credential_watcher<T: Transport>(
    gate: WeakRequestGate<T>,
    scheduler: Arc<RefreshScheduler>,
    identity: Arc<Mutex<Option<SessionIdentity>>>,
    config: &SessionConfig,
) -> impl Fn(Option<&AccessCredential>) + Send + Sync + 'static {
    let margin = config.refresh_margin();
    move |credential| match credential {
        Some(credential) => {
            let gate = gate.clone();
            scheduler.arm(credential, margin, move || async move {
                let Some(gate) = gate.upgrade() else {
                    return;
                };
                if let Err(e) = gate.renew().await {
                    warn!(error = %e, "Preemptive renewal failed");
                }
            });
        }
        None => {
            scheduler.cancel();
            *lock(&identity) = None;
        }
    }
}
