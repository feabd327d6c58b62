//! Client-side session lifecycle for the fleetpass reservation server.
//!
//! A [`Session`] holds the short-lived access credential in memory, renews it
//! ahead of expiry, and routes every call through a [`RequestGate`] that
//! recovers from authorization failures with a single shared renewal.
//!
//! ```no_run
//! use std::sync::Arc;
//! use fleetpass_core::{HttpTransport, Session, SessionConfig};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = SessionConfig::load()?;
//! let transport = Arc::new(HttpTransport::new(&config)?);
//! let session = Session::new(config, transport)?;
//!
//! let me = session.login("ana@fleet.example", "secret", true).await?;
//! let vehicles: serde_json::Value = session.client().get("/vehicles").await?;
//! session.logout().await;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod config;
mod utils;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{
    ApiClient, ApiError, ApiRequest, ApiResponse, HttpTransport, RequestGate, SessionError,
    Transport,
};
pub use auth::{AccessCredential, Session, SessionIdentity, TokenStore};
pub use config::SessionConfig;
