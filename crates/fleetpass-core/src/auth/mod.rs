//! Authentication module for managing the client session lifecycle.
//!
//! This module provides:
//! - `Session`: login/logout/refresh/me and the signed-in identity
//! - `TokenStore`: the in-memory access credential with change notification
//! - `RefreshScheduler`: preemptive renewal ahead of credential expiry
//! - `CsrfGuard`: the double-submit anti-forgery cookie
//!
//! Access credentials are never persisted; renewal relies on an HTTP-only
//! refresh cookie held by the transport.

pub mod clock;
pub mod credential;
pub mod csrf;
pub mod scheduler;
pub mod session;
pub mod store;

pub use clock::{Clock, SystemClock};
pub use credential::{claims_of, expiry_of, AccessCredential, CredentialClaims, SessionIdentity};
pub use csrf::CsrfGuard;
pub use scheduler::RefreshScheduler;
pub use session::Session;
pub use store::{Subscription, TokenStore};
