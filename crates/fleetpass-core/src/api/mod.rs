//! REST API module for the fleetpass reservation server.
//!
//! This module provides the `RequestGate` through which every call to the
//! server passes, the `ApiClient` typed layer on top of it, and the
//! `Transport` seam with its reqwest implementation.
//!
//! The server uses short-lived bearer credentials renewed through an
//! HTTP-only refresh cookie and a double-submit anti-forgery header.

pub mod client;
pub mod error;
pub mod gate;
pub mod transport;

pub use client::ApiClient;
pub use error::{ApiError, SessionError};
pub use gate::{RequestGate, WeakRequestGate};
pub use transport::{ApiRequest, ApiResponse, HttpTransport, Transport};
