//! Double-submit anti-forgery cookie handling.
//!
//! The server sets a readable cookie; renewal and termination calls must echo
//! its value in a header. Issuing the cookie twice is harmless, so concurrent
//! `ensure` calls are not coalesced.

use std::sync::Arc;

use reqwest::header::{HeaderName, HeaderValue};
use tracing::{debug, warn};

use crate::api::{ApiError, ApiRequest, Transport};
use crate::config::SessionConfig;

pub struct CsrfGuard<T> {
    transport: Arc<T>,
    cookie_name: String,
    header_name: HeaderName,
    endpoint: String,
}

impl<T: Transport> CsrfGuard<T> {
    pub fn new(config: &SessionConfig, transport: Arc<T>) -> Result<Self, ApiError> {
        let header_name = HeaderName::try_from(config.csrf_header_name.as_str()).map_err(|e| {
            ApiError::InvalidRequest(format!(
                "Invalid anti-forgery header name {}: {}",
                config.csrf_header_name, e
            ))
        })?;

        Ok(Self {
            transport,
            cookie_name: config.csrf_cookie_name.clone(),
            header_name,
            endpoint: config.endpoints.anti_forgery.clone(),
        })
    }

    /// Make sure the anti-forgery cookie exists, fetching it when absent.
    pub async fn ensure(&self) -> Result<(), ApiError> {
        if self.transport.cookie(&self.cookie_name).is_some() {
            return Ok(());
        }

        debug!("Anti-forgery cookie missing, requesting one");
        self.transport
            .execute(ApiRequest::get(self.endpoint.clone()))
            .await?
            .error_for_status()?;

        if self.transport.cookie(&self.cookie_name).is_none() {
            warn!(cookie = %self.cookie_name, "Server did not set the anti-forgery cookie");
        }
        Ok(())
    }

    /// Header carrying the current cookie value, if the cookie exists.
    pub fn header_for(&self) -> Option<(HeaderName, HeaderValue)> {
        let value = self.transport.cookie(&self.cookie_name)?;
        let value = HeaderValue::from_str(&value).ok()?;
        Some((self.header_name.clone(), value))
    }
}
