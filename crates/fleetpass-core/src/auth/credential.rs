use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;

/// Short-lived signed access credential (`header.payload.signature`).
///
/// Held only in memory. The string is opaque to everything except
/// [`expiry_of`] and [`claims_of`], which peek at the payload without
/// verifying the signature.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessCredential(String);

impl AccessCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Expiry instant, if the payload carries one.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        expiry_of(self)
    }
}

impl fmt::Debug for AccessCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessCredential(<redacted>)")
    }
}

/// Body returned by the exchange and renewal endpoints.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CredentialResponse {
    pub access_credential: AccessCredential,
}

/// Claims a client may read from an access credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct CredentialClaims {
    pub sub: Option<String>,
    pub role: Option<String>,
    pub exp: DateTime<Utc>,
}

/// The signed-in user as reported by the "who am I" call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct SessionIdentity {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub display_name: String,
    pub email: String,
    pub role: String,
    pub status: String,
    #[serde(default)]
    pub must_change_password: bool,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match JsonValue::deserialize(deserializer)? {
        JsonValue::String(s) => Ok(s),
        JsonValue::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {other}"
        ))),
    }
}

/// Decode the payload segment of a signed token.
///
/// Anything that does not look like `header.payload.signature` with a
/// base64url JSON object in the middle yields `None`.
fn decode_payload(token: &str) -> Option<JsonValue> {
    let mut parts = token.split('.');
    let (header, payload, signature) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() || header.is_empty() || signature.is_empty() {
        return None;
    }

    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let value: JsonValue = serde_json::from_slice(&bytes).ok()?;
    value.is_object().then_some(value)
}

fn exp_claim(payload: &JsonValue) -> Option<DateTime<Utc>> {
    let exp = payload.get("exp")?;
    let secs = match exp.as_i64() {
        Some(secs) => secs,
        None => exp.as_f64().filter(|f| f.is_finite())? as i64,
    };
    DateTime::from_timestamp(secs, 0)
}

/// Expiry instant of `credential`, or `None` when it is malformed or has no
/// `exp` claim. Never fails: a malformed credential is an expected input.
pub fn expiry_of(credential: &AccessCredential) -> Option<DateTime<Utc>> {
    decode_payload(credential.as_str()).and_then(|payload| exp_claim(&payload))
}

/// Subject, role and expiry of `credential`, under the same rules as [`expiry_of`].
pub fn claims_of(credential: &AccessCredential) -> Option<CredentialClaims> {
    let payload = decode_payload(credential.as_str())?;
    let string_claim = |key: &str| {
        payload.get(key).and_then(|v| match v {
            JsonValue::String(s) => Some(s.clone()),
            JsonValue::Number(n) => Some(n.to_string()),
            _ => None,
        })
    };

    Some(CredentialClaims {
        sub: string_claim("sub"),
        role: string_claim("role"),
        exp: exp_claim(&payload)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(json: &str) -> String {
        URL_SAFE_NO_PAD.encode(json.as_bytes())
    }

    fn token_with_payload(payload: &str) -> AccessCredential {
        AccessCredential::new(format!(
            "{}.{}.c2lnbmF0dXJl",
            encode(r#"{"alg":"HS256","typ":"JWT"}"#),
            encode(payload)
        ))
    }

    #[test]
    fn test_expiry_of_valid_token() {
        let credential = token_with_payload(r#"{"sub":"42","role":"manager","exp":1700000000}"#);
        let expiry = expiry_of(&credential).expect("exp claim present");
        assert_eq!(expiry.timestamp(), 1_700_000_000);
        assert_eq!(credential.expires_at(), Some(expiry));
    }

    #[test]
    fn test_expiry_of_fractional_exp() {
        let credential = token_with_payload(r#"{"exp":1700000000.75}"#);
        assert_eq!(expiry_of(&credential).map(|e| e.timestamp()), Some(1_700_000_000));
    }

    #[test]
    fn test_expiry_of_malformed_inputs() {
        // Not three segments
        assert_eq!(expiry_of(&AccessCredential::new("")), None);
        assert_eq!(expiry_of(&AccessCredential::new("abc")), None);
        assert_eq!(expiry_of(&AccessCredential::new("a.b")), None);
        assert_eq!(expiry_of(&AccessCredential::new("a.b.c.d")), None);

        // Unsigned-looking
        let unsigned = format!("{}.{}.", encode("{}"), encode(r#"{"exp":1700000000}"#));
        assert_eq!(expiry_of(&AccessCredential::new(unsigned)), None);

        // Payload is not base64 / not JSON / not an object
        assert_eq!(expiry_of(&AccessCredential::new("h.!!!.s")), None);
        assert_eq!(expiry_of(&token_with_payload("not json")), None);
        assert_eq!(expiry_of(&token_with_payload("[1,2,3]")), None);

        // Missing or non-numeric exp
        assert_eq!(expiry_of(&token_with_payload(r#"{"sub":"42"}"#)), None);
        assert_eq!(expiry_of(&token_with_payload(r#"{"exp":"soon"}"#)), None);
    }

    #[test]
    fn test_padded_payload_is_accepted() {
        let payload = format!("{}==", encode(r#"{"exp":1700000000}"#));
        let credential = AccessCredential::new(format!("h.{payload}.s"));
        assert!(expiry_of(&credential).is_some());
    }

    #[test]
    fn test_claims_of() {
        let credential = token_with_payload(r#"{"sub":17,"role":"approver","exp":1700000000}"#);
        let claims = claims_of(&credential).expect("claims present");
        assert_eq!(claims.sub.as_deref(), Some("17"));
        assert_eq!(claims.role.as_deref(), Some("approver"));
        assert_eq!(claims.exp.timestamp(), 1_700_000_000);

        assert!(claims_of(&token_with_payload(r#"{"sub":"17"}"#)).is_none());
    }

    #[test]
    fn test_debug_is_redacted() {
        let credential = token_with_payload(r#"{"exp":1700000000}"#);
        let debug = format!("{credential:?}");
        assert!(!debug.contains(credential.as_str()));
        assert!(debug.contains("redacted"));
    }

    #[test]
    fn test_parse_identity() {
        let json = r#"{"id": 7, "displayName": "Ana Souza", "email": "ana@fleet.example", "role": "requester", "status": "active"}"#;
        let identity: SessionIdentity =
            serde_json::from_str(json).expect("Failed to parse identity test JSON");
        assert_eq!(identity.id, "7");
        assert_eq!(identity.display_name, "Ana Souza");
        assert!(!identity.must_change_password);

        let json = r#"{"id": "u-1", "displayName": "B", "email": "b@x.com", "role": "admin", "status": "active", "mustChangePassword": true}"#;
        let identity: SessionIdentity = serde_json::from_str(json).expect("valid identity");
        assert_eq!(identity.id, "u-1");
        assert!(identity.must_change_password);
    }
}
