use std::sync::Arc;

use axum::extract::{FromRequestParts, Query};
use axum::http::request::Parts;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tracing::warn;

use crate::error::Error;
use crate::AppState;

pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Deserialize)]
struct ApiKeyQuery {
    api_key: Option<String>,
}

/// Guard for routes behind the shared secret. Accepts the `X-API-Key`
/// header first, then the `api_key` query parameter.
pub struct ApiKey;

type HmacSha256 = Hmac<Sha256>;

fn key_tag(key: &str) -> Option<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(API_KEY_HEADER.as_bytes()).ok()?;
    mac.update(key.as_bytes());
    Some(mac)
}

/// Constant-time comparison over fixed-size tags of both keys.
fn keys_match(expected: &str, presented: &str) -> bool {
    match (key_tag(expected), key_tag(presented)) {
        (Some(expected), Some(presented)) => {
            expected.verify_slice(&presented.finalize().into_bytes()).is_ok()
        }
        _ => false,
    }
}

pub fn check_api_key(expected: &str, presented: Option<&str>) -> Result<(), Error> {
    match presented {
        Some(key) if !expected.is_empty() && keys_match(expected, key) => Ok(()),
        Some(key) => {
            let prefix: String = key.chars().take(4).collect();
            warn!("Rejected request with invalid API key ({}...)", prefix);
            Err(Error::AuthFailure)
        }
        None => Err(Error::AuthFailure),
    }
}

impl FromRequestParts<Arc<AppState>> for ApiKey {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let from_header = parts
            .headers
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let presented = from_header.or_else(|| {
            Query::<ApiKeyQuery>::try_from_uri(&parts.uri)
                .ok()
                .and_then(|Query(q)| q.api_key)
        });

        check_api_key(&state.api_key, presented.as_deref())?;
        Ok(ApiKey)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_api_key() {
        assert!(check_api_key("secret", Some("secret")).is_ok());
        assert!(matches!(check_api_key("secret", Some("wrong")), Err(Error::AuthFailure)));
        assert!(matches!(check_api_key("secret", None), Err(Error::AuthFailure)));
        assert!(matches!(check_api_key("", Some("")), Err(Error::AuthFailure)));
    }

    #[test]
    fn test_keys_match_needs_the_whole_key() {
        assert!(keys_match("test-secret", "test-secret"));
        assert!(!keys_match("test-secret", "test-secre"));
        assert!(!keys_match("test-secret", "test-secret2"));
        assert!(!keys_match("test-secret", "Test-secret"));
        assert!(!keys_match("test-secret", ""));
        assert!(matches!(check_api_key("test-secret", Some("test")), Err(Error::AuthFailure)));
    }
}
