use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

use crate::models::User;
use super::api_service::{ApiClient, ApiError};
use super::file_service;

pub const SIGN_IN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Authentication timeout")]
    Timeout,
    #[error("No credential received from Google")]
    MissingCredential,
    #[error("Invalid credential: {0}")]
    InvalidCredential(String),
    #[error("Google sign-in failed: {0}")]
    Provider(String),
    #[error("Backend authentication failed: {0}")]
    Exchange(#[from] ApiError),
    #[error("{0}")]
    Storage(String),
}

/// Seam for the external federated-identity capability (Google Identity
/// Services in the browser build). The client core only ever needs the three
/// calls below; everything UI-shaped stays on the other side.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// One-time per-process setup with the OAuth client id. Failure is
    /// non-fatal to the app, which simply stays in guest mode.
    fn initialize(&self, client_id: &str) -> Result<(), AuthError>;

    /// Present the sign-in picker and resolve with the signed credential
    /// (a JWT) once the user completes the flow.
    async fn prompt_credential(&self) -> Result<String, AuthError>;

    /// Stop the provider from silently re-selecting the account after
    /// sign-out.
    fn disable_auto_select(&self);
}

/// Claims embedded in the Google credential. Decoded locally; the backend
/// does its own verification during the token exchange.
#[derive(Debug, Clone, Deserialize)]
pub struct GoogleClaims {
    pub sub: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub picture: Option<String>,
}

pub fn decode_credential_claims(credential: &str) -> Result<GoogleClaims, AuthError> {
    let payload = credential
        .split('.')
        .nth(1)
        .ok_or_else(|| AuthError::InvalidCredential("not a JWT".to_string()))?;

    let decoded = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| AuthError::InvalidCredential(e.to_string()))?;

    serde_json::from_slice(&decoded).map_err(|e| AuthError::InvalidCredential(e.to_string()))
}

// ============================================================================
// LOCAL IDENTITY
// ============================================================================

pub fn current_user() -> Option<User> {
    file_service::load_user()
}

/// Build a fresh guest identity without touching storage.
pub fn new_guest_user() -> User {
    User {
        id: "0".to_string(),
        name: "Guest User".to_string(),
        email: String::new(),
        picture: None,
        is_guest: true,
        token: None,
        guest_id: format!("guest_{}", Uuid::new_v4()),
    }
}

pub fn create_guest_user() -> User {
    let guest = new_guest_user();
    if let Err(e) = file_service::save_user(&guest) {
        tracing::warn!(error = %e, "Failed to persist guest user");
    }
    guest
}

/// The persisted identity, or a freshly created guest when nothing valid is
/// stored. Reading valid state never rewrites it.
pub fn resolve_or_create() -> User {
    current_user().unwrap_or_else(create_guest_user)
}

/// Every request carries exactly one of a guest-id header or a bearer token;
/// no identity means the request goes out unauthenticated.
pub fn auth_headers(user: Option<&User>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    if let Some(user) = user {
        if user.is_guest && !user.guest_id.is_empty() {
            if let Ok(value) = HeaderValue::from_str(&user.guest_id) {
                headers.insert(HeaderName::from_static("guestid"), value);
            }
        } else if let Some(token) = user.token.as_deref().filter(|_| !user.is_guest) {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", token)) {
                headers.insert(AUTHORIZATION, value);
            }
        }
    }

    headers
}

// ============================================================================
// FEDERATED SIGN-IN
// ============================================================================

/// Run the full sign-in handshake: await the provider's credential under a
/// hard timeout, decode the embedded claims, exchange credential plus any
/// existing guest id for a backend token, and persist the resulting identity.
/// The pending handshake is scoped to this call; on timeout the awaited
/// future is dropped, so a late credential can never fire.
pub async fn sign_in(
    provider: &dyn CredentialProvider,
    api: &ApiClient,
    current: Option<&User>,
) -> Result<User, AuthError> {
    sign_in_with_timeout(provider, api, current, SIGN_IN_TIMEOUT).await
}

pub(crate) async fn sign_in_with_timeout(
    provider: &dyn CredentialProvider,
    api: &ApiClient,
    current: Option<&User>,
    timeout: Duration,
) -> Result<User, AuthError> {
    let credential = tokio::time::timeout(timeout, provider.prompt_credential())
        .await
        .map_err(|_| AuthError::Timeout)??;

    if credential.is_empty() {
        return Err(AuthError::MissingCredential);
    }

    let claims = decode_credential_claims(&credential)?;

    let guest_id = current
        .filter(|u| u.is_guest && !u.guest_id.is_empty())
        .map(|u| u.guest_id.as_str());

    let exchange = api
        .google_authorize(&credential, &claims, guest_id, current)
        .await?;

    let user = User {
        id: exchange.user_id,
        name: if claims.name.is_empty() {
            "Unknown User".to_string()
        } else {
            claims.name
        },
        email: claims.email,
        picture: claims.picture,
        is_guest: false,
        token: Some(exchange.token),
        guest_id: String::new(),
    };

    file_service::save_user(&user).map_err(AuthError::Storage)?;

    Ok(user)
}

/// Discard the persisted identity and stop the provider from auto-selecting.
/// Callers follow up with a fresh guest identity.
pub fn sign_out(provider: &dyn CredentialProvider) {
    if let Err(e) = file_service::clear_user() {
        tracing::warn!(error = %e, "Failed to clear stored user during sign out");
    }
    provider.disable_auto_select();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_credential(claims: &serde_json::Value) -> String {
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
        format!("eyJhbGciOiJSUzI1NiJ9.{}.sig", payload)
    }

    #[test]
    fn claims_decode_from_jwt_payload() {
        let credential = fake_credential(&serde_json::json!({
            "sub": "108",
            "name": "Ada Lovelace",
            "email": "ada@example.com",
            "picture": "https://example.com/a.png",
        }));

        let claims = decode_credential_claims(&credential).unwrap();
        assert_eq!(claims.sub, "108");
        assert_eq!(claims.name, "Ada Lovelace");
        assert_eq!(claims.email, "ada@example.com");
        assert_eq!(claims.picture.as_deref(), Some("https://example.com/a.png"));
    }

    #[test]
    fn garbage_credential_is_rejected() {
        assert!(matches!(
            decode_credential_claims("not-a-jwt"),
            Err(AuthError::InvalidCredential(_))
        ));
        assert!(matches!(
            decode_credential_claims("a.%%%.c"),
            Err(AuthError::InvalidCredential(_))
        ));
    }

    #[test]
    fn guest_users_get_guest_header_only() {
        let guest = new_guest_user();
        let headers = auth_headers(Some(&guest));

        assert_eq!(headers.get(CONTENT_TYPE).unwrap(), "application/json");
        assert_eq!(
            headers.get("guestid").unwrap().to_str().unwrap(),
            guest.guest_id
        );
        assert!(headers.get(AUTHORIZATION).is_none());
    }

    #[test]
    fn signed_in_users_get_bearer_header_only() {
        let user = User {
            id: "7".to_string(),
            name: "Ada".to_string(),
            email: String::new(),
            picture: None,
            is_guest: false,
            token: Some("tok-123".to_string()),
            guest_id: String::new(),
        };
        let headers = auth_headers(Some(&user));

        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer tok-123");
        assert!(headers.get("guestid").is_none());
    }

    #[test]
    fn no_identity_sends_neither_header() {
        let headers = auth_headers(None);
        assert!(headers.get("guestid").is_none());
        assert!(headers.get(AUTHORIZATION).is_none());
    }

    #[test]
    fn fresh_guests_carry_guest_id_and_no_token() {
        let guest = new_guest_user();
        assert_eq!(guest.id, "0");
        assert!(guest.is_guest);
        assert!(guest.guest_id.starts_with("guest_"));
        assert!(guest.token.is_none());
    }

    struct NeverResolves;

    #[async_trait]
    impl CredentialProvider for NeverResolves {
        fn initialize(&self, _client_id: &str) -> Result<(), AuthError> {
            Ok(())
        }

        async fn prompt_credential(&self) -> Result<String, AuthError> {
            futures::future::pending().await
        }

        fn disable_auto_select(&self) {}
    }

    #[tokio::test]
    async fn sign_in_times_out_when_no_credential_arrives() {
        let api = ApiClient::new("http://localhost:0");
        let err = sign_in_with_timeout(&NeverResolves, &api, None, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Timeout));
        assert_eq!(err.to_string(), "Authentication timeout");
    }
}
