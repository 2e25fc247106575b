use crate::config::AuthConfig;
use crate::credentials::CredentialStore;
use crate::error::ApiError;
use axum::async_trait;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument, warn};

const ALGORITHM: Algorithm = Algorithm::HS256;

/// Claims carried by a session token; the username is the only identity claim
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub username: String,
    /// Expiry as a Unix timestamp in seconds
    pub exp: i64,
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Missing bearer token")]
    MissingToken,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token expired")]
    Expired,

    #[error("Failed to sign token: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
}

/// Issues and verifies stateless HMAC-signed session tokens.
///
/// Tokens are never revoked; they stop verifying once `exp` is reached.
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
    credentials: CredentialStore,
}

impl TokenService {
    pub fn new(config: &AuthConfig, credentials: CredentialStore) -> Self {
        let secret = config.signing_secret.as_bytes();
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl: Duration::hours(config.token_ttl_hours),
            credentials,
        }
    }

    pub fn issue(&self, username: &str) -> Result<String, AuthError> {
        self.issue_at(username, Utc::now())
    }

    pub fn issue_at(&self, username: &str, issued_at: DateTime<Utc>) -> Result<String, AuthError> {
        let claims = Claims {
            username: username.to_string(),
            exp: (issued_at + self.ttl).timestamp(),
        };
        Ok(encode(&Header::new(ALGORITHM), &claims, &self.encoding)?)
    }

    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        self.verify_at(token, Utc::now())
    }

    /// Check signature and algorithm, then require `now < exp`
    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(ALGORITHM);
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["exp"]);

        let claims = decode::<Claims>(token, &self.decoding, &validation)
            .map_err(|e| {
                debug!(error = %e, "Rejected token");
                AuthError::InvalidToken
            })?
            .claims;

        if now.timestamp() >= claims.exp {
            return Err(AuthError::Expired);
        }

        Ok(claims)
    }

    /// Exact comparison of username and password against the stored record.
    /// Any lookup failure counts as a mismatch.
    #[instrument(skip(self, password))]
    pub async fn check_credentials(&self, username: &str, password: &str) -> bool {
        let username = crate::models::normalize_username(username);

        match self.credentials.find_user(&username).await {
            Ok(Some(user)) => user.username == username && user.password == password,
            Ok(None) => false,
            Err(e) => {
                warn!(error = %e, "Credential lookup failed");
                false
            }
        }
    }
}

/// Authenticated identity of the current request, taken from a verified
/// `Authorization: Bearer` token before the handler runs.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthUser {
    pub username: String,
}

/// Token part of an `Authorization` header value
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    Arc<TokenService>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(bearer_token)
            .ok_or(AuthError::MissingToken)?;

        let tokens = Arc::<TokenService>::from_ref(state);
        let claims = tokens.verify(token)?;

        Ok(AuthUser {
            username: claims.username,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::User;
    use crate::search_index::MockSearchIndex;
    use chrono::TimeZone;

    fn service_with(index: MockSearchIndex) -> TokenService {
        TokenService::new(
            &AuthConfig::new("secret"),
            CredentialStore::new(Arc::new(index)),
        )
    }

    fn service() -> TokenService {
        service_with(MockSearchIndex::new())
    }

    #[test]
    fn test_token_valid_until_expiry() {
        let tokens = service();
        let issued = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let token = tokens.issue_at("jack", issued).unwrap();

        let claims = tokens.verify_at(&token, issued).unwrap();
        assert_eq!(claims.username, "jack");
        assert_eq!(claims.exp, (issued + Duration::hours(24)).timestamp());

        let just_before = issued + Duration::hours(24) - Duration::seconds(1);
        assert!(tokens.verify_at(&token, just_before).is_ok());

        let at_expiry = issued + Duration::hours(24);
        assert!(matches!(
            tokens.verify_at(&token, at_expiry),
            Err(AuthError::Expired)
        ));
        assert!(matches!(
            tokens.verify_at(&token, at_expiry + Duration::days(3)),
            Err(AuthError::Expired)
        ));
    }

    #[test]
    fn test_token_signed_with_other_secret_is_rejected() {
        let other = TokenService::new(
            &AuthConfig::new("another-secret"),
            CredentialStore::new(Arc::new(MockSearchIndex::new())),
        );
        let token = other.issue("jack").unwrap();

        assert!(matches!(
            service().verify(&token),
            Err(AuthError::InvalidToken)
        ));
        assert!(matches!(
            service().verify("not-a-token"),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn test_bearer_token_parsing() {
        assert_eq!(bearer_token("Bearer abc.def"), Some("abc.def"));
        assert_eq!(bearer_token("bearer   abc"), Some("abc"));
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token("abc"), None);
    }

    #[tokio::test]
    async fn test_check_credentials() {
        let mut index = MockSearchIndex::new();
        index.expect_find_user_by_name().returning(|name| {
            Ok((name == "jack").then(|| User {
                username: "jack".to_string(),
                password: "pw".to_string(),
                age: 0,
                gender: String::new(),
            }))
        });
        let tokens = service_with(index);

        assert!(tokens.check_credentials("jack", "pw").await);
        assert!(tokens.check_credentials("Jack", "pw").await);
        assert!(!tokens.check_credentials("jack", "PW").await);
        assert!(!tokens.check_credentials("jill", "pw").await);
    }

    #[tokio::test]
    async fn test_check_credentials_fails_closed() {
        let mut index = MockSearchIndex::new();
        index
            .expect_find_user_by_name()
            .returning(|_| Err(anyhow::anyhow!("connection refused")));

        assert!(!service_with(index).check_credentials("jack", "pw").await);
    }
}
