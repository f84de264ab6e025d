use async_trait::async_trait;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::config::SecurityConfig;

/// Identity of the caller for the lifetime of one request. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthenticatedIdentity {
    /// Stable per end user; the value stored in every row's owner field.
    pub subject: String,
    pub claims: Map<String, Value>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerifyError {
    #[error("Token has expired")]
    Expired,

    #[error("Invalid session token")]
    MissingSubject,

    #[error("Invalid token: {0}")]
    Invalid(String),

    #[error("Token verification is not configured")]
    NotConfigured,
}

/// Identity-provider token verification capability.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<AuthenticatedIdentity, VerifyError>;
}

/// Verifies session JWTs locally. An RSA public key PEM selects RS256 (the
/// identity provider's networkless verification key); anything else is an
/// HS256 shared secret.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret_key: &str, issuer: Option<&str>) -> Result<Self, VerifyError> {
        if secret_key.is_empty() {
            return Err(VerifyError::NotConfigured);
        }

        let (key, algorithm) = if secret_key.trim_start().starts_with("-----BEGIN") {
            let key = DecodingKey::from_rsa_pem(secret_key.as_bytes())
                .map_err(|e| VerifyError::Invalid(format!("bad verification key: {}", e)))?;
            (key, Algorithm::RS256)
        } else {
            (DecodingKey::from_secret(secret_key.as_bytes()), Algorithm::HS256)
        };

        let mut validation = Validation::new(algorithm);
        validation.validate_exp = true;
        validation.leeway = 5;
        validation.required_spec_claims.clear();
        validation.required_spec_claims.insert("exp".to_string());
        if let Some(issuer) = issuer {
            validation.set_issuer(&[issuer]);
        }

        Ok(Self { key, validation })
    }

    pub fn from_config(security: &SecurityConfig) -> Result<Self, VerifyError> {
        Self::new(&security.auth_secret_key, security.auth_issuer.as_deref())
    }
}

#[async_trait]
impl TokenVerifier for JwtVerifier {
    async fn verify(&self, token: &str) -> Result<AuthenticatedIdentity, VerifyError> {
        let data = decode::<Map<String, Value>>(token, &self.key, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => VerifyError::Expired,
                _ => VerifyError::Invalid(e.to_string()),
            }
        })?;

        let claims = data.claims;
        let subject = match claims.get("sub") {
            Some(Value::String(sub)) if !sub.is_empty() => sub.clone(),
            _ => return Err(VerifyError::MissingSubject),
        };

        Ok(AuthenticatedIdentity { subject, claims })
    }
}

/// Claims of a locally minted session token.
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    pub exp: i64,
    pub iat: i64,
}

impl SessionClaims {
    pub fn new(subject: impl Into<String>, issuer: Option<String>, expiry_hours: u64) -> Self {
        let now = Utc::now();
        Self {
            sub: subject.into(),
            iss: issuer,
            exp: (now + Duration::hours(expiry_hours as i64)).timestamp(),
            iat: now.timestamp(),
        }
    }
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Token generation error: {0}")]
    Generation(String),

    #[error("Local token signing needs an HS256 shared secret")]
    InvalidSecret,
}

/// Mints an HS256 session token. Only meaningful when the gateway is
/// configured with a shared secret (development and tests).
pub fn issue_session_token(secret: &str, claims: &SessionClaims) -> Result<String, TokenError> {
    if secret.is_empty() || secret.trim_start().starts_with("-----BEGIN") {
        return Err(TokenError::InvalidSecret);
    }

    let encoding_key = EncodingKey::from_secret(secret.as_bytes());
    encode(&Header::new(Algorithm::HS256), claims, &encoding_key)
        .map_err(|e| TokenError::Generation(e.to_string()))
}
