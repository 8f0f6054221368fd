// SPDX-FileCopyrightText: 2026 Fixo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Identity tokens and the authentication middleware for the gateway.
//!
//! Tokens are HS256 JWTs whose claims carry the user id, role and expiry.
//! The middleware resolves the bearer token into an [`Identity`] request
//! extension.
//!
//! When no secret is configured, all requests are rejected (fail-closed).

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use fixo_config::model::GatewayConfig;
use fixo_core::{FixoError, Identity, Role};

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    role: Role,
    exp: i64,
}

/// Issues and verifies identity tokens.
#[derive(Clone)]
pub struct TokenSigner {
    key: Arc<[u8]>,
    ttl: Duration,
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner")
            .field("key", &"[redacted]")
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl TokenSigner {
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        Self {
            key: Arc::from(secret),
            ttl,
        }
    }

    /// `None` when the gateway has no secret configured.
    pub fn from_config(config: &GatewayConfig) -> Option<Self> {
        config
            .token_secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(|s| Self::new(s.as_bytes(), Duration::from_secs(config.token_ttl_secs)))
    }

    /// Raw key bytes, shared with the attachment link signer.
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn issue(&self, identity: &Identity) -> Result<String, FixoError> {
        let exp = chrono::Utc::now().timestamp() + self.ttl.as_secs() as i64;
        self.issue_until(identity, exp)
    }

    pub fn issue_until(&self, identity: &Identity, exp: i64) -> Result<String, FixoError> {
        if identity.user_id.trim().is_empty() {
            return Err(FixoError::Validation("user id must not be empty".into()));
        }
        let claims = Claims {
            sub: identity.user_id.clone(),
            role: identity.role,
            exp,
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(&self.key),
        )
        .map_err(|e| FixoError::Internal(format!("failed to sign token: {e}")))
    }

    pub fn verify(&self, token: &str) -> Result<Identity, FixoError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        let data = decode::<Claims>(token, &DecodingKey::from_secret(&self.key), &validation)
            .map_err(|e| {
                FixoError::Forbidden(match e.kind() {
                    ErrorKind::ExpiredSignature => "token expired".into(),
                    ErrorKind::InvalidSignature => "invalid token signature".into(),
                    _ => format!("malformed token: {e}"),
                })
            })?;
        Ok(Identity::new(data.claims.sub, data.claims.role))
    }
}

/// Authentication configuration for the gateway.
#[derive(Clone, Debug)]
pub struct AuthConfig {
    /// Token verifier. If `None`, every authenticated route is closed.
    pub signer: Option<TokenSigner>,
}

impl AuthConfig {
    /// Resolve a raw token into the caller's identity.
    pub fn authenticate(&self, token: Option<&str>) -> Result<Identity, StatusCode> {
        let Some(signer) = &self.signer else {
            tracing::error!("gateway has no token secret configured -- rejecting request");
            return Err(StatusCode::UNAUTHORIZED);
        };
        let token = token.ok_or(StatusCode::UNAUTHORIZED)?;
        signer.verify(token).map_err(|e| {
            tracing::debug!(error = %e, "token rejected");
            StatusCode::UNAUTHORIZED
        })
    }
}

/// Middleware that resolves `Authorization: Bearer <token>` into an
/// [`Identity`] extension for the handlers.
pub async fn auth_middleware(
    State(auth): State<AuthConfig>,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    let identity = auth.authenticate(token)?;
    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> TokenSigner {
        TokenSigner::new(b"test-secret", Duration::from_secs(60))
    }

    #[test]
    fn issued_tokens_verify() {
        let token = signer().issue(&Identity::admin("adm-1")).unwrap();
        let identity = signer().verify(&token).unwrap();
        assert_eq!(identity, Identity::admin("adm-1"));
    }

    #[test]
    fn tampered_claims_are_rejected() {
        use base64::Engine;
        use base64::engine::general_purpose::URL_SAFE_NO_PAD;

        let token = signer().issue(&Identity::student("stu-1")).unwrap();
        let parts: Vec<&str> = token.split('.').collect();
        assert_eq!(parts.len(), 3);
        let forged = URL_SAFE_NO_PAD.encode(br#"{"sub":"stu-1","role":"admin","exp":9999999999}"#);
        let err = signer()
            .verify(&format!("{}.{forged}.{}", parts[0], parts[2]))
            .unwrap_err();
        assert!(matches!(err, FixoError::Forbidden(_)));
        assert!(err.to_string().contains("signature"));
    }

    #[test]
    fn other_algorithms_are_rejected() {
        let claims = Claims {
            sub: "stu-1".into(),
            role: Role::Admin,
            exp: 9_999_999_999,
        };
        let token = encode(
            &Header::new(Algorithm::HS512),
            &claims,
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap();
        assert!(signer().verify(&token).is_err());
    }

    #[test]
    fn other_secrets_are_rejected() {
        let token = signer().issue(&Identity::student("stu-1")).unwrap();
        let other = TokenSigner::new(b"another", Duration::from_secs(60));
        assert!(other.verify(&token).is_err());
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let past = chrono::Utc::now().timestamp() - 5;
        let token = signer().issue_until(&Identity::student("stu-1"), past).unwrap();
        let err = signer().verify(&token).unwrap_err();
        assert!(err.to_string().contains("expired"));
    }

    #[test]
    fn blank_user_ids_cannot_get_tokens() {
        assert!(signer().issue(&Identity::student("  ")).is_err());
    }

    #[test]
    fn missing_secret_fails_closed() {
        let auth = AuthConfig { signer: None };
        assert_eq!(
            auth.authenticate(Some("anything")),
            Err(StatusCode::UNAUTHORIZED)
        );
        let config = GatewayConfig {
            token_secret: Some(String::new()),
            ..Default::default()
        };
        assert!(TokenSigner::from_config(&config).is_none());
    }

    #[test]
    fn debug_redacts_key() {
        let auth = AuthConfig {
            signer: Some(signer()),
        };
        let debug_output = format!("{auth:?}");
        assert!(!debug_output.contains("test-secret"));
        assert!(debug_output.contains("[redacted]"));
    }
}
