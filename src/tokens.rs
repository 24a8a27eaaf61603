//! Credential codec: issues and verifies the signed bearer tokens.
//!
//! Access and refresh tokens share one claim shape but are signed with two
//! independent secrets, so one can never stand in for the other. Claims carry
//! identity only; every authorization decision re-derives authority from the
//! role store at check time, which is why a revoked role takes effect without
//! waiting for token expiry.

use std::sync::Arc;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};

use crate::app::AppState;
use crate::config::AuthConfig;
use crate::errors::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Claims {
    /// External login id.
    pub sub: String,
    /// Internal numeric id.
    pub user_id: i64,
    /// Role-name snapshot at issuance. Display only, never trusted for
    /// authority.
    #[serde(default)]
    pub role: Vec<String>,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone)]
pub struct TokenCodec {
    access_secret: Arc<Vec<u8>>,
    refresh_secret: Arc<Vec<u8>>,
    access_ttl: chrono::Duration,
    refresh_ttl: chrono::Duration,
    algorithm: Algorithm,
}

impl TokenCodec {
    pub fn new(cfg: &AuthConfig) -> Self {
        Self {
            access_secret: cfg.access_secret.clone(),
            refresh_secret: cfg.refresh_secret.clone(),
            access_ttl: cfg.access_ttl,
            refresh_ttl: cfg.refresh_ttl,
            algorithm: Algorithm::HS256,
        }
    }

    pub fn issue_access(
        &self,
        user_id: i64,
        login: &str,
        roles: &[String],
        now: DateTime<Utc>,
    ) -> Result<String, AppError> {
        self.issue(user_id, login, roles, now, TokenKind::Access)
    }

    pub fn issue_refresh(
        &self,
        user_id: i64,
        login: &str,
        roles: &[String],
        now: DateTime<Utc>,
    ) -> Result<String, AppError> {
        self.issue(user_id, login, roles, now, TokenKind::Refresh)
    }

    fn issue(
        &self,
        user_id: i64,
        login: &str,
        roles: &[String],
        now: DateTime<Utc>,
        kind: TokenKind,
    ) -> Result<String, AppError> {
        let ttl = match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
        };
        let claims = Claims {
            sub: login.to_string(),
            user_id,
            role: roles.to_vec(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        };

        jsonwebtoken::encode(
            &Header::new(self.algorithm),
            &claims,
            &EncodingKey::from_secret(self.secret(kind)),
        )
        .map_err(|err| AppError::internal(format!("failed to sign token: {err}")))
    }

    /// Signature, expiry and claim-shape validation. Any failure collapses to
    /// `InvalidToken`; the caller cannot distinguish a forged signature from
    /// an expired token.
    pub fn verify(&self, token: &str, kind: TokenKind) -> Result<Claims, AppError> {
        let mut validation = Validation::new(self.algorithm);
        validation.validate_exp = true;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);

        let claims = jsonwebtoken::decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret(kind)),
            &validation,
        )
        .map(|data| data.claims)
        .map_err(|err| AppError::invalid_token(err.to_string()))?;

        if claims.sub.is_empty() {
            return Err(AppError::invalid_token("empty subject"));
        }

        Ok(claims)
    }

    fn secret(&self, kind: TokenKind) -> &[u8] {
        match kind {
            TokenKind::Access => &self.access_secret,
            TokenKind::Refresh => &self.refresh_secret,
        }
    }
}

/// Authenticated request identity, extracted from the `Authorization: Bearer`
/// header. Carries who the caller is, never what they may do.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: i64,
    pub login: String,
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or_else(|| AppError::unauthenticated("Authorization header missing"))?;

        let claims = state.tokens.verify(token, TokenKind::Access)?;

        Ok(AuthUser {
            user_id: claims.user_id,
            login: claims.sub,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn codec() -> TokenCodec {
        let cfg = AuthConfig::new(
            b"access-secret".to_vec(),
            b"refresh-secret".to_vec(),
            3600,
            HashSet::new(),
        );
        TokenCodec::new(&cfg)
    }

    #[test]
    fn access_round_trip_preserves_identity() {
        let codec = codec();
        let now = Utc::now();
        let roles = vec!["admin".to_string(), "review".to_string()];
        let token = codec.issue_access(42, "alice", &roles, now).unwrap();

        let claims = codec.verify(&token, TokenKind::Access).unwrap();
        assert_eq!(claims.sub, "alice");
        assert_eq!(claims.user_id, 42);
        assert_eq!(claims.role, roles);
        assert_eq!(claims.iat, now.timestamp());
        assert_eq!(claims.exp, (now + chrono::Duration::seconds(3600)).timestamp());
    }

    #[test]
    fn expired_access_token_is_rejected() {
        let codec = codec();
        // Issued far enough back that exp is one second in the past.
        let issued = Utc::now() - chrono::Duration::seconds(3601);
        let token = codec.issue_access(1, "bob", &[], issued).unwrap();

        assert!(matches!(
            codec.verify(&token, TokenKind::Access),
            Err(AppError::InvalidToken(_))
        ));
    }

    #[test]
    fn swapped_keys_never_verify() {
        let codec = codec();
        let now = Utc::now();
        let access = codec.issue_access(7, "carol", &[], now).unwrap();
        let refresh = codec.issue_refresh(7, "carol", &[], now).unwrap();

        assert!(codec.verify(&access, TokenKind::Refresh).is_err());
        assert!(codec.verify(&refresh, TokenKind::Access).is_err());
        // And each verifies under its own key.
        assert!(codec.verify(&access, TokenKind::Access).is_ok());
        assert!(codec.verify(&refresh, TokenKind::Refresh).is_ok());
    }

    #[test]
    fn refresh_expiry_is_seven_days() {
        let codec = codec();
        let now = Utc::now();
        let token = codec.issue_refresh(7, "carol", &[], now).unwrap();
        let claims = codec.verify(&token, TokenKind::Refresh).unwrap();
        assert_eq!(claims.exp, (now + chrono::Duration::days(7)).timestamp());
    }

    #[test]
    fn garbage_token_is_rejected() {
        let codec = codec();
        assert!(codec.verify("not.a.token", TokenKind::Access).is_err());
        assert!(codec.verify("", TokenKind::Access).is_err());
    }
}
