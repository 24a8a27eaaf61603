//! Process-wide authorization configuration.
//!
//! Everything the credential codec and the policy resolver need to know that
//! is not stored in the database lives here: the two signing secrets, token
//! lifetimes and the well-known role names. One immutable value is built at
//! startup and shared through `AppState`; nothing reads these env vars after
//! that point.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Duration;

use crate::errors::AppError;

/// Access tokens can never live shorter than this, whatever the env says.
const ACCESS_TTL_FLOOR_SECS: i64 = 300;
const ACCESS_TTL_DEFAULT_SECS: i64 = 3600;
/// Refresh lifetime is fixed; it is not configurable on purpose.
const REFRESH_TTL_DAYS: i64 = 7;

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub access_secret: Arc<Vec<u8>>,
    pub refresh_secret: Arc<Vec<u8>>,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    /// Global role names that classify as the Admin visibility tier.
    pub admin_roles: HashSet<String>,
    /// Global role name that classifies as the ProjectAdmin tier.
    pub project_admin_role: String,
    /// Name of the project-kind role that makes someone a project-local admin.
    pub project_local_admin_role: String,
}

impl AuthConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let access_secret = std::env::var("AUTH_ACCESS_SECRET")
            .map_err(|_| AppError::configuration("AUTH_ACCESS_SECRET not set"))?;
        let refresh_secret = std::env::var("AUTH_REFRESH_SECRET")
            .map_err(|_| AppError::configuration("AUTH_REFRESH_SECRET not set"))?;
        if access_secret == refresh_secret {
            return Err(AppError::configuration(
                "AUTH_ACCESS_SECRET and AUTH_REFRESH_SECRET must differ",
            ));
        }

        let access_ttl_secs = match std::env::var("ACCESS_TOKEN_TTL_SECS") {
            Ok(raw) => raw
                .parse::<i64>()
                .map_err(|_| AppError::configuration("ACCESS_TOKEN_TTL_SECS must be an integer"))?,
            Err(_) => ACCESS_TTL_DEFAULT_SECS,
        };

        let admin_roles = std::env::var("ADMIN_ROLES")
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect::<HashSet<_>>()
            })
            .unwrap_or_default();

        Ok(Self::new(
            access_secret.into_bytes(),
            refresh_secret.into_bytes(),
            access_ttl_secs,
            admin_roles,
        ))
    }

    pub fn new(
        access_secret: Vec<u8>,
        refresh_secret: Vec<u8>,
        access_ttl_secs: i64,
        admin_roles: HashSet<String>,
    ) -> Self {
        let admin_roles = if admin_roles.is_empty() {
            ["admin", "review"].iter().map(|s| s.to_string()).collect()
        } else {
            admin_roles
        };

        Self {
            access_secret: Arc::new(access_secret),
            refresh_secret: Arc::new(refresh_secret),
            access_ttl: Duration::seconds(access_ttl_secs.max(ACCESS_TTL_FLOOR_SECS)),
            refresh_ttl: Duration::days(REFRESH_TTL_DAYS),
            admin_roles,
            project_admin_role: "project_admin".to_string(),
            project_local_admin_role: "admin".to_string(),
        }
    }

    pub fn is_admin_role(&self, name: &str) -> bool {
        self.admin_roles.contains(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(ttl: i64) -> AuthConfig {
        AuthConfig::new(b"access".to_vec(), b"refresh".to_vec(), ttl, HashSet::new())
    }

    #[test]
    fn access_ttl_is_clamped_to_floor() {
        assert_eq!(cfg(10).access_ttl, Duration::seconds(300));
        assert_eq!(cfg(300).access_ttl, Duration::seconds(300));
        assert_eq!(cfg(7200).access_ttl, Duration::seconds(7200));
    }

    #[test]
    fn refresh_ttl_is_fixed_seven_days() {
        assert_eq!(cfg(3600).refresh_ttl, Duration::days(7));
    }

    #[test]
    fn default_admin_set_contains_admin_and_review() {
        let cfg = cfg(3600);
        assert!(cfg.is_admin_role("admin"));
        assert!(cfg.is_admin_role("review"));
        assert!(!cfg.is_admin_role("project_admin"));
    }
}
