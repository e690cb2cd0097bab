// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! OAuth credentials held for a (provider, user) pair.

use chrono::{DateTime, Duration, Utc};
use std::fmt;
use uuid::Uuid;

/// Stored OAuth credential. At most one live row per (provider, user).
#[derive(Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct ProviderCredential {
    pub provider_id: i32,
    pub user_id: Uuid,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl ProviderCredential {
    /// True when the access token expires within `margin` of `now`.
    pub fn expires_within(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        now + margin >= self.expires_at
    }

    pub fn access_token(&self) -> AccessToken {
        AccessToken::new(self.access_token.clone())
    }
}

impl fmt::Debug for ProviderCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderCredential")
            .field("provider_id", &self.provider_id)
            .field("user_id", &self.user_id)
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Bearer token handed to provider API calls.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(<redacted>)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential(expires_in: i64) -> ProviderCredential {
        ProviderCredential {
            provider_id: 1,
            user_id: Uuid::new_v4(),
            access_token: "access".to_string(),
            refresh_token: "refresh".to_string(),
            expires_at: Utc::now() + Duration::seconds(expires_in),
        }
    }

    #[test]
    fn test_expires_within_margin() {
        let now = Utc::now();
        let margin = Duration::minutes(5);
        assert!(credential(60).expires_within(now, margin));
        assert!(credential(-60).expires_within(now, margin));
        assert!(!credential(3600).expires_within(now, margin));
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let cred = credential(3600);
        let out = format!("{:?} {:?}", cred, cred.access_token());
        assert!(!out.contains("access\""));
        assert!(!out.contains("refresh\""));
        assert!(out.contains("<redacted>"));
    }
}
