// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Single-use webhook verification tokens.

use crate::db::VerificationTokenStore;
use crate::error::StoreError;
use crate::models::WebhookVerification;
use chrono::{Duration, Utc};
use ring::rand::{SecureRandom, SystemRandom};
use std::sync::Arc;

/// Lifetime of an issued token (5 minutes).
pub const VERIFICATION_TOKEN_TTL_SECS: i64 = 5 * 60;

const TOKEN_BYTES: usize = 32;

/// Outcome of presenting a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenCheck {
    /// Token existed and was unexpired; it is now consumed.
    Valid,
    /// Token exists but has expired.
    Expired,
    NotFound,
}

#[derive(Clone)]
pub struct VerificationTokens {
    store: Arc<dyn VerificationTokenStore>,
    rng: SystemRandom,
}

impl VerificationTokens {
    pub fn new(store: Arc<dyn VerificationTokenStore>) -> Self {
        Self {
            store,
            rng: SystemRandom::new(),
        }
    }

    /// Generate and persist a fresh 256-bit hex token.
    pub async fn issue(&self) -> anyhow::Result<WebhookVerification> {
        let mut bytes = [0u8; TOKEN_BYTES];
        self.rng
            .fill(&mut bytes)
            .map_err(|_| anyhow::anyhow!("system RNG failure"))?;

        let now = Utc::now();
        let verification = WebhookVerification {
            token: hex::encode(bytes),
            created_at: now,
            expires_at: now + Duration::seconds(VERIFICATION_TOKEN_TTL_SECS),
        };
        self.store.insert_verification(&verification).await?;

        tracing::info!(expires_at = %verification.expires_at, "Issued webhook verification token");
        Ok(verification)
    }

    /// Consume `token`. Of concurrent callers presenting the same token, at
    /// most one sees [`TokenCheck::Valid`].
    pub async fn consume(&self, token: &str) -> Result<TokenCheck, StoreError> {
        if self.store.take_unexpired(token, Utc::now()).await?.is_some() {
            return Ok(TokenCheck::Valid);
        }

        if self.store.verification_exists(token).await? {
            Ok(TokenCheck::Expired)
        } else {
            Ok(TokenCheck::NotFound)
        }
    }

    /// Delete a token that will not be used (e.g. registration failed).
    pub async fn revoke(&self, token: &str) -> Result<(), StoreError> {
        self.store.delete_verification(token).await
    }

    /// Remove every expired token.
    pub async fn purge_expired(&self) -> Result<u64, StoreError> {
        let purged = self.store.purge_expired(Utc::now()).await?;
        if purged > 0 {
            tracing::info!(purged, "Purged expired verification tokens");
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;

    fn tokens() -> (Arc<MemoryStore>, VerificationTokens) {
        let store = Arc::new(MemoryStore::new());
        let tokens = VerificationTokens::new(store.clone());
        (store, tokens)
    }

    #[tokio::test]
    async fn test_issue_then_consume_once() {
        let (_, tokens) = tokens();
        let issued = tokens.issue().await.unwrap();

        assert_eq!(issued.token.len(), 64);
        assert!(issued.token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(tokens.consume(&issued.token).await.unwrap(), TokenCheck::Valid);
        assert_eq!(
            tokens.consume(&issued.token).await.unwrap(),
            TokenCheck::NotFound
        );
    }

    #[tokio::test]
    async fn test_expired_token() {
        let (store, tokens) = tokens();
        let now = Utc::now();
        let stale = WebhookVerification {
            token: "stale".to_string(),
            created_at: now - Duration::minutes(10),
            expires_at: now - Duration::minutes(5),
        };
        store.insert_verification(&stale).await.unwrap();

        assert_eq!(tokens.consume("stale").await.unwrap(), TokenCheck::Expired);
        assert_eq!(tokens.purge_expired().await.unwrap(), 1);
        assert_eq!(tokens.consume("stale").await.unwrap(), TokenCheck::NotFound);
    }

    #[tokio::test]
    async fn test_concurrent_consume_single_winner() {
        let (_, tokens) = tokens();
        let issued = tokens.issue().await.unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tokens = tokens.clone();
                let token = issued.token.clone();
                tokio::spawn(async move { tokens.consume(&token).await.unwrap() })
            })
            .collect();

        let mut valid = 0;
        for handle in handles {
            if handle.await.unwrap() == TokenCheck::Valid {
                valid += 1;
            }
        }
        assert_eq!(valid, 1);
    }
}
