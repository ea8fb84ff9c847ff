//! Brokerage access-token lifecycle
//!
//! Tokens are refreshed on a fixed wall-clock period by a background task.
//! A refresh simply replaces the cached token, so overlapping refreshes are
//! harmless.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessToken {
    pub value: String,
    pub issued_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            issued_at: Utc::now(),
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.issued_at
    }
}

/// Single shared token slot
#[derive(Debug)]
pub struct AccessTokenCache {
    token: RwLock<Option<AccessToken>>,
    max_age: Duration,
}

impl AccessTokenCache {
    pub fn new(max_age: Duration) -> Self {
        Self {
            token: RwLock::new(None),
            max_age,
        }
    }

    pub async fn current(&self) -> Option<AccessToken> {
        self.token.read().await.clone()
    }

    /// Store a freshly issued token, discarding the old one.
    pub async fn replace(&self, token: AccessToken) {
        info!(issued_at = %token.issued_at, "Access token replaced");
        *self.token.write().await = Some(token);
    }

    pub async fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        match self.token.read().await.as_ref() {
            None => true,
            Some(token) => {
                let age = token.age(now);
                if age > self.max_age {
                    warn!(
                        age_hours = age.num_minutes() as f64 / 60.0,
                        "Access token is stale"
                    );
                    true
                } else {
                    false
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_token_refresh_window() {
        let cache = AccessTokenCache::new(Duration::hours(22));
        assert!(cache.needs_refresh(Utc::now()).await);

        let token = AccessToken::new("abc");
        let issued = token.issued_at;
        cache.replace(token).await;

        assert!(!cache.needs_refresh(issued + Duration::hours(21)).await);
        assert!(cache.needs_refresh(issued + Duration::hours(23)).await);
    }
}
