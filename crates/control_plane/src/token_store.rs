//! The bearer-token resolution collaborator (`SPEC_FULL.md` §1, §7): the real session/account
//! store is out of this repo's scope, named only as an interface the HTTP front adapter
//! consumes to turn a client-presented token into an authenticated user id.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn resolve(&self, token: &str) -> Option<u64>;
}

/// An in-process stand-in suitable for tests and small deployments, following the single
/// `RwLock<HashMap<..>>`-per-table idiom used by `PlayerDataStore`.
#[derive(Debug, Default)]
pub struct InMemoryTokenStore {
    tokens: RwLock<HashMap<String, u64>>,
}

impl InMemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn issue(&self, token: impl Into<String>, user_id: u64) {
        self.tokens.write().await.insert(token.into(), user_id);
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn resolve(&self, token: &str) -> Option<u64> {
        self.tokens.read().await.get(token).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_token_resolves_to_none() {
        let store = InMemoryTokenStore::new();
        assert_eq!(store.resolve("nope").await, None);
    }

    #[tokio::test]
    async fn issued_token_resolves_to_its_user() {
        let store = InMemoryTokenStore::new();
        store.issue("abc", 42).await;
        assert_eq!(store.resolve("abc").await, Some(42));
    }
}
