//! The player-data store collaborator.
//!
//! The real store (accounts, tokens, currency, friends, accessories...) is out of this core's
//! scope (`SPEC_FULL.md` §1); the matchmaker and the reclamation loops only ever need the three
//! `player_data` columns named in §6: `server_id`, `private_server_active`,
//! `private_server_expires`, plus a currency debit for private-server subscription. Everything
//! else about the store is named only as an interface the core consumes, per §9's
//! cyclic-dependency redesign note.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::model::ServerUid;

#[derive(Debug, Clone, Default)]
pub struct PlayerRecord {
    pub server_id: Option<ServerUid>,
    pub private_server_active: bool,
    pub private_server_expires: Option<u64>,
    pub currency: i64,
}

#[async_trait]
pub trait PlayerDataStore: Send + Sync {
    async fn user_exists(&self, user_id: u64) -> bool;

    /// Binds `user_id` to `uid`. Durable before this returns (§5 ordering guarantee).
    async fn bind_server(&self, user_id: u64, uid: &ServerUid);

    /// Clears any binding whose target equals `uid`, for every user bound to it.
    async fn clear_bindings_to(&self, uid: &ServerUid);

    async fn get_binding(&self, user_id: u64) -> Option<ServerUid>;

    async fn is_private_subscription_active(&self, user_id: u64) -> bool;

    async fn set_private_subscription(&self, user_id: u64, active: bool, expires_at: Option<u64>);

    /// Debits `amount` if the balance covers it; returns `false` on insufficient funds.
    async fn debit_currency(&self, user_id: u64, amount: i64) -> bool;
}

/// An in-process store suitable for tests and small deployments, following the single
/// `RwLock<HashMap<..>>`-per-table idiom used by the rest of this workspace's shared state.
#[derive(Debug, Default)]
pub struct InMemoryPlayerDataStore {
    records: RwLock<HashMap<u64, PlayerRecord>>,
}

impl InMemoryPlayerDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test/bootstrap helper: registers a user with a starting currency balance.
    pub async fn seed_user(&self, user_id: u64, currency: i64) {
        let mut records = self.records.write().await;
        records.entry(user_id).or_default().currency = currency;
    }
}

#[async_trait]
impl PlayerDataStore for InMemoryPlayerDataStore {
    async fn user_exists(&self, user_id: u64) -> bool {
        self.records.read().await.contains_key(&user_id)
    }

    async fn bind_server(&self, user_id: u64, uid: &ServerUid) {
        let mut records = self.records.write().await;
        records.entry(user_id).or_default().server_id = Some(uid.clone());
    }

    async fn clear_bindings_to(&self, uid: &ServerUid) {
        let mut records = self.records.write().await;
        for record in records.values_mut() {
            if record.server_id.as_ref() == Some(uid) {
                record.server_id = None;
            }
        }
    }

    async fn get_binding(&self, user_id: u64) -> Option<ServerUid> {
        self.records.read().await.get(&user_id).and_then(|r| r.server_id.clone())
    }

    async fn is_private_subscription_active(&self, user_id: u64) -> bool {
        self.records
            .read()
            .await
            .get(&user_id)
            .map(|r| r.private_server_active)
            .unwrap_or(false)
    }

    async fn set_private_subscription(&self, user_id: u64, active: bool, expires_at: Option<u64>) {
        let mut records = self.records.write().await;
        let record = records.entry(user_id).or_default();
        record.private_server_active = active;
        record.private_server_expires = expires_at;
    }

    async fn debit_currency(&self, user_id: u64, amount: i64) -> bool {
        let mut records = self.records.write().await;
        let Some(record) = records.get_mut(&user_id) else {
            return false;
        };
        if record.currency < amount {
            return false;
        }
        record.currency -= amount;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn binding_and_clearing_round_trips() {
        let store = InMemoryPlayerDataStore::new();
        store.seed_user(1, 100).await;
        let uid = ServerUid::from("master-9000".to_string());

        store.bind_server(1, &uid).await;
        assert_eq!(store.get_binding(1).await, Some(uid.clone()));

        store.clear_bindings_to(&uid).await;
        assert_eq!(store.get_binding(1).await, None);
    }

    #[tokio::test]
    async fn debit_fails_on_insufficient_funds() {
        let store = InMemoryPlayerDataStore::new();
        store.seed_user(1, 10).await;
        assert!(!store.debit_currency(1, 20).await);
        assert!(store.debit_currency(1, 10).await);
    }

    #[tokio::test]
    async fn clear_bindings_only_affects_matching_uid() {
        let store = InMemoryPlayerDataStore::new();
        store.seed_user(1, 0).await;
        store.seed_user(2, 0).await;
        let uid_a = ServerUid::from("master-9000".to_string());
        let uid_b = ServerUid::from("master-9001".to_string());
        store.bind_server(1, &uid_a).await;
        store.bind_server(2, &uid_b).await;

        store.clear_bindings_to(&uid_a).await;

        assert_eq!(store.get_binding(1).await, None);
        assert_eq!(store.get_binding(2).await, Some(uid_b));
    }
}
