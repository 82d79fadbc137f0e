//! The Broadcast Bus: an ordered ring of the last 100 messages plus per-subscriber mailboxes,
//! used for maintenance-mode and server-wide announcements (`SPEC_FULL.md` §4.7).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};

use control_plane_common::now_unix;

const RING_CAPACITY: usize = 100;
const MAILBOX_CAPACITY: usize = 64;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastMessage {
    pub id: u64,
    pub message_type: String,
    pub properties: Value,
    pub timestamp: u64,
}

struct Ring {
    messages: VecDeque<BroadcastMessage>,
}

/// The in-memory ring plus per-subscriber mailboxes. Cheap to clone via `Arc`.
pub struct BroadcastBus {
    ring: RwLock<Ring>,
    next_id: AtomicU64,
    mailboxes: Mutex<HashMap<String, mpsc::Sender<BroadcastMessage>>>,
    maintenance_mode: std::sync::atomic::AtomicBool,
}

impl BroadcastBus {
    pub fn new() -> Self {
        Self {
            ring: RwLock::new(Ring { messages: VecDeque::with_capacity(RING_CAPACITY) }),
            next_id: AtomicU64::new(0),
            mailboxes: Mutex::new(HashMap::new()),
            maintenance_mode: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Appends a message, assigns the next id, evicts the oldest past 100, and best-effort
    /// delivers it to every mailbox. A mailbox that is full or closed is unsubscribed.
    pub async fn add(&self, message_type: impl Into<String>, properties: Value) -> BroadcastMessage {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let message = BroadcastMessage {
            id,
            message_type: message_type.into(),
            properties,
            timestamp: now_unix(),
        };

        {
            let mut ring = self.ring.write().await;
            ring.messages.push_back(message.clone());
            while ring.messages.len() > RING_CAPACITY {
                ring.messages.pop_front();
            }
        }

        self.deliver(message.clone()).await;
        message
    }

    async fn deliver(&self, message: BroadcastMessage) {
        let mut dead = Vec::new();
        {
            let mailboxes = self.mailboxes.lock().await;
            for (subscriber_id, sender) in mailboxes.iter() {
                if sender.try_send(message.clone()).is_err() {
                    dead.push(subscriber_id.clone());
                }
            }
        }
        if !dead.is_empty() {
            let mut mailboxes = self.mailboxes.lock().await;
            for subscriber_id in dead {
                debug!(%subscriber_id, "mailbox full or closed, unsubscribing");
                mailboxes.remove(&subscriber_id);
            }
        }
    }

    /// Opens a mailbox for `subscriber_id`, replacing any existing one for the same id.
    pub async fn subscribe(&self, subscriber_id: impl Into<String>) -> mpsc::Receiver<BroadcastMessage> {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        self.mailboxes.lock().await.insert(subscriber_id.into(), tx);
        rx
    }

    pub async fn unsubscribe(&self, subscriber_id: &str) {
        self.mailboxes.lock().await.remove(subscriber_id);
    }

    /// Pull API: every message with id greater than `since_id`.
    pub async fn since(&self, since_id: u64) -> Vec<BroadcastMessage> {
        self.ring
            .read()
            .await
            .messages
            .iter()
            .filter(|m| m.id > since_id)
            .cloned()
            .collect()
    }

    pub fn latest_id(&self) -> u64 {
        self.next_id.load(Ordering::SeqCst)
    }

    pub fn is_maintenance_mode(&self) -> bool {
        self.maintenance_mode.load(Ordering::SeqCst)
    }

    /// Enables or disables maintenance mode and appends the matching announcement. Enabling
    /// does not itself schedule the delayed shutdown; the caller (the control-plane application)
    /// owns that via `ShutdownScheduler` so the bus stays free of host/server-stopping logic.
    pub async fn set_maintenance_mode(&self, enabled: bool, message: Option<String>) -> BroadcastMessage {
        self.maintenance_mode.store(enabled, Ordering::SeqCst);
        let properties = serde_json::json!({
            "enabled": enabled,
            "message": message.unwrap_or_else(|| if enabled {
                "Server is entering maintenance mode".to_string()
            } else {
                "Server is back online".to_string()
            }),
        });
        if enabled {
            info!("maintenance mode enabled");
        } else {
            info!("maintenance mode disabled");
        }
        self.add("Maintenance", properties).await
    }
}

impl Default for BroadcastBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A target for the direct server-push delivery surface (`SPEC_FULL.md` §10.5): the address
/// and port of a game-server process that did not open a streaming subscription.
#[derive(Debug, Clone)]
pub struct ServerPushTarget {
    pub address: String,
    pub port: u16,
}

/// Best-effort direct HTTP push to each server's own `/global_message` endpoint. Failures are
/// swallowed; this surface never blocks `add` and never fails the caller.
pub async fn push_to_servers(client: &reqwest::Client, targets: Vec<ServerPushTarget>, message: &BroadcastMessage) {
    let mut joins = Vec::new();
    for target in targets {
        let client = client.clone();
        let message = message.clone();
        joins.push(tokio::spawn(async move {
            let url = format!("http://{}:{}/global_message", target.address, target.port);
            if let Err(err) = client
                .post(&url)
                .json(&message)
                .timeout(std::time::Duration::from_secs(1))
                .send()
                .await
            {
                warn!(%url, error = %err, "global message push failed, ignoring");
            }
        }));
    }
    for join in joins {
        let _ = join.await;
    }
}

pub type SharedBroadcastBus = Arc<BroadcastBus>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_assigns_monotonically_increasing_ids() {
        let bus = BroadcastBus::new();
        let a = bus.add("a", serde_json::json!({})).await;
        let b = bus.add("b", serde_json::json!({})).await;
        assert_eq!(b.id, a.id + 1);
    }

    #[tokio::test]
    async fn ring_evicts_past_capacity() {
        let bus = BroadcastBus::new();
        for i in 0..(RING_CAPACITY + 10) {
            bus.add("m", serde_json::json!({ "i": i })).await;
        }
        let since = bus.since(0).await;
        assert_eq!(since.len(), RING_CAPACITY);
        assert_eq!(since.first().unwrap().id, 11);
    }

    #[tokio::test]
    async fn pull_api_returns_only_messages_after_cursor() {
        let bus = BroadcastBus::new();
        bus.add("a", serde_json::json!({})).await;
        let b = bus.add("b", serde_json::json!({})).await;
        let since = bus.since(b.id - 1).await;
        assert_eq!(since.len(), 1);
        assert_eq!(since[0].id, b.id);
    }

    #[tokio::test]
    async fn a_full_mailbox_is_unsubscribed_on_next_delivery() {
        let bus = BroadcastBus::new();
        let mut rx = bus.subscribe("sub-1").await;
        for i in 0..(MAILBOX_CAPACITY + 1) {
            bus.add("m", serde_json::json!({ "i": i })).await;
        }
        // drain one slot so the channel isn't immediately reported closed, then force another
        // delivery past capacity to trigger the unsubscribe path.
        let _ = rx.try_recv();
        bus.add("overflow", serde_json::json!({})).await;
        assert!(bus.mailboxes.lock().await.len() <= 1);
    }

    #[tokio::test]
    async fn maintenance_mode_toggles_and_appends_a_message() {
        let bus = BroadcastBus::new();
        assert!(!bus.is_maintenance_mode());
        let msg = bus.set_maintenance_mode(true, None).await;
        assert!(bus.is_maintenance_mode());
        assert_eq!(msg.message_type, "Maintenance");
    }
}
