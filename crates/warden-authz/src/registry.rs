use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use tokio::sync::{mpsc, watch, RwLock};
use uuid::Uuid;

use crate::core::ConnectionControl;

/// Subscription key for a tenant-scoped record.
#[must_use]
pub fn subscription_key(tenant_id: &str, record_id: &str) -> String {
    format!("{tenant_id}:{record_id}")
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum NotifyError {
    #[error("connection outbound queue is full")]
    QueueFull,
    #[error("connection is closed")]
    Closed,
}

/// Handle to one live connection: a bounded outbound queue the host's send
/// loop drains, plus an optional close signal.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    outbound: mpsc::Sender<String>,
    control: Option<watch::Sender<ConnectionControl>>,
}

impl ConnectionHandle {
    #[must_use]
    pub fn new(outbound: mpsc::Sender<String>) -> Self {
        Self {
            outbound,
            control: None,
        }
    }

    #[must_use]
    pub fn with_control(
        outbound: mpsc::Sender<String>,
        control: watch::Sender<ConnectionControl>,
    ) -> Self {
        Self {
            outbound,
            control: Some(control),
        }
    }

    /// Builds a handle and its receiving end. Convenience for hosts and
    /// tests that drain the outbound queue directly.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (outbound, receiver) = mpsc::channel(capacity);
        (Self::new(outbound), receiver)
    }

    /// Queues a payload without waiting. A full queue or a gone receiver
    /// is an error the caller decides how to treat.
    ///
    /// # Errors
    /// [`NotifyError::QueueFull`] or [`NotifyError::Closed`].
    pub fn send(&self, payload: String) -> Result<(), NotifyError> {
        self.outbound.try_send(payload).map_err(|error| match error {
            mpsc::error::TrySendError::Full(_) => NotifyError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => NotifyError::Closed,
        })
    }

    /// Signals the host's send loop to close the connection.
    pub fn close(&self) {
        if let Some(control) = &self.control {
            let _ = control.send(ConnectionControl::Close);
        }
    }
}

#[allow(async_fn_in_trait)]
pub trait ConnectionRegistry {
    /// The live handle for a connection id, if the connection is still up.
    async fn get_connection(&self, connection_id: Uuid) -> Option<ConnectionHandle>;

    /// Every connection id currently registered.
    async fn connection_ids(&self) -> Vec<Uuid>;
}

#[allow(async_fn_in_trait)]
pub trait SubscriptionRegistry {
    /// Removes every subscription the connection holds within the tenant
    /// and returns how many were removed.
    async fn remove_subscriptions_for_tenant(&self, connection_id: Uuid, tenant_id: &str)
        -> usize;
}

impl<T> ConnectionRegistry for Arc<T>
where
    T: ConnectionRegistry + Send + Sync,
{
    async fn get_connection(&self, connection_id: Uuid) -> Option<ConnectionHandle> {
        self.as_ref().get_connection(connection_id).await
    }

    async fn connection_ids(&self) -> Vec<Uuid> {
        self.as_ref().connection_ids().await
    }
}

impl<T> SubscriptionRegistry for Arc<T>
where
    T: SubscriptionRegistry + Send + Sync,
{
    async fn remove_subscriptions_for_tenant(
        &self,
        connection_id: Uuid,
        tenant_id: &str,
    ) -> usize {
        self.as_ref()
            .remove_subscriptions_for_tenant(connection_id, tenant_id)
            .await
    }
}

#[derive(Default)]
pub struct InMemoryConnectionRegistry {
    connections: RwLock<HashMap<Uuid, ConnectionHandle>>,
}

impl InMemoryConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, connection_id: Uuid, handle: ConnectionHandle) {
        self.connections.write().await.insert(connection_id, handle);
    }

    pub async fn deregister(&self, connection_id: Uuid) {
        self.connections.write().await.remove(&connection_id);
    }
}

impl ConnectionRegistry for InMemoryConnectionRegistry {
    async fn get_connection(&self, connection_id: Uuid) -> Option<ConnectionHandle> {
        self.connections.read().await.get(&connection_id).cloned()
    }

    async fn connection_ids(&self) -> Vec<Uuid> {
        self.connections.read().await.keys().copied().collect()
    }
}

#[derive(Default)]
pub struct InMemorySubscriptionRegistry {
    subscriptions: RwLock<HashMap<String, HashSet<Uuid>>>,
}

impl InMemorySubscriptionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_subscription(&self, connection_id: Uuid, key: String) {
        self.subscriptions
            .write()
            .await
            .entry(key)
            .or_default()
            .insert(connection_id);
    }

    /// Drops every subscription the connection holds, across tenants.
    pub async fn remove_connection(&self, connection_id: Uuid) {
        let mut subscriptions = self.subscriptions.write().await;
        subscriptions.retain(|_, listeners| {
            listeners.remove(&connection_id);
            !listeners.is_empty()
        });
    }

    pub async fn subscription_count(&self, connection_id: Uuid) -> usize {
        let subscriptions = self.subscriptions.read().await;
        subscriptions
            .values()
            .filter(|listeners| listeners.contains(&connection_id))
            .count()
    }
}

impl SubscriptionRegistry for InMemorySubscriptionRegistry {
    async fn remove_subscriptions_for_tenant(
        &self,
        connection_id: Uuid,
        tenant_id: &str,
    ) -> usize {
        let mut removed = 0;
        let mut subscriptions = self.subscriptions.write().await;
        subscriptions.retain(|key, listeners| {
            if key.starts_with(tenant_id)
                && key[tenant_id.len()..].starts_with(':')
                && listeners.remove(&connection_id)
            {
                removed += 1;
            }
            !listeners.is_empty()
        });
        removed
    }
}
