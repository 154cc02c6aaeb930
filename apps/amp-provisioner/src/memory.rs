//! In-memory adapters for the host collaborators, for tests and local wiring.

use std::collections::HashMap;
use std::sync::Arc;

use amp_sdk::Settings;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;

use crate::host::{
    Email, ExternalUser, Notifier, NotifyError, Order, OrderId, OrderRepository, OrderStatus,
    OrderUser, StoreError,
};

#[derive(Debug, Clone, Default)]
pub struct StaticSettings {
    values: HashMap<String, String>,
}

impl StaticSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.values.insert(key.to_string(), value.into());
        self
    }
}

impl Settings for StaticSettings {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

#[derive(Default)]
pub struct InMemoryOrderRepository {
    orders: Mutex<HashMap<OrderId, Order>>,
    external_users: Mutex<HashMap<OrderId, ExternalUser>>,
}

impl InMemoryOrderRepository {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Insert or replace an order as the host platform would.
    pub async fn put_order(&self, order: Order) {
        self.orders.lock().await.insert(order.id, order);
    }

    pub async fn set_status(&self, id: OrderId, status: OrderStatus) -> Result<(), StoreError> {
        let mut orders = self.orders.lock().await;
        let order = orders.get_mut(&id).ok_or(StoreError::OrderNotFound(id))?;
        order.status = status;
        Ok(())
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn order(&self, id: OrderId) -> Result<Order, StoreError> {
        self.orders
            .lock()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::OrderNotFound(id))
    }

    async fn set_external_id(&self, id: OrderId, external_id: &str) -> Result<(), StoreError> {
        let mut orders = self.orders.lock().await;
        let order = orders.get_mut(&id).ok_or(StoreError::OrderNotFound(id))?;
        order.external_id = Some(external_id.to_string());
        Ok(())
    }

    async fn external_user(&self, id: OrderId) -> Result<Option<ExternalUser>, StoreError> {
        Ok(self.external_users.lock().await.get(&id).cloned())
    }

    async fn create_external_user(
        &self,
        id: OrderId,
        user: ExternalUser,
    ) -> Result<(), StoreError> {
        let mut users = self.external_users.lock().await;
        // Creation is idempotent: the first record for an order wins.
        users.entry(id).or_insert(user);
        Ok(())
    }

    async fn update_external_user_password(
        &self,
        id: OrderId,
        password: &str,
    ) -> Result<(), StoreError> {
        let mut users = self.external_users.lock().await;
        let user = users
            .get_mut(&id)
            .ok_or(StoreError::ExternalUserMissing(id))?;
        user.password = password.to_string();
        Ok(())
    }
}

/// Logs outgoing mail instead of sending it. Only the subject is logged since
/// the content carries credentials.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, recipient: &OrderUser, email: Email) -> Result<(), NotifyError> {
        info!(recipient = %recipient.email, subject = %email.subject, "email dispatched");
        Ok(())
    }
}

/// Keeps every email it is asked to send.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(OrderUser, Email)>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn sent(&self) -> Vec<(OrderUser, Email)> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, recipient: &OrderUser, email: Email) -> Result<(), NotifyError> {
        self.sent.lock().await.push((recipient.clone(), email));
        Ok(())
    }
}
