//! Narrow interfaces onto the billing platform that owns orders, users and mail.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub type OrderId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Pending,
    Active,
    Suspended,
    Terminated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderUser {
    pub username: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Package {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub data: HashMap<String, Value>,
}

impl Package {
    /// Typed lookup into the package's free-form settings; `default` when the
    /// key is absent or holds a value of the wrong shape.
    pub fn data<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.data
            .get(key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
            .unwrap_or(default)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user: OrderUser,
    pub package: Package,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub status: OrderStatus,
}

/// Panel-side account tied to one order.
#[derive(Clone, PartialEq, Eq)]
pub struct ExternalUser {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for ExternalUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalUser")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("order {0} not found")]
    OrderNotFound(OrderId),
    #[error("order {0} has no external user")]
    ExternalUserMissing(OrderId),
    #[error("store error: {0}")]
    Store(String),
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn order(&self, id: OrderId) -> Result<Order, StoreError>;

    async fn set_external_id(&self, id: OrderId, external_id: &str) -> Result<(), StoreError>;

    async fn external_user(&self, id: OrderId) -> Result<Option<ExternalUser>, StoreError>;

    async fn create_external_user(&self, id: OrderId, user: ExternalUser)
        -> Result<(), StoreError>;

    async fn update_external_user_password(
        &self,
        id: OrderId,
        password: &str,
    ) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmailButton {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Email {
    pub subject: String,
    pub content: String,
    pub button: Option<EmailButton>,
}

#[derive(Debug, Error)]
#[error("notification failed: {0}")]
pub struct NotifyError(pub String);

/// Outbound mail. Delivery is best effort; callers log failures and move on.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, recipient: &OrderUser, email: Email) -> Result<(), NotifyError>;
}
