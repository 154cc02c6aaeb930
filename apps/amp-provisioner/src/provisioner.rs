use std::sync::Arc;

use amp_sdk::{ApiClient, ApiError, DeployRequest, PostCreateAction, Template};
use rand::{distributions::Alphanumeric, Rng};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::host::{
    Email, EmailButton, ExternalUser, Notifier, Order, OrderId, OrderRepository, OrderStatus,
    StoreError,
};
use crate::metrics;

pub const EXTERNAL_ID_PREFIX: &str = "WMX";
pub const TEMPLATE_ID_KEY: &str = "template_id";
pub const POST_CREATE_KEY: &str = "post_create_action";

const GENERATED_PASSWORD_LEN: usize = 16;

/// Remote lifecycle of the instance behind an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Uncreated,
    Active,
    Suspended,
    Terminated,
}

impl LifecycleState {
    pub fn of(order: &Order) -> Self {
        match (order.status, order.external_id.as_deref()) {
            (OrderStatus::Terminated, _) => LifecycleState::Terminated,
            (_, None) => LifecycleState::Uncreated,
            (OrderStatus::Suspended, Some(_)) => LifecycleState::Suspended,
            (_, Some(_)) => LifecycleState::Active,
        }
    }
}

impl From<LifecycleState> for OrderStatus {
    fn from(state: LifecycleState) -> Self {
        match state {
            LifecycleState::Uncreated => OrderStatus::Pending,
            LifecycleState::Active => OrderStatus::Active,
            LifecycleState::Suspended => OrderStatus::Suspended,
            LifecycleState::Terminated => OrderStatus::Terminated,
        }
    }
}

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("cannot {operation} order in state {state:?}")]
    InvalidState {
        operation: &'static str,
        state: LifecycleState,
    },
    #[error("package {0} has no AMP deployment template configured")]
    MissingTemplate(u64),
}

impl ProvisionError {
    pub fn kind(&self) -> &'static str {
        match self {
            ProvisionError::Api(err) => err.kind(),
            ProvisionError::Store(_) => "store",
            ProvisionError::InvalidState { .. } => "invalid_state",
            ProvisionError::MissingTemplate(_) => "missing_template",
        }
    }
}

/// Shown to end users when a password change fails; the cause is only logged.
#[derive(Debug, Error)]
#[error("Failed to change the panel password. Please try again later.")]
pub struct PasswordChangeError;

#[derive(Debug, Error)]
#[error("Could not connect to the AMP panel. Verify the hostname and credentials and that at least one deployment template exists.")]
pub struct SelfTestError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreatedInstance {
    pub external_id: String,
    pub username: String,
    pub new_user: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SelectOption {
    pub value: i64,
    pub label: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PackageOptions {
    pub templates: Vec<SelectOption>,
    pub post_create_actions: Vec<SelectOption>,
}

/// Drives an order's AMP instance through its lifecycle. The panel is the
/// source of truth; nothing about the instance is cached here.
#[derive(Clone)]
pub struct Provisioner {
    client: ApiClient,
    orders: Arc<dyn OrderRepository>,
    notifier: Arc<dyn Notifier>,
}

impl Provisioner {
    pub fn new(
        client: ApiClient,
        orders: Arc<dyn OrderRepository>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            client,
            orders,
            notifier,
        }
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    pub async fn create(&self, order_id: OrderId) -> Result<CreatedInstance, ProvisionError> {
        let result = self.create_inner(order_id).await;
        observe("create", order_id, &result);
        result
    }

    async fn create_inner(&self, order_id: OrderId) -> Result<CreatedInstance, ProvisionError> {
        let order = self.orders.order(order_id).await?;
        ensure_state(&order, "create", &[LifecycleState::Uncreated])?;

        let template_id = package_template_id(&order)?;
        let post_create = order
            .package
            .data(POST_CREATE_KEY, PostCreateAction::default());
        let existing = self.orders.external_user(order.id).await?;

        let (username, password) = match &existing {
            Some(user) => (self.resolve_remote_name(user).await?, user.password.clone()),
            None => (
                derive_username(&order.user.username, order.id),
                generate_password(),
            ),
        };

        let external_id = external_id(order.id);
        let response = self
            .client
            .deploy_template(DeployRequest {
                template_id,
                username: username.clone(),
                password: password.clone(),
                email: order.user.email.clone(),
                tag: external_id.clone(),
                friendly_name: order.package.name.clone(),
                secret: instance_secret(order.id),
                post_create,
            })
            .await?;
        debug!(order_id, external_id = %external_id, response = %summarize(&response), "template deployed");

        // The ExternalUser must be stored before the order is marked created.
        let new_user = existing.is_none();
        if new_user {
            self.orders
                .create_external_user(
                    order.id,
                    ExternalUser {
                        username: username.clone(),
                        password: password.clone(),
                    },
                )
                .await?;
            self.send_credentials(&order, &username, &password).await;
        }

        self.orders.set_external_id(order.id, &external_id).await?;

        info!(order_id, external_id = %external_id, new_user, "amp instance created");
        Ok(CreatedInstance {
            external_id,
            username,
            new_user,
        })
    }

    /// The panel's own record decides the name to deploy under; the stored
    /// username is only a fallback when the panel has no such user.
    async fn resolve_remote_name(&self, user: &ExternalUser) -> Result<String, ProvisionError> {
        match self.client.user_info(&user.username).await? {
            Some(remote) => Ok(remote.name),
            None => {
                warn!(username = %user.username, "panel has no record of external user; using stored name");
                Ok(user.username.clone())
            }
        }
    }

    async fn send_credentials(&self, order: &Order, username: &str, password: &str) {
        let email = Email {
            subject: "Your game server panel account".to_string(),
            content: format!(
                "Your server is being deployed. Log in to the control panel with the following credentials.\n\nUsername: {username}\nPassword: {password}"
            ),
            button: Some(EmailButton {
                name: "Open Panel".to_string(),
                url: self.client.credentials().hostname().to_string(),
            }),
        };
        if let Err(err) = self.notifier.notify(&order.user, email).await {
            warn!(order_id = order.id, error = %err, "failed to send panel credentials email");
        }
    }

    pub async fn suspend(&self, order_id: OrderId) -> Result<LifecycleState, ProvisionError> {
        let result = self.set_suspended(order_id, true).await;
        observe("suspend", order_id, &result);
        result
    }

    pub async fn unsuspend(&self, order_id: OrderId) -> Result<LifecycleState, ProvisionError> {
        let result = self.set_suspended(order_id, false).await;
        observe("unsuspend", order_id, &result);
        result
    }

    async fn set_suspended(
        &self,
        order_id: OrderId,
        suspended: bool,
    ) -> Result<LifecycleState, ProvisionError> {
        let operation = if suspended { "suspend" } else { "unsuspend" };
        let order = self.orders.order(order_id).await?;
        ensure_state(
            &order,
            operation,
            &[LifecycleState::Active, LifecycleState::Suspended],
        )?;

        let instance = instance_name(&order);
        self.client
            .set_instance_suspended(&instance, suspended)
            .await?;
        info!(order_id, instance = %instance, suspended, "amp instance suspension updated");

        Ok(if suspended {
            LifecycleState::Suspended
        } else {
            LifecycleState::Active
        })
    }

    /// Delete the instance. Allowed before `create` recorded an external id so
    /// a deploy whose bookkeeping failed can still be cleaned up.
    pub async fn terminate(&self, order_id: OrderId) -> Result<LifecycleState, ProvisionError> {
        let result = self.terminate_inner(order_id).await;
        observe("terminate", order_id, &result);
        result
    }

    async fn terminate_inner(&self, order_id: OrderId) -> Result<LifecycleState, ProvisionError> {
        let order = self.orders.order(order_id).await?;
        ensure_state(
            &order,
            "terminate",
            &[
                LifecycleState::Uncreated,
                LifecycleState::Active,
                LifecycleState::Suspended,
            ],
        )?;

        let instance = instance_name(&order);
        self.client.delete_instance(&instance).await?;
        info!(order_id, instance = %instance, "amp instance deleted");
        Ok(LifecycleState::Terminated)
    }

    pub async fn change_password(
        &self,
        order_id: OrderId,
        new_password: &str,
    ) -> Result<(), PasswordChangeError> {
        let result = self.change_password_inner(order_id, new_password).await;
        observe("change_password", order_id, &result);
        result.map_err(|err| {
            warn!(order_id, kind = err.kind(), error = %err, "panel password change failed");
            PasswordChangeError
        })
    }

    async fn change_password_inner(
        &self,
        order_id: OrderId,
        new_password: &str,
    ) -> Result<(), ProvisionError> {
        let order = self.orders.order(order_id).await?;
        ensure_state(
            &order,
            "change password",
            &[
                LifecycleState::Uncreated,
                LifecycleState::Active,
                LifecycleState::Suspended,
            ],
        )?;
        let user = self
            .orders
            .external_user(order_id)
            .await?
            .ok_or(StoreError::ExternalUserMissing(order_id))?;
        self.client
            .reset_user_password(&user.username, new_password)
            .await?;
        self.orders
            .update_external_user_password(order_id, new_password)
            .await?;
        info!(order_id, username = %user.username, "panel password changed");
        Ok(())
    }

    pub async fn list_templates(&self) -> Result<Vec<Template>, ApiError> {
        self.client.deployment_templates().await
    }

    /// Connectivity check run when panel settings are saved.
    pub async fn test_connection(&self) -> Result<usize, SelfTestError> {
        match self.list_templates().await {
            Ok(templates) => {
                info!(templates = templates.len(), "amp panel connection verified");
                Ok(templates.len())
            }
            Err(err) => {
                warn!(kind = err.kind(), error = %err, "amp panel connection test failed");
                Err(SelfTestError)
            }
        }
    }

    pub async fn package_options(&self) -> Result<PackageOptions, ApiError> {
        let templates = self
            .list_templates()
            .await?
            .into_iter()
            .map(|template| SelectOption {
                value: template.id,
                label: template.name,
            })
            .collect();
        let post_create_actions = PostCreateAction::ALL
            .iter()
            .map(|action| SelectOption {
                value: i64::from(u8::from(*action)),
                label: action.label().to_string(),
            })
            .collect();
        Ok(PackageOptions {
            templates,
            post_create_actions,
        })
    }
}

pub fn external_id(order_id: OrderId) -> String {
    format!("{EXTERNAL_ID_PREFIX}{order_id}")
}

fn instance_name(order: &Order) -> String {
    order
        .external_id
        .clone()
        .unwrap_or_else(|| external_id(order.id))
}

/// Stable per-order secret handed to AMP with the deployment.
pub fn instance_secret(order_id: OrderId) -> String {
    let digest = Sha256::digest(format!("amp-order-{order_id}").as_bytes());
    hex::encode(digest)
}

/// Lowercased ASCII alphanumerics of the platform username plus the order id,
/// so one platform user can own several panel accounts.
pub fn derive_username(platform_username: &str, order_id: OrderId) -> String {
    let base: String = platform_username
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect();
    let base = if base.is_empty() { "user" } else { &base };
    format!("{base}{order_id}")
}

fn generate_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_PASSWORD_LEN)
        .map(char::from)
        .collect()
}

fn package_template_id(order: &Order) -> Result<i64, ProvisionError> {
    let value = order.package.data(TEMPLATE_ID_KEY, Value::Null);
    let id = match &value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    id.ok_or(ProvisionError::MissingTemplate(order.package.id))
}

fn ensure_state(
    order: &Order,
    operation: &'static str,
    allowed: &[LifecycleState],
) -> Result<(), ProvisionError> {
    let state = LifecycleState::of(order);
    if allowed.contains(&state) {
        Ok(())
    } else {
        Err(ProvisionError::InvalidState { operation, state })
    }
}

fn summarize(response: &Value) -> String {
    match response {
        Value::Object(map) => map
            .get("Status")
            .or_else(|| map.get("Result"))
            .map(Value::to_string)
            .unwrap_or_else(|| "object".to_string()),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

fn observe<T>(operation: &str, order_id: OrderId, result: &Result<T, ProvisionError>) {
    let outcome = match result {
        Ok(_) => "ok",
        Err(err) => err.kind(),
    };
    debug!(order_id, operation, outcome, "lifecycle operation finished");
    metrics::record_operation(operation, outcome);
}
