use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use amp_provisioner::host::{
    ExternalUser, Order, OrderId, OrderRepository, OrderStatus, OrderUser, Package, StoreError,
};
use amp_provisioner::memory::{InMemoryOrderRepository, RecordingNotifier};
use amp_provisioner::provisioner::{
    instance_secret, LifecycleState, ProvisionError, Provisioner, POST_CREATE_KEY,
    TEMPLATE_ID_KEY,
};
use amp_sdk::testing::StubPanel;
use amp_sdk::{ApiClient, ApiError, SessionStore};
use async_trait::async_trait;
use axum::http::StatusCode;
use serde_json::{json, Value};

struct Harness {
    panel: StubPanel,
    provisioner: Provisioner,
    orders: Arc<InMemoryOrderRepository>,
    notifier: Arc<RecordingNotifier>,
}

async fn harness() -> Harness {
    let panel = StubPanel::start().await;
    let client = ApiClient::builder(panel.credentials())
        .session_store(SessionStore::new())
        .build();
    let orders = InMemoryOrderRepository::new();
    let notifier = RecordingNotifier::new();
    let provisioner = Provisioner::new(client, orders.clone(), notifier.clone());
    Harness {
        panel,
        provisioner,
        orders,
        notifier,
    }
}

fn order(external_id: Option<&str>, status: OrderStatus) -> Order {
    let mut data = HashMap::new();
    data.insert(TEMPLATE_ID_KEY.to_string(), json!(7));
    data.insert(POST_CREATE_KEY.to_string(), json!(3));
    Order {
        id: 42,
        user: OrderUser {
            username: "Steve".into(),
            email: "steve@example.com".into(),
        },
        package: Package {
            id: 5,
            name: "Minecraft".into(),
            data,
        },
        external_id: external_id.map(str::to_string),
        status,
    }
}

fn field<'a>(body: &'a Value, key: &str) -> &'a Value {
    body.get(key).unwrap_or(&Value::Null)
}

#[tokio::test]
async fn create_deploys_for_a_new_user_and_mails_credentials() {
    let h = harness().await;
    h.orders.put_order(order(None, OrderStatus::Pending)).await;

    let created = h.provisioner.create(42).await.unwrap();
    assert_eq!(created.external_id, "WMX42");
    assert_eq!(created.username, "steve42");
    assert!(created.new_user);

    let deploys = h.panel.calls_to("/ADSModule/DeployTemplate");
    assert_eq!(deploys.len(), 1);
    let body = &deploys[0].body;
    assert_eq!(field(body, "TemplateID"), &json!(7));
    assert_eq!(field(body, "NewUsername"), &json!("steve42"));
    assert_eq!(field(body, "NewEmail"), &json!("steve@example.com"));
    assert_eq!(field(body, "Tag"), &json!("WMX42"));
    assert_eq!(field(body, "FriendlyName"), &json!("Minecraft"));
    assert_eq!(field(body, "Secret"), &json!(instance_secret(42)));
    assert_eq!(field(body, "PostCreate"), &json!(3));
    assert_eq!(field(body, "RequiredTags"), &json!([]));
    assert_eq!(field(body, "SESSIONID"), &json!("session-1"));

    let password = field(body, "NewPassword").as_str().unwrap().to_string();
    assert_eq!(password.len(), 16);

    let stored = h.orders.order(42).await.unwrap();
    assert_eq!(stored.external_id.as_deref(), Some("WMX42"));
    let user = h.orders.external_user(42).await.unwrap().unwrap();
    assert_eq!(user.username, "steve42");
    assert_eq!(user.password, password);

    let sent = h.notifier.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0.email, "steve@example.com");
    assert!(sent[0].1.content.contains(&password));
    assert_eq!(
        sent[0].1.button.as_ref().map(|b| b.url.clone()),
        Some(h.panel.hostname())
    );
}

#[tokio::test]
async fn create_reuses_an_existing_panel_user_without_mailing() {
    let h = harness().await;
    h.orders.put_order(order(None, OrderStatus::Pending)).await;
    h.orders
        .create_external_user(
            42,
            ExternalUser {
                username: "steve42".into(),
                password: "kept-password".into(),
            },
        )
        .await
        .unwrap();
    h.panel.respond(
        "/Core/GetAMPUserInfo",
        StatusCode::OK,
        json!({ "Name": "SteveOnPanel" }),
    );

    for _ in 0..2 {
        let created = h.provisioner.create(42).await.unwrap();
        assert_eq!(created.username, "SteveOnPanel");
        assert!(!created.new_user);
        // The host may hand the same order back after a failed bookkeeping step.
        h.orders.put_order(order(None, OrderStatus::Pending)).await;
    }

    let deploys = h.panel.calls_to("/ADSModule/DeployTemplate");
    assert_eq!(deploys.len(), 2);
    for deploy in &deploys {
        assert_eq!(field(&deploy.body, "NewUsername"), &json!("SteveOnPanel"));
        assert_eq!(field(&deploy.body, "NewPassword"), &json!("kept-password"));
    }
    let lookups = h.panel.calls_to("/Core/GetAMPUserInfo");
    assert_eq!(field(&lookups[0].body, "Username"), &json!("steve42"));

    let user = h.orders.external_user(42).await.unwrap().unwrap();
    assert_eq!(user.password, "kept-password");
    assert!(h.notifier.sent().await.is_empty());
}

#[tokio::test]
async fn create_falls_back_to_stored_name_when_panel_has_no_user() {
    let h = harness().await;
    h.orders.put_order(order(None, OrderStatus::Pending)).await;
    h.orders
        .create_external_user(
            42,
            ExternalUser {
                username: "steve42".into(),
                password: "kept-password".into(),
            },
        )
        .await
        .unwrap();
    h.panel
        .respond("/Core/GetAMPUserInfo", StatusCode::OK, Value::Null);

    let created = h.provisioner.create(42).await.unwrap();
    assert_eq!(created.username, "steve42");
}

#[tokio::test]
async fn rejected_deploy_leaves_the_order_untouched() {
    let h = harness().await;
    h.orders.put_order(order(None, OrderStatus::Pending)).await;
    h.panel
        .respond("/ADSModule/DeployTemplate", StatusCode::FORBIDDEN, json!({}));

    let err = h.provisioner.create(42).await.unwrap_err();
    assert!(matches!(
        err,
        ProvisionError::Api(ApiError::Permission { .. })
    ));

    assert!(h.orders.order(42).await.unwrap().external_id.is_none());
    assert!(h.orders.external_user(42).await.unwrap().is_none());
    assert!(h.notifier.sent().await.is_empty());
}

#[tokio::test]
async fn create_requires_a_template_and_an_uncreated_order() {
    let h = harness().await;
    let mut no_template = order(None, OrderStatus::Pending);
    no_template.package.data.clear();
    h.orders.put_order(no_template).await;

    assert!(matches!(
        h.provisioner.create(42).await,
        Err(ProvisionError::MissingTemplate(5))
    ));

    h.orders
        .put_order(order(Some("WMX42"), OrderStatus::Active))
        .await;
    assert!(matches!(
        h.provisioner.create(42).await,
        Err(ProvisionError::InvalidState {
            operation: "create",
            state: LifecycleState::Active,
        })
    ));
    assert!(h.panel.calls_to("/ADSModule/DeployTemplate").is_empty());
}

#[tokio::test]
async fn suspend_and_unsuspend_share_one_session() {
    let h = harness().await;
    h.panel.set_session_ids(["abc123"]);
    h.orders
        .put_order(order(Some("WMX42"), OrderStatus::Active))
        .await;

    assert_eq!(
        h.provisioner.suspend(42).await.unwrap(),
        LifecycleState::Suspended
    );
    h.orders.set_status(42, OrderStatus::Suspended).await.unwrap();
    assert_eq!(
        h.provisioner.unsuspend(42).await.unwrap(),
        LifecycleState::Active
    );

    let calls = h.panel.calls_to("/ADSModule/SetInstanceSuspended");
    assert_eq!(
        calls[0].body,
        json!({ "InstanceName": "WMX42", "Suspended": true, "SESSIONID": "abc123" })
    );
    assert_eq!(
        calls[1].body,
        json!({ "InstanceName": "WMX42", "Suspended": false, "SESSIONID": "abc123" })
    );
    assert_eq!(h.panel.logins(), 1);
}

#[tokio::test]
async fn suspend_requires_a_created_instance() {
    let h = harness().await;
    h.orders.put_order(order(None, OrderStatus::Pending)).await;

    assert!(matches!(
        h.provisioner.suspend(42).await,
        Err(ProvisionError::InvalidState {
            operation: "suspend",
            state: LifecycleState::Uncreated,
        })
    ));
    assert!(h.panel.calls().is_empty());
}

#[tokio::test]
async fn terminate_deletes_by_derived_name_even_before_create_finished() {
    let h = harness().await;
    h.orders.put_order(order(None, OrderStatus::Pending)).await;

    assert_eq!(
        h.provisioner.terminate(42).await.unwrap(),
        LifecycleState::Terminated
    );
    let deletes = h.panel.calls_to("/ADSModule/DeleteInstance");
    assert_eq!(field(&deletes[0].body, "InstanceName"), &json!("WMX42"));

    h.orders
        .put_order(order(Some("WMX42"), OrderStatus::Terminated))
        .await;
    assert!(matches!(
        h.provisioner.terminate(42).await,
        Err(ProvisionError::InvalidState {
            state: LifecycleState::Terminated,
            ..
        })
    ));
}

#[tokio::test]
async fn remote_failures_surface_as_typed_errors() {
    let h = harness().await;
    h.orders
        .put_order(order(Some("WMX42"), OrderStatus::Active))
        .await;
    h.panel.respond(
        "/ADSModule/DeleteInstance",
        StatusCode::INTERNAL_SERVER_ERROR,
        json!({}),
    );

    let err = h.provisioner.terminate(42).await.unwrap_err();
    assert!(matches!(
        err,
        ProvisionError::Api(ApiError::RemoteServer { .. })
    ));
    assert!(err.to_string().starts_with("[AMP]"));
}

#[tokio::test]
async fn change_password_updates_panel_and_store() {
    let h = harness().await;
    h.orders
        .put_order(order(Some("WMX42"), OrderStatus::Active))
        .await;
    h.orders
        .create_external_user(
            42,
            ExternalUser {
                username: "steve42".into(),
                password: "old".into(),
            },
        )
        .await
        .unwrap();

    h.provisioner.change_password(42, "n3w-pass").await.unwrap();

    let resets = h.panel.calls_to("/Core/ResetUserPassword");
    assert_eq!(field(&resets[0].body, "Username"), &json!("steve42"));
    assert_eq!(field(&resets[0].body, "NewPassword"), &json!("n3w-pass"));
    let user = h.orders.external_user(42).await.unwrap().unwrap();
    assert_eq!(user.password, "n3w-pass");
}

#[tokio::test]
async fn change_password_failures_are_generic() {
    let h = harness().await;
    h.orders
        .put_order(order(Some("WMX42"), OrderStatus::Active))
        .await;

    // No external user on record yet.
    assert!(h.provisioner.change_password(42, "x").await.is_err());

    h.orders
        .create_external_user(
            42,
            ExternalUser {
                username: "steve42".into(),
                password: "old".into(),
            },
        )
        .await
        .unwrap();
    h.panel.respond(
        "/Core/ResetUserPassword",
        StatusCode::INTERNAL_SERVER_ERROR,
        json!({}),
    );

    let err = h.provisioner.change_password(42, "x").await.unwrap_err();
    assert!(!err.to_string().contains("[AMP]"));
    let user = h.orders.external_user(42).await.unwrap().unwrap();
    assert_eq!(user.password, "old");
}

#[tokio::test]
async fn templates_and_self_test() {
    let h = harness().await;
    h.panel.respond(
        "/ADSModule/GetDeploymentTemplates",
        StatusCode::OK,
        json!([{ "Id": 1, "Name": "Minecraft" }, { "Id": "2", "Name": "Valheim" }]),
    );

    let templates = h.provisioner.list_templates().await.unwrap();
    assert_eq!(templates.len(), 2);
    assert_eq!(templates[1].id, 2);
    assert_eq!(h.provisioner.test_connection().await.unwrap(), 2);

    let options = h.provisioner.package_options().await.unwrap();
    assert_eq!(options.templates[0].label, "Minecraft");
    assert_eq!(options.post_create_actions.len(), 6);

    h.panel
        .respond("/ADSModule/GetDeploymentTemplates", StatusCode::OK, json!([]));
    assert!(matches!(
        h.provisioner.list_templates().await,
        Err(ApiError::Catalog(_))
    ));
    assert!(h.provisioner.test_connection().await.is_err());
}

/// Delegates to the in-memory store but can fail individual writes once.
#[derive(Default)]
struct FlakyOrders {
    inner: InMemoryOrderRepository,
    fail_set_external_id: AtomicBool,
    fail_create_external_user: AtomicBool,
}

#[async_trait]
impl OrderRepository for FlakyOrders {
    async fn order(&self, id: OrderId) -> Result<Order, StoreError> {
        self.inner.order(id).await
    }

    async fn set_external_id(&self, id: OrderId, external_id: &str) -> Result<(), StoreError> {
        if self.fail_set_external_id.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Store("db down".into()));
        }
        self.inner.set_external_id(id, external_id).await
    }

    async fn external_user(&self, id: OrderId) -> Result<Option<ExternalUser>, StoreError> {
        self.inner.external_user(id).await
    }

    async fn create_external_user(
        &self,
        id: OrderId,
        user: ExternalUser,
    ) -> Result<(), StoreError> {
        if self.fail_create_external_user.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Store("db down".into()));
        }
        self.inner.create_external_user(id, user).await
    }

    async fn update_external_user_password(
        &self,
        id: OrderId,
        password: &str,
    ) -> Result<(), StoreError> {
        self.inner.update_external_user_password(id, password).await
    }
}

async fn flaky_harness() -> (StubPanel, Provisioner, Arc<FlakyOrders>, Arc<RecordingNotifier>) {
    let panel = StubPanel::start().await;
    let client = ApiClient::builder(panel.credentials())
        .session_store(SessionStore::new())
        .build();
    let orders = Arc::new(FlakyOrders::default());
    orders
        .inner
        .put_order(order(None, OrderStatus::Pending))
        .await;
    let notifier = RecordingNotifier::new();
    let provisioner = Provisioner::new(client, orders.clone(), notifier.clone());
    (panel, provisioner, orders, notifier)
}

#[tokio::test]
async fn failed_external_id_write_keeps_credentials_and_retries_with_them() {
    let (panel, provisioner, orders, notifier) = flaky_harness().await;
    orders.fail_set_external_id.store(true, Ordering::SeqCst);

    assert!(matches!(
        provisioner.create(42).await,
        Err(ProvisionError::Store(StoreError::Store(_)))
    ));
    assert!(orders.order(42).await.unwrap().external_id.is_none());
    let user = orders.external_user(42).await.unwrap().unwrap();
    assert_eq!(notifier.sent().await.len(), 1);

    let created = provisioner.create(42).await.unwrap();
    assert_eq!(created.username, user.username);
    assert!(!created.new_user);
    assert_eq!(
        orders.order(42).await.unwrap().external_id.as_deref(),
        Some("WMX42")
    );

    let deploys = panel.calls_to("/ADSModule/DeployTemplate");
    assert_eq!(deploys.len(), 2);
    assert_eq!(field(&deploys[1].body, "NewPassword"), &json!(user.password));
    assert_eq!(notifier.sent().await.len(), 1);
}

#[tokio::test]
async fn failed_external_user_write_leaves_the_order_uncreated() {
    let (panel, provisioner, orders, notifier) = flaky_harness().await;
    orders.fail_create_external_user.store(true, Ordering::SeqCst);

    assert!(provisioner.create(42).await.is_err());
    assert!(orders.order(42).await.unwrap().external_id.is_none());
    assert!(orders.external_user(42).await.unwrap().is_none());
    assert!(notifier.sent().await.is_empty());

    let created = provisioner.create(42).await.unwrap();
    assert!(created.new_user);
    assert_eq!(panel.calls_to("/ADSModule/DeployTemplate").len(), 2);
    assert_eq!(notifier.sent().await.len(), 1);
}

#[tokio::test]
async fn change_password_is_refused_for_terminated_orders() {
    let h = harness().await;
    h.orders
        .put_order(order(Some("WMX42"), OrderStatus::Terminated))
        .await;
    h.orders
        .create_external_user(
            42,
            ExternalUser {
                username: "steve42".into(),
                password: "old".into(),
            },
        )
        .await
        .unwrap();

    assert!(h.provisioner.change_password(42, "n3w-pass").await.is_err());
    assert!(h.panel.calls_to("/Core/ResetUserPassword").is_empty());
    let user = h.orders.external_user(42).await.unwrap().unwrap();
    assert_eq!(user.password, "old");
}
