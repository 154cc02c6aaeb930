use amp_sdk::{ApiError, Template};
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::host::{Order, OrderId, OrderStatus, StoreError};
use crate::metrics;
use crate::provisioner::{
    CreatedInstance, LifecycleState, PackageOptions, PasswordChangeError, ProvisionError,
    SelfTestError,
};
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .route("/templates", get(templates))
        .route("/package-options", get(package_options))
        .route("/self-test", post(self_test))
        .route("/callback", post(callback))
        .route("/orders/:id", put(put_order))
        .route("/orders/:id/create", post(create))
        .route("/orders/:id/suspend", post(suspend))
        .route("/orders/:id/unsuspend", post(unsuspend))
        .route("/orders/:id/terminate", post(terminate))
        .route("/orders/:id/password", post(change_password))
        .with_state(state)
}

#[derive(Debug)]
pub enum RouteError {
    Provision(ProvisionError),
    Api(ApiError),
    Password(PasswordChangeError),
    SelfTest(SelfTestError),
    BadRequest(String),
}

impl From<ProvisionError> for RouteError {
    fn from(err: ProvisionError) -> Self {
        RouteError::Provision(err)
    }
}

impl From<ApiError> for RouteError {
    fn from(err: ApiError) -> Self {
        RouteError::Api(err)
    }
}

impl From<StoreError> for RouteError {
    fn from(err: StoreError) -> Self {
        RouteError::Provision(ProvisionError::Store(err))
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

fn api_status(err: &ApiError) -> StatusCode {
    match err {
        ApiError::Permission { .. } => StatusCode::FORBIDDEN,
        ApiError::RemoteServer { .. } => StatusCode::BAD_GATEWAY,
        ApiError::Connectivity(_) => StatusCode::SERVICE_UNAVAILABLE,
        ApiError::Auth(_) | ApiError::Catalog(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl RouteError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            RouteError::Api(err) => (api_status(err), err.kind(), err.to_string()),
            RouteError::Provision(ProvisionError::Api(err)) => {
                (api_status(err), err.kind(), err.to_string())
            }
            RouteError::Provision(err @ ProvisionError::Store(StoreError::OrderNotFound(_))) => {
                (StatusCode::NOT_FOUND, "not_found", err.to_string())
            }
            RouteError::Provision(
                err @ ProvisionError::Store(StoreError::ExternalUserMissing(_)),
            ) => (StatusCode::NOT_FOUND, "not_found", err.to_string()),
            RouteError::Provision(err @ ProvisionError::Store(StoreError::Store(_))) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "store", err.to_string())
            }
            RouteError::Provision(err @ ProvisionError::InvalidState { .. }) => {
                (StatusCode::CONFLICT, "invalid_state", err.to_string())
            }
            RouteError::Provision(err @ ProvisionError::MissingTemplate(_)) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "missing_template",
                err.to_string(),
            ),
            RouteError::Password(err) => {
                (StatusCode::BAD_GATEWAY, "password_change_failed", err.to_string())
            }
            RouteError::SelfTest(err) => {
                (StatusCode::BAD_GATEWAY, "self_test_failed", err.to_string())
            }
            RouteError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone()),
        }
    }
}

impl IntoResponse for RouteError {
    fn into_response(self) -> Response {
        let (status, error, message) = self.parts();
        if status.is_server_error() {
            warn!(status = status.as_u16(), error, %message, "request failed");
        }
        (status, Json(ErrorBody { error, message })).into_response()
    }
}

type RouteResult<T> = Result<Json<T>, RouteError>;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    panel: String,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: state.uptime_secs(),
        panel: state.provisioner().client().credentials().hostname().to_string(),
    })
}

async fn metrics_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::gather(),
    )
}

async fn templates(State(state): State<AppState>) -> RouteResult<Vec<Template>> {
    Ok(Json(state.provisioner().list_templates().await?))
}

async fn package_options(State(state): State<AppState>) -> RouteResult<PackageOptions> {
    Ok(Json(state.provisioner().package_options().await?))
}

#[derive(Serialize)]
struct SelfTestResponse {
    ok: bool,
    templates: usize,
}

async fn self_test(State(state): State<AppState>) -> RouteResult<SelfTestResponse> {
    let templates = state
        .provisioner()
        .test_connection()
        .await
        .map_err(RouteError::SelfTest)?;
    Ok(Json(SelfTestResponse {
        ok: true,
        templates,
    }))
}

async fn callback(Json(payload): Json<Value>) -> Json<Value> {
    metrics::CALLBACKS.inc();
    info!(payload = %payload, "amp callback received");
    Json(json!({ "success": true }))
}

async fn put_order(
    State(state): State<AppState>,
    Path(id): Path<OrderId>,
    Json(order): Json<Order>,
) -> Result<StatusCode, RouteError> {
    if order.id != id {
        return Err(RouteError::BadRequest(format!(
            "order id {} does not match path id {id}",
            order.id
        )));
    }
    state.orders().put_order(order).await;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
struct LifecycleResponse {
    order_id: OrderId,
    state: LifecycleState,
}

async fn record_state(
    state: &AppState,
    order_id: OrderId,
    lifecycle: LifecycleState,
) -> RouteResult<LifecycleResponse> {
    state
        .orders()
        .set_status(order_id, OrderStatus::from(lifecycle))
        .await?;
    Ok(Json(LifecycleResponse {
        order_id,
        state: lifecycle,
    }))
}

async fn create(
    State(state): State<AppState>,
    Path(id): Path<OrderId>,
) -> RouteResult<CreatedInstance> {
    let created = state.provisioner().create(id).await?;
    state.orders().set_status(id, OrderStatus::Active).await?;
    Ok(Json(created))
}

async fn suspend(
    State(state): State<AppState>,
    Path(id): Path<OrderId>,
) -> RouteResult<LifecycleResponse> {
    let lifecycle = state.provisioner().suspend(id).await?;
    record_state(&state, id, lifecycle).await
}

async fn unsuspend(
    State(state): State<AppState>,
    Path(id): Path<OrderId>,
) -> RouteResult<LifecycleResponse> {
    let lifecycle = state.provisioner().unsuspend(id).await?;
    record_state(&state, id, lifecycle).await
}

async fn terminate(
    State(state): State<AppState>,
    Path(id): Path<OrderId>,
) -> RouteResult<LifecycleResponse> {
    let lifecycle = state.provisioner().terminate(id).await?;
    record_state(&state, id, lifecycle).await
}

#[derive(Deserialize)]
struct PasswordRequest {
    password: String,
}

#[derive(Serialize)]
struct PasswordResponse {
    changed: bool,
}

async fn change_password(
    State(state): State<AppState>,
    Path(id): Path<OrderId>,
    Json(body): Json<PasswordRequest>,
) -> RouteResult<PasswordResponse> {
    if body.password.is_empty() {
        return Err(RouteError::BadRequest("password must not be empty".into()));
    }
    state
        .provisioner()
        .change_password(id, &body.password)
        .await
        .map_err(RouteError::Password)?;
    Ok(Json(PasswordResponse { changed: true }))
}
