//! warp routes for probes, session administration and workflow webhooks

use crate::error::BridgeError;
use crate::messenger::OutboundMessenger;
use crate::observability::metrics;
use crate::protocol::{ApiResponse, FlowiseResponse, N8nResponse, SendReceipt, WorkflowType};
use crate::session::{ConnectionLifecycleManager, ConnectionState};
use crate::store::{StoreError, WorkflowConfigStore};
use crate::transport::Transport;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use warp::http::StatusCode;
use warp::reply::{Json, WithStatus};
use warp::{Filter, Rejection, Reply};

type JsonReply = WithStatus<Json>;

/// Everything the handlers need
pub struct ApiState<T: Transport> {
    service_id: String,
    lifecycle: Arc<ConnectionLifecycleManager<T>>,
    messenger: OutboundMessenger<T>,
    store: Arc<dyn WorkflowConfigStore>,
    started_at: Instant,
}

impl<T> ApiState<T>
where
    T: Transport + 'static,
{
    pub fn new(
        service_id: impl Into<String>,
        lifecycle: Arc<ConnectionLifecycleManager<T>>,
        store: Arc<dyn WorkflowConfigStore>,
    ) -> Self {
        let messenger = OutboundMessenger::new(Arc::clone(&lifecycle));
        Self {
            service_id: service_id.into(),
            lifecycle,
            messenger,
            store,
            started_at: Instant::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthBody {
    pub service_id: String,
    pub state: ConnectionState,
    pub connected: bool,
    pub uptime_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusBody {
    pub state: ConnectionState,
    pub connected: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QrBody {
    pub qr_code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SendRequest {
    pub phone: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowUpdateRequest {
    pub workflow_type: String,
}

fn reply<B: Serialize>(status: StatusCode, body: &ApiResponse<B>) -> JsonReply {
    warp::reply::with_status(warp::reply::json(body), status)
}

fn ok<B: Serialize>(data: B) -> JsonReply {
    reply(StatusCode::OK, &ApiResponse::ok(data))
}

fn ok_message(message: &str) -> JsonReply {
    reply(StatusCode::OK, &ApiResponse::<()>::ok_message(message))
}

fn fail(status: StatusCode, message: impl Into<String>) -> JsonReply {
    reply(status, &ApiResponse::<()>::error(message))
}

fn bridge_error(err: &BridgeError) -> JsonReply {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    fail(status, err.public_message())
}

fn store_error(err: &StoreError) -> JsonReply {
    match err {
        StoreError::NoActiveConfig => fail(StatusCode::NOT_FOUND, err.to_string()),
        _ => {
            error!(error = %err, "Workflow config store failed");
            fail(
                StatusCode::INTERNAL_SERVER_ERROR,
                crate::error::sanitize_error_message(&err.to_string()),
            )
        }
    }
}

async fn health<T: Transport + 'static>(
    state: Arc<ApiState<T>>,
) -> Result<JsonReply, Infallible> {
    let session = state.lifecycle.snapshot().await;
    Ok(ok(HealthBody {
        service_id: state.service_id.clone(),
        state: session.state(),
        connected: session.is_connected(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
    }))
}

async fn ready<T: Transport + 'static>(state: Arc<ApiState<T>>) -> Result<JsonReply, Infallible> {
    let session = state.lifecycle.snapshot().await;
    let body = StatusBody {
        state: session.state(),
        connected: session.is_connected(),
    };
    if session.is_connected() {
        Ok(ok(body))
    } else {
        Ok(reply(
            StatusCode::SERVICE_UNAVAILABLE,
            &ApiResponse {
                success: false,
                message: None,
                data: Some(body),
                error: Some("WhatsApp client not connected".to_string()),
            },
        ))
    }
}

async fn status<T: Transport + 'static>(state: Arc<ApiState<T>>) -> Result<JsonReply, Infallible> {
    let session = state.lifecycle.snapshot().await;
    Ok(ok(StatusBody {
        state: session.state(),
        connected: session.is_connected(),
    }))
}

async fn qr<T: Transport + 'static>(state: Arc<ApiState<T>>) -> Result<JsonReply, Infallible> {
    match state.lifecycle.get_qr_code().await {
        Ok(qr_code) => Ok(ok(QrBody { qr_code })),
        Err(e) => Ok(bridge_error(&e)),
    }
}

async fn logout<T: Transport + 'static>(state: Arc<ApiState<T>>) -> Result<JsonReply, Infallible> {
    match state.lifecycle.logout().await {
        Ok(()) => Ok(ok_message("Logged out successfully")),
        Err(e) => Ok(bridge_error(&e)),
    }
}

async fn send<T: Transport + 'static>(
    state: Arc<ApiState<T>>,
    request: SendRequest,
) -> Result<JsonReply, Infallible> {
    if request.message.trim().is_empty() {
        return Ok(fail(StatusCode::BAD_REQUEST, "Message cannot be empty"));
    }
    match state.messenger.send(&request.phone, &request.message).await {
        Ok(receipt) => Ok(ok::<SendReceipt>(receipt)),
        Err(e) => {
            warn!(phone = %request.phone, error = %e, "Admin send failed");
            Ok(bridge_error(&e))
        }
    }
}

/// Deliver an asynchronous workflow reply to the user
async fn deliver_reply<T: Transport + 'static>(
    state: &ApiState<T>,
    backend: WorkflowType,
    phone: &str,
    success: bool,
    text: &str,
    failure: Option<&str>,
) -> JsonReply {
    if !success {
        error!(
            backend = %backend,
            phone = %phone,
            error = failure.unwrap_or("unknown error"),
            "Workflow reported failure"
        );
        state.messenger.send_error_notice(phone).await;
        return ok_message("Error notice sent");
    }

    if text.trim().is_empty() {
        return fail(StatusCode::BAD_REQUEST, "Response text cannot be empty");
    }

    match state.messenger.send(phone, text).await {
        Ok(_) => {
            info!(backend = %backend, phone = %phone, "Delivered workflow reply");
            ok_message("Response delivered")
        }
        Err(e) => {
            error!(
                backend = %backend,
                phone = %phone,
                error = %e,
                "Failed to deliver workflow reply"
            );
            bridge_error(&e)
        }
    }
}

async fn n8n_webhook<T: Transport + 'static>(
    state: Arc<ApiState<T>>,
    response: N8nResponse,
) -> Result<JsonReply, Infallible> {
    Ok(deliver_reply(
        &state,
        WorkflowType::N8n,
        &response.phone,
        response.success,
        &response.response,
        response.error.as_deref(),
    )
    .await)
}

async fn flowise_webhook<T: Transport + 'static>(
    state: Arc<ApiState<T>>,
    response: FlowiseResponse,
) -> Result<JsonReply, Infallible> {
    Ok(deliver_reply(
        &state,
        WorkflowType::Flowise,
        &response.phone,
        response.success,
        &response.text,
        response.error.as_deref(),
    )
    .await)
}

async fn get_workflow_config<T: Transport + 'static>(
    state: Arc<ApiState<T>>,
) -> Result<JsonReply, Infallible> {
    match state.store.get_active_config().await {
        Ok(config) => Ok(ok(config)),
        Err(e) => Ok(store_error(&e)),
    }
}

async fn put_workflow_config<T: Transport + 'static>(
    state: Arc<ApiState<T>>,
    request: WorkflowUpdateRequest,
) -> Result<JsonReply, Infallible> {
    let Some(workflow_type) = WorkflowType::parse(&request.workflow_type) else {
        return Ok(fail(
            StatusCode::BAD_REQUEST,
            "Invalid workflow type. Must be 'n8n' or 'flowise'",
        ));
    };

    match state.store.set_active_workflow_type(workflow_type).await {
        Ok(config) => {
            info!(workflow_type = %workflow_type, "Active workflow changed");
            Ok(ok(config))
        }
        Err(e) => Ok(store_error(&e)),
    }
}

/// Map warp rejections onto the response envelope
async fn handle_rejection(err: Rejection) -> Result<JsonReply, Infallible> {
    if err.is_not_found() {
        return Ok(fail(StatusCode::NOT_FOUND, "Not found"));
    }
    if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        return Ok(fail(
            StatusCode::BAD_REQUEST,
            format!("Invalid request body: {e}"),
        ));
    }
    if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        return Ok(fail(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed"));
    }
    if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        return Ok(fail(StatusCode::PAYLOAD_TOO_LARGE, "Payload too large"));
    }
    error!(rejection = ?err, "Unhandled rejection");
    Ok(fail(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error"))
}

fn with_state<T: Transport + 'static>(
    state: Arc<ApiState<T>>,
) -> impl Filter<Extract = (Arc<ApiState<T>>,), Error = Infallible> + Clone {
    warp::any().map(move || Arc::clone(&state))
}

fn json_body<B>() -> impl Filter<Extract = (B,), Error = Rejection> + Clone
where
    B: serde::de::DeserializeOwned + Send,
{
    warp::body::content_length_limit(64 * 1024).and(warp::body::json())
}

/// Every route, with rejection handling
pub fn routes<T: Transport + 'static>(
    state: Arc<ApiState<T>>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let health = warp::path!("health")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(health::<T>);
    let ready = warp::path!("ready")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(ready::<T>);
    let live = warp::path!("live")
        .and(warp::get())
        .map(|| ok_message("alive"));
    let metrics_route = warp::path!("metrics")
        .and(warp::get())
        .map(|| ok(metrics().get_metrics()));

    let status = warp::path!("api" / "whatsapp" / "status")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(status::<T>);
    let qr = warp::path!("api" / "whatsapp" / "qr")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(qr::<T>);
    let logout = warp::path!("api" / "whatsapp" / "logout")
        .and(warp::post())
        .and(with_state(state.clone()))
        .and_then(logout::<T>);
    let send = warp::path!("api" / "whatsapp" / "send")
        .and(warp::post())
        .and(with_state(state.clone()))
        .and(json_body::<SendRequest>())
        .and_then(send::<T>);

    let n8n = warp::path!("api" / "webhook" / "n8n")
        .and(warp::post())
        .and(with_state(state.clone()))
        .and(json_body::<N8nResponse>())
        .and_then(n8n_webhook::<T>);
    let flowise = warp::path!("api" / "webhook" / "flowise")
        .and(warp::post())
        .and(with_state(state.clone()))
        .and(json_body::<FlowiseResponse>())
        .and_then(flowise_webhook::<T>);

    let get_config = warp::path!("api" / "workflow-config")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(get_workflow_config::<T>);
    let put_config = warp::path!("api" / "workflow-config")
        .and(warp::put())
        .and(with_state(state))
        .and(json_body::<WorkflowUpdateRequest>())
        .and_then(put_workflow_config::<T>);

    health
        .or(ready)
        .or(live)
        .or(metrics_route)
        .or(status)
        .or(qr)
        .or(logout)
        .or(send)
        .or(n8n)
        .or(flowise)
        .or(get_config)
        .or(put_config)
        .recover(handle_rejection)
        .with(warp::cors().allow_any_origin())
}

/// Serve the API until `shutdown` is cancelled
pub async fn serve<T: Transport + 'static>(
    state: Arc<ApiState<T>>,
    addr: SocketAddr,
    shutdown: CancellationToken,
) -> Result<(), warp::Error> {
    let (bound, server) = warp::serve(routes(state)).try_bind_with_graceful_shutdown(
        addr,
        async move { shutdown.cancelled().await },
    )?;
    info!(address = %bound, "HTTP API listening");
    server.await;
    info!("HTTP API stopped");
    Ok(())
}
