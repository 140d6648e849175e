use crate::errors::Error;
use crate::model::TelemetryKind;
use crate::relay::Relay;
use crate::ws::ws_handler;
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct AppState {
    pub relay: Arc<Mutex<Relay>>,
    started_at: Instant,
}

impl AppState {
    pub fn new(relay: Relay) -> Self {
        Self {
            relay: Arc::new(Mutex::new(relay)),
            started_at: Instant::now(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRequest {
    device_id: Option<String>,
    command: Option<String>,
    #[serde(default)]
    params: String,
}

#[derive(Debug, Deserialize)]
pub struct SmsRequest {
    to: Option<String>,
    message: Option<String>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .route("/api/devices", get(list_devices))
        .route("/api/devices/:id", get(get_device))
        .route("/api/devices/:id/commands", get(list_commands))
        .route(
            "/api/devices/:id/sms",
            get(list_sms).post(send_sms).delete(clear_sms),
        )
        .route(
            "/api/devices/:id/:kind",
            get(list_telemetry).delete(clear_telemetry),
        )
        .route("/api/command", post(send_command))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let relay = state.relay.lock().await;
    Json(json!({
        "success": true,
        "uptimeSecs": state.started_at.elapsed().as_secs(),
        "devices": relay.device_count(),
        "online": relay.online_count(),
    }))
}

async fn list_devices(State(state): State<AppState>) -> Json<Value> {
    let relay = state.relay.lock().await;
    let devices = relay.devices();
    Json(json!({
        "success": true,
        "total": devices.len(),
        "online": devices.iter().filter(|d| d.device.online).count(),
        "devices": devices,
    }))
}

async fn get_device(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let summary = state.relay.lock().await.device(&id)?;
    Ok(Json(json!({
        "success": true,
        "device": summary.device,
        "stats": summary.stats,
    })))
}

async fn list_telemetry(
    State(state): State<AppState>,
    Path((id, kind)): Path<(String, String)>,
    query: Result<Query<LimitQuery>, QueryRejection>,
) -> Result<Json<Value>, AppError> {
    let Query(query) = query?;
    telemetry_response(&state, &id, kind.parse()?, query.limit).await
}

async fn list_sms(
    State(state): State<AppState>,
    Path(id): Path<String>,
    query: Result<Query<LimitQuery>, QueryRejection>,
) -> Result<Json<Value>, AppError> {
    let Query(query) = query?;
    telemetry_response(&state, &id, TelemetryKind::Sms, query.limit).await
}

async fn telemetry_response(
    state: &AppState,
    id: &str,
    kind: TelemetryKind,
    limit: Option<usize>,
) -> Result<Json<Value>, AppError> {
    let data = state.relay.lock().await.telemetry(id, kind, limit);
    Ok(Json(json!({
        "success": true,
        "count": data.len(),
        "data": data,
    })))
}

async fn clear_telemetry(
    State(state): State<AppState>,
    Path((id, kind)): Path<(String, String)>,
) -> Result<Json<Value>, AppError> {
    clear_response(&state, &id, kind.parse()?).await
}

async fn clear_sms(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    clear_response(&state, &id, TelemetryKind::Sms).await
}

async fn clear_response(
    state: &AppState,
    id: &str,
    kind: TelemetryKind,
) -> Result<Json<Value>, AppError> {
    state.relay.lock().await.clear(id, kind)?;
    Ok(Json(json!({
        "success": true,
        "message": format!("Cleared {}", kind),
    })))
}

async fn list_commands(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let relay = state.relay.lock().await;
    relay.device(&id)?;
    Ok(Json(json!({
        "success": true,
        "commands": relay.commands(&id),
    })))
}

async fn send_command(
    State(state): State<AppState>,
    request: Result<Json<CommandRequest>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let Json(request) = request?;
    let (device_id, command) = match (request.device_id, request.command) {
        (Some(device_id), Some(command))
            if !device_id.trim().is_empty() && !command.trim().is_empty() =>
        {
            (device_id, command)
        }
        _ => {
            return Err(Error::Validation(
                "Both 'deviceId' and 'command' are required".to_string(),
            )
            .into())
        }
    };
    debug!(device_id = %device_id, command = %command, "Command requested");
    let record = state
        .relay
        .lock()
        .await
        .dispatch(&device_id, &command, &request.params)?;
    Ok(Json(json!({
        "success": true,
        "message": "Command sent",
        "commandId": record.id,
    })))
}

async fn send_sms(
    State(state): State<AppState>,
    Path(id): Path<String>,
    request: Result<Json<SmsRequest>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let Json(request) = request?;
    let record = state.relay.lock().await.send_sms(
        &id,
        request.to.as_deref(),
        request.message.as_deref(),
    )?;
    Ok(Json(json!({
        "success": true,
        "message": "SMS command sent",
        "commandId": record.id,
    })))
}

/// Every failure, including malformed requests, answers `{success: false, error}`
pub enum AppError {
    Relay(Error),
    BadRequest(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Relay(err) => {
                let status = match err {
                    Error::NotFound => StatusCode::NOT_FOUND,
                    Error::Offline => StatusCode::CONFLICT,
                    Error::Validation(_) | Error::UnknownKind(_) | Error::Parse(_) => {
                        StatusCode::BAD_REQUEST
                    }
                };
                (status, err.to_string())
            }
            AppError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
        };
        debug!("API error: {}", message);
        (
            status,
            Json(json!({ "success": false, "error": message })),
        )
            .into_response()
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        AppError::Relay(err)
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{DeviceMetadata, Outbound};
    use axum::body::{self, Body};
    use axum::http::Request;
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(value) => {
                builder = builder.header("content-type", "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        send(app, builder.body(body).unwrap()).await
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    struct Harness {
        app: Router,
        state: AppState,
        id: String,
        rx: mpsc::UnboundedReceiver<String>,
    }

    async fn harness() -> Harness {
        let state = AppState::new(Relay::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let id = state.relay.lock().await.connect(
            DeviceMetadata {
                model: Some("Pixel7".to_string()),
                ..Default::default()
            },
            Outbound::new(tx),
        );
        Harness {
            app: create_router(state.clone()),
            state,
            id,
            rx,
        }
    }

    #[test]
    fn test_list_devices() {
        tokio_test::block_on(async {
            let h = harness().await;
            h.state
                .relay
                .lock()
                .await
                .ingest(&h.id, r#"{"type":"sms","data":{"sender":"a","body":"b"}}"#)
                .unwrap();

            let (status, body) = call(&h.app, "GET", "/api/devices", None).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["success"], true);
            assert_eq!(body["total"], 1);
            assert_eq!(body["online"], 1);
            assert_eq!(body["devices"][0]["model"], "Pixel7");
            assert_eq!(body["devices"][0]["stats"]["sms"], 1);
        });
    }

    #[test]
    fn test_get_unknown_device() {
        tokio_test::block_on(async {
            let h = harness().await;
            let (status, body) = call(&h.app, "GET", "/api/devices/nope", None).await;
            assert_eq!(status, StatusCode::NOT_FOUND);
            assert_eq!(body["success"], false);
            assert_eq!(body["error"], "Device not found");
        });
    }

    #[test]
    fn test_list_telemetry_with_limit() {
        tokio_test::block_on(async {
            let h = harness().await;
            {
                let mut relay = h.state.relay.lock().await;
                for i in 0..5 {
                    let payload = format!(
                        r#"{{"type":"location","data":{{"lat":{},"lng":0}}}}"#,
                        i
                    );
                    relay.ingest(&h.id, &payload).unwrap();
                }
            }

            let uri = format!("/api/devices/{}/locations?limit=2", h.id);
            let (status, body) = call(&h.app, "GET", &uri, None).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["count"], 2);
            assert_eq!(body["data"][0]["lat"], 4.0);

            let uri = format!("/api/devices/{}/contacts", h.id);
            let (status, body) = call(&h.app, "GET", &uri, None).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["success"], false);
        });
    }

    #[test]
    fn test_command_round_trip() {
        tokio_test::block_on(async {
            let mut h = harness().await;
            let request = json!({ "deviceId": h.id, "command": "get_sms", "params": "" });

            let (status, body) = call(&h.app, "POST", "/api/command", Some(request)).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["success"], true);

            let frame: Value = serde_json::from_str(&h.rx.try_recv().unwrap()).unwrap();
            assert_eq!(frame["cmd"], "get_sms");
            assert_eq!(frame["id"], body["commandId"]);

            let uri = format!("/api/devices/{}/commands", h.id);
            let (_, body) = call(&h.app, "GET", &uri, None).await;
            assert_eq!(body["commands"][0]["status"], "sent");
        });
    }

    #[test]
    fn test_command_to_offline_device() {
        tokio_test::block_on(async {
            let h = harness().await;
            h.state.relay.lock().await.disconnect(&h.id);

            let request = json!({ "deviceId": h.id, "command": "get_sms" });
            let (status, body) = call(&h.app, "POST", "/api/command", Some(request)).await;
            assert_eq!(status, StatusCode::CONFLICT);
            assert_eq!(body, json!({ "success": false, "error": "Offline" }));
        });
    }

    #[test]
    fn test_send_sms_validation() {
        tokio_test::block_on(async {
            let mut h = harness().await;
            let uri = format!("/api/devices/{}/sms", h.id);

            let (status, body) = call(&h.app, "POST", &uri, Some(json!({ "to": "+1" }))).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["success"], false);
            assert!(h.rx.try_recv().is_err());

            let request = json!({ "to": "+15550100", "message": "hi" });
            let (status, _) = call(&h.app, "POST", &uri, Some(request)).await;
            assert_eq!(status, StatusCode::OK);
            let frame: Value = serde_json::from_str(&h.rx.try_recv().unwrap()).unwrap();
            assert_eq!(frame["params"], "+15550100:hi");
        });
    }

    #[test]
    fn test_clear_telemetry() {
        tokio_test::block_on(async {
            let h = harness().await;
            {
                let mut relay = h.state.relay.lock().await;
                relay
                    .ingest(&h.id, r#"{"type":"sms","data":{"sender":"a","body":"b"}}"#)
                    .unwrap();
                relay
                    .ingest(&h.id, r#"{"type":"location","data":{"lat":1,"lng":2}}"#)
                    .unwrap();
            }

            let uri = format!("/api/devices/{}/sms", h.id);
            let (status, body) = call(&h.app, "DELETE", &uri, None).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["success"], true);

            let uri = format!("/api/devices/{}", h.id);
            let (_, body) = call(&h.app, "GET", &uri, None).await;
            assert_eq!(body["stats"]["sms"], 0);
            assert_eq!(body["stats"]["locations"], 1);
        });
    }

    #[test]
    fn test_command_missing_device_id() {
        tokio_test::block_on(async {
            let mut h = harness().await;
            let request = json!({ "command": "get_sms" });

            let (status, body) = call(&h.app, "POST", "/api/command", Some(request)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["success"], false);
            assert!(body["error"].as_str().unwrap().contains("deviceId"));
            assert!(h.rx.try_recv().is_err());
        });
    }

    #[test]
    fn test_command_without_content_type() {
        tokio_test::block_on(async {
            let h = harness().await;
            let payload = json!({ "deviceId": h.id, "command": "get_sms" });
            let request = Request::builder()
                .method("POST")
                .uri("/api/command")
                .body(Body::from(payload.to_string()))
                .unwrap();

            let (status, body) = send(&h.app, request).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["success"], false);
            assert!(body["error"].is_string());
            assert!(h.state.relay.lock().await.commands(&h.id).is_empty());
        });
    }

    #[test]
    fn test_malformed_sms_body() {
        tokio_test::block_on(async {
            let h = harness().await;
            let request = Request::builder()
                .method("POST")
                .uri(format!("/api/devices/{}/sms", h.id))
                .header("content-type", "application/json")
                .body(Body::from("{not json"))
                .unwrap();

            let (status, body) = send(&h.app, request).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["success"], false);
        });
    }

    #[test]
    fn test_non_numeric_limit() {
        tokio_test::block_on(async {
            let h = harness().await;

            for kind in ["sms", "locations"] {
                let uri = format!("/api/devices/{}/{}?limit=abc", h.id, kind);
                let (status, body) = call(&h.app, "GET", &uri, None).await;
                assert_eq!(status, StatusCode::BAD_REQUEST);
                assert_eq!(body["success"], false);
                assert!(body["error"].is_string());
            }
        });
    }
}
