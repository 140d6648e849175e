use crate::registry::{DeviceMetadata, Outbound};
use crate::rest::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use serde_json::json;
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Device-facing endpoint. Handshake metadata comes from request headers.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let metadata = metadata_from_headers(&headers, peer.map(|ConnectInfo(addr)| addr));
    ws.on_upgrade(move |socket| handle_socket(socket, state, metadata))
}

fn metadata_from_headers(headers: &HeaderMap, peer: Option<SocketAddr>) -> DeviceMetadata {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    };

    let forwarded = header("x-forwarded-for")
        .and_then(|list| list.split(',').next().map(|ip| ip.trim().to_string()));

    DeviceMetadata {
        model: header("model"),
        version: header("version"),
        battery: header("battery"),
        ip: forwarded.or_else(|| peer.map(|addr| addr.ip().to_string())),
    }
}

async fn handle_socket(mut socket: WebSocket, state: AppState, metadata: DeviceMetadata) {
    // Unbounded: commands are fire-and-forget, so frames queue until the
    // socket drains them or the session ends and the receiver is dropped.
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let device_id = state.relay.lock().await.connect(metadata, Outbound::new(tx));

    let welcome = json!({ "type": "welcome", "id": device_id }).to_string();
    if socket.send(Message::Text(welcome)).await.is_err() {
        state.relay.lock().await.disconnect(&device_id);
        return;
    }

    loop {
        tokio::select! {
            outgoing = rx.recv() => {
                let Some(frame) = outgoing else { break };
                if let Err(e) = socket.send(Message::Text(frame)).await {
                    warn!(device_id = %device_id, "Failed to write to device: {}", e);
                    break;
                }
            }

            incoming = socket.recv() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                        Ok(text) => text,
                        Err(_) => {
                            debug!(device_id = %device_id, "Ignoring non-UTF-8 binary frame");
                            continue;
                        }
                    },
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        warn!(device_id = %device_id, "WebSocket error: {}", e);
                        break;
                    }
                };

                // Parse failures are logged by the router and dropped
                let routed = state.relay.lock().await.ingest(&device_id, &text);
                if let Ok(outcome) = routed {
                    trace!(device_id = %device_id, ?outcome, "Message routed");
                }
            }
        }
    }

    state.relay.lock().await.disconnect(&device_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_metadata_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("model", HeaderValue::from_static("Pixel7"));
        headers.insert("battery", HeaderValue::from_static("64%"));
        let peer: SocketAddr = "10.0.0.7:51000".parse().unwrap();

        let metadata = metadata_from_headers(&headers, Some(peer));
        assert_eq!(metadata.model.as_deref(), Some("Pixel7"));
        assert_eq!(metadata.battery.as_deref(), Some("64%"));
        assert_eq!(metadata.version, None);
        assert_eq!(metadata.ip.as_deref(), Some("10.0.0.7"));
    }

    #[test]
    fn test_forwarded_for_wins_over_peer() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.9, 10.0.0.1"),
        );
        let peer: SocketAddr = "10.0.0.1:443".parse().unwrap();

        let metadata = metadata_from_headers(&headers, Some(peer));
        assert_eq!(metadata.ip.as_deref(), Some("203.0.113.9"));
    }

    #[test]
    fn test_blank_headers_use_defaults() {
        let mut headers = HeaderMap::new();
        headers.insert("model", HeaderValue::from_static("  "));

        let metadata = metadata_from_headers(&headers, None);
        assert_eq!(metadata.model, None);
        assert_eq!(metadata.ip, None);
    }
}
