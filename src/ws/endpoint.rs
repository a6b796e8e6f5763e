//! Websocket endpoint.
//!
//! `GET /` upgrades to a websocket from any origin. Query parameters pick
//! the channels: any parameter named after a channel with a non-empty value
//! subscribes the client. Clients are write-only sinks; the read pump only
//! watches for disconnects.

use std::collections::{HashMap, HashSet};

use axum::{
    extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
    extract::{Query, State},
    response::Response,
    routing::get,
    Router,
};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tracing::warn;

use super::{HubHandle, CHANNELS};
use crate::models::Message;

/// Outbound buffer sized for snapshot bursts on fresh connections.
const WRITE_BUFFER_SIZE: usize = 512 * 1024;

#[derive(Clone)]
pub struct WsState {
    hub: HubHandle,
}

/// Build the websocket router around a hub handle.
pub fn router(hub: HubHandle) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(WsState { hub })
}

/// Subscription set from the upgrade request's query string.
pub fn subscriptions_from_query(params: &HashMap<String, String>) -> HashSet<String> {
    CHANNELS
        .iter()
        .filter(|channel| params.get(**channel).map_or(false, |v| !v.is_empty()))
        .map(|channel| channel.to_string())
        .collect()
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<WsState>,
) -> Response {
    let subscriptions = subscriptions_from_query(&params);
    ws.write_buffer_size(WRITE_BUFFER_SIZE)
        .on_upgrade(move |socket| serve_client(socket, state.hub, subscriptions))
}

async fn serve_client(socket: WebSocket, hub: HubHandle, subscriptions: HashSet<String>) {
    let (client, queue_rx) = hub.new_client(subscriptions);
    let client_id = client.id;
    hub.register(client).await;

    let (sink, stream) = socket.split();
    let mut write = tokio::spawn(write_pump(sink, queue_rx));
    let mut read = tokio::spawn(read_pump(stream));

    // Either pump ending tears the client down; the hub closes the queue.
    tokio::select! {
        _ = &mut write => read.abort(),
        _ = &mut read => write.abort(),
    }
    hub.unregister(client_id).await;
}

/// Serialize queued messages onto the socket. Ends when the hub closes the
/// queue (eviction or unregister) or the socket rejects a write.
async fn write_pump(
    mut sink: SplitSink<WebSocket, WsMessage>,
    mut queue_rx: mpsc::Receiver<Arc<Message>>,
) {
    while let Some(message) = queue_rx.recv().await {
        let text = match serde_json::to_string(message.as_ref()) {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "failed to serialize outbound message");
                continue;
            }
        };
        if sink.send(WsMessage::Text(text)).await.is_err() {
            break;
        }
    }
    let _ = sink.close().await;
}

/// Discard inbound frames, returning when the peer goes away.
async fn read_pump(mut stream: SplitStream<WebSocket>) {
    while let Some(Ok(frame)) = stream.next().await {
        match frame {
            WsMessage::Close(_) => break,
            // Clients are write-only sinks; everything else is dropped.
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn non_empty_values_enable_channels() {
        let subscriptions = subscriptions_from_query(&params(&[("market", "1")]));
        assert!(subscriptions.contains("market"));
        assert!(!subscriptions.contains("contract"));
    }

    #[test]
    fn empty_values_and_unknown_channels_are_ignored() {
        let subscriptions =
            subscriptions_from_query(&params(&[("market", ""), ("orders", "1"), ("contract", "yes")]));
        assert!(!subscriptions.contains("market"));
        assert!(!subscriptions.contains("orders"));
        assert!(subscriptions.contains("contract"));
    }
}
