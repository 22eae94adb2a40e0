//! WebSocket bridge between one browser page and the viewport session.
//!
//! Inbound text frames are [`ClientMessage`]s; outbound frames are the
//! session's pub/sub envelopes plus direct replies to this connection.

use std::sync::Arc;

use analytics::aggregate::{CellBoundary, cell_boundaries};
use analytics::context::EngineContext;
use analytics::session::SessionHandle;
use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use spatial::cell::CellId;
use streaming::protocol::ClientMessage;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

/// Replies addressed to a single connection.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Hello {
        session_id: String,
        server_version: String,
        channel: String,
        component_id: String,
    },
    Boundaries {
        cells: Vec<CellBoundary>,
    },
    Pong {
        seq: u64,
    },
    Error {
        code: String,
        message: String,
    },
}

pub async fn handle_ws_connection(socket: WebSocket, ctx: Arc<EngineContext>, session: SessionHandle) {
    let session_id = uuid::Uuid::new_v4().to_string();
    let (mut ws_tx, mut ws_rx) = socket.split();

    let hello = ServerMessage::Hello {
        session_id: session_id.clone(),
        server_version: env!("CARGO_PKG_VERSION").to_string(),
        channel: ctx.config.channel.clone(),
        component_id: ctx.config.component_id.clone(),
    };
    let hello = match serde_json::to_string(&hello) {
        Ok(text) => text,
        Err(e) => {
            error!("failed to serialize hello: {e}");
            return;
        }
    };
    if let Err(e) = ws_tx.send(Message::Text(hello)).await {
        error!("failed to send hello: {e}");
        return;
    }
    info!(%session_id, "ws connected");

    let (reply_tx, mut reply_rx) = mpsc::channel::<ServerMessage>(64);
    let mut envelopes = ctx.broadcaster.subscribe();

    let sender_task = tokio::spawn(async move {
        loop {
            let text = tokio::select! {
                reply = reply_rx.recv() => match reply {
                    Some(reply) => serde_json::to_string(&reply),
                    None => break,
                },
                envelope = envelopes.recv() => match envelope {
                    Ok(envelope) => serde_json::to_string(&envelope),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "ws client lagging, envelopes dropped");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            };
            let text = match text {
                Ok(t) => t,
                Err(e) => {
                    error!("failed to serialize message: {e}");
                    continue;
                }
            };
            if let Err(e) = ws_tx.send(Message::Text(text)).await {
                warn!("failed to send message: {e}");
                break;
            }
        }
    });

    while let Some(msg) = ws_rx.next().await {
        let msg = match msg {
            Ok(m) => m,
            Err(e) => {
                warn!("ws receive error: {e}");
                break;
            }
        };
        match msg {
            Message::Text(text) => {
                if let Some(reply) = handle_client_message(&ctx, &session, &text) {
                    if reply_tx.send(reply).await.is_err() {
                        break;
                    }
                }
            }
            Message::Close(_) => {
                info!(%session_id, "ws closed by client");
                break;
            }
            Message::Binary(_) | Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    drop(reply_tx);
    sender_task.abort();
    info!(%session_id, "ws disconnected");
}

/// Routes one client frame; returns a direct reply when there is one.
fn handle_client_message(ctx: &EngineContext, session: &SessionHandle, text: &str) -> Option<ServerMessage> {
    let msg: ClientMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            return Some(ServerMessage::Error {
                code: "parse_error".to_string(),
                message: e.to_string(),
            });
        }
    };

    let sent = match msg {
        ClientMessage::Viewport(viewport) => session.set_viewport(viewport),
        ClientMessage::Query { sql } => session.set_query(sql),
        ClientMessage::Envelope { envelope } => session.inbound(envelope),
        ClientMessage::Boundaries { cells } => {
            let cells: Vec<CellId> = cells.iter().filter_map(|c| c.parse().ok()).collect();
            debug!(cells = cells.len(), "boundaries requested");
            return Some(ServerMessage::Boundaries {
                cells: cell_boundaries(ctx.codec.as_ref(), &cells),
            });
        }
        ClientMessage::Ping { seq } => return Some(ServerMessage::Pong { seq }),
    };

    sent.err().map(|e| ServerMessage::Error {
        code: "session_closed".to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::{ServerMessage, handle_client_message};
    use analytics::config::EngineConfig;
    use analytics::context::EngineContext;
    use analytics::session::ViewportSession;
    use serde_json::json;
    use spatial::index::SpatialIndex;
    use std::sync::Arc;
    use streaming::source::MemoryRowGroupSource;

    fn ctx() -> Arc<EngineContext> {
        let source = Arc::new(MemoryRowGroupSource::new());
        Arc::new(EngineContext::new(EngineConfig::default(), SpatialIndex::new(), source).unwrap())
    }

    #[tokio::test]
    async fn malformed_frame_gets_parse_error() {
        let ctx = ctx();
        let (session, _) = ViewportSession::spawn(ctx.clone());
        let reply = handle_client_message(&ctx, &session, "{not json");
        assert!(matches!(reply, Some(ServerMessage::Error { ref code, .. }) if code == "parse_error"));
    }

    #[tokio::test]
    async fn ping_and_boundaries_reply_directly() {
        let ctx = ctx();
        let (session, _) = ViewportSession::spawn(ctx.clone());

        let reply = handle_client_message(&ctx, &session, r#"{"type":"ping","seq":7}"#);
        assert!(matches!(reply, Some(ServerMessage::Pong { seq: 7 })));

        let frame = json!({"type": "boundaries", "cells": ["841f91dffffffff", "bogus"]}).to_string();
        let Some(ServerMessage::Boundaries { cells }) = handle_client_message(&ctx, &session, &frame) else {
            panic!("expected boundaries");
        };
        assert_eq!(cells.len(), 1);
    }

    #[tokio::test]
    async fn viewport_is_forwarded_without_reply() {
        let ctx = ctx();
        let (session, _) = ViewportSession::spawn(ctx.clone());
        let frame = r#"{"type":"viewport","west":-1,"south":50,"east":1,"north":52,"zoom":7}"#;
        assert!(handle_client_message(&ctx, &session, frame).is_none());
    }
}
