// ws/mod.rs — realtime channel server.
//
// Raw WebSocket listener. A connection subscribes to project channels with
// explicit join/leave frames and receives that channel's events until it
// leaves or disconnects. Malformed frames are ignored.
//
// Known gap, carried forward deliberately: joining a channel performs no
// credential or membership check — any connection may subscribe to any
// project id it knows.

use crate::events::ConnectionId;
use crate::AppContext;
use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// Client → server subscription frame: `{"action":"join","projectId":"..."}`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClientFrame {
    action: String,
    project_id: String,
}

pub async fn run(ctx: Arc<AppContext>) -> Result<()> {
    let addr = format!("{}:{}", ctx.config.bind_address, ctx.config.ws_port);
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, "realtime server listening");

    // Graceful shutdown: resolve on SIGTERM (Unix) or Ctrl-C (all platforms).
    // Pinned so we can use it in the select! loop without moving.
    let shutdown = make_shutdown_future();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => {
                info!("shutdown signal received — stopping realtime server");
                break;
            }

            conn = listener.accept() => {
                let (stream, peer) = match conn {
                    Ok(c) => c,
                    Err(e) => {
                        error!(err = %e, "accept error");
                        continue;
                    }
                };
                debug!(peer = %peer, "new connection");
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, ctx).await {
                        warn!(peer = %peer, err = %e, "connection error");
                    }
                });
            }
        }
    }

    info!("realtime server stopped");
    Ok(())
}

/// Returns a future that resolves when a shutdown signal is received.
///
/// On Unix we listen for SIGTERM *and* Ctrl-C.
/// On other platforms we listen for Ctrl-C only.
async fn make_shutdown_future() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
    }
}

async fn handle_connection(stream: tokio::net::TcpStream, ctx: Arc<AppContext>) -> Result<()> {
    let ws = accept_async(stream).await?;
    let (mut sink, mut stream) = ws.split();

    let conn_id = ctx.rooms.next_connection_id();
    // Events for this connection's channels arrive here; kept alive for the
    // whole connection, so recv() only drains.
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    loop {
        tokio::select! {
            // Incoming subscription frame from client
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_frame(&ctx, conn_id, &tx, &text);
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!(err = %e, "ws error");
                        break;
                    }
                    _ => {}
                }
            }
            // Outgoing channel event
            event = rx.recv() => {
                match event {
                    Some(frame) => {
                        if let Err(e) = sink.send(Message::Text(frame)).await {
                            warn!(err = %e, "event send error");
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    ctx.rooms.disconnect(conn_id);
    debug!(conn = conn_id, "connection closed");
    Ok(())
}

fn handle_frame(
    ctx: &AppContext,
    conn_id: ConnectionId,
    tx: &mpsc::UnboundedSender<String>,
    text: &str,
) {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            debug!(err = %e, "ignoring malformed frame");
            return;
        }
    };
    match frame.action.as_str() {
        "join" => {
            ctx.rooms.join(&frame.project_id, conn_id, tx.clone());
            debug!(conn = conn_id, project = %frame.project_id, "joined channel");
        }
        "leave" => {
            ctx.rooms.leave(&frame.project_id, conn_id);
            debug!(conn = conn_id, project = %frame.project_id, "left channel");
        }
        other => debug!(action = %other, "ignoring unknown action"),
    }
}
