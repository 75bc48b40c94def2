use futures_util::sink::SinkExt;
use futures_util::stream::StreamExt;
use log::{debug, error, warn};
use std::sync::Arc;
use tokio::sync::mpsc;
use warp::ws::{Message, WebSocket};

use crate::auth::Identity;
use crate::core::router::EventRouter;

// Serve one authenticated WebSocket connection until it closes
pub async fn handle_ws_client(ws: WebSocket, identity: Identity, router: Arc<EventRouter>) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    // Forward queued frames to the socket; ends once every sender is gone
    tokio::task::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Err(e) = ws_tx.send(Message::text(frame)).await {
                error!("Failed to send WebSocket message: {}", e);
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    let session = router.connect(identity, tx);

    // Frames are handled one at a time, in the order they were read
    while let Some(result) = ws_rx.next().await {
        match result {
            Ok(msg) if msg.is_text() => match msg.to_str() {
                Ok(text) => router.handle_frame(&session, text).await,
                Err(()) => warn!("Unreadable text frame from {}", session.identity.user_id),
            },
            Ok(msg) if msg.is_close() => break,
            Ok(msg) if msg.is_binary() => {
                debug!("Ignoring binary frame from {}", session.identity.user_id)
            }
            Ok(_) => {}
            Err(e) => {
                warn!("WebSocket error for {}: {}", session.identity.user_id, e);
                break;
            }
        }
    }

    router.disconnect(&session);
}
