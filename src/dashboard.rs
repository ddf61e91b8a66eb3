use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::{Html, IntoResponse},
    routing::get,
    Json, Router,
};
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::snapshot::DisplaySnapshot;

type SnapshotFeed = watch::Receiver<DisplaySnapshot>;

pub fn router(snapshots: SnapshotFeed) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/snapshot", get(snapshot_handler))
        .route("/ws", get(ws_handler))
        .with_state(snapshots)
}

/// Serve the read-only display on `0.0.0.0:port` until the listener fails.
pub async fn start_dashboard(snapshots: SnapshotFeed, port: u16) -> std::io::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;
    log::info!("dashboard listening on http://{}", addr);
    axum::serve(listener, router(snapshots)).await
}

async fn index_handler() -> Html<&'static str> {
    Html(include_str!("dashboard_static.html"))
}

async fn snapshot_handler(State(snapshots): State<SnapshotFeed>) -> Json<DisplaySnapshot> {
    Json(snapshots.borrow().clone())
}

async fn ws_handler(ws: WebSocketUpgrade, State(snapshots): State<SnapshotFeed>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, snapshots))
}

/// Push the current snapshot, then every change, until either side goes away.
async fn handle_socket(mut socket: WebSocket, mut snapshots: SnapshotFeed) {
    'push: loop {
        let json = {
            let snapshot = snapshots.borrow_and_update();
            serde_json::to_string(&*snapshot)
        };
        let json = match json {
            Ok(json) => json,
            Err(e) => {
                log::warn!("snapshot serialization failed: {}", e);
                break;
            }
        };
        if socket.send(Message::Text(json)).await.is_err() {
            // Client disconnected
            break;
        }

        loop {
            tokio::select! {
                changed = snapshots.changed() => {
                    if changed.is_err() {
                        break 'push;
                    }
                    continue 'push;
                }
                incoming = socket.recv() => match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break 'push,
                    Some(Ok(_)) => {}
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_snapshot_endpoint_serves_current_value() {
        let (tx, rx) = watch::channel(DisplaySnapshot::new());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, router(rx)).await;
        });

        let mut updated = DisplaySnapshot::new();
        updated.session.pending_count = 4;
        tx.send_replace(updated);

        let body: serde_json::Value = reqwest::get(format!("http://{}/snapshot", addr))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["session"]["pending_count"], 4);

        let index = reqwest::get(format!("http://{}/", addr))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(index.contains("/ws"));
    }
}
