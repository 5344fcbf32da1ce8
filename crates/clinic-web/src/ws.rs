//! 实时推送通道
//!
//! 每条WebSocket连接在鉴权后登记到连接注册表，通知经各连接独立的
//! 通道推送；连接关闭（含网络侧断开）即注销。推送为单向，客户端
//! 消息除关闭帧外一律忽略。

use crate::handlers::{ApiError, AppState};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: String,
}

/// WebSocket升级入口，握手前完成身份解析
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> Result<Response, ApiError> {
    let user = state.auth.verify_token(&params.token).await?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, user.id)))
}

async fn handle_socket(socket: WebSocket, state: AppState, user_id: Uuid) {
    let connection_id = Uuid::new_v4();
    let (tx, mut push_rx) = mpsc::unbounded_channel();
    state.registry.on_connect(user_id, connection_id, tx).await;
    info!(
        "WebSocket connection {} opened for user {}",
        connection_id, user_id
    );

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            push = push_rx.recv() => {
                let Some(payload) = push else { break };
                let text = match serde_json::to_string(&payload) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Failed to encode push payload: {}", e);
                        continue;
                    }
                };
                // 对端可能已关闭，推送尽力而为
                if sender.send(Message::Text(text)).await.is_err() {
                    debug!("Push to closed connection {} dropped", connection_id);
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    state.registry.on_disconnect(connection_id).await;
    info!("WebSocket connection {} closed", connection_id);
}
