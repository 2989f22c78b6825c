//! WebSocket 升级入口。
//!
//! 连接升级前完成认证，升级后交给会话循环处理。

use axum::{
    extract::{Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::Response,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{state::AppState, ws_session};

/// WebSocket 连接查询参数。
/// 浏览器的 WebSocket API 不能带自定义请求头，token 走查询串。
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: String,
}

/// 客户端通过 WebSocket 发来的指令。
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// 打开会话视图，开始接收该会话的 typing 等定向事件。
    Join { conversation_id: Uuid },
    /// 关闭会话视图。
    Leave { conversation_id: Uuid },
    SendMessage {
        conversation_id: Uuid,
        /// 客户端生成的临时标识，用于乐观渲染对账和重发去重。
        client_msg_id: String,
        content: String,
    },
    Typing {
        conversation_id: Uuid,
        is_typing: bool,
    },
    /// 应用层心跳。
    Ping,
}

pub async fn websocket_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
) -> Result<Response, StatusCode> {
    if query.token.is_empty() {
        tracing::warn!("WebSocket 升级失败：token 为空");
        return Err(StatusCode::UNAUTHORIZED);
    }

    let user_id = match state.jwt_service.verify_token(&query.token) {
        Ok(claims) => claims.user_id,
        Err(_) => {
            tracing::warn!("WebSocket 升级失败：token 无效");
            return Err(StatusCode::UNAUTHORIZED);
        }
    };

    // token 可能比账号活得久，升级前确认用户仍然存在
    if state.user_service.get_profile(user_id).await.is_err() {
        tracing::warn!(user_id = %user_id, "WebSocket 升级失败：用户不存在");
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(ws.on_upgrade(move |socket| ws_session::run(socket, state, user_id)))
}
