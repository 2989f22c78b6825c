//! 单个 WebSocket 连接的会话循环。
//!
//! 每个连接拆成两个任务：发送任务统一持有 socket 的写端，
//! 接收任务解析客户端指令并调用应用层。任一任务结束即视为断线，
//! 随后注销在线状态。

use std::collections::HashSet;
use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use application::services::{SendMessageRequest, TypingRequest};
use application::{ChatService, ServerEvent};
use domain::{ConnectionId, ConversationId, UserId};

use crate::{state::AppState, ws::ClientEvent};

/// WebSocket 写操作命令，解耦对写端的并发访问。
#[derive(Debug)]
enum WsCommand {
    SendText(String),
    SendPong(Vec<u8>),
}

pub async fn run(socket: WebSocket, state: AppState, user_id: Uuid) {
    let user = UserId::from(user_id);
    let connection_id = ConnectionId::generate();
    tracing::info!(user_id = %user, connection_id = %connection_id, "WebSocket 连接已建立");

    // join/leave 指令改写这张表，事件流按它过滤会话级事件
    let joined: Arc<RwLock<HashSet<ConversationId>>> = Arc::new(RwLock::new(HashSet::new()));

    // 先订阅再登记在线，保证不会错过自己上线触发的在线名单推送
    let mut events = state
        .broadcaster
        .subscribe(user, connection_id, joined.clone());

    if let Err(err) = state
        .chat_service
        .register_connection(user, connection_id)
        .await
    {
        tracing::error!(user_id = %user, error = %err, "登记在线状态失败");
        return;
    }

    let (mut sender, mut incoming) = socket.split();
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<WsCommand>(32);

    // 发送任务：串行处理指令回执和订阅到的广播事件
    let send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(WsCommand::SendText(text)) => {
                            if sender.send(WsMessage::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        Some(WsCommand::SendPong(data)) => {
                            if sender.send(WsMessage::Pong(data.into())).await.is_err() {
                                break;
                            }
                        }
                        // 接收任务结束后通道关闭
                        None => break,
                    }
                }
                event = events.recv() => {
                    let Some(event) = event else { break };
                    let payload = match serde_json::to_string(&event) {
                        Ok(json) => json,
                        Err(err) => {
                            tracing::warn!(error = %err, "事件序列化失败");
                            continue;
                        }
                    };
                    if sender.send(WsMessage::Text(payload.into())).await.is_err() {
                        break;
                    }
                }
            }
        }
        tracing::debug!(connection_id = %connection_id, "WebSocket 发送任务结束");
    });

    // 接收任务：解析客户端指令并派发到应用层
    let recv_task = {
        let chat_service = state.chat_service.clone();
        let joined = joined.clone();
        tokio::spawn(async move {
            while let Some(Ok(message)) = incoming.next().await {
                let done = handle_incoming(
                    message,
                    &chat_service,
                    &joined,
                    user,
                    connection_id,
                    &cmd_tx,
                )
                .await
                .is_err();
                if done {
                    break;
                }
            }
            tracing::debug!(connection_id = %connection_id, "WebSocket 接收任务结束");
        })
    };

    // 任一任务退出即断线，另一个直接终止
    tokio::select! {
        _ = send_task => {}
        _ = recv_task => {}
    }

    if let Err(err) = state
        .chat_service
        .release_connection(user, connection_id)
        .await
    {
        tracing::warn!(user_id = %user, error = %err, "注销在线状态失败");
    }
    tracing::info!(user_id = %user, connection_id = %connection_id, "WebSocket 连接已断开");
}

/// 处理一帧客户端消息。返回 Err 表示连接应当关闭。
async fn handle_incoming(
    message: WsMessage,
    chat_service: &Arc<ChatService>,
    joined: &Arc<RwLock<HashSet<ConversationId>>>,
    user_id: UserId,
    connection_id: ConnectionId,
    cmd_tx: &mpsc::Sender<WsCommand>,
) -> Result<(), ()> {
    match message {
        WsMessage::Text(text) => {
            let event = match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => event,
                // 格式错误只回一条错误事件，连接保持打开
                Err(err) => {
                    return send_error(cmd_tx, "BAD_EVENT", format!("无法解析指令: {err}")).await;
                }
            };
            handle_client_event(event, chat_service, joined, user_id, connection_id, cmd_tx).await
        }
        WsMessage::Ping(data) => {
            cmd_tx
                .send(WsCommand::SendPong(data.to_vec()))
                .await
                .map_err(|_| ())
        }
        WsMessage::Pong(_) | WsMessage::Binary(_) => Ok(()),
        WsMessage::Close(_) => Err(()),
    }
}

async fn handle_client_event(
    event: ClientEvent,
    chat_service: &Arc<ChatService>,
    joined: &Arc<RwLock<HashSet<ConversationId>>>,
    user_id: UserId,
    connection_id: ConnectionId,
    cmd_tx: &mpsc::Sender<WsCommand>,
) -> Result<(), ()> {
    match event {
        ClientEvent::Join { conversation_id } => {
            // 非成员不允许进入会话视图
            if let Err(err) = chat_service
                .ensure_participant(conversation_id, Uuid::from(user_id))
                .await
            {
                return send_error(cmd_tx, "JOIN_REJECTED", err.to_string()).await;
            }
            joined
                .write()
                .await
                .insert(ConversationId::from(conversation_id));
            Ok(())
        }
        ClientEvent::Leave { conversation_id } => {
            joined
                .write()
                .await
                .remove(&ConversationId::from(conversation_id));
            Ok(())
        }
        ClientEvent::SendMessage {
            conversation_id,
            client_msg_id,
            content,
        } => {
            let request = SendMessageRequest {
                conversation_id,
                sender_id: Uuid::from(user_id),
                origin: connection_id,
                client_msg_id,
                content,
            };
            if let Err(err) = chat_service.send_message(request).await {
                return send_error(cmd_tx, "SEND_FAILED", err.to_string()).await;
            }
            Ok(())
        }
        ClientEvent::Typing {
            conversation_id,
            is_typing,
        } => {
            let request = TypingRequest {
                conversation_id,
                user_id: Uuid::from(user_id),
                origin: connection_id,
                is_typing,
            };
            if let Err(err) = chat_service.handle_typing(request).await {
                return send_error(cmd_tx, "TYPING_FAILED", err.to_string()).await;
            }
            Ok(())
        }
        ClientEvent::Ping => {
            let payload = serde_json::to_string(&ServerEvent::Pong).map_err(|_| ())?;
            cmd_tx.send(WsCommand::SendText(payload)).await.map_err(|_| ())
        }
    }
}

async fn send_error(
    cmd_tx: &mpsc::Sender<WsCommand>,
    code: &str,
    message: String,
) -> Result<(), ()> {
    let event = ServerEvent::Error {
        code: code.to_owned(),
        message,
    };
    let payload = serde_json::to_string(&event).map_err(|_| ())?;
    cmd_tx.send(WsCommand::SendText(payload)).await.map_err(|_| ())
}
