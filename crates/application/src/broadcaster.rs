use async_trait::async_trait;
use domain::{ConnectionId, ConversationId, UserId};
use thiserror::Error;

use crate::events::ServerEvent;

/// 一次广播的投递范围。
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum BroadcastScope {
    /// 所有活跃连接。
    AllClients,
    /// 列出用户的全部连接。
    Users(Vec<UserId>),
    /// 当前打开了该会话的连接。
    Conversation(ConversationId),
    /// 某一个具体连接。
    Connection(ConnectionId),
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ChatBroadcast {
    pub scope: BroadcastScope,
    /// 不投递给该连接（通常是事件的发起方）。
    pub exclude: Option<ConnectionId>,
    pub event: ServerEvent,
}

impl ChatBroadcast {
    pub fn to_all(event: ServerEvent) -> Self {
        Self {
            scope: BroadcastScope::AllClients,
            exclude: None,
            event,
        }
    }

    pub fn to_users(users: Vec<UserId>, event: ServerEvent) -> Self {
        Self {
            scope: BroadcastScope::Users(users),
            exclude: None,
            event,
        }
    }

    pub fn to_conversation(
        conversation_id: ConversationId,
        exclude: Option<ConnectionId>,
        event: ServerEvent,
    ) -> Self {
        Self {
            scope: BroadcastScope::Conversation(conversation_id),
            exclude,
            event,
        }
    }

    pub fn to_connection(connection_id: ConnectionId, event: ServerEvent) -> Self {
        Self {
            scope: BroadcastScope::Connection(connection_id),
            exclude: None,
            event,
        }
    }
}

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("broadcast failed: {0}")]
    Failed(String),
}

impl BroadcastError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

#[async_trait]
pub trait EventBroadcaster: Send + Sync {
    async fn broadcast(&self, payload: ChatBroadcast) -> Result<(), BroadcastError>;
}
