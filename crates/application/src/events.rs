use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dto::{ConversationDto, MessageDto};
use domain::Timestamp;

/// 服务端推送给客户端的实时事件。
///
/// 客户端以 `type` 字段区分事件种类。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// 在线用户目录的完整快照，上线/下线时推送。
    OnlineUsers { users: Vec<Uuid> },
    /// 新消息，推送给发送方以外的会话参与者。
    MessageReceived { message: MessageDto },
    /// 发送确认，只推送给发出消息的那个连接。
    /// 客户端用 client_msg_id 将乐观渲染的临时消息替换为服务端消息。
    MessageAccepted {
        client_msg_id: String,
        message_id: Uuid,
        sent_at: Timestamp,
    },
    /// 正在输入指示，推送给打开了该会话的其他连接。
    Typing {
        conversation_id: Uuid,
        user_id: Uuid,
        is_typing: bool,
    },
    /// 新会话创建，推送给另一名参与者。
    ConversationStarted { conversation: ConversationDto },
    /// 应用层心跳回应。
    Pong,
    /// 单条指令处理失败，连接保持打开。
    Error { code: String, message: String },
}
