use domain::{Message, Timestamp, User};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 对外暴露的用户资料，不含密码哈希。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserDto {
    pub id: Uuid,
    pub username: String,
    pub display_name: String,
    pub bio: String,
    pub avatar_url: String,
    pub last_seen: Option<Timestamp>,
    pub created_at: Timestamp,
}

impl From<&User> for UserDto {
    fn from(user: &User) -> Self {
        Self {
            id: Uuid::from(user.id),
            username: user.username.as_str().to_owned(),
            display_name: user.display_name.as_str().to_owned(),
            bio: user.bio.clone(),
            avatar_url: user.avatar_url.clone(),
            last_seen: user.last_seen,
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDto {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub sent_at: Timestamp,
    pub read: bool,
    pub edited: bool,
    pub edited_at: Option<Timestamp>,
}

impl From<&Message> for MessageDto {
    fn from(message: &Message) -> Self {
        Self {
            id: Uuid::from(message.id),
            conversation_id: Uuid::from(message.conversation_id),
            sender_id: Uuid::from(message.sender_id),
            content: message.content.as_str().to_owned(),
            sent_at: message.sent_at,
            read: message.read,
            edited: message.edited,
            edited_at: message.edited_at,
        }
    }
}

/// 带参与者资料和最后一条消息的会话视图，供会话列表直接渲染。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationDto {
    pub id: Uuid,
    pub participants: Vec<UserDto>,
    pub last_message: Option<MessageDto>,
    pub created_at: Timestamp,
    pub last_activity: Timestamp,
}

/// 一页历史消息，按时间正序排列。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePage {
    pub messages: Vec<MessageDto>,
    /// 是否还有更早的消息可以翻页。
    pub has_more: bool,
}
