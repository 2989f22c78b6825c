//! 聊天系统核心领域模型
//!
//! 包含用户、会话、消息等核心实体，以及相关的业务规则。

pub mod conversation;
pub mod errors;
pub mod message;
pub mod user;
pub mod value_objects;

pub use conversation::Conversation;
pub use errors::{DomainError, RepositoryError};
pub use message::Message;
pub use user::User;
pub use value_objects::{
    ConnectionId, ConversationId, DisplayName, MessageContent, MessageId, PasswordHash, Timestamp,
    UserId, Username,
};
