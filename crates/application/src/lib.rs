//! 应用层实现。
//!
//! 这里提供围绕领域模型的用例服务，处理输入校验、会话成员检查、
//! 以及对外部适配器（密码哈希、事件广播、在线状态）的抽象。

pub mod broadcaster;
pub mod clock;
pub mod dedupe;
pub mod dto;
pub mod error;
pub mod events;
pub mod local_broadcast;
pub mod password;
pub mod presence;
pub mod repository;
pub mod services;

pub use broadcaster::{BroadcastError, BroadcastScope, ChatBroadcast, EventBroadcaster};
pub use clock::{Clock, SystemClock};
pub use dedupe::{MemorySendDeduplicator, SendDeduplicator};
pub use dto::{ConversationDto, MessageDto, MessagePage, UserDto};
pub use error::ApplicationError;
pub use events::ServerEvent;
pub use local_broadcast::{EventStream, LocalEventBroadcaster};
pub use password::{PasswordHasher, PasswordHasherError};
pub use presence::{memory::MemoryPresenceRegistry, PresenceRegistry};
pub use repository::{ConversationRepository, MessageRepository, UserRepository};
pub use services::{ChatService, ChatServiceDependencies, UserService, UserServiceDependencies};
