use crate::error::ApplicationError;
use domain::{MessageId, Timestamp, UserId};

/// 发送去重登记表。
///
/// 客户端超时重试或断线重连后可能把同一条消息再发一次，
/// 以 (发送者, client_msg_id) 识别重复：命中时返回最初分配的消息 ID，
/// 调用方只需重发确认，不再落库、不再广播。
#[async_trait::async_trait]
pub trait SendDeduplicator: Send + Sync {
    /// 查询该发送是否已经处理过，命中时返回已分配的消息 ID。
    async fn check(
        &self,
        sender: UserId,
        client_msg_id: &str,
    ) -> Result<Option<MessageId>, ApplicationError>;

    /// 登记一次已完成的发送。
    async fn record(
        &self,
        sender: UserId,
        client_msg_id: &str,
        message_id: MessageId,
        at: Timestamp,
    ) -> Result<(), ApplicationError>;
}

pub use memory::MemorySendDeduplicator;

/// 登记项的保留时长（24 小时）。过期后同样的 client_msg_id 会被当作新消息。
const RETENTION_SECS: i64 = 24 * 60 * 60;

/// 内存实现的发送去重登记表
pub mod memory {
    use super::*;
    use chrono::Duration;
    use std::collections::HashMap;
    use tokio::sync::RwLock;

    struct DedupeEntry {
        message_id: MessageId,
        recorded_at: Timestamp,
    }

    pub struct MemorySendDeduplicator {
        entries: RwLock<HashMap<(UserId, String), DedupeEntry>>,
        retention: Duration,
    }

    impl Default for MemorySendDeduplicator {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MemorySendDeduplicator {
        pub fn new() -> Self {
            Self::with_retention(Duration::seconds(RETENTION_SECS))
        }

        pub fn with_retention(retention: Duration) -> Self {
            Self {
                entries: RwLock::new(HashMap::new()),
                retention,
            }
        }
    }

    #[async_trait::async_trait]
    impl SendDeduplicator for MemorySendDeduplicator {
        async fn check(
            &self,
            sender: UserId,
            client_msg_id: &str,
        ) -> Result<Option<MessageId>, ApplicationError> {
            let entries = self.entries.read().await;
            let hit = entries
                .get(&(sender, client_msg_id.to_string()))
                .map(|entry| entry.message_id);
            Ok(hit)
        }

        async fn record(
            &self,
            sender: UserId,
            client_msg_id: &str,
            message_id: MessageId,
            at: Timestamp,
        ) -> Result<(), ApplicationError> {
            let mut entries = self.entries.write().await;
            // 顺手清掉已过保留期的登记，避免表无限增长。
            entries.retain(|_, entry| at - entry.recorded_at < self.retention);
            entries.insert(
                (sender, client_msg_id.to_string()),
                DedupeEntry {
                    message_id,
                    recorded_at: at,
                },
            );
            Ok(())
        }
    }

}
