use crate::error::ApplicationError;
use domain::{ConnectionId, UserId};

/// 在线状态登记表。
///
/// 维护 {用户 → 活跃连接} 的目录，同一用户可以有多个连接（多标签页）。
/// 只有连接数在 0 和 1 之间变化时才算上线/下线。
#[async_trait::async_trait]
pub trait PresenceRegistry: Send + Sync {
    /// 登记一个连接，返回该用户是否由此上线（首个连接）。
    async fn connect(
        &self,
        user_id: UserId,
        connection_id: ConnectionId,
    ) -> Result<bool, ApplicationError>;

    /// 注销一个连接，返回该用户是否由此下线（最后一个连接）。
    /// 对未登记的连接重复调用是无害的空操作。
    async fn disconnect(
        &self,
        user_id: UserId,
        connection_id: ConnectionId,
    ) -> Result<bool, ApplicationError>;

    /// 当前在线用户的完整快照。
    async fn online_users(&self) -> Result<Vec<UserId>, ApplicationError>;

    /// 检查用户是否在线。
    async fn is_online(&self, user_id: UserId) -> Result<bool, ApplicationError>;
}

/// 内存实现的在线状态登记表
pub mod memory {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use tokio::sync::RwLock;

    pub struct MemoryPresenceRegistry {
        connections: RwLock<HashMap<UserId, HashSet<ConnectionId>>>,
    }

    impl Default for MemoryPresenceRegistry {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MemoryPresenceRegistry {
        pub fn new() -> Self {
            Self {
                connections: RwLock::new(HashMap::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl PresenceRegistry for MemoryPresenceRegistry {
        async fn connect(
            &self,
            user_id: UserId,
            connection_id: ConnectionId,
        ) -> Result<bool, ApplicationError> {
            let mut connections = self.connections.write().await;
            let entry = connections.entry(user_id).or_default();
            let was_offline = entry.is_empty();
            entry.insert(connection_id);
            Ok(was_offline)
        }

        async fn disconnect(
            &self,
            user_id: UserId,
            connection_id: ConnectionId,
        ) -> Result<bool, ApplicationError> {
            let mut connections = self.connections.write().await;
            let Some(entry) = connections.get_mut(&user_id) else {
                return Ok(false);
            };
            let removed = entry.remove(&connection_id);
            if removed && entry.is_empty() {
                connections.remove(&user_id);
                return Ok(true);
            }
            Ok(false)
        }

        async fn online_users(&self) -> Result<Vec<UserId>, ApplicationError> {
            let connections = self.connections.read().await;
            let mut users: Vec<UserId> = connections.keys().copied().collect();
            users.sort();
            Ok(users)
        }

        async fn is_online(&self, user_id: UserId) -> Result<bool, ApplicationError> {
            let connections = self.connections.read().await;
            Ok(connections
                .get(&user_id)
                .map(|set| !set.is_empty())
                .unwrap_or(false))
        }
    }

}
