// 单进程内的本地广播器实现
use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use domain::{ConnectionId, ConversationId, UserId};
use tokio::sync::{broadcast, RwLock};

use crate::broadcaster::{BroadcastError, BroadcastScope, ChatBroadcast, EventBroadcaster};
use crate::events::ServerEvent;

const DEFAULT_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct LocalEventBroadcaster {
    sender: broadcast::Sender<ChatBroadcast>,
}

impl LocalEventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// 为一个连接创建事件流。
    /// `joined` 与 WebSocket 会话共享，随 join/leave 指令变化。
    pub fn subscribe(
        &self,
        user_id: UserId,
        connection_id: ConnectionId,
        joined: Arc<RwLock<HashSet<ConversationId>>>,
    ) -> EventStream {
        EventStream {
            receiver: self.sender.subscribe(),
            user_id,
            connection_id,
            joined,
        }
    }
}

impl Default for LocalEventBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl EventBroadcaster for LocalEventBroadcaster {
    async fn broadcast(&self, payload: ChatBroadcast) -> Result<(), BroadcastError> {
        // 没有任何订阅者时投递是空操作，不算失败
        if self.sender.receiver_count() == 0 {
            return Ok(());
        }
        self.sender
            .send(payload)
            .map(|_| ())
            .map_err(|err| BroadcastError::failed(err.to_string()))
    }
}

/// 按连接身份过滤的事件流。
pub struct EventStream {
    receiver: broadcast::Receiver<ChatBroadcast>,
    user_id: UserId,
    connection_id: ConnectionId,
    joined: Arc<RwLock<HashSet<ConversationId>>>,
}

impl EventStream {
    /// 取下一条属于本连接的事件。广播通道关闭时返回 None。
    pub async fn recv(&mut self) -> Option<ServerEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(payload) => {
                    if payload.exclude == Some(self.connection_id) {
                        continue;
                    }
                    let matches = match &payload.scope {
                        BroadcastScope::AllClients => true,
                        BroadcastScope::Users(users) => users.contains(&self.user_id),
                        BroadcastScope::Conversation(conversation_id) => {
                            self.joined.read().await.contains(conversation_id)
                        }
                        BroadcastScope::Connection(connection_id) => {
                            *connection_id == self.connection_id
                        }
                    };
                    if matches {
                        return Some(payload.event);
                    }
                }
                // 落后于广播通道时丢弃错过的区间继续消费，
                // 客户端靠重新拉取历史补齐
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        connection_id = %self.connection_id,
                        skipped,
                        "事件流滞后，丢弃错过的事件"
                    );
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn stream_for(
        broadcaster: &LocalEventBroadcaster,
        user_id: UserId,
        connection_id: ConnectionId,
    ) -> (EventStream, Arc<RwLock<HashSet<ConversationId>>>) {
        let joined = Arc::new(RwLock::new(HashSet::new()));
        let stream = broadcaster.subscribe(user_id, connection_id, joined.clone());
        (stream, joined)
    }

    fn online_event() -> ServerEvent {
        ServerEvent::OnlineUsers { users: vec![] }
    }

    #[tokio::test]
    async fn user_scope_reaches_every_connection_of_user() {
        let broadcaster = LocalEventBroadcaster::default();
        let alice = UserId::from(Uuid::new_v4());
        let bob = UserId::from(Uuid::new_v4());

        let (mut alice_tab1, _) = stream_for(&broadcaster, alice, ConnectionId::generate());
        let (mut alice_tab2, _) = stream_for(&broadcaster, alice, ConnectionId::generate());
        let (mut bob_stream, _) = stream_for(&broadcaster, bob, ConnectionId::generate());

        broadcaster
            .broadcast(ChatBroadcast::to_users(vec![alice], online_event()))
            .await
            .unwrap();
        broadcaster
            .broadcast(ChatBroadcast::to_users(vec![bob], online_event()))
            .await
            .unwrap();

        assert!(alice_tab1.recv().await.is_some());
        assert!(alice_tab2.recv().await.is_some());
        // bob 的流应跳过发给 alice 的事件，直接收到第二条
        assert!(matches!(
            bob_stream.recv().await,
            Some(ServerEvent::OnlineUsers { .. })
        ));
    }

    #[tokio::test]
    async fn conversation_scope_requires_join() {
        let broadcaster = LocalEventBroadcaster::default();
        let user = UserId::from(Uuid::new_v4());
        let conversation = ConversationId::from(Uuid::new_v4());

        let connection = ConnectionId::generate();
        let (mut stream, joined) = stream_for(&broadcaster, user, connection);

        joined.write().await.insert(conversation);
        broadcaster
            .broadcast(ChatBroadcast::to_conversation(
                conversation,
                None,
                online_event(),
            ))
            .await
            .unwrap();
        assert!(stream.recv().await.is_some());
    }

    #[tokio::test]
    async fn exclude_suppresses_origin_connection() {
        let broadcaster = LocalEventBroadcaster::default();
        let user = UserId::from(Uuid::new_v4());
        let conversation = ConversationId::from(Uuid::new_v4());

        let origin = ConnectionId::generate();
        let (mut origin_stream, origin_joined) = stream_for(&broadcaster, user, origin);
        let (mut other_stream, other_joined) =
            stream_for(&broadcaster, UserId::from(Uuid::new_v4()), ConnectionId::generate());
        origin_joined.write().await.insert(conversation);
        other_joined.write().await.insert(conversation);

        broadcaster
            .broadcast(ChatBroadcast::to_conversation(
                conversation,
                Some(origin),
                online_event(),
            ))
            .await
            .unwrap();
        broadcaster
            .broadcast(ChatBroadcast::to_connection(origin, online_event()))
            .await
            .unwrap();

        // origin 连接跳过第一条（被排除），收到第二条
        assert!(matches!(
            origin_stream.recv().await,
            Some(ServerEvent::OnlineUsers { .. })
        ));
        assert!(other_stream.recv().await.is_some());
    }

    #[tokio::test]
    async fn broadcast_without_subscribers_is_ok() {
        let broadcaster = LocalEventBroadcaster::default();
        assert!(broadcaster
            .broadcast(ChatBroadcast::to_all(online_event()))
            .await
            .is_ok());
    }
}
