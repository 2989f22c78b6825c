use std::sync::Arc;

use application::{ChatService, LocalEventBroadcaster, UserService};

use crate::JwtService;

#[derive(Clone)]
pub struct AppState {
    pub user_service: Arc<UserService>,
    pub chat_service: Arc<ChatService>,
    /// WebSocket 会话从这里订阅自己的事件流。
    pub broadcaster: Arc<LocalEventBroadcaster>,
    pub jwt_service: Arc<JwtService>,
}

impl AppState {
    pub fn new(
        user_service: Arc<UserService>,
        chat_service: Arc<ChatService>,
        broadcaster: Arc<LocalEventBroadcaster>,
        jwt_service: Arc<JwtService>,
    ) -> Self {
        Self {
            user_service,
            chat_service,
            broadcaster,
            jwt_service,
        }
    }
}
