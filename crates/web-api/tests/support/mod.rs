//! 端到端测试脚手架。
//!
//! 仓储和密码哈希用内存假实现，路由跑在随机端口的真实服务器上，
//! 测试通过 HTTP / WebSocket 客户端访问。

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::{oneshot, RwLock};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use application::password::{PasswordHasher, PasswordHasherError};
use application::repository::{ConversationRepository, MessageRepository, UserRepository};
use application::{
    ChatService, ChatServiceDependencies, LocalEventBroadcaster, MemoryPresenceRegistry,
    MemorySendDeduplicator, SystemClock, UserService, UserServiceDependencies,
};
use domain::{
    Conversation, ConversationId, Message as DomainMessage, MessageId, PasswordHash,
    RepositoryError, Timestamp, User, UserId, Username,
};
use web_api::{router, AppState, JwtConfig, JwtService};

#[derive(Default)]
struct InMemoryUserRepository {
    users: RwLock<HashMap<UserId, User>>,
}

#[async_trait::async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn create(&self, user: User) -> Result<User, RepositoryError> {
        let mut users = self.users.write().await;
        if users.values().any(|existing| existing.username == user.username) {
            return Err(RepositoryError::Conflict);
        }
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn update(&self, user: User) -> Result<User, RepositoryError> {
        self.users.write().await.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn find_by_username(&self, username: Username) -> Result<Option<User>, RepositoryError> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|user| user.username == username)
            .cloned())
    }

    async fn search(
        &self,
        query: &str,
        exclude: UserId,
        limit: u32,
    ) -> Result<Vec<User>, RepositoryError> {
        let needle = query.to_lowercase();
        let mut found: Vec<User> = self
            .users
            .read()
            .await
            .values()
            .filter(|user| user.id != exclude)
            .filter(|user| {
                user.username.as_str().contains(&needle)
                    || user.display_name.as_str().to_lowercase().contains(&needle)
            })
            .cloned()
            .collect();
        found.sort_by(|a, b| a.username.as_str().cmp(b.username.as_str()));
        found.truncate(limit as usize);
        Ok(found)
    }

    async fn touch_last_seen(&self, id: UserId, at: Timestamp) -> Result<(), RepositoryError> {
        let mut users = self.users.write().await;
        let user = users.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        user.last_seen = Some(at);
        Ok(())
    }
}

#[derive(Default)]
struct InMemoryConversationRepository {
    conversations: RwLock<HashMap<ConversationId, Conversation>>,
}

#[async_trait::async_trait]
impl ConversationRepository for InMemoryConversationRepository {
    async fn create(&self, conversation: Conversation) -> Result<Conversation, RepositoryError> {
        let mut conversations = self.conversations.write().await;
        if conversations
            .values()
            .any(|existing| existing.participants == conversation.participants)
        {
            return Err(RepositoryError::Conflict);
        }
        conversations.insert(conversation.id, conversation.clone());
        Ok(conversation)
    }

    async fn find_by_id(
        &self,
        id: ConversationId,
    ) -> Result<Option<Conversation>, RepositoryError> {
        Ok(self.conversations.read().await.get(&id).cloned())
    }

    async fn find_direct(
        &self,
        a: UserId,
        b: UserId,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let mut pair = vec![a, b];
        pair.sort();
        Ok(self
            .conversations
            .read()
            .await
            .values()
            .find(|conversation| conversation.participants == pair)
            .cloned())
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Conversation>, RepositoryError> {
        let mut found: Vec<Conversation> = self
            .conversations
            .read()
            .await
            .values()
            .filter(|conversation| conversation.is_participant(user_id))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        Ok(found)
    }

    async fn record_message(
        &self,
        id: ConversationId,
        message_id: MessageId,
        at: Timestamp,
    ) -> Result<(), RepositoryError> {
        let mut conversations = self.conversations.write().await;
        let conversation = conversations.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        conversation.record_message(message_id, at);
        Ok(())
    }
}

#[derive(Default)]
struct InMemoryMessageRepository {
    messages: RwLock<Vec<DomainMessage>>,
}

#[async_trait::async_trait]
impl MessageRepository for InMemoryMessageRepository {
    async fn create(&self, message: DomainMessage) -> Result<DomainMessage, RepositoryError> {
        self.messages.write().await.push(message.clone());
        Ok(message)
    }

    async fn find_by_id(&self, id: MessageId) -> Result<Option<DomainMessage>, RepositoryError> {
        Ok(self
            .messages
            .read()
            .await
            .iter()
            .find(|message| message.id == id)
            .cloned())
    }

    async fn list_page(
        &self,
        conversation_id: ConversationId,
        page: u32,
        limit: u32,
    ) -> Result<Vec<DomainMessage>, RepositoryError> {
        let mut recent: Vec<DomainMessage> = self
            .messages
            .read()
            .await
            .iter()
            .filter(|message| message.conversation_id == conversation_id)
            .cloned()
            .collect();
        recent.sort_by(|a, b| b.sent_at.cmp(&a.sent_at));

        let start = ((page - 1) * limit) as usize;
        let mut items: Vec<DomainMessage> = recent
            .into_iter()
            .skip(start)
            .take(limit as usize)
            .collect();
        items.reverse();
        Ok(items)
    }

    async fn mark_read(
        &self,
        conversation_id: ConversationId,
        reader: UserId,
    ) -> Result<u64, RepositoryError> {
        let mut messages = self.messages.write().await;
        let mut affected = 0;
        for message in messages.iter_mut() {
            if message.conversation_id == conversation_id
                && message.sender_id != reader
                && !message.read
            {
                message.mark_read();
                affected += 1;
            }
        }
        Ok(affected)
    }
}

/// 不做真实哈希的密码适配器，测试不承担 bcrypt 的开销。
struct PlainPasswordHasher;

#[async_trait::async_trait]
impl PasswordHasher for PlainPasswordHasher {
    async fn hash(&self, plaintext: &str) -> Result<PasswordHash, PasswordHasherError> {
        PasswordHash::new(format!("plain:{plaintext}"))
            .map_err(|err| PasswordHasherError::hash_error(err.to_string()))
    }

    async fn verify(
        &self,
        plaintext: &str,
        hashed: &PasswordHash,
    ) -> Result<bool, PasswordHasherError> {
        Ok(hashed.as_str() == format!("plain:{plaintext}"))
    }
}

pub struct TestApp {
    pub address: String,
    pub ws_base: String,
    pub client: reqwest::Client,
    // 持有发送端，TestApp 析构时服务器优雅退出
    _shutdown: oneshot::Sender<()>,
}

pub async fn spawn_app() -> TestApp {
    let users = Arc::new(InMemoryUserRepository::default());
    let conversations = Arc::new(InMemoryConversationRepository::default());
    let messages = Arc::new(InMemoryMessageRepository::default());
    let clock = Arc::new(SystemClock);
    let broadcaster = Arc::new(LocalEventBroadcaster::default());

    let user_service = Arc::new(UserService::new(UserServiceDependencies {
        user_repository: users.clone(),
        password_hasher: Arc::new(PlainPasswordHasher),
        clock: clock.clone(),
    }));
    let chat_service = Arc::new(ChatService::new(ChatServiceDependencies {
        conversation_repository: conversations,
        message_repository: messages,
        user_repository: users,
        clock,
        broadcaster: broadcaster.clone(),
        presence: Arc::new(MemoryPresenceRegistry::new()),
        deduplicator: Arc::new(MemorySendDeduplicator::new()),
    }));
    let jwt_service = Arc::new(JwtService::new(JwtConfig {
        secret: "e2e-test-secret-key-with-enough-length-32".to_string(),
        expiration_hours: 1,
    }));

    let state = AppState::new(user_service, chat_service, broadcaster, jwt_service);
    let app = router(state, "http://localhost:5173");

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("local addr").port();
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
            .expect("serve");
    });

    TestApp {
        address: format!("http://127.0.0.1:{port}"),
        ws_base: format!("ws://127.0.0.1:{port}"),
        client: reqwest::Client::new(),
        _shutdown: shutdown_tx,
    }
}

/// 注册并返回 (token, user_id)。
pub async fn register(app: &TestApp, username: &str) -> (String, String) {
    let response = app
        .client
        .post(format!("{}/api/auth/register", app.address))
        .json(&json!({
            "username": username,
            "display_name": username,
            "password": "secret-password",
        }))
        .send()
        .await
        .expect("register request");
    assert_eq!(response.status().as_u16(), 201);

    let body: Value = response.json().await.expect("register body");
    let token = body["token"].as_str().expect("token").to_owned();
    let user_id = body["user"]["id"].as_str().expect("user id").to_owned();
    (token, user_id)
}

/// 打开与另一名用户的会话，返回会话 id。
pub async fn open_conversation(app: &TestApp, token: &str, other_user_id: &str) -> String {
    let response = app
        .client
        .get(format!(
            "{}/api/chat/conversation/{other_user_id}",
            app.address
        ))
        .bearer_auth(token)
        .send()
        .await
        .expect("open conversation");
    assert!(response.status().is_success());

    let body: Value = response.json().await.expect("conversation body");
    body["id"].as_str().expect("conversation id").to_owned()
}

pub type WsClient = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

pub async fn connect_ws(app: &TestApp, token: &str) -> WsClient {
    let url = format!("{}/api/ws?token={token}", app.ws_base);
    let (stream, _) = connect_async(url).await.expect("websocket connect");
    stream
}

pub async fn send_ws(ws: &mut WsClient, payload: Value) {
    use futures_util::SinkExt;
    ws.send(Message::Text(payload.to_string().into()))
        .await
        .expect("websocket send");
}

/// 取下一条文本事件，跳过传输层帧。五秒内收不到视为失败。
pub async fn next_event(ws: &mut WsClient) -> Value {
    use futures_util::StreamExt;
    let deadline = Duration::from_secs(5);
    loop {
        let frame = tokio::time::timeout(deadline, ws.next())
            .await
            .expect("event within deadline")
            .expect("stream open")
            .expect("frame");
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).expect("event json");
        }
    }
}

/// 等待指定类型的事件，跳过中途到达的其他事件。
pub async fn wait_for_event(ws: &mut WsClient, event_type: &str) -> Value {
    for _ in 0..10 {
        let event = next_event(ws).await;
        if event["type"] == event_type {
            return event;
        }
    }
    panic!("no {event_type} event within 10 frames");
}
