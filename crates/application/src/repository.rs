use async_trait::async_trait;
use domain::{
    Conversation, ConversationId, Message, MessageId, RepositoryError, Timestamp, User, UserId,
    Username,
};

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create(&self, user: User) -> Result<User, RepositoryError>;
    async fn update(&self, user: User) -> Result<User, RepositoryError>;
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError>;
    async fn find_by_username(&self, username: Username) -> Result<Option<User>, RepositoryError>;
    /// 按用户名或显示名模糊搜索，排除指定用户。
    async fn search(
        &self,
        query: &str,
        exclude: UserId,
        limit: u32,
    ) -> Result<Vec<User>, RepositoryError>;
    async fn touch_last_seen(&self, id: UserId, at: Timestamp) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn create(&self, conversation: Conversation) -> Result<Conversation, RepositoryError>;
    async fn find_by_id(
        &self,
        id: ConversationId,
    ) -> Result<Option<Conversation>, RepositoryError>;
    /// 查找两名用户之间的私聊会话，参数顺序无关。
    async fn find_direct(
        &self,
        a: UserId,
        b: UserId,
    ) -> Result<Option<Conversation>, RepositoryError>;
    /// 列出用户参与的全部会话，按最近活跃时间倒序。
    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Conversation>, RepositoryError>;
    async fn record_message(
        &self,
        id: ConversationId,
        message_id: MessageId,
        at: Timestamp,
    ) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn create(&self, message: Message) -> Result<Message, RepositoryError>;
    async fn find_by_id(&self, id: MessageId) -> Result<Option<Message>, RepositoryError>;
    /// 按页获取会话消息，页码从 1 开始，返回结果按时间正序。
    async fn list_page(
        &self,
        conversation_id: ConversationId,
        page: u32,
        limit: u32,
    ) -> Result<Vec<Message>, RepositoryError>;
    /// 将会话中非 reader 发送的未读消息标记为已读，返回受影响的条数。
    async fn mark_read(
        &self,
        conversation_id: ConversationId,
        reader: UserId,
    ) -> Result<u64, RepositoryError>;
}
