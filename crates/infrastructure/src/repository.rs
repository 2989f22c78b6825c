use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use uuid::Uuid;

use application::repository::{ConversationRepository, MessageRepository, UserRepository};
use domain::{
    Conversation, ConversationId, Message, MessageContent, MessageId, RepositoryError, Timestamp,
    User, UserId, Username,
};

fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    match &err {
        // 唯一约束冲突单独映射，调用方靠它识别 get-or-create 竞争
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => RepositoryError::Conflict,
        sqlx::Error::RowNotFound => RepositoryError::NotFound,
        _ => RepositoryError::storage(err.to_string()),
    }
}

fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::storage(message)
}

/// 由排序后的参与者 ID 拼出会话的唯一键，同一对用户只对应一个键。
fn direct_key(a: UserId, b: UserId) -> String {
    let mut ids = [Uuid::from(a), Uuid::from(b)];
    ids.sort();
    format!("{}:{}", ids[0], ids[1])
}

#[derive(Debug, FromRow)]
struct UserRecord {
    id: Uuid,
    username: String,
    display_name: String,
    bio: String,
    avatar_url: String,
    password_hash: String,
    last_seen: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<UserRecord> for User {
    type Error = RepositoryError;

    fn try_from(value: UserRecord) -> Result<Self, Self::Error> {
        let username =
            domain::Username::parse(value.username).map_err(|err| invalid_data(err.to_string()))?;
        let display_name = domain::DisplayName::parse(value.display_name)
            .map_err(|err| invalid_data(err.to_string()))?;
        let password = domain::PasswordHash::new(value.password_hash)
            .map_err(|err| invalid_data(err.to_string()))?;

        Ok(User {
            id: UserId::from(value.id),
            username,
            display_name,
            bio: value.bio,
            avatar_url: value.avatar_url,
            password,
            last_seen: value.last_seen,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct ConversationRecord {
    id: Uuid,
    last_message_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    participants: Vec<Uuid>,
}

impl TryFrom<ConversationRecord> for Conversation {
    type Error = RepositoryError;

    fn try_from(value: ConversationRecord) -> Result<Self, Self::Error> {
        if value.participants.len() < 2 {
            return Err(invalid_data("conversation has fewer than two participants"));
        }
        Ok(Conversation {
            id: ConversationId::from(value.id),
            participants: value.participants.into_iter().map(UserId::from).collect(),
            last_message_id: value.last_message_id.map(MessageId::from),
            created_at: value.created_at,
            last_activity: value.last_activity,
        })
    }
}

#[derive(Debug, FromRow)]
struct MessageRecord {
    id: Uuid,
    conversation_id: Uuid,
    sender_id: Uuid,
    content: String,
    sent_at: DateTime<Utc>,
    read: bool,
    edited: bool,
    edited_at: Option<DateTime<Utc>>,
}

impl TryFrom<MessageRecord> for Message {
    type Error = RepositoryError;

    fn try_from(value: MessageRecord) -> Result<Self, Self::Error> {
        let content =
            MessageContent::new(value.content).map_err(|err| invalid_data(err.to_string()))?;
        Ok(Message {
            id: MessageId::from(value.id),
            conversation_id: ConversationId::from(value.conversation_id),
            sender_id: UserId::from(value.sender_id),
            content,
            sent_at: value.sent_at,
            read: value.read,
            edited: value.edited,
            edited_at: value.edited_at,
        })
    }
}

const USER_COLUMNS: &str =
    "id, username, display_name, bio, avatar_url, password_hash, last_seen, created_at, updated_at";

#[derive(Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn create(&self, user: User) -> Result<User, RepositoryError> {
        let record = sqlx::query_as::<_, UserRecord>(
            r#"
            INSERT INTO users (id, username, display_name, bio, avatar_url, password_hash, last_seen, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id, username, display_name, bio, avatar_url, password_hash, last_seen, created_at, updated_at
            "#,
        )
        .bind(Uuid::from(user.id))
        .bind(user.username.as_str())
        .bind(user.display_name.as_str())
        .bind(&user.bio)
        .bind(&user.avatar_url)
        .bind(user.password.as_str())
        .bind(user.last_seen)
        .bind(user.created_at)
        .bind(user.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        User::try_from(record)
    }

    async fn update(&self, user: User) -> Result<User, RepositoryError> {
        let record = sqlx::query_as::<_, UserRecord>(
            r#"
            UPDATE users
            SET username = $2, display_name = $3, bio = $4, avatar_url = $5,
                password_hash = $6, last_seen = $7, updated_at = $8
            WHERE id = $1
            RETURNING id, username, display_name, bio, avatar_url, password_hash, last_seen, created_at, updated_at
            "#,
        )
        .bind(Uuid::from(user.id))
        .bind(user.username.as_str())
        .bind(user.display_name.as_str())
        .bind(&user.bio)
        .bind(&user.avatar_url)
        .bind(user.password.as_str())
        .bind(user.last_seen)
        .bind(user.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        User::try_from(record)
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        let record = sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(User::try_from).transpose()
    }

    async fn find_by_username(&self, username: Username) -> Result<Option<User>, RepositoryError> {
        let record = sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = $1"
        ))
        .bind(username.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(User::try_from).transpose()
    }

    async fn search(
        &self,
        query: &str,
        exclude: UserId,
        limit: u32,
    ) -> Result<Vec<User>, RepositoryError> {
        let pattern = format!("%{}%", query.replace('%', "\\%").replace('_', "\\_"));
        let records = sqlx::query_as::<_, UserRecord>(&format!(
            r#"
            SELECT {USER_COLUMNS} FROM users
            WHERE (username ILIKE $1 OR display_name ILIKE $1) AND id <> $2
            ORDER BY username
            LIMIT $3
            "#
        ))
        .bind(pattern)
        .bind(Uuid::from(exclude))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        records.into_iter().map(User::try_from).collect()
    }

    async fn touch_last_seen(&self, id: UserId, at: Timestamp) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE users SET last_seen = $2 WHERE id = $1")
            .bind(Uuid::from(id))
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }
}

const CONVERSATION_COLUMNS: &str = "c.id, c.last_message_id, c.created_at, c.last_activity, \
    (SELECT array_agg(cp.user_id ORDER BY cp.user_id) \
     FROM conversation_participants cp WHERE cp.conversation_id = c.id) AS participants";

#[derive(Clone)]
pub struct PgConversationRepository {
    pool: PgPool,
}

impl PgConversationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConversationRepository for PgConversationRepository {
    async fn create(&self, conversation: Conversation) -> Result<Conversation, RepositoryError> {
        // 会话行和参与者行在同一事务里写入，
        // direct_key 的唯一约束把并发的 get-or-create 压成一行
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        let key = direct_key(conversation.participants[0], conversation.participants[1]);
        sqlx::query(
            r#"
            INSERT INTO conversations (id, direct_key, last_message_id, created_at, last_activity)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(Uuid::from(conversation.id))
        .bind(key)
        .bind(conversation.last_message_id.map(Uuid::from))
        .bind(conversation.created_at)
        .bind(conversation.last_activity)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        for participant in &conversation.participants {
            sqlx::query(
                r#"
                INSERT INTO conversation_participants (conversation_id, user_id, joined_at)
                VALUES ($1, $2, $3)
                "#,
            )
            .bind(Uuid::from(conversation.id))
            .bind(Uuid::from(*participant))
            .bind(conversation.created_at)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;
        }

        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(conversation)
    }

    async fn find_by_id(
        &self,
        id: ConversationId,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let record = sqlx::query_as::<_, ConversationRecord>(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations c WHERE c.id = $1"
        ))
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(Conversation::try_from).transpose()
    }

    async fn find_direct(
        &self,
        a: UserId,
        b: UserId,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let record = sqlx::query_as::<_, ConversationRecord>(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations c WHERE c.direct_key = $1"
        ))
        .bind(direct_key(a, b))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(Conversation::try_from).transpose()
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Conversation>, RepositoryError> {
        let records = sqlx::query_as::<_, ConversationRecord>(&format!(
            r#"
            SELECT {CONVERSATION_COLUMNS}
            FROM conversations c
            JOIN conversation_participants p ON p.conversation_id = c.id
            WHERE p.user_id = $1
            ORDER BY c.last_activity DESC
            "#
        ))
        .bind(Uuid::from(user_id))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        records.into_iter().map(Conversation::try_from).collect()
    }

    async fn record_message(
        &self,
        id: ConversationId,
        message_id: MessageId,
        at: Timestamp,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE conversations SET last_message_id = $2, last_activity = $3 WHERE id = $1",
        )
        .bind(Uuid::from(id))
        .bind(Uuid::from(message_id))
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }
}

const MESSAGE_COLUMNS: &str =
    "id, conversation_id, sender_id, content, sent_at, read, edited, edited_at";

#[derive(Clone)]
pub struct PgMessageRepository {
    pool: PgPool,
}

impl PgMessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageRepository for PgMessageRepository {
    async fn create(&self, message: Message) -> Result<Message, RepositoryError> {
        let record = sqlx::query_as::<_, MessageRecord>(
            r#"
            INSERT INTO messages (id, conversation_id, sender_id, content, sent_at, read, edited, edited_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id, conversation_id, sender_id, content, sent_at, read, edited, edited_at
            "#,
        )
        .bind(Uuid::from(message.id))
        .bind(Uuid::from(message.conversation_id))
        .bind(Uuid::from(message.sender_id))
        .bind(message.content.as_str())
        .bind(message.sent_at)
        .bind(message.read)
        .bind(message.edited)
        .bind(message.edited_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Message::try_from(record)
    }

    async fn find_by_id(&self, id: MessageId) -> Result<Option<Message>, RepositoryError> {
        let record = sqlx::query_as::<_, MessageRecord>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1"
        ))
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(Message::try_from).transpose()
    }

    async fn list_page(
        &self,
        conversation_id: ConversationId,
        page: u32,
        limit: u32,
    ) -> Result<Vec<Message>, RepositoryError> {
        let offset = (page.saturating_sub(1) as i64) * limit as i64;
        let records = sqlx::query_as::<_, MessageRecord>(&format!(
            r#"
            SELECT {MESSAGE_COLUMNS} FROM messages
            WHERE conversation_id = $1
            ORDER BY sent_at DESC
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(Uuid::from(conversation_id))
        .bind(limit as i64)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        // 查询按最新在前取页，页内翻回时间正序交给调用方直接渲染
        let mut items: Vec<Message> = records
            .into_iter()
            .map(Message::try_from)
            .collect::<Result<_, _>>()?;
        items.reverse();
        Ok(items)
    }

    async fn mark_read(
        &self,
        conversation_id: ConversationId,
        reader: UserId,
    ) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE messages SET read = TRUE
            WHERE conversation_id = $1 AND sender_id <> $2 AND read = FALSE
            "#,
        )
        .bind(Uuid::from(conversation_id))
        .bind(Uuid::from(reader))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(result.rows_affected())
    }
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}
