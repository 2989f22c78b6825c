use std::sync::Arc;

use domain::{
    ConnectionId, Conversation, ConversationId, DomainError, Message, MessageContent, MessageId,
    RepositoryError, UserId,
};
use uuid::Uuid;

use crate::{
    broadcaster::{ChatBroadcast, EventBroadcaster},
    clock::Clock,
    dedupe::SendDeduplicator,
    dto::{ConversationDto, MessageDto, MessagePage, UserDto},
    error::ApplicationError,
    events::ServerEvent,
    presence::PresenceRegistry,
    repository::{ConversationRepository, MessageRepository, UserRepository},
};

#[derive(Debug, Clone)]
pub struct OpenConversationRequest {
    pub requester: Uuid,
    pub other_user_id: Uuid,
}

#[derive(Debug, Clone)]
pub struct SendMessageRequest {
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    /// 发出这条消息的连接，确认事件只回给它。
    pub origin: ConnectionId,
    /// 客户端为乐观渲染生成的临时标识，同时用于重发去重。
    pub client_msg_id: String,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct HistoryRequest {
    pub requester: Uuid,
    pub conversation_id: Uuid,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct MarkReadRequest {
    pub requester: Uuid,
    pub conversation_id: Uuid,
}

#[derive(Debug, Clone)]
pub struct TypingRequest {
    pub conversation_id: Uuid,
    pub user_id: Uuid,
    pub origin: ConnectionId,
    pub is_typing: bool,
}

const DEFAULT_PAGE_SIZE: u32 = 50;
const MAX_PAGE_SIZE: u32 = 100;

pub struct ChatServiceDependencies {
    pub conversation_repository: Arc<dyn ConversationRepository>,
    pub message_repository: Arc<dyn MessageRepository>,
    pub user_repository: Arc<dyn UserRepository>,
    pub clock: Arc<dyn Clock>,
    pub broadcaster: Arc<dyn EventBroadcaster>,
    pub presence: Arc<dyn PresenceRegistry>,
    pub deduplicator: Arc<dyn SendDeduplicator>,
}

/// 会话与消息中继用例。
pub struct ChatService {
    deps: ChatServiceDependencies,
}

impl ChatService {
    pub fn new(deps: ChatServiceDependencies) -> Self {
        Self { deps }
    }

    // 成员检查：所有读写会话内容的入口都先走这里。
    async fn check_participant(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<Conversation, ApplicationError> {
        let conversation = self
            .deps
            .conversation_repository
            .find_by_id(conversation_id)
            .await?
            .ok_or(DomainError::ConversationNotFound)?;

        if !conversation.is_participant(user_id) {
            return Err(DomainError::NotAParticipant.into());
        }
        Ok(conversation)
    }

    /// 供连接层在 join 时做成员校验。
    pub async fn ensure_participant(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<(), ApplicationError> {
        self.check_participant(ConversationId::from(conversation_id), UserId::from(user_id))
            .await?;
        Ok(())
    }

    /// 打开与另一名用户的私聊会话，不存在则创建。
    ///
    /// 新建成功时向对方的所有连接推送 `ConversationStarted`，
    /// 这样对方无需刷新就能看到新会话出现在列表里。
    pub async fn open_direct_conversation(
        &self,
        request: OpenConversationRequest,
    ) -> Result<ConversationDto, ApplicationError> {
        let requester = UserId::from(request.requester);
        let other = UserId::from(request.other_user_id);
        if requester == other {
            return Err(DomainError::SelfConversation.into());
        }

        self.deps
            .user_repository
            .find_by_id(other)
            .await?
            .ok_or(DomainError::UserNotFound)?;

        if let Some(existing) = self
            .deps
            .conversation_repository
            .find_direct(requester, other)
            .await?
        {
            return self.hydrate(&existing).await;
        }

        let now = self.deps.clock.now();
        let conversation =
            Conversation::direct(ConversationId::from(Uuid::new_v4()), requester, other, now)?;

        let (stored, is_new) = match self.deps.conversation_repository.create(conversation).await {
            Ok(created) => (created, true),
            // 双方同时发起时只有一方能建表成功，输的一方读回赢家的记录。
            Err(RepositoryError::Conflict) => {
                let existing = self
                    .deps
                    .conversation_repository
                    .find_direct(requester, other)
                    .await?
                    .ok_or(DomainError::ConversationNotFound)?;
                (existing, false)
            }
            Err(err) => return Err(err.into()),
        };

        let dto = self.hydrate(&stored).await?;
        if is_new {
            let event = ServerEvent::ConversationStarted {
                conversation: dto.clone(),
            };
            self.deps
                .broadcaster
                .broadcast(ChatBroadcast::to_users(
                    stored.other_participants(requester),
                    event,
                ))
                .await?;
        }
        Ok(dto)
    }

    /// 用户参与的全部会话，按最近活跃时间倒序。
    pub async fn list_conversations(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<ConversationDto>, ApplicationError> {
        let conversations = self
            .deps
            .conversation_repository
            .list_for_user(UserId::from(user_id))
            .await?;

        let mut result = Vec::with_capacity(conversations.len());
        for conversation in &conversations {
            result.push(self.hydrate(conversation).await?);
        }
        Ok(result)
    }

    pub async fn send_message(
        &self,
        request: SendMessageRequest,
    ) -> Result<MessageDto, ApplicationError> {
        let conversation_id = ConversationId::from(request.conversation_id);
        let sender_id = UserId::from(request.sender_id);
        let conversation = self.check_participant(conversation_id, sender_id).await?;

        // 重发的消息只补发确认，不再落库、不再投递。
        if let Some(existing_id) = self
            .deps
            .deduplicator
            .check(sender_id, &request.client_msg_id)
            .await?
        {
            let stored = self
                .deps
                .message_repository
                .find_by_id(existing_id)
                .await?
                .ok_or(DomainError::MessageNotFound)?;
            self.ack(&request.client_msg_id, &stored, request.origin)
                .await?;
            return Ok(MessageDto::from(&stored));
        }

        let content = MessageContent::new(request.content)?;
        let now = self.deps.clock.now();
        let message = Message::new(
            MessageId::from(Uuid::new_v4()),
            conversation_id,
            sender_id,
            content,
            now,
        );

        let stored = self.deps.message_repository.create(message).await?;
        self.deps
            .conversation_repository
            .record_message(conversation_id, stored.id, stored.sent_at)
            .await?;
        self.deps
            .deduplicator
            .record(sender_id, &request.client_msg_id, stored.id, stored.sent_at)
            .await?;

        let dto = MessageDto::from(&stored);
        let deliver = ChatBroadcast::to_users(
            conversation.other_participants(sender_id),
            ServerEvent::MessageReceived {
                message: dto.clone(),
            },
        );
        if let Err(broadcast_error) = self.deps.broadcaster.broadcast(deliver).await {
            // 记录关键错误并传播给调用者
            tracing::error!(
                conversation_id = %conversation_id,
                message_id = %stored.id,
                error = %broadcast_error,
                "消息已保存到数据库，但广播失败"
            );
            return Err(ApplicationError::infrastructure("消息广播失败"));
        }

        self.ack(&request.client_msg_id, &stored, request.origin)
            .await?;
        Ok(dto)
    }

    /// 发送确认只回给发出消息的那个连接，
    /// 客户端据此把乐观渲染的临时消息换成服务端版本。
    async fn ack(
        &self,
        client_msg_id: &str,
        message: &Message,
        origin: ConnectionId,
    ) -> Result<(), ApplicationError> {
        let event = ServerEvent::MessageAccepted {
            client_msg_id: client_msg_id.to_owned(),
            message_id: Uuid::from(message.id),
            sent_at: message.sent_at,
        };
        self.deps
            .broadcaster
            .broadcast(ChatBroadcast::to_connection(origin, event))
            .await?;
        Ok(())
    }

    pub async fn get_history(
        &self,
        request: HistoryRequest,
    ) -> Result<MessagePage, ApplicationError> {
        let conversation_id = ConversationId::from(request.conversation_id);
        self.check_participant(conversation_id, UserId::from(request.requester))
            .await?;

        let page = request.page.unwrap_or(1).max(1);
        let limit = request
            .limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);

        let messages = self
            .deps
            .message_repository
            .list_page(conversation_id, page, limit)
            .await?;

        // 取满一页说明可能还有更早的消息。
        let has_more = messages.len() as u32 == limit;
        Ok(MessagePage {
            messages: messages.iter().map(MessageDto::from).collect(),
            has_more,
        })
    }

    /// 把会话里对方发来的未读消息全部置为已读，返回条数。
    pub async fn mark_read(&self, request: MarkReadRequest) -> Result<u64, ApplicationError> {
        let conversation_id = ConversationId::from(request.conversation_id);
        let reader = UserId::from(request.requester);
        self.check_participant(conversation_id, reader).await?;

        let updated = self
            .deps
            .message_repository
            .mark_read(conversation_id, reader)
            .await?;
        Ok(updated)
    }

    /// 输入状态纯转发，不落库：投给打开了该会话的其他连接。
    pub async fn handle_typing(&self, request: TypingRequest) -> Result<(), ApplicationError> {
        let conversation_id = ConversationId::from(request.conversation_id);
        self.check_participant(conversation_id, UserId::from(request.user_id))
            .await?;

        let event = ServerEvent::Typing {
            conversation_id: request.conversation_id,
            user_id: request.user_id,
            is_typing: request.is_typing,
        };
        self.deps
            .broadcaster
            .broadcast(ChatBroadcast::to_conversation(
                conversation_id,
                Some(request.origin),
                event,
            ))
            .await?;
        Ok(())
    }

    /// 连接建立时登记在线状态；首个连接触发全员在线名单推送。
    pub async fn register_connection(
        &self,
        user_id: UserId,
        connection_id: ConnectionId,
    ) -> Result<(), ApplicationError> {
        let came_online = self.deps.presence.connect(user_id, connection_id).await?;
        if came_online {
            self.broadcast_online_users().await?;
        }
        Ok(())
    }

    /// 连接断开时注销；最后一个连接断开才算离线，
    /// 此时记下最后在线时间并推送新的在线名单。
    pub async fn release_connection(
        &self,
        user_id: UserId,
        connection_id: ConnectionId,
    ) -> Result<(), ApplicationError> {
        let went_offline = self
            .deps
            .presence
            .disconnect(user_id, connection_id)
            .await?;
        if went_offline {
            if let Err(err) = self
                .deps
                .user_repository
                .touch_last_seen(user_id, self.deps.clock.now())
                .await
            {
                // 下线流程不因此中断，名单还是要推。
                tracing::warn!(user_id = %user_id, error = ?err, "断线时更新 last_seen 失败");
            }
            self.broadcast_online_users().await?;
        }
        Ok(())
    }

    async fn broadcast_online_users(&self) -> Result<(), ApplicationError> {
        let users = self.deps.presence.online_users().await?;
        let event = ServerEvent::OnlineUsers {
            users: users.into_iter().map(Uuid::from).collect(),
        };
        self.deps
            .broadcaster
            .broadcast(ChatBroadcast::to_all(event))
            .await?;
        Ok(())
    }

    async fn hydrate(
        &self,
        conversation: &Conversation,
    ) -> Result<ConversationDto, ApplicationError> {
        let mut participants = Vec::with_capacity(conversation.participants.len());
        for user_id in &conversation.participants {
            let user = self
                .deps
                .user_repository
                .find_by_id(*user_id)
                .await?
                .ok_or(DomainError::UserNotFound)?;
            participants.push(UserDto::from(&user));
        }

        let last_message = match conversation.last_message_id {
            Some(message_id) => self
                .deps
                .message_repository
                .find_by_id(message_id)
                .await?
                .as_ref()
                .map(MessageDto::from),
            None => None,
        };

        Ok(ConversationDto {
            id: Uuid::from(conversation.id),
            participants,
            last_message,
            created_at: conversation.created_at,
            last_activity: conversation.last_activity,
        })
    }
}
