use crate::errors::DomainError;
use crate::value_objects::{ConversationId, MessageId, Timestamp, UserId};

/// 两名用户之间的私聊会话。
///
/// 参与者始终按升序存储，保证同一对用户对应唯一的会话。
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub participants: Vec<UserId>,
    pub last_message_id: Option<MessageId>,
    pub created_at: Timestamp,
    pub last_activity: Timestamp,
}

impl Conversation {
    pub fn direct(
        id: ConversationId,
        a: UserId,
        b: UserId,
        now: Timestamp,
    ) -> Result<Self, DomainError> {
        if a == b {
            return Err(DomainError::SelfConversation);
        }
        let mut participants = vec![a, b];
        participants.sort();
        Ok(Self {
            id,
            participants,
            last_message_id: None,
            created_at: now,
            last_activity: now,
        })
    }

    pub fn is_participant(&self, user_id: UserId) -> bool {
        self.participants.contains(&user_id)
    }

    /// 返回除指定用户外的其他参与者。
    pub fn other_participants(&self, user_id: UserId) -> Vec<UserId> {
        self.participants
            .iter()
            .copied()
            .filter(|id| *id != user_id)
            .collect()
    }

    pub fn record_message(&mut self, message_id: MessageId, at: Timestamp) {
        self.last_message_id = Some(message_id);
        self.last_activity = at;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn ts() -> Timestamp {
        chrono::Utc::now()
    }

    #[test]
    fn direct_conversation_sorts_participants() {
        let a = UserId::from(Uuid::new_v4());
        let b = UserId::from(Uuid::new_v4());
        let left = Conversation::direct(ConversationId::from(Uuid::new_v4()), a, b, ts()).unwrap();
        let right = Conversation::direct(ConversationId::from(Uuid::new_v4()), b, a, ts()).unwrap();
        assert_eq!(left.participants, right.participants);
    }

    #[test]
    fn direct_conversation_rejects_self_pairing() {
        let a = UserId::from(Uuid::new_v4());
        let result = Conversation::direct(ConversationId::from(Uuid::new_v4()), a, a, ts());
        assert_eq!(result.unwrap_err(), DomainError::SelfConversation);
    }

    #[test]
    fn record_message_updates_activity() {
        let a = UserId::from(Uuid::new_v4());
        let b = UserId::from(Uuid::new_v4());
        let created = ts();
        let mut conversation =
            Conversation::direct(ConversationId::from(Uuid::new_v4()), a, b, created).unwrap();

        let message_id = MessageId::from(Uuid::new_v4());
        let later = created + chrono::Duration::seconds(5);
        conversation.record_message(message_id, later);

        assert_eq!(conversation.last_message_id, Some(message_id));
        assert_eq!(conversation.last_activity, later);
    }
}
