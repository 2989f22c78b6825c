use crate::value_objects::{ConversationId, MessageContent, MessageId, Timestamp, UserId};

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: MessageContent,
    pub sent_at: Timestamp,
    pub read: bool,
    pub edited: bool,
    pub edited_at: Option<Timestamp>,
}

impl Message {
    pub fn new(
        id: MessageId,
        conversation_id: ConversationId,
        sender_id: UserId,
        content: MessageContent,
        sent_at: Timestamp,
    ) -> Self {
        Self {
            id,
            conversation_id,
            sender_id,
            content,
            sent_at,
            read: false,
            edited: false,
            edited_at: None,
        }
    }

    pub fn mark_read(&mut self) {
        self.read = true;
    }

    pub fn edit(&mut self, new_content: MessageContent, at: Timestamp) {
        self.content = new_content;
        self.edited = true;
        self.edited_at = Some(at);
    }
}
