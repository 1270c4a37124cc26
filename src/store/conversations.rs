use chrono::{DateTime, Utc};

use crate::models::{Conversation, Message};

/// The conversation list as the client knows it, newest activity first.
#[derive(Debug, Clone, Default)]
pub struct ConversationDirectory {
    conversations: Vec<Conversation>,
}

impl ConversationDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace(&mut self, conversations: Vec<Conversation>) {
        self.conversations = conversations;
        self.sort();
    }

    /// Inserts or replaces by id.
    pub fn upsert(&mut self, conversation: Conversation) {
        match self.conversations.iter_mut().find(|c| c.id == conversation.id) {
            Some(existing) => *existing = conversation,
            None => self.conversations.push(conversation),
        }
        self.sort();
    }

    pub fn get(&self, id: &str) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == id)
    }

    pub fn list(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn ids(&self) -> Vec<String> {
        self.conversations.iter().map(|c| c.id.clone()).collect()
    }

    pub fn unread_count(&self) -> usize {
        self.conversations.iter().filter(|c| c.has_unread && !c.is_muted).count()
    }

    /// Bumps `last_message_at` and, unless the message was read on arrival,
    /// flags the conversation unread. Returns `false` for unknown conversations.
    pub fn record_message(&mut self, message: &Message, read_on_arrival: bool) -> bool {
        let Some(conversation) = self.conversations.iter_mut().find(|c| c.id == message.conversation_id) else {
            return false;
        };
        if conversation.last_message_at.is_none_or(|at| at < message.created_at) {
            conversation.last_message_at = Some(message.created_at);
        }
        if read_on_arrival {
            conversation.last_read_at = Some(message.created_at);
        } else {
            conversation.has_unread = true;
        }
        self.sort();
        true
    }

    pub fn mark_read(&mut self, id: &str, at: DateTime<Utc>) -> bool {
        match self.conversations.iter_mut().find(|c| c.id == id) {
            Some(conversation) => {
                conversation.has_unread = false;
                conversation.last_read_at = Some(at);
                true
            }
            None => false,
        }
    }

    pub fn set_muted(&mut self, id: &str, muted: bool) -> bool {
        match self.conversations.iter_mut().find(|c| c.id == id) {
            Some(conversation) => {
                conversation.is_muted = muted;
                true
            }
            None => false,
        }
    }

    fn sort(&mut self) {
        // Conversations without activity sink to the bottom.
        self.conversations
            .sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
    }
}
