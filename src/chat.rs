use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::document::Document;

pub const ANSWER_ERROR_TEXT: &str = "I'm sorry, I encountered an error while trying to answer your question. Please check your connection or API key.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    /// 毫秒时间戳
    pub timestamp: u128,
    pub is_audio_playing: bool,
}

impl ChatMessage {
    fn new(role: Role, content: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content,
            timestamp: now_millis(),
            is_audio_playing: false,
        }
    }
}

/// One conversation about one loaded document.
pub struct ChatSession {
    document: Document,
    messages: Vec<ChatMessage>,
}

impl ChatSession {
    pub fn new(document: Document) -> Self {
        let greeting = format!(
            "I've analyzed **{}** ({} pages). What would you like to know about it?",
            document.name, document.page_count
        );
        Self {
            document,
            messages: vec![ChatMessage::new(Role::Model, greeting)],
        }
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn push_user(&mut self, content: &str) -> &ChatMessage {
        self.push(Role::User, content.to_string())
    }

    pub fn push_model(&mut self, content: String) -> &ChatMessage {
        self.push(Role::Model, content)
    }

    fn push(&mut self, role: Role, content: String) -> &ChatMessage {
        self.messages.push(ChatMessage::new(role, content));
        &self.messages[self.messages.len() - 1]
    }

    /// Everything before the most recent user question, sent as prior turns.
    pub fn history_before_last(&self) -> &[ChatMessage] {
        match self.messages.iter().rposition(|m| m.role == Role::User) {
            Some(idx) => &self.messages[..idx],
            None => &self.messages,
        }
    }

    /// 1-based, as listed by `/history`
    pub fn message_by_index(&self, index: usize) -> Option<&ChatMessage> {
        index.checked_sub(1).and_then(|i| self.messages.get(i))
    }

    pub fn message_by_id(&self, id: &str) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn last_model_message(&self) -> Option<&ChatMessage> {
        self.messages.iter().rev().find(|m| m.role == Role::Model)
    }

    pub fn speaking(&self) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.is_audio_playing)
    }

    /// Flag exactly one message as being spoken.
    pub fn mark_speaking(&mut self, id: &str) {
        for m in &mut self.messages {
            m.is_audio_playing = m.id == id;
        }
    }

    pub fn clear_speaking(&mut self) {
        for m in &mut self.messages {
            m.is_audio_playing = false;
        }
    }
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}
