//! Chat session and message model for the client side.
//!
//! A session is the chat id plus its ordered messages. Messages are only appended or have
//! their content replaced in place; `router::SessionController` is the only mutator.

use serde::{Deserialize, Serialize};

use crate::render::{self, ThemeMode};

/// Opening assistant message of every new chat.
pub const GREETING: &str = "Hello, this is Becky, your Real Estate AI Assistant. How can I help you today? I can start by creating a new deal, or you can ask me about existing deals or what needs to be done for today";

/// Unique chat identifier (opaque string).
pub type ChatId = String;

pub fn new_chat_id() -> ChatId {
    uuid::Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Assistant,
}

/// A file shown next to a message: display name and a locally resolved URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub content: String,
    pub sender: Sender,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl Message {
    pub fn user(content: impl Into<String>, attachments: Vec<Attachment>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content: content.into(),
            sender: Sender::User,
            attachments,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content: content.into(),
            sender: Sender::Assistant,
            attachments: Vec::new(),
        }
    }

    pub fn greeting() -> Self {
        Self::assistant(GREETING)
    }

    pub fn is_user(&self) -> bool {
        self.sender == Sender::User
    }
}

/// One entry of a stored conversation as the inference service returns it.
/// `role` is `human` for the user; anything else is the assistant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub role: String,
    #[serde(default)]
    pub content: String,
}

impl HistoryMessage {
    /// Display message; assistant templates are expanded for `mode`.
    pub fn into_message(self, mode: ThemeMode) -> Message {
        if self.role == "human" {
            Message::user(self.content, Vec::new())
        } else {
            Message::assistant(render::display_text(&self.content, mode))
        }
    }
}

/// Entry of the chat list: `{id, title}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSummary {
    pub id: String,
    #[serde(default)]
    pub title: String,
}

/// The active chat as the UI sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatSession {
    pub chat_id: ChatId,
    pub messages: Vec<Message>,
    pub title: Option<String>,
    pub loading: bool,
}

impl ChatSession {
    /// Fresh chat: new id, greeting only.
    pub fn new() -> Self {
        Self::with_id(new_chat_id(), vec![Message::greeting()])
    }

    pub fn with_id(chat_id: impl Into<ChatId>, messages: Vec<Message>) -> Self {
        Self {
            chat_id: chat_id.into(),
            messages,
            title: None,
            loading: false,
        }
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_starts_with_greeting() {
        let s = ChatSession::new();
        assert_eq!(s.messages.len(), 1);
        assert_eq!(s.messages[0].content, GREETING);
        assert_eq!(s.messages[0].sender, Sender::Assistant);
        assert!(!s.loading);
        assert!(s.title.is_none());
        assert_ne!(ChatSession::new().chat_id, s.chat_id);
    }

    #[test]
    fn history_role_human_is_user() {
        let user = HistoryMessage { role: "human".into(), content: "hi".into() }
            .into_message(ThemeMode::Light);
        let bot = HistoryMessage { role: "ai".into(), content: "hello".into() }
            .into_message(ThemeMode::Light);
        assert!(user.is_user());
        assert!(user.attachments.is_empty());
        assert_eq!(bot.sender, Sender::Assistant);
        assert_eq!(bot.content, "hello");
    }

    #[test]
    fn history_expands_templates_for_assistant_only() {
        let tpl = r#"@@@{"template":"html_dashboard","data":{"active_deals":1,"less_than_2_days_deals":0,"closed_deals":2}}"#;
        let bot = HistoryMessage { role: "ai".into(), content: tpl.into() }
            .into_message(ThemeMode::Dark);
        assert!(bot.content.starts_with("<div"));
        let user = HistoryMessage { role: "human".into(), content: tpl.into() }
            .into_message(ThemeMode::Dark);
        assert_eq!(user.content, tpl);
    }

    #[test]
    fn message_serializes_sender_lowercase() {
        let m = Message::user("x", vec![Attachment { name: "a.pdf".into(), url: "file:///a.pdf".into() }]);
        let v = serde_json::to_value(&m).unwrap();
        assert_eq!(v["sender"], "user");
        assert_eq!(v["attachments"][0]["name"], "a.pdf");
    }
}
