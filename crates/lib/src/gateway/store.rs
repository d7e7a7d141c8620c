//! Document store: known users and the chats recorded for them.
//!
//! One document per user, `{ user, data: [{ chatId, title?, chats: [{ prompt, content }] }] }`.
//! `JsonChatStore` keeps everything in memory and, when given a path, rewrites a pretty
//! JSON file after every change.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// Seeded when the user collection is empty.
pub const DEFAULT_USER: &str = "user@example.com";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// One prompt and the assistant's final answer to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatExchange {
    pub prompt: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedChat {
    pub chat_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub chats: Vec<ChatExchange>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserChats {
    pub user: String,
    #[serde(default)]
    pub data: Vec<SavedChat>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreDocument {
    #[serde(default)]
    users: Vec<UserRecord>,
    #[serde(default)]
    chats: Vec<UserChats>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no saved chats")]
    NotFound,
    #[error("store io: {0}")]
    Io(#[from] std::io::Error),
    #[error("store encoding: {0}")]
    Encode(#[from] serde_json::Error),
}

#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn find_user(&self, email: &str) -> Option<UserRecord>;

    /// Registers a user. Returns false when the email is already known.
    async fn add_user(&self, user: UserRecord) -> Result<bool, StoreError>;

    /// Appends an exchange to the user's chat, creating either as needed. A title, when
    /// given, replaces the stored one.
    async fn record_exchange(
        &self,
        user: &str,
        chat_id: &str,
        title: Option<&str>,
        exchange: ChatExchange,
    ) -> Result<(), StoreError>;

    /// All of the user's chats, or just `chat_id`. `NotFound` when nothing matches.
    async fn saved_chats(&self, user: &str, chat_id: Option<&str>) -> Result<Vec<SavedChat>, StoreError>;

    /// Removes every chat of the user; returns how many were removed.
    async fn delete_all(&self, user: &str) -> Result<usize, StoreError>;
}

pub struct JsonChatStore {
    path: Option<PathBuf>,
    doc: RwLock<StoreDocument>,
}

impl JsonChatStore {
    /// Load store from path; if the file is missing it starts empty. A corrupt file is an error.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let doc = match tokio::fs::read_to_string(&path).await {
            Ok(s) => serde_json::from_str(&s)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreDocument::default(),
            Err(e) => return Err(e.into()),
        };
        let store = Self {
            path: Some(path),
            doc: RwLock::new(doc),
        };
        store.seed_default_user().await?;
        Ok(store)
    }

    /// Store that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            doc: RwLock::new(StoreDocument {
                users: vec![UserRecord {
                    email: DEFAULT_USER.to_string(),
                    name: None,
                }],
                chats: Vec::new(),
            }),
        }
    }

    async fn seed_default_user(&self) -> Result<(), StoreError> {
        let mut doc = self.doc.write().await;
        if !doc.users.is_empty() {
            return Ok(());
        }
        log::info!("store: no users, seeding {}", DEFAULT_USER);
        doc.users.push(UserRecord {
            email: DEFAULT_USER.to_string(),
            name: None,
        });
        self.save(&doc).await
    }

    /// Merges users added to the file by another process (`becky token`).
    async fn reload_users(&self) {
        let Some(path) = &self.path else {
            return;
        };
        let on_disk: StoreDocument = match tokio::fs::read_to_string(path).await {
            Ok(s) => match serde_json::from_str(&s) {
                Ok(doc) => doc,
                Err(e) => {
                    log::warn!("store: {} is not readable JSON: {}", path.display(), e);
                    return;
                }
            },
            Err(_) => return,
        };
        let mut doc = self.doc.write().await;
        for user in on_disk.users {
            if !doc.users.iter().any(|u| u.email.eq_ignore_ascii_case(&user.email)) {
                log::info!("store: picked up user {} from disk", user.email);
                doc.users.push(user);
            }
        }
    }

    async fn save(&self, doc: &StoreDocument) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(doc)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, json).await?;
        Ok(())
    }
}

#[async_trait]
impl ChatStore for JsonChatStore {
    async fn find_user(&self, email: &str) -> Option<UserRecord> {
        {
            let doc = self.doc.read().await;
            if let Some(user) = doc.users.iter().find(|u| u.email.eq_ignore_ascii_case(email)) {
                return Some(user.clone());
            }
        }
        self.reload_users().await;
        let doc = self.doc.read().await;
        doc.users
            .iter()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned()
    }

    async fn add_user(&self, user: UserRecord) -> Result<bool, StoreError> {
        let mut doc = self.doc.write().await;
        if doc.users.iter().any(|u| u.email.eq_ignore_ascii_case(&user.email)) {
            return Ok(false);
        }
        doc.users.push(user);
        self.save(&doc).await?;
        Ok(true)
    }

    async fn record_exchange(
        &self,
        user: &str,
        chat_id: &str,
        title: Option<&str>,
        exchange: ChatExchange,
    ) -> Result<(), StoreError> {
        let mut doc = self.doc.write().await;
        let index = match doc.chats.iter().position(|c| c.user == user) {
            Some(i) => i,
            None => {
                doc.chats.push(UserChats {
                    user: user.to_string(),
                    data: Vec::new(),
                });
                doc.chats.len() - 1
            }
        };
        let data = &mut doc.chats[index].data;
        let chat = match data.iter().position(|c| c.chat_id == chat_id) {
            Some(i) => &mut data[i],
            None => {
                data.push(SavedChat {
                    chat_id: chat_id.to_string(),
                    title: None,
                    chats: Vec::new(),
                });
                let last = data.len() - 1;
                &mut data[last]
            }
        };
        if let Some(title) = title {
            chat.title = Some(title.to_string());
        }
        chat.chats.push(exchange);
        self.save(&doc).await
    }

    async fn saved_chats(&self, user: &str, chat_id: Option<&str>) -> Result<Vec<SavedChat>, StoreError> {
        let doc = self.doc.read().await;
        let chats: Vec<SavedChat> = doc
            .chats
            .iter()
            .filter(|c| c.user == user)
            .flat_map(|c| c.data.iter())
            .filter(|c| chat_id.map_or(true, |id| c.chat_id == id))
            .cloned()
            .collect();
        if chats.is_empty() {
            return Err(StoreError::NotFound);
        }
        Ok(chats)
    }

    async fn delete_all(&self, user: &str) -> Result<usize, StoreError> {
        let mut doc = self.doc.write().await;
        let removed: usize = doc
            .chats
            .iter()
            .filter(|c| c.user == user)
            .map(|c| c.data.len())
            .sum();
        doc.chats.retain(|c| c.user != user);
        self.save(&doc).await?;
        Ok(removed)
    }
}
