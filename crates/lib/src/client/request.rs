//! Outbound turn requests: the multipart body that opens a turn and the optimistic user
//! message shown while it runs.

use std::path::{Path, PathBuf};

use crate::forms::FormSubmission;
use crate::session::{Attachment, Message};

#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("message is empty and no files are attached")]
    Empty,
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid attachment {0}")]
    Attachment(#[from] reqwest::Error),
}

/// A file attached to a turn, loaded in memory.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundFile {
    pub name: String,
    pub mime: Option<String>,
    pub data: Vec<u8>,
    /// Local URL used for preview in the message list.
    pub url: String,
}

impl OutboundFile {
    pub fn from_bytes(name: impl Into<String>, mime: Option<String>, data: Vec<u8>) -> Self {
        let name = name.into();
        let url = format!("attachment:{}", name);
        Self {
            mime: mime.or_else(|| guess_mime(&name)),
            name,
            data,
            url,
        }
    }

    /// Reads a local file; the preview URL is its `file://` URL.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, RequestError> {
        let path = path.as_ref();
        let read_err = |source| RequestError::Read {
            path: path.to_path_buf(),
            source,
        };
        let data = tokio::fs::read(path).await.map_err(read_err)?;
        let absolute = tokio::fs::canonicalize(path).await.map_err(read_err)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        let url = reqwest::Url::from_file_path(&absolute)
            .map(String::from)
            .unwrap_or_else(|_| absolute.display().to_string());
        Ok(Self {
            mime: guess_mime(&name),
            name,
            data,
            url,
        })
    }

    pub fn attachment(&self) -> Attachment {
        Attachment {
            name: self.name.clone(),
            url: self.url.clone(),
        }
    }
}

fn guess_mime(name: &str) -> Option<String> {
    mime_guess::from_path(name).first_raw().map(str::to_string)
}

/// Everything needed to open one turn.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundRequest {
    /// Sent upstream as `message`.
    pub message: String,
    /// Shown as the user's message.
    pub display: String,
    pub chat_id: String,
    pub auth_token: Option<String>,
    pub files: Vec<OutboundFile>,
}

impl OutboundRequest {
    /// Free text turn. Attached file names are appended to the text.
    pub fn text(
        text: impl Into<String>,
        files: Vec<OutboundFile>,
        chat_id: impl Into<String>,
        auth_token: Option<String>,
    ) -> Result<Self, RequestError> {
        let mut text = text.into();
        if text.trim().is_empty() && files.is_empty() {
            return Err(RequestError::Empty);
        }
        if !files.is_empty() {
            let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
            text.push_str("\nUploaded filename: ");
            text.push_str(&names.join("\n"));
        }
        Ok(Self {
            display: text.clone(),
            message: text,
            chat_id: chat_id.into(),
            auth_token,
            files,
        })
    }

    /// Completed form: the wire carries the tagged document, the display its summary.
    pub fn form(submission: &FormSubmission, chat_id: impl Into<String>, auth_token: Option<String>) -> Self {
        Self {
            message: submission.wire_message(),
            display: submission.summary_markdown(),
            chat_id: chat_id.into(),
            auth_token,
            files: Vec::new(),
        }
    }

    pub fn optimistic_message(&self) -> Message {
        Message::user(
            self.display.clone(),
            self.files.iter().map(OutboundFile::attachment).collect(),
        )
    }

    pub fn into_multipart(self) -> Result<reqwest::multipart::Form, RequestError> {
        let mut form = reqwest::multipart::Form::new()
            .text("message", self.message)
            .text("chatId", self.chat_id)
            .text("auth_token", self.auth_token.unwrap_or_default());
        for file in self.files {
            let mut part = reqwest::multipart::Part::bytes(file.data).file_name(file.name);
            if let Some(mime) = file.mime {
                part = part.mime_str(&mime)?;
            }
            form = form.part("files", part);
        }
        Ok(form)
    }
}
