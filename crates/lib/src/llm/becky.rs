//! Becky AI inference service client (http://127.0.0.1:8000/api by default).
//! Chat turns are multipart uploads answered with a stream of JSON frames; stored
//! conversations and the chat list are plain JSON calls.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::session::{ChatSummary, HistoryMessage};

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000/api";

/// Bound on establishing the TCP connection; streamed bodies have no overall timeout.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for the inference service HTTP API.
#[derive(Clone)]
pub struct BeckyClient {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, thiserror::Error)]
pub enum BeckyError {
    #[error("becky request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("becky api error: {0}")]
    Api(String),
}

/// A file forwarded with a chat turn.
#[derive(Debug, Clone)]
pub struct UpstreamFile {
    pub name: String,
    pub mime: Option<String>,
    pub data: Vec<u8>,
}

/// One chat turn as forwarded upstream.
#[derive(Debug, Clone, Default)]
pub struct UpstreamChat {
    pub message: String,
    pub chat_id: String,
    pub auth_token: String,
    pub files: Vec<UpstreamFile>,
}

#[derive(Debug, Serialize)]
struct ChatRef<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    chat_id: Option<&'a str>,
    auth_token: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MessagesResponse {
    List(Vec<HistoryMessage>),
    Wrapped {
        #[serde(default, alias = "messages")]
        data: Vec<HistoryMessage>,
    },
}

#[derive(Debug, Deserialize)]
struct HistoryListResponse {
    #[serde(default)]
    history_list: Vec<HistoryEntry>,
}

#[derive(Debug, Deserialize)]
struct HistoryEntry {
    #[serde(alias = "chat_id")]
    id: Value,
    #[serde(default)]
    title: Option<String>,
}

impl BeckyClient {
    pub fn new(base_url: Option<String>) -> Self {
        Self::with_connect_timeout(base_url, CONNECT_TIMEOUT)
    }

    pub fn with_connect_timeout(base_url: Option<String>, connect_timeout: Duration) -> Self {
        let base_url = base_url
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let client = match reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
        {
            Ok(c) => c,
            Err(e) => {
                log::warn!("becky: http client build failed ({}), using defaults", e);
                reqwest::Client::new()
            }
        };
        Self { base_url, client }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// POST /chatbot. Returns the response as soon as headers arrive; the body is the frame stream.
    pub async fn open_chat_stream(&self, chat: UpstreamChat) -> Result<reqwest::Response, BeckyError> {
        let url = format!("{}/chatbot", self.base_url);
        let mut form = reqwest::multipart::Form::new()
            .text("message", chat.message)
            .text("chat_id", chat.chat_id)
            .text("auth_token", chat.auth_token);
        for file in chat.files {
            let mut part = reqwest::multipart::Part::bytes(file.data).file_name(file.name);
            if let Some(mime) = file.mime {
                part = part.mime_str(&mime)?;
            }
            form = form.part("files", part);
        }
        let res = self
            .client
            .post(&url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .multipart(form)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(BeckyError::Api(format!("{} {}", status, body)));
        }
        Ok(res)
    }

    /// POST /retrieve_messages: stored messages of one chat.
    pub async fn retrieve_messages(
        &self,
        chat_id: &str,
        auth_token: &str,
    ) -> Result<Vec<HistoryMessage>, BeckyError> {
        let body = ChatRef {
            chat_id: Some(chat_id),
            auth_token,
        };
        let data: MessagesResponse = self.post_json("retrieve_messages", &body).await?;
        Ok(match data {
            MessagesResponse::List(list) => list,
            MessagesResponse::Wrapped { data } => data,
        })
    }

    /// POST /history_list: the caller's chats, newest first as the service orders them.
    pub async fn history_list(&self, auth_token: &str) -> Result<Vec<ChatSummary>, BeckyError> {
        let body = ChatRef {
            chat_id: None,
            auth_token,
        };
        let data: HistoryListResponse = self.post_json("history_list", &body).await?;
        Ok(data
            .history_list
            .into_iter()
            .map(|e| ChatSummary {
                id: match e.id {
                    Value::String(s) => s,
                    other => other.to_string(),
                },
                title: e.title.unwrap_or_default(),
            })
            .collect())
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, BeckyError>
    where
        B: Serialize + ?Sized,
        T: serde::de::DeserializeOwned,
    {
        let url = format!("{}/{}", self.base_url, path);
        let res = self
            .client
            .post(&url)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(body)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(BeckyError::Api(format!("{} {}", status, body)));
        }
        Ok(res.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_trimmed() {
        let c = BeckyClient::new(Some("http://becky.local/api/".into()));
        assert_eq!(c.base_url(), "http://becky.local/api");
        assert_eq!(BeckyClient::new(None).base_url(), DEFAULT_BASE_URL);
    }

    #[test]
    fn messages_response_accepts_list_or_wrapper() {
        let list: MessagesResponse =
            serde_json::from_str(r#"[{"role":"human","content":"hi"}]"#).unwrap();
        assert!(matches!(list, MessagesResponse::List(ref v) if v.len() == 1));
        let wrapped: MessagesResponse =
            serde_json::from_str(r#"{"messages":[{"role":"ai","content":"yo"}]}"#).unwrap();
        assert!(matches!(wrapped, MessagesResponse::Wrapped { ref data } if data[0].role == "ai"));
    }

    #[test]
    fn history_entries_accept_numeric_or_aliased_ids() {
        let data: HistoryListResponse = serde_json::from_str(
            r#"{"history_list":[{"chat_id":"abc","title":"Oak"},{"id":7}]}"#,
        )
        .unwrap();
        assert_eq!(data.history_list.len(), 2);
        assert_eq!(data.history_list[0].id, Value::String("abc".into()));
        assert!(data.history_list[1].title.is_none());
    }

    #[test]
    fn chat_ref_omits_missing_chat_id() {
        let v = serde_json::to_value(ChatRef { chat_id: None, auth_token: "t" }).unwrap();
        assert_eq!(v, serde_json::json!({"auth_token": "t"}));
    }

    #[tokio::test]
    async fn unroutable_upstream_fails_within_connect_timeout() {
        let c = BeckyClient::with_connect_timeout(
            Some("http://10.255.255.1:81/api".into()),
            Duration::from_millis(300),
        );
        let started = std::time::Instant::now();
        let err = c.history_list("t").await.unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(5), "took {:?}", started.elapsed());
        assert!(matches!(err, BeckyError::Request(ref e) if e.is_connect() || e.is_timeout()), "{}", err);
    }
}
