//! POST /api/chat: forwards a turn to the inference service and streams its answer back.
//!
//! The inbound multipart is read in full (fields and attachments), re-encoded for the
//! upstream `/chatbot` endpoint, and the upstream body is piped to the caller chunk by chunk
//! through a channel. The pump task also decodes the frames it passes along so the final
//! answer and chat title can be recorded in the document store once the body ends.

use axum::{
    body::{Body, Bytes},
    extract::{multipart::MultipartError, Multipart, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use futures_util::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::auth::AuthUser;
use super::protocol::{ApiResponse, UPSTREAM_FAILED};
use super::server::GatewayState;
use super::store::{ChatExchange, ChatStore};
use crate::llm::{UpstreamChat, UpstreamFile};
use crate::stream::{EventStream, StreamEvent};

const RELAY_CHANNEL_CAPACITY: usize = 32;

pub(crate) async fn relay_chat(
    State(state): State<GatewayState>,
    user: AuthUser,
    multipart: Multipart,
) -> Response {
    let mut chat = match read_turn(multipart).await {
        Ok(chat) => chat,
        Err(e) => {
            log::warn!("relay: unreadable upload from {}: {}", user.email, e);
            return ApiResponse::message(StatusCode::BAD_REQUEST, "Invalid chat upload").into_response();
        }
    };
    if chat.auth_token.is_empty() {
        chat.auth_token = state.upstream_token.as_deref().unwrap_or_default().to_string();
    }
    log::debug!(
        "relay: turn from {} chat {} ({} file(s))",
        user.email,
        chat.chat_id,
        chat.files.len()
    );

    let prompt = chat.message.clone();
    let chat_id = chat.chat_id.clone();
    let upstream = match state.upstream.open_chat_stream(chat).await {
        Ok(res) => res,
        Err(e) => {
            log::error!("relay: upstream call failed: {}", e);
            return ApiResponse::message(StatusCode::INTERNAL_SERVER_ERROR, UPSTREAM_FAILED).into_response();
        }
    };

    let content_type = upstream
        .headers()
        .get(header::CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("text/event-stream"));

    let (tx, rx) = mpsc::channel(RELAY_CHANNEL_CAPACITY);
    let recorder = ExchangeRecorder::new(user.email, chat_id, prompt);
    tokio::spawn(pump(upstream, tx, recorder, state.store.clone()));

    let body = futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    });
    (
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
        ],
        Body::from_stream(body),
    )
        .into_response()
}

/// Reads `message`, `chatId` (or `chat_id`), `auth_token` and any `files` parts.
async fn read_turn(mut multipart: Multipart) -> Result<UpstreamChat, MultipartError> {
    let mut chat = UpstreamChat::default();
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "message" => chat.message = field.text().await?,
            "chatId" | "chat_id" => chat.chat_id = field.text().await?,
            "auth_token" => chat.auth_token = field.text().await?,
            "files" | "files[]" => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let mime = field.content_type().map(str::to_string);
                let data = field.bytes().await?;
                chat.files.push(UpstreamFile {
                    name: file_name,
                    mime,
                    data: data.to_vec(),
                });
            }
            other => {
                log::debug!("relay: ignoring multipart field {:?}", other);
            }
        }
    }
    Ok(chat)
}

/// Copies the upstream body into the response channel, then records the exchange. A body
/// that breaks midway is not recorded.
async fn pump(
    upstream: reqwest::Response,
    tx: mpsc::Sender<Result<Bytes, std::io::Error>>,
    mut recorder: ExchangeRecorder,
    store: Arc<dyn ChatStore>,
) {
    let mut body = upstream.bytes_stream();
    let mut caller = Some(tx);
    while let Some(chunk) = body.next().await {
        match chunk {
            Ok(bytes) => {
                recorder.observe(&bytes);
                if let Some(tx) = &caller {
                    if tx.send(Ok(bytes)).await.is_err() {
                        log::debug!("relay: caller went away, draining upstream for the record");
                        caller = None;
                    }
                }
            }
            Err(e) => {
                log::warn!("relay: upstream stream broke: {}", e);
                if let Some(tx) = &caller {
                    let _ = tx.send(Err(std::io::Error::other(e))).await;
                }
                return;
            }
        }
    }
    drop(caller);
    if let Some((user, chat_id, title, exchange)) = recorder.finish() {
        if let Err(e) = store
            .record_exchange(&user, &chat_id, title.as_deref(), exchange)
            .await
        {
            log::warn!("relay: recording chat {} failed: {}", chat_id, e);
        }
    }
}

/// Follows the frames of one turn to find the final assistant text and title.
struct ExchangeRecorder {
    events: EventStream,
    user: String,
    chat_id: String,
    prompt: String,
    answer: String,
    in_chunk_run: bool,
    title: Option<String>,
}

impl ExchangeRecorder {
    fn new(user: String, chat_id: String, prompt: String) -> Self {
        Self {
            events: EventStream::new(),
            user,
            chat_id,
            prompt,
            answer: String::new(),
            in_chunk_run: false,
            title: None,
        }
    }

    fn observe(&mut self, chunk: &[u8]) {
        for event in self.events.push(chunk) {
            let is_chunk = matches!(event, StreamEvent::Chunk(_));
            match event {
                StreamEvent::Chunk(delta) => {
                    if !self.in_chunk_run {
                        self.answer.clear();
                    }
                    self.answer.push_str(&delta);
                }
                StreamEvent::Append(text) | StreamEvent::Replace(text) => self.answer = text,
                StreamEvent::Terminal { title } | StreamEvent::Interrupted { title } => {
                    if title.is_some() {
                        self.title = title;
                    }
                }
                StreamEvent::OpenForm { .. } | StreamEvent::UnknownForm { .. } | StreamEvent::Progress { .. } => {}
            }
            self.in_chunk_run = is_chunk;
        }
    }

    /// `None` when the turn produced no assistant text.
    fn finish(self) -> Option<(String, String, Option<String>, ChatExchange)> {
        self.events.finish();
        if self.answer.is_empty() || self.chat_id.is_empty() {
            return None;
        }
        Some((
            self.user,
            self.chat_id,
            self.title,
            ChatExchange {
                prompt: self.prompt,
                content: self.answer,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> ExchangeRecorder {
        ExchangeRecorder::new("u".into(), "c1".into(), "hi".into())
    }

    #[test]
    fn recorder_keeps_concatenated_chunks_and_title() {
        let mut r = recorder();
        r.observe(br#"{"stream_type":"msg_stream","msg":"Hel"}{"stream_type":"msg_"#);
        r.observe(br#"stream","msg":"lo"}{"stream_type":"node_stream","node_name":"end_node","chat_title":"Greeting"}"#);
        let (user, chat_id, title, exchange) = r.finish().unwrap();
        assert_eq!(user, "u");
        assert_eq!(chat_id, "c1");
        assert_eq!(title.as_deref(), Some("Greeting"));
        assert_eq!(exchange, ChatExchange { prompt: "hi".into(), content: "Hello".into() });
    }

    #[test]
    fn recorder_uses_last_full_message() {
        let mut r = recorder();
        r.observe(br#"{"stream_type":"msg_stream","msg":"draft"}"#);
        r.observe(br#"{"stream_type":"node_stream","action":"update","msg":"final"}"#);
        assert_eq!(r.finish().unwrap().3.content, "final");
    }

    #[test]
    fn recorder_skips_turns_without_text() {
        let mut r = recorder();
        r.observe(br#"{"stream_type":"custom_stream","msg":{"type":"react-form","name":"RPA","content":{}}}"#);
        assert!(r.finish().is_none());
    }
}
