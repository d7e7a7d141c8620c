//! HTTP chat client for the gateway: opens turns, feeds the streamed frames through the
//! session controller and reports every change through an effect callback.

use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{ACCEPT, COOKIE};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::request::{OutboundFile, OutboundRequest, RequestError};
use crate::config::{self, Config};
use crate::forms::FormSubmission;
use crate::gateway::protocol::{ApiResponse, BugReport, BugReportAck};
use crate::render::ThemeMode;
use crate::router::{RouterError, SessionController, TurnFailure, TurnTicket, UiEffect};
use crate::session::{ChatSession, ChatSummary, HistoryMessage};
use crate::stream::EventStream;

const DEFAULT_TURN_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error(transparent)]
    Busy(#[from] RouterError),
    #[error("gateway request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("not logged in")]
    NotLoggedIn,
    #[error("gateway error: {status} {message}")]
    Api { status: StatusCode, message: String },
}

/// Effect sink; the terminal client prints, a UI would re-render.
pub type EffectSink<'a> = dyn FnMut(&UiEffect) + Send + 'a;

/// Client for one user talking to one gateway. Owns the active session.
pub struct ChatClient {
    base_url: String,
    http: reqwest::Client,
    cookie_name: String,
    session_token: Option<String>,
    /// Forwarded to the inference service as `auth_token`.
    auth_token: Option<String>,
    controller: SessionController,
    turn_timeout: Duration,
}

impl ChatClient {
    pub fn new(base_url: impl Into<String>, session_token: Option<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
            cookie_name: "userToken".to_string(),
            session_token,
            auth_token: None,
            controller: SessionController::default(),
            turn_timeout: DEFAULT_TURN_TIMEOUT,
        }
    }

    /// Client configured from the `client`, `auth` and `upstream` sections.
    pub fn from_config(config: &Config, session_token: Option<String>) -> Self {
        Self::new(config::resolve_server_url(config), session_token)
            .with_cookie_name(config.auth.cookie_name.clone())
            .with_turn_timeout(Duration::from_secs(config.client.turn_timeout_secs.max(1)))
            .with_theme(config.client.theme)
            .with_auth_token(config::resolve_upstream_token(config))
    }

    pub fn with_cookie_name(mut self, name: impl Into<String>) -> Self {
        self.cookie_name = name.into();
        self
    }

    pub fn with_turn_timeout(mut self, timeout: Duration) -> Self {
        self.turn_timeout = timeout;
        self
    }

    pub fn with_theme(mut self, theme: ThemeMode) -> Self {
        self.controller.set_theme(theme);
        self
    }

    pub fn with_auth_token(mut self, token: Option<String>) -> Self {
        self.auth_token = token;
        self
    }

    pub fn session(&self) -> &ChatSession {
        self.controller.session()
    }

    pub fn controller(&self) -> &SessionController {
        &self.controller
    }

    /// Sends a text turn. Transport failures end the turn with an error message and still
    /// return `Ok`; only precondition failures are errors.
    pub async fn send_text(
        &mut self,
        text: &str,
        files: Vec<OutboundFile>,
        on_effect: &mut EffectSink<'_>,
    ) -> Result<(), ClientError> {
        let request = OutboundRequest::text(
            text,
            files,
            self.controller.chat_id(),
            self.auth_token.clone(),
        )?;
        self.run_turn(request, on_effect).await
    }

    /// Sends a completed form as a turn.
    pub async fn submit_form(
        &mut self,
        submission: &FormSubmission,
        on_effect: &mut EffectSink<'_>,
    ) -> Result<(), ClientError> {
        let request = OutboundRequest::form(submission, self.controller.chat_id(), self.auth_token.clone());
        self.run_turn(request, on_effect).await
    }

    /// Starts a fresh chat locally.
    pub fn new_chat(&mut self, on_effect: &mut EffectSink<'_>) {
        for effect in self.controller.new_chat() {
            on_effect(&effect);
        }
    }

    /// GET /api/chat: loads a stored conversation into the session. Returns false when the
    /// gateway has no messages for it (the session is left unchanged).
    pub async fn load_messages(
        &mut self,
        chat_id: &str,
        on_effect: &mut EffectSink<'_>,
    ) -> Result<bool, ClientError> {
        let mut query = vec![("chatId", chat_id.to_string())];
        if let Some(token) = &self.auth_token {
            query.push(("authToken", token.clone()));
        }
        let req = self.authed(self.http.get(self.url("/api/chat"))).query(&query);
        let envelope: ApiResponse<Vec<HistoryMessage>> = send_json(req).await?;
        let Some(messages) = envelope.data else {
            return Ok(false);
        };
        for effect in self.controller.load_history(chat_id, messages) {
            on_effect(&effect);
        }
        Ok(true)
    }

    /// GET /api/chat/history: the caller's chat list.
    pub async fn history(&self) -> Result<Vec<ChatSummary>, ClientError> {
        let mut req = self.authed(self.http.get(self.url("/api/chat/history")));
        if let Some(token) = &self.auth_token {
            req = req.query(&[("authToken", token)]);
        }
        let envelope: ApiResponse<Vec<ChatSummary>> = send_json(req).await?;
        Ok(envelope.data.unwrap_or_default())
    }

    /// GET /api/chat/saved: chats recorded by the gateway; `None` when there are none.
    pub async fn saved(&self, chat_id: Option<&str>) -> Result<Option<Value>, ClientError> {
        let mut req = self.authed(self.http.get(self.url("/api/chat/saved")));
        if let Some(id) = chat_id {
            req = req.query(&[("chatId", id)]);
        }
        match send_json::<ApiResponse<Value>>(req).await {
            Ok(envelope) => Ok(envelope.data),
            Err(ClientError::Api { status, .. }) if status == StatusCode::NOT_FOUND => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// DELETE /api/chat/all: drops every recorded chat of the caller.
    pub async fn delete_all(&self) -> Result<(), ClientError> {
        let req = self.authed(self.http.delete(self.url("/api/chat/all")));
        let _: ApiResponse<Value> = send_json(req).await?;
        Ok(())
    }

    /// POST /api/bug-report.
    pub async fn report_bug(&self, message: &str, metadata: Value) -> Result<(), ClientError> {
        let body = BugReport {
            message: Some(message.to_string()),
            metadata,
        };
        let req = self.http.post(self.url("/api/bug-report")).json(&body);
        let ack: BugReportAck = send_json(req).await?;
        if !ack.success {
            return Err(ClientError::Api {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                message: ack.message,
            });
        }
        Ok(())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.session_token {
            Some(token) => req.header(COOKIE, format!("{}={}", self.cookie_name, token)),
            None => req,
        }
    }

    async fn run_turn(
        &mut self,
        request: OutboundRequest,
        on_effect: &mut EffectSink<'_>,
    ) -> Result<(), ClientError> {
        let (ticket, effects) = self.controller.begin_turn(request.optimistic_message())?;
        for effect in &effects {
            on_effect(effect);
        }

        let form = match request.into_multipart() {
            Ok(form) => form,
            Err(e) => {
                log::warn!("chat: building turn request failed: {}", e);
                for effect in self.controller.fail_turn(&ticket, TurnFailure::Transport) {
                    on_effect(&effect);
                }
                return Ok(());
            }
        };
        let req = self
            .authed(self.http.post(self.url("/api/chat")))
            .header(ACCEPT, "text/event-stream")
            .multipart(form);

        let outcome = tokio::time::timeout(
            self.turn_timeout,
            stream_turn(req, &mut self.controller, &ticket, on_effect),
        )
        .await;
        let closing = match outcome {
            Ok(Ok(())) => self.controller.end_of_stream(&ticket),
            Ok(Err(e)) => {
                log::warn!("chat: turn failed: {}", e);
                self.controller.fail_turn(&ticket, TurnFailure::Transport)
            }
            Err(_) => {
                log::warn!("chat: turn timed out after {:?}", self.turn_timeout);
                self.controller.fail_turn(&ticket, TurnFailure::Timeout)
            }
        };
        for effect in &closing {
            on_effect(effect);
        }
        Ok(())
    }
}

/// Reads one turn's response body until it ends or the turn closes.
async fn stream_turn(
    req: reqwest::RequestBuilder,
    controller: &mut SessionController,
    ticket: &TurnTicket,
    on_effect: &mut EffectSink<'_>,
) -> Result<(), ClientError> {
    let res = req.send().await?;
    let status = res.status();
    if !status.is_success() {
        let body = res.text().await.unwrap_or_default();
        return Err(ClientError::Api {
            status,
            message: body,
        });
    }

    let mut events = EventStream::new();
    let mut body = res.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        for event in events.push(&chunk) {
            for effect in controller.apply(ticket, event) {
                on_effect(&effect);
            }
        }
        if !controller.is_turn_open(ticket) {
            log::debug!("chat: turn closed, abandoning the rest of the body");
            return Ok(());
        }
    }
    events.finish();
    Ok(())
}

async fn send_json<T: DeserializeOwned>(req: reqwest::RequestBuilder) -> Result<T, ClientError> {
    let res = req.send().await?;
    let status = res.status();
    if status == StatusCode::METHOD_NOT_ALLOWED {
        return Err(ClientError::NotLoggedIn);
    }
    if !status.is_success() {
        let body = res.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiResponse<Value>>(&body)
            .map(|e| e.message)
            .unwrap_or(body);
        return Err(ClientError::Api { status, message });
    }
    Ok(res.json().await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::TRANSPORT_ERROR_TEXT;

    #[tokio::test]
    async fn unreachable_gateway_ends_turn_with_one_error() {
        // Port 9 (discard) on loopback is closed in test environments.
        let mut client = ChatClient::new("http://127.0.0.1:9", None);
        let before = client.session().messages.len();
        let mut effects = Vec::new();
        client
            .send_text("hello", Vec::new(), &mut |e: &UiEffect| effects.push(e.clone()))
            .await
            .unwrap();
        let session = client.session();
        assert_eq!(session.messages.len(), before + 2);
        assert_eq!(session.messages[before].content, "hello");
        assert_eq!(session.messages[before + 1].content, TRANSPORT_ERROR_TEXT);
        assert!(!session.loading);
        assert_eq!(effects.last(), Some(&UiEffect::LoadingChanged(false)));
    }

    #[tokio::test]
    async fn stalled_stream_ends_turn_with_timeout_message() {
        use crate::router::TIMEOUT_ERROR_TEXT;
        use axum::{body::Body, routing::post, Router};

        async fn stalled() -> Body {
            let first = futures_util::stream::once(async {
                Ok::<_, std::io::Error>(axum::body::Bytes::from_static(
                    br#"{"stream_type":"msg_stream","action":"add","msg":"Hel"}"#,
                ))
            });
            Body::from_stream(first.chain(futures_util::stream::pending()))
        }

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route("/api/chat", post(stalled));
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        let mut client = ChatClient::new(format!("http://{}", addr), None)
            .with_turn_timeout(Duration::from_millis(500));
        let mut effects = Vec::new();
        client
            .send_text("hi", Vec::new(), &mut |e: &UiEffect| effects.push(e.clone()))
            .await
            .unwrap();

        let contents: Vec<&str> = client
            .session()
            .messages
            .iter()
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(&contents[1..], ["hi", "Hel", TIMEOUT_ERROR_TEXT]);
        assert!(!client.session().loading);
        let loading_off = effects
            .iter()
            .filter(|e| **e == UiEffect::LoadingChanged(false))
            .count();
        assert_eq!(loading_off, 1);
    }

    #[tokio::test]
    async fn empty_text_is_rejected_before_any_request() {
        let mut client = ChatClient::new("http://127.0.0.1:9", None);
        let err = client
            .send_text("", Vec::new(), &mut |_: &UiEffect| {})
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Request(RequestError::Empty)));
        assert!(!client.session().loading);
    }

    #[test]
    fn from_config_uses_server_url_and_cookie_name() {
        let mut config = Config::default();
        config.gateway.port = 5123;
        config.auth.cookie_name = "sess".into();
        let client = ChatClient::from_config(&config, Some("jwt".into()));
        assert_eq!(client.base_url, "http://127.0.0.1:5123");
        assert_eq!(client.cookie_name, "sess");
        assert_eq!(client.turn_timeout, DEFAULT_TURN_TIMEOUT);
    }
}
