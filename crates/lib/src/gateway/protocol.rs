//! Gateway HTTP protocol types (response envelopes, queries, bug reports).

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

/// Message of every auth rejection.
pub const NOT_LOGGED: &str = "Not Logged";
/// Message of a relay failure; upstream detail stays in the log.
pub const UPSTREAM_FAILED: &str = "Could not reach the assistant service.";

/// Standard envelope: `{ "status", "message", "data"? }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub status: u16,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            status: 200,
            message: "Success".to_string(),
            data: Some(data),
        }
    }
}

impl ApiResponse<()> {
    /// Envelope without data.
    pub fn message(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status: status.as_u16(),
            message: message.into(),
            data: None,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

/// `GET /api/chat` query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatQuery {
    #[serde(default, alias = "chat_id")]
    pub chat_id: Option<String>,
    #[serde(default, alias = "auth_token")]
    pub auth_token: Option<String>,
}

/// `GET /api/chat/history` query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    #[serde(default, alias = "auth_token")]
    pub auth_token: Option<String>,
}

/// `GET /api/chat/saved` query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedQuery {
    #[serde(default, alias = "chat_id")]
    pub chat_id: Option<String>,
}

/// `POST /api/bug-report` body. Only `message` is required; anything else is kept as sent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BugReport {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// `POST /api/bug-report` answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BugReportAck {
    pub success: bool,
    pub message: String,
}

/// `GET /api/health` answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    pub msg: String,
    pub runtime: String,
    pub port: u16,
}

/// Unknown `/api` route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteNotFound {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_without_data_omits_field() {
        let v = serde_json::to_value(ApiResponse::message(StatusCode::METHOD_NOT_ALLOWED, NOT_LOGGED)).unwrap();
        assert_eq!(v, serde_json::json!({"status": 405, "message": "Not Logged"}));
    }

    #[test]
    fn envelope_with_data_round_trips_for_client() {
        let s = serde_json::to_string(&ApiResponse::success(vec![1, 2])).unwrap();
        let back: ApiResponse<Vec<u32>> = serde_json::from_str(&s).unwrap();
        assert_eq!(back.status, 200);
        assert_eq!(back.data, Some(vec![1, 2]));
        let none: ApiResponse<Vec<u32>> =
            serde_json::from_str(r#"{"status":404,"message":"Not found"}"#).unwrap();
        assert!(none.data.is_none());
    }

    #[test]
    fn chat_query_accepts_both_spellings() {
        let q: ChatQuery = serde_json::from_str(r#"{"chatId":"a","auth_token":"t"}"#).unwrap();
        assert_eq!(q.chat_id.as_deref(), Some("a"));
        assert_eq!(q.auth_token.as_deref(), Some("t"));
    }
}
