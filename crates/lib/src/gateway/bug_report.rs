//! Bug reports: one JSON line per report, appended to a log file.

use axum::{extract::State, http::StatusCode, Json};
use serde_json::Value;
use std::path::Path;
use tokio::io::AsyncWriteExt;

use super::protocol::BugReportAck;
use super::server::GatewayState;

/// Appends `report` with an RFC 3339 `timestamp` as one line. Creates parent directories.
pub async fn append_report(path: &Path, mut report: serde_json::Map<String, Value>) -> std::io::Result<()> {
    report.insert(
        "timestamp".to_string(),
        Value::String(chrono::Utc::now().to_rfc3339()),
    );
    let mut line = serde_json::to_string(&report)?;
    line.push('\n');
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    file.flush().await
}

fn ack(status: StatusCode, success: bool, message: &str) -> (StatusCode, Json<BugReportAck>) {
    (
        status,
        Json(BugReportAck {
            success,
            message: message.to_string(),
        }),
    )
}

/// POST /api/bug-report: free-form JSON; only a non-empty `message` is required.
pub(crate) async fn submit_bug_report(
    State(state): State<GatewayState>,
    body: Option<Json<Value>>,
) -> (StatusCode, Json<BugReportAck>) {
    let Some(Json(Value::Object(report))) = body else {
        return ack(StatusCode::BAD_REQUEST, false, "Bug report must be a JSON object");
    };
    let has_message = report
        .get("message")
        .and_then(Value::as_str)
        .is_some_and(|m| !m.trim().is_empty());
    if !has_message {
        return ack(StatusCode::BAD_REQUEST, false, "Bug report message is required");
    }
    match append_report(&state.bug_report_log, report).await {
        Ok(()) => ack(StatusCode::OK, true, "Bug report submitted successfully"),
        Err(e) => {
            log::error!(
                "bug report: writing {} failed: {}",
                state.bug_report_log.display(),
                e
            );
            ack(StatusCode::INTERNAL_SERVER_ERROR, false, "Failed to save bug report")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn reports_are_appended_as_lines() {
        let dir = std::env::temp_dir().join(format!("becky-bugs-{}", uuid::Uuid::new_v4()));
        let path = dir.join("logs").join("bug-reports.log");
        for msg in ["first", "second"] {
            let Value::Object(map) = json!({"message": msg, "metadata": {"page": "chat"}}) else {
                unreachable!()
            };
            append_report(&path, map).await.unwrap();
        }
        let raw = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<Value> = raw.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["message"], "second");
        assert_eq!(lines[0]["metadata"]["page"], "chat");
        assert!(chrono::DateTime::parse_from_rfc3339(lines[0]["timestamp"].as_str().unwrap()).is_ok());
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
