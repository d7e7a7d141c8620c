//! Integration test: start the gateway on a free port and exercise the routes that do not
//! need the inference service (health, auth rejection, fallback, stored chats, bug reports).
//! The server task is left running when the test ends.

use becky::config::Config;
use becky::gateway::{self, DEFAULT_USER};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

const SECRET: &str = "gateway-health-test-secret";

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind free port");
    listener.local_addr().expect("local_addr").port()
}

fn temp_config_dir() -> (PathBuf, PathBuf) {
    let dir = std::env::temp_dir().join(format!("becky-gateway-test-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).expect("create config dir");
    let config_path = dir.join("config.json");
    std::fs::File::create(&config_path)
        .and_then(|mut f| f.write_all(format!(r#"{{"auth":{{"jwtSecret":"{}"}}}}"#, SECRET).as_bytes()))
        .expect("write config.json");
    (dir, config_path)
}

/// Starts a gateway and waits until /api/health answers. Returns its base URL.
async fn start_gateway(dir: &Path, config_path: PathBuf) -> String {
    let port = free_port();
    let mut config = Config::default();
    config.gateway.port = port;
    config.gateway.bind = "127.0.0.1".to_string();
    config.auth.jwt_secret = Some(SECRET.to_string());
    // Nothing listens here; these tests never reach upstream.
    config.upstream.base_url = Some(format!("http://127.0.0.1:{}/api", free_port()));
    config.storage.store_path = Some(dir.join("store.json"));

    tokio::spawn(async move {
        if let Err(e) = gateway::run_gateway(config, config_path).await {
            eprintln!("gateway exited: {:#}", e);
        }
    });

    let base = format!("http://127.0.0.1:{}", port);
    let client = reqwest::Client::new();
    for _ in 0..100 {
        if let Ok(resp) = client.get(format!("{}/api/health", base)).send().await {
            if resp.status().is_success() {
                return base;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("gateway on {} did not become healthy within 5s", base);
}

fn session_cookie(email: &str) -> String {
    let token = gateway::mint_token(SECRET, email, 1).expect("mint token");
    format!("userToken={}", token)
}

#[tokio::test]
async fn gateway_health_http_responds_with_running() {
    let (dir, config_path) = temp_config_dir();
    let base = start_gateway(&dir, config_path).await;

    let resp = reqwest::get(format!("{}/api/health", base)).await.expect("health");
    let port: u64 = base.rsplit(':').next().unwrap().parse().unwrap();
    let json: serde_json::Value = resp.json().await.expect("parse JSON");
    assert_eq!(json.get("msg").and_then(|v| v.as_str()), Some("api is running"));
    assert_eq!(json.get("runtime").and_then(|v| v.as_str()), Some("running"));
    assert_eq!(json.get("port").and_then(|v| v.as_u64()), Some(port));
}

#[tokio::test]
async fn chat_routes_reject_missing_or_bad_session() {
    let (dir, config_path) = temp_config_dir();
    let base = start_gateway(&dir, config_path).await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/api/chat/saved", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 405);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body, serde_json::json!({"status": 405, "message": "Not Logged"}));

    let forged = gateway::mint_token("other-secret", DEFAULT_USER, 1).unwrap();
    let resp = client
        .delete(format!("{}/api/chat/all", base))
        .header("Cookie", format!("userToken={}", forged))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 405);

    let resp = client
        .get(format!("{}/api/chat/saved", base))
        .header("Cookie", session_cookie("ghost@example.com"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 405);
    let set_cookie = resp
        .headers()
        .get("set-cookie")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(set_cookie.starts_with("userToken=;"), "cookie not cleared: {}", set_cookie);
}

#[tokio::test]
async fn unknown_api_route_is_404_json() {
    let (dir, config_path) = temp_config_dir();
    let base = start_gateway(&dir, config_path).await;

    let resp = reqwest::get(format!("{}/api/does-not-exist", base)).await.unwrap();
    assert_eq!(resp.status().as_u16(), 404);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body, serde_json::json!({"error": "API route not found"}));
}

#[tokio::test]
async fn saved_chats_are_empty_for_a_new_user_and_delete_succeeds() {
    let (dir, config_path) = temp_config_dir();
    let base = start_gateway(&dir, config_path).await;
    let client = reqwest::Client::new();
    let cookie = session_cookie(DEFAULT_USER);

    let resp = client
        .get(format!("{}/api/chat/saved", base))
        .header("Cookie", &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 404);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "Not found");

    let resp = client
        .delete(format!("{}/api/chat/all", base))
        .header("Cookie", &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body, serde_json::json!({"status": 200, "message": "Success"}));
}

#[tokio::test]
async fn bug_reports_are_appended_to_the_log() {
    let (dir, config_path) = temp_config_dir();
    let base = start_gateway(&dir, config_path).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/api/bug-report", base))
        .json(&serde_json::json!({"message": "send button stuck", "metadata": {"browser": "firefox"}}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let ack: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(
        ack,
        serde_json::json!({"success": true, "message": "Bug report submitted successfully"})
    );

    let resp = client
        .post(format!("{}/api/bug-report", base))
        .json(&serde_json::json!({"metadata": {}}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);

    let log = std::fs::read_to_string(dir.join("logs").join("bug-reports.log")).expect("bug log");
    let lines: Vec<&str> = log.lines().collect();
    assert_eq!(lines.len(), 1);
    let entry: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(entry["message"], "send button stuck");
    assert_eq!(entry["metadata"]["browser"], "firefox");
    assert!(entry["timestamp"].is_string());
}
