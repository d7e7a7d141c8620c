//! Initialize the configuration directory: create ~/.becky, a config with a fresh session
//! secret, and the logs directory.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config;
use crate::gateway::{ChatStore, JsonChatStore, UserRecord};

/// Ensure the configuration directory has been initialized (config file exists and a session
/// secret is available).
pub fn require_initialized(config_path: &Path, config: &config::Config) -> Result<()> {
    if !config_path.exists() {
        anyhow::bail!(
            "configuration not initialized; run `becky init` first (config file not found: {})",
            config_path.display()
        );
    }
    if config::resolve_jwt_secret(config).is_none() {
        anyhow::bail!(
            "no session secret configured; set auth.jwtSecret in {} or BECKY_JWT_SECRET",
            config_path.display()
        );
    }
    Ok(())
}

/// Random secret for signing session tokens.
pub fn generate_secret() -> String {
    format!(
        "{}{}",
        uuid::Uuid::new_v4().simple(),
        uuid::Uuid::new_v4().simple()
    )
}

/// Create the config directory and default files if they do not exist.
/// - Creates the config directory (parent of config file path).
/// - Writes `config.json` with a generated `auth.jwtSecret` if missing.
/// - Creates the `logs` subdirectory for bug reports.
pub fn init_config_dir(config_path: &Path) -> Result<PathBuf> {
    let config_dir = config::config_dir(config_path);
    std::fs::create_dir_all(&config_dir)
        .with_context(|| format!("creating config directory {}", config_dir.display()))?;

    if !config_path.exists() {
        let default_config = serde_json::json!({
            "auth": { "jwtSecret": generate_secret() }
        });
        let body = serde_json::to_string_pretty(&default_config)
            .context("serializing default config")?;
        std::fs::write(config_path, body)
            .with_context(|| format!("writing default config to {}", config_path.display()))?;
        log::info!("created default config at {}", config_path.display());
    } else {
        log::debug!("config already exists at {}, leaving it", config_path.display());
    }

    let logs = config_dir.join("logs");
    if !logs.exists() {
        std::fs::create_dir_all(&logs)
            .with_context(|| format!("creating logs directory {}", logs.display()))?;
        log::info!("created logs directory at {}", logs.display());
    }

    Ok(config_dir)
}

/// Add `email` to the document store's users so tokens issued for it are accepted.
/// Returns false when the user already exists. A running gateway picks the user up on its
/// next lookup.
pub async fn register_user(config: &config::Config, config_path: &Path, email: &str) -> Result<bool> {
    let store_path = config::resolve_store_path(config, config_path);
    let store = JsonChatStore::load(&store_path)
        .await
        .with_context(|| format!("loading document store {}", store_path.display()))?;
    let added = store
        .add_user(UserRecord {
            email: email.trim().to_string(),
            name: None,
        })
        .await
        .with_context(|| format!("registering {} in {}", email, store_path.display()))?;
    if added {
        log::info!("registered user {} in {}", email, store_path.display());
    }
    Ok(added)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_writes_secret_and_is_idempotent() {
        let dir = std::env::temp_dir().join(format!("becky-init-{}", uuid::Uuid::new_v4()));
        let path = dir.join("config.json");

        let created = init_config_dir(&path).unwrap();
        assert_eq!(created, dir);
        assert!(dir.join("logs").is_dir());
        let (config, _) = config::load_config(Some(path.clone())).unwrap();
        let secret = config.auth.jwt_secret.clone().unwrap();
        assert_eq!(secret.len(), 64);
        require_initialized(&path, &config).unwrap();

        init_config_dir(&path).unwrap();
        let (again, _) = config::load_config(Some(path.clone())).unwrap();
        assert_eq!(again.auth.jwt_secret, Some(secret));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_config_file_is_not_initialized() {
        let path = std::env::temp_dir()
            .join(format!("becky-missing-{}", uuid::Uuid::new_v4()))
            .join("config.json");
        let err = require_initialized(&path, &config::Config::default()).unwrap_err();
        assert!(err.to_string().contains("becky init"));
    }

    #[tokio::test]
    async fn register_user_persists_once() {
        let dir = std::env::temp_dir().join(format!("becky-register-{}", uuid::Uuid::new_v4()));
        let path = dir.join("config.json");
        init_config_dir(&path).unwrap();
        let (config, _) = config::load_config(Some(path.clone())).unwrap();

        assert!(register_user(&config, &path, "agent@example.com").await.unwrap());
        assert!(!register_user(&config, &path, "agent@example.com").await.unwrap());

        let store = JsonChatStore::load(config::resolve_store_path(&config, &path)).await.unwrap();
        assert!(store.find_user("agent@example.com").await.is_some());
        assert!(store.find_user(crate::gateway::DEFAULT_USER).await.is_some());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
