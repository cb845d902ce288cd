//! Global configuration loader for stepflow.
//!
//! Reads `config.toml` from the data directory (`~/.stepflow/` in production)
//! and deserializes it into [`GlobalConfig`]. Falls back to sensible defaults
//! when the file is missing or malformed.

use std::path::{Path, PathBuf};

use stepflow_types::config::GlobalConfig;

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "STEPFLOW_DATA_DIR";

/// Config file name inside the data directory.
pub const CONFIG_FILE: &str = "config.toml";

/// Load global configuration from `{data_dir}/config.toml`.
///
/// - If the file does not exist, returns [`GlobalConfig::default()`].
/// - If the file exists but fails to parse, logs a warning and returns the default.
/// - If the file exists and parses successfully, returns the parsed config.
///   Sections and fields left out keep their defaults.
pub async fn load_global_config(data_dir: &Path) -> GlobalConfig {
    let config_path = data_dir.join(CONFIG_FILE);

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return GlobalConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return GlobalConfig::default();
        }
    };

    match toml::from_str::<GlobalConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            GlobalConfig::default()
        }
    }
}

/// Resolve the data directory from environment or platform defaults.
///
/// Priority:
/// 1. `STEPFLOW_DATA_DIR` environment variable
/// 2. `~/.stepflow`
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        return PathBuf::from(dir);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".stepflow");
    }

    // Last resort: current directory
    PathBuf::from(".stepflow")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_global_config_missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_global_config(tmp.path()).await;
        assert_eq!(config.provider.base_url, "https://api.getunbound.ai/v1");
        assert_eq!(config.execution.inter_step_delay_ms, 2000);
        assert_eq!(config.models.catalog.len(), 3);
    }

    #[tokio::test]
    async fn load_global_config_partial_toml_keeps_other_defaults() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join(CONFIG_FILE),
            r#"
[provider]
base_url = "http://localhost:8080/v1"

[execution]
inter_step_delay_ms = 0

[[pricing.models]]
model = "local-llama"
input_per_million = 0.0
output_per_million = 0.0
"#,
        )
        .await
        .unwrap();

        let config = load_global_config(tmp.path()).await;
        assert_eq!(config.provider.base_url, "http://localhost:8080/v1");
        assert_eq!(config.provider.api_key_env, "STEPFLOW_API_KEY");
        assert_eq!(config.provider.request_timeout_secs, 180);
        assert_eq!(config.execution.inter_step_delay_ms, 0);
        assert_eq!(config.execution.call_failure_backoff_ms, 2000);
        assert_eq!(config.pricing.models.len(), 1);
        assert_eq!(config.pricing.rates_for("local-llama"), (0.0, 0.0));
        assert_eq!(config.models.judge_model, "kimi-k2p5");
    }

    #[tokio::test]
    async fn load_global_config_invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join(CONFIG_FILE), "this is not { valid toml !!!")
            .await
            .unwrap();

        let config = load_global_config(tmp.path()).await;
        assert_eq!(config.models.default_model, "kimi-k2p5");
        assert_eq!(config.pricing.models.len(), 2);
    }

    #[test]
    fn test_resolve_data_dir_from_env() {
        // SAFETY: This test is single-threaded and restores the env var immediately.
        unsafe {
            std::env::set_var(DATA_DIR_ENV, "/tmp/test-stepflow");
        }
        let dir = resolve_data_dir();
        assert_eq!(dir, PathBuf::from("/tmp/test-stepflow"));
        unsafe {
            std::env::remove_var(DATA_DIR_ENV);
        }
    }
}
