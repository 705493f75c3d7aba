//! Configuration Vault – reads/writes `~/.mnemon/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Persisted user configuration stored in `~/.mnemon/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the OpenAI-compatible model server.
    #[serde(default = "default_llm_url")]
    pub llm_url: String,

    /// Active model name (e.g. "llama3", "gpt-4o").
    #[serde(default = "default_model")]
    pub model: String,

    /// API key for gateways that require one (stored as plain text – the
    /// vault restricts file permissions to the owner).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_key: String,

    /// Path to the SQLite record database.
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Namespace template for stored records; `{user_id}` is bound per run.
    #[serde(default = "default_namespace")]
    pub namespace: Vec<String>,

    /// Maximum number of candidate records retrieved per reconciliation.
    #[serde(default = "default_query_limit")]
    pub query_limit: usize,

    /// Proposal round budget per consolidation pass.
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,

    /// Console log encoding: "compact" (default) or "json".
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("llm_url", &self.llm_url)
            .field("model", &self.model)
            .field(
                "api_key",
                if self.api_key.is_empty() { &"<not set>" } else { &"<redacted>" },
            )
            .field("db_path", &self.db_path)
            .field("namespace", &self.namespace)
            .field("query_limit", &self.query_limit)
            .field("max_steps", &self.max_steps)
            .field("log_format", &self.log_format)
            .finish()
    }
}

fn default_llm_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_model() -> String {
    "llama3".to_string()
}
fn default_db_path() -> String {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(|home| format!("{home}/.mnemon/records.db"))
        .unwrap_or_else(|_| "records.db".to_string())
}
fn default_namespace() -> Vec<String> {
    vec!["memories".to_string(), "{user_id}".to_string()]
}
fn default_query_limit() -> usize {
    5
}
fn default_max_steps() -> usize {
    1
}
fn default_log_format() -> String {
    "compact".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            llm_url: default_llm_url(),
            model: default_model(),
            api_key: String::new(),
            db_path: default_db_path(),
            namespace: default_namespace(),
            query_limit: default_query_limit(),
            max_steps: default_max_steps(),
            log_format: default_log_format(),
        }
    }
}

/// Return the path to `~/.mnemon/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
/// Extracted for testability without mutating environment variables.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".mnemon").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

/// Load the config from a specific path.
pub(crate) fn load_from(path: &PathBuf) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `MNEMON_*` environment variable overrides to `cfg`.
///
/// Supported variables:
///
/// | Variable | Config field |
/// |---|---|
/// | `MNEMON_LLM_URL` | `llm_url` |
/// | `MNEMON_MODEL` | `model` |
/// | `MNEMON_API_KEY` | `api_key` |
/// | `MNEMON_DB_PATH` | `db_path` |
/// | `MNEMON_QUERY_LIMIT` | `query_limit` |
/// | `MNEMON_LOG_FORMAT` | `log_format` |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("MNEMON_LLM_URL") {
        cfg.llm_url = v;
    }
    if let Ok(v) = std::env::var("MNEMON_MODEL") {
        cfg.model = v;
    }
    if let Ok(v) = std::env::var("MNEMON_API_KEY") {
        cfg.api_key = v;
    }
    if let Ok(v) = std::env::var("MNEMON_DB_PATH") {
        cfg.db_path = v;
    }
    if let Ok(v) = std::env::var("MNEMON_QUERY_LIMIT")
        && let Ok(limit) = v.parse::<usize>()
    {
        cfg.query_limit = limit.max(1);
    }
    if let Ok(v) = std::env::var("MNEMON_LOG_FORMAT") {
        cfg.log_format = v;
    }
}

/// Save the config to disk, creating `~/.mnemon/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

/// Save the config to a specific path.
pub(crate) fn save_to(cfg: &Config, path: &PathBuf) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        // Restrict the config directory to the owner only (rwx------) on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    // Write the file with owner-only read/write (rw-------) on Unix.
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}
