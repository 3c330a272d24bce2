//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.llm-webui/config.json`) and environment.
//! Command-line flags are applied on top by the binary.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// How to reach the `llm` command-line tool.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Where uploaded attachments are stored and how large they may be.
    #[serde(default)]
    pub uploads: UploadsConfig,

    /// Defaults for log and conversation listings.
    #[serde(default)]
    pub logs: LogsConfig,

    /// Static asset settings for the browser client.
    #[serde(default)]
    pub assets: AssetsConfig,
}

/// Bind address, port and development flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Bind address (default "127.0.0.1"). There is no built-in auth; anything beyond loopback must be secured externally.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port for HTTP (default 8000).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Serve static assets from disk on every request so edits show up without a restart.
    #[serde(default)]
    pub reload: bool,

    /// Verbose logging.
    #[serde(default)]
    pub debug: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            reload: false,
            debug: false,
        }
    }
}

/// Collaborator binary settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmConfig {
    /// Path or name of the `llm` executable. Overridden by LLM_WEBUI_LLM_BIN env.
    #[serde(default = "default_llm_binary")]
    pub binary: PathBuf,

    /// Extra environment variables passed to every invocation (e.g. LLM_USER_PATH).
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

fn default_llm_binary() -> PathBuf {
    PathBuf::from("llm")
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            binary: default_llm_binary(),
            env: BTreeMap::new(),
        }
    }
}

/// Upload storage. The directory is never served over HTTP.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadsConfig {
    /// Storage directory (default: `llm-webui-uploads` under the system temp dir).
    #[serde(default)]
    pub directory: Option<PathBuf>,

    /// Largest accepted request body for uploads, in bytes (default 25 MiB).
    #[serde(default = "default_max_upload_bytes")]
    pub max_bytes: usize,
}

fn default_max_upload_bytes() -> usize {
    25 * 1024 * 1024
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            directory: None,
            max_bytes: default_max_upload_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogsConfig {
    /// Rows returned by `GET /api/logs` when no count is given.
    #[serde(default = "default_log_count")]
    pub default_count: usize,

    /// Summaries returned by `GET /api/conversations` when no limit is given.
    #[serde(default = "default_conversation_limit")]
    pub conversation_limit: usize,
}

fn default_log_count() -> usize {
    5
}

fn default_conversation_limit() -> usize {
    50
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            default_count: default_log_count(),
            conversation_limit: default_conversation_limit(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetsConfig {
    /// On-disk asset directory used when `server.reload` is set. Defaults to the crate's `static` directory.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

/// Resolve the collaborator binary: env LLM_WEBUI_LLM_BIN overrides config.
pub fn resolve_llm_binary(config: &Config) -> PathBuf {
    std::env::var("LLM_WEBUI_LLM_BIN")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| config.llm.binary.clone())
}

/// Resolve the upload directory (config or `<tmp>/llm-webui-uploads`).
pub fn resolve_upload_dir(config: &Config) -> PathBuf {
    config
        .uploads
        .directory
        .clone()
        .filter(|d| !d.as_os_str().is_empty())
        .unwrap_or_else(|| std::env::temp_dir().join("llm-webui-uploads"))
}

/// Resolve the on-disk asset directory used in reload mode.
pub fn resolve_assets_dir(config: &Config) -> PathBuf {
    config
        .assets
        .directory
        .clone()
        .filter(|d| !d.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/static")))
}

/// True if the bind address is loopback (127.0.0.1, ::1, etc.).
pub fn is_loopback_bind(bind: &str) -> bool {
    let b = bind.trim();
    b == "127.0.0.1" || b == "::1" || b == "localhost"
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("LLM_WEBUI_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".llm-webui").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the given path, the default path, or LLM_WEBUI_CONFIG_PATH. Missing file => default config.
pub fn load_config(path: Option<PathBuf>) -> Result<Config> {
    let path = path.unwrap_or_else(default_config_path);
    if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        return Ok(Config::default());
    }
    let s = std::fs::read_to_string(&path)
        .with_context(|| format!("reading config from {}", path.display()))?;
    let config = serde_json::from_str(&s)
        .with_context(|| format!("parsing config from {}", path.display()))?;
    Ok(config)
}
