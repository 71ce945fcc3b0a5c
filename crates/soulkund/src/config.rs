//! Configuration management for soulkund.
//!
//! Loads settings from /etc/soulkun/config.toml or uses defaults. Every
//! threshold and timeout the pipeline consults lives here — nothing is
//! hardcoded in the brain stages.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Config file path
pub const CONFIG_PATH: &str = "/etc/soulkun/config.toml";

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the webhook/RPC listener
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

fn default_bind_addr() -> String {
    "127.0.0.1:8787".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Model used for intent decisions
    #[serde(default = "default_intent_model")]
    pub intent_model: String,

    /// Provider endpoint
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,

    /// Per-call timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub request_timeout_secs: u64,

    /// Maximum prompt size in bytes (caps context growth)
    #[serde(default = "default_max_prompt")]
    pub max_prompt_bytes: usize,
}

fn default_intent_model() -> String {
    "qwen2.5:7b-instruct".to_string()
}

fn default_llm_endpoint() -> String {
    "http://127.0.0.1:11434".to_string()
}

fn default_llm_timeout() -> u64 {
    8
}

fn default_max_prompt() -> usize {
    24_576
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            intent_model: default_intent_model(),
            endpoint: default_llm_endpoint(),
            request_timeout_secs: default_llm_timeout(),
            max_prompt_bytes: default_max_prompt(),
        }
    }
}

/// Brain pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrainConfig {
    /// Per-source timeout for context memory fetches, in milliseconds
    #[serde(default = "default_context_fetch_timeout")]
    pub context_fetch_timeout_ms: u64,

    /// Conversation window size (turns)
    #[serde(default = "default_conversation_window")]
    pub conversation_window: usize,

    /// Cap on each memory excerpt list
    #[serde(default = "default_excerpt_limit")]
    pub memory_excerpt_limit: usize,

    /// Below this overall confidence, an approved action still requires
    /// confirmation. The single thresholding location is the gate.
    #[serde(default = "default_confirm_threshold")]
    pub confirm_threshold: f64,

    /// Pending confirmation time-to-live in seconds
    #[serde(default = "default_confirmation_ttl")]
    pub confirmation_ttl_secs: i64,

    /// Multi-turn session time-to-live in seconds
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: i64,

    /// How long a forced listening mode persists, in seconds
    #[serde(default = "default_listening_ttl")]
    pub listening_ttl_secs: i64,

    /// Per-handler execution timeout in seconds
    #[serde(default = "default_handler_timeout")]
    pub handler_timeout_secs: u64,

    /// Fallback reply when the provider is unreachable after the retry
    #[serde(default = "default_fallback_reply")]
    pub fallback_reply: String,
}

fn default_context_fetch_timeout() -> u64 {
    800
}

fn default_conversation_window() -> usize {
    10
}

fn default_excerpt_limit() -> usize {
    20
}

fn default_confirm_threshold() -> f64 {
    0.75
}

fn default_confirmation_ttl() -> i64 {
    600
}

fn default_session_ttl() -> i64 {
    1_800
}

fn default_listening_ttl() -> i64 {
    3_600
}

fn default_handler_timeout() -> u64 {
    10
}

fn default_fallback_reply() -> String {
    "ごめんなさい、うまく理解できませんでした。もう一度言い方を変えて教えてもらえますか?".to_string()
}

impl Default for BrainConfig {
    fn default() -> Self {
        Self {
            context_fetch_timeout_ms: default_context_fetch_timeout(),
            conversation_window: default_conversation_window(),
            memory_excerpt_limit: default_excerpt_limit(),
            confirm_threshold: default_confirm_threshold(),
            confirmation_ttl_secs: default_confirmation_ttl(),
            session_ttl_secs: default_session_ttl(),
            listening_ttl_secs: default_listening_ttl(),
            handler_timeout_secs: default_handler_timeout(),
            fallback_reply: default_fallback_reply(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database path. Empty string selects the null storage (typed
    /// no-op backend, used by tests and degraded deployments).
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_db_path() -> String {
    "/var/lib/soulkun/soulkun.db".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

/// ChatWork channel configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatworkConfig {
    #[serde(default)]
    pub api_token: String,
    /// Rooms the bot will answer in. Empty allows all.
    #[serde(default)]
    pub allowed_rooms: Vec<String>,
}

/// Telegram channel configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub allowed_chats: Vec<String>,
}

/// Tenancy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgConfig {
    /// Organization assigned when a room has no explicit mapping
    #[serde(default = "default_org_id")]
    pub default_org_id: String,

    /// room_id -> org_id overrides
    #[serde(default)]
    pub room_orgs: HashMap<String, String>,
}

fn default_org_id() -> String {
    "org-default".to_string()
}

impl Default for OrgConfig {
    fn default() -> Self {
        Self {
            default_org_id: default_org_id(),
            room_orgs: HashMap::new(),
        }
    }
}

impl OrgConfig {
    pub fn org_for_room(&self, room_id: &str) -> String {
        self.room_orgs
            .get(room_id)
            .cloned()
            .unwrap_or_else(|| self.default_org_id.clone())
    }
}

/// Top-level daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub brain: BrainConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub chatwork: ChatworkConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub org: OrgConfig,
}

impl Config {
    /// Load from the standard path, falling back to defaults when the file
    /// is missing or unreadable.
    pub fn load() -> Self {
        Self::load_from(Path::new(CONFIG_PATH))
    }

    pub fn load_from(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => {
                    info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                    Self::default()
                }
            },
            Err(_) => {
                info!("No config at {}, using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Persist current settings (used by install tooling).
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}
