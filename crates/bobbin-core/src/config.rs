use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

// Engine-level constants shared by every deployment
pub const EVENT_RING_CAPACITY: usize = 1000; // replay buffer per actor event stream
pub const DEFAULT_MAX_ITERATIONS: usize = 200; // LLM loop bound per user turn
pub const DEFAULT_MAX_TOKENS: u32 = 8192;
pub const DEFAULT_STOP_GRACE_MS: u64 = 3000; // subprocess drain window before hard kill

/// Top-level config (bobbin.toml + BOBBIN_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BobbinConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub claude: ClaudeConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

impl BobbinConfig {
    /// Load config: explicit path > BOBBIN_CONFIG env > ~/.bobbin/bobbin.toml.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: BobbinConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("BOBBIN_").split("_"))
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))?;

        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// HTTP provider settings for the in-process engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    #[serde(default = "default_anthropic_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_anthropic_base_url(),
            model: default_model(),
        }
    }
}

/// Settings for the streaming CLI subprocess back-end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaudeConfig {
    /// Binary to spawn (a path or a name resolved via PATH).
    #[serde(default = "default_claude_command")]
    pub command: String,
    /// Overrides the subprocess's default model.
    pub model: Option<String>,
    /// Permission mode forwarded on spawn (e.g. "acceptEdits").
    pub permission_mode: Option<String>,
    /// Tools the subprocess may use without prompting. Empty = no flag.
    #[serde(default)]
    pub allowed_tools: Vec<String>,
}

impl Default for ClaudeConfig {
    fn default() -> Self {
        Self {
            command: default_claude_command(),
            model: None,
            permission_mode: None,
            allowed_tools: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// LLM loop bound per user turn. The loop exits with a warning when hit.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// How long `stop` waits for the child to exit before a hard kill.
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            stop_grace_ms: DEFAULT_STOP_GRACE_MS,
        }
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.bobbin/bobbin.toml", home)
}

fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.bobbin/bobbin.db", home)
}

fn default_anthropic_base_url() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_model() -> String {
    "claude-sonnet-4-5".to_string()
}

fn default_claude_command() -> String {
    "claude".to_string()
}

fn default_max_iterations() -> usize {
    DEFAULT_MAX_ITERATIONS
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

fn default_stop_grace_ms() -> u64 {
    DEFAULT_STOP_GRACE_MS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = BobbinConfig::default();
        assert_eq!(config.engine.max_iterations, DEFAULT_MAX_ITERATIONS);
        assert_eq!(config.session.stop_grace_ms, DEFAULT_STOP_GRACE_MS);
        assert_eq!(config.claude.command, "claude");
        assert!(config.database.path.ends_with("bobbin.db"));
    }
}
