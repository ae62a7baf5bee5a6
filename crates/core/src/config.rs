use serde::Deserialize;

/// Root application configuration. Loaded from environment variables
/// with the prefix `RETENTION_ENGINE__`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub ai: AiConfig,
}

/// Scheduling and batching knobs for the three engine jobs.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_matcher_interval_secs")]
    pub matcher_interval_secs: u64,
    #[serde(default = "default_queue_interval_secs")]
    pub queue_interval_secs: u64,
    #[serde(default = "default_watcher_interval_secs")]
    pub watcher_interval_secs: u64,
    /// Max queue entries claimed per processor pass.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Cross-trigger per-user suppression window after any send.
    #[serde(default = "default_rate_limit_hours")]
    pub rate_limit_hours: i64,
    /// Window of recent activity that cancels pending campaigns.
    #[serde(default = "default_activity_window_hours")]
    pub activity_window_hours: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default = "default_telegram_api_base")]
    pub api_base_url: String,
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AiConfig {
    /// Empty key selects the heuristic personalizer.
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_ai_api_base")]
    pub api_base_url: String,
    #[serde(default = "default_ai_model")]
    pub model: String,
    #[serde(default = "default_ai_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_ai_temperature")]
    pub temperature: f32,
}

// Default functions
fn default_matcher_interval_secs() -> u64 {
    300
}
fn default_queue_interval_secs() -> u64 {
    60
}
fn default_watcher_interval_secs() -> u64 {
    300
}
fn default_batch_size() -> usize {
    50
}
fn default_rate_limit_hours() -> i64 {
    24
}
fn default_activity_window_hours() -> i64 {
    24
}
fn default_telegram_api_base() -> String {
    "https://api.telegram.org".to_string()
}
fn default_send_timeout_ms() -> u64 {
    10_000
}
fn default_ai_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_ai_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_ai_timeout_ms() -> u64 {
    15_000
}
fn default_ai_temperature() -> f32 {
    0.7
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            matcher_interval_secs: default_matcher_interval_secs(),
            queue_interval_secs: default_queue_interval_secs(),
            watcher_interval_secs: default_watcher_interval_secs(),
            batch_size: default_batch_size(),
            rate_limit_hours: default_rate_limit_hours(),
            activity_window_hours: default_activity_window_hours(),
        }
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            api_base_url: default_telegram_api_base(),
            send_timeout_ms: default_send_timeout_ms(),
        }
    }
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base_url: default_ai_api_base(),
            model: default_ai_model(),
            timeout_ms: default_ai_timeout_ms(),
            temperature: default_ai_temperature(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("RETENTION_ENGINE")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}
