use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;

use crate::domain::BetLimits;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub benchmark: BenchmarkConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Model roster; one agent per enabled model joins each cohort.
    #[serde(default = "default_models")]
    pub models: Vec<ModelSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BenchmarkConfig {
    /// Cash every agent starts a cohort with
    #[serde(default = "default_initial_balance")]
    pub initial_balance: Decimal,
    /// Minimum bet floor in USD
    #[serde(default = "default_min_bet")]
    pub min_bet: Decimal,
    /// Fraction of cash balance a single bet may not exceed
    #[serde(default = "default_max_bet_fraction")]
    pub max_bet_fraction: Decimal,
    /// How many markets (by volume) each agent is shown
    #[serde(default = "default_top_markets")]
    pub top_markets: usize,
    /// Pause between agents in a decision cycle
    #[serde(default = "default_agent_pacing_ms")]
    pub agent_pacing_ms: u64,
    /// Pause between market polls in a resolution sweep
    #[serde(default = "default_poll_pacing_ms")]
    pub poll_pacing_ms: u64,
}

impl BenchmarkConfig {
    pub fn bet_limits(&self) -> BetLimits {
        BetLimits {
            min_bet: self.min_bet,
            max_bet_fraction: self.max_bet_fraction,
        }
    }

    pub fn agent_pacing(&self) -> Duration {
        Duration::from_millis(self.agent_pacing_ms)
    }

    pub fn poll_pacing(&self) -> Duration {
        Duration::from_millis(self.poll_pacing_ms)
    }
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            initial_balance: default_initial_balance(),
            min_bet: default_min_bet(),
            max_bet_fraction: default_max_bet_fraction(),
            top_markets: default_top_markets(),
            agent_pacing_ms: default_agent_pacing_ms(),
            poll_pacing_ms: default_poll_pacing_ms(),
        }
    }
}

fn default_initial_balance() -> Decimal {
    dec!(10000)
}

fn default_min_bet() -> Decimal {
    dec!(1)
}

fn default_max_bet_fraction() -> Decimal {
    dec!(0.25)
}

fn default_top_markets() -> usize {
    20
}

fn default_agent_pacing_ms() -> u64 {
    2000
}

fn default_poll_pacing_ms() -> u64 {
    500
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    /// OpenAI-compatible chat completions endpoint
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    /// API key; OPENROUTER_API_KEY is the fallback
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_llm_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl LlmConfig {
    /// Configured key, falling back to the OPENROUTER_API_KEY variable.
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var("OPENROUTER_API_KEY").ok().filter(|k| !k.is_empty()))
    }

    pub fn is_configured(&self) -> bool {
        self.resolved_api_key().is_some()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            api_key: None,
            timeout_secs: default_llm_timeout_secs(),
            max_retries: default_max_retries(),
            backoff_ms: default_llm_backoff_ms(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_llm_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_llm_timeout_secs() -> u64 {
    120
}

fn default_max_retries() -> u32 {
    3
}

fn default_llm_backoff_ms() -> u64 {
    500
}

fn default_temperature() -> f64 {
    0.2
}

fn default_max_tokens() -> u32 {
    2000
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// Market data REST endpoint
    #[serde(default = "default_feed_base_url")]
    pub base_url: String,
    #[serde(default = "default_feed_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_feed_backoff_ms")]
    pub backoff_ms: u64,
}

impl FeedConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: default_feed_base_url(),
            timeout_secs: default_feed_timeout_secs(),
            max_retries: default_max_retries(),
            backoff_ms: default_feed_backoff_ms(),
        }
    }
}

fn default_feed_base_url() -> String {
    "https://gamma-api.polymarket.com".to_string()
}

fn default_feed_timeout_secs() -> u64 {
    30
}

fn default_feed_backoff_ms() -> u64 {
    250
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    #[serde(default = "default_database_url")]
    pub url: String,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

fn default_database_url() -> String {
    "postgres://localhost/tout".to_string()
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// One model in the competition roster.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelSpec {
    /// Slug as sent to the completion API, e.g. "openai/gpt-4o"
    pub slug: String,
    pub display_name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// USD per million prompt tokens, for cost estimates
    #[serde(default)]
    pub prompt_cost_per_mtok: Option<Decimal>,
    /// USD per million completion tokens
    #[serde(default)]
    pub completion_cost_per_mtok: Option<Decimal>,
}

fn default_true() -> bool {
    true
}

fn default_models() -> Vec<ModelSpec> {
    let spec = |slug: &str, name: &str, prompt: Decimal, completion: Decimal| ModelSpec {
        slug: slug.to_string(),
        display_name: name.to_string(),
        enabled: true,
        prompt_cost_per_mtok: Some(prompt),
        completion_cost_per_mtok: Some(completion),
    };
    vec![
        spec("openai/gpt-4o", "GPT-4o", dec!(2.50), dec!(10)),
        spec("anthropic/claude-sonnet-4", "Claude Sonnet 4", dec!(3), dec!(15)),
        spec("google/gemini-2.5-pro", "Gemini 2.5 Pro", dec!(1.25), dec!(10)),
        spec(
            "meta-llama/llama-3.3-70b-instruct",
            "Llama 3.3 70B",
            dec!(0.10),
            dec!(0.25),
        ),
    ]
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default values
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("database.max_connections", 5)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("TOUT_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (TOUT_DATABASE__URL, etc.)
            .add_source(
                Environment::with_prefix("TOUT")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Built-in defaults, for tests and first runs without a config dir
    pub fn default_config() -> Self {
        Self {
            benchmark: BenchmarkConfig::default(),
            llm: LlmConfig::default(),
            feed: FeedConfig::default(),
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
            models: default_models(),
        }
    }

    pub fn enabled_models(&self) -> Vec<&ModelSpec> {
        self.models.iter().filter(|m| m.enabled).collect()
    }

    pub fn model_spec(&self, slug: &str) -> Option<&ModelSpec> {
        self.models.iter().find(|m| m.slug == slug)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.benchmark.initial_balance <= Decimal::ZERO {
            errors.push("benchmark.initial_balance must be positive".to_string());
        }

        if self.benchmark.min_bet <= Decimal::ZERO {
            errors.push("benchmark.min_bet must be positive".to_string());
        }

        if self.benchmark.max_bet_fraction <= Decimal::ZERO
            || self.benchmark.max_bet_fraction > Decimal::ONE
        {
            errors.push("benchmark.max_bet_fraction must be in (0, 1]".to_string());
        }

        if self.benchmark.min_bet
            > self.benchmark.initial_balance * self.benchmark.max_bet_fraction
        {
            errors.push(
                "benchmark.min_bet exceeds the maximum bet at the initial balance".to_string(),
            );
        }

        if self.benchmark.top_markets == 0 {
            errors.push("benchmark.top_markets must be at least 1".to_string());
        }

        if self.database.url.is_empty() {
            errors.push("database.url must be set".to_string());
        }

        if self.models.is_empty() {
            errors.push("models list is empty".to_string());
        } else if self.enabled_models().is_empty() {
            errors.push("no model is enabled".to_string());
        }

        let mut slugs: Vec<&str> = self.models.iter().map(|m| m.slug.as_str()).collect();
        slugs.sort_unstable();
        slugs.dedup();
        if slugs.len() != self.models.len() {
            errors.push("model slugs must be unique".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
