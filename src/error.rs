use rust_decimal::Decimal;
use thiserror::Error;

/// Main error type for the benchmark
#[derive(Error, Debug)]
pub enum ToutError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Validation failed: {0}")]
    Validation(String),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Completion service error: {0}")]
    Completion(String),

    #[error("Market feed error: {0}")]
    Feed(String),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Decision errors
    #[error("Decision parse error: {0}")]
    Parse(String),

    #[error("Execution rejected: {0}")]
    Execution(#[from] ExecutionError),

    // Lifecycle errors
    #[error("A cohort was already started this week (sequence {sequence}); use force to override")]
    CohortAlreadyStarted { sequence: i32 },

    #[error("Cohort not found: {0}")]
    CohortNotFound(i64),

    #[error("No cohort exists yet")]
    NoCohort,

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for ToutError
pub type Result<T> = std::result::Result<T, ToutError>;

/// Per-instruction rejection reasons from the execution engine.
///
/// These are validation outcomes, not store failures: the caller records
/// them against the single instruction and keeps processing its siblings.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("agent not found: {0}")]
    AgentNotFound(i64),

    #[error("agent {0} is bankrupt")]
    AgentBankrupt(i64),

    #[error("cohort {0} is completed; its agents no longer trade")]
    CohortCompleted(i64),

    #[error("market not found: {0}")]
    MarketNotFound(String),

    #[error("market {source_id} is not active (status {status})")]
    MarketNotActive { source_id: String, status: String },

    #[error("bet ${amount} exceeds max bet ${max}")]
    BetExceedsMax { amount: Decimal, max: Decimal },

    #[error("bet ${amount} exceeds cash balance ${balance}")]
    InsufficientBalance { amount: Decimal, balance: Decimal },

    #[error("position not found: {0}")]
    PositionNotFound(i64),

    #[error("position {position_id} is not owned by agent {agent_id}")]
    PositionNotOwned { position_id: i64, agent_id: i64 },

    #[error("position {0} is not open")]
    PositionNotOpen(i64),

    #[error("side {side} is not valid for {kind} market {source_id}")]
    InvalidSide {
        side: String,
        kind: String,
        source_id: String,
    },

    #[error("no usable price for side {side} on market {source_id}")]
    PriceUnavailable { side: String, source_id: String },
}

/// Decision parser failures. The `Display` text is what gets recorded on
/// the Decision row and echoed back to the model in the retry prompt.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("no JSON object with an \"action\" key found in response")]
    NoJsonObject,

    #[error("response is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("missing or non-string \"reasoning\" field")]
    MissingReasoning,

    #[error("missing \"action\" field")]
    MissingAction,

    #[error("unrecognized action \"{0}\" (expected BET, SELL or HOLD)")]
    UnknownAction(String),

    #[error("BET requires a non-empty \"bets\" list")]
    EmptyBets,

    #[error("SELL requires a non-empty \"sells\" list")]
    EmptySells,

    #[error("bet #{index}: {reason}")]
    InvalidBet { index: usize, reason: String },

    #[error("sell #{index}: {reason}")]
    InvalidSell { index: usize, reason: String },
}

impl From<ParseError> for ToutError {
    fn from(err: ParseError) -> Self {
        ToutError::Parse(err.to_string())
    }
}
