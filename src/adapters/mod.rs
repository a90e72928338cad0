//! External service adapters.
//!
//! Each adapter binds a remote system to one of the crate's seams: the
//! Gamma REST API behind [`MarketFeed`], OpenRouter behind
//! [`CompletionClient`], PostgreSQL behind [`LedgerStore`]. The in-memory
//! store backs tests that need ledger behavior without a database.
//!
//! [`MarketFeed`]: crate::feed::MarketFeed
//! [`CompletionClient`]: crate::llm::CompletionClient
//! [`LedgerStore`]: crate::store::LedgerStore

pub mod gamma;
pub mod memory;
pub mod openrouter;
pub mod postgres;

pub use gamma::GammaFeed;
pub use memory::MemoryStore;
pub use openrouter::OpenRouterClient;
pub use postgres::PostgresStore;

use std::time::Duration;

use rand::Rng;
use reqwest::StatusCode;

const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Retry schedule shared by the HTTP adapters.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_backoff: Duration::from_millis(backoff_ms),
        }
    }

    /// Exponential backoff with up to +25% jitter, capped at 30s.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .base_backoff
            .saturating_mul(2u32.saturating_pow(attempt.min(10)));
        let capped = exp.min(MAX_BACKOFF);

        let jitter_range = (capped.as_millis() as u64 / 4).max(1);
        let jitter = rand::thread_rng().gen_range(0..=jitter_range);
        capped + Duration::from_millis(jitter)
    }
}

/// Whether a transport-level failure is worth another attempt.
pub(crate) fn is_retryable(err: &reqwest::Error) -> bool {
    if let Some(status) = err.status() {
        return is_retryable_status(status);
    }
    err.is_timeout() || err.is_connect()
}

pub(crate) fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy::new(5, 250);

        let first = policy.backoff(0);
        assert!(first >= Duration::from_millis(250));
        assert!(first < Duration::from_millis(250 + 250));

        let tenth = policy.backoff(10);
        assert!(tenth >= MAX_BACKOFF);
        assert!(tenth <= MAX_BACKOFF + Duration::from_millis(MAX_BACKOFF.as_millis() as u64 / 4));
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_status(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(is_retryable_status(StatusCode::BAD_GATEWAY));
        assert!(!is_retryable_status(StatusCode::BAD_REQUEST));
        assert!(!is_retryable_status(StatusCode::UNAUTHORIZED));
        assert!(!is_retryable_status(StatusCode::NOT_FOUND));
    }
}
