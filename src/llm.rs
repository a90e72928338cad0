//! Model completion seam.
//!
//! Request/response only, no streaming: a system+user prompt pair in,
//! text plus usage accounting out. Timeouts and retries live behind the
//! trait so the orchestrator sees a single fallible call.

use async_trait::async_trait;

use crate::error::Result;

/// One completed exchange with a model.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub prompt_tokens: Option<i64>,
    pub completion_tokens: Option<i64>,
    pub finish_reason: Option<String>,
    /// Wall-clock duration of the successful attempt.
    pub latency_ms: i64,
}

#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(
        &self,
        model: &str,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<Completion>;
}
