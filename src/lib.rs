pub mod adapters;
pub mod cli;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod feed;
pub mod llm;
pub mod parser;
pub mod prompt;
pub mod scoring;
pub mod store;

pub use adapters::{GammaFeed, MemoryStore, OpenRouterClient, PostgresStore};
pub use config::AppConfig;
pub use engine::{
    CohortManager, CycleSummary, DecisionOrchestrator, ExecutionEngine, ResolutionEngine,
    ResolutionSummary,
};
pub use error::{ExecutionError, ParseError, Result, ToutError};
pub use feed::{MarketFeed, SourceMarket};
pub use llm::{Completion, CompletionClient};
pub use store::LedgerStore;
