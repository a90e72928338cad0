//! Benchmark engines.
//!
//! Four pieces, each owning one phase of the weekly loop:
//! [`CohortManager`] starts cohorts and sweeps them to completion,
//! [`DecisionOrchestrator`] runs the prompt/parse/execute cycle,
//! [`ExecutionEngine`] applies validated instructions to the ledger, and
//! [`ResolutionEngine`] settles markets once the source resolves them.

pub mod execution;
pub mod lifecycle;
pub mod orchestrator;
pub mod resolution;

pub use execution::{BetReceipt, ExecutionEngine, SellReceipt};
pub use lifecycle::CohortManager;
pub use orchestrator::{CycleSummary, DecisionOrchestrator};
pub use resolution::{ResolutionEngine, ResolutionSummary};
