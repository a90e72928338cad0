//! Command-line surface: argument parsing plus the thin handlers behind
//! each subcommand. Handlers wire adapters to engines and print what
//! happened; all behavior lives in the engines.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use rust_decimal::Decimal;

use crate::adapters::{GammaFeed, OpenRouterClient};
use crate::config::AppConfig;
use crate::engine::{CohortManager, DecisionOrchestrator, ResolutionEngine};
use crate::error::{Result, ToutError};
use crate::feed::MarketFeed;
use crate::llm::CompletionClient;
use crate::parser;
use crate::scoring;
use crate::store::LedgerStore;

#[derive(Parser)]
#[command(name = "tout")]
#[command(version)]
#[command(about = "LLM prediction-market benchmark harness", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config directory (default.toml, then <TOUT_ENV>.toml, then env vars)
    #[arg(short, long, default_value = "config", env = "TOUT_CONFIG_DIR")]
    pub config: PathBuf,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Seed this week's cohort, one agent per enabled model
    StartCohort {
        /// Start even if a cohort already began this ISO week
        #[arg(long)]
        force: bool,
    },
    /// Run one decision cycle over every active cohort
    Cycle,
    /// Close expired markets, settle what resolved, complete flat cohorts
    Resolve,
    /// Portfolio report for one cohort
    Status {
        /// Cohort id (default: the latest cohort)
        #[arg(long)]
        cohort: Option<i64>,
    },
    /// Run a model response through the decision parser and print the result
    ParseCheck {
        /// Response file; reads stdin when omitted
        file: Option<PathBuf>,
    },
}

pub async fn start_cohort(
    store: Arc<dyn LedgerStore>,
    config: &AppConfig,
    force: bool,
) -> Result<()> {
    let manager = CohortManager::new(store.clone(), config);
    match manager.start_cohort(force).await {
        Ok(cohort) => {
            println!(
                "Started cohort #{} with {} per agent",
                cohort.sequence,
                money(cohort.initial_balance)
            );
            for agent in store.cohort_agents(cohort.id).await? {
                println!("  {} ({})", agent.display_name, agent.model);
            }
            Ok(())
        }
        Err(ToutError::CohortAlreadyStarted { sequence }) => {
            println!(
                "Cohort #{} already started this week; pass --force to start another",
                sequence
            );
            Ok(())
        }
        Err(e) => Err(e),
    }
}

pub async fn run_cycle(store: Arc<dyn LedgerStore>, config: &AppConfig) -> Result<()> {
    let feed: Arc<dyn MarketFeed> = Arc::new(GammaFeed::new(&config.feed)?);
    let client: Arc<dyn CompletionClient> = Arc::new(OpenRouterClient::new(&config.llm)?);
    let orchestrator = DecisionOrchestrator::new(store, feed, client, config);

    let summary = orchestrator.run_cycle().await?;
    println!(
        "Cycle {}: {} agents ({} skipped), {} decisions ({} retried, {} defaulted), \
         bets {} placed / {} rejected, sells {} executed / {} rejected",
        summary.run_id,
        summary.agents_processed,
        summary.agents_skipped,
        summary.decisions_recorded,
        summary.retried,
        summary.defaulted,
        summary.bets_placed,
        summary.bets_rejected,
        summary.sells_executed,
        summary.sells_rejected,
    );
    Ok(())
}

pub async fn run_resolution(store: Arc<dyn LedgerStore>, config: &AppConfig) -> Result<()> {
    let feed: Arc<dyn MarketFeed> = Arc::new(GammaFeed::new(&config.feed)?);
    let resolution = ResolutionEngine::new(store.clone(), feed, &config.benchmark);

    let summary = resolution.run_sweep().await?;
    println!(
        "Resolution: {} closed, {} checked, {} resolved, {} cancelled, {} skipped, \
         {} positions settled, {} scores recorded ({} skipped)",
        summary.markets_closed,
        summary.markets_checked,
        summary.markets_resolved,
        summary.markets_cancelled,
        summary.markets_skipped,
        summary.positions_settled,
        summary.scores_recorded,
        summary.scores_skipped,
    );

    let manager = CohortManager::new(store, config);
    for cohort in manager.sweep_completions().await? {
        println!("Cohort #{} is complete", cohort.sequence);
    }
    Ok(())
}

pub async fn show_status(store: Arc<dyn LedgerStore>, cohort_id: Option<i64>) -> Result<()> {
    let cohort = match cohort_id {
        Some(id) => store
            .cohort(id)
            .await?
            .ok_or(ToutError::CohortNotFound(id))?,
        None => store.latest_cohort().await?.ok_or(ToutError::NoCohort)?,
    };

    println!(
        "Cohort #{} [{}] methodology {} started {}",
        cohort.sequence,
        cohort.status.as_str(),
        cohort.methodology,
        cohort.started_at.format("%Y-%m-%d"),
    );

    for agent in store.cohort_agents(cohort.id).await? {
        let positions = store.open_positions(agent.id).await?;
        let mut open_value = Decimal::ZERO;
        for position in &positions {
            let market = store.market(position.market_id).await?;
            // Unpriced positions count at cost.
            open_value += market
                .as_ref()
                .and_then(|m| scoring::mark_to_market(position, m))
                .unwrap_or(position.cost_basis);
        }

        let total = agent.cash_balance + open_value;
        let pnl = scoring::total_pnl(total, cohort.initial_balance);
        let pnl_pct = match scoring::total_pnl_pct(total, cohort.initial_balance) {
            Some(pct) => format!("{}%", pct.round_dp(2)),
            None => "n/a".to_string(),
        };
        let tag = if agent.is_bankrupt() { "  BANKRUPT" } else { "" };

        println!(
            "  {:<28} cash {:>12}  open {:>2} worth {:>12}  total {:>12}  P/L {:>12} ({}){}",
            agent.display_name,
            money(agent.cash_balance),
            positions.len(),
            money(open_value),
            money(total),
            money(pnl),
            pnl_pct,
            tag,
        );
    }
    Ok(())
}

/// Amount bounds are checked against the configured initial balance, the
/// same reference a fresh agent would be held to.
pub fn parse_check(config: &AppConfig, file: Option<&Path>) -> Result<()> {
    let raw = match file {
        Some(path) => std::fs::read_to_string(path)?,
        None => {
            let mut buf = String::new();
            std::io::Read::read_to_string(&mut std::io::stdin(), &mut buf)?;
            buf
        }
    };

    let limits = config.benchmark.bet_limits();
    match parser::parse_decision(&raw, config.benchmark.initial_balance, &limits) {
        Ok(action) => {
            println!("OK ({})", action.kind());
            println!("{}", serde_json::to_string_pretty(&action)?);
        }
        Err(e) => {
            println!("Rejected: {}", e);
        }
    }
    Ok(())
}

fn money(d: Decimal) -> String {
    format!("${:.2}", d)
}
