//! The decision cycle: mirror markets, prompt every solvent agent once,
//! record what came back, execute what parsed.
//!
//! The decision row is written before any trade it triggers, so the
//! ledger can always be traced back to the exact prompts and raw model
//! output that produced it. A malformed response gets exactly one retry
//! carrying the parse error; a second failure records a defaulted HOLD
//! and the cycle moves on.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::domain::{
    Agent, Cohort, DecisionOrigin, Market, MarketStatus, NewDecision, TradingAction,
};
use crate::engine::ExecutionEngine;
use crate::error::{Result, ToutError};
use crate::feed::MarketFeed;
use crate::llm::CompletionClient;
use crate::parser;
use crate::prompt::{self, PromptPosition};
use crate::scoring;
use crate::store::LedgerStore;

const DEFAULT_HOLD_REASONING: &str = "No usable decision this cycle; holding by default.";

/// What one decision cycle did.
#[derive(Debug, Clone)]
pub struct CycleSummary {
    pub run_id: Uuid,
    pub markets_synced: usize,
    pub agents_processed: usize,
    pub agents_skipped: usize,
    pub decisions_recorded: usize,
    pub retried: usize,
    pub defaulted: usize,
    pub bets_placed: usize,
    pub bets_rejected: usize,
    pub sells_executed: usize,
    pub sells_rejected: usize,
}

impl CycleSummary {
    fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            markets_synced: 0,
            agents_processed: 0,
            agents_skipped: 0,
            decisions_recorded: 0,
            retried: 0,
            defaulted: 0,
            bets_placed: 0,
            bets_rejected: 0,
            sells_executed: 0,
            sells_rejected: 0,
        }
    }
}

/// One agent turn after elicitation, ready to persist.
struct Elicitation {
    action: TradingAction,
    origin: DecisionOrigin,
    raw_response: Option<String>,
    retries: i32,
    error: Option<String>,
    prompt_tokens: Option<i64>,
    completion_tokens: Option<i64>,
    latency_ms: Option<i64>,
}

pub struct DecisionOrchestrator {
    store: Arc<dyn LedgerStore>,
    feed: Arc<dyn MarketFeed>,
    client: Arc<dyn CompletionClient>,
    execution: ExecutionEngine,
    top_markets: usize,
    agent_pacing: Duration,
    /// Per-model (prompt, completion) USD rates per million tokens.
    model_costs: HashMap<String, (Option<Decimal>, Option<Decimal>)>,
}

impl DecisionOrchestrator {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        feed: Arc<dyn MarketFeed>,
        client: Arc<dyn CompletionClient>,
        config: &AppConfig,
    ) -> Self {
        let model_costs = config
            .models
            .iter()
            .map(|m| {
                (
                    m.slug.clone(),
                    (m.prompt_cost_per_mtok, m.completion_cost_per_mtok),
                )
            })
            .collect();
        Self {
            execution: ExecutionEngine::new(store.clone(), config.benchmark.bet_limits()),
            store,
            feed,
            client,
            top_markets: config.benchmark.top_markets,
            agent_pacing: config.benchmark.agent_pacing(),
            model_costs,
        }
    }

    /// Run one decision cycle over every active cohort.
    ///
    /// Store failures abort the cycle; anything that goes wrong with a
    /// single agent's completion, parse or instructions is recorded
    /// against that agent and the cycle continues.
    pub async fn run_cycle(&self) -> Result<CycleSummary> {
        let run_id = Uuid::new_v4();
        let mut summary = CycleSummary::new(run_id);

        summary.markets_synced = match self.sync_markets().await {
            Ok(synced) => synced,
            Err(e) => {
                warn!(error = %e, "Market sync failed; prompting from the last mirrored prices");
                0
            }
        };

        let cohorts = self.store.active_cohorts().await?;
        if cohorts.is_empty() {
            info!(run_id = %run_id, "No active cohorts; decision cycle is a no-op");
            return Ok(summary);
        }

        let now = Utc::now();
        let board: Vec<Market> = self
            .store
            .markets_with_status(MarketStatus::Active)
            .await?
            .into_iter()
            .filter(|m| !m.is_past_close(now))
            .take(self.top_markets)
            .collect();

        let mut paced = false;
        for cohort in &cohorts {
            for agent in self.store.cohort_agents(cohort.id).await? {
                if paced {
                    sleep(self.agent_pacing).await;
                }
                paced = true;

                if agent.is_bankrupt() {
                    debug!(agent_id = agent.id, model = %agent.model, "Agent bankrupt; skipping");
                    summary.agents_skipped += 1;
                    continue;
                }

                self.run_agent(run_id, cohort, agent, &board, &mut summary)
                    .await?;
                summary.agents_processed += 1;
            }
        }

        info!(
            run_id = %run_id,
            markets = summary.markets_synced,
            agents = summary.agents_processed,
            skipped = summary.agents_skipped,
            retried = summary.retried,
            defaulted = summary.defaulted,
            bets = summary.bets_placed,
            bets_rejected = summary.bets_rejected,
            sells = summary.sells_executed,
            sells_rejected = summary.sells_rejected,
            "Decision cycle complete"
        );
        Ok(summary)
    }

    /// Refresh the local mirror from the source's top markets.
    async fn sync_markets(&self) -> Result<usize> {
        let snapshots = self.feed.top_markets(self.top_markets).await?;
        let mut synced = 0usize;
        for snapshot in &snapshots {
            self.store.upsert_market(&snapshot.to_upsert()).await?;
            synced += 1;
        }
        debug!(synced, "Market mirror refreshed");
        Ok(synced)
    }

    #[instrument(skip_all, fields(agent_id = agent.id, model = %agent.model))]
    async fn run_agent(
        &self,
        run_id: Uuid,
        cohort: &Cohort,
        agent: Agent,
        board: &[Market],
        summary: &mut CycleSummary,
    ) -> Result<()> {
        let positions = self.prompt_positions(&agent).await?;
        let system_prompt = prompt::system_prompt(&self.execution.limits());
        let user_prompt = prompt::portfolio_prompt(&agent, &positions, board);

        let elicited = self.elicit(&agent, &system_prompt, &user_prompt).await;

        let parsed = match elicited.origin {
            DecisionOrigin::Defaulted => None,
            _ => Some(serde_json::to_value(&elicited.action)?),
        };
        let cost_usd = self.estimate_cost(
            &agent.model,
            elicited.prompt_tokens,
            elicited.completion_tokens,
        );

        let decision = self
            .store
            .record_decision(NewDecision {
                run_id,
                agent_id: agent.id,
                cohort_id: cohort.id,
                system_prompt,
                user_prompt,
                raw_response: elicited.raw_response,
                parsed,
                action: elicited.action.kind(),
                origin: elicited.origin,
                retries: elicited.retries,
                error: elicited.error,
                prompt_tokens: elicited.prompt_tokens,
                completion_tokens: elicited.completion_tokens,
                cost_usd,
                latency_ms: elicited.latency_ms,
            })
            .await?;

        summary.decisions_recorded += 1;
        match elicited.origin {
            DecisionOrigin::Model => {}
            DecisionOrigin::Retried => summary.retried += 1,
            DecisionOrigin::Defaulted => summary.defaulted += 1,
        }

        match &elicited.action {
            TradingAction::Bet { bets, .. } => {
                for bet in bets {
                    match self
                        .execution
                        .execute_bet(agent.id, bet, Some(decision.id))
                        .await
                    {
                        Ok(_) => summary.bets_placed += 1,
                        Err(ToutError::Execution(e)) => {
                            warn!(market = %bet.market_id, error = %e, "Bet rejected");
                            summary.bets_rejected += 1;
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
            TradingAction::Sell { sells, .. } => {
                match self
                    .execution
                    .execute_sells(agent.id, sells, Some(decision.id))
                    .await
                {
                    Ok(outcomes) => {
                        for outcome in &outcomes {
                            match outcome {
                                Ok(_) => summary.sells_executed += 1,
                                Err(_) => summary.sells_rejected += 1,
                            }
                        }
                    }
                    Err(ToutError::Execution(e)) => {
                        warn!(error = %e, "Sell batch rejected");
                        summary.sells_rejected += sells.len();
                    }
                    Err(e) => return Err(e),
                }
            }
            TradingAction::Hold { .. } => {
                debug!("Agent holds");
            }
        }

        Ok(())
    }

    /// Ask the model, parse, and retry once on a malformed response.
    /// Never fails: anything unusable becomes a defaulted HOLD with the
    /// failure recorded.
    async fn elicit(&self, agent: &Agent, system: &str, user: &str) -> Elicitation {
        let first = match self.client.complete(&agent.model, system, user).await {
            Ok(completion) => completion,
            Err(e) => {
                warn!(error = %e, "Completion request failed; defaulting to HOLD");
                return Elicitation {
                    action: TradingAction::hold(DEFAULT_HOLD_REASONING),
                    origin: DecisionOrigin::Defaulted,
                    raw_response: None,
                    retries: 0,
                    error: Some(e.to_string()),
                    prompt_tokens: None,
                    completion_tokens: None,
                    latency_ms: None,
                };
            }
        };

        let limits = self.execution.limits();
        let parse_err = match parser::parse_decision(&first.text, agent.cash_balance, &limits) {
            Ok(action) => {
                return Elicitation {
                    action,
                    origin: DecisionOrigin::Model,
                    raw_response: Some(first.text),
                    retries: 0,
                    error: None,
                    prompt_tokens: first.prompt_tokens,
                    completion_tokens: first.completion_tokens,
                    latency_ms: Some(first.latency_ms),
                }
            }
            Err(e) => e,
        };

        warn!(
            error = %parse_err,
            response = %parser::truncate_response(&first.text),
            "Malformed response; retrying once"
        );
        let retry_user = prompt::retry_prompt(user, &first.text, &parse_err);

        let second = match self.client.complete(&agent.model, system, &retry_user).await {
            Ok(completion) => completion,
            Err(e) => {
                warn!(error = %e, "Retry completion failed; defaulting to HOLD");
                return Elicitation {
                    action: TradingAction::hold(DEFAULT_HOLD_REASONING),
                    origin: DecisionOrigin::Defaulted,
                    raw_response: Some(first.text),
                    retries: 1,
                    error: Some(format!("{}; retry: {}", parse_err, e)),
                    prompt_tokens: first.prompt_tokens,
                    completion_tokens: first.completion_tokens,
                    latency_ms: Some(first.latency_ms),
                };
            }
        };

        let prompt_tokens = sum_tokens(first.prompt_tokens, second.prompt_tokens);
        let completion_tokens = sum_tokens(first.completion_tokens, second.completion_tokens);
        let latency_ms = Some(first.latency_ms + second.latency_ms);

        match parser::parse_decision(&second.text, agent.cash_balance, &limits) {
            Ok(action) => Elicitation {
                action,
                origin: DecisionOrigin::Retried,
                raw_response: Some(second.text),
                retries: 1,
                error: None,
                prompt_tokens,
                completion_tokens,
                latency_ms,
            },
            Err(second_err) => {
                warn!(error = %second_err, "Retry still malformed; defaulting to HOLD");
                Elicitation {
                    action: TradingAction::hold(DEFAULT_HOLD_REASONING),
                    origin: DecisionOrigin::Defaulted,
                    raw_response: Some(second.text),
                    retries: 1,
                    error: Some(format!("{}; retry: {}", parse_err, second_err)),
                    prompt_tokens,
                    completion_tokens,
                    latency_ms,
                }
            }
        }
    }

    /// Open positions marked to current mirrored prices for the prompt.
    async fn prompt_positions(&self, agent: &Agent) -> Result<Vec<PromptPosition>> {
        let mut out = Vec::new();
        for position in self.store.open_positions(agent.id).await? {
            let market = self.store.market(position.market_id).await?;
            let (question, current_price, current_value) = match &market {
                Some(m) => (
                    m.question.clone(),
                    m.price_for(&position.side),
                    scoring::mark_to_market(&position, m),
                ),
                None => (format!("market #{}", position.market_id), None, None),
            };
            out.push(PromptPosition {
                position_id: position.id,
                question,
                side: position.side.to_string(),
                shares: position.shares,
                avg_entry_price: position.avg_entry_price,
                cost_basis: position.cost_basis,
                current_price,
                current_value,
            });
        }
        Ok(out)
    }

    fn estimate_cost(
        &self,
        model: &str,
        prompt_tokens: Option<i64>,
        completion_tokens: Option<i64>,
    ) -> Option<Decimal> {
        let (prompt_rate, completion_rate) = self.model_costs.get(model)?;
        let mtok = Decimal::from(1_000_000);
        let mut cost = Decimal::ZERO;
        let mut priced = false;
        if let (Some(rate), Some(tokens)) = (*prompt_rate, prompt_tokens) {
            cost += rate * Decimal::from(tokens) / mtok;
            priced = true;
        }
        if let (Some(rate), Some(tokens)) = (*completion_rate, completion_tokens) {
            cost += rate * Decimal::from(tokens) / mtok;
            priced = true;
        }
        priced.then_some(cost)
    }
}

fn sum_tokens(a: Option<i64>, b: Option<i64>) -> Option<i64> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x + y),
        (Some(x), None) | (None, Some(x)) => Some(x),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryStore;
    use crate::config::{BenchmarkConfig, ModelSpec};
    use crate::domain::{ActionKind, BetInstruction, BetLimits, MarketKind, Side};
    use crate::feed::{SourceMarket, SourceStatus};
    use crate::llm::Completion;
    use crate::store::{MarketUpsert, NewAgent, NewCohort};
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use rust_decimal_macros::dec;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Scripted completion client: pops canned replies per model and
    /// records every prompt pair it was sent.
    #[derive(Default)]
    struct StubClient {
        script: Mutex<HashMap<String, VecDeque<std::result::Result<String, String>>>>,
        prompts: Mutex<Vec<(String, String)>>,
    }

    impl StubClient {
        fn respond(self, model: &str, text: &str) -> Self {
            self.script
                .lock()
                .unwrap()
                .entry(model.to_string())
                .or_default()
                .push_back(Ok(text.to_string()));
            self
        }

        fn fail(self, model: &str, message: &str) -> Self {
            self.script
                .lock()
                .unwrap()
                .entry(model.to_string())
                .or_default()
                .push_back(Err(message.to_string()));
            self
        }

        fn prompts(&self) -> Vec<(String, String)> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CompletionClient for StubClient {
        async fn complete(
            &self,
            model: &str,
            system_prompt: &str,
            user_prompt: &str,
        ) -> Result<Completion> {
            self.prompts
                .lock()
                .unwrap()
                .push((system_prompt.to_string(), user_prompt.to_string()));
            let reply = self
                .script
                .lock()
                .unwrap()
                .get_mut(model)
                .and_then(VecDeque::pop_front);
            match reply {
                Some(Ok(text)) => Ok(Completion {
                    text,
                    prompt_tokens: Some(1000),
                    completion_tokens: Some(100),
                    finish_reason: Some("stop".to_string()),
                    latency_ms: 5,
                }),
                Some(Err(message)) => Err(ToutError::Completion(message)),
                None => Err(ToutError::Completion(format!(
                    "no scripted reply for {}",
                    model
                ))),
            }
        }
    }

    #[derive(Default)]
    struct StubFeed {
        snapshots: Vec<SourceMarket>,
    }

    impl StubFeed {
        fn with(mut self, snapshot: SourceMarket) -> Self {
            self.snapshots.push(snapshot);
            self
        }
    }

    #[async_trait]
    impl MarketFeed for StubFeed {
        async fn top_markets(&self, limit: usize) -> Result<Vec<SourceMarket>> {
            Ok(self.snapshots.iter().take(limit).cloned().collect())
        }

        async fn market(&self, source_id: &str) -> Result<Option<SourceMarket>> {
            Ok(self
                .snapshots
                .iter()
                .find(|s| s.source_id == source_id)
                .cloned())
        }
    }

    fn snapshot(source_id: &str, yes_price: Decimal) -> SourceMarket {
        SourceMarket {
            source_id: source_id.to_string(),
            question: format!("Question for {}?", source_id),
            category: None,
            kind: MarketKind::Binary,
            yes_price: Some(yes_price),
            outcome_prices: HashMap::new(),
            volume: dec!(50000),
            close_time: None,
            status: SourceStatus::Active,
            winning_outcome: None,
        }
    }

    fn model_spec(slug: &str) -> ModelSpec {
        ModelSpec {
            slug: slug.to_string(),
            display_name: slug.to_string(),
            enabled: true,
            prompt_cost_per_mtok: Some(dec!(2)),
            completion_cost_per_mtok: Some(dec!(6)),
        }
    }

    fn test_config(models: Vec<ModelSpec>) -> AppConfig {
        AppConfig {
            benchmark: BenchmarkConfig {
                agent_pacing_ms: 0,
                poll_pacing_ms: 0,
                ..Default::default()
            },
            llm: Default::default(),
            feed: Default::default(),
            database: Default::default(),
            logging: Default::default(),
            models,
        }
    }

    async fn seed_cohort(store: &MemoryStore, models: &[&str]) -> (i64, Vec<Agent>) {
        let cohort = store
            .create_cohort(
                NewCohort {
                    sequence: 1,
                    methodology: "v1".to_string(),
                    initial_balance: dec!(10000),
                },
                models
                    .iter()
                    .map(|m| NewAgent {
                        model: m.to_string(),
                        display_name: m.to_string(),
                    })
                    .collect(),
            )
            .await
            .unwrap();
        let agents = store.cohort_agents(cohort.id).await.unwrap();
        (cohort.id, agents)
    }

    fn orchestrator(
        store: &Arc<MemoryStore>,
        feed: StubFeed,
        client: Arc<StubClient>,
        models: Vec<ModelSpec>,
    ) -> DecisionOrchestrator {
        DecisionOrchestrator::new(
            store.clone(),
            Arc::new(feed),
            client,
            &test_config(models),
        )
    }

    const HOLD_JSON: &str = r#"{"action": "HOLD", "reasoning": "Nothing looks mispriced."}"#;

    #[tokio::test]
    async fn test_cycle_records_model_hold() {
        let store = Arc::new(MemoryStore::new());
        let (_, agents) = seed_cohort(&store, &["test/model"]).await;
        let client = Arc::new(StubClient::default().respond("test/model", HOLD_JSON));
        let feed = StubFeed::default().with(snapshot("mkt-1", dec!(0.40)));

        let orch = orchestrator(&store, feed, client.clone(), vec![model_spec("test/model")]);
        let summary = orch.run_cycle().await.unwrap();

        assert_eq!(summary.markets_synced, 1);
        assert_eq!(summary.agents_processed, 1);
        assert_eq!(summary.decisions_recorded, 1);
        assert_eq!(summary.defaulted, 0);

        let mirrored = store.market_by_source_id("mkt-1").await.unwrap();
        assert!(mirrored.is_some());

        let decisions = store.decisions().await;
        assert_eq!(decisions.len(), 1);
        let d = &decisions[0];
        assert_eq!(d.agent_id, agents[0].id);
        assert_eq!(d.run_id, summary.run_id);
        assert_eq!(d.action, ActionKind::Hold);
        assert_eq!(d.origin, DecisionOrigin::Model);
        assert_eq!(d.retries, 0);
        assert!(d.parsed.is_some());
        assert!(d.error.is_none());
        // 1000 prompt tokens at $2/M plus 100 completion tokens at $6/M.
        assert_eq!(d.cost_usd, Some(dec!(0.0026)));

        let (system, user) = &client.prompts()[0];
        assert!(system.contains("25%"));
        assert!(user.contains("mkt-1"));
        assert!(user.contains("Cash balance: $10000"));
    }

    #[tokio::test]
    async fn test_cycle_executes_bet_decision() {
        let store = Arc::new(MemoryStore::new());
        let (_, agents) = seed_cohort(&store, &["test/model"]).await;
        let bet_json = r#"{"action": "BET", "reasoning": "YES is cheap.",
            "bets": [{"market_id": "mkt-1", "side": "YES", "amount": 500}]}"#;
        let client = Arc::new(StubClient::default().respond("test/model", bet_json));
        let feed = StubFeed::default().with(snapshot("mkt-1", dec!(0.40)));

        let orch = orchestrator(&store, feed, client, vec![model_spec("test/model")]);
        let summary = orch.run_cycle().await.unwrap();

        assert_eq!(summary.bets_placed, 1);
        assert_eq!(summary.bets_rejected, 0);

        let agent = store.agent(agents[0].id).await.unwrap().unwrap();
        assert_eq!(agent.cash_balance, dec!(9500));
        assert_eq!(agent.total_invested, dec!(500));

        let decisions = store.decisions().await;
        let trades = store.trades().await;
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].decision_id, Some(decisions[0].id));
        assert_eq!(trades[0].shares, dec!(1250));
        assert_eq!(trades[0].implied_confidence, Some(dec!(0.2)));
    }

    #[tokio::test]
    async fn test_malformed_response_retried_once() {
        let store = Arc::new(MemoryStore::new());
        seed_cohort(&store, &["test/model"]).await;
        let client = Arc::new(
            StubClient::default()
                .respond("test/model", "I think I will hold this week.")
                .respond("test/model", HOLD_JSON),
        );
        let feed = StubFeed::default().with(snapshot("mkt-1", dec!(0.40)));

        let orch = orchestrator(&store, feed, client.clone(), vec![model_spec("test/model")]);
        let summary = orch.run_cycle().await.unwrap();

        assert_eq!(summary.defaulted, 0);
        assert_eq!(summary.retried, 1);
        let decisions = store.decisions().await;
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].origin, DecisionOrigin::Retried);
        assert_eq!(decisions[0].retries, 1);
        assert_eq!(decisions[0].action, ActionKind::Hold);
        // Both attempts are billed.
        assert_eq!(decisions[0].prompt_tokens, Some(2000));

        let prompts = client.prompts();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].1.contains("could not be parsed"));
        assert!(prompts[1].1.contains("I think I will hold this week."));
    }

    #[tokio::test]
    async fn test_malformed_twice_defaults_to_hold() {
        let store = Arc::new(MemoryStore::new());
        seed_cohort(&store, &["test/model"]).await;
        let client = Arc::new(
            StubClient::default()
                .respond("test/model", "not json")
                .respond("test/model", "still not json"),
        );
        let feed = StubFeed::default();

        let orch = orchestrator(&store, feed, client, vec![model_spec("test/model")]);
        let summary = orch.run_cycle().await.unwrap();

        assert_eq!(summary.defaulted, 1);
        let decisions = store.decisions().await;
        assert_eq!(decisions[0].origin, DecisionOrigin::Defaulted);
        assert_eq!(decisions[0].action, ActionKind::Hold);
        assert_eq!(decisions[0].retries, 1);
        assert!(decisions[0].parsed.is_none());
        assert!(decisions[0].error.is_some());
        assert_eq!(
            decisions[0].raw_response.as_deref(),
            Some("still not json")
        );
        assert!(store.trades().await.is_empty());
    }

    #[tokio::test]
    async fn test_completion_failure_defaults_without_retry() {
        let store = Arc::new(MemoryStore::new());
        seed_cohort(&store, &["test/model"]).await;
        let client = Arc::new(StubClient::default().fail("test/model", "upstream 500"));
        let feed = StubFeed::default();

        let orch = orchestrator(&store, feed, client.clone(), vec![model_spec("test/model")]);
        let summary = orch.run_cycle().await.unwrap();

        assert_eq!(summary.defaulted, 1);
        let decisions = store.decisions().await;
        assert_eq!(decisions[0].origin, DecisionOrigin::Defaulted);
        assert_eq!(decisions[0].retries, 0);
        assert!(decisions[0].raw_response.is_none());
        assert!(decisions[0].error.as_deref().unwrap().contains("upstream 500"));
        // Transport failures get no protocol retry.
        assert_eq!(client.prompts().len(), 1);
    }

    #[tokio::test]
    async fn test_one_agent_failure_doesnt_abort_cycle() {
        let store = Arc::new(MemoryStore::new());
        seed_cohort(&store, &["model/a", "model/b"]).await;
        let client = Arc::new(
            StubClient::default()
                .fail("model/a", "timeout")
                .respond("model/b", HOLD_JSON),
        );
        let feed = StubFeed::default();

        let orch = orchestrator(
            &store,
            feed,
            client,
            vec![model_spec("model/a"), model_spec("model/b")],
        );
        let summary = orch.run_cycle().await.unwrap();

        assert_eq!(summary.agents_processed, 2);
        assert_eq!(summary.defaulted, 1);
        let decisions = store.decisions().await;
        assert_eq!(decisions.len(), 2);
        assert_eq!(decisions[0].origin, DecisionOrigin::Defaulted);
        assert_eq!(decisions[1].origin, DecisionOrigin::Model);
    }

    #[tokio::test]
    async fn test_bankrupt_agent_skipped() {
        let store = Arc::new(MemoryStore::new());
        let (_, agents) = seed_cohort(&store, &["test/model"]).await;

        let mut broke = agents[0].clone();
        broke.apply_ledger_update(dec!(-10000), dec!(0));
        assert!(broke.is_bankrupt());
        store.put_agent(broke).await;

        let client = Arc::new(StubClient::default());
        let orch = orchestrator(
            &store,
            StubFeed::default(),
            client.clone(),
            vec![model_spec("test/model")],
        );
        let summary = orch.run_cycle().await.unwrap();

        assert_eq!(summary.agents_skipped, 1);
        assert_eq!(summary.agents_processed, 0);
        assert_eq!(summary.decisions_recorded, 0);
        assert!(client.prompts().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_bet_counts_without_aborting_batch() {
        let store = Arc::new(MemoryStore::new());
        seed_cohort(&store, &["test/model"]).await;
        // Both pass the parser against the prompt-time balance; the second
        // exceeds the fraction cap once the first has debited cash.
        let bet_json = r#"{"action": "BET", "reasoning": "Going big.",
            "bets": [
                {"market_id": "mkt-1", "side": "YES", "amount": 2500},
                {"market_id": "mkt-1", "side": "NO", "amount": 2500}
            ]}"#;
        let client = Arc::new(StubClient::default().respond("test/model", bet_json));
        let feed = StubFeed::default().with(snapshot("mkt-1", dec!(0.40)));

        let orch = orchestrator(&store, feed, client, vec![model_spec("test/model")]);
        let summary = orch.run_cycle().await.unwrap();

        assert_eq!(summary.bets_placed, 1);
        assert_eq!(summary.bets_rejected, 1);
        assert_eq!(store.trades().await.len(), 1);
    }

    #[tokio::test]
    async fn test_sell_decision_executes_against_open_position() {
        let store = Arc::new(MemoryStore::new());
        let (_, agents) = seed_cohort(&store, &["test/model"]).await;
        let agent_id = agents[0].id;

        store
            .upsert_market(&snapshot("mkt-1", dec!(0.40)).to_upsert())
            .await
            .unwrap();
        let engine = ExecutionEngine::new(
            store.clone(),
            BetLimits {
                min_bet: dec!(1),
                max_bet_fraction: dec!(0.25),
            },
        );
        let receipt = engine
            .execute_bet(
                agent_id,
                &BetInstruction {
                    market_id: "mkt-1".to_string(),
                    side: Side::Yes,
                    amount: dec!(500),
                },
                None,
            )
            .await
            .unwrap();

        let sell_json = format!(
            r#"{{"action": "SELL", "reasoning": "Taking profit.",
                "sells": [{{"position_id": {}, "percentage": 50}}]}}"#,
            receipt.position.id
        );
        let client = Arc::new(StubClient::default().respond("test/model", &sell_json));
        let feed = StubFeed::default().with(snapshot("mkt-1", dec!(0.60)));

        let orch = orchestrator(&store, feed, client, vec![model_spec("test/model")]);
        let summary = orch.run_cycle().await.unwrap();

        assert_eq!(summary.sells_executed, 1);
        assert_eq!(summary.sells_rejected, 0);

        let position = store.position(receipt.position.id).await.unwrap().unwrap();
        assert_eq!(position.shares, dec!(625));

        let decisions = store.decisions().await;
        let trades = store.trades().await;
        let sell = trades.iter().find(|t| t.kind == crate::domain::TradeKind::Sell);
        assert_eq!(sell.unwrap().decision_id, Some(decisions[0].id));
    }

    #[tokio::test]
    async fn test_board_excludes_markets_past_close() {
        let store = Arc::new(MemoryStore::new());
        seed_cohort(&store, &["test/model"]).await;

        let mut expired = snapshot("mkt-expired", dec!(0.50));
        expired.close_time = Some(Utc::now() - ChronoDuration::hours(2));
        store.upsert_market(&expired.to_upsert()).await.unwrap();
        store
            .upsert_market(&MarketUpsert {
                close_time: Some(Utc::now() + ChronoDuration::hours(2)),
                ..snapshot("mkt-open", dec!(0.50)).to_upsert()
            })
            .await
            .unwrap();

        let client = Arc::new(StubClient::default().respond("test/model", HOLD_JSON));
        let orch = orchestrator(
            &store,
            StubFeed::default(),
            client.clone(),
            vec![model_spec("test/model")],
        );
        orch.run_cycle().await.unwrap();

        let user = &client.prompts()[0].1;
        assert!(user.contains("mkt-open"));
        assert!(!user.contains("mkt-expired"));
    }

    #[tokio::test]
    async fn test_feed_failure_uses_mirrored_markets() {
        struct DownFeed;

        #[async_trait]
        impl MarketFeed for DownFeed {
            async fn top_markets(&self, _limit: usize) -> Result<Vec<SourceMarket>> {
                Err(ToutError::Feed("connection refused".to_string()))
            }

            async fn market(&self, _source_id: &str) -> Result<Option<SourceMarket>> {
                Err(ToutError::Feed("connection refused".to_string()))
            }
        }

        let store = Arc::new(MemoryStore::new());
        seed_cohort(&store, &["test/model"]).await;
        store
            .upsert_market(&snapshot("mkt-stale", dec!(0.30)).to_upsert())
            .await
            .unwrap();

        let client = Arc::new(StubClient::default().respond("test/model", HOLD_JSON));
        let orch = DecisionOrchestrator::new(
            store.clone(),
            Arc::new(DownFeed),
            client.clone(),
            &test_config(vec![model_spec("test/model")]),
        );
        let summary = orch.run_cycle().await.unwrap();

        assert_eq!(summary.markets_synced, 0);
        assert_eq!(summary.decisions_recorded, 1);
        assert!(client.prompts()[0].1.contains("mkt-stale"));
    }
}
