//! Cohort lifecycle: weekly starts and completion sweeps.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::config::{AppConfig, ModelSpec};
use crate::domain::Cohort;
use crate::error::{Result, ToutError};
use crate::prompt::PROTOCOL_VERSION;
use crate::store::{LedgerStore, NewAgent, NewCohort};

pub struct CohortManager {
    store: Arc<dyn LedgerStore>,
    initial_balance: Decimal,
    models: Vec<ModelSpec>,
}

impl CohortManager {
    pub fn new(store: Arc<dyn LedgerStore>, config: &AppConfig) -> Self {
        Self {
            store,
            initial_balance: config.benchmark.initial_balance,
            models: config.enabled_models().into_iter().cloned().collect(),
        }
    }

    /// Start a new cohort with one agent per enabled model.
    ///
    /// Idempotent per ISO week: a second start in the same week is
    /// rejected with [`ToutError::CohortAlreadyStarted`] unless `force`
    /// is set. Sequence numbers increase monotonically either way.
    pub async fn start_cohort(&self, force: bool) -> Result<Cohort> {
        if self.models.is_empty() {
            return Err(ToutError::Validation(
                "no enabled models to seed a cohort with".to_string(),
            ));
        }

        let latest = self.store.latest_cohort().await?;
        if let Some(ref latest) = latest {
            if !force && same_iso_week(latest.started_at, Utc::now()) {
                return Err(ToutError::CohortAlreadyStarted {
                    sequence: latest.sequence,
                });
            }
        }

        let sequence = latest.map(|c| c.sequence + 1).unwrap_or(1);
        let agents = self
            .models
            .iter()
            .map(|m| NewAgent {
                model: m.slug.clone(),
                display_name: m.display_name.clone(),
            })
            .collect();

        let cohort = self
            .store
            .create_cohort(
                NewCohort {
                    sequence,
                    methodology: PROTOCOL_VERSION.to_string(),
                    initial_balance: self.initial_balance,
                },
                agents,
            )
            .await?;

        info!(
            cohort_id = cohort.id,
            sequence,
            models = self.models.len(),
            "Started cohort"
        );
        Ok(cohort)
    }

    /// Complete every active cohort whose agents have flattened out.
    ///
    /// A cohort completes once it has zero open positions across all of
    /// its agents and at least one recorded decision; the decision floor
    /// keeps a freshly started cohort from completing before its first
    /// cycle runs. Returns the cohorts completed by this sweep.
    pub async fn sweep_completions(&self) -> Result<Vec<Cohort>> {
        let mut completed = Vec::new();

        for cohort in self.store.active_cohorts().await? {
            let open = self.store.open_position_count(cohort.id).await?;
            if open > 0 {
                continue;
            }

            let decisions = self.store.decision_count(cohort.id).await?;
            if decisions == 0 {
                debug!(
                    cohort_id = cohort.id,
                    "Cohort has no decisions yet; leaving active"
                );
                continue;
            }

            self.store.complete_cohort(cohort.id).await?;
            info!(
                cohort_id = cohort.id,
                sequence = cohort.sequence,
                "Cohort completed"
            );
            completed.push(cohort);
        }

        Ok(completed)
    }
}

fn same_iso_week(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    let (wa, wb) = (a.iso_week(), b.iso_week());
    wa.year() == wb.year() && wa.week() == wb.week()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryStore;
    use crate::domain::{ActionKind, CohortStatus, DecisionOrigin, MarketKind, MarketStatus, NewDecision, Side};
    use crate::store::{BetUpdate, MarketUpsert, NewPosition, PositionUpsert};
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;
    use uuid::Uuid;

    fn manager(store: &Arc<MemoryStore>, models: usize) -> CohortManager {
        let mut config = AppConfig::default_config();
        config.models.truncate(models);
        CohortManager::new(store.clone(), &config)
    }

    async fn record_hold(store: &MemoryStore, cohort_id: i64, agent_id: i64) {
        store
            .record_decision(NewDecision {
                run_id: Uuid::new_v4(),
                agent_id,
                cohort_id,
                system_prompt: "rules".to_string(),
                user_prompt: "portfolio".to_string(),
                raw_response: Some("{\"action\": \"HOLD\", \"reasoning\": \"wait\"}".to_string()),
                parsed: None,
                action: ActionKind::Hold,
                origin: DecisionOrigin::Model,
                retries: 0,
                error: None,
                prompt_tokens: None,
                completion_tokens: None,
                cost_usd: None,
                latency_ms: None,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_start_cohort_seeds_one_agent_per_enabled_model() {
        let store = Arc::new(MemoryStore::new());
        let manager = manager(&store, 3);

        let cohort = manager.start_cohort(false).await.unwrap();
        assert_eq!(cohort.sequence, 1);
        assert_eq!(cohort.methodology, PROTOCOL_VERSION);
        assert_eq!(cohort.initial_balance, dec!(10000));

        let agents = store.cohort_agents(cohort.id).await.unwrap();
        assert_eq!(agents.len(), 3);
        assert!(agents.iter().all(|a| a.cash_balance == dec!(10000)));
    }

    #[tokio::test]
    async fn test_start_cohort_same_week_rejected_unless_forced() {
        let store = Arc::new(MemoryStore::new());
        let manager = manager(&store, 2);

        let first = manager.start_cohort(false).await.unwrap();
        let err = manager.start_cohort(false).await.unwrap_err();
        assert!(matches!(
            err,
            ToutError::CohortAlreadyStarted { sequence } if sequence == first.sequence
        ));

        let forced = manager.start_cohort(true).await.unwrap();
        assert_eq!(forced.sequence, first.sequence + 1);
    }

    #[tokio::test]
    async fn test_sweep_skips_cohort_without_decisions() {
        let store = Arc::new(MemoryStore::new());
        let manager = manager(&store, 2);
        let cohort = manager.start_cohort(false).await.unwrap();

        assert!(manager.sweep_completions().await.unwrap().is_empty());
        let still = store.cohort(cohort.id).await.unwrap().unwrap();
        assert_eq!(still.status, CohortStatus::Active);
    }

    #[tokio::test]
    async fn test_sweep_completes_flattened_cohort() {
        let store = Arc::new(MemoryStore::new());
        let manager = manager(&store, 2);
        let cohort = manager.start_cohort(false).await.unwrap();
        let agents = store.cohort_agents(cohort.id).await.unwrap();
        record_hold(&store, cohort.id, agents[0].id).await;

        let completed = manager.sweep_completions().await.unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].id, cohort.id);

        let after = store.cohort(cohort.id).await.unwrap().unwrap();
        assert_eq!(after.status, CohortStatus::Completed);
        assert!(after.completed_at.is_some());

        // Completion is one-way; a second sweep finds nothing active.
        assert!(manager.sweep_completions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sweep_leaves_cohort_with_open_positions() {
        let store = Arc::new(MemoryStore::new());
        let manager = manager(&store, 1);
        let cohort = manager.start_cohort(false).await.unwrap();
        let mut agent = store.cohort_agents(cohort.id).await.unwrap().remove(0);
        record_hold(&store, cohort.id, agent.id).await;

        let market = store
            .upsert_market(&MarketUpsert {
                source_id: "mkt-1".to_string(),
                question: "Open?".to_string(),
                category: None,
                kind: MarketKind::Binary,
                yes_price: Some(dec!(0.40)),
                outcome_prices: HashMap::new(),
                volume: dec!(1000),
                status: MarketStatus::Active,
                close_time: None,
            })
            .await
            .unwrap();

        let agent_id = agent.id;
        agent.apply_ledger_update(dec!(-100), dec!(100));
        store
            .record_bet(&BetUpdate {
                agent,
                position: PositionUpsert::New(NewPosition {
                    agent_id,
                    market_id: market.id,
                    side: Side::Yes,
                    shares: dec!(250),
                    avg_entry_price: dec!(0.40),
                    cost_basis: dec!(100),
                }),
                decision_id: None,
                side: Side::Yes,
                shares: dec!(250),
                price: dec!(0.40),
                amount: dec!(100),
                implied_confidence: Some(dec!(0.04)),
            })
            .await
            .unwrap();

        assert!(manager.sweep_completions().await.unwrap().is_empty());
        let still = store.cohort(cohort.id).await.unwrap().unwrap();
        assert_eq!(still.status, CohortStatus::Active);
    }

    #[test]
    fn test_same_iso_week_boundaries() {
        // 2024-12-30 and 2025-01-02 share ISO week 1 of 2025.
        let a = Utc.with_ymd_and_hms(2024, 12, 30, 12, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2025, 1, 2, 12, 0, 0).unwrap();
        assert!(same_iso_week(a, b));

        // Sunday to Monday crosses the week boundary.
        let sun = Utc.with_ymd_and_hms(2025, 1, 5, 23, 0, 0).unwrap();
        let mon = Utc.with_ymd_and_hms(2025, 1, 6, 1, 0, 0).unwrap();
        assert!(!same_iso_week(sun, mon));
    }
}
