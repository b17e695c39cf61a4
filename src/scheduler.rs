//! Opportunity scheduler
//!
//! The engine's driver. Each cycle runs snapshot, route search and
//! evaluation under a wall-clock budget, then hands at most one plan to
//! the orchestrator outside that budget, serialized by a process-wide
//! lock. Failed routes sit out subsequent cycles via the cooldown table;
//! retry is always "next cycle, fresh snapshot", never a resubmission of
//! a stale plan.
//!
//! Shutdown finishes the in-flight cycle and stops scheduling. It never
//! interrupts a committing execution.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use crate::alerts::WebhookAlerter;
use crate::config::EngineConfig;
use crate::cooldown::RouteCooldown;
use crate::evaluator::ProfitEvaluator;
use crate::execution::{ExecutionOrchestrator, ExecutionSubstrate};
use crate::metrics::{CycleRecord, EngineMetrics};
use crate::routing::RouteOptimizer;
use crate::snapshot::SnapshotAggregator;
use crate::types::InstrumentPair;
use crate::venues::build_adapters;

/// Expired cooldown entries are swept this often.
const CLEANUP_EVERY_CYCLES: u64 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    RunningCycle,
    ShuttingDown,
    Terminated,
}

/// Owns the full cycle pipeline and the shared engine state around it.
pub struct OpportunityScheduler {
    config: EngineConfig,
    instruments: Vec<InstrumentPair>,
    aggregator: SnapshotAggregator,
    optimizer: RouteOptimizer,
    evaluator: ProfitEvaluator,
    orchestrator: ExecutionOrchestrator,
    substrate: Arc<dyn ExecutionSubstrate>,
    cooldown: RouteCooldown,
    metrics: Arc<RwLock<EngineMetrics>>,
    alerter: WebhookAlerter,
    /// At most one orchestrator call in flight, process-wide.
    execution_lock: Arc<Mutex<()>>,
    state: SchedulerState,
    cycle: u64,
}

impl OpportunityScheduler {
    pub fn new(
        config: EngineConfig,
        substrate: Arc<dyn ExecutionSubstrate>,
    ) -> anyhow::Result<Self> {
        let instruments = config.instrument_pairs()?;
        let adapters = build_adapters(&config)?;
        let aggregator = SnapshotAggregator::new(adapters, &config.snapshot);
        let optimizer = RouteOptimizer::new(&config);
        let evaluator = ProfitEvaluator::new(&config);
        let orchestrator = ExecutionOrchestrator::new(Arc::clone(&substrate), &config);
        let cooldown = RouteCooldown::new(
            config.schedule.route_cooldown_cycles,
            config.schedule.route_max_strikes,
        );

        Ok(Self {
            config,
            instruments,
            aggregator,
            optimizer,
            evaluator,
            orchestrator,
            substrate,
            cooldown,
            metrics: Arc::new(RwLock::new(EngineMetrics::new())),
            alerter: WebhookAlerter::from_env(),
            execution_lock: Arc::new(Mutex::new(())),
            state: SchedulerState::Idle,
            cycle: 0,
        })
    }

    /// Live submission instead of the default dry-run posture.
    pub fn set_live(&mut self, live: bool) {
        self.orchestrator.set_dry_run(!live);
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Shared handle for reporting outside the cycle loop.
    pub fn metrics(&self) -> Arc<RwLock<EngineMetrics>> {
        Arc::clone(&self.metrics)
    }

    /// Single-shot check mode: one full cycle, then terminate.
    pub async fn run_once(&mut self) -> CycleRecord {
        self.state = SchedulerState::RunningCycle;
        let record = self.run_cycle().await;
        self.state = SchedulerState::Terminated;
        record
    }

    /// Continuous mode: fixed-interval cycles until the shutdown flag flips.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        // tokio's interval panics on a zero period; 1ms is the tight loop.
        let period = self.config.cycle_interval().max(Duration::from_millis(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticks = IntervalStream::new(interval);

        let metrics_interval = Duration::from_secs(self.config.schedule.metrics_interval_secs);
        let mut last_report = Instant::now();

        info!(interval = ?period, "Scheduler entering cycle loop");
        loop {
            tokio::select! {
                // Prefer shutdown over starting another cycle.
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        self.state = SchedulerState::ShuttingDown;
                        info!("Shutdown requested, no further cycles will start");
                        break;
                    }
                }
                Some(_) = ticks.next() => {
                    self.state = SchedulerState::RunningCycle;
                    let record = self.run_cycle().await;
                    self.state = SchedulerState::Idle;
                    debug!(cycle = record.cycle, duration_ms = record.duration_ms, "Back to idle");

                    if self.cycle % CLEANUP_EVERY_CYCLES == 0 {
                        self.cooldown.cleanup(self.cycle);
                    }

                    if last_report.elapsed() >= metrics_interval {
                        let metrics = self.metrics.read().await;
                        info!("\n{}", metrics.report());
                        info!("\n{}", metrics.scrape_counters());
                        last_report = Instant::now();
                    }
                }
            }
        }
        self.state = SchedulerState::Terminated;
    }

    /// One cycle: snapshot, search, evaluate, maybe execute, record.
    async fn run_cycle(&mut self) -> CycleRecord {
        self.cycle += 1;
        let cycle = self.cycle;
        let started_at = Utc::now();
        let started = Instant::now();
        let budget = self.config.cycle_budget();

        let snapshot = match tokio::time::timeout(budget, self.aggregator.aggregate(&self.instruments))
            .await
        {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(err)) => {
                warn!(cycle, %err, "Cycle aborted: no usable snapshot");
                return self.finish_aborted(cycle, started_at, started).await;
            }
            Err(_) => {
                warn!(cycle, budget_ms = budget.as_millis() as u64, "Cycle aborted: budget expired during snapshot");
                return self.finish_aborted(cycle, started_at, started).await;
            }
        };

        if let Err(err) = self.substrate.sync_state(&snapshot).await {
            warn!(cycle, %err, "Cycle aborted: substrate rejected the snapshot");
            return self.finish_aborted(cycle, started_at, started).await;
        }

        // The optimizer bounds its own search; this guards against a
        // snapshot that ate the whole budget already.
        if started.elapsed() >= budget {
            warn!(cycle, "Cycle aborted: budget expired before route search");
            return self.finish_aborted(cycle, started_at, started).await;
        }

        let routes = self.optimizer.find_routes(&snapshot);
        let ranked = self.evaluator.rank(routes, &snapshot);
        let candidates = ranked.len();

        let best = ranked.first();
        let best_net = best.map(|(_, score)| score.net_profit);
        let best_confidence = best.map(|(_, score)| score.confidence);

        let mut record = CycleRecord {
            cycle,
            started_at,
            duration_ms: 0,
            aborted: false,
            instruments_scanned: snapshot.instruments_scanned,
            instruments_skipped: snapshot.instruments_skipped.len(),
            quotes: snapshot.quote_count(),
            candidates,
            best_net,
            best_confidence,
            route: None,
            outcome: None,
            error_kind: None,
            profit: None,
        };

        if started.elapsed() >= budget {
            warn!(cycle, "Cycle budget expired after evaluation, not executing");
            record.aborted = true;
            record.duration_ms = started.elapsed().as_millis() as u64;
            return self.finish_cycle(record).await;
        }

        // Best candidate not sitting in cooldown, in rank order.
        let selected = ranked.iter().find(|(route, _)| {
            let suppressed = self.cooldown.is_cooled_down(&route.signature(), cycle);
            if suppressed {
                debug!(%route, "Route in cooldown, skipped");
            }
            !suppressed
        });

        if let Some((route, score)) = selected {
            match self.evaluator.build_plan(route, score, &snapshot) {
                Ok(plan) => {
                    let signature = route.signature();
                    record.route = Some(signature.clone());

                    let result = {
                        let _serialized = self.execution_lock.lock().await;
                        self.orchestrator.execute(&plan).await
                    };

                    record.outcome = Some(result.outcome);
                    record.profit = result.realized_profit;

                    if result.is_success() {
                        self.cooldown.record_success(&signature);
                    } else {
                        self.cooldown.record_failure(&signature, cycle);
                    }

                    if let Some(err) = &result.error {
                        record.error_kind = Some(err.kind().to_string());
                        self.alerter.execution_failure(&plan, err).await;
                    }
                }
                Err(rejection) => {
                    // Snapshot moved between scoring and plan building.
                    debug!(cycle, %route, %rejection, "Plan rejected at build time");
                }
            }
        }

        record.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            cycle,
            duration_ms = record.duration_ms,
            candidates,
            outcome = %record.outcome.map_or_else(|| "none".to_string(), |o| o.to_string()),
            "Cycle complete"
        );
        self.finish_cycle(record).await
    }

    async fn finish_aborted(
        &self,
        cycle: u64,
        started_at: chrono::DateTime<Utc>,
        started: Instant,
    ) -> CycleRecord {
        let record = CycleRecord {
            instruments_scanned: self.instruments.len(),
            instruments_skipped: self.instruments.len(),
            ..CycleRecord::aborted(cycle, started_at, started.elapsed().as_millis() as u64)
        };
        self.finish_cycle(record).await
    }

    /// Fold the record into the metrics and fire the streak alert if the
    /// drought just hit the configured threshold.
    async fn finish_cycle(&self, record: CycleRecord) -> CycleRecord {
        let threshold = self.config.schedule.no_opportunity_alert_after as u64;
        let fired = {
            let mut metrics = self.metrics.write().await;
            metrics.record_cycle(record.clone());
            if threshold > 0 && metrics.no_opportunity_streak() >= threshold {
                // Reset so the alert re-arms instead of firing every cycle.
                metrics.reset_no_opportunity_streak();
                true
            } else {
                false
            }
        };

        if fired {
            warn!(threshold, "No viable opportunities for {threshold} consecutive cycles");
            self.alerter
                .no_opportunity_streak(threshold, self.instruments.len())
                .await;
        }

        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ExecutionError;
    use crate::execution::{SimulationReport, SubmissionReceipt};
    use crate::types::{
        Asset, ExecutionPlan, OpportunityScore, PlannedLeg, Route, RouteLeg, VenueId,
    };
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn scheduler_config() -> EngineConfig {
        let raw = r#"
            [trading]
            funding_asset = "USDC"
            instruments = ["USDC/SOL"]

            [snapshot]
            min_quorum = 1
            query_timeout_ms = 200
            deadline_ms = 400

            [schedule]
            cycle_interval_secs = 0
            cycle_budget_ms = 1000
            no_opportunity_alert_after = 2

            [[venue]]
            name = "orca"
            # Discard port: connection refused immediately, no server needed.
            base_url = "http://127.0.0.1:9"
        "#;
        let config: EngineConfig = toml::from_str(raw).unwrap();
        config.validate().unwrap();
        config
    }

    fn plan() -> ExecutionPlan {
        let route = Route {
            legs: vec![
                RouteLeg {
                    venue: VenueId::from("orca"),
                    asset_in: Asset::from("USDC"),
                    asset_out: Asset::from("SOL"),
                    estimated_out: dec!(10),
                },
                RouteLeg {
                    venue: VenueId::from("raydium"),
                    asset_in: Asset::from("SOL"),
                    asset_out: Asset::from("USDC"),
                    estimated_out: dec!(1020),
                },
            ],
            funding_asset: Asset::from("USDC"),
            net_weight: -0.0198,
            liquidity_risk: 0.02,
        };
        ExecutionPlan {
            legs: vec![
                PlannedLeg {
                    venue: VenueId::from("orca"),
                    asset_in: Asset::from("USDC"),
                    asset_out: Asset::from("SOL"),
                    amount_in: dec!(1000),
                    expected_out: dec!(10),
                    min_out: dec!(9.95),
                },
                PlannedLeg {
                    venue: VenueId::from("raydium"),
                    asset_in: Asset::from("SOL"),
                    asset_out: Asset::from("USDC"),
                    amount_in: dec!(10),
                    expected_out: dec!(1020),
                    min_out: dec!(1014.9),
                },
            ],
            route,
            principal: dec!(1000),
            repay_amount: dec!(1000.9),
            expected_net: dec!(19.1),
            score: OpportunityScore {
                principal: dec!(1000),
                gross_profit: dec!(20),
                fee_cost: dec!(0.9),
                slippage_cost: dec!(0),
                net_profit: dec!(19.1),
                confidence: 0.8,
            },
            deadline: Utc::now() + chrono::Duration::seconds(30),
        }
    }

    /// Substrate that measures how many calls overlap in time.
    #[derive(Default)]
    struct ProbeSubstrate {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl ProbeSubstrate {
        async fn enter_and_hold(&self) {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl ExecutionSubstrate for ProbeSubstrate {
        fn name(&self) -> &str {
            "probe"
        }

        async fn health_check(&self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn simulate(&self, plan: &ExecutionPlan) -> Result<SimulationReport, ExecutionError> {
            self.enter_and_hold().await;
            let leg_outputs: Vec<_> = plan.legs.iter().map(|l| l.expected_out).collect();
            let final_output = *leg_outputs.last().unwrap();
            Ok(SimulationReport {
                leg_outputs,
                final_output,
                net_profit: final_output - plan.repay_amount,
            })
        }

        async fn submit(&self, plan: &ExecutionPlan) -> Result<SubmissionReceipt, ExecutionError> {
            self.enter_and_hold().await;
            Ok(SubmissionReceipt {
                tx_ref: "probe-1".to_string(),
                final_output: plan.legs.last().unwrap().expected_out,
                realized_profit: plan.expected_net,
            })
        }
    }

    #[tokio::test]
    async fn test_execution_lock_serializes_orchestrator_calls() {
        let substrate = Arc::new(ProbeSubstrate::default());
        let orchestrator = Arc::new(ExecutionOrchestrator::new(
            substrate.clone() as Arc<dyn ExecutionSubstrate>,
            &scheduler_config(),
        ));
        let lock = Arc::new(Mutex::new(()));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let orchestrator = Arc::clone(&orchestrator);
            let lock = Arc::clone(&lock);
            tasks.push(tokio::spawn(async move {
                let _serialized = lock.lock().await;
                orchestrator.execute(&plan()).await
            }));
        }
        for task in tasks {
            let result = task.await.unwrap();
            assert!(result.is_success());
        }

        assert_eq!(substrate.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unreachable_venues_abort_the_cycle() {
        let substrate: Arc<dyn ExecutionSubstrate> = Arc::new(ProbeSubstrate::default());
        let mut scheduler = OpportunityScheduler::new(scheduler_config(), substrate).unwrap();

        let record = scheduler.run_once().await;

        assert!(record.aborted);
        assert_eq!(record.candidates, 0);
        assert!(record.outcome.is_none());
        assert_eq!(scheduler.state(), SchedulerState::Terminated);

        let metrics = scheduler.metrics();
        let metrics = metrics.read().await;
        assert_eq!(metrics.cycles_completed, 1);
        assert_eq!(metrics.cycles_aborted, 1);
    }

    #[tokio::test]
    async fn test_streak_alert_threshold_resets_the_counter() {
        let substrate: Arc<dyn ExecutionSubstrate> = Arc::new(ProbeSubstrate::default());
        let mut scheduler = OpportunityScheduler::new(scheduler_config(), substrate).unwrap();

        // Threshold is 2: the second barren cycle fires and resets, so
        // after three cycles the streak is 1, not 3.
        for _ in 0..3 {
            scheduler.run_cycle().await;
        }

        let metrics = scheduler.metrics();
        let metrics = metrics.read().await;
        assert_eq!(metrics.cycles_completed, 3);
        assert_eq!(metrics.no_opportunity_streak(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_before_first_tick_terminates_cleanly() {
        let substrate: Arc<dyn ExecutionSubstrate> = Arc::new(ProbeSubstrate::default());
        let mut scheduler = OpportunityScheduler::new(scheduler_config(), substrate).unwrap();

        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        scheduler.run(rx).await;

        assert_eq!(scheduler.state(), SchedulerState::Terminated);
        let metrics = scheduler.metrics();
        assert_eq!(metrics.read().await.cycles_completed, 0);
    }
}
