//! Execution orchestrator
//!
//! Every plan goes through the same gate: simulate on the substrate,
//! compare the simulated net against the evaluator's expectation, and only
//! then submit. Divergence beyond the slippage tolerance means the quotes
//! behind the plan have moved, so the plan is rejected rather than shipped.
//!
//! Defaults to dry-run, where a clean simulation is the terminal state.
//! Live submission has to be switched on explicitly.

use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::config::EngineConfig;
use crate::errors::ExecutionError;
use crate::types::{ExecutionPlan, ExecutionResult};

use super::substrate::ExecutionSubstrate;

pub struct ExecutionOrchestrator {
    substrate: Arc<dyn ExecutionSubstrate>,
    dry_run: bool,
    /// Allowed |expected - simulated| net divergence as a fraction of
    /// principal. Shares the configured slippage limit.
    max_divergence: Decimal,
}

impl ExecutionOrchestrator {
    pub fn new(substrate: Arc<dyn ExecutionSubstrate>, config: &EngineConfig) -> Self {
        Self {
            substrate,
            dry_run: true,
            max_divergence: config.trading.max_slippage,
        }
    }

    pub fn set_dry_run(&mut self, enabled: bool) {
        self.dry_run = enabled;
        if enabled {
            info!("🔬 Dry-run mode enabled - plans stop after simulation");
        } else {
            warn!("🚀 LIVE EXECUTION ENABLED - profitable plans will be submitted");
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Drive one plan to a terminal result. Never returns an error: every
    /// failure mode is folded into the result's outcome and error fields.
    pub async fn execute(&self, plan: &ExecutionPlan) -> ExecutionResult {
        let started = Instant::now();
        info!(
            route = %plan.route,
            principal = %plan.principal,
            expected_net = %plan.expected_net,
            substrate = self.substrate.name(),
            "🔬 Simulating plan"
        );

        let report = match self.substrate.simulate(plan).await {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "Simulation rejected the plan");
                return ExecutionResult::rejected(e, elapsed_ms(started));
            }
        };

        if self.diverges(plan, report.net_profit) {
            let err = ExecutionError::SimulationMismatch {
                expected: plan.expected_net,
                simulated: report.net_profit,
            };
            warn!(error = %err, "Plan is stale, not submitting");
            return ExecutionResult::rejected(err, elapsed_ms(started));
        }

        if self.dry_run {
            info!(
                projected_net = %report.net_profit,
                "🔬 Dry run clean, stopping before submission"
            );
            return ExecutionResult::simulated(report.net_profit, elapsed_ms(started));
        }

        if Utc::now() > plan.deadline {
            let err = ExecutionError::SubmissionFailure(
                "plan deadline expired before submission".into(),
            );
            warn!(error = %err, deadline = %plan.deadline, "Refusing late submission");
            return ExecutionResult::rejected(err, elapsed_ms(started));
        }

        match self.substrate.submit(plan).await {
            Ok(receipt) => {
                info!(
                    tx_ref = %receipt.tx_ref,
                    realized = %receipt.realized_profit,
                    elapsed_ms = elapsed_ms(started),
                    "🎉 Plan executed"
                );
                ExecutionResult::executed(receipt.realized_profit, receipt.tx_ref, elapsed_ms(started))
            }
            Err(e) => {
                error!(error = %e, kind = e.kind(), "⚠️ Submission failed, unit voided");
                ExecutionResult::failed(e, None, elapsed_ms(started))
            }
        }
    }

    fn diverges(&self, plan: &ExecutionPlan, simulated_net: Decimal) -> bool {
        if plan.principal <= Decimal::ZERO {
            return true;
        }
        let divergence = (plan.expected_net - simulated_net).abs() / plan.principal;
        divergence > self.max_divergence
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
