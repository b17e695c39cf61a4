//! Rolling engine performance metrics.
//!
//! The scheduler emits one [`CycleRecord`] per cycle and folds it into
//! [`EngineMetrics`], shared as `Arc<RwLock<EngineMetrics>>` with the
//! periodic reporting task. The scrape counters and the formatted report
//! both read from the same rolled-up state.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::types::ExecutionOutcome;

/// Process start instant, captured on first access. Uptime in reports is
/// measured against this.
pub static PROCESS_START: Lazy<Instant> = Lazy::new(Instant::now);

/// Maximum number of per-cycle records kept in memory.
const MAX_RECENT_RECORDS: usize = 100;

/// Everything worth remembering about one scheduler cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleRecord {
    pub cycle: u64,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Cycle ended before evaluation (snapshot failure or budget expiry).
    pub aborted: bool,
    pub instruments_scanned: usize,
    pub instruments_skipped: usize,
    pub quotes: usize,
    /// Viable candidates that survived evaluation this cycle.
    pub candidates: usize,
    pub best_net: Option<Decimal>,
    pub best_confidence: Option<f64>,
    /// Signature of the route handed to the orchestrator, if any.
    pub route: Option<String>,
    pub outcome: Option<ExecutionOutcome>,
    pub error_kind: Option<String>,
    pub profit: Option<Decimal>,
}

impl CycleRecord {
    /// Record for a cycle that never reached evaluation.
    pub fn aborted(cycle: u64, started_at: DateTime<Utc>, duration_ms: u64) -> Self {
        Self {
            cycle,
            started_at,
            duration_ms,
            aborted: true,
            instruments_scanned: 0,
            instruments_skipped: 0,
            quotes: 0,
            candidates: 0,
            best_net: None,
            best_confidence: None,
            route: None,
            outcome: None,
            error_kind: None,
            profit: None,
        }
    }
}

/// Cumulative counters across the life of the process.
#[derive(Debug, Clone, Serialize)]
pub struct EngineMetrics {
    pub started_at: DateTime<Utc>,

    // Cycle counts
    pub cycles_completed: u64,
    pub cycles_aborted: u64,
    pub instruments_scanned: u64,
    pub instruments_skipped: u64,

    // Opportunity tracking
    pub opportunities_found: u64,
    pub executions_attempted: u64,
    pub executions_succeeded: u64,
    pub executions_failed: u64,
    /// Failed executions by stable error label.
    pub failure_counts: BTreeMap<String, u64>,

    // Profitability
    pub total_profit: Decimal,
    pub largest_win: Decimal,
    pub success_rate: f64,

    // Streak tracking for the no-opportunity alert
    consecutive_no_opportunity: u64,

    pub last_cycle_at: Option<DateTime<Utc>>,
    /// Last N cycle records, oldest first.
    pub recent: Vec<CycleRecord>,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            cycles_completed: 0,
            cycles_aborted: 0,
            instruments_scanned: 0,
            instruments_skipped: 0,
            opportunities_found: 0,
            executions_attempted: 0,
            executions_succeeded: 0,
            executions_failed: 0,
            failure_counts: BTreeMap::new(),
            total_profit: Decimal::ZERO,
            largest_win: Decimal::ZERO,
            success_rate: 0.0,
            consecutive_no_opportunity: 0,
            last_cycle_at: None,
            recent: Vec::new(),
        }
    }

    /// Fold one finished cycle into the rolling totals.
    pub fn record_cycle(&mut self, record: CycleRecord) {
        self.cycles_completed += 1;
        self.instruments_scanned += record.instruments_scanned as u64;
        self.instruments_skipped += record.instruments_skipped as u64;
        self.last_cycle_at = Some(Utc::now());

        if record.aborted {
            self.cycles_aborted += 1;
        }

        if record.candidates > 0 {
            self.opportunities_found += record.candidates as u64;
            self.consecutive_no_opportunity = 0;
        } else {
            self.consecutive_no_opportunity += 1;
        }

        if let Some(outcome) = record.outcome {
            self.executions_attempted += 1;
            match outcome {
                ExecutionOutcome::Executed | ExecutionOutcome::SimulatedOnly => {
                    self.executions_succeeded += 1;
                    if let Some(profit) = record.profit {
                        self.total_profit += profit;
                        if profit > self.largest_win {
                            self.largest_win = profit;
                        }
                    }
                }
                ExecutionOutcome::Rejected | ExecutionOutcome::Failed => {
                    self.executions_failed += 1;
                    if let Some(kind) = &record.error_kind {
                        *self.failure_counts.entry(kind.clone()).or_insert(0) += 1;
                    }
                }
            }
        }

        self.recalculate();

        self.recent.push(record);
        if self.recent.len() > MAX_RECENT_RECORDS {
            self.recent.remove(0);
        }
    }

    fn recalculate(&mut self) {
        self.success_rate = if self.executions_attempted > 0 {
            self.executions_succeeded as f64 / self.executions_attempted as f64
        } else {
            0.0
        };
    }

    /// Cycles since the last viable candidate was seen.
    pub fn no_opportunity_streak(&self) -> u64 {
        self.consecutive_no_opportunity
    }

    /// Called after the streak alert fires so it does not re-fire every cycle.
    pub fn reset_no_opportunity_streak(&mut self) {
        self.consecutive_no_opportunity = 0;
    }

    /// Counters in `key=value` form for external collection.
    pub fn scrape_counters(&self) -> String {
        format!(
            "opportunities_found={}\ntotal_profit={}\nsuccess_rate={:.4}",
            self.opportunities_found, self.total_profit, self.success_rate
        )
    }

    /// One-line summary for the per-cycle log.
    pub fn summary(&self) -> String {
        format!(
            "{} cycles ({} aborted) | {} opportunities | {} executions ({:.1}% ok) | Net: {}",
            self.cycles_completed,
            self.cycles_aborted,
            self.opportunities_found,
            self.executions_attempted,
            self.success_rate * 100.0,
            self.total_profit
        )
    }

    /// Formatted performance report for the periodic metrics task.
    pub fn report(&self) -> String {
        let mut report = String::new();
        report.push_str("═══════════════════════════════════════════════════════\n");
        report.push_str("              ENGINE PERFORMANCE REPORT                \n");
        report.push_str("═══════════════════════════════════════════════════════\n");
        report.push_str(&format!("Uptime: {}\n", format_uptime(PROCESS_START.elapsed())));
        report.push_str(&format!(
            "Cycles: {} completed, {} aborted\n",
            self.cycles_completed, self.cycles_aborted
        ));
        report.push_str(&format!(
            "Instruments: {} scanned, {} skipped\n",
            self.instruments_scanned, self.instruments_skipped
        ));
        report.push_str(&format!("Opportunities Found: {}\n", self.opportunities_found));
        report.push_str(&format!(
            "Executions: {} ({} ok, {} failed)\n",
            self.executions_attempted, self.executions_succeeded, self.executions_failed
        ));
        report.push_str(&format!("Success Rate: {:.1}%\n", self.success_rate * 100.0));
        report.push_str(&format!("Total Profit: {}\n", self.total_profit));
        report.push_str(&format!("Largest Win: {}\n", self.largest_win));

        if !self.failure_counts.is_empty() {
            report.push_str("─────────────────────────────────────────────────────\n");
            report.push_str("Failures by kind:\n");
            for (kind, count) in &self.failure_counts {
                report.push_str(&format!("  {kind}: {count}\n"));
            }
        }

        report.push_str("═══════════════════════════════════════════════════════\n");
        report
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn format_uptime(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn cycle(n: u64, candidates: usize) -> CycleRecord {
        CycleRecord {
            cycle: n,
            started_at: Utc::now(),
            duration_ms: 120,
            aborted: false,
            instruments_scanned: 3,
            instruments_skipped: 1,
            quotes: 9,
            candidates,
            best_net: None,
            best_confidence: None,
            route: None,
            outcome: None,
            error_kind: None,
            profit: None,
        }
    }

    fn executed_cycle(n: u64, profit: Decimal) -> CycleRecord {
        CycleRecord {
            candidates: 1,
            best_net: Some(profit),
            best_confidence: Some(0.8),
            route: Some("USDC>orca:SOL>raydium:USDC".to_string()),
            outcome: Some(ExecutionOutcome::Executed),
            profit: Some(profit),
            ..cycle(n, 1)
        }
    }

    fn failed_cycle(n: u64, kind: &str) -> CycleRecord {
        CycleRecord {
            candidates: 1,
            route: Some("USDC>orca:SOL>raydium:USDC".to_string()),
            outcome: Some(ExecutionOutcome::Failed),
            error_kind: Some(kind.to_string()),
            ..cycle(n, 1)
        }
    }

    #[test]
    fn test_fold_counters_and_success_rate() {
        let mut metrics = EngineMetrics::new();
        metrics.record_cycle(executed_cycle(1, dec!(12.5)));
        metrics.record_cycle(executed_cycle(2, dec!(7.5)));
        metrics.record_cycle(failed_cycle(3, "submission_failure"));

        assert_eq!(metrics.cycles_completed, 3);
        assert_eq!(metrics.opportunities_found, 3);
        assert_eq!(metrics.executions_attempted, 3);
        assert_eq!(metrics.executions_succeeded, 2);
        assert_eq!(metrics.executions_failed, 1);
        assert_eq!(metrics.total_profit, dec!(20.0));
        assert_eq!(metrics.largest_win, dec!(12.5));
        assert!((metrics.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(metrics.failure_counts.get("submission_failure"), Some(&1));
    }

    #[test]
    fn test_no_opportunity_streak_resets_on_candidate() {
        let mut metrics = EngineMetrics::new();
        metrics.record_cycle(cycle(1, 0));
        metrics.record_cycle(cycle(2, 0));
        assert_eq!(metrics.no_opportunity_streak(), 2);

        metrics.record_cycle(cycle(3, 2));
        assert_eq!(metrics.no_opportunity_streak(), 0);

        metrics.record_cycle(cycle(4, 0));
        assert_eq!(metrics.no_opportunity_streak(), 1);
        metrics.reset_no_opportunity_streak();
        assert_eq!(metrics.no_opportunity_streak(), 0);
    }

    #[test]
    fn test_aborted_cycles_counted_separately() {
        let mut metrics = EngineMetrics::new();
        metrics.record_cycle(CycleRecord::aborted(1, Utc::now(), 3000));
        metrics.record_cycle(cycle(2, 0));

        assert_eq!(metrics.cycles_completed, 2);
        assert_eq!(metrics.cycles_aborted, 1);
        // Aborted cycles attempted nothing, so the rate stays at zero.
        assert_eq!(metrics.executions_attempted, 0);
        assert_eq!(metrics.success_rate, 0.0);
    }

    #[test]
    fn test_recent_records_capped() {
        let mut metrics = EngineMetrics::new();
        for n in 0..105 {
            metrics.record_cycle(cycle(n, 0));
        }
        assert_eq!(metrics.recent.len(), 100);
        assert_eq!(metrics.recent[0].cycle, 5);
        assert_eq!(metrics.recent[99].cycle, 104);
    }

    #[test]
    fn test_scrape_counters_shape() {
        let mut metrics = EngineMetrics::new();
        metrics.record_cycle(executed_cycle(1, dec!(4.25)));

        let rendered = metrics.scrape_counters();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "opportunities_found=1");
        assert_eq!(lines[1], "total_profit=4.25");
        assert_eq!(lines[2], "success_rate=1.0000");
    }

    #[test]
    fn test_report_contains_headline_numbers() {
        let mut metrics = EngineMetrics::new();
        metrics.record_cycle(executed_cycle(1, dec!(9)));
        metrics.record_cycle(failed_cycle(2, "repayment_shortfall"));

        let report = metrics.report();
        assert!(report.contains("Opportunities Found: 2"));
        assert!(report.contains("Success Rate: 50.0%"));
        assert!(report.contains("repayment_shortfall: 1"));
    }
}
