//! Engine configuration
//!
//! Venue roster, instrument universe and trading parameters come from a
//! TOML file; secrets (RPC endpoint, signer key) come from environment
//! variables layered on top after the file is read. `validate()` runs once
//! at startup and any problem it finds is fatal.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::errors::ConfigError;
use crate::types::{Asset, InstrumentPair, VenueId};
use crate::venues::QuoteSchema;

/// Top-level configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    pub trading: TradingConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub snapshot: SnapshotConfig,
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(rename = "venue")]
    pub venues: Vec<VenueConfig>,
}

/// Trading parameters. All amounts are in funding-asset units.
#[derive(Debug, Clone, Deserialize)]
pub struct TradingConfig {
    pub funding_asset: String,
    pub instruments: Vec<String>,
    #[serde(default = "default_min_profit")]
    pub min_profit_threshold: Decimal,
    /// Slippage limit as a fraction of principal (0.005 = 0.5%). Also the
    /// tolerance for simulation divergence and the per-leg min-out margin.
    #[serde(default = "default_max_slippage")]
    pub max_slippage: Decimal,
    /// Borrowed principal per attempt.
    #[serde(default = "default_max_position")]
    pub max_position_size: Decimal,
    /// Flash-loan fee rate charged on the principal (0.0009 = 9 bps).
    #[serde(default = "default_flash_fee")]
    pub flash_fee_rate: Decimal,
}

fn default_min_profit() -> Decimal {
    Decimal::ONE
}
fn default_max_slippage() -> Decimal {
    Decimal::new(5, 3) // 0.005
}
fn default_max_position() -> Decimal {
    Decimal::new(1000, 0)
}
fn default_flash_fee() -> Decimal {
    Decimal::new(9, 4) // 0.0009
}

/// Scheduler cadence and reporting.
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    /// Seconds between cycle starts. 0 selects the tight continuous loop.
    #[serde(default = "default_cycle_interval")]
    pub cycle_interval_secs: u64,
    /// Wall-clock budget for the snapshot+optimize+evaluate phase of one
    /// cycle. A cycle that blows this budget aborts without executing.
    #[serde(default = "default_cycle_budget")]
    pub cycle_budget_ms: u64,
    #[serde(default = "default_metrics_interval")]
    pub metrics_interval_secs: u64,
    /// Alert after this many consecutive cycles without a viable candidate.
    #[serde(default = "default_no_opportunity_alert")]
    pub no_opportunity_alert_after: u32,
    /// Cycles a route sits out after its first failure; escalates from
    /// there. 0 disables the cooldown tracker.
    #[serde(default = "default_route_cooldown")]
    pub route_cooldown_cycles: u64,
    /// Cooldown-cap visits with no successes before a route is
    /// blacklisted for the session. 0 disables blacklisting.
    #[serde(default = "default_route_max_strikes")]
    pub route_max_strikes: u32,
}

fn default_cycle_interval() -> u64 {
    5
}
fn default_cycle_budget() -> u64 {
    3000
}
fn default_metrics_interval() -> u64 {
    300
}
fn default_no_opportunity_alert() -> u32 {
    20
}
fn default_route_cooldown() -> u64 {
    2
}
fn default_route_max_strikes() -> u32 {
    3
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            cycle_interval_secs: default_cycle_interval(),
            cycle_budget_ms: default_cycle_budget(),
            metrics_interval_secs: default_metrics_interval(),
            no_opportunity_alert_after: default_no_opportunity_alert(),
            route_cooldown_cycles: default_route_cooldown(),
            route_max_strikes: default_route_max_strikes(),
        }
    }
}

/// Snapshot aggregation policy.
#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotConfig {
    /// Minimum venues that must answer for an instrument to be usable.
    #[serde(default = "default_min_quorum")]
    pub min_quorum: usize,
    /// Quotes older than this are dropped before the quorum count.
    #[serde(default = "default_staleness")]
    pub staleness_ms: u64,
    /// Per-query timeout, further capped by the remaining pass deadline.
    #[serde(default = "default_query_timeout")]
    pub query_timeout_ms: u64,
    /// Overall deadline for one aggregation pass.
    #[serde(default = "default_snapshot_deadline")]
    pub deadline_ms: u64,
}

fn default_min_quorum() -> usize {
    2
}
fn default_staleness() -> u64 {
    10_000
}
fn default_query_timeout() -> u64 {
    2_000
}
fn default_snapshot_deadline() -> u64 {
    4_000
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            min_quorum: default_min_quorum(),
            staleness_ms: default_staleness(),
            query_timeout_ms: default_query_timeout(),
            deadline_ms: default_snapshot_deadline(),
        }
    }
}

/// Route search bounds.
#[derive(Debug, Clone, Deserialize)]
pub struct OptimizerConfig {
    /// Maximum legs per route. 3 covers direct and triangular cycles.
    #[serde(default = "default_max_hops")]
    pub max_hops: u32,
    /// CPU budget for one search pass; candidates found so far are
    /// returned when it expires.
    #[serde(default = "default_optimizer_budget")]
    pub time_budget_ms: u64,
    /// Cap on candidates handed to the evaluator per cycle.
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,
}

fn default_max_hops() -> u32 {
    3
}
fn default_optimizer_budget() -> u64 {
    250
}
fn default_max_candidates() -> usize {
    16
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_hops: default_max_hops(),
            time_budget_ms: default_optimizer_budget(),
            max_candidates: default_max_candidates(),
        }
    }
}

/// Slippage model and confidence weighting. The confidence heuristic is a
/// fixed weighted sum of quote freshness, depth margin and per-venue
/// reliability; the three weights must sum to 1.
#[derive(Debug, Clone, Deserialize)]
pub struct ScoringConfig {
    /// Linear price-impact coefficient: cost = size * coeff * (size/depth).
    #[serde(default = "default_impact_coefficient")]
    pub impact_coefficient: Decimal,
    /// Reject any leg consuming more than this fraction of quoted depth.
    #[serde(default = "default_max_depth_fraction")]
    pub max_depth_fraction: Decimal,
    #[serde(default = "default_freshness_weight")]
    pub freshness_weight: f64,
    #[serde(default = "default_depth_weight")]
    pub depth_weight: f64,
    #[serde(default = "default_reliability_weight")]
    pub reliability_weight: f64,
}

fn default_impact_coefficient() -> Decimal {
    Decimal::new(5, 1) // 0.5
}
fn default_max_depth_fraction() -> Decimal {
    Decimal::new(25, 2) // 0.25
}
fn default_freshness_weight() -> f64 {
    0.40
}
fn default_depth_weight() -> f64 {
    0.35
}
fn default_reliability_weight() -> f64 {
    0.25
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            impact_coefficient: default_impact_coefficient(),
            max_depth_fraction: default_max_depth_fraction(),
            freshness_weight: default_freshness_weight(),
            depth_weight: default_depth_weight(),
            reliability_weight: default_reliability_weight(),
        }
    }
}

/// Execution substrate wiring. The RPC endpoint and signer key normally
/// arrive via the RPC_URL / SIGNER_KEY environment variables; TOML values
/// act as development fallbacks.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ExecutionConfig {
    #[serde(default)]
    pub rpc_url: Option<String>,
    #[serde(default)]
    pub signer_key: Option<String>,
    #[serde(default = "default_submission_deadline")]
    pub submission_deadline_secs: u64,
}

fn default_submission_deadline() -> u64 {
    30
}

/// One venue adapter definition.
#[derive(Debug, Clone, Deserialize)]
pub struct VenueConfig {
    pub name: String,
    pub base_url: String,
    #[serde(default = "default_schema")]
    pub schema: QuoteSchema,
    /// Taker fee in basis points (30 = 0.30%).
    #[serde(default = "default_fee_bps")]
    pub fee_bps: u32,
    /// Static reliability weight in [0,1] used by confidence scoring.
    #[serde(default = "default_reliability")]
    pub reliability: f64,
    /// Retries after the first attempt, transient failures only.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,
    /// Overrides snapshot.query_timeout_ms for this venue when set.
    #[serde(default)]
    pub query_timeout_ms: Option<u64>,
    /// Half-spread in bps used to synthesize bid/ask for mid-only venues.
    #[serde(default = "default_half_spread_bps")]
    pub half_spread_bps: u32,
}

fn default_schema() -> QuoteSchema {
    QuoteSchema::MidPrice
}
fn default_fee_bps() -> u32 {
    30
}
fn default_reliability() -> f64 {
    0.9
}
fn default_max_retries() -> u32 {
    2
}
fn default_retry_backoff() -> u64 {
    100
}
fn default_half_spread_bps() -> u32 {
    5
}

impl VenueConfig {
    pub fn venue_id(&self) -> VenueId {
        VenueId::new(self.name.clone())
    }

    /// Taker fee as a fraction.
    pub fn fee(&self) -> Decimal {
        Decimal::new(self.fee_bps as i64, 4)
    }

    pub fn half_spread(&self) -> Decimal {
        Decimal::new(self.half_spread_bps as i64, 4)
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self =
            toml::from_str(&content).with_context(|| "Failed to parse TOML configuration")?;

        Ok(config)
    }

    /// Layer secrets from the environment over the file values.
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("RPC_URL") {
            if !url.is_empty() {
                self.execution.rpc_url = Some(url);
            }
        }
        if let Ok(key) = std::env::var("SIGNER_KEY") {
            if !key.is_empty() {
                self.execution.signer_key = Some(key);
            }
        }
    }

    pub fn funding(&self) -> Asset {
        Asset::new(self.trading.funding_asset.clone())
    }

    /// Parsed instrument universe, in config order.
    pub fn instrument_pairs(&self) -> Result<Vec<InstrumentPair>, ConfigError> {
        self.trading
            .instruments
            .iter()
            .map(|s| {
                InstrumentPair::parse(s).ok_or_else(|| ConfigError::BadInstrument(s.clone()))
            })
            .collect()
    }

    /// Per-venue reliability weights for confidence scoring.
    pub fn venue_reliability(&self) -> HashMap<VenueId, f64> {
        self.venues
            .iter()
            .map(|v| (v.venue_id(), v.reliability))
            .collect()
    }

    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.schedule.cycle_interval_secs)
    }

    pub fn cycle_budget(&self) -> Duration {
        Duration::from_millis(self.schedule.cycle_budget_ms)
    }

    pub fn staleness_bound(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.snapshot.staleness_ms as i64)
    }

    /// Check parameter consistency. Called once at startup; any error here
    /// ends the process with exit code 1.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.venues.is_empty() {
            return Err(ConfigError::Invalid("at least one [[venue]] is required".into()));
        }
        let mut names = std::collections::HashSet::new();
        for venue in &self.venues {
            if venue.name.trim().is_empty() {
                return Err(ConfigError::Invalid("venue name cannot be empty".into()));
            }
            if venue.base_url.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "venue '{}' has no base_url",
                    venue.name
                )));
            }
            if !(0.0..=1.0).contains(&venue.reliability) {
                return Err(ConfigError::Invalid(format!(
                    "venue '{}' reliability {} outside [0,1]",
                    venue.name, venue.reliability
                )));
            }
            if venue.fee_bps >= 10_000 {
                return Err(ConfigError::Invalid(format!(
                    "venue '{}' fee {}bps is 100% or more",
                    venue.name, venue.fee_bps
                )));
            }
            if !names.insert(venue.name.clone()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate venue name '{}'",
                    venue.name
                )));
            }
        }

        let pairs = self.instrument_pairs()?;
        if pairs.is_empty() {
            return Err(ConfigError::Invalid("no instruments configured".into()));
        }
        let mut seen = std::collections::HashSet::new();
        for pair in &pairs {
            if !seen.insert(pair.clone()) {
                return Err(ConfigError::Invalid(format!("duplicate instrument {pair}")));
            }
        }
        let funding = self.funding();
        if !pairs.iter().any(|p| p.contains(&funding)) {
            return Err(ConfigError::Invalid(format!(
                "funding asset {funding} does not appear in any instrument"
            )));
        }

        if self.snapshot.min_quorum == 0 {
            return Err(ConfigError::Invalid("min_quorum must be at least 1".into()));
        }
        if self.snapshot.min_quorum > self.venues.len() {
            return Err(ConfigError::Invalid(format!(
                "min_quorum {} exceeds configured venue count {}",
                self.snapshot.min_quorum,
                self.venues.len()
            )));
        }

        if !(2..=5).contains(&self.optimizer.max_hops) {
            return Err(ConfigError::Invalid(format!(
                "max_hops {} outside supported range 2..=5",
                self.optimizer.max_hops
            )));
        }

        if self.trading.max_position_size <= Decimal::ZERO {
            return Err(ConfigError::Invalid("max_position_size must be positive".into()));
        }
        if self.trading.max_slippage <= Decimal::ZERO || self.trading.max_slippage >= Decimal::ONE {
            return Err(ConfigError::Invalid("max_slippage must be inside (0,1)".into()));
        }
        if self.trading.flash_fee_rate < Decimal::ZERO
            || self.trading.flash_fee_rate >= Decimal::ONE
        {
            return Err(ConfigError::Invalid("flash_fee_rate must be inside [0,1)".into()));
        }
        if self.trading.min_profit_threshold < Decimal::ZERO {
            return Err(ConfigError::Invalid("min_profit_threshold cannot be negative".into()));
        }

        if self.scoring.impact_coefficient < Decimal::ZERO {
            return Err(ConfigError::Invalid("impact_coefficient cannot be negative".into()));
        }
        if self.scoring.max_depth_fraction <= Decimal::ZERO
            || self.scoring.max_depth_fraction > Decimal::ONE
        {
            return Err(ConfigError::Invalid("max_depth_fraction must be inside (0,1]".into()));
        }
        let weight_sum = self.scoring.freshness_weight
            + self.scoring.depth_weight
            + self.scoring.reliability_weight;
        if self.scoring.freshness_weight < 0.0
            || self.scoring.depth_weight < 0.0
            || self.scoring.reliability_weight < 0.0
            || (weight_sum - 1.0).abs() > 1e-6
        {
            return Err(ConfigError::Invalid(format!(
                "confidence weights must be non-negative and sum to 1.0 (got {weight_sum})"
            )));
        }

        if self.schedule.cycle_budget_ms == 0 {
            return Err(ConfigError::Invalid("cycle_budget_ms must be positive".into()));
        }
        if self.snapshot.deadline_ms == 0 || self.snapshot.query_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "snapshot deadline and query timeout must be positive".into(),
            ));
        }

        Ok(())
    }
}
