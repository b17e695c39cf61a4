//! Core data structures for the arbitrage engine
//!
//! Everything that flows between components lives here: quotes, snapshots,
//! routes, scores, plans and results. Money amounts and prices are
//! `rust_decimal::Decimal` end to end; `f64` is reserved for graph weights
//! and dimensionless ratios (confidence, depth ratios).

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::errors::ExecutionError;

/// A tradable asset symbol, e.g. "USDC" or "SOL".
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Asset(String);

impl Asset {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self(symbol.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Asset {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier for an external liquidity venue, e.g. "orca" or "raydium".
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VenueId(String);

impl VenueId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VenueId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for VenueId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// An instrument pair quoted as base priced in quote units, e.g. SOL/USDC.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstrumentPair {
    pub base: Asset,
    pub quote: Asset,
}

impl InstrumentPair {
    pub fn new(base: Asset, quote: Asset) -> Self {
        Self { base, quote }
    }

    /// Parse "SOL/USDC" style notation. Rejects self-pairs.
    pub fn parse(s: &str) -> Option<Self> {
        let (base, quote) = s.split_once('/')?;
        let base = base.trim();
        let quote = quote.trim();
        if base.is_empty() || quote.is_empty() || base == quote {
            return None;
        }
        Some(Self::new(Asset::from(base), Asset::from(quote)))
    }

    /// True if this pair connects exactly the two given assets, either way round.
    pub fn links(&self, a: &Asset, b: &Asset) -> bool {
        (self.base == *a && self.quote == *b) || (self.base == *b && self.quote == *a)
    }

    pub fn contains(&self, asset: &Asset) -> bool {
        self.base == *asset || self.quote == *asset
    }
}

impl fmt::Display for InstrumentPair {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

/// A normalized price/liquidity observation from one venue.
///
/// `depth` is the liquidity available near the quoted price, expressed in
/// base units. `fee` is the venue's taker fee as a fraction (0.003 = 0.30%),
/// stamped by the adapter so downstream consumers never need venue config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueQuote {
    pub venue: VenueId,
    pub pair: InstrumentPair,
    pub bid: Decimal,
    pub ask: Decimal,
    pub mid: Decimal,
    pub depth: Decimal,
    pub fee: Decimal,
    pub fetched_at: DateTime<Utc>,
}

impl VenueQuote {
    /// Quote age relative to `now`. Negative ages (clock skew) clamp to zero.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.fetched_at).max(Duration::zero())
    }

    pub fn is_fresh(&self, now: DateTime<Utc>, staleness_bound: Duration) -> bool {
        self.age(now) <= staleness_bound
    }

    /// Pre-fee conversion rate for a swap entering with `from`.
    /// Selling base hits the bid; buying base pays the ask.
    pub fn conversion_rate(&self, from: &Asset) -> Option<Decimal> {
        if *from == self.pair.base {
            Some(self.bid)
        } else if *from == self.pair.quote && self.ask > Decimal::ZERO {
            Some(Decimal::ONE / self.ask)
        } else {
            None
        }
    }

    /// Quoted depth expressed in the given asset's units, so trade-size /
    /// depth ratios can be computed uniformly on either side of the pair.
    pub fn depth_in(&self, asset: &Asset) -> Option<Decimal> {
        if *asset == self.pair.base {
            Some(self.depth)
        } else if *asset == self.pair.quote {
            Some(self.depth * self.mid)
        } else {
            None
        }
    }
}

/// A consistent point-in-time view of all usable instruments.
/// Built in a single aggregation pass and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct MarketSnapshot {
    pub taken_at: DateTime<Utc>,
    pub quotes: HashMap<InstrumentPair, Vec<VenueQuote>>,
    /// How many instruments the aggregation pass asked for.
    pub instruments_scanned: usize,
    /// Instruments dropped for missing quorum this pass.
    pub instruments_skipped: Vec<InstrumentPair>,
}

impl MarketSnapshot {
    pub fn instrument_count(&self) -> usize {
        self.quotes.len()
    }

    pub fn quote_count(&self) -> usize {
        self.quotes.values().map(|v| v.len()).sum()
    }

    pub fn quotes_for(&self, pair: &InstrumentPair) -> &[VenueQuote] {
        self.quotes.get(pair).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Find the quote a given venue published for the pair connecting two
    /// assets, regardless of quoted orientation.
    pub fn venue_quote(&self, venue: &VenueId, a: &Asset, b: &Asset) -> Option<&VenueQuote> {
        for orientation in [
            InstrumentPair::new(a.clone(), b.clone()),
            InstrumentPair::new(b.clone(), a.clone()),
        ] {
            if let Some(quotes) = self.quotes.get(&orientation) {
                if let Some(q) = quotes.iter().find(|q| q.venue == *venue) {
                    return Some(q);
                }
            }
        }
        None
    }
}

/// One swap hop inside a route.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteLeg {
    pub venue: VenueId,
    pub asset_in: Asset,
    pub asset_out: Asset,
    /// Output estimated at search time for the probe principal.
    pub estimated_out: Decimal,
}

/// An ordered sequence of swaps that starts and ends in the funding asset.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub legs: Vec<RouteLeg>,
    pub funding_asset: Asset,
    /// Sum of -ln(effective rate) over the legs; negative means the raw
    /// rate product is profitable before slippage.
    pub net_weight: f64,
    /// Sum of per-leg trade-size / depth ratios for the probe principal.
    pub liquidity_risk: f64,
}

impl Route {
    pub fn hop_count(&self) -> usize {
        self.legs.len()
    }

    /// Consecutive legs must chain output asset into input asset, and the
    /// route must open and close in the funding asset.
    pub fn is_chained(&self) -> bool {
        let Some(first) = self.legs.first() else {
            return false;
        };
        let Some(last) = self.legs.last() else {
            return false;
        };
        if first.asset_in != self.funding_asset || last.asset_out != self.funding_asset {
            return false;
        }
        self.legs
            .windows(2)
            .all(|w| w[0].asset_out == w[1].asset_in)
    }

    /// Stable identity for cooldown bookkeeping: venue and asset sequence.
    pub fn signature(&self) -> String {
        let mut sig = self.funding_asset.to_string();
        for leg in &self.legs {
            sig.push('>');
            sig.push_str(leg.venue.as_str());
            sig.push(':');
            sig.push_str(leg.asset_out.as_str());
        }
        sig
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.funding_asset)?;
        for leg in &self.legs {
            write!(f, " -> {} ({})", leg.asset_out, leg.venue)?;
        }
        Ok(())
    }
}

/// Profit and risk breakdown for one candidate route.
/// Gross is priced on raw venue rates; fees and modeled impact are broken
/// out separately, so `net_profit = gross_profit - fee_cost - slippage_cost`.
#[derive(Debug, Clone, PartialEq)]
pub struct OpportunityScore {
    pub principal: Decimal,
    pub gross_profit: Decimal,
    pub fee_cost: Decimal,
    pub slippage_cost: Decimal,
    pub net_profit: Decimal,
    /// Fixed-heuristic confidence in [0, 1].
    pub confidence: f64,
}

impl OpportunityScore {
    /// Estimated slippage as a fraction of principal, the quantity compared
    /// against the MAX_SLIPPAGE limit.
    pub fn slippage_fraction(&self) -> Decimal {
        if self.principal > Decimal::ZERO {
            self.slippage_cost / self.principal
        } else {
            Decimal::ZERO
        }
    }
}

/// A route bound to concrete amounts and per-leg minimum-output guards.
/// Immutable once handed to the orchestrator.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub route: Route,
    pub legs: Vec<PlannedLeg>,
    pub principal: Decimal,
    /// Principal plus flash-loan fee, owed back at the end of the unit.
    pub repay_amount: Decimal,
    pub expected_net: Decimal,
    pub score: OpportunityScore,
    pub deadline: DateTime<Utc>,
}

/// A route leg with bound amounts and its minimum-output guard.
#[derive(Debug, Clone)]
pub struct PlannedLeg {
    pub venue: VenueId,
    pub asset_in: Asset,
    pub asset_out: Asset,
    pub amount_in: Decimal,
    pub expected_out: Decimal,
    pub min_out: Decimal,
}

/// Outcome tag for an orchestrator call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
    /// Live submission committed; profit realized.
    Executed,
    /// Dry-run stopped after a clean simulation; nothing submitted.
    SimulatedOnly,
    /// Rejected before submission; no capital was ever at risk.
    Rejected,
    /// Submission-path failure; the atomic unit voided with no partial state.
    Failed,
}

impl fmt::Display for ExecutionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ExecutionOutcome::Executed => write!(f, "executed"),
            ExecutionOutcome::SimulatedOnly => write!(f, "simulated"),
            ExecutionOutcome::Rejected => write!(f, "rejected"),
            ExecutionOutcome::Failed => write!(f, "failed"),
        }
    }
}

/// Result of one orchestrator call.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub outcome: ExecutionOutcome,
    pub realized_profit: Option<Decimal>,
    pub error: Option<ExecutionError>,
    /// External transaction reference, when a submission took place.
    pub tx_ref: Option<String>,
    pub execution_time_ms: u64,
}

impl ExecutionResult {
    pub fn executed(profit: Decimal, tx_ref: String, elapsed_ms: u64) -> Self {
        Self {
            outcome: ExecutionOutcome::Executed,
            realized_profit: Some(profit),
            error: None,
            tx_ref: Some(tx_ref),
            execution_time_ms: elapsed_ms,
        }
    }

    pub fn simulated(projected_profit: Decimal, elapsed_ms: u64) -> Self {
        Self {
            outcome: ExecutionOutcome::SimulatedOnly,
            realized_profit: Some(projected_profit),
            error: None,
            tx_ref: None,
            execution_time_ms: elapsed_ms,
        }
    }

    pub fn rejected(error: ExecutionError, elapsed_ms: u64) -> Self {
        Self {
            outcome: ExecutionOutcome::Rejected,
            realized_profit: None,
            error: Some(error),
            tx_ref: None,
            execution_time_ms: elapsed_ms,
        }
    }

    pub fn failed(error: ExecutionError, tx_ref: Option<String>, elapsed_ms: u64) -> Self {
        Self {
            outcome: ExecutionOutcome::Failed,
            realized_profit: None,
            error: Some(error),
            tx_ref,
            execution_time_ms: elapsed_ms,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self.outcome,
            ExecutionOutcome::Executed | ExecutionOutcome::SimulatedOnly
        )
    }
}
