//! Profit and risk evaluator
//!
//! Prices a candidate route at the full borrow principal and splits the
//! outcome into gross edge, fee drag and modeled slippage. Three parallel
//! propagations walk the legs: ideal (raw rates), fee-only, and fee plus
//! slippage. Costs fall out as differences between them, so
//! `net = gross - fees - slippage` holds exactly and net can never exceed
//! gross.
//!
//! Slippage per leg is linear impact: consuming fraction `r` of quoted
//! depth costs `impact_coefficient * r` of that leg's output. Anything the
//! model cannot absorb is rejected outright: legs over the depth-fraction
//! cap, routes whose modeled slippage breaches the limit, and routes whose
//! net profit misses the threshold.

use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::debug;

use crate::config::EngineConfig;
use crate::errors::EvaluationRejection;
use crate::types::{ExecutionPlan, MarketSnapshot, OpportunityScore, PlannedLeg, Route, VenueId};

/// Reliability assumed for venues missing from the configured map.
const DEFAULT_RELIABILITY: f64 = 0.5;

pub struct ProfitEvaluator {
    principal: Decimal,
    min_profit: Decimal,
    max_slippage: Decimal,
    flash_fee_rate: Decimal,
    impact_coefficient: Decimal,
    max_depth_fraction: Decimal,
    freshness_weight: f64,
    depth_weight: f64,
    reliability_weight: f64,
    staleness_ms: i64,
    reliability: HashMap<VenueId, f64>,
    submission_deadline_secs: i64,
}

impl ProfitEvaluator {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            principal: config.trading.max_position_size,
            min_profit: config.trading.min_profit_threshold,
            max_slippage: config.trading.max_slippage,
            flash_fee_rate: config.trading.flash_fee_rate,
            impact_coefficient: config.scoring.impact_coefficient,
            max_depth_fraction: config.scoring.max_depth_fraction,
            freshness_weight: config.scoring.freshness_weight,
            depth_weight: config.scoring.depth_weight,
            reliability_weight: config.scoring.reliability_weight,
            staleness_ms: config.snapshot.staleness_ms as i64,
            reliability: config.venue_reliability(),
            submission_deadline_secs: config.execution.submission_deadline_secs as i64,
        }
    }

    /// Score one route at the full principal, or say why it is unviable.
    pub fn evaluate(
        &self,
        route: &Route,
        snapshot: &MarketSnapshot,
    ) -> Result<OpportunityScore, EvaluationRejection> {
        let walk = self.walk_legs(route, snapshot)?;

        let principal = self.principal;
        let flash_fee = principal * self.flash_fee_rate;

        let gross_profit = walk.ideal - principal;
        let fee_cost = flash_fee + (walk.ideal - walk.fee_only);
        let slippage_cost = walk.fee_only - walk.all_in;
        let net_profit = walk.all_in - principal - flash_fee;

        let slippage_fraction = if principal > Decimal::ZERO {
            slippage_cost / principal
        } else {
            Decimal::ZERO
        };
        if slippage_fraction > self.max_slippage {
            return Err(EvaluationRejection::SlippageTooHigh {
                fraction: slippage_fraction,
                limit: self.max_slippage,
            });
        }

        if net_profit < self.min_profit {
            return Err(EvaluationRejection::BelowProfitThreshold {
                net: net_profit,
                threshold: self.min_profit,
            });
        }

        Ok(OpportunityScore {
            principal,
            gross_profit,
            fee_cost,
            slippage_cost,
            net_profit,
            confidence: self.confidence(&walk),
        })
    }

    /// Evaluate a batch of candidates, keeping only viable ones ordered by
    /// net profit (ties on confidence).
    pub fn rank(
        &self,
        routes: Vec<Route>,
        snapshot: &MarketSnapshot,
    ) -> Vec<(Route, OpportunityScore)> {
        let mut scored = Vec::new();
        for route in routes {
            match self.evaluate(&route, snapshot) {
                Ok(score) => scored.push((route, score)),
                Err(rejection) => {
                    debug!(%route, %rejection, "Candidate rejected");
                }
            }
        }
        scored.sort_by(|a, b| {
            b.1.net_profit
                .cmp(&a.1.net_profit)
                .then_with(|| b.1.confidence.total_cmp(&a.1.confidence))
        });
        scored
    }

    /// Bind a scored route to concrete amounts and per-leg minimum-output
    /// guards. Re-checks the profit threshold so a plan built from a stale
    /// score cannot sneak through.
    pub fn build_plan(
        &self,
        route: &Route,
        score: &OpportunityScore,
        snapshot: &MarketSnapshot,
    ) -> Result<ExecutionPlan, EvaluationRejection> {
        let walk = self.walk_legs(route, snapshot)?;

        let principal = self.principal;
        let repay_amount = principal * (Decimal::ONE + self.flash_fee_rate);
        let expected_net = walk.all_in - repay_amount;

        if expected_net < self.min_profit {
            return Err(EvaluationRejection::BelowProfitThreshold {
                net: expected_net,
                threshold: self.min_profit,
            });
        }

        let mut legs = Vec::with_capacity(route.legs.len());
        let mut amount_in = principal;
        for (i, leg) in route.legs.iter().enumerate() {
            let expected_out = walk.leg_outputs[i];
            // Guard band below expectation, matching the slippage limit.
            let min_out = expected_out * (Decimal::ONE - self.max_slippage);
            legs.push(PlannedLeg {
                venue: leg.venue.clone(),
                asset_in: leg.asset_in.clone(),
                asset_out: leg.asset_out.clone(),
                amount_in,
                expected_out,
                min_out,
            });
            amount_in = expected_out;
        }

        Ok(ExecutionPlan {
            route: route.clone(),
            legs,
            principal,
            repay_amount,
            expected_net,
            score: score.clone(),
            deadline: Utc::now() + chrono::Duration::seconds(self.submission_deadline_secs),
        })
    }

    /// Walk the legs once, carrying the three propagations and per-leg
    /// bookkeeping for confidence scoring and plan building.
    fn walk_legs(
        &self,
        route: &Route,
        snapshot: &MarketSnapshot,
    ) -> Result<LegWalk, EvaluationRejection> {
        let mut walk = LegWalk {
            ideal: self.principal,
            fee_only: self.principal,
            all_in: self.principal,
            leg_outputs: Vec::with_capacity(route.legs.len()),
            freshness_sum: 0.0,
            depth_margin_sum: 0.0,
            reliability_sum: 0.0,
            leg_count: route.legs.len(),
        };

        for (i, leg) in route.legs.iter().enumerate() {
            let quote = snapshot
                .venue_quote(&leg.venue, &leg.asset_in, &leg.asset_out)
                .ok_or(EvaluationRejection::MissingQuote { leg: i })?;
            let rate = quote
                .conversion_rate(&leg.asset_in)
                .ok_or(EvaluationRejection::MissingQuote { leg: i })?;

            let depth_in = quote.depth_in(&leg.asset_in).unwrap_or(Decimal::ZERO);
            if depth_in <= Decimal::ZERO {
                // No sizable depth counts as consuming all of it.
                return Err(EvaluationRejection::DepthExceeded {
                    leg: i,
                    ratio: Decimal::ONE,
                    limit: self.max_depth_fraction,
                });
            }

            // Trade size on the fee-adjusted path; slippage must not feed
            // back into its own sizing.
            let ratio = walk.fee_only / depth_in;
            if ratio > self.max_depth_fraction {
                return Err(EvaluationRejection::DepthExceeded {
                    leg: i,
                    ratio,
                    limit: self.max_depth_fraction,
                });
            }

            let slip = (self.impact_coefficient * ratio).min(Decimal::ONE);
            let fee_keep = Decimal::ONE - quote.fee;

            walk.ideal *= rate;
            walk.fee_only *= rate * fee_keep;
            walk.all_in *= rate * fee_keep * (Decimal::ONE - slip);
            walk.leg_outputs.push(walk.all_in);

            walk.freshness_sum += self.freshness_term(quote.age(snapshot.taken_at));
            walk.depth_margin_sum += depth_margin_term(ratio, self.max_depth_fraction);
            walk.reliability_sum += self
                .reliability
                .get(&leg.venue)
                .copied()
                .unwrap_or(DEFAULT_RELIABILITY);
        }

        Ok(walk)
    }

    fn freshness_term(&self, age: chrono::Duration) -> f64 {
        if self.staleness_ms <= 0 {
            return 0.0;
        }
        let age_ms = age.num_milliseconds() as f64;
        (1.0 - age_ms / self.staleness_ms as f64).clamp(0.0, 1.0)
    }

    fn confidence(&self, walk: &LegWalk) -> f64 {
        if walk.leg_count == 0 {
            return 0.0;
        }
        let n = walk.leg_count as f64;
        let score = self.freshness_weight * (walk.freshness_sum / n)
            + self.depth_weight * (walk.depth_margin_sum / n)
            + self.reliability_weight * (walk.reliability_sum / n);
        score.clamp(0.0, 1.0)
    }
}

/// How much margin a leg leaves under the depth-fraction cap, in [0,1].
fn depth_margin_term(ratio: Decimal, cap: Decimal) -> f64 {
    if cap <= Decimal::ZERO {
        return 0.0;
    }
    let used = (ratio / cap).to_f64().unwrap_or(1.0);
    (1.0 - used).clamp(0.0, 1.0)
}

/// Accumulator for one pass over a route's legs.
struct LegWalk {
    ideal: Decimal,
    fee_only: Decimal,
    all_in: Decimal,
    /// Realistic (fee and slippage adjusted) output after each leg.
    leg_outputs: Vec<Decimal>,
    freshness_sum: f64,
    depth_margin_sum: f64,
    reliability_sum: f64,
    leg_count: usize,
}
