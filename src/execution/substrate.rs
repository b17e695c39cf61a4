//! Execution substrates
//!
//! `InProcessLedger` replays a plan against rates synced from the current
//! snapshot. Replay works on scratch state; house balances move only when
//! a submission succeeds, so a failed unit provably changes nothing. Its
//! haircut knobs shave leg outputs to exercise guard and shortfall paths.
//!
//! `RpcSubstrate` ships the same plan to an external flash-loan endpoint
//! over JSON-RPC, assembling the borrow / swap / repay instruction list
//! the endpoint executes atomically.

use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info};

use crate::errors::ExecutionError;
use crate::types::{Asset, ExecutionPlan, MarketSnapshot, VenueId};

/// What a dry-run of the full unit would produce.
#[derive(Debug, Clone)]
pub struct SimulationReport {
    pub leg_outputs: Vec<Decimal>,
    pub final_output: Decimal,
    /// Final output minus the repayment obligation.
    pub net_profit: Decimal,
}

/// Proof of a committed unit.
#[derive(Debug, Clone)]
pub struct SubmissionReceipt {
    pub tx_ref: String,
    pub final_output: Decimal,
    pub realized_profit: Decimal,
}

/// Where plans are simulated and submitted.
///
/// Implementations guarantee all-or-nothing submission: a returned error
/// means the unit voided and no balance moved anywhere.
#[async_trait]
pub trait ExecutionSubstrate: Send + Sync {
    fn name(&self) -> &str;

    /// Reachability probe, run once at startup in live mode.
    async fn health_check(&self) -> anyhow::Result<()>;

    /// Push the cycle's market view into the substrate. The RPC substrate
    /// has its own view of the market and ignores this.
    async fn sync_state(&self, _snapshot: &MarketSnapshot) -> anyhow::Result<()> {
        Ok(())
    }

    /// Dry-run the plan without committing anything.
    async fn simulate(&self, plan: &ExecutionPlan) -> Result<SimulationReport, ExecutionError>;

    /// Commit the plan atomically.
    async fn submit(&self, plan: &ExecutionPlan) -> Result<SubmissionReceipt, ExecutionError>;
}

type RateKey = (VenueId, Asset, Asset);

/// Dry-run substrate backed by an in-memory rate table and house balances.
#[derive(Debug, Default)]
pub struct InProcessLedger {
    /// Fee-adjusted conversion rates keyed by (venue, in, out).
    rates: DashMap<RateKey, Decimal>,
    balances: DashMap<Asset, Decimal>,
    submissions: AtomicU64,
    /// Fraction shaved off every leg output during simulate.
    simulate_haircut: Decimal,
    /// Fraction shaved off every leg output during submit.
    submit_haircut: Decimal,
    /// Force submissions to fail at the door.
    fail_submission: AtomicBool,
}

impl InProcessLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shave simulated leg outputs, emulating quote drift between scoring
    /// and simulation.
    pub fn with_simulate_haircut(mut self, haircut: Decimal) -> Self {
        self.simulate_haircut = haircut;
        self
    }

    /// Shave submitted leg outputs, emulating adverse fills at commit time.
    pub fn with_submit_haircut(mut self, haircut: Decimal) -> Self {
        self.submit_haircut = haircut;
        self
    }

    /// Refuse all submissions, emulating a substrate outage.
    pub fn refuse_submissions(self) -> Self {
        self.fail_submission.store(true, Ordering::Relaxed);
        self
    }

    pub fn balance(&self, asset: &Asset) -> Decimal {
        self.balances
            .get(asset)
            .map(|v| *v)
            .unwrap_or(Decimal::ZERO)
    }

    pub fn submission_count(&self) -> u64 {
        self.submissions.load(Ordering::Relaxed)
    }

    /// Replay every leg on scratch state. Nothing here touches balances,
    /// which is what makes failed units free.
    fn replay(
        &self,
        plan: &ExecutionPlan,
        haircut: Decimal,
    ) -> Result<(Vec<Decimal>, Decimal), ExecutionError> {
        let keep = Decimal::ONE - haircut;
        let mut holdings = plan.principal;
        let mut outputs = Vec::with_capacity(plan.legs.len());

        for (i, leg) in plan.legs.iter().enumerate() {
            let key = (leg.venue.clone(), leg.asset_in.clone(), leg.asset_out.clone());
            let rate = self.rates.get(&key).map(|r| *r).ok_or_else(|| {
                ExecutionError::SubmissionFailure(format!(
                    "no market for {} -> {} at {}",
                    leg.asset_in, leg.asset_out, leg.venue
                ))
            })?;

            let out = holdings * rate * keep;
            if out < leg.min_out {
                return Err(ExecutionError::PartialFillGuardTripped {
                    leg: i,
                    actual: out,
                    min_out: leg.min_out,
                });
            }
            holdings = out;
            outputs.push(out);
        }

        if holdings < plan.repay_amount {
            return Err(ExecutionError::RepaymentShortfall {
                available: holdings,
                required: plan.repay_amount,
            });
        }

        Ok((outputs, holdings))
    }
}

#[async_trait]
impl ExecutionSubstrate for InProcessLedger {
    fn name(&self) -> &str {
        "in-process-ledger"
    }

    async fn health_check(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Rebuild the rate table from the snapshot: one entry per quote per
    /// direction, fee folded in.
    async fn sync_state(&self, snapshot: &MarketSnapshot) -> anyhow::Result<()> {
        self.rates.clear();
        for quotes in snapshot.quotes.values() {
            for quote in quotes {
                let fee_keep = Decimal::ONE - quote.fee;
                if fee_keep <= Decimal::ZERO {
                    continue;
                }
                self.rates.insert(
                    (
                        quote.venue.clone(),
                        quote.pair.base.clone(),
                        quote.pair.quote.clone(),
                    ),
                    quote.bid * fee_keep,
                );
                if quote.ask > Decimal::ZERO {
                    self.rates.insert(
                        (
                            quote.venue.clone(),
                            quote.pair.quote.clone(),
                            quote.pair.base.clone(),
                        ),
                        (Decimal::ONE / quote.ask) * fee_keep,
                    );
                }
            }
        }
        debug!(markets = self.rates.len(), "Ledger rate table synced");
        Ok(())
    }

    async fn simulate(&self, plan: &ExecutionPlan) -> Result<SimulationReport, ExecutionError> {
        let (leg_outputs, final_output) = self.replay(plan, self.simulate_haircut)?;
        Ok(SimulationReport {
            leg_outputs,
            final_output,
            net_profit: final_output - plan.repay_amount,
        })
    }

    async fn submit(&self, plan: &ExecutionPlan) -> Result<SubmissionReceipt, ExecutionError> {
        if self.fail_submission.load(Ordering::Relaxed) {
            return Err(ExecutionError::SubmissionFailure(
                "substrate refused the unit".into(),
            ));
        }

        // All-or-nothing: replay first, move balances only on success.
        let (_, final_output) = self.replay(plan, self.submit_haircut)?;
        let realized = final_output - plan.repay_amount;

        let funding = plan.route.funding_asset.clone();
        *self.balances.entry(funding).or_insert(Decimal::ZERO) += realized;

        let n = self.submissions.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(SubmissionReceipt {
            tx_ref: format!("ledger-{n:06}"),
            final_output,
            realized_profit: realized,
        })
    }
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// Outcome payload shared by simulateFlashLoan and submitFlashLoan.
#[derive(Debug, Deserialize)]
struct FlashLoanOutcome {
    leg_outputs: Vec<Decimal>,
    final_output: Decimal,
    #[serde(default)]
    signature: Option<String>,
}

/// Live substrate speaking JSON-RPC to a flash-loan execution endpoint.
pub struct RpcSubstrate {
    client: reqwest::Client,
    url: String,
    request_id: AtomicU64,
}

impl RpcSubstrate {
    pub fn new(rpc_url: String, signer_key: Option<&str>) -> anyhow::Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(key) = signer_key {
            let mut auth: reqwest::header::HeaderValue =
                format!("Bearer {key}").parse()?;
            auth.set_sensitive(true);
            headers.insert(reqwest::header::AUTHORIZATION, auth);
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            url: rpc_url,
            request_id: AtomicU64::new(1),
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T, ExecutionError> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.request_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        let resp = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ExecutionError::SubmissionFailure(format!("{method} transport: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ExecutionError::SubmissionFailure(format!(
                "{method} returned {status}"
            )));
        }

        let body: RpcResponse<T> = resp
            .json()
            .await
            .map_err(|e| ExecutionError::SubmissionFailure(format!("{method} decode: {e}")))?;

        if let Some(err) = body.error {
            return Err(ExecutionError::SubmissionFailure(format!(
                "{method} rpc error {}: {}",
                err.code, err.message
            )));
        }
        body.result.ok_or_else(|| {
            ExecutionError::SubmissionFailure(format!("{method} returned an empty result"))
        })
    }

    /// Assemble the atomic instruction list: borrow, the swap legs with
    /// their guards, then repay.
    fn instructions(plan: &ExecutionPlan) -> serde_json::Value {
        let mut steps = Vec::with_capacity(plan.legs.len() + 2);
        steps.push(json!({
            "op": "borrow",
            "asset": plan.route.funding_asset,
            "amount": plan.principal,
        }));
        for leg in &plan.legs {
            steps.push(json!({
                "op": "swap",
                "venue": leg.venue,
                "asset_in": leg.asset_in,
                "asset_out": leg.asset_out,
                "amount_in": leg.amount_in,
                "min_out": leg.min_out,
            }));
        }
        steps.push(json!({
            "op": "repay",
            "asset": plan.route.funding_asset,
            "amount": plan.repay_amount,
        }));

        json!([{
            "instructions": steps,
            "deadline": plan.deadline.timestamp(),
        }])
    }
}

#[async_trait]
impl ExecutionSubstrate for RpcSubstrate {
    fn name(&self) -> &str {
        "json-rpc"
    }

    async fn health_check(&self) -> anyhow::Result<()> {
        let status: String = self.call("getHealth", json!([])).await?;
        if status != "ok" {
            anyhow::bail!("substrate at {} reported health '{}'", self.url, status);
        }
        info!(url = %self.url, "Execution substrate healthy");
        Ok(())
    }

    async fn simulate(&self, plan: &ExecutionPlan) -> Result<SimulationReport, ExecutionError> {
        let outcome: FlashLoanOutcome = self
            .call("simulateFlashLoan", Self::instructions(plan))
            .await?;
        Ok(SimulationReport {
            net_profit: outcome.final_output - plan.repay_amount,
            final_output: outcome.final_output,
            leg_outputs: outcome.leg_outputs,
        })
    }

    async fn submit(&self, plan: &ExecutionPlan) -> Result<SubmissionReceipt, ExecutionError> {
        let outcome: FlashLoanOutcome = self
            .call("submitFlashLoan", Self::instructions(plan))
            .await?;
        let tx_ref = outcome.signature.ok_or_else(|| {
            ExecutionError::SubmissionFailure("submitFlashLoan returned no signature".into())
        })?;
        Ok(SubmissionReceipt {
            tx_ref,
            final_output: outcome.final_output,
            realized_profit: outcome.final_output - plan.repay_amount,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        InstrumentPair, OpportunityScore, PlannedLeg, Route, RouteLeg, VenueQuote,
    };
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn mk_quote(venue: &str, pair: &str, price: Decimal) -> VenueQuote {
        let pair = InstrumentPair::parse(pair).unwrap();
        VenueQuote {
            venue: VenueId::from(venue),
            pair,
            bid: price,
            ask: price,
            mid: price,
            depth: dec!(100000),
            fee: Decimal::ZERO,
            fetched_at: Utc::now(),
        }
    }

    fn snapshot(quotes: Vec<VenueQuote>) -> MarketSnapshot {
        let mut map: HashMap<InstrumentPair, Vec<VenueQuote>> = HashMap::new();
        for q in quotes {
            map.entry(q.pair.clone()).or_default().push(q);
        }
        MarketSnapshot {
            taken_at: Utc::now(),
            quotes: map,
            instruments_scanned: 0,
            instruments_skipped: vec![],
        }
    }

    /// 1000 USDC -> 10 SOL at orca (100) -> sell at raydium. Expected
    /// outputs follow the sell price; min_out sits `guard_band` below.
    fn mk_plan(sell_price: Decimal, repay: Decimal, guard_band: Decimal) -> ExecutionPlan {
        let usdc = Asset::from("USDC");
        let sol = Asset::from("SOL");
        let keep = Decimal::ONE - guard_band;
        let final_out = dec!(10) * sell_price;

        let route = Route {
            legs: vec![
                RouteLeg {
                    venue: VenueId::from("orca"),
                    asset_in: usdc.clone(),
                    asset_out: sol.clone(),
                    estimated_out: dec!(10),
                },
                RouteLeg {
                    venue: VenueId::from("raydium"),
                    asset_in: sol.clone(),
                    asset_out: usdc.clone(),
                    estimated_out: final_out,
                },
            ],
            funding_asset: usdc.clone(),
            net_weight: -0.01,
            liquidity_risk: 0.001,
        };

        ExecutionPlan {
            legs: vec![
                PlannedLeg {
                    venue: VenueId::from("orca"),
                    asset_in: usdc.clone(),
                    asset_out: sol.clone(),
                    amount_in: dec!(1000),
                    expected_out: dec!(10),
                    min_out: dec!(10) * keep,
                },
                PlannedLeg {
                    venue: VenueId::from("raydium"),
                    asset_in: sol,
                    asset_out: usdc,
                    amount_in: dec!(10),
                    expected_out: final_out,
                    min_out: final_out * keep,
                },
            ],
            route,
            principal: dec!(1000),
            repay_amount: repay,
            expected_net: final_out - repay,
            score: OpportunityScore {
                principal: dec!(1000),
                gross_profit: final_out - dec!(1000),
                fee_cost: repay - dec!(1000),
                slippage_cost: Decimal::ZERO,
                net_profit: final_out - repay,
                confidence: 0.9,
            },
            deadline: Utc::now() + chrono::Duration::seconds(30),
        }
    }

    async fn synced_ledger(ledger: InProcessLedger, sell_price: Decimal) -> InProcessLedger {
        let snap = snapshot(vec![
            mk_quote("orca", "SOL/USDC", dec!(100)),
            mk_quote("raydium", "SOL/USDC", sell_price),
        ]);
        ledger.sync_state(&snap).await.unwrap();
        ledger
    }

    #[tokio::test]
    async fn test_simulate_replays_plan_against_synced_rates() {
        let ledger = synced_ledger(InProcessLedger::new(), dec!(102)).await;
        let plan = mk_plan(dec!(102), dec!(1000), dec!(0.005));

        let report = ledger.simulate(&plan).await.unwrap();

        assert_eq!(report.leg_outputs, vec![dec!(10), dec!(1020)]);
        assert_eq!(report.final_output, dec!(1020));
        assert_eq!(report.net_profit, dec!(20));
        // Simulation never moves balances.
        assert_eq!(ledger.balance(&Asset::from("USDC")), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_submit_credits_exactly_the_net_profit() {
        let ledger = synced_ledger(InProcessLedger::new(), dec!(102)).await;
        let plan = mk_plan(dec!(102), dec!(1000.9), dec!(0.005));

        let receipt = ledger.submit(&plan).await.unwrap();

        assert_eq!(receipt.realized_profit, dec!(19.1));
        assert_eq!(receipt.tx_ref, "ledger-000001");
        assert_eq!(ledger.balance(&Asset::from("USDC")), dec!(19.1));
        assert_eq!(ledger.submission_count(), 1);
    }

    #[tokio::test]
    async fn test_guard_trip_voids_the_unit() {
        // 5% haircut blows straight through a 0.5% guard band on leg 0.
        let ledger =
            synced_ledger(InProcessLedger::new().with_submit_haircut(dec!(0.05)), dec!(102))
                .await;
        let plan = mk_plan(dec!(102), dec!(1000), dec!(0.005));

        let err = ledger.submit(&plan).await.unwrap_err();

        assert!(matches!(
            err,
            ExecutionError::PartialFillGuardTripped { leg: 0, .. }
        ));
        assert_eq!(ledger.balance(&Asset::from("USDC")), Decimal::ZERO);
        assert_eq!(ledger.submission_count(), 0);
    }

    #[tokio::test]
    async fn test_thin_edge_surfaces_repayment_shortfall() {
        // Sell at 100.19: expected final 1001.9 against a 1000.9 repay.
        // A 0.1% haircut passes every per-leg guard (band is 0.5%) but
        // leaves the unit short at repayment.
        let ledger =
            synced_ledger(InProcessLedger::new().with_submit_haircut(dec!(0.001)), dec!(100.19))
                .await;
        let plan = mk_plan(dec!(100.19), dec!(1000.9), dec!(0.005));

        let err = ledger.submit(&plan).await.unwrap_err();

        match err {
            ExecutionError::RepaymentShortfall {
                available,
                required,
            } => {
                assert!(available < required);
                assert_eq!(required, dec!(1000.9));
            }
            other => panic!("expected shortfall, got {other:?}"),
        }
        assert_eq!(ledger.balance(&Asset::from("USDC")), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_unknown_market_fails_submission() {
        let ledger = InProcessLedger::new(); // nothing synced
        let plan = mk_plan(dec!(102), dec!(1000), dec!(0.005));

        let err = ledger.simulate(&plan).await.unwrap_err();
        assert!(matches!(err, ExecutionError::SubmissionFailure(_)));
    }

    #[tokio::test]
    async fn test_refused_submission_leaves_no_trace() {
        let ledger =
            synced_ledger(InProcessLedger::new().refuse_submissions(), dec!(102)).await;
        let plan = mk_plan(dec!(102), dec!(1000), dec!(0.005));

        let err = ledger.submit(&plan).await.unwrap_err();
        assert_eq!(err.kind(), "submission_failure");
        assert_eq!(ledger.balance(&Asset::from("USDC")), Decimal::ZERO);
        assert_eq!(ledger.submission_count(), 0);
    }

    #[test]
    fn test_instruction_assembly_brackets_legs_with_borrow_and_repay() {
        let plan = mk_plan(dec!(102), dec!(1000.9), dec!(0.005));
        let params = RpcSubstrate::instructions(&plan);

        let steps = params[0]["instructions"].as_array().unwrap();
        assert_eq!(steps.len(), 4);
        assert_eq!(steps[0]["op"], "borrow");
        assert_eq!(steps[0]["asset"], "USDC");
        assert_eq!(steps[1]["op"], "swap");
        assert_eq!(steps[1]["venue"], "orca");
        assert_eq!(steps[2]["op"], "swap");
        assert_eq!(steps[3]["op"], "repay");
        assert_eq!(steps[3]["amount"], "1000.9");
        assert!(params[0]["deadline"].is_i64());
    }
}
