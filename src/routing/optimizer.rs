//! Route optimizer
//!
//! Depth-limited DFS from the funding asset over the price graph, keeping
//! every cycle whose weight sum clears the profitability epsilon. Search
//! effort is bounded three ways: maximum hops per route, a wall-clock
//! budget after which partial results are returned, and a cap on how many
//! ranked candidates leave the module.
//!
//! Rate direction convention matches the graph: an edge already folds in
//! the venue fee, so a route's weight sum reflects everything except
//! modeled slippage, which the evaluator prices separately.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::types::{Asset, MarketSnapshot, Route, RouteLeg};

use super::graph::{PriceGraph, WEIGHT_EPSILON};

pub struct RouteOptimizer {
    funding_asset: Asset,
    max_hops: usize,
    time_budget: Duration,
    max_candidates: usize,
    /// Principal used to size probe amounts and depth ratios during search.
    probe_principal: Decimal,
}

impl RouteOptimizer {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            funding_asset: config.funding(),
            max_hops: config.optimizer.max_hops as usize,
            time_budget: Duration::from_millis(config.optimizer.time_budget_ms),
            max_candidates: config.optimizer.max_candidates,
            probe_principal: config.trading.max_position_size,
        }
    }

    /// Search one snapshot for profitable funding-asset cycles.
    ///
    /// Returns up to `max_candidates` routes, best first: most negative
    /// weight, then fewest hops, then lowest liquidity risk. Ties are
    /// deterministic because the graph fixes edge exploration order.
    pub fn find_routes(&self, snapshot: &MarketSnapshot) -> Vec<Route> {
        let started = Instant::now();
        let graph = PriceGraph::from_snapshot(snapshot);
        if graph.edge_count() == 0 {
            debug!("Price graph is empty, nothing to search");
            return Vec::new();
        }

        let deadline = started + self.time_budget;
        let mut found = Vec::new();
        let mut path: Vec<RouteLeg> = Vec::with_capacity(self.max_hops);
        let mut visited: HashSet<Asset> = HashSet::new();

        let completed = self.dfs(
            &graph,
            &self.funding_asset,
            self.probe_principal,
            0.0,
            0.0,
            &mut path,
            &mut visited,
            deadline,
            &mut found,
        );

        if !completed {
            info!(
                found = found.len(),
                budget_ms = self.time_budget.as_millis() as u64,
                "Search budget exhausted, ranking partial results"
            );
        }

        let total = found.len();
        let routes = rank_routes(found, self.max_candidates);

        info!(
            candidates = routes.len(),
            cycles_found = total,
            assets = graph.asset_count(),
            edges = graph.edge_count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "🧭 Route search complete"
        );
        for route in &routes {
            debug!(route = %route, weight = route.net_weight, risk = route.liquidity_risk, "Candidate");
        }

        routes
    }

    /// Returns false once the time budget expires; partial results found so
    /// far stay in `out`.
    #[allow(clippy::too_many_arguments)]
    fn dfs(
        &self,
        graph: &PriceGraph,
        at: &Asset,
        amount_in: Decimal,
        weight_sum: f64,
        risk_sum: f64,
        path: &mut Vec<RouteLeg>,
        visited: &mut HashSet<Asset>,
        deadline: Instant,
        out: &mut Vec<Route>,
    ) -> bool {
        if Instant::now() >= deadline {
            return false;
        }

        for edge in graph.edges_from(at) {
            let amount_out = amount_in * edge.rate;
            if amount_out <= Decimal::ZERO {
                continue;
            }
            let leg_risk = match (amount_in / edge.depth_in).to_f64() {
                Some(r) if r.is_finite() => r,
                _ => continue,
            };

            if edge.asset_out == self.funding_asset {
                // Closing leg. A single hop cannot be a cycle.
                if path.len() + 1 >= 2 {
                    let total_weight = weight_sum + edge.weight;
                    if total_weight < -WEIGHT_EPSILON {
                        let mut legs = path.clone();
                        legs.push(RouteLeg {
                            venue: edge.venue.clone(),
                            asset_in: at.clone(),
                            asset_out: edge.asset_out.clone(),
                            estimated_out: amount_out,
                        });
                        out.push(Route {
                            legs,
                            funding_asset: self.funding_asset.clone(),
                            net_weight: total_weight,
                            liquidity_risk: risk_sum + leg_risk,
                        });
                    }
                }
                continue;
            }

            // Interior leg: never revisit an asset, and leave room for the
            // closing leg within the hop limit.
            if path.len() + 1 >= self.max_hops || visited.contains(&edge.asset_out) {
                continue;
            }

            path.push(RouteLeg {
                venue: edge.venue.clone(),
                asset_in: at.clone(),
                asset_out: edge.asset_out.clone(),
                estimated_out: amount_out,
            });
            visited.insert(edge.asset_out.clone());

            let completed = self.dfs(
                graph,
                &edge.asset_out,
                amount_out,
                weight_sum + edge.weight,
                risk_sum + leg_risk,
                path,
                visited,
                deadline,
                out,
            );

            visited.remove(&edge.asset_out);
            path.pop();

            if !completed {
                return false;
            }
        }

        true
    }
}

/// Rank candidates best-first and truncate. Ordering: most negative weight,
/// then fewest hops, then lowest liquidity risk.
fn rank_routes(mut routes: Vec<Route>, max_candidates: usize) -> Vec<Route> {
    routes.sort_by(|a, b| {
        a.net_weight
            .total_cmp(&b.net_weight)
            .then_with(|| a.hop_count().cmp(&b.hop_count()))
            .then_with(|| a.liquidity_risk.total_cmp(&b.liquidity_risk))
    });
    routes.truncate(max_candidates);
    routes
}
