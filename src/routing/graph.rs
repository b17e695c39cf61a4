//! Price graph construction
//!
//! Every fresh quote becomes two directed edges: selling the base hits the
//! bid, buying it pays the ask, both scaled down by the venue fee. Edge
//! weight is -ln(effective rate), so a cycle whose weights sum below zero
//! multiplies out above 1.0. Fees are folded in here; modeled slippage is
//! the evaluator's concern.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::types::{Asset, MarketSnapshot, VenueId};

/// Cycles must clear this margin below zero to count as profitable,
/// filtering float noise around break-even.
pub const WEIGHT_EPSILON: f64 = 1e-6;

/// One directed swap edge. The input asset is the adjacency key.
#[derive(Debug, Clone)]
pub struct PriceEdge {
    pub venue: VenueId,
    pub asset_out: Asset,
    /// Fee-adjusted conversion rate: output units per input unit.
    pub rate: Decimal,
    /// -ln(rate).
    pub weight: f64,
    /// Quoted depth in input-asset units, for trade-size / depth ratios.
    pub depth_in: Decimal,
}

/// Directed multigraph of swap opportunities for one snapshot.
#[derive(Debug, Default)]
pub struct PriceGraph {
    edges: HashMap<Asset, Vec<PriceEdge>>,
    edge_count: usize,
}

impl PriceGraph {
    /// Build the graph from a snapshot. Quotes that cannot yield a positive
    /// finite rate (fee at or above 100%, zero price) or that carry no
    /// depth are skipped; an unsizable edge cannot support any trade.
    pub fn from_snapshot(snapshot: &MarketSnapshot) -> Self {
        let mut graph = Self::default();

        for quotes in snapshot.quotes.values() {
            for quote in quotes {
                let fee_keep = Decimal::ONE - quote.fee;
                if fee_keep <= Decimal::ZERO {
                    continue;
                }

                // Selling base hits the bid
                graph.add_edge(
                    quote.pair.base.clone(),
                    quote.venue.clone(),
                    quote.pair.quote.clone(),
                    quote.bid * fee_keep,
                    quote.depth_in(&quote.pair.base),
                );

                // Buying base pays the ask
                if quote.ask > Decimal::ZERO {
                    graph.add_edge(
                        quote.pair.quote.clone(),
                        quote.venue.clone(),
                        quote.pair.base.clone(),
                        (Decimal::ONE / quote.ask) * fee_keep,
                        quote.depth_in(&quote.pair.quote),
                    );
                }
            }
        }

        // Fix exploration order so equal searches yield equal results
        // regardless of snapshot map iteration order.
        for list in graph.edges.values_mut() {
            list.sort_by(|a, b| {
                a.asset_out
                    .cmp(&b.asset_out)
                    .then_with(|| a.venue.cmp(&b.venue))
            });
        }

        graph
    }

    fn add_edge(
        &mut self,
        from: Asset,
        venue: VenueId,
        to: Asset,
        rate: Decimal,
        depth_in: Option<Decimal>,
    ) {
        let Some(depth_in) = depth_in else {
            return;
        };
        if depth_in <= Decimal::ZERO || rate <= Decimal::ZERO {
            return;
        }
        let Some(rate_f) = rate.to_f64() else {
            return;
        };
        if !rate_f.is_finite() || rate_f <= 0.0 {
            return;
        }
        let weight = -rate_f.ln();
        if !weight.is_finite() {
            return;
        }

        self.edges.entry(from).or_default().push(PriceEdge {
            venue,
            asset_out: to,
            rate,
            weight,
            depth_in,
        });
        self.edge_count += 1;
    }

    pub fn edges_from(&self, asset: &Asset) -> &[PriceEdge] {
        self.edges.get(asset).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Assets with at least one outgoing edge.
    pub fn asset_count(&self) -> usize {
        self.edges.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }
}
