//! Route search
//!
//! Turns a market snapshot into a directed multigraph of fee-adjusted swap
//! edges and searches it for funding-asset cycles whose rates multiply out
//! above 1.0, which in log space is a negative-weight cycle.

pub mod graph;
pub mod optimizer;

pub use graph::{PriceEdge, PriceGraph, WEIGHT_EPSILON};
pub use optimizer::RouteOptimizer;
