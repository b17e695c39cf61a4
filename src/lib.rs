//! Flash-loan arbitrage engine
//!
//! Detects and executes flash-loan arbitrage across configured venues.
//! Per cycle: aggregate venue quotes into a coherent snapshot, search it
//! for funding-asset cycles whose fee-adjusted rates multiply above 1.0,
//! price the survivors against fees and modeled slippage, and hand the
//! best plan to an execution substrate that commits the whole
//! borrow-swap-repay unit atomically or voids it with no balance change.

pub mod alerts;
pub mod config;
pub mod cooldown;
pub mod errors;
pub mod evaluator;
pub mod execution;
pub mod metrics;
pub mod routing;
pub mod scheduler;
pub mod snapshot;
pub mod types;
pub mod venues;

// Re-export commonly used types
pub use config::EngineConfig;
pub use errors::{ConfigError, EvaluationRejection, ExecutionError, SnapshotError, VenueError};
pub use evaluator::ProfitEvaluator;
pub use execution::{ExecutionOrchestrator, ExecutionSubstrate, InProcessLedger, RpcSubstrate};
pub use metrics::{CycleRecord, EngineMetrics};
pub use routing::RouteOptimizer;
pub use scheduler::OpportunityScheduler;
pub use snapshot::SnapshotAggregator;
pub use types::{
    ExecutionOutcome, ExecutionPlan, ExecutionResult, MarketSnapshot, OpportunityScore, Route,
    VenueQuote,
};
