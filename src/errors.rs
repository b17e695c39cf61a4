//! Error taxonomy for the arbitrage engine
//!
//! One enum per failure domain. Venue and snapshot errors are recoverable
//! by design (a venue drops out of the pass, an instrument drops out of the
//! snapshot); execution errors void the whole atomic unit. Only startup
//! problems (config, credentials, unreachable substrate) are fatal, and
//! those surface as `anyhow` errors in the binary.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::types::InstrumentPair;

/// Failure fetching a quote from a single venue.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VenueError {
    /// Transport failure, timeout, or a non-success HTTP status.
    #[error("venue unavailable: {0}")]
    Unavailable(String),

    /// The venue told us to back off (HTTP 429).
    #[error("venue rate limited: {0}")]
    RateLimited(String),

    /// Response arrived but could not be interpreted as a usable quote.
    #[error("malformed venue response: {0}")]
    Malformed(String),
}

impl VenueError {
    /// Transient errors may be retried; malformed responses never are,
    /// since the payload will not improve on a second read.
    pub fn is_transient(&self) -> bool {
        !matches!(self, VenueError::Malformed(_))
    }
}

pub type VenueResult<T> = Result<T, VenueError>;

/// Failure assembling a market snapshot.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SnapshotError {
    /// Too few venues answered for one instrument. The instrument is
    /// skipped for the cycle; this variant is not fatal on its own.
    #[error("quorum not met for {pair}: {responders}/{required} venues")]
    QuorumNotMet {
        pair: InstrumentPair,
        responders: usize,
        required: usize,
    },

    /// Nothing cleared quorum, so the whole cycle has no data to act on.
    #[error("no instrument met the {required}-venue quorum")]
    NoUsableInstruments { required: usize },
}

pub type SnapshotResult<T> = Result<T, SnapshotError>;

/// Why the evaluator dropped a candidate route. These are filters, not
/// errors: the scheduler treats them as silence, logged at debug level.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvaluationRejection {
    #[error("net profit {net} below threshold {threshold}")]
    BelowProfitThreshold { net: Decimal, threshold: Decimal },

    #[error("estimated slippage {fraction} exceeds limit {limit}")]
    SlippageTooHigh { fraction: Decimal, limit: Decimal },

    #[error("leg {leg} consumes {ratio} of quoted depth (limit {limit})")]
    DepthExceeded {
        leg: usize,
        ratio: Decimal,
        limit: Decimal,
    },

    #[error("no quote in snapshot for leg {leg}")]
    MissingQuote { leg: usize },
}

/// Execution-time failure. Every variant voids the atomic unit: either
/// nothing was submitted, or the substrate reverted the whole sequence.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecutionError {
    /// Dry-run result diverged from the evaluator's estimate beyond the
    /// slippage tolerance. The plan is stale; nothing was submitted.
    #[error("simulation diverged from estimate: expected net {expected}, simulated {simulated}")]
    SimulationMismatch { expected: Decimal, simulated: Decimal },

    /// The substrate refused or failed to accept the unit.
    #[error("submission failed: {0}")]
    SubmissionFailure(String),

    /// A leg's realized output fell below its minimum-output guard.
    #[error("leg {leg} output {actual} below minimum guard {min_out}")]
    PartialFillGuardTripped {
        leg: usize,
        actual: Decimal,
        min_out: Decimal,
    },

    /// Final proceeds could not cover principal plus flash-loan fee.
    #[error("repayment shortfall: final output {available} owes {required}")]
    RepaymentShortfall {
        available: Decimal,
        required: Decimal,
    },
}

impl ExecutionError {
    /// Short stable label for metrics counters and alert titles.
    pub fn kind(&self) -> &'static str {
        match self {
            ExecutionError::SimulationMismatch { .. } => "simulation_mismatch",
            ExecutionError::SubmissionFailure(_) => "submission_failure",
            ExecutionError::PartialFillGuardTripped { .. } => "partial_fill_guard",
            ExecutionError::RepaymentShortfall { .. } => "repayment_shortfall",
        }
    }
}

/// Configuration problems caught at startup. Always fatal.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("invalid instrument '{0}': expected BASE/QUOTE")]
    BadInstrument(String),
}
