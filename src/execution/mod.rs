//! Execution
//!
//! The orchestrator drives a plan through simulate-then-submit against an
//! execution substrate. The substrate owns atomicity: either every leg of
//! borrow, swaps and repay lands, or the whole unit voids with no balance
//! change. Two substrates ship: an in-process ledger for dry runs and
//! tests, and a JSON-RPC client for live submission.

pub mod orchestrator;
pub mod substrate;

pub use orchestrator::ExecutionOrchestrator;
pub use substrate::{
    ExecutionSubstrate, InProcessLedger, RpcSubstrate, SimulationReport, SubmissionReceipt,
};
