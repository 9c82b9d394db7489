//! Convergence and teardown engines.
//!
//! This module provides:
//! - The per-node convergence protocol, run wave by wave
//! - Retry and polling with exponential backoff and jitter
//! - Reverse-order teardown

mod barrier;
mod convergence;
mod report;
mod retry;
mod teardown;

pub use barrier::{WaveGate, WaveReporter};
pub use convergence::ConvergenceEngine;
pub use report::{NodeAction, NodeReport, RunReport};
pub use retry::{Backoff, Retrier};
pub use teardown::{TeardownEngine, TeardownEntry, TeardownOutcome, TeardownReport};
