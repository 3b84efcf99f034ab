//! Conflict-resolution self-check for active-active cross-cluster
//! replication.
//!
//! The harness provokes each category of replication conflict by racing
//! writes on two clusters ([`scenario`]), waits for replication to settle
//! ([`convergence`]), and then checks every conflict the engine logged
//! against an oracle through a fixed chain of per-category checkers
//! ([`checker`], [`verifier`]).

pub mod checker;
pub mod client;
pub mod config;
pub mod convergence;
pub mod gateway;
pub mod oracle;
pub mod payload;
pub mod record;
pub mod report;
pub mod runner;
pub mod scenario;
pub mod taxonomy;
pub mod verifier;

pub use checker::{RESOLVE_CHAIN, Resolution, ResolveChecker, verify_against_chain};
pub use client::{ConflictClient, ScenarioRun};
pub use config::SelfCheckConfig;
pub use convergence::{ConvergenceWaiter, WaitOutcome};
pub use gateway::{ClusterRole, DualCluster};
pub use record::ConflictRecord;
pub use report::SelfCheckReport;
pub use scenario::ScenarioOutcome;
pub use taxonomy::ConflictCategory;
pub use verifier::{ConflictVerifier, OracleLoader, VerificationReport};

/// Install a `fmt` subscriber filtered by `RUST_LOG`, falling back to
/// `default_directive`. Does nothing if a subscriber is already set.
pub fn init_tracing(default_directive: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
