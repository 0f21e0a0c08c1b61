//! # Provider Resilience
//!
//! Reliability core of a multi-tenant monitoring backend that calls external
//! data providers on behalf of businesses:
//!
//! - [`breaker`]: per (configuration, provider) circuit breakers
//! - [`repositories::RequestLedger`]: append-only record of call attempts
//! - [`usage`]: read-only statistics over the ledger
//! - [`tenant_guard`]: tenant scoping and orphan reconciliation for job runs
//! - [`call_gate`]: the admission → call → record seam used by the scheduler
//!
//! Nothing here performs network I/O against providers or sleeps.

pub mod breaker;
pub mod call_gate;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod repositories;
pub mod telemetry;
pub mod tenant_guard;
pub mod usage;

pub use migration;
