//! Circuit breaker subsystem.
//!
//! # Data Flow
//! ```text
//! Job run about to call a provider:
//!     → registry.can_admit(key)        (lazy open → half_open on timeout)
//!     → caller performs the call
//!     → ledger append, then registry.record_outcome(key, outcome, ticket)
//! ```
//!
//! One record per (api configuration, provider); see [`state`] for the
//! transition table and [`registry`] for the locking model.

pub mod registry;
pub mod state;

pub use registry::CircuitBreakerRegistry;
pub use state::{
    Admission, BreakerKey, BreakerState, BreakerThresholds, CallOutcome, CircuitBreakerRecord,
    CircuitBreakerStatus, FailureType, ManualAction, ManualChange, ManualOverride, ProbeTicket,
    Transition,
};
