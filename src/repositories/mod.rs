//! # Repository Layer
//!
//! Repository implementations that encapsulate SeaORM operations for the
//! resilience tables. Job run reads are business-scoped; the orphan helpers
//! are free functions so they can run inside a reconciliation transaction.

pub mod api_request_log;
pub mod business;
pub mod circuit_breaker;
pub mod job_run;

pub use api_request_log::{NewApiRequest, RequestLedger};
pub use business::BusinessRepository;
pub use circuit_breaker::CircuitBreakerRepository;
pub use job_run::JobRunRepository;
