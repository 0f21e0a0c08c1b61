//! # Data Models
//!
//! SeaORM entities for the tables owned by the resilience core.

pub mod api_request_log;
pub mod business;
pub mod circuit_breaker;
pub mod job_run;

pub use api_request_log::Entity as ApiRequestLog;
pub use business::Entity as Business;
pub use circuit_breaker::Entity as CircuitBreaker;
pub use job_run::Entity as JobRun;
