//! APIRequestLog entity model
//!
//! This module contains the SeaORM entity model for the api_request_logs
//! table. Each row is one outbound provider call attempt and is never
//! updated after it is written.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};

/// Ledger entry for a single provider call attempt
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "api_request_logs")]
pub struct Model {
    /// Unique identifier assigned at append time
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Provider slug (e.g., newsapi, serpapi)
    pub provider: String,

    /// Endpoint or path called, if known
    pub endpoint: Option<String>,

    /// HTTP method used for the call
    pub method: String,

    /// Business the call was made for
    pub client_id: Option<Uuid>,

    /// Display name of the business at call time
    pub client_name: Option<String>,

    /// Job run that issued the call
    pub job_run_id: Option<Uuid>,

    /// Upstream status code; absent on transport failure
    pub status_code: Option<i32>,

    /// Whether the call succeeded
    pub success: bool,

    /// Wall-clock latency of the call
    pub response_time_ms: Option<i64>,

    /// Number of results the provider returned
    pub results_count: i32,

    /// Failure message (truncated at append time)
    pub error_message: Option<String>,

    /// Failure classification, see [`crate::breaker::FailureType`]
    pub error_type: Option<String>,

    /// Provider-reported remaining quota
    pub rate_limit_remaining: Option<i32>,

    /// Provider-reported quota reset time
    pub rate_limit_reset: Option<DateTimeWithTimeZone>,

    /// Timestamp assigned at append time
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
