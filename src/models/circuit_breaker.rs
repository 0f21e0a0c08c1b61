//! CircuitBreaker entity model
//!
//! Persisted shape of one breaker record per (api configuration, provider).
//! Conversion to and from the in-memory state machine lives in
//! [`crate::repositories::circuit_breaker`].

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "circuit_breakers")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// API configuration the breaker guards
    pub api_config_id: Uuid,

    /// Provider slug
    pub provider: String,

    /// Computed state: closed, open or half_open
    pub state: String,

    /// Operator override, independent of `state`
    pub manually_disabled: bool,
    pub disabled_reason: Option<String>,

    /// Latest administrative action, replayed by every process sharing the row
    pub manual_revision: i64,
    pub manual_action: Option<String>,
    pub manual_reason: Option<String>,

    pub failure_count: i32,
    pub consecutive_failures: i32,
    pub success_count: i32,
    pub consecutive_successes: i32,

    pub failure_threshold: i32,
    pub success_threshold: i32,
    pub timeout_seconds: i64,

    pub last_failure_at: Option<DateTimeWithTimeZone>,
    pub last_success_at: Option<DateTimeWithTimeZone>,
    pub opened_at: Option<DateTimeWithTimeZone>,
    pub last_failure_reason: Option<String>,
    pub last_failure_type: Option<String>,

    /// Monotonic mutation counter of the in-memory record
    pub revision: i64,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
