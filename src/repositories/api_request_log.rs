//! # Request Ledger
//!
//! Append-only record of every outbound provider call attempt. The ledger
//! validates and stores entries; it never interprets them. Statistics are
//! computed by [`crate::usage::UsageAggregator`] over its read helpers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::breaker::{CallOutcome, FailureType};
use crate::clock::SharedClock;
use crate::config::LedgerConfig;
use crate::error::LedgerError;
use crate::models::api_request_log::{ActiveModel, Column, Entity, Model};

/// A call attempt about to be written to the ledger
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewApiRequest {
    pub provider: String,
    pub endpoint: Option<String>,
    pub method: String,
    pub client_id: Option<Uuid>,
    pub client_name: Option<String>,
    pub job_run_id: Option<Uuid>,
    pub status_code: Option<i32>,
    pub success: bool,
    pub response_time_ms: Option<i64>,
    pub results_count: i32,
    pub error_message: Option<String>,
    pub error_type: Option<String>,
    pub rate_limit_remaining: Option<i32>,
    pub rate_limit_reset: Option<DateTime<Utc>>,
}

impl NewApiRequest {
    /// A successful call
    pub fn succeeded(provider: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            method: method.into(),
            success: true,
            ..Default::default()
        }
    }

    /// A failed call; the failure type is derived from the status code
    pub fn failed(
        provider: impl Into<String>,
        method: impl Into<String>,
        status_code: Option<i32>,
        error_message: impl Into<String>,
    ) -> Self {
        let failure_type =
            FailureType::classify(status_code.and_then(|code| u16::try_from(code).ok()));
        Self {
            provider: provider.into(),
            method: method.into(),
            status_code,
            success: false,
            error_message: Some(error_message.into()),
            error_type: Some(failure_type.as_str().to_string()),
            ..Default::default()
        }
    }

    /// Reject entries that would break the ledger's invariants.
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.provider.trim().is_empty() {
            return Err(LedgerError::validation("provider", "must not be empty"));
        }
        if self.method.trim().is_empty() {
            return Err(LedgerError::validation("method", "must not be empty"));
        }
        if self.results_count < 0 {
            return Err(LedgerError::validation(
                "results_count",
                format!("must be non-negative, got {}", self.results_count),
            ));
        }
        if let Some(ms) = self.response_time_ms
            && ms < 0
        {
            return Err(LedgerError::validation(
                "response_time_ms",
                format!("must be non-negative, got {ms}"),
            ));
        }
        if let Some(code) = self.status_code
            && !(100..=599).contains(&code)
        {
            return Err(LedgerError::validation(
                "status_code",
                format!("must be a valid HTTP status, got {code}"),
            ));
        }
        if self.success && self.error_type.is_some() {
            return Err(LedgerError::validation(
                "error_type",
                "must be absent on a successful call",
            ));
        }
        Ok(())
    }

    /// The breaker outcome this entry represents
    pub fn outcome(&self) -> CallOutcome {
        if self.success {
            return CallOutcome::Success;
        }
        let failure_type = self
            .error_type
            .as_deref()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or_else(|| {
                FailureType::classify(self.status_code.and_then(|code| u16::try_from(code).ok()))
            });
        CallOutcome::Failure {
            failure_type,
            reason: self.error_message.clone(),
        }
    }
}

/// Append-only ledger of provider calls
#[derive(Clone)]
pub struct RequestLedger {
    db: Arc<DatabaseConnection>,
    config: LedgerConfig,
    clock: SharedClock,
}

impl RequestLedger {
    pub fn new(db: Arc<DatabaseConnection>, config: LedgerConfig, clock: SharedClock) -> Self {
        Self { db, config, clock }
    }

    /// Validate and write one entry, returning it with its id and timestamp.
    pub async fn append(&self, entry: NewApiRequest) -> Result<Model, LedgerError> {
        if let Err(err) = entry.validate() {
            warn!(provider = %entry.provider, error = %err, "Rejected ledger entry");
            counter!("api_request_ledger_rejections_total").increment(1);
            return Err(err);
        }

        let error_message = entry
            .error_message
            .map(|message| truncate_chars(message, self.config.error_message_max_chars));

        let row = ActiveModel {
            id: Set(Uuid::new_v4()),
            provider: Set(entry.provider),
            endpoint: Set(entry.endpoint),
            method: Set(entry.method),
            client_id: Set(entry.client_id),
            client_name: Set(entry.client_name),
            job_run_id: Set(entry.job_run_id),
            status_code: Set(entry.status_code),
            success: Set(entry.success),
            response_time_ms: Set(entry.response_time_ms),
            results_count: Set(entry.results_count),
            error_message: Set(error_message),
            error_type: Set(entry.error_type),
            rate_limit_remaining: Set(entry.rate_limit_remaining),
            rate_limit_reset: Set(entry.rate_limit_reset.map(|at| at.fixed_offset())),
            created_at: Set(self.clock.now().fixed_offset()),
        };

        let written = row.insert(self.db.as_ref()).await?;

        counter!(
            "api_request_ledger_appends_total",
            "provider" => written.provider.clone(),
            "outcome" => if written.success { "success" } else { "failure" }
        )
        .increment(1);
        debug!(
            entry_id = %written.id,
            provider = %written.provider,
            success = written.success,
            job_run_id = ?written.job_run_id,
            "Ledger entry appended"
        );

        Ok(written)
    }

    /// Entries created in `[start, end]`, oldest first. `start = None` reads
    /// from the beginning of the ledger.
    pub async fn entries_between(
        &self,
        provider: Option<&str>,
        start: Option<DateTime<Utc>>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Model>, LedgerError> {
        let mut query = Entity::find()
            .filter(Column::CreatedAt.lte(end.fixed_offset()))
            .order_by_asc(Column::CreatedAt);

        if let Some(start) = start {
            query = query.filter(Column::CreatedAt.gte(start.fixed_offset()));
        }
        if let Some(provider) = provider {
            query = query.filter(Column::Provider.eq(provider));
        }

        Ok(query.all(self.db.as_ref()).await?)
    }

    /// Failed entries, newest first
    pub async fn recent_failures(&self, limit: u64) -> Result<Vec<Model>, LedgerError> {
        let rows = Entity::find()
            .filter(Column::Success.eq(false))
            .order_by_desc(Column::CreatedAt)
            .limit(limit)
            .all(self.db.as_ref())
            .await?;
        Ok(rows)
    }

    /// Every call made by one job run, oldest first
    pub async fn for_job_run(&self, job_run_id: Uuid) -> Result<Vec<Model>, LedgerError> {
        let rows = Entity::find()
            .filter(Column::JobRunId.eq(job_run_id))
            .order_by_asc(Column::CreatedAt)
            .all(self.db.as_ref())
            .await?;
        Ok(rows)
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }
}

/// Truncate to `max` characters (not bytes), marking the cut with "..."
fn truncate_chars(message: String, max: usize) -> String {
    if message.chars().count() > max {
        let truncated: String = message.chars().take(max).collect();
        format!("{}...", truncated)
    } else {
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_negative_results_count() {
        let entry = NewApiRequest {
            results_count: -1,
            ..NewApiRequest::succeeded("newsapi", "GET")
        };
        let err = entry.validate().unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Validation {
                field: "results_count",
                ..
            }
        ));
    }

    #[test]
    fn rejects_success_with_error_type() {
        let entry = NewApiRequest {
            error_type: Some("timeout".to_string()),
            ..NewApiRequest::succeeded("newsapi", "GET")
        };
        assert!(entry.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_status_and_latency() {
        let entry = NewApiRequest {
            status_code: Some(42),
            ..NewApiRequest::succeeded("newsapi", "GET")
        };
        assert!(entry.validate().is_err());

        let entry = NewApiRequest {
            response_time_ms: Some(-5),
            ..NewApiRequest::succeeded("newsapi", "GET")
        };
        assert!(entry.validate().is_err());
    }

    #[test]
    fn failed_entry_classifies_status() {
        let entry = NewApiRequest::failed("serpapi", "GET", Some(429), "too many requests");
        assert!(entry.validate().is_ok());
        assert_eq!(entry.error_type.as_deref(), Some("rate_limited"));
        assert_eq!(
            entry.outcome(),
            CallOutcome::Failure {
                failure_type: FailureType::RateLimited,
                reason: Some("too many requests".to_string()),
            }
        );
    }

    #[test]
    fn transport_failure_without_status_is_network_error() {
        let entry = NewApiRequest::failed("gnews", "GET", None, "connection reset");
        assert_eq!(entry.error_type.as_deref(), Some("network_error"));
        assert_eq!(NewApiRequest::succeeded("gnews", "GET").outcome(), CallOutcome::Success);
    }

    #[test]
    fn unknown_error_type_falls_back_to_status() {
        let entry = NewApiRequest {
            error_type: Some("quota_weirdness".to_string()),
            ..NewApiRequest::failed("gnews", "GET", Some(503), "unavailable")
        };
        assert!(matches!(
            entry.outcome(),
            CallOutcome::Failure {
                failure_type: FailureType::ServerError,
                ..
            }
        ));
    }

    #[test]
    fn truncation_is_utf8_safe() {
        let message = "数据源不可用🚀 ".repeat(50);
        let truncated = truncate_chars(message, 64);
        assert_eq!(truncated.chars().count(), 67);
        assert!(truncated.ends_with("..."));
        assert_eq!(truncate_chars("short".to_string(), 64), "short");
    }
}
