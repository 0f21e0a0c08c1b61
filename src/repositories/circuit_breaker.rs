//! # Circuit Breaker Repository
//!
//! Durable copies of breaker records. The in-memory registry stays the
//! source of truth while the process runs; rows are written after every
//! mutation and read back on startup.
//!
//! Every write is a single conditional UPDATE: it lands only when the stored
//! `revision` is older than the record's and the stored `manual_revision` is
//! not newer. A process that has not yet seen an administrative action
//! therefore cannot overwrite it.

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use tracing::{debug, error};
use uuid::Uuid;

use crate::breaker::{
    BreakerKey, BreakerState, BreakerThresholds, CircuitBreakerRecord, FailureType, ManualAction,
    ManualChange, ManualOverride,
};
use crate::error::{BreakerFault, CoreError, is_unique_violation};
use crate::models::circuit_breaker::{ActiveModel, Column, Entity, Model};

/// Repository for persisted circuit breaker records
pub struct CircuitBreakerRepository {
    db: DatabaseConnection,
}

impl CircuitBreakerRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Load every valid record. Rows that fail conversion are logged and
    /// left out so one corrupt row cannot keep the rest from loading.
    pub async fn load_all(&self) -> Result<Vec<CircuitBreakerRecord>, CoreError> {
        let rows = Entity::find()
            .order_by_asc(Column::Provider)
            .all(&self.db)
            .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            match record_from_model(&row) {
                Ok(record) => records.push(record),
                Err(fault) => error!(row_id = %row.id, error = %fault, "Skipping corrupt circuit breaker row"),
            }
        }
        Ok(records)
    }

    /// Load one record; a corrupt row is an error
    pub async fn load(&self, key: &BreakerKey) -> Result<Option<CircuitBreakerRecord>, CoreError> {
        let row = self.find_row(key).await?;
        match row {
            Some(row) => Ok(Some(record_from_model(&row)?)),
            None => Ok(None),
        }
    }

    /// Write `record` unless the stored row is newer. Returns whether a
    /// write happened.
    pub async fn save(&self, record: &CircuitBreakerRecord) -> Result<bool, CoreError> {
        if self.update_if_newer(record).await? {
            return Ok(true);
        }
        if self.find_row(&record.key).await?.is_some() {
            debug!(
                breaker = %record.key,
                revision = record.revision,
                manual_revision = record.manual_revision(),
                "Skipping stale circuit breaker write"
            );
            return Ok(false);
        }

        let row = new_active_model(Uuid::new_v4(), record);
        match row.insert(&self.db).await {
            Ok(_) => Ok(true),
            // Another writer created the row first
            Err(err) if is_unique_violation(&err) => self.update_if_newer(record).await,
            Err(err) => Err(err.into()),
        }
    }

    async fn update_if_newer(&self, record: &CircuitBreakerRecord) -> Result<bool, CoreError> {
        let mut active = <ActiveModel as Default>::default();
        apply_record(&mut active, record);

        let result = Entity::update_many()
            .set(active)
            .filter(Column::ApiConfigId.eq(record.key.api_config_id))
            .filter(Column::Provider.eq(record.key.provider.as_str()))
            .filter(Column::Revision.lt(revision_to_db(record.revision)))
            .filter(Column::ManualRevision.lte(revision_to_db(record.manual_revision())))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }

    async fn find_row(&self, key: &BreakerKey) -> Result<Option<Model>, sea_orm::DbErr> {
        Entity::find()
            .filter(Column::ApiConfigId.eq(key.api_config_id))
            .filter(Column::Provider.eq(key.provider.as_str()))
            .one(&self.db)
            .await
    }
}

fn new_active_model(id: Uuid, record: &CircuitBreakerRecord) -> ActiveModel {
    let mut active = ActiveModel {
        id: Set(id),
        api_config_id: Set(record.key.api_config_id),
        provider: Set(record.key.provider.clone()),
        ..Default::default()
    };
    apply_record(&mut active, record);
    active
}

fn apply_record(active: &mut ActiveModel, record: &CircuitBreakerRecord) {
    active.state = Set(record.state.as_str().to_string());
    active.manually_disabled = Set(record.manual_override.is_disabled());
    active.disabled_reason = Set(record.manual_override.reason().map(str::to_string));
    active.manual_revision = Set(revision_to_db(record.manual_revision()));
    active.manual_action = Set(
        record
            .last_manual
            .as_ref()
            .map(|change| change.action.as_str().to_string()),
    );
    active.manual_reason = Set(record
        .last_manual
        .as_ref()
        .and_then(|change| change.reason.clone()));
    active.failure_count = Set(count_to_db(record.failure_count));
    active.consecutive_failures = Set(count_to_db(record.consecutive_failures));
    active.success_count = Set(count_to_db(record.success_count));
    active.consecutive_successes = Set(count_to_db(record.consecutive_successes));
    active.failure_threshold = Set(count_to_db(record.thresholds.failure_threshold));
    active.success_threshold = Set(count_to_db(record.thresholds.success_threshold));
    active.timeout_seconds =
        Set(i64::try_from(record.thresholds.timeout_seconds).unwrap_or(i64::MAX));
    active.last_failure_at = Set(record.last_failure_at.map(|at| at.fixed_offset()));
    active.last_success_at = Set(record.last_success_at.map(|at| at.fixed_offset()));
    active.opened_at = Set(record.opened_at.map(|at| at.fixed_offset()));
    active.last_failure_reason = Set(record.last_failure_reason.clone());
    active.last_failure_type = Set(record.last_failure_type.map(|t| t.as_str().to_string()));
    active.revision = Set(revision_to_db(record.revision));
    active.updated_at = Set(Utc::now().fixed_offset());
}

/// Rebuild an in-memory record from its row, validating as it goes
pub fn record_from_model(row: &Model) -> Result<CircuitBreakerRecord, BreakerFault> {
    let key = BreakerKey::new(row.api_config_id, row.provider.clone());
    let fault = |detail: String| BreakerFault::InvariantViolation {
        key: key.to_string(),
        detail,
    };

    let count = |field: &str, value: i32| {
        u32::try_from(value).map_err(|_| fault(format!("{field} is negative ({value})")))
    };

    let state: BreakerState = row.state.parse().map_err(fault)?;
    let last_failure_type = row
        .last_failure_type
        .as_deref()
        .map(str::parse::<FailureType>)
        .transpose()
        .map_err(fault)?;
    let timeout_seconds = u64::try_from(row.timeout_seconds)
        .map_err(|_| fault(format!("timeout_seconds is negative ({})", row.timeout_seconds)))?;
    let revision = u64::try_from(row.revision)
        .map_err(|_| fault(format!("revision is negative ({})", row.revision)))?;
    let last_manual = match row.manual_action.as_deref() {
        Some(action) => Some(ManualChange {
            revision: u64::try_from(row.manual_revision).map_err(|_| {
                fault(format!("manual_revision is negative ({})", row.manual_revision))
            })?,
            action: action.parse::<ManualAction>().map_err(fault)?,
            reason: row.manual_reason.clone(),
        }),
        None if row.manual_revision == 0 => None,
        None => {
            return Err(fault(format!(
                "manual_revision {} without manual_action",
                row.manual_revision
            )));
        }
    };

    let record = CircuitBreakerRecord {
        key: key.clone(),
        state,
        manual_override: if row.manually_disabled {
            ManualOverride::Disabled {
                reason: row.disabled_reason.clone(),
            }
        } else {
            ManualOverride::None
        },
        failure_count: count("failure_count", row.failure_count)?,
        consecutive_failures: count("consecutive_failures", row.consecutive_failures)?,
        success_count: count("success_count", row.success_count)?,
        consecutive_successes: count("consecutive_successes", row.consecutive_successes)?,
        thresholds: BreakerThresholds {
            failure_threshold: count("failure_threshold", row.failure_threshold)?,
            success_threshold: count("success_threshold", row.success_threshold)?,
            timeout_seconds,
        },
        last_failure_at: row.last_failure_at.map(to_utc),
        last_success_at: row.last_success_at.map(to_utc),
        opened_at: row.opened_at.map(to_utc),
        last_failure_reason: row.last_failure_reason.clone(),
        last_failure_type,
        revision,
        last_manual,
        probe_in_flight: None,
        probes_issued: 0,
    };

    record.check_invariants().map_err(fault)?;
    Ok(record)
}

fn to_utc(at: sea_orm::prelude::DateTimeWithTimeZone) -> DateTime<Utc> {
    at.with_timezone(&Utc)
}

fn count_to_db(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn revision_to_db(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(state: &str) -> Model {
        let now = Utc::now().fixed_offset();
        Model {
            id: Uuid::new_v4(),
            api_config_id: Uuid::new_v4(),
            provider: "newsapi".to_string(),
            state: state.to_string(),
            manually_disabled: false,
            disabled_reason: None,
            manual_revision: 0,
            manual_action: None,
            manual_reason: None,
            failure_count: 7,
            consecutive_failures: 5,
            success_count: 12,
            consecutive_successes: 0,
            failure_threshold: 5,
            success_threshold: 2,
            timeout_seconds: 60,
            last_failure_at: Some(now),
            last_success_at: None,
            opened_at: Some(now),
            last_failure_reason: Some("HTTP 503".to_string()),
            last_failure_type: Some("server_error".to_string()),
            revision: 9,
            updated_at: now,
        }
    }

    #[test]
    fn converts_valid_open_row() {
        let record = record_from_model(&row("open")).unwrap();
        assert_eq!(record.state, BreakerState::Open);
        assert_eq!(record.failure_count, 7);
        assert_eq!(record.last_failure_type, Some(FailureType::ServerError));
        assert_eq!(record.revision, 9);
        assert!(record.probe_in_flight.is_none());
        assert_eq!(record.manual_revision(), 0);
    }

    #[test]
    fn rejects_negative_counter() {
        let mut bad = row("open");
        bad.success_count = -1;
        let err = record_from_model(&bad).unwrap_err();
        assert!(err.to_string().contains("success_count is negative"));
    }

    #[test]
    fn rejects_unknown_state() {
        let err = record_from_model(&row("ajar")).unwrap_err();
        assert!(err.to_string().contains("unknown breaker state"));
    }

    #[test]
    fn rejects_open_row_without_opened_at() {
        let mut bad = row("open");
        bad.opened_at = None;
        assert!(record_from_model(&bad).is_err());
    }

    #[test]
    fn disabled_flag_becomes_override() {
        let mut disabled = row("closed");
        disabled.consecutive_failures = 0;
        disabled.opened_at = None;
        disabled.manually_disabled = true;
        disabled.disabled_reason = Some("vendor outage".to_string());
        disabled.manual_revision = 3;
        disabled.manual_action = Some("disable".to_string());
        disabled.manual_reason = Some("vendor outage".to_string());
        let record = record_from_model(&disabled).unwrap();
        assert_eq!(record.manual_override.reason(), Some("vendor outage"));
        assert_eq!(
            record.last_manual,
            Some(ManualChange {
                revision: 3,
                action: ManualAction::Disable,
                reason: Some("vendor outage".to_string()),
            })
        );
    }

    #[test]
    fn rejects_manual_revision_without_action() {
        let mut bad = row("open");
        bad.manual_revision = 2;
        let err = record_from_model(&bad).unwrap_err();
        assert!(err.to_string().contains("without manual_action"));
    }
}
