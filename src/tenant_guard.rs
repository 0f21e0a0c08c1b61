//! # Tenant Job Guard
//!
//! Enforces that every new job run belongs to a business, and recovers
//! historical runs that do not.
//!
//! Reconciliation is an operator action. `Delete` is irreversible and only
//! runs when the caller passes [`DELETE_ORPHANS_CONFIRMATION`] verbatim;
//! both strategies apply to every current orphan inside one transaction.

use metrics::counter;
use sea_orm::{DatabaseConnection, TransactionTrait};
use serde::Serialize;
use subtle::ConstantTimeEq;
use tracing::{info, warn};
use uuid::Uuid;

use crate::clock::SharedClock;
use crate::error::GuardError;
use crate::models::job_run::{JobRunStatus, Model as JobRun};
use crate::repositories::business::business_exists;
use crate::repositories::job_run::{self, JobRunRepository};

/// Token a caller must pass to delete orphaned job runs
pub const DELETE_ORPHANS_CONFIRMATION: &str = "DELETE-ORPHANED-JOB-RUNS";

/// What to do with job runs that have no business
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileStrategy {
    /// Attach every orphan to an existing business
    AssignDefaultTenant(Uuid),
    /// Remove every orphan
    Delete { confirmation: Option<String> },
}

impl ReconcileStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            ReconcileStrategy::AssignDefaultTenant(_) => "assign_default_tenant",
            ReconcileStrategy::Delete { .. } => "delete",
        }
    }
}

/// Outcome of a reconciliation batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub strategy: &'static str,
    pub affected: u64,
}

/// Tenant scoping for job runs
pub struct TenantJobGuard {
    db: DatabaseConnection,
    runs: JobRunRepository,
    clock: SharedClock,
}

impl TenantJobGuard {
    pub fn new(db: DatabaseConnection, clock: SharedClock) -> Self {
        Self {
            runs: JobRunRepository::new(db.clone()),
            db,
            clock,
        }
    }

    /// Create a running job run. The business must exist.
    pub async fn create_job_run(
        &self,
        business_id: Option<Uuid>,
        job_type: &str,
    ) -> Result<JobRun, GuardError> {
        let Some(business_id) = business_id else {
            warn!(job_type, "Rejected job run without a business id");
            return Err(GuardError::MissingTenant { business_id: None });
        };
        if job_type.trim().is_empty() {
            return Err(GuardError::InvalidJobType);
        }
        if !business_exists(&self.db, business_id).await? {
            warn!(%business_id, job_type, "Rejected job run for unknown business");
            return Err(GuardError::MissingTenant {
                business_id: Some(business_id),
            });
        }

        let run = self
            .runs
            .insert_running(business_id, job_type.trim(), self.clock.now())
            .await?;

        counter!("job_runs_created_total", "job_type" => run.job_type.clone()).increment(1);
        info!(%business_id, job_run_id = %run.id, job_type = %run.job_type, "Job run created");

        Ok(run)
    }

    /// Fetch a run owned by `business_id`
    pub async fn find_job_run(&self, business_id: Uuid, run_id: Uuid) -> Result<JobRun, GuardError> {
        self.runs
            .find_by_business(business_id, run_id)
            .await?
            .ok_or(GuardError::NotFound {
                business_id,
                run_id,
            })
    }

    /// Finish a run owned by `business_id` with a terminal status
    pub async fn complete_job_run(
        &self,
        business_id: Uuid,
        run_id: Uuid,
        status: JobRunStatus,
        error: Option<String>,
    ) -> Result<JobRun, GuardError> {
        if !status.is_terminal() {
            return Err(GuardError::NonTerminalStatus {
                status: status.to_string(),
            });
        }
        let run = self.find_job_run(business_id, run_id).await?;
        let finished = self.runs.finish(run, status, error, self.clock.now()).await?;
        info!(%business_id, job_run_id = %run_id, status = %status, "Job run completed");
        Ok(finished)
    }

    /// Job runs with no business, oldest first. Read-only.
    pub async fn find_orphaned(&self) -> Result<Vec<JobRun>, GuardError> {
        Ok(job_run::find_orphaned(&self.db).await?)
    }

    /// Apply `strategy` to every orphaned run in one transaction.
    ///
    /// Rejections (missing or wrong confirmation, unknown target business)
    /// happen before anything is written.
    pub async fn reconcile_orphaned(
        &self,
        strategy: ReconcileStrategy,
    ) -> Result<ReconcileReport, GuardError> {
        if let ReconcileStrategy::Delete { confirmation } = &strategy {
            let Some(token) = confirmation else {
                warn!("Rejected orphan deletion without confirmation token");
                return Err(GuardError::ConfirmationRequired);
            };
            let matches: bool =
                ConstantTimeEq::ct_eq(token.as_bytes(), DELETE_ORPHANS_CONFIRMATION.as_bytes())
                    .into();
            if !matches {
                warn!("Rejected orphan deletion with invalid confirmation token");
                return Err(GuardError::InvalidConfirmation);
            }
        }

        let txn = self.db.begin().await?;
        let affected = match &strategy {
            ReconcileStrategy::AssignDefaultTenant(business_id) => {
                if !business_exists(&txn, *business_id).await? {
                    txn.rollback().await?;
                    return Err(GuardError::UnknownBusiness(*business_id));
                }
                job_run::assign_orphaned(&txn, *business_id, self.clock.now()).await?
            }
            ReconcileStrategy::Delete { .. } => job_run::delete_orphaned(&txn).await?,
        };
        txn.commit().await?;

        counter!("job_runs_reconciled_total", "strategy" => strategy.name()).increment(affected);
        info!(strategy = strategy.name(), affected, "Orphaned job runs reconciled");

        Ok(ReconcileReport {
            strategy: strategy.name(),
            affected,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_names() {
        assert_eq!(
            ReconcileStrategy::AssignDefaultTenant(Uuid::nil()).name(),
            "assign_default_tenant"
        );
        assert_eq!(
            ReconcileStrategy::Delete { confirmation: None }.name(),
            "delete"
        );
    }

    #[test]
    fn confirmation_token_is_exact() {
        let matches = |candidate: &str| -> bool {
            ConstantTimeEq::ct_eq(candidate.as_bytes(), DELETE_ORPHANS_CONFIRMATION.as_bytes()).into()
        };
        assert!(matches("DELETE-ORPHANED-JOB-RUNS"));
        assert!(!matches("delete-orphaned-job-runs"));
        assert!(!matches("DELETE-ORPHANED-JOB-RUNS "));
        assert!(!matches(""));
    }
}
