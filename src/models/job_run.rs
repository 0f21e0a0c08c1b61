//! JobRun entity model
//!
//! This module contains the SeaORM entity model for the job_runs table,
//! which represents one scheduled execution unit performed for a business.

use std::fmt;
use std::str::FromStr;

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};

/// JobRun entity representing one scheduled execution for a business
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "job_runs")]
pub struct Model {
    /// Unique identifier for the job run (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Owning business. `None` only for historical orphaned rows.
    pub business_id: Option<Uuid>,

    /// Type of job (e.g., scan, refresh)
    pub job_type: String,

    /// Current status of the run (see [`JobRunStatus`])
    pub status: String,

    /// Timestamp when the run started
    pub started_at: DateTimeWithTimeZone,

    /// Timestamp when the run finished
    pub finished_at: Option<DateTimeWithTimeZone>,

    /// Failure detail recorded when the run failed
    pub error: Option<String>,

    /// Timestamp when the row was created
    pub created_at: DateTimeWithTimeZone,

    /// Timestamp when the row was last updated
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::business::Entity",
        from = "Column::BusinessId",
        to = "super::business::Column::Id"
    )]
    Business,
}

impl Related<super::business::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Business.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Lifecycle status of a job run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobRunStatus {
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl JobRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobRunStatus::Running => "running",
            JobRunStatus::Succeeded => "succeeded",
            JobRunStatus::Failed => "failed",
            JobRunStatus::Skipped => "skipped",
        }
    }

    /// Whether the status ends the run
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobRunStatus::Running)
    }
}

impl fmt::Display for JobRunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobRunStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "running" => Ok(JobRunStatus::Running),
            "succeeded" => Ok(JobRunStatus::Succeeded),
            "failed" => Ok(JobRunStatus::Failed),
            "skipped" => Ok(JobRunStatus::Skipped),
            other => Err(format!("unknown job run status '{other}'")),
        }
    }
}
