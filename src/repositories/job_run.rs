//! # JobRun Repository
//!
//! Storage operations for the job_runs table. Reads are always scoped by
//! business; the only unscoped queries are the orphan helpers used by
//! reconciliation.

use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    IntoActiveModel, QueryFilter, QueryOrder, QuerySelect, Set,
};
use uuid::Uuid;

use crate::models::job_run::{ActiveModel, Column, Entity, JobRunStatus, Model};

/// Repository for job run database operations
pub struct JobRunRepository {
    db: DatabaseConnection,
}

impl JobRunRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Insert a running job run for `business_id`
    pub async fn insert_running(
        &self,
        business_id: Uuid,
        job_type: &str,
        now: DateTime<Utc>,
    ) -> Result<Model, sea_orm::DbErr> {
        let now = now.fixed_offset();
        let run = ActiveModel {
            id: Set(Uuid::new_v4()),
            business_id: Set(Some(business_id)),
            job_type: Set(job_type.to_string()),
            status: Set(JobRunStatus::Running.as_str().to_string()),
            started_at: Set(now),
            finished_at: Set(None),
            error: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };
        run.insert(&self.db).await
    }

    /// Find a job run by ID, ensuring it belongs to the specified business
    pub async fn find_by_business(
        &self,
        business_id: Uuid,
        run_id: Uuid,
    ) -> Result<Option<Model>, sea_orm::DbErr> {
        Entity::find_by_id(run_id)
            .filter(Column::BusinessId.eq(business_id))
            .one(&self.db)
            .await
    }

    /// List job runs for a business, newest first
    pub async fn list_by_business(
        &self,
        business_id: Uuid,
        limit: u64,
    ) -> Result<Vec<Model>, sea_orm::DbErr> {
        Entity::find()
            .filter(Column::BusinessId.eq(business_id))
            .order_by_desc(Column::CreatedAt)
            .limit(limit)
            .all(&self.db)
            .await
    }

    /// Move a run to a terminal status
    pub async fn finish(
        &self,
        run: Model,
        status: JobRunStatus,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Model, sea_orm::DbErr> {
        let now = now.fixed_offset();
        let mut active = run.into_active_model();
        active.status = Set(status.as_str().to_string());
        active.finished_at = Set(Some(now));
        active.error = Set(error);
        active.updated_at = Set(now);
        active.update(&self.db).await
    }
}

/// Job runs with no owning business, oldest first
pub async fn find_orphaned<C: ConnectionTrait>(conn: &C) -> Result<Vec<Model>, sea_orm::DbErr> {
    Entity::find()
        .filter(Column::BusinessId.is_null())
        .order_by_asc(Column::CreatedAt)
        .all(conn)
        .await
}

/// Attach every orphaned run to `business_id`; returns the affected count
pub async fn assign_orphaned<C: ConnectionTrait>(
    conn: &C,
    business_id: Uuid,
    now: DateTime<Utc>,
) -> Result<u64, sea_orm::DbErr> {
    let result = Entity::update_many()
        .col_expr(Column::BusinessId, Expr::value(business_id))
        .col_expr(Column::UpdatedAt, Expr::value(now.fixed_offset()))
        .filter(Column::BusinessId.is_null())
        .exec(conn)
        .await?;
    Ok(result.rows_affected)
}

/// Delete every orphaned run; returns the affected count
pub async fn delete_orphaned<C: ConnectionTrait>(conn: &C) -> Result<u64, sea_orm::DbErr> {
    let result = Entity::delete_many()
        .filter(Column::BusinessId.is_null())
        .exec(conn)
        .await?;
    Ok(result.rows_affected)
}
