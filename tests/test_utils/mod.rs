//! Test utilities for database testing.
//!
//! In-memory SQLite with every migration applied, plus fixtures for
//! businesses, orphaned job runs and a manually driven clock.

#![allow(dead_code)]

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use migration::{Migrator, MigratorTrait};
use provider_resilience::clock::{ManualClock, SharedClock};
use provider_resilience::config::LedgerConfig;
use provider_resilience::models::job_run;
use provider_resilience::repositories::{BusinessRepository, RequestLedger};
use sea_orm::{ActiveModelTrait, Database, DatabaseConnection, Set};
use uuid::Uuid;

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

/// Fixed starting instant for manual clocks
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 11, 10, 9, 0, 0).unwrap()
}

/// A manual clock at [`t0`] and the same clock as a shared handle
pub fn manual_clock() -> (ManualClock, SharedClock) {
    let clock = ManualClock::new(t0());
    let shared: SharedClock = Arc::new(clock.clone());
    (clock, shared)
}

/// Ledger over `db` with default limits
pub fn test_ledger(db: &DatabaseConnection, clock: SharedClock) -> RequestLedger {
    RequestLedger::new(Arc::new(db.clone()), LedgerConfig::default(), clock)
}

/// Creates a test business and returns its id.
pub async fn create_test_business(db: &DatabaseConnection, name: &str) -> Result<Uuid> {
    let business = BusinessRepository::new(db.clone())
        .create(Some(name.to_string()))
        .await?;
    Ok(business.id)
}

/// Inserts a historical job run with no business.
pub async fn insert_orphaned_run(
    db: &DatabaseConnection,
    job_type: &str,
    at: DateTime<Utc>,
) -> Result<Uuid> {
    let at = at.fixed_offset();
    let run = job_run::ActiveModel {
        id: Set(Uuid::new_v4()),
        business_id: Set(None),
        job_type: Set(job_type.to_string()),
        status: Set("succeeded".to_string()),
        started_at: Set(at),
        finished_at: Set(Some(at)),
        error: Set(None),
        created_at: Set(at),
        updated_at: Set(at),
    }
    .insert(db)
    .await?;
    Ok(run.id)
}
