//! Database migrations for the provider resilience core.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2024_01_01_000001_create_businesses;
mod m2025_11_10_090000_create_job_runs;
mod m2025_11_10_090100_create_api_request_logs;
mod m2025_11_10_090200_create_circuit_breakers;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2024_01_01_000001_create_businesses::Migration),
            Box::new(m2025_11_10_090000_create_job_runs::Migration),
            Box::new(m2025_11_10_090100_create_api_request_logs::Migration),
            Box::new(m2025_11_10_090200_create_circuit_breakers::Migration),
        ]
    }
}
