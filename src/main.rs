//! # Provider Resilience Admin CLI
//!
//! Operator entry point for migrations, usage statistics, breaker overrides
//! and orphaned job run reconciliation. Output is JSON on stdout.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use provider_resilience::{
    breaker::{BreakerKey, CircuitBreakerRegistry, ManualAction},
    call_gate::CallGate,
    clock::system_clock,
    config::{AppConfig, ConfigLoader},
    db,
    repositories::{CircuitBreakerRepository, RequestLedger},
    telemetry,
    tenant_guard::{ReconcileStrategy, TenantJobGuard},
    usage::{StatsWindow, UsageAggregator},
};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "provider-resilience", version, about = "Provider resilience administration")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Apply pending database migrations
    Migrate,
    /// Usage statistics from the request ledger
    Stats {
        /// Restrict to one provider; otherwise grouped by provider
        #[arg(long)]
        provider: Option<String>,
        /// Trailing window in hours; the whole ledger when omitted
        #[arg(long)]
        hours: Option<u32>,
    },
    /// Most recent failed calls, newest first
    Failures {
        #[arg(long)]
        limit: Option<u64>,
    },
    /// Inspect or override circuit breakers
    #[command(subcommand)]
    Breaker(BreakerCommand),
    /// Inspect or reconcile job runs without a business
    #[command(subcommand)]
    Orphans(OrphansCommand),
}

#[derive(Debug, Subcommand)]
enum BreakerCommand {
    List,
    Enable {
        #[command(flatten)]
        target: BreakerTarget,
        #[arg(long)]
        reason: Option<String>,
    },
    Disable {
        #[command(flatten)]
        target: BreakerTarget,
        #[arg(long)]
        reason: Option<String>,
    },
    Reset {
        #[command(flatten)]
        target: BreakerTarget,
        #[arg(long)]
        reason: Option<String>,
    },
}

#[derive(Debug, Args)]
struct BreakerTarget {
    /// API configuration id
    #[arg(long = "config")]
    api_config_id: Uuid,
    /// Provider slug
    #[arg(long)]
    provider: String,
}

impl BreakerTarget {
    fn key(self) -> BreakerKey {
        BreakerKey::new(self.api_config_id, self.provider)
    }
}

#[derive(Debug, Subcommand)]
enum OrphansCommand {
    List,
    /// Attach every orphan to an existing business
    Assign {
        #[arg(long = "business")]
        business_id: Uuid,
    },
    /// Delete every orphan; requires the confirmation token
    Delete {
        #[arg(long = "confirm")]
        confirmation: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::new().load().context("loading configuration")?;
    telemetry::init_tracing(&config).context("initializing tracing")?;
    tracing::debug!(profile = %config.profile, "Configuration loaded");

    let db = db::init_pool(&config)
        .await
        .context("initializing database connection pool")?;

    match cli.command {
        Command::Migrate => {
            db::migrate(&db).await?;
            print_json(&serde_json::json!({ "migrated": true }))
        }
        Command::Stats { provider, hours } => {
            let window = hours.map_or(StatsWindow::All, StatsWindow::last_hours);
            let aggregator = UsageAggregator::new(ledger(&config, &db));
            match provider {
                Some(provider) => print_json(&aggregator.stats_for(&provider, window).await?),
                None => print_json(&aggregator.stats_by_provider(window).await?),
            }
        }
        Command::Failures { limit } => {
            let aggregator = UsageAggregator::new(ledger(&config, &db));
            print_json(&aggregator.recent_failures(limit).await?)
        }
        Command::Breaker(command) => run_breaker(command, &config, db).await,
        Command::Orphans(command) => run_orphans(command, db).await,
    }
}

async fn run_breaker(
    command: BreakerCommand,
    config: &AppConfig,
    db: sea_orm::DatabaseConnection,
) -> Result<()> {
    let clock = system_clock();
    let registry = Arc::new(CircuitBreakerRegistry::new(
        config.circuit_breaker.clone(),
        clock.clone(),
    ));
    let gate = CallGate::new(
        registry,
        ledger(config, &db),
        CircuitBreakerRepository::new(db),
    );
    gate.hydrate().await?;

    let (key, action, reason) = match command {
        BreakerCommand::List => {
            let now = clock.now();
            let statuses: Vec<_> = gate
                .registry()
                .list()
                .iter()
                .map(|record| record.status(now))
                .collect();
            return print_json(&statuses);
        }
        BreakerCommand::Enable { target, reason } => (target.key(), ManualAction::Enable, reason),
        BreakerCommand::Disable { target, reason } => {
            (target.key(), ManualAction::Disable, reason)
        }
        BreakerCommand::Reset { target, reason } => (target.key(), ManualAction::Reset, reason),
    };

    let record = gate.manual_control(&key, action, reason).await?;
    print_json(&record.status(clock.now()))
}

async fn run_orphans(command: OrphansCommand, db: sea_orm::DatabaseConnection) -> Result<()> {
    let guard = TenantJobGuard::new(db, system_clock());
    match command {
        OrphansCommand::List => print_json(&guard.find_orphaned().await?),
        OrphansCommand::Assign { business_id } => print_json(
            &guard
                .reconcile_orphaned(ReconcileStrategy::AssignDefaultTenant(business_id))
                .await?,
        ),
        OrphansCommand::Delete { confirmation } => print_json(
            &guard
                .reconcile_orphaned(ReconcileStrategy::Delete { confirmation })
                .await?,
        ),
    }
}

fn ledger(config: &AppConfig, db: &sea_orm::DatabaseConnection) -> RequestLedger {
    RequestLedger::new(Arc::new(db.clone()), config.ledger.clone(), system_clock())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
