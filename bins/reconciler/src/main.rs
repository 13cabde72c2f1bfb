//! Tally batch reconciler.
//!
//! Runs one reconciliation job across the configured organizations and
//! prints one JSON report per organization on stdout. Logs go to stderr.
//!
//! Usage:
//!   reconciler close-period --year 2026 --month 3
//!   reconciler match-invoices --org <uuid>
//!   reconciler auto-match-payments
//!   reconciler update-actuals --year 2026 --month 3
//!   reconciler accrue-period --year 2026 --month 3
//!   reconciler variance-report --year 2026 --month 3
//!   reconciler create-settlements --from 2026-03-01 --to 2026-03-31 --currency USD
//!   reconciler post-settlements
//!   reconciler export-gl-postings

mod jobs;

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use futures::StreamExt;
use tally_core::workflow::RuleBasedApprovalPolicy;
use tally_db::{AuditLogRepository, GlOutboxRepository, connect, stores};
use tally_shared::AppConfig;
use tally_shared::config::LogConfig;
use tally_shared::types::OrganizationId;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use jobs::{Job, Services};

#[derive(Parser)]
#[command(name = "reconciler")]
#[command(about = "Tally batch reconciliation jobs", long_about = None)]
struct Cli {
    /// Organization to process (repeatable). Defaults to `batch.organizations`.
    #[arg(long = "org", global = true)]
    organizations: Vec<Uuid>,

    #[command(subcommand)]
    job: Job,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = AppConfig::load().context("Failed to load configuration")?;
    init_tracing(&config.log);

    let organizations: Vec<OrganizationId> = if cli.organizations.is_empty() {
        config.batch.organizations.iter().copied().map(OrganizationId::from_uuid).collect()
    } else {
        cli.organizations.into_iter().map(OrganizationId::from_uuid).collect()
    };
    if organizations.is_empty() {
        bail!("No organizations to process: pass --org or set TALLY__BATCH__ORGANIZATIONS");
    }

    let db = connect(&config.database).await.context("Failed to connect to database")?;
    info!("Connected to database");

    let policy = RuleBasedApprovalPolicy::from_config(&config.approval)
        .context("Invalid approval rules")?;
    let services = Services::new(
        &config,
        stores(&db),
        Arc::new(AuditLogRepository::new(db.clone())),
        Arc::new(policy),
        GlOutboxRepository::new(db.clone()),
    );

    let job = &cli.job;
    let services = &services;
    let total = organizations.len();
    let results: Vec<_> = futures::stream::iter(organizations)
        .map(|organization_id| async move { (organization_id, services.run(job, organization_id).await) })
        .buffer_unordered(config.batch.tenant_concurrency.max(1))
        .collect()
        .await;

    let mut failures = 0;
    for (organization_id, result) in results {
        match result {
            Ok(report) => println!("{}", serde_json::to_string(&report)?),
            Err(e) => {
                failures += 1;
                error!(job = job.name(), %organization_id, error = %format!("{e:#}"), "Job failed");
            }
        }
    }

    if failures > 0 {
        bail!("{} failed for {failures} of {total} organizations", job.name());
    }
    Ok(())
}

fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.filter));
    let registry = tracing_subscriber::registry().with(filter);
    if log.json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}
