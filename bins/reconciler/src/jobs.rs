//! Batch jobs run per organization.

use std::sync::Arc;

use anyhow::Result;
use chrono::NaiveDate;
use clap::Subcommand;
use serde_json::{Value, json};
use tally_core::accrual::AccrualManager;
use tally_core::documents::AccrualPeriod;
use tally_core::matching::MatchingEngine;
use tally_core::ports::{AuditSink, KeyedLocks, Stores};
use tally_core::reports::ReportService;
use tally_core::settlement::SettlementEngine;
use tally_core::workflow::ApprovalPolicy;
use tally_db::GlOutboxRepository;
use tally_shared::AppConfig;
use tally_shared::types::{Currency, OrganizationId};
use tracing::info;

/// Job selected on the command line.
#[derive(Debug, Clone, Subcommand)]
pub enum Job {
    /// Update actuals, then close or flag every accrual of the period.
    ClosePeriod {
        /// Calendar year.
        #[arg(long)]
        year: i32,
        /// Calendar month (1-12).
        #[arg(long)]
        month: u32,
    },

    /// Match unmatched invoices to purchase orders for every customer.
    MatchInvoices,

    /// Apply open payments to outstanding invoices, oldest due first.
    AutoMatchPayments,

    /// Recompute accrual actuals from the period's invoices.
    UpdateActuals {
        /// Calendar year.
        #[arg(long)]
        year: i32,
        /// Calendar month (1-12).
        #[arg(long)]
        month: u32,
    },

    /// Calculate accruals for every active spend agreement.
    AccruePeriod {
        /// Calendar year.
        #[arg(long)]
        year: i32,
        /// Calendar month (1-12).
        #[arg(long)]
        month: u32,
    },

    /// Print the accrual variance report of a period.
    VarianceReport {
        /// Calendar year.
        #[arg(long)]
        year: i32,
        /// Calendar month (1-12).
        #[arg(long)]
        month: u32,
    },

    /// Create one draft settlement per customer for a window.
    CreateSettlements {
        /// First day of the window (YYYY-MM-DD).
        #[arg(long)]
        from: NaiveDate,
        /// Last day of the window (YYYY-MM-DD).
        #[arg(long)]
        to: NaiveDate,
        /// Settlement currency.
        #[arg(long, default_value = "USD")]
        currency: Currency,
    },

    /// Queue the GL postings of completed settlements.
    PostSettlements,

    /// Print queued GL postings and mark them exported.
    ExportGlPostings,
}

impl Job {
    /// Short name used in logs.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ClosePeriod { .. } => "close_period",
            Self::MatchInvoices => "match_invoices",
            Self::AutoMatchPayments => "auto_match_payments",
            Self::UpdateActuals { .. } => "update_actuals",
            Self::AccruePeriod { .. } => "accrue_period",
            Self::VarianceReport { .. } => "variance_report",
            Self::CreateSettlements { .. } => "create_settlements",
            Self::PostSettlements => "post_settlements",
            Self::ExportGlPostings => "export_gl_postings",
        }
    }
}

/// Services shared by every organization of a run.
pub struct Services {
    matching: MatchingEngine,
    accruals: AccrualManager,
    settlements: SettlementEngine,
    reports: ReportService,
    outbox: GlOutboxRepository,
}

impl Services {
    /// Wires the services over one set of stores.
    pub fn new(
        config: &AppConfig,
        stores: Stores,
        audit: Arc<dyn AuditSink>,
        policy: Arc<dyn ApprovalPolicy>,
        outbox: GlOutboxRepository,
    ) -> Self {
        let locks = KeyedLocks::new();
        Self {
            matching: MatchingEngine::new(
                stores.clone(),
                audit.clone(),
                locks.clone(),
                config.matching.clone(),
            ),
            accruals: AccrualManager::new(
                stores.clone(),
                audit.clone(),
                locks.clone(),
                policy.clone(),
                config.accrual.clone(),
            ),
            settlements: SettlementEngine::new(
                stores.clone(),
                audit,
                locks,
                policy,
                Arc::new(outbox.clone()),
                config.settlement.clone(),
            ),
            reports: ReportService::new(stores),
            outbox,
        }
    }

    /// Runs one job for one organization and returns its JSON report.
    pub async fn run(&self, job: &Job, organization_id: OrganizationId) -> Result<Value> {
        info!(job = job.name(), %organization_id, "Job started");
        let report = match *job {
            Job::ClosePeriod { year, month } => {
                serde_json::to_value(self.accruals.close_period(organization_id, year, month).await?)?
            }
            Job::MatchInvoices => {
                serde_json::to_value(self.matching.batch_match_organization(organization_id).await?)?
            }
            Job::AutoMatchPayments => {
                serde_json::to_value(self.matching.auto_match_organization(organization_id).await?)?
            }
            Job::UpdateActuals { year, month } => serde_json::to_value(
                self.accruals
                    .update_actuals_with_period_invoices(organization_id, AccrualPeriod::new(year, month)?)
                    .await?,
            )?,
            Job::AccruePeriod { year, month } => serde_json::to_value(
                self.accruals
                    .calculate_period_accruals(organization_id, AccrualPeriod::new(year, month)?)
                    .await?,
            )?,
            Job::VarianceReport { year, month } => serde_json::to_value(
                self.reports
                    .accrual_variance(organization_id, AccrualPeriod::new(year, month)?)
                    .await?,
            )?,
            Job::CreateSettlements { from, to, currency } => serde_json::to_value(
                self.settlements
                    .create_period_settlements(organization_id, from, to, currency)
                    .await?,
            )?,
            Job::PostSettlements => {
                serde_json::to_value(self.settlements.post_completed_settlements(organization_id).await?)?
            }
            Job::ExportGlPostings => self.export_gl_postings(organization_id).await?,
        };
        info!(job = job.name(), %organization_id, "Job finished");
        Ok(report)
    }

    /// Marks every queued posting exported and returns them. A posting
    /// marked by a concurrent export is left out.
    async fn export_gl_postings(&self, organization_id: OrganizationId) -> Result<Value> {
        let mut exported = Vec::new();
        for posting in self.outbox.pending(organization_id).await? {
            if self.outbox.mark_exported(posting.settlement_id).await? {
                exported.push(posting);
            }
        }
        info!(%organization_id, exported = exported.len(), "GL postings exported");
        Ok(json!({ "organization_id": organization_id, "postings": exported }))
    }
}
