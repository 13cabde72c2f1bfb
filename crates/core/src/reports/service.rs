//! Report generation service.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tally_shared::types::{CustomerId, OrganizationId};
use tracing::debug;

use super::error::ReportError;
use super::types::{
    AccrualVarianceReport, FailedSettlement, MatchException, MatchExceptionReport, ReviewItem,
    SettlementSummaryReport, VarianceTotals,
};
use crate::documents::{
    Accrual, AccrualFilter, AccrualPeriod, AccrualStatus, Invoice, InvoiceFilter, InvoiceStatus,
    MatchStatus, Payment, PaymentFilter, Settlement, SettlementFilter, SettlementStatus,
    variance_percent,
};
use crate::ports::Stores;

/// Read-only reconciliation reports.
///
/// The `build_*` functions are pure; the async methods load documents and
/// delegate to them.
pub struct ReportService {
    stores: Stores,
}

impl ReportService {
    /// Creates a report service over the given stores.
    #[must_use]
    pub fn new(stores: Stores) -> Self {
        Self { stores }
    }

    /// Accrual variance for one period.
    ///
    /// # Errors
    ///
    /// Returns an error if loading accruals fails.
    pub async fn accrual_variance(
        &self,
        organization_id: OrganizationId,
        period: AccrualPeriod,
    ) -> Result<AccrualVarianceReport, ReportError> {
        let filter = AccrualFilter {
            period: Some(period),
            ..AccrualFilter::default()
        };
        let accruals = self.stores.accruals.find_all(organization_id, &filter).await?;
        debug!(%organization_id, %period, accruals = accruals.len(), "Building accrual variance report");
        Ok(Self::build_accrual_variance(period, &accruals))
    }

    /// Match exceptions for one customer.
    ///
    /// # Errors
    ///
    /// Returns an error if loading invoices or payments fails.
    pub async fn match_exceptions(
        &self,
        organization_id: OrganizationId,
        customer_id: CustomerId,
    ) -> Result<MatchExceptionReport, ReportError> {
        let invoices = self
            .stores
            .invoices
            .find_all(
                organization_id,
                &InvoiceFilter {
                    customer_id: Some(customer_id),
                    statuses: InvoiceStatus::BILLED.to_vec(),
                    ..InvoiceFilter::default()
                },
            )
            .await?;
        let payments = self
            .stores
            .payments
            .find_all(
                organization_id,
                &PaymentFilter {
                    customer_id: Some(customer_id),
                    ..PaymentFilter::default()
                },
            )
            .await?;
        Ok(Self::build_match_exceptions(customer_id, &invoices, &payments))
    }

    /// Settlement activity with a settlement date in `[from, to]`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidDateRange` when `from` is after `to`, or an error if
    /// loading settlements fails.
    pub async fn settlement_summary(
        &self,
        organization_id: OrganizationId,
        customer_id: Option<CustomerId>,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<SettlementSummaryReport, ReportError> {
        if from > to {
            return Err(ReportError::InvalidDateRange { start: from, end: to });
        }
        let settlements = self
            .stores
            .settlements
            .find_all(
                organization_id,
                &SettlementFilter {
                    customer_id,
                    ..SettlementFilter::default()
                },
            )
            .await?;
        let in_range: Vec<Settlement> = settlements
            .into_iter()
            .filter(|s| (from..=to).contains(&s.settlement_date))
            .collect();
        Ok(Self::build_settlement_summary(from, to, &in_range))
    }

    /// Builds the accrual variance report.
    ///
    /// Status counts include every accrual. Totals leave out reversal
    /// entries and the originals they reversed, which cancel out.
    #[must_use]
    pub fn build_accrual_variance(period: AccrualPeriod, accruals: &[Accrual]) -> AccrualVarianceReport {
        let mut status_counts = BTreeMap::new();
        let mut totals: BTreeMap<String, VarianceTotals> = BTreeMap::new();
        let mut review = Vec::new();

        for accrual in accruals.iter().filter(|a| a.period == period) {
            *status_counts.entry(accrual.status.as_str().to_string()).or_insert(0) += 1;

            if accrual.reversal_of.is_some() || accrual.status == AccrualStatus::Reversed {
                continue;
            }

            let entry = totals.entry(accrual.currency.to_string()).or_default();
            entry.total_accrual += accrual.totals.total_accrual;
            entry.total_actual += accrual.totals.total_actual;

            if accrual.needs_review {
                review.push(ReviewItem {
                    accrual_id: accrual.id,
                    number: accrual.number.clone(),
                    customer_id: accrual.customer_id,
                    currency: accrual.currency.to_string(),
                    accrual: accrual.totals.total_accrual,
                    actual: accrual.totals.total_actual,
                    variance: accrual.totals.total_variance,
                    variance_percent: accrual.totals.variance_percent,
                });
            }
        }

        for entry in totals.values_mut() {
            entry.total_variance = entry.total_actual - entry.total_accrual;
            entry.variance_percent = variance_percent(entry.total_accrual, entry.total_actual);
        }
        review.sort_by(|a, b| {
            b.variance_percent
                .abs()
                .cmp(&a.variance_percent.abs())
                .then_with(|| a.number.cmp(&b.number))
        });

        AccrualVarianceReport {
            report_type: "accrual_variance".to_string(),
            period,
            status_counts,
            totals,
            review,
        }
    }

    /// Builds the match exception report.
    ///
    /// Draft and cancelled invoices are ignored.
    #[must_use]
    pub fn build_match_exceptions(
        customer_id: CustomerId,
        invoices: &[Invoice],
        payments: &[Payment],
    ) -> MatchExceptionReport {
        let mut invoice_match_counts = BTreeMap::new();
        let mut unmatched_invoice_amount: BTreeMap<String, Decimal> = BTreeMap::new();
        let mut exceptions = Vec::new();

        for invoice in invoices
            .iter()
            .filter(|i| i.customer_id == customer_id && InvoiceStatus::BILLED.contains(&i.status))
        {
            *invoice_match_counts
                .entry(invoice.match_status.as_str().to_string())
                .or_insert(0) += 1;

            if matches!(invoice.match_status, MatchStatus::Matched | MatchStatus::ThreeWayMatched) {
                continue;
            }
            let unmatched: Decimal = invoice.lines.iter().filter(|l| !l.matched).map(|l| l.amount).sum();
            *unmatched_invoice_amount.entry(invoice.currency.to_string()).or_default() += unmatched;
            exceptions.push(MatchException {
                invoice_id: invoice.id,
                number: invoice.number.clone(),
                match_status: invoice.match_status.as_str().to_string(),
                invoice_date: invoice.invoice_date,
                total: invoice.totals.total,
                unmatched_amount: unmatched,
            });
        }
        exceptions.sort_by(|a, b| a.invoice_date.cmp(&b.invoice_date).then_with(|| a.number.cmp(&b.number)));

        let mut payment_match_counts = BTreeMap::new();
        let mut unapplied_payment_amount: BTreeMap<String, Decimal> = BTreeMap::new();
        for payment in payments
            .iter()
            .filter(|p| p.customer_id == customer_id && p.status.is_applicable())
        {
            *payment_match_counts
                .entry(payment.match_status.as_str().to_string())
                .or_insert(0) += 1;
            if payment.unapplied_amount > Decimal::ZERO {
                *unapplied_payment_amount.entry(payment.currency.to_string()).or_default() +=
                    payment.unapplied_amount;
            }
        }

        MatchExceptionReport {
            report_type: "match_exceptions".to_string(),
            customer_id,
            invoice_match_counts,
            payment_match_counts,
            unmatched_invoice_amount,
            unapplied_payment_amount,
            exceptions,
        }
    }

    /// Builds the settlement summary.
    #[must_use]
    pub fn build_settlement_summary(
        from: NaiveDate,
        to: NaiveDate,
        settlements: &[Settlement],
    ) -> SettlementSummaryReport {
        let mut status_counts = BTreeMap::new();
        let mut completed_net: BTreeMap<String, Decimal> = BTreeMap::new();
        let mut open_net: BTreeMap<String, Decimal> = BTreeMap::new();
        let mut awaiting_posting = 0;
        let mut failed = Vec::new();

        for settlement in settlements {
            *status_counts.entry(settlement.status.as_str().to_string()).or_insert(0) += 1;
            let net = settlement.totals.net_settlement;
            match settlement.status {
                SettlementStatus::Completed => {
                    *completed_net.entry(settlement.currency.to_string()).or_default() += net;
                    if settlement.posted_to_ledger_at.is_none() {
                        awaiting_posting += 1;
                    }
                }
                SettlementStatus::Cancelled => {}
                status => {
                    *open_net.entry(settlement.currency.to_string()).or_default() += net;
                    if status == SettlementStatus::Failed {
                        failed.push(FailedSettlement {
                            settlement_id: settlement.id,
                            number: settlement.number.clone(),
                            reason: settlement.failure_reason.clone(),
                        });
                    }
                }
            }
        }

        SettlementSummaryReport {
            report_type: "settlement_summary".to_string(),
            from,
            to,
            status_counts,
            completed_net,
            open_net,
            awaiting_posting,
            failed,
        }
    }
}
