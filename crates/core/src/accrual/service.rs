//! Accrual manager: calculates accruals from spend agreements, tracks them
//! against invoiced actuals and closes periods.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tally_shared::config::AccrualConfig;
use tally_shared::types::{AccrualId, CustomerId, OrganizationId, SpendAgreementId};
use tracing::{info, warn};

use super::calculation::{agreement_lines, calculate_amount, distribute_evenly};
use super::error::AccrualError;
use crate::batch::BatchReport;
use crate::documents::{
    Accrual, AccrualFilter, AccrualPeriod, AccrualStatus, DocumentError, DocumentKind,
    InvoiceFilter, InvoiceStatus, SpendAgreementFilter, SpendSource, document_number,
    variance_percent,
};
use crate::ports::{AuditEvent, AuditSink, KeyGuard, KeyedLocks, Stores, emit};
use crate::workflow::{Actor, ApprovalPolicy};

/// Stateless accrual service over injected stores.
pub struct AccrualManager {
    stores: Stores,
    audit: Arc<dyn AuditSink>,
    locks: KeyedLocks,
    policy: Arc<dyn ApprovalPolicy>,
    config: AccrualConfig,
}

impl AccrualManager {
    /// Creates an accrual manager.
    #[must_use]
    pub fn new(
        stores: Stores,
        audit: Arc<dyn AuditSink>,
        locks: KeyedLocks,
        policy: Arc<dyn ApprovalPolicy>,
        config: AccrualConfig,
    ) -> Self {
        Self {
            stores,
            audit,
            locks,
            policy,
            config,
        }
    }

    /// Calculates a draft accrual for an agreement and period and starts its
    /// approval chain.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if a live accrual already covers the
    /// agreement and period, `Configuration` for overlapping tiers and
    /// `Validation` if the agreement is not active in the period.
    pub async fn calculate_accrual(
        &self,
        organization_id: OrganizationId,
        agreement_id: SpendAgreementId,
        period: AccrualPeriod,
    ) -> Result<Accrual, AccrualError> {
        let agreement = self.stores.spend_agreements.get(organization_id, agreement_id).await?;
        if !agreement.covers(period.start_date(), period.end_date()) {
            return Err(AccrualError::Validation(format!(
                "Agreement {} is not active in {period}",
                agreement.number
            )));
        }

        let _guard = self.lock(organization_id, agreement.customer_id, period).await;

        let filter = AccrualFilter {
            period: Some(period),
            source_id: Some(agreement.id),
            ..AccrualFilter::default()
        };
        let existing = self.stores.accruals.find_all(organization_id, &filter).await?;
        if let Some(live) = existing
            .iter()
            .find(|a| a.reversal_of.is_none() && a.status != AccrualStatus::Reversed)
        {
            return Err(AccrualError::AlreadyExists {
                agreement: agreement.number.clone(),
                period,
                existing: live.number.clone(),
            });
        }

        let amount = calculate_amount(&agreement)?;
        let mut accrual = Accrual::new(
            organization_id,
            String::new(),
            period,
            agreement.kind.into(),
            agreement.customer_id,
            agreement.currency,
            agreement_lines(&agreement, amount),
            self.config.reconcile_threshold_percent,
        );
        accrual.number = document_number("ACR", accrual.id.into());
        accrual.source = Some(SpendSource {
            kind: agreement.kind,
            agreement: agreement.doc_ref(),
        });
        accrual
            .approval
            .start(self.policy.approval_chain("accrual", amount));

        let accrual = self.stores.accruals.save(accrual).await?;
        emit(
            self.audit.as_ref(),
            AuditEvent::new(organization_id, DocumentKind::Accrual, accrual.id, "calculated", None)
                .with_snapshots(None::<&Accrual>, &accrual),
        )
        .await;

        info!(
            accrual = %accrual.number,
            agreement = %agreement.number,
            period = %period,
            amount = %amount,
            "Accrual calculated"
        );
        Ok(accrual)
    }

    /// Calculates accruals for every active agreement covering the period.
    ///
    /// Agreements already accrued for the period are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error only if the agreement list cannot be loaded.
    pub async fn calculate_period_accruals(
        &self,
        organization_id: OrganizationId,
        period: AccrualPeriod,
    ) -> Result<BatchReport, AccrualError> {
        let filter = SpendAgreementFilter {
            active_only: true,
            ..SpendAgreementFilter::default()
        };
        let agreements = self.stores.spend_agreements.find_all(organization_id, &filter).await?;

        let mut report = BatchReport::new("accrue_period", organization_id);
        for agreement in agreements
            .iter()
            .filter(|a| a.covers(period.start_date(), period.end_date()))
        {
            match self.calculate_accrual(organization_id, agreement.id, period).await {
                Ok(accrual) => report.succeeded(
                    agreement.number.clone(),
                    format!("{} for {}", accrual.number, accrual.totals.total_accrual),
                ),
                Err(AccrualError::AlreadyExists { existing, .. }) => {
                    report.skipped(agreement.number.clone(), format!("already accrued by {existing}"));
                }
                Err(e) => report.failed(agreement.number.clone(), &e),
            }
        }
        Ok(report)
    }

    /// Approves the current step of a draft accrual's chain; the final
    /// step posts it.
    ///
    /// # Errors
    ///
    /// Returns an error unless the accrual is a draft, or if the actor
    /// cannot approve the current step.
    pub async fn approve(
        &self,
        organization_id: OrganizationId,
        accrual_id: AccrualId,
        actor: &Actor,
        comments: Option<String>,
    ) -> Result<Accrual, AccrualError> {
        let accrual = self.stores.accruals.get(organization_id, accrual_id).await?;
        let _guard = self.lock(organization_id, accrual.customer_id, accrual.period).await;
        let mut accrual = self.stores.accruals.get(organization_id, accrual_id).await?;

        if accrual.status != AccrualStatus::Draft {
            return Err(DocumentError::transition("accrual", accrual.status, AccrualStatus::Posted).into());
        }
        if !accrual.approval.is_started() {
            let chain = self
                .policy
                .approval_chain("accrual", accrual.totals.total_accrual);
            accrual.approval.start(chain);
        }

        let before = accrual.clone();
        let now = Utc::now();
        let complete = accrual
            .approval
            .approve(actor, accrual.totals.total_accrual, comments, now)?;
        if complete {
            accrual.post(now)?;
        }

        let accrual = self.stores.accruals.save(accrual).await?;
        let action = if complete { "posted" } else { "approval_step_completed" };
        emit(
            self.audit.as_ref(),
            AuditEvent::new(organization_id, DocumentKind::Accrual, accrual.id, action, Some(actor.id))
                .with_snapshots(Some(&before), &accrual),
        )
        .await;

        info!(accrual = %accrual.number, status = %accrual.status, "Accrual approval recorded");
        Ok(accrual)
    }

    /// Rejects a draft accrual. The chain restarts on the next approval.
    ///
    /// # Errors
    ///
    /// Returns an error unless the accrual is a draft, or if the reason is
    /// blank.
    pub async fn reject(
        &self,
        organization_id: OrganizationId,
        accrual_id: AccrualId,
        actor: &Actor,
        reason: &str,
    ) -> Result<Accrual, AccrualError> {
        let accrual = self.stores.accruals.get(organization_id, accrual_id).await?;
        let _guard = self.lock(organization_id, accrual.customer_id, accrual.period).await;
        let mut accrual = self.stores.accruals.get(organization_id, accrual_id).await?;

        if accrual.status != AccrualStatus::Draft {
            return Err(DocumentError::transition("accrual", accrual.status, "rejected").into());
        }
        let before = accrual.clone();
        accrual.approval.reject(actor, reason, Utc::now())?;

        let accrual = self.stores.accruals.save(accrual).await?;
        emit(
            self.audit.as_ref(),
            AuditEvent::new(organization_id, DocumentKind::Accrual, accrual.id, "rejected", Some(actor.id))
                .with_snapshots(Some(&before), &accrual),
        )
        .await;
        Ok(accrual)
    }

    /// Records a signed manual adjustment against the first line.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for a zero amount or blank reason, and a
    /// transition error once the accrual is reconciled, closed or reversed.
    pub async fn adjust(
        &self,
        organization_id: OrganizationId,
        accrual_id: AccrualId,
        amount: Decimal,
        reason: &str,
        actor: &Actor,
    ) -> Result<Accrual, AccrualError> {
        if amount.is_zero() {
            return Err(AccrualError::Validation("Adjustment amount must not be zero".to_string()));
        }
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(AccrualError::Validation("Adjustment reason is required".to_string()));
        }

        let accrual = self.stores.accruals.get(organization_id, accrual_id).await?;
        let _guard = self.lock(organization_id, accrual.customer_id, accrual.period).await;
        let mut accrual = self.stores.accruals.get(organization_id, accrual_id).await?;

        let before = accrual.clone();
        accrual.adjust(amount, reason, Some(actor.id), Utc::now())?;

        let accrual = self.stores.accruals.save(accrual).await?;
        emit(
            self.audit.as_ref(),
            AuditEvent::new(organization_id, DocumentKind::Accrual, accrual.id, "adjusted", Some(actor.id))
                .with_snapshots(Some(&before), &accrual),
        )
        .await;

        info!(accrual = %accrual.number, amount = %amount, "Accrual adjusted");
        Ok(accrual)
    }

    /// Refreshes actuals of every tracked accrual of the period from the
    /// customer's billed invoices.
    ///
    /// An invoice counts toward an accrual when it is for the same customer
    /// and currency, is dated in the period, and references the accrual's
    /// agreement. An invoice without a spend reference counts only when the
    /// accrual is the customer's single live accrual of the period;
    /// otherwise it is reported for review and counted nowhere. The sum is
    /// spread evenly over the lines.
    ///
    /// # Errors
    ///
    /// Returns an error only if the accrual list cannot be loaded.
    pub async fn update_actuals_with_period_invoices(
        &self,
        organization_id: OrganizationId,
        period: AccrualPeriod,
    ) -> Result<BatchReport, AccrualError> {
        let filter = AccrualFilter {
            period: Some(period),
            statuses: AccrualStatus::TRACKED.to_vec(),
            ..AccrualFilter::default()
        };
        let accruals = self.stores.accruals.find_all(organization_id, &filter).await?;

        let mut report = BatchReport::new("update_actuals", organization_id);
        let mut unattributed = BTreeSet::new();
        for accrual in accruals.into_iter().filter(|a| a.reversal_of.is_none()) {
            let number = accrual.number.clone();
            match self.refresh_actuals(organization_id, accrual.id).await {
                Ok((updated, skipped)) => {
                    unattributed.extend(skipped);
                    if updated.needs_review {
                        report.needs_review(
                            number,
                            format!(
                                "variance {}% exceeds {}%",
                                updated.totals.variance_percent, self.config.review_threshold_percent
                            ),
                        );
                    } else {
                        report.succeeded(
                            number,
                            format!("{} at {}%", updated.status, updated.totals.variance_percent),
                        );
                    }
                }
                Err(e) => report.failed(number, &e),
            }
        }
        for invoice in unattributed {
            warn!(invoice = %invoice, "Invoice without spend reference matches several accruals");
            report.needs_review(invoice, "no spend reference and several live accruals for the customer");
        }

        info!(
            organization_id = %organization_id,
            period = %period,
            succeeded = report.succeeded.len(),
            needs_review = report.needs_review.len(),
            failed = report.failed.len(),
            "Accrual actuals updated"
        );
        Ok(report)
    }

    /// Closes a period: refreshes actuals, then closes every accrual
    /// within tolerance and flags the rest for review.
    ///
    /// Nothing is force-closed.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid month or if the accrual list cannot
    /// be loaded.
    pub async fn close_period(
        &self,
        organization_id: OrganizationId,
        year: i32,
        month: u32,
    ) -> Result<BatchReport, AccrualError> {
        let period = AccrualPeriod::new(year, month)?;
        let update = self
            .update_actuals_with_period_invoices(organization_id, period)
            .await?;

        let mut report = BatchReport::new("close_period", organization_id);
        report.failed.extend(update.failed);

        let filter = AccrualFilter {
            period: Some(period),
            ..AccrualFilter::default()
        };
        let accruals = self.stores.accruals.find_all(organization_id, &filter).await?;
        for accrual in accruals {
            let number = accrual.number.clone();
            if accrual.reversal_of.is_some() {
                report.skipped(number, "reversal_entry");
                continue;
            }
            if matches!(accrual.status, AccrualStatus::Closed | AccrualStatus::Reversed) {
                report.skipped(number, accrual.status.as_str());
                continue;
            }
            match self.close_accrual(organization_id, accrual.id).await {
                Ok(closed) if closed.status == AccrualStatus::Closed => report.succeeded(number, "closed"),
                Ok(flagged) => report.needs_review(
                    number,
                    format!("{} at {}%", flagged.status, flagged.totals.variance_percent),
                ),
                Err(e) => report.failed(number, &e),
            }
        }

        info!(
            organization_id = %organization_id,
            period = %period,
            closed = report.succeeded.len(),
            needs_review = report.needs_review.len(),
            failed = report.failed.len(),
            "Accrual period close finished"
        );
        Ok(report)
    }

    /// Reverses an accrual with a posted, sign-flipped accrual and marks
    /// the original reversed.
    ///
    /// The reversing entry is saved first. Re-running after an interruption
    /// finds it and only completes the original, so a second reversal is
    /// never created.
    ///
    /// # Errors
    ///
    /// Returns a transition error for draft or closed accruals.
    pub async fn reverse_accrual(
        &self,
        organization_id: OrganizationId,
        accrual_id: AccrualId,
        actor: &Actor,
    ) -> Result<Accrual, AccrualError> {
        let accrual = self.stores.accruals.get(organization_id, accrual_id).await?;
        let _guard = self.lock(organization_id, accrual.customer_id, accrual.period).await;
        let mut original = self.stores.accruals.get(organization_id, accrual_id).await?;

        let filter = AccrualFilter {
            customer_id: Some(original.customer_id),
            reversal_of: Some(original.id),
            ..AccrualFilter::default()
        };
        let existing = self
            .stores
            .accruals
            .find_all(organization_id, &filter)
            .await?
            .into_iter()
            .next();

        let reversal = match existing {
            Some(reversal) => {
                if original.status == AccrualStatus::Reversed {
                    return Ok(reversal);
                }
                warn!(
                    accrual = %original.number,
                    reversal = %reversal.number,
                    "Completing interrupted accrual reversal"
                );
                reversal
            }
            None => {
                if !original.is_reversible() {
                    return Err(
                        DocumentError::transition("accrual", original.status, AccrualStatus::Reversed).into(),
                    );
                }
                let reversal = self
                    .stores
                    .accruals
                    .save(original.reversing_entry(Utc::now()))
                    .await?;
                emit(
                    self.audit.as_ref(),
                    AuditEvent::new(
                        organization_id,
                        DocumentKind::Accrual,
                        reversal.id,
                        "created_as_reversal",
                        Some(actor.id),
                    )
                    .with_snapshots(None::<&Accrual>, &reversal),
                )
                .await;
                reversal
            }
        };

        let before = original.clone();
        original.mark_reversed(reversal.doc_ref())?;
        let original = self.stores.accruals.save(original).await?;
        emit(
            self.audit.as_ref(),
            AuditEvent::new(organization_id, DocumentKind::Accrual, original.id, "reversed", Some(actor.id))
                .with_snapshots(Some(&before), &original),
        )
        .await;

        info!(accrual = %original.number, reversal = %reversal.number, "Accrual reversed");
        Ok(reversal)
    }

    async fn lock(
        &self,
        organization_id: OrganizationId,
        customer_id: CustomerId,
        period: AccrualPeriod,
    ) -> KeyGuard {
        self.locks
            .lock(KeyedLocks::customer_period_key(organization_id, customer_id, period))
            .await
    }

    /// Returns the refreshed accrual and the numbers of unlinked invoices
    /// that were left out because the customer has several live accruals.
    async fn refresh_actuals(
        &self,
        organization_id: OrganizationId,
        accrual_id: AccrualId,
    ) -> Result<(Accrual, Vec<String>), AccrualError> {
        let accrual = self.stores.accruals.get(organization_id, accrual_id).await?;
        let _guard = self.lock(organization_id, accrual.customer_id, accrual.period).await;
        let mut accrual = self.stores.accruals.get(organization_id, accrual_id).await?;
        if !AccrualStatus::TRACKED.contains(&accrual.status) {
            return Ok((accrual, Vec::new()));
        }

        let live = AccrualFilter {
            customer_id: Some(accrual.customer_id),
            period: Some(accrual.period),
            statuses: AccrualStatus::TRACKED.to_vec(),
            ..AccrualFilter::default()
        };
        let sole_live_accrual = self
            .stores
            .accruals
            .find_all(organization_id, &live)
            .await?
            .iter()
            .filter(|a| a.reversal_of.is_none() && a.currency == accrual.currency)
            .all(|a| a.id == accrual.id);

        let filter = InvoiceFilter {
            customer_id: Some(accrual.customer_id),
            statuses: InvoiceStatus::BILLED.to_vec(),
            date_from: Some(accrual.period.start_date()),
            date_to: Some(accrual.period.end_date()),
            ..InvoiceFilter::default()
        };
        let agreement_id = accrual.source.as_ref().map(|s| s.agreement.id);
        let mut actual = Decimal::ZERO;
        let mut unattributed = Vec::new();
        for invoice in self.stores.invoices.find_all(organization_id, &filter).await? {
            if invoice.currency != accrual.currency {
                continue;
            }
            match &invoice.spend_reference {
                Some(reference) if Some(reference.id) == agreement_id => actual += invoice.totals.total,
                Some(_) => {}
                None if sole_live_accrual => actual += invoice.totals.total,
                None => unattributed.push(invoice.number),
            }
        }

        let before = accrual.clone();
        let shares = distribute_evenly(actual, accrual.lines.len(), accrual.currency);
        for (line, share) in accrual.lines.iter_mut().zip(shares) {
            line.actual_amount = share;
        }
        let variance = variance_percent(accrual.totals.total_accrual, actual).abs();
        accrual.needs_review = variance >= accrual.reconcile_threshold_percent
            && variance > self.config.review_threshold_percent;
        accrual.actuals_updated_at = Some(Utc::now());

        let accrual = self.stores.accruals.save(accrual).await?;
        emit(
            self.audit.as_ref(),
            AuditEvent::new(organization_id, DocumentKind::Accrual, accrual.id, "actuals_updated", None)
                .with_snapshots(Some(&before), &accrual),
        )
        .await;
        Ok((accrual, unattributed))
    }

    async fn close_accrual(
        &self,
        organization_id: OrganizationId,
        accrual_id: AccrualId,
    ) -> Result<Accrual, AccrualError> {
        let accrual = self.stores.accruals.get(organization_id, accrual_id).await?;
        let _guard = self.lock(organization_id, accrual.customer_id, accrual.period).await;
        let mut accrual = self.stores.accruals.get(organization_id, accrual_id).await?;

        let before = accrual.clone();
        if matches!(accrual.status, AccrualStatus::Posted | AccrualStatus::Adjusted) && accrual.within_tolerance() {
            accrual.status = AccrualStatus::Reconciled;
        }
        let action = if accrual.status == AccrualStatus::Reconciled {
            accrual.close(Utc::now())?;
            "closed"
        } else {
            accrual.needs_review = true;
            "flagged_for_review"
        };

        let accrual = self.stores.accruals.save(accrual).await?;
        emit(
            self.audit.as_ref(),
            AuditEvent::new(organization_id, DocumentKind::Accrual, accrual.id, action, None)
                .with_snapshots(Some(&before), &accrual),
        )
        .await;
        Ok(accrual)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tally_shared::types::{Currency, ProductId};

    use crate::documents::{CalculationMethod, DocRef, SpendAgreement, SpendKind};
    use crate::test_support::{Fixture, admin, approver, days_from_today, today};
    use crate::workflow::RuleBasedApprovalPolicy;

    fn manager(fx: &Fixture) -> AccrualManager {
        AccrualManager::new(
            fx.stores.clone(),
            fx.audit.clone(),
            fx.locks.clone(),
            Arc::new(RuleBasedApprovalPolicy::default()),
            AccrualConfig::default(),
        )
    }

    fn period() -> AccrualPeriod {
        AccrualPeriod::containing(today())
    }

    async fn fixed_agreement(fx: &Fixture, amount: Decimal) -> SpendAgreement {
        let agreement = SpendAgreement {
            id: SpendAgreementId::new(),
            organization_id: fx.org,
            number: "TS-2026-01".into(),
            name: "Endcap program".into(),
            kind: SpendKind::TradeSpend,
            customer_id: fx.customer,
            currency: Currency::Usd,
            calculation_method: CalculationMethod::FixedAmount,
            base_amount: Decimal::ZERO,
            percentage: Decimal::ZERO,
            fixed_amount: amount,
            volume: Decimal::ZERO,
            rate_per_unit: Decimal::ZERO,
            tiers: Vec::new(),
            gl_account: "6100".into(),
            cost_center: None,
            start_date: days_from_today(-60),
            end_date: days_from_today(60),
            active: true,
        };
        fx.stores.spend_agreements.save(agreement).await.unwrap()
    }

    async fn posted_accrual(fx: &Fixture, manager: &AccrualManager, amount: Decimal) -> Accrual {
        let agreement = fixed_agreement(fx, amount).await;
        let accrual = manager
            .calculate_accrual(fx.org, agreement.id, period())
            .await
            .unwrap();
        manager
            .approve(fx.org, accrual.id, &approver(), None)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_calculate_creates_draft_with_chain() {
        let fx = Fixture::new();
        let manager = manager(&fx);
        let agreement = fixed_agreement(&fx, dec!(1000)).await;

        let accrual = manager
            .calculate_accrual(fx.org, agreement.id, period())
            .await
            .unwrap();

        assert_eq!(accrual.status, AccrualStatus::Draft);
        assert_eq!(accrual.totals.total_accrual, dec!(1000));
        assert!(accrual.number.starts_with("ACR-"));
        assert!(accrual.approval.is_started());
        assert_eq!(
            accrual.source.as_ref().map(|s| s.agreement.id),
            Some(agreement.id)
        );
        assert_eq!(fx.audit.actions_for(accrual.id).await, vec!["calculated"]);
    }

    #[tokio::test]
    async fn test_calculate_twice_for_same_period_is_rejected() {
        let fx = Fixture::new();
        let manager = manager(&fx);
        let agreement = fixed_agreement(&fx, dec!(1000)).await;
        manager
            .calculate_accrual(fx.org, agreement.id, period())
            .await
            .unwrap();

        let err = manager
            .calculate_accrual(fx.org, agreement.id, period())
            .await
            .unwrap_err();
        assert!(matches!(err, AccrualError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_agreement_outside_period_is_rejected() {
        let fx = Fixture::new();
        let manager = manager(&fx);
        let agreement = fixed_agreement(&fx, dec!(1000)).await;
        let later = AccrualPeriod::containing(days_from_today(400));

        let err = manager
            .calculate_accrual(fx.org, agreement.id, later)
            .await
            .unwrap_err();
        assert!(matches!(err, AccrualError::Validation(_)));
    }

    #[tokio::test]
    async fn test_approval_posts_draft() {
        let fx = Fixture::new();
        let manager = manager(&fx);
        let accrual = posted_accrual(&fx, &manager, dec!(1000)).await;

        assert_eq!(accrual.status, AccrualStatus::Posted);
        assert!(accrual.posted_at.is_some());

        let err = manager
            .approve(fx.org, accrual.id, &admin(), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AccrualError::Document(DocumentError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_reject_requires_reason() {
        let fx = Fixture::new();
        let manager = manager(&fx);
        let agreement = fixed_agreement(&fx, dec!(1000)).await;
        let accrual = manager
            .calculate_accrual(fx.org, agreement.id, period())
            .await
            .unwrap();

        let err = manager
            .reject(fx.org, accrual.id, &approver(), "  ")
            .await
            .unwrap_err();
        assert!(matches!(err, AccrualError::Approval(_)));

        let rejected = manager
            .reject(fx.org, accrual.id, &approver(), "rate is wrong")
            .await
            .unwrap();
        assert_eq!(rejected.status, AccrualStatus::Draft);
        assert_eq!(rejected.approval.history.len(), 1);
    }

    #[tokio::test]
    async fn test_actuals_within_threshold_reconcile() {
        let fx = Fixture::new();
        let manager = manager(&fx);
        let accrual = posted_accrual(&fx, &manager, dec!(1000)).await;
        fx.approved_invoice("INV-1", &[(ProductId::new(), dec!(1), dec!(1040))])
            .await;

        let report = manager
            .update_actuals_with_period_invoices(fx.org, period())
            .await
            .unwrap();

        let accrual = fx.stores.accruals.get(fx.org, accrual.id).await.unwrap();
        assert_eq!(accrual.totals.total_actual, dec!(1040));
        assert_eq!(accrual.totals.variance_percent, dec!(4.00));
        assert_eq!(accrual.status, AccrualStatus::Reconciled);
        assert!(!accrual.needs_review);
        assert_eq!(report.succeeded.len(), 1);
    }

    #[tokio::test]
    async fn test_actuals_between_thresholds_stay_posted() {
        let fx = Fixture::new();
        let manager = manager(&fx);
        let accrual = posted_accrual(&fx, &manager, dec!(1000)).await;
        fx.approved_invoice("INV-1", &[(ProductId::new(), dec!(1), dec!(1070))])
            .await;

        manager
            .update_actuals_with_period_invoices(fx.org, period())
            .await
            .unwrap();

        let accrual = fx.stores.accruals.get(fx.org, accrual.id).await.unwrap();
        assert_eq!(accrual.status, AccrualStatus::Posted);
        assert!(!accrual.needs_review);
    }

    #[tokio::test]
    async fn test_actuals_beyond_review_threshold_flag_review() {
        let fx = Fixture::new();
        let manager = manager(&fx);
        let accrual = posted_accrual(&fx, &manager, dec!(1000)).await;
        fx.approved_invoice("INV-1", &[(ProductId::new(), dec!(1), dec!(1200))])
            .await;

        let report = manager
            .update_actuals_with_period_invoices(fx.org, period())
            .await
            .unwrap();

        let accrual = fx.stores.accruals.get(fx.org, accrual.id).await.unwrap();
        assert_eq!(accrual.status, AccrualStatus::Posted);
        assert!(accrual.needs_review);
        assert_eq!(report.needs_review.len(), 1);
    }

    #[tokio::test]
    async fn test_invoices_for_other_agreements_are_ignored() {
        let fx = Fixture::new();
        let manager = manager(&fx);
        let accrual = posted_accrual(&fx, &manager, dec!(1000)).await;
        let mut invoice = fx
            .approved_invoice("INV-1", &[(ProductId::new(), dec!(1), dec!(5000))])
            .await;
        invoice.spend_reference = Some(DocRef::new(SpendAgreementId::new(), "TS-OTHER"));
        fx.stores.invoices.save(invoice).await.unwrap();
        fx.approved_invoice("INV-2", &[(ProductId::new(), dec!(1), dec!(990))])
            .await;

        manager
            .update_actuals_with_period_invoices(fx.org, period())
            .await
            .unwrap();

        let accrual = fx.stores.accruals.get(fx.org, accrual.id).await.unwrap();
        assert_eq!(accrual.totals.total_actual, dec!(990));
    }

    #[tokio::test]
    async fn test_unlinked_invoice_is_not_shared_between_accruals() {
        let fx = Fixture::new();
        let manager = manager(&fx);
        let trade_spend = posted_accrual(&fx, &manager, dec!(1000)).await;
        let mut promotion = fixed_agreement(&fx, dec!(1000)).await;
        promotion.id = SpendAgreementId::new();
        promotion.number = "PR-2026-01".into();
        promotion.kind = SpendKind::Promotion;
        let promotion = fx.stores.spend_agreements.save(promotion).await.unwrap();
        let promotion = manager
            .calculate_accrual(fx.org, promotion.id, period())
            .await
            .unwrap();
        let promotion = manager
            .approve(fx.org, promotion.id, &approver(), None)
            .await
            .unwrap();
        fx.approved_invoice("INV-1", &[(ProductId::new(), dec!(1), dec!(1000))])
            .await;

        let report = manager
            .update_actuals_with_period_invoices(fx.org, period())
            .await
            .unwrap();

        for id in [trade_spend.id, promotion.id] {
            let accrual = fx.stores.accruals.get(fx.org, id).await.unwrap();
            assert_eq!(accrual.totals.total_actual, Decimal::ZERO);
            assert_ne!(accrual.status, AccrualStatus::Reconciled);
        }
        assert!(report.needs_review.iter().any(|item| item.reference == "INV-1"));
    }

    #[tokio::test]
    async fn test_linked_invoices_follow_their_agreement() {
        let fx = Fixture::new();
        let manager = manager(&fx);
        let trade_spend = posted_accrual(&fx, &manager, dec!(1000)).await;
        let mut promotion = fixed_agreement(&fx, dec!(400)).await;
        promotion.id = SpendAgreementId::new();
        promotion.number = "PR-2026-01".into();
        promotion.kind = SpendKind::Promotion;
        let promotion = fx.stores.spend_agreements.save(promotion).await.unwrap();
        let promotion_accrual = manager
            .calculate_accrual(fx.org, promotion.id, period())
            .await
            .unwrap();
        let mut invoice = fx
            .approved_invoice("INV-1", &[(ProductId::new(), dec!(1), dec!(400))])
            .await;
        invoice.spend_reference = Some(DocRef::new(promotion.id, promotion.number.clone()));
        fx.stores.invoices.save(invoice).await.unwrap();

        manager
            .update_actuals_with_period_invoices(fx.org, period())
            .await
            .unwrap();

        let trade_spend = fx.stores.accruals.get(fx.org, trade_spend.id).await.unwrap();
        let promotion_accrual = fx.stores.accruals.get(fx.org, promotion_accrual.id).await.unwrap();
        assert_eq!(trade_spend.totals.total_actual, Decimal::ZERO);
        assert_eq!(promotion_accrual.totals.total_actual, dec!(400));
    }

    #[tokio::test]
    async fn test_close_period_closes_reconciled_and_flags_rest() {
        let fx = Fixture::new();
        let manager = manager(&fx);
        let reconciled = posted_accrual(&fx, &manager, dec!(1000)).await;
        fx.approved_invoice("INV-1", &[(ProductId::new(), dec!(1), dec!(1000))])
            .await;

        let other = Fixture {
            org: fx.org,
            customer: CustomerId::new(),
            ..Fixture::with_stores(fx.stores.clone())
        };
        let drifting = posted_accrual(&other, &manager, dec!(1000)).await;

        let report = manager
            .close_period(fx.org, period().year, period().month)
            .await
            .unwrap();

        let reconciled = fx.stores.accruals.get(fx.org, reconciled.id).await.unwrap();
        let drifting = fx.stores.accruals.get(fx.org, drifting.id).await.unwrap();
        assert_eq!(reconciled.status, AccrualStatus::Closed);
        assert!(reconciled.closed_at.is_some());
        assert_eq!(drifting.status, AccrualStatus::Posted);
        assert!(drifting.needs_review);
        assert_eq!(report.succeeded.len(), 1);
        assert_eq!(report.needs_review.len(), 1);
    }

    #[tokio::test]
    async fn test_close_period_rejects_invalid_month() {
        let fx = Fixture::new();
        let err = manager(&fx).close_period(fx.org, 2026, 13).await.unwrap_err();
        assert!(matches!(err, AccrualError::Document(DocumentError::Validation(_))));
    }

    #[tokio::test]
    async fn test_reverse_creates_posted_mirror() {
        let fx = Fixture::new();
        let manager = manager(&fx);
        let accrual = posted_accrual(&fx, &manager, dec!(1000)).await;

        let reversal = manager
            .reverse_accrual(fx.org, accrual.id, &admin())
            .await
            .unwrap();

        assert_eq!(reversal.status, AccrualStatus::Posted);
        assert_eq!(reversal.totals.total_accrual, dec!(-1000));
        let original = fx.stores.accruals.get(fx.org, accrual.id).await.unwrap();
        assert_eq!(original.status, AccrualStatus::Reversed);
        assert_eq!(original.reversed_by.as_ref().map(|r| r.id), Some(reversal.id));
    }

    #[tokio::test]
    async fn test_interrupted_reversal_converges() {
        let fx = Fixture::new();
        let manager = manager(&fx);
        let accrual = posted_accrual(&fx, &manager, dec!(1000)).await;
        // The reversing entry was saved but the original was never marked.
        let orphan = fx
            .stores
            .accruals
            .save(accrual.reversing_entry(Utc::now()))
            .await
            .unwrap();

        let reversal = manager
            .reverse_accrual(fx.org, accrual.id, &admin())
            .await
            .unwrap();
        let again = manager
            .reverse_accrual(fx.org, accrual.id, &admin())
            .await
            .unwrap();

        assert_eq!(reversal.id, orphan.id);
        assert_eq!(again.id, orphan.id);
        let filter = AccrualFilter {
            reversal_of: Some(accrual.id),
            ..AccrualFilter::default()
        };
        assert_eq!(fx.stores.accruals.count(fx.org, &filter).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_draft_cannot_be_reversed() {
        let fx = Fixture::new();
        let manager = manager(&fx);
        let agreement = fixed_agreement(&fx, dec!(1000)).await;
        let accrual = manager
            .calculate_accrual(fx.org, agreement.id, period())
            .await
            .unwrap();

        let err = manager
            .reverse_accrual(fx.org, accrual.id, &admin())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AccrualError::Document(DocumentError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_adjust_validates_input() {
        let fx = Fixture::new();
        let manager = manager(&fx);
        let accrual = posted_accrual(&fx, &manager, dec!(1000)).await;

        assert!(matches!(
            manager.adjust(fx.org, accrual.id, dec!(0), "x", &admin()).await,
            Err(AccrualError::Validation(_))
        ));
        assert!(matches!(
            manager.adjust(fx.org, accrual.id, dec!(25), " ", &admin()).await,
            Err(AccrualError::Validation(_))
        ));

        let adjusted = manager
            .adjust(fx.org, accrual.id, dec!(25), "late rebate", &admin())
            .await
            .unwrap();
        assert_eq!(adjusted.status, AccrualStatus::Adjusted);
        assert_eq!(adjusted.totals.total_accrual, dec!(1025));
    }

    #[tokio::test]
    async fn test_period_batch_skips_accrued_agreements() {
        let fx = Fixture::new();
        let manager = manager(&fx);
        let agreement = fixed_agreement(&fx, dec!(500)).await;

        let first = manager.calculate_period_accruals(fx.org, period()).await.unwrap();
        let second = manager.calculate_period_accruals(fx.org, period()).await.unwrap();

        assert_eq!(first.succeeded.len(), 1);
        assert_eq!(second.skipped.len(), 1);
        assert_eq!(second.skipped[0].reference, agreement.number);
    }
}
