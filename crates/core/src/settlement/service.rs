//! Settlement engine: snapshots a customer's open documents into a
//! settlement, walks it through approval and processing, and hands the
//! balanced journal to the general ledger.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use tally_shared::config::SettlementConfig;
use tally_shared::types::{Currency, CustomerId, DeductionId, InvoiceId, OrganizationId, PaymentId, SettlementId};
use tracing::{info, warn};
use uuid::Uuid;

use super::error::SettlementError;
use super::posting::{GlPosting, build_posting};
use crate::batch::BatchReport;
use crate::documents::{
    BankReconciliation, DeductionFilter, DeductionStatus, DocumentError, DocumentKind, InvoiceFilter,
    InvoiceStatus, PaymentFilter, PaymentStatus, Settlement, SettlementFilter, SettlementItem,
    SettlementItemType, SettlementPeriod, SettlementStamp, SettlementStatus, document_number,
};
use crate::ports::{AuditEvent, AuditSink, GlGateway, KeyGuard, KeyedLocks, Stores, emit};
use crate::workflow::{Actor, ApprovalPolicy};

/// Stateless settlement service over injected stores.
pub struct SettlementEngine {
    stores: Stores,
    audit: Arc<dyn AuditSink>,
    locks: KeyedLocks,
    policy: Arc<dyn ApprovalPolicy>,
    gateway: Arc<dyn GlGateway>,
    config: SettlementConfig,
}

impl SettlementEngine {
    /// Creates a settlement engine.
    #[must_use]
    pub fn new(
        stores: Stores,
        audit: Arc<dyn AuditSink>,
        locks: KeyedLocks,
        policy: Arc<dyn ApprovalPolicy>,
        gateway: Arc<dyn GlGateway>,
        config: SettlementConfig,
    ) -> Self {
        Self {
            stores,
            audit,
            locks,
            policy,
            gateway,
            config,
        }
    }

    /// Snapshots the customer's settleable invoices, cleared payments and
    /// approved deductions dated in the window into a draft settlement.
    ///
    /// Documents already settled, or held by another open settlement, are
    /// left out.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for an inverted window and `NoItems` when
    /// nothing qualifies.
    pub async fn create_settlement(
        &self,
        organization_id: OrganizationId,
        customer_id: CustomerId,
        period_start: NaiveDate,
        period_end: NaiveDate,
        currency: Currency,
    ) -> Result<Settlement, SettlementError> {
        if period_start > period_end {
            return Err(SettlementError::Validation(format!(
                "Settlement period starts {period_start} after it ends {period_end}"
            )));
        }
        let _guard = self.lock(organization_id, customer_id).await;

        let held: HashSet<Uuid> = self
            .stores
            .settlements
            .find_all(
                organization_id,
                &SettlementFilter {
                    customer_id: Some(customer_id),
                    statuses: SettlementStatus::OPEN.to_vec(),
                },
            )
            .await?
            .iter()
            .flat_map(|s| s.items.iter().map(|i| i.reference_id))
            .collect();

        let mut items = Vec::new();

        let invoice_filter = InvoiceFilter {
            customer_id: Some(customer_id),
            statuses: InvoiceStatus::SETTLEABLE.to_vec(),
            date_from: Some(period_start),
            date_to: Some(period_end),
            unsettled_only: true,
            ..InvoiceFilter::default()
        };
        for invoice in self.stores.invoices.find_all(organization_id, &invoice_filter).await? {
            if invoice.currency == currency && !held.contains(&invoice.id.into_inner()) {
                items.push(SettlementItem::new(
                    SettlementItemType::Invoice,
                    invoice.id.into(),
                    invoice.number,
                    invoice.totals.total,
                ));
            }
        }

        let payment_filter = PaymentFilter {
            customer_id: Some(customer_id),
            statuses: vec![PaymentStatus::Cleared],
            date_from: Some(period_start),
            date_to: Some(period_end),
            unsettled_only: true,
            ..PaymentFilter::default()
        };
        for payment in self.stores.payments.find_all(organization_id, &payment_filter).await? {
            if payment.currency == currency && !held.contains(&payment.id.into_inner()) {
                items.push(SettlementItem::new(
                    SettlementItemType::Payment,
                    payment.id.into(),
                    payment.number,
                    payment.amount,
                ));
            }
        }

        let deduction_filter = DeductionFilter {
            customer_id: Some(customer_id),
            statuses: vec![DeductionStatus::Approved],
            date_from: Some(period_start),
            date_to: Some(period_end),
        };
        for deduction in self.stores.deductions.find_all(organization_id, &deduction_filter).await? {
            if deduction.currency == currency
                && deduction.settlement.is_none()
                && !held.contains(&deduction.id.into_inner())
            {
                items.push(SettlementItem::new(
                    SettlementItemType::Deduction,
                    deduction.id.into(),
                    deduction.number,
                    deduction.amount,
                ));
            }
        }

        if items.is_empty() {
            return Err(SettlementError::NoItems {
                start: period_start,
                end: period_end,
            });
        }

        let mut settlement = Settlement::new(
            organization_id,
            String::new(),
            customer_id,
            period_end,
            SettlementPeriod {
                start: period_start,
                end: period_end,
            },
            currency,
            items,
        );
        settlement.number = document_number("STL", settlement.id.into());

        let settlement = self.stores.settlements.save(settlement).await?;
        emit(
            self.audit.as_ref(),
            AuditEvent::new(organization_id, DocumentKind::Settlement, settlement.id, "created", None)
                .with_snapshots(None::<&Settlement>, &settlement),
        )
        .await;

        info!(
            settlement = %settlement.number,
            customer_id = %customer_id,
            items = settlement.item_count,
            net = %settlement.totals.net_settlement,
            "Settlement created"
        );
        Ok(settlement)
    }

    /// Creates one settlement per customer with settleable documents in
    /// the window.
    ///
    /// A customer whose documents are all held by open settlements is
    /// skipped; any other error is recorded and the sweep continues.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for an inverted window, or an error if the
    /// candidate documents cannot be loaded.
    pub async fn create_period_settlements(
        &self,
        organization_id: OrganizationId,
        period_start: NaiveDate,
        period_end: NaiveDate,
        currency: Currency,
    ) -> Result<BatchReport, SettlementError> {
        if period_start > period_end {
            return Err(SettlementError::Validation(format!(
                "Settlement period starts {period_start} after it ends {period_end}"
            )));
        }

        let mut customers = BTreeSet::new();
        let invoice_filter = InvoiceFilter {
            statuses: InvoiceStatus::SETTLEABLE.to_vec(),
            date_from: Some(period_start),
            date_to: Some(period_end),
            unsettled_only: true,
            ..InvoiceFilter::default()
        };
        customers.extend(
            self.stores
                .invoices
                .find_all(organization_id, &invoice_filter)
                .await?
                .iter()
                .filter(|i| i.currency == currency)
                .map(|i| i.customer_id),
        );
        let payment_filter = PaymentFilter {
            statuses: vec![PaymentStatus::Cleared],
            date_from: Some(period_start),
            date_to: Some(period_end),
            unsettled_only: true,
            ..PaymentFilter::default()
        };
        customers.extend(
            self.stores
                .payments
                .find_all(organization_id, &payment_filter)
                .await?
                .iter()
                .filter(|p| p.currency == currency)
                .map(|p| p.customer_id),
        );
        let deduction_filter = DeductionFilter {
            customer_id: None,
            statuses: vec![DeductionStatus::Approved],
            date_from: Some(period_start),
            date_to: Some(period_end),
        };
        customers.extend(
            self.stores
                .deductions
                .find_all(organization_id, &deduction_filter)
                .await?
                .iter()
                .filter(|d| d.currency == currency && d.settlement.is_none())
                .map(|d| d.customer_id),
        );

        let mut report = BatchReport::new("create_settlements", organization_id);
        for customer_id in customers {
            match self
                .create_settlement(organization_id, customer_id, period_start, period_end, currency)
                .await
            {
                Ok(settlement) => report.succeeded(
                    settlement.number,
                    format!(
                        "customer {customer_id}: {} items, net {}",
                        settlement.item_count, settlement.totals.net_settlement
                    ),
                ),
                Err(SettlementError::NoItems { .. }) => {
                    report.skipped(customer_id.to_string(), "held_by_open_settlement");
                }
                Err(e) => report.failed(customer_id.to_string(), &e),
            }
        }

        info!(
            organization_id = %organization_id,
            created = report.succeeded.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "Period settlements created"
        );
        Ok(report)
    }

    /// Adds a signed manual adjustment to a draft settlement.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for a zero amount or blank description and a
    /// transition error unless the settlement is a draft.
    pub async fn add_adjustment(
        &self,
        organization_id: OrganizationId,
        settlement_id: SettlementId,
        amount: Decimal,
        description: &str,
        actor: &Actor,
    ) -> Result<Settlement, SettlementError> {
        let description = description.trim();
        if amount.is_zero() || description.is_empty() {
            return Err(SettlementError::Validation(
                "Adjustment needs a non-zero amount and a description".to_string(),
            ));
        }

        let (_guard, mut settlement) = self.load_locked(organization_id, settlement_id).await?;
        if settlement.status != SettlementStatus::Draft {
            return Err(DocumentError::transition("settlement", settlement.status, "adjusted").into());
        }

        let before = settlement.clone();
        let reference = Uuid::now_v7();
        let mut item = SettlementItem::new(
            SettlementItemType::Adjustment,
            reference,
            document_number("ADJ", reference),
            amount,
        );
        item.description = Some(description.to_string());
        settlement.items.push(item);

        self.save_with_audit(settlement, &before, "adjustment_added", Some(actor))
            .await
    }

    /// Submits a draft for approval with a chain sized by the absolute net.
    ///
    /// # Errors
    ///
    /// Returns a transition error unless the settlement is a draft.
    pub async fn submit(
        &self,
        organization_id: OrganizationId,
        settlement_id: SettlementId,
        actor: &Actor,
    ) -> Result<Settlement, SettlementError> {
        let (_guard, mut settlement) = self.load_locked(organization_id, settlement_id).await?;
        let before = settlement.clone();
        settlement.transition(&[SettlementStatus::Draft], SettlementStatus::PendingApproval)?;
        let chain = self
            .policy
            .approval_chain("settlement", settlement.totals.net_settlement.abs());
        settlement.approval.start(chain);

        self.save_with_audit(settlement, &before, "submitted", Some(actor))
            .await
    }

    /// Approves the current step of the chain. The final step moves the
    /// settlement to approved.
    ///
    /// A draft is submitted implicitly.
    ///
    /// # Errors
    ///
    /// Returns a transition error outside draft and pending approval, or
    /// an approval error if the actor cannot approve the current step.
    pub async fn approve(
        &self,
        organization_id: OrganizationId,
        settlement_id: SettlementId,
        actor: &Actor,
        comments: Option<String>,
    ) -> Result<Settlement, SettlementError> {
        let (_guard, mut settlement) = self.load_locked(organization_id, settlement_id).await?;
        let before = settlement.clone();
        settlement.transition(
            &[SettlementStatus::Draft, SettlementStatus::PendingApproval],
            SettlementStatus::PendingApproval,
        )?;
        if !settlement.approval.is_started() {
            let chain = self
                .policy
                .approval_chain("settlement", settlement.totals.net_settlement.abs());
            settlement.approval.start(chain);
        }

        let net = settlement.totals.net_settlement;
        let complete = settlement.approval.approve(actor, net, comments, Utc::now())?;
        let action = if complete {
            settlement.transition(&[SettlementStatus::PendingApproval], SettlementStatus::Approved)?;
            "approved"
        } else {
            "approval_step_completed"
        };

        self.save_with_audit(settlement, &before, action, Some(actor)).await
    }

    /// Rejects a settlement pending approval back to draft.
    ///
    /// # Errors
    ///
    /// Returns a transition error unless pending approval, or an approval
    /// error for a blank reason.
    pub async fn reject(
        &self,
        organization_id: OrganizationId,
        settlement_id: SettlementId,
        actor: &Actor,
        reason: &str,
    ) -> Result<Settlement, SettlementError> {
        let (_guard, mut settlement) = self.load_locked(organization_id, settlement_id).await?;
        let before = settlement.clone();
        settlement.transition(&[SettlementStatus::PendingApproval], SettlementStatus::Draft)?;
        settlement.approval.reject(actor, reason, Utc::now())?;

        self.save_with_audit(settlement, &before, "rejected", Some(actor))
            .await
    }

    /// Settles every item of an approved settlement against its source
    /// document.
    ///
    /// The settlement is saved as processing before any item is touched.
    /// An item failure is recorded on the item and the run continues;
    /// items that did settle stay settled and the settlement ends failed.
    ///
    /// A settlement left in processing by an interrupted run is picked up
    /// again: source documents already stamped by this settlement are
    /// accepted as settled.
    ///
    /// # Errors
    ///
    /// Returns a transition error unless approved or processing, or an
    /// error if the settlement itself cannot be saved.
    pub async fn process(
        &self,
        organization_id: OrganizationId,
        settlement_id: SettlementId,
    ) -> Result<Settlement, SettlementError> {
        let (_guard, mut settlement) = self.load_locked(organization_id, settlement_id).await?;
        let now = Utc::now();
        if settlement.status == SettlementStatus::Processing {
            info!(settlement = %settlement.number, "Resuming interrupted settlement processing");
        } else {
            let before = settlement.clone();
            settlement.transition(&[SettlementStatus::Approved], SettlementStatus::Processing)?;
            settlement.processed_at = Some(now);
            settlement.failure_reason = None;
            settlement = self
                .save_with_audit(settlement, &before, "processing_started", None)
                .await?;
        }

        let stamp = settlement.stamp(now);
        let mut failures = Vec::new();
        for item in settlement.items.iter_mut().filter(|i| !i.settled) {
            match self.settle_item(organization_id, item, &stamp).await {
                Ok(()) => {
                    item.settled = true;
                    item.settled_at = Some(now);
                    item.failure_reason = None;
                }
                Err(e) => {
                    warn!(
                        settlement = %stamp.settlement.number,
                        item = %item.reference_number,
                        error = %e,
                        "Settlement item failed"
                    );
                    item.failure_reason = Some(e.to_string());
                    failures.push(format!("{}: {e}", item.reference_number));
                }
            }
        }

        let before = settlement.clone();
        let action = if failures.is_empty() {
            "items_settled"
        } else {
            settlement.transition(&[SettlementStatus::Processing], SettlementStatus::Failed)?;
            settlement.failure_reason = Some(failures.join("; "));
            "processing_failed"
        };
        let settlement = self.save_with_audit(settlement, &before, action, None).await?;

        info!(
            settlement = %settlement.number,
            status = %settlement.status,
            settled = settlement.settled_item_count,
            items = settlement.item_count,
            "Settlement processing finished"
        );
        Ok(settlement)
    }

    /// Completes a processing settlement whose items are all settled.
    ///
    /// # Errors
    ///
    /// Returns a transition error unless processing, or `Validation` if an
    /// item is still unsettled.
    pub async fn complete(
        &self,
        organization_id: OrganizationId,
        settlement_id: SettlementId,
    ) -> Result<Settlement, SettlementError> {
        let (_guard, mut settlement) = self.load_locked(organization_id, settlement_id).await?;
        if let Some(open) = settlement.items.iter().find(|i| !i.settled) {
            return Err(SettlementError::Validation(format!(
                "Settlement {} item {} is not settled",
                settlement.number, open.reference_number
            )));
        }
        let before = settlement.clone();
        settlement.transition(&[SettlementStatus::Processing], SettlementStatus::Completed)?;
        settlement.completed_at = Some(Utc::now());

        self.save_with_audit(settlement, &before, "completed", None).await
    }

    /// Returns a failed settlement to approved so it can be processed
    /// again. Items already settled are skipped on the next run.
    ///
    /// # Errors
    ///
    /// Returns a transition error unless failed.
    pub async fn retry_failed(
        &self,
        organization_id: OrganizationId,
        settlement_id: SettlementId,
        actor: &Actor,
    ) -> Result<Settlement, SettlementError> {
        let (_guard, mut settlement) = self.load_locked(organization_id, settlement_id).await?;
        let before = settlement.clone();
        settlement.transition(&[SettlementStatus::Failed], SettlementStatus::Approved)?;

        self.save_with_audit(settlement, &before, "retry_requested", Some(actor))
            .await
    }

    /// Cancels a settlement that has not settled any item.
    ///
    /// # Errors
    ///
    /// Returns a transition error once processing, completed or cancelled,
    /// and `Validation` for a blank reason or if an item already settled.
    pub async fn cancel(
        &self,
        organization_id: OrganizationId,
        settlement_id: SettlementId,
        actor: &Actor,
        reason: &str,
    ) -> Result<Settlement, SettlementError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(SettlementError::Validation("Cancellation reason is required".to_string()));
        }
        let (_guard, mut settlement) = self.load_locked(organization_id, settlement_id).await?;
        if settlement.items.iter().any(|i| i.settled) {
            return Err(SettlementError::Validation(format!(
                "Settlement {} has settled items; retry it instead",
                settlement.number
            )));
        }
        let before = settlement.clone();
        settlement.transition(
            &[
                SettlementStatus::Draft,
                SettlementStatus::PendingApproval,
                SettlementStatus::Approved,
                SettlementStatus::Failed,
            ],
            SettlementStatus::Cancelled,
        )?;
        settlement.cancellation_reason = Some(reason.to_string());

        self.save_with_audit(settlement, &before, "cancelled", Some(actor))
            .await
    }

    /// Builds the balanced GL journal of a completed settlement.
    ///
    /// # Errors
    ///
    /// Returns a transition error unless completed, or a consistency error
    /// if the journal does not balance.
    pub async fn generate_gl_posting(
        &self,
        organization_id: OrganizationId,
        settlement_id: SettlementId,
    ) -> Result<GlPosting, SettlementError> {
        let settlement = self.stores.settlements.get(organization_id, settlement_id).await?;
        self.posting_for(&settlement)
    }

    /// Submits the journal of a completed settlement to the ledger once.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyPosted` on a second call and a gateway error if the
    /// ledger refuses the posting.
    pub async fn post_to_ledger(
        &self,
        organization_id: OrganizationId,
        settlement_id: SettlementId,
        actor: &Actor,
    ) -> Result<GlPosting, SettlementError> {
        self.post(organization_id, settlement_id, Some(actor)).await
    }

    /// Submits every completed settlement not yet posted to the ledger.
    ///
    /// # Errors
    ///
    /// Returns an error only if the settlement list cannot be loaded.
    pub async fn post_completed_settlements(
        &self,
        organization_id: OrganizationId,
    ) -> Result<BatchReport, SettlementError> {
        let filter = SettlementFilter {
            customer_id: None,
            statuses: vec![SettlementStatus::Completed],
        };
        let settlements = self.stores.settlements.find_all(organization_id, &filter).await?;

        let mut report = BatchReport::new("post_settlements", organization_id);
        for settlement in settlements.into_iter().filter(|s| s.posted_to_ledger_at.is_none()) {
            match self.post(organization_id, settlement.id, None).await {
                Ok(posting) => report.succeeded(
                    settlement.number,
                    format!("{} lines, {} debits", posting.lines.len(), posting.total_debits()),
                ),
                Err(SettlementError::AlreadyPosted { .. }) => report.skipped(settlement.number, "already_posted"),
                Err(e) => report.failed(settlement.number, &e),
            }
        }

        info!(
            organization_id = %organization_id,
            posted = report.succeeded.len(),
            failed = report.failed.len(),
            "Completed settlements posted"
        );
        Ok(report)
    }

    async fn post(
        &self,
        organization_id: OrganizationId,
        settlement_id: SettlementId,
        actor: Option<&Actor>,
    ) -> Result<GlPosting, SettlementError> {
        let (_guard, mut settlement) = self.load_locked(organization_id, settlement_id).await?;
        if settlement.posted_to_ledger_at.is_some() {
            return Err(SettlementError::AlreadyPosted {
                settlement: settlement.number,
            });
        }
        let posting = self.posting_for(&settlement)?;
        self.gateway.submit(&posting).await?;

        let before = settlement.clone();
        settlement.posted_to_ledger_at = Some(Utc::now());
        self.save_with_audit(settlement, &before, "posted_to_ledger", actor)
            .await?;
        Ok(posting)
    }

    /// Records a bank statement amount against a completed settlement.
    ///
    /// # Errors
    ///
    /// Returns `BankMismatch` with the computed variance when the amount
    /// differs from the net settlement by more than the tolerance.
    pub async fn reconcile_with_bank_statement(
        &self,
        organization_id: OrganizationId,
        settlement_id: SettlementId,
        bank_amount: Decimal,
        statement_reference: Option<String>,
    ) -> Result<BankReconciliation, SettlementError> {
        let (_guard, mut settlement) = self.load_locked(organization_id, settlement_id).await?;
        if settlement.status != SettlementStatus::Completed {
            return Err(DocumentError::transition("settlement", settlement.status, "bank_reconciled").into());
        }

        let expected = settlement.totals.net_settlement;
        let variance = bank_amount - expected;
        let tolerance = settlement
            .currency
            .round(expected.abs() * self.config.bank_tolerance_percent / Decimal::ONE_HUNDRED);
        if variance.abs() > tolerance {
            warn!(
                settlement = %settlement.number,
                expected = %expected,
                actual = %bank_amount,
                variance = %variance,
                "Bank statement does not match settlement"
            );
            return Err(SettlementError::BankMismatch {
                expected,
                actual: bank_amount,
                variance,
                tolerance,
            });
        }

        let reconciliation = BankReconciliation {
            bank_amount,
            variance,
            statement_reference,
            reconciled_at: Utc::now(),
        };
        let before = settlement.clone();
        settlement.bank_reconciliation = Some(reconciliation.clone());
        self.save_with_audit(settlement, &before, "bank_reconciled", None)
            .await?;
        Ok(reconciliation)
    }

    async fn lock(&self, organization_id: OrganizationId, customer_id: CustomerId) -> KeyGuard {
        self.locks
            .lock(KeyedLocks::customer_documents_key(organization_id, customer_id))
            .await
    }

    async fn load_locked(
        &self,
        organization_id: OrganizationId,
        settlement_id: SettlementId,
    ) -> Result<(KeyGuard, Settlement), SettlementError> {
        let settlement = self.stores.settlements.get(organization_id, settlement_id).await?;
        let guard = self.lock(organization_id, settlement.customer_id).await;
        let settlement = self.stores.settlements.get(organization_id, settlement_id).await?;
        Ok((guard, settlement))
    }

    async fn save_with_audit(
        &self,
        settlement: Settlement,
        before: &Settlement,
        action: &str,
        actor: Option<&Actor>,
    ) -> Result<Settlement, SettlementError> {
        let settlement = self.stores.settlements.save(settlement).await?;
        emit(
            self.audit.as_ref(),
            AuditEvent::new(
                settlement.organization_id,
                DocumentKind::Settlement,
                settlement.id,
                action,
                actor.map(|a| a.id),
            )
            .with_snapshots(Some(before), &settlement),
        )
        .await;
        Ok(settlement)
    }

    fn posting_for(&self, settlement: &Settlement) -> Result<GlPosting, SettlementError> {
        if settlement.status != SettlementStatus::Completed {
            return Err(DocumentError::transition("settlement", settlement.status, "posted").into());
        }
        build_posting(settlement, &self.config.gl_accounts)
    }

    async fn settle_item(
        &self,
        organization_id: OrganizationId,
        item: &SettlementItem,
        stamp: &SettlementStamp,
    ) -> Result<(), SettlementError> {
        let (kind, id) = match item.item_type {
            SettlementItemType::Invoice => {
                let mut invoice = self
                    .stores
                    .invoices
                    .get(organization_id, InvoiceId::from_uuid(item.reference_id))
                    .await?;
                invoice.mark_settled(stamp.clone())?;
                let invoice = self.stores.invoices.save(invoice).await?;
                (DocumentKind::Invoice, invoice.id.into_inner())
            }
            SettlementItemType::Payment => {
                let mut payment = self
                    .stores
                    .payments
                    .get(organization_id, PaymentId::from_uuid(item.reference_id))
                    .await?;
                payment.mark_settled(stamp.clone())?;
                let payment = self.stores.payments.save(payment).await?;
                (DocumentKind::Payment, payment.id.into_inner())
            }
            SettlementItemType::Deduction => {
                let mut deduction = self
                    .stores
                    .deductions
                    .get(organization_id, DeductionId::from_uuid(item.reference_id))
                    .await?;
                deduction.mark_settled(stamp.clone())?;
                let deduction = self.stores.deductions.save(deduction).await?;
                (DocumentKind::Deduction, deduction.id.into_inner())
            }
            // Memos and adjustments live only on the settlement.
            SettlementItemType::CreditMemo | SettlementItemType::DebitMemo | SettlementItemType::Adjustment => {
                return Ok(());
            }
        };
        emit(
            self.audit.as_ref(),
            AuditEvent::new(organization_id, kind, id, "settled", None),
        )
        .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tally_shared::types::ProductId;

    use crate::documents::Payment;
    use crate::ports::MemoryGlGateway;
    use crate::test_support::{Fixture, FlakyStore, admin, approver, days_from_today, today};
    use crate::workflow::RuleBasedApprovalPolicy;

    struct Harness {
        fx: Fixture,
        gateway: Arc<MemoryGlGateway>,
        engine: SettlementEngine,
    }

    fn harness() -> Harness {
        harness_with(Stores::in_memory())
    }

    fn harness_with(stores: Stores) -> Harness {
        let fx = Fixture::with_stores(stores);
        let gateway = Arc::new(MemoryGlGateway::new());
        let engine = SettlementEngine::new(
            fx.stores.clone(),
            fx.audit.clone(),
            fx.locks.clone(),
            Arc::new(RuleBasedApprovalPolicy::default()),
            gateway.clone(),
            SettlementConfig::default(),
        );
        Harness { fx, gateway, engine }
    }

    impl Harness {
        async fn seed(&self) {
            self.fx
                .approved_invoice("INV-1", &[(ProductId::new(), dec!(10), dec!(100))])
                .await;
            self.fx.cleared_payment("PAY-1", dec!(700)).await;
            self.fx.approved_deduction("DED-1", dec!(50)).await;
        }

        async fn create(&self) -> Settlement {
            self.engine
                .create_settlement(
                    self.fx.org,
                    self.fx.customer,
                    days_from_today(-30),
                    today(),
                    Currency::Usd,
                )
                .await
                .unwrap()
        }

        async fn approved(&self) -> Settlement {
            let settlement = self.create().await;
            self.engine
                .approve(self.fx.org, settlement.id, &approver(), None)
                .await
                .unwrap()
        }

        async fn completed(&self) -> Settlement {
            let settlement = self.approved().await;
            self.engine.process(self.fx.org, settlement.id).await.unwrap();
            self.engine.complete(self.fx.org, settlement.id).await.unwrap()
        }
    }

    #[tokio::test]
    async fn test_create_snapshots_and_nets() {
        let h = harness();
        h.seed().await;

        let settlement = h.create().await;

        assert_eq!(settlement.status, SettlementStatus::Draft);
        assert_eq!(settlement.item_count, 3);
        assert_eq!(settlement.totals.total_invoices, dec!(1000));
        assert_eq!(settlement.totals.total_payments, dec!(700));
        assert_eq!(settlement.totals.total_deductions, dec!(50));
        assert_eq!(settlement.totals.net_settlement, dec!(250));
    }

    #[tokio::test]
    async fn test_documents_held_by_open_settlement_are_excluded() {
        let h = harness();
        h.seed().await;
        h.create().await;

        let err = h
            .engine
            .create_settlement(h.fx.org, h.fx.customer, days_from_today(-30), today(), Currency::Usd)
            .await
            .unwrap_err();
        assert!(matches!(err, SettlementError::NoItems { .. }));
    }

    #[tokio::test]
    async fn test_period_sweep_creates_one_settlement_per_customer() {
        let h = harness();
        h.seed().await;
        let other = Fixture {
            org: h.fx.org,
            customer: CustomerId::new(),
            ..Fixture::with_stores(h.fx.stores.clone())
        };
        other
            .approved_invoice("INV-9", &[(ProductId::new(), dec!(2), dec!(50))])
            .await;

        let first = h
            .engine
            .create_period_settlements(h.fx.org, days_from_today(-30), today(), Currency::Usd)
            .await
            .unwrap();
        assert_eq!(first.succeeded.len(), 2);
        assert!(first.failed.is_empty());

        let open = h
            .fx
            .stores
            .settlements
            .count(h.fx.org, &SettlementFilter::default())
            .await
            .unwrap();
        assert_eq!(open, 2);

        let second = h
            .engine
            .create_period_settlements(h.fx.org, days_from_today(-30), today(), Currency::Usd)
            .await
            .unwrap();
        assert!(second.succeeded.is_empty());
        assert_eq!(second.skipped.len(), 2);
    }

    #[tokio::test]
    async fn test_period_sweep_ignores_other_currencies() {
        let h = harness();
        h.seed().await;

        let report = h
            .engine
            .create_period_settlements(h.fx.org, days_from_today(-30), today(), Currency::Eur)
            .await
            .unwrap();

        assert!(report.succeeded.is_empty());
        assert!(report.skipped.is_empty());
    }

    #[tokio::test]
    async fn test_pending_payments_are_not_settled() {
        let h = harness();
        let payment = Payment::new(
            h.fx.org,
            "PAY-P",
            h.fx.customer,
            today(),
            dec!(10),
            Currency::Usd,
        );
        h.fx.stores.payments.save(payment).await.unwrap();

        let err = h
            .engine
            .create_settlement(h.fx.org, h.fx.customer, days_from_today(-30), today(), Currency::Usd)
            .await
            .unwrap_err();
        assert!(matches!(err, SettlementError::NoItems { .. }));
    }

    #[tokio::test]
    async fn test_full_lifecycle_stamps_sources() {
        let h = harness();
        h.seed().await;

        let settlement = h.completed().await;

        assert_eq!(settlement.status, SettlementStatus::Completed);
        assert_eq!(settlement.completion_percent, dec!(100));
        for item in &settlement.items {
            assert!(item.settled);
        }
        let invoice_id = InvoiceId::from_uuid(settlement.items[0].reference_id);
        let invoice = h.fx.stores.invoices.get(h.fx.org, invoice_id).await.unwrap();
        assert_eq!(
            invoice.settlement.as_ref().map(|s| s.settlement.id),
            Some(settlement.id)
        );
        let deductions = h
            .fx
            .stores
            .deductions
            .find_all(h.fx.org, &DeductionFilter::default())
            .await
            .unwrap();
        assert_eq!(deductions[0].status, DeductionStatus::Settled);
    }

    #[tokio::test]
    async fn test_one_failed_item_fails_settlement_and_keeps_the_rest() {
        let h = harness();
        h.seed().await;
        let settlement = h.approved().await;
        let payment_ref = settlement
            .items
            .iter()
            .find(|i| i.item_type == SettlementItemType::Payment)
            .map(|i| PaymentId::from_uuid(i.reference_id))
            .unwrap();
        let mut payment = h.fx.stores.payments.get(h.fx.org, payment_ref).await.unwrap();
        payment.bounce().unwrap();
        h.fx.stores.payments.save(payment).await.unwrap();

        let settlement = h.engine.process(h.fx.org, settlement.id).await.unwrap();

        assert_eq!(settlement.status, SettlementStatus::Failed);
        assert_eq!(settlement.settled_item_count, 2);
        let reason = settlement.failure_reason.unwrap();
        assert!(reason.starts_with("PAY-1: "), "{reason}");
        let failed = settlement
            .items
            .iter()
            .find(|i| i.item_type == SettlementItemType::Payment)
            .unwrap();
        assert!(!failed.settled);
        assert!(failed.failure_reason.is_some());
    }

    #[tokio::test]
    async fn test_retry_skips_settled_items() {
        let h = harness();
        h.seed().await;
        let settlement = h.approved().await;
        let payment_id = settlement
            .items
            .iter()
            .find(|i| i.item_type == SettlementItemType::Payment)
            .map(|i| PaymentId::from_uuid(i.reference_id))
            .unwrap();
        let mut payment = h.fx.stores.payments.get(h.fx.org, payment_id).await.unwrap();
        payment.status = PaymentStatus::Processing;
        h.fx.stores.payments.save(payment).await.unwrap();
        let failed = h.engine.process(h.fx.org, settlement.id).await.unwrap();
        assert_eq!(failed.status, SettlementStatus::Failed);

        let mut payment = h.fx.stores.payments.get(h.fx.org, payment_id).await.unwrap();
        payment.clear().unwrap();
        h.fx.stores.payments.save(payment).await.unwrap();

        h.engine
            .retry_failed(h.fx.org, settlement.id, &admin())
            .await
            .unwrap();
        let processed = h.engine.process(h.fx.org, settlement.id).await.unwrap();
        assert_eq!(processed.status, SettlementStatus::Processing);
        assert_eq!(processed.settled_item_count, 3);
        assert!(processed.failure_reason.is_none());

        let completed = h.engine.complete(h.fx.org, settlement.id).await.unwrap();
        assert_eq!(completed.status, SettlementStatus::Completed);
    }

    #[tokio::test]
    async fn test_process_resumes_after_interrupted_final_save() {
        let settlements = Arc::new(FlakyStore::<Settlement>::new());
        let stores = Stores {
            settlements: settlements.clone(),
            ..Stores::in_memory()
        };
        let h = harness_with(stores);
        h.seed().await;
        let settlement = h.approved().await;

        // First save marks it processing, second records the settled items.
        settlements.fail_nth_save(2);
        assert!(h.engine.process(h.fx.org, settlement.id).await.is_err());

        let stuck = h.fx.stores.settlements.get(h.fx.org, settlement.id).await.unwrap();
        assert_eq!(stuck.status, SettlementStatus::Processing);
        assert_eq!(stuck.settled_item_count, 0);

        let resumed = h.engine.process(h.fx.org, settlement.id).await.unwrap();
        assert_eq!(resumed.status, SettlementStatus::Processing);
        assert_eq!(resumed.settled_item_count, 3);
        assert!(resumed.failure_reason.is_none());

        let completed = h.engine.complete(h.fx.org, settlement.id).await.unwrap();
        assert_eq!(completed.status, SettlementStatus::Completed);
    }

    #[tokio::test]
    async fn test_process_requires_approval() {
        let h = harness();
        h.seed().await;
        let settlement = h.create().await;

        let err = h.engine.process(h.fx.org, settlement.id).await.unwrap_err();
        assert!(matches!(
            err,
            SettlementError::Document(DocumentError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_submit_then_reject_returns_to_draft() {
        let h = harness();
        h.seed().await;
        let settlement = h.create().await;

        let submitted = h.engine.submit(h.fx.org, settlement.id, &admin()).await.unwrap();
        assert_eq!(submitted.status, SettlementStatus::PendingApproval);
        assert!(submitted.approval.is_started());

        let rejected = h
            .engine
            .reject(h.fx.org, settlement.id, &approver(), "missing credit memo")
            .await
            .unwrap();
        assert_eq!(rejected.status, SettlementStatus::Draft);
    }

    #[tokio::test]
    async fn test_adjustment_changes_net_in_draft_only() {
        let h = harness();
        h.seed().await;
        let settlement = h.create().await;

        let adjusted = h
            .engine
            .add_adjustment(h.fx.org, settlement.id, dec!(-25), "freight credit", &admin())
            .await
            .unwrap();
        assert_eq!(adjusted.totals.net_settlement, dec!(225));

        h.engine
            .approve(h.fx.org, settlement.id, &approver(), None)
            .await
            .unwrap();
        let err = h
            .engine
            .add_adjustment(h.fx.org, settlement.id, dec!(5), "late", &admin())
            .await
            .unwrap_err();
        assert!(matches!(err, SettlementError::Document(_)));
    }

    #[tokio::test]
    async fn test_cancel_rules() {
        let h = harness();
        h.seed().await;
        let settlement = h.completed().await;

        let err = h
            .engine
            .cancel(h.fx.org, settlement.id, &admin(), "duplicate")
            .await
            .unwrap_err();
        assert!(matches!(err, SettlementError::Validation(_)));

        let h = harness();
        h.seed().await;
        let draft = h.create().await;
        assert!(h.engine.cancel(h.fx.org, draft.id, &admin(), " ").await.is_err());
        let cancelled = h
            .engine
            .cancel(h.fx.org, draft.id, &admin(), "duplicate")
            .await
            .unwrap();
        assert_eq!(cancelled.status, SettlementStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_gl_posting_requires_completion_and_balances() {
        let h = harness();
        h.seed().await;
        let draft = h.create().await;
        assert!(h.engine.generate_gl_posting(h.fx.org, draft.id).await.is_err());
        h.engine
            .cancel(h.fx.org, draft.id, &admin(), "redo")
            .await
            .unwrap();

        let settlement = h.completed().await;
        let posting = h
            .engine
            .generate_gl_posting(h.fx.org, settlement.id)
            .await
            .unwrap();
        assert_eq!(posting.total_debits(), posting.total_credits());
        assert_eq!(posting.total_debits(), dec!(1000));
    }

    #[tokio::test]
    async fn test_post_to_ledger_once() {
        let h = harness();
        h.seed().await;
        let settlement = h.completed().await;

        h.engine
            .post_to_ledger(h.fx.org, settlement.id, &admin())
            .await
            .unwrap();
        let err = h
            .engine
            .post_to_ledger(h.fx.org, settlement.id, &admin())
            .await
            .unwrap_err();

        assert!(matches!(err, SettlementError::AlreadyPosted { .. }));
        assert_eq!(h.gateway.postings().await.len(), 1);
    }

    #[tokio::test]
    async fn test_post_completed_settlements_posts_each_once() {
        let h = harness();
        h.seed().await;
        h.completed().await;

        let first = h.engine.post_completed_settlements(h.fx.org).await.unwrap();
        let second = h.engine.post_completed_settlements(h.fx.org).await.unwrap();

        assert_eq!(first.succeeded.len(), 1);
        assert!(second.succeeded.is_empty());
        assert_eq!(h.gateway.postings().await.len(), 1);
    }

    #[tokio::test]
    async fn test_bank_reconciliation_tolerance() {
        let h = harness();
        h.seed().await;
        let settlement = h.completed().await;

        let err = h
            .engine
            .reconcile_with_bank_statement(h.fx.org, settlement.id, dec!(240), None)
            .await
            .unwrap_err();
        match err {
            SettlementError::BankMismatch { variance, tolerance, .. } => {
                assert_eq!(variance, dec!(-10));
                assert_eq!(tolerance, dec!(2.50));
            }
            other => panic!("unexpected error: {other}"),
        }

        let reconciliation = h
            .engine
            .reconcile_with_bank_statement(h.fx.org, settlement.id, dec!(248), Some("STMT-7".into()))
            .await
            .unwrap();
        assert_eq!(reconciliation.variance, dec!(-2));
    }
}
