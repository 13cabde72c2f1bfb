//! Matching engine: links invoices to purchase orders and payments to
//! invoices.
//!
//! Every commit is a two-step save. The side that records the link first
//! (PO allocations, payment applications) is the source of truth; the
//! second side is re-derived from it on every run, so a run interrupted
//! between the two saves converges when repeated.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tally_shared::config::MatchingConfig;
use tally_shared::types::{CustomerId, InvoiceId, OrganizationId, PaymentId, PurchaseOrderId};
use tracing::{info, warn};

use super::error::MatchingError;
use super::scoring::evaluate_match;
use super::types::{
    AllocationOutcome, AutoMatchReport, InvoiceAllocationOutcome, MatchResult, PaymentMatch,
    ThreeWayMatch,
};
use crate::batch::BatchReport;
use crate::documents::{
    Document, DocumentKind, Invoice, InvoiceAllocation, InvoiceFilter, InvoiceStatus, MatchStatus,
    Payment, PaymentFilter, PaymentStatus, PurchaseOrderFilter,
};
use crate::ports::{AuditEvent, AuditSink, KeyGuard, KeyedLocks, Stores, emit};

/// Invoice statuses that can still receive payments, in allocation scope.
const PAYABLE: [InvoiceStatus; 4] = [
    InvoiceStatus::Approved,
    InvoiceStatus::PendingPayment,
    InvoiceStatus::PartiallyPaid,
    InvoiceStatus::Overdue,
];

/// Stateless matching service over injected stores.
pub struct MatchingEngine {
    stores: Stores,
    audit: Arc<dyn AuditSink>,
    locks: KeyedLocks,
    config: MatchingConfig,
}

impl MatchingEngine {
    /// Creates a matching engine.
    #[must_use]
    pub fn new(stores: Stores, audit: Arc<dyn AuditSink>, locks: KeyedLocks, config: MatchingConfig) -> Self {
        Self {
            stores,
            audit,
            locks,
            config,
        }
    }

    /// Returns the active tolerances.
    #[must_use]
    pub fn config(&self) -> &MatchingConfig {
        &self.config
    }

    /// Evaluates an invoice against a purchase order without saving.
    ///
    /// # Errors
    ///
    /// Returns an error if either document is missing or the customers differ.
    pub async fn preview_invoice_match(
        &self,
        organization_id: OrganizationId,
        invoice_id: InvoiceId,
        po_id: PurchaseOrderId,
    ) -> Result<MatchResult, MatchingError> {
        let invoice = self.stores.invoices.get(organization_id, invoice_id).await?;
        let po = self.stores.purchase_orders.get(organization_id, po_id).await?;
        evaluate_match(&invoice, &po, &self.config)
    }

    /// Matches an invoice to a purchase order and commits the match when
    /// confidence reaches the auto-match threshold with no header exceptions.
    ///
    /// A result with `matched == false` is returned without changing either
    /// document.
    ///
    /// # Errors
    ///
    /// Returns an error on customer mismatch, if the invoice is cancelled
    /// or already matched to another order, or if a save fails.
    pub async fn match_invoice_to_po(
        &self,
        organization_id: OrganizationId,
        invoice_id: InvoiceId,
        po_id: PurchaseOrderId,
    ) -> Result<MatchResult, MatchingError> {
        let invoice = self.stores.invoices.get(organization_id, invoice_id).await?;
        let _guard = self.lock_customer(organization_id, invoice.customer_id).await;
        self.commit_invoice_match(organization_id, invoice_id, po_id).await
    }

    /// Applies `amount` of a payment to an invoice.
    ///
    /// Never clamps: an amount above either balance is rejected.
    ///
    /// # Errors
    ///
    /// Returns a validation error on customer or currency mismatch, a
    /// non-positive amount, or an amount above the payment's unapplied or
    /// the invoice's outstanding balance.
    pub async fn match_payment_to_invoice(
        &self,
        organization_id: OrganizationId,
        payment_id: PaymentId,
        invoice_id: InvoiceId,
        amount: Decimal,
    ) -> Result<PaymentMatch, MatchingError> {
        let payment = self.stores.payments.get(organization_id, payment_id).await?;
        let _guard = self.lock_customer(organization_id, payment.customer_id).await;
        self.apply_payment(organization_id, payment_id, invoice_id, amount).await
    }

    /// Spreads a payment's unapplied balance over the customer's open
    /// invoices, oldest due date first.
    ///
    /// A failure on one invoice is recorded and the allocation moves on.
    ///
    /// # Errors
    ///
    /// Returns an error if the payment is missing or cannot be applied in
    /// its status.
    pub async fn auto_match_payment(
        &self,
        organization_id: OrganizationId,
        payment_id: PaymentId,
    ) -> Result<AutoMatchReport, MatchingError> {
        let payment = self.stores.payments.get(organization_id, payment_id).await?;
        let _guard = self.lock_customer(organization_id, payment.customer_id).await;
        self.allocate_payment(organization_id, payment_id).await
    }

    /// Matches every unmatched invoice of a customer against its open
    /// purchase orders.
    ///
    /// The best order per invoice is committed when it qualifies, queued
    /// for review when its confidence reaches the review floor, and
    /// reported as `no_match_found` otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error only if the invoice list cannot be loaded.
    pub async fn batch_match_invoices(
        &self,
        organization_id: OrganizationId,
        customer_id: CustomerId,
    ) -> Result<BatchReport, MatchingError> {
        let _guard = self.lock_customer(organization_id, customer_id).await;
        let filter = InvoiceFilter {
            customer_id: Some(customer_id),
            match_statuses: vec![MatchStatus::Unmatched, MatchStatus::PartiallyMatched],
            ..InvoiceFilter::default()
        };
        let invoices = self.stores.invoices.find_all(organization_id, &filter).await?;

        let mut report = BatchReport::new("match_invoices", organization_id);
        for invoice in invoices.iter().filter(|i| i.status != InvoiceStatus::Cancelled) {
            let best = match self.best_purchase_order(organization_id, invoice).await {
                Ok(best) => best,
                Err(e) => {
                    report.failed(invoice.number.clone(), &e);
                    continue;
                }
            };
            match best {
                Some(best) if best.matched => {
                    match self
                        .commit_invoice_match(organization_id, invoice.id, best.purchase_order.id)
                        .await
                    {
                        Ok(result) if result.matched => report.succeeded(
                            invoice.number.clone(),
                            format!("{} at {}%", result.purchase_order.number, result.confidence),
                        ),
                        Ok(result) => report.needs_review(
                            invoice.number.clone(),
                            format!("{} at {}%", result.purchase_order.number, result.confidence),
                        ),
                        Err(e) => report.failed(invoice.number.clone(), &e),
                    }
                }
                Some(best) if best.needs_review(self.config.review_confidence) => report.needs_review(
                    invoice.number.clone(),
                    format!("{} at {}%", best.purchase_order.number, best.confidence),
                ),
                _ => report.skipped(invoice.number.clone(), "no_match_found"),
            }
        }

        info!(
            organization_id = %organization_id,
            customer_id = %customer_id,
            succeeded = report.succeeded.len(),
            needs_review = report.needs_review.len(),
            failed = report.failed.len(),
            "Batch invoice matching finished"
        );
        Ok(report)
    }

    /// Runs [`Self::batch_match_invoices`] for every customer with
    /// unmatched invoices.
    ///
    /// # Errors
    ///
    /// Returns an error only if the customer list cannot be loaded.
    pub async fn batch_match_organization(
        &self,
        organization_id: OrganizationId,
    ) -> Result<BatchReport, MatchingError> {
        let filter = InvoiceFilter {
            match_statuses: vec![MatchStatus::Unmatched, MatchStatus::PartiallyMatched],
            ..InvoiceFilter::default()
        };
        let customers: BTreeSet<CustomerId> = self
            .stores
            .invoices
            .find_all(organization_id, &filter)
            .await?
            .into_iter()
            .map(|i| i.customer_id)
            .collect();

        let mut report = BatchReport::new("match_invoices", organization_id);
        for customer_id in customers {
            match self.batch_match_invoices(organization_id, customer_id).await {
                Ok(customer_report) => report.merge(customer_report),
                Err(e) => report.failed(customer_id.to_string(), &e),
            }
        }
        Ok(report)
    }

    /// Auto-matches every payment of the organization that still has an
    /// unapplied balance.
    ///
    /// # Errors
    ///
    /// Returns an error only if the payment list cannot be loaded.
    pub async fn auto_match_organization(
        &self,
        organization_id: OrganizationId,
    ) -> Result<BatchReport, MatchingError> {
        let filter = PaymentFilter {
            statuses: vec![PaymentStatus::Pending, PaymentStatus::Processing, PaymentStatus::Cleared],
            unsettled_only: true,
            with_unapplied_only: true,
            ..PaymentFilter::default()
        };
        let payments = self.stores.payments.find_all(organization_id, &filter).await?;

        let mut report = BatchReport::new("auto_match_payments", organization_id);
        for payment in payments {
            match self.auto_match_payment(organization_id, payment.id).await {
                Ok(result) => {
                    let failures: Vec<String> = result
                        .outcomes
                        .iter()
                        .filter_map(|o| match &o.outcome {
                            AllocationOutcome::Failed { reason } => {
                                Some(format!("{}: {reason}", o.invoice.number))
                            }
                            AllocationOutcome::Applied { .. } => None,
                        })
                        .collect();
                    if !failures.is_empty() {
                        report.needs_review(payment.number, failures.join("; "));
                    } else if result.applied_total.is_zero() {
                        report.skipped(payment.number, "no_open_invoices");
                    } else {
                        report.succeeded(
                            payment.number,
                            format!(
                                "applied {}, unapplied {}",
                                result.applied_total, result.unapplied_remaining
                            ),
                        );
                    }
                }
                Err(e) => report.failed(payment.number, &e),
            }
        }
        Ok(report)
    }

    /// Matches invoice to purchase order, then applies the payment to the
    /// invoice.
    ///
    /// The payment step is not attempted when the first step does not
    /// commit; the result then carries no payment match.
    ///
    /// # Errors
    ///
    /// Returns an error if either step errors or there is nothing left to
    /// apply.
    pub async fn complete_three_way_match(
        &self,
        organization_id: OrganizationId,
        po_id: PurchaseOrderId,
        invoice_id: InvoiceId,
        payment_id: PaymentId,
    ) -> Result<ThreeWayMatch, MatchingError> {
        let invoice = self.stores.invoices.get(organization_id, invoice_id).await?;
        let _guard = self.lock_customer(organization_id, invoice.customer_id).await;

        let invoice_match = self.commit_invoice_match(organization_id, invoice_id, po_id).await?;
        if !invoice_match.matched {
            warn!(
                invoice = %invoice_match.invoice.number,
                purchase_order = %invoice_match.purchase_order.number,
                confidence = %invoice_match.confidence,
                "Three-way match stopped: invoice did not match purchase order"
            );
            return Ok(ThreeWayMatch {
                invoice_match,
                payment_match: None,
            });
        }

        let payment = self.stores.payments.get(organization_id, payment_id).await?;
        let invoice = self.stores.invoices.get(organization_id, invoice_id).await?;
        let amount = payment.unapplied_amount.min(invoice.outstanding_amount);
        if amount <= Decimal::ZERO {
            return Err(MatchingError::Validation(format!(
                "Nothing to apply: payment {} unapplied {}, invoice {} outstanding {}",
                payment.number, payment.unapplied_amount, invoice.number, invoice.outstanding_amount
            )));
        }
        let payment_match = self
            .apply_payment(organization_id, payment_id, invoice_id, amount)
            .await?;

        Ok(ThreeWayMatch {
            invoice_match,
            payment_match: Some(payment_match),
        })
    }

    async fn lock_customer(&self, organization_id: OrganizationId, customer_id: CustomerId) -> KeyGuard {
        self.locks
            .lock(KeyedLocks::customer_documents_key(organization_id, customer_id))
            .await
    }

    async fn best_purchase_order(
        &self,
        organization_id: OrganizationId,
        invoice: &Invoice,
    ) -> Result<Option<MatchResult>, MatchingError> {
        let candidates = match &invoice.matched_purchase_order {
            Some(po_ref) => vec![self.stores.purchase_orders.get(organization_id, po_ref.id).await?],
            None => {
                self.stores
                    .purchase_orders
                    .find_all(organization_id, &PurchaseOrderFilter::open_for_customer(invoice.customer_id))
                    .await?
            }
        };

        let mut best: Option<MatchResult> = None;
        for po in &candidates {
            let result = evaluate_match(invoice, po, &self.config)?;
            let better = best
                .as_ref()
                .is_none_or(|b| (result.matched, result.confidence) > (b.matched, b.confidence));
            if better {
                best = Some(result);
            }
        }
        Ok(best)
    }

    async fn commit_invoice_match(
        &self,
        organization_id: OrganizationId,
        invoice_id: InvoiceId,
        po_id: PurchaseOrderId,
    ) -> Result<MatchResult, MatchingError> {
        let mut invoice = self.stores.invoices.get(organization_id, invoice_id).await?;
        let mut po = self.stores.purchase_orders.get(organization_id, po_id).await?;

        if invoice.status == InvoiceStatus::Cancelled {
            return Err(MatchingError::Validation(format!(
                "Invoice {} is cancelled and cannot be matched",
                invoice.number
            )));
        }
        if let Some(existing) = &invoice.matched_purchase_order
            && existing.id != po.id
        {
            return Err(MatchingError::AlreadyMatched {
                invoice: invoice.number.clone(),
                purchase_order: existing.number.clone(),
            });
        }

        let result = evaluate_match(&invoice, &po, &self.config)?;
        if !result.matched {
            warn!(
                invoice = %invoice.number,
                purchase_order = %po.number,
                confidence = %result.confidence,
                exceptions = ?result.exceptions,
                "Invoice not matched to purchase order"
            );
            return Ok(result);
        }

        // Step 1: the order's allocations are the source of truth.
        let po_before = po.clone();
        po.remove_allocations_for(invoice.id);
        for line_match in &result.line_matches {
            po.line_mut(line_match.po_line)?.upsert_allocation(InvoiceAllocation {
                invoice: invoice.doc_ref(),
                invoice_line: line_match.invoice_line,
                quantity: line_match.quantity,
                amount: line_match.amount,
            });
        }
        let po = self.stores.purchase_orders.save(po).await?;
        emit(
            self.audit.as_ref(),
            AuditEvent::new(organization_id, DocumentKind::PurchaseOrder, po.id, "invoice_allocated", None)
                .with_snapshots(Some(&po_before), &po),
        )
        .await;

        // Step 2: the invoice mirrors them.
        let invoice_before = invoice.clone();
        for line in &mut invoice.lines {
            line.clear_match();
        }
        for line_match in &result.line_matches {
            let line = invoice.line_mut(line_match.invoice_line)?;
            line.matched = true;
            line.matched_amount = line_match.amount;
            line.po_line_number = Some(line_match.po_line);
            line.match_confidence = Some(line_match.confidence);
        }
        invoice.matched_purchase_order = Some(po.doc_ref());
        let invoice = self.stores.invoices.save(invoice).await?;
        emit(
            self.audit.as_ref(),
            AuditEvent::new(organization_id, DocumentKind::Invoice, invoice.id, "matched_to_purchase_order", None)
                .with_snapshots(Some(&invoice_before), &invoice),
        )
        .await;

        info!(
            invoice = %invoice.number,
            purchase_order = %po.number,
            confidence = %result.confidence,
            match_status = %invoice.match_status.as_str(),
            "Invoice matched to purchase order"
        );
        Ok(result)
    }

    async fn apply_payment(
        &self,
        organization_id: OrganizationId,
        payment_id: PaymentId,
        invoice_id: InvoiceId,
        amount: Decimal,
    ) -> Result<PaymentMatch, MatchingError> {
        let today = Utc::now().date_naive();
        let mut payment = self.stores.payments.get(organization_id, payment_id).await?;
        let mut invoice = self.stores.invoices.get(organization_id, invoice_id).await?;

        check_pair(&payment, &invoice)?;

        // Repair a receipt left behind by an interrupted earlier run.
        let already_applied = payment.applied_to(invoice.id);
        if invoice.receipt_from(payment.id) != already_applied {
            invoice.upsert_receipt(payment.doc_ref(), already_applied, today);
            invoice = invoice.recompute_derived(today);
        }

        if amount <= Decimal::ZERO {
            return Err(MatchingError::Validation("Applied amount must be positive".to_string()));
        }
        if !invoice.status.accepts_payment() {
            return Err(MatchingError::Validation(format!(
                "Invoice {} is {} and does not accept payments",
                invoice.number, invoice.status
            )));
        }
        if amount > payment.unapplied_amount {
            return Err(MatchingError::Validation(format!(
                "Amount {amount} exceeds payment {} unapplied balance {}",
                payment.number, payment.unapplied_amount
            )));
        }
        if amount > invoice.outstanding_amount {
            return Err(MatchingError::Validation(format!(
                "Amount {amount} exceeds invoice {} outstanding balance {}",
                invoice.number, invoice.outstanding_amount
            )));
        }

        let payment_before = payment.clone();
        payment.apply(invoice.doc_ref(), amount, today)?;
        let payment = self.stores.payments.save(payment).await?;
        emit(
            self.audit.as_ref(),
            AuditEvent::new(organization_id, DocumentKind::Payment, payment.id, "applied_to_invoice", None)
                .with_snapshots(Some(&payment_before), &payment),
        )
        .await;

        let invoice_before = invoice.clone();
        invoice.upsert_receipt(payment.doc_ref(), payment.applied_to(invoice.id), today);
        let invoice = self.stores.invoices.save(invoice).await?;
        emit(
            self.audit.as_ref(),
            AuditEvent::new(organization_id, DocumentKind::Invoice, invoice.id, "payment_received", None)
                .with_snapshots(Some(&invoice_before), &invoice),
        )
        .await;

        info!(
            payment = %payment.number,
            invoice = %invoice.number,
            %amount,
            invoice_status = %invoice.status,
            "Payment applied to invoice"
        );
        Ok(PaymentMatch {
            payment: payment.doc_ref(),
            invoice: invoice.doc_ref(),
            amount_applied: amount,
            payment_unapplied: payment.unapplied_amount,
            invoice_outstanding: invoice.outstanding_amount,
        })
    }

    async fn allocate_payment(
        &self,
        organization_id: OrganizationId,
        payment_id: PaymentId,
    ) -> Result<AutoMatchReport, MatchingError> {
        let payment = self.stores.payments.get(organization_id, payment_id).await?;
        if !payment.status.is_applicable() {
            return Err(MatchingError::Validation(format!(
                "Payment {} is {} and cannot be applied",
                payment.number, payment.status
            )));
        }

        let filter = InvoiceFilter {
            customer_id: Some(payment.customer_id),
            statuses: PAYABLE.to_vec(),
            ..InvoiceFilter::default()
        };
        let mut invoices: Vec<Invoice> = self
            .stores
            .invoices
            .find_all(organization_id, &filter)
            .await?
            .into_iter()
            .filter(|i| i.currency == payment.currency && i.outstanding_amount > Decimal::ZERO)
            .collect();
        invoices.sort_by(|a, b| {
            (a.due_date, a.invoice_date, &a.number).cmp(&(b.due_date, b.invoice_date, &b.number))
        });

        let mut remaining = payment.unapplied_amount;
        let mut applied_total = Decimal::ZERO;
        let mut outcomes = Vec::new();
        for invoice in invoices {
            if remaining <= Decimal::ZERO {
                break;
            }
            let amount = remaining.min(invoice.outstanding_amount);
            let outcome = match self.apply_payment(organization_id, payment.id, invoice.id, amount).await {
                Ok(applied) => {
                    remaining = applied.payment_unapplied;
                    applied_total += applied.amount_applied;
                    AllocationOutcome::Applied {
                        amount: applied.amount_applied,
                    }
                }
                Err(e) => {
                    warn!(
                        payment = %payment.number,
                        invoice = %invoice.number,
                        error = %e,
                        "Automatic allocation skipped invoice"
                    );
                    AllocationOutcome::Failed { reason: e.to_string() }
                }
            };
            outcomes.push(InvoiceAllocationOutcome {
                invoice: invoice.doc_ref(),
                outcome,
            });
        }

        info!(
            payment = %payment.number,
            %applied_total,
            unapplied = %remaining,
            invoices = outcomes.len(),
            "Payment auto-matched"
        );
        Ok(AutoMatchReport {
            payment: payment.doc_ref(),
            applied_total,
            unapplied_remaining: remaining,
            outcomes,
        })
    }
}

fn check_pair(payment: &Payment, invoice: &Invoice) -> Result<(), MatchingError> {
    if payment.customer_id != invoice.customer_id {
        return Err(MatchingError::CustomerMismatch {
            left: payment.number.clone(),
            right: invoice.number.clone(),
        });
    }
    if payment.currency != invoice.currency {
        return Err(MatchingError::CurrencyMismatch {
            left: payment.number.clone(),
            left_currency: payment.currency,
            right: invoice.number.clone(),
            right_currency: invoice.currency,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tally_shared::types::{Currency, ProductId};

    use crate::documents::PurchaseOrderLineStatus;
    use crate::test_support::{FlakyStore, Fixture, days_from_today};

    fn engine(fx: &Fixture) -> MatchingEngine {
        MatchingEngine::new(
            fx.stores.clone(),
            fx.audit.clone(),
            fx.locks.clone(),
            MatchingConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_match_commits_and_updates_po_line() {
        let fx = Fixture::new();
        let product = ProductId::new();
        let po = fx.approved_po(&[(product, dec!(100), dec!(10.00))]).await;
        let invoice = fx.approved_invoice("INV-1", &[(product, dec!(100), dec!(10.20))]).await;

        let result = engine(&fx).match_invoice_to_po(fx.org, invoice.id, po.id).await.unwrap();

        assert!(result.matched);
        let po = fx.stores.purchase_orders.get(fx.org, po.id).await.unwrap();
        assert_eq!(po.lines[0].quantity_invoiced, dec!(100));
        assert_eq!(po.lines[0].amount_invoiced, dec!(1020.00));
        assert_eq!(po.lines[0].status, PurchaseOrderLineStatus::FullyInvoiced);

        let invoice = fx.stores.invoices.get(fx.org, invoice.id).await.unwrap();
        assert_eq!(invoice.match_status, MatchStatus::Matched);
        assert_eq!(invoice.lines[0].po_line_number, Some(1));
        assert_eq!(
            fx.audit.actions_for(invoice.id).await,
            vec!["matched_to_purchase_order".to_string()]
        );
    }

    #[tokio::test]
    async fn test_declared_po_reference_gives_three_way_status() {
        let fx = Fixture::new();
        let product = ProductId::new();
        let po = fx.approved_po(&[(product, dec!(10), dec!(5.00))]).await;
        let mut invoice = fx.approved_invoice("INV-1", &[(product, dec!(10), dec!(5.00))]).await;
        invoice.purchase_order = Some(po.doc_ref());
        let invoice = fx.stores.invoices.save(invoice).await.unwrap();

        engine(&fx).match_invoice_to_po(fx.org, invoice.id, po.id).await.unwrap();

        let invoice = fx.stores.invoices.get(fx.org, invoice.id).await.unwrap();
        assert_eq!(invoice.match_status, MatchStatus::ThreeWayMatched);
    }

    #[tokio::test]
    async fn test_rejected_match_changes_nothing() {
        let fx = Fixture::new();
        let product = ProductId::new();
        let po = fx.approved_po(&[(product, dec!(100), dec!(10.00))]).await;
        let invoice = fx.approved_invoice("INV-1", &[(product, dec!(100), dec!(12.00))]).await;

        let result = engine(&fx).match_invoice_to_po(fx.org, invoice.id, po.id).await.unwrap();

        assert!(!result.matched);
        assert!(result.confidence < dec!(90));
        let po = fx.stores.purchase_orders.get(fx.org, po.id).await.unwrap();
        assert_eq!(po.lines[0].quantity_invoiced, dec!(0));
        assert!(fx.audit.events().await.is_empty());
    }

    #[tokio::test]
    async fn test_matching_twice_is_idempotent() {
        let fx = Fixture::new();
        let product = ProductId::new();
        let po = fx.approved_po(&[(product, dec!(100), dec!(10.00))]).await;
        let invoice = fx.approved_invoice("INV-1", &[(product, dec!(60), dec!(10.00))]).await;
        let mut config = MatchingConfig::default();
        config.quantity_tolerance = dec!(0.5);
        config.amount_tolerance = dec!(500);
        let engine = MatchingEngine::new(fx.stores.clone(), fx.audit.clone(), fx.locks.clone(), config);

        engine.match_invoice_to_po(fx.org, invoice.id, po.id).await.unwrap();
        engine.match_invoice_to_po(fx.org, invoice.id, po.id).await.unwrap();

        let po = fx.stores.purchase_orders.get(fx.org, po.id).await.unwrap();
        assert_eq!(po.lines[0].quantity_invoiced, dec!(60));
        assert_eq!(po.lines[0].allocations.len(), 1);
    }

    #[tokio::test]
    async fn test_interrupted_match_converges_on_retry() {
        let invoices = Arc::new(FlakyStore::<Invoice>::new());
        let mut stores = Stores::in_memory();
        stores.invoices = invoices.clone();
        let fx = Fixture::with_stores(stores);
        let product = ProductId::new();
        let po = fx.approved_po(&[(product, dec!(100), dec!(10.00))]).await;
        let invoice = fx.approved_invoice("INV-1", &[(product, dec!(100), dec!(10.00))]).await;
        let engine = engine(&fx);

        invoices.fail_next_save();
        assert!(engine.match_invoice_to_po(fx.org, invoice.id, po.id).await.is_err());
        let half_done = fx.stores.purchase_orders.get(fx.org, po.id).await.unwrap();
        assert_eq!(half_done.lines[0].quantity_invoiced, dec!(100));

        let result = engine.match_invoice_to_po(fx.org, invoice.id, po.id).await.unwrap();

        assert!(result.matched);
        let po = fx.stores.purchase_orders.get(fx.org, po.id).await.unwrap();
        assert_eq!(po.lines[0].quantity_invoiced, dec!(100));
        let invoice = fx.stores.invoices.get(fx.org, invoice.id).await.unwrap();
        assert_eq!(invoice.match_status, MatchStatus::Matched);
    }

    #[tokio::test]
    async fn test_invoice_matched_elsewhere_is_rejected() {
        let fx = Fixture::new();
        let product = ProductId::new();
        let first = fx.approved_po(&[(product, dec!(100), dec!(10.00))]).await;
        let second = fx.approved_po(&[(product, dec!(100), dec!(10.00))]).await;
        let invoice = fx.approved_invoice("INV-1", &[(product, dec!(100), dec!(10.00))]).await;
        let engine = engine(&fx);

        engine.match_invoice_to_po(fx.org, invoice.id, first.id).await.unwrap();
        let err = engine
            .match_invoice_to_po(fx.org, invoice.id, second.id)
            .await
            .unwrap_err();

        assert!(matches!(err, MatchingError::AlreadyMatched { .. }));
    }

    #[tokio::test]
    async fn test_payment_application_limits() {
        let fx = Fixture::new();
        let product = ProductId::new();
        let invoice = fx.approved_invoice("INV-1", &[(product, dec!(1), dec!(300))]).await;
        let payment = fx.cleared_payment("PAY-1", dec!(500)).await;
        let engine = engine(&fx);

        let over_invoice = engine
            .match_payment_to_invoice(fx.org, payment.id, invoice.id, dec!(301))
            .await;
        assert!(matches!(over_invoice, Err(MatchingError::Validation(_))));

        let applied = engine
            .match_payment_to_invoice(fx.org, payment.id, invoice.id, dec!(300))
            .await
            .unwrap();
        assert_eq!(applied.payment_unapplied, dec!(200));
        assert_eq!(applied.invoice_outstanding, dec!(0));

        let invoice = fx.stores.invoices.get(fx.org, invoice.id).await.unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Paid);
    }

    #[tokio::test]
    async fn test_payment_for_other_customer_is_rejected() {
        let fx = Fixture::new();
        let invoice = fx.approved_invoice("INV-1", &[(ProductId::new(), dec!(1), dec!(300))]).await;
        let mut payment = Payment::new(fx.org, "PAY-X", CustomerId::new(), days_from_today(0), dec!(100), Currency::Usd);
        payment.clear().unwrap();
        let payment = fx.stores.payments.save(payment).await.unwrap();

        let err = engine(&fx)
            .match_payment_to_invoice(fx.org, payment.id, invoice.id, dec!(100))
            .await
            .unwrap_err();

        assert!(matches!(err, MatchingError::CustomerMismatch { .. }));
    }

    #[tokio::test]
    async fn test_auto_match_allocates_oldest_due_first() {
        let fx = Fixture::new();
        let product = ProductId::new();
        let later = fx
            .approved_invoice_due("INV-2", days_from_today(40), &[(product, dec!(1), dec!(300))])
            .await;
        let earlier = fx
            .approved_invoice_due("INV-1", days_from_today(10), &[(product, dec!(1), dec!(300))])
            .await;
        let payment = fx.cleared_payment("PAY-1", dec!(500)).await;

        let report = engine(&fx).auto_match_payment(fx.org, payment.id).await.unwrap();

        assert_eq!(report.applied_total, dec!(500));
        assert_eq!(report.unapplied_remaining, dec!(0));
        assert_eq!(report.outcomes[0].invoice.id, earlier.id);
        assert_eq!(report.outcomes[0].outcome, AllocationOutcome::Applied { amount: dec!(300) });
        assert_eq!(report.outcomes[1].invoice.id, later.id);
        assert_eq!(report.outcomes[1].outcome, AllocationOutcome::Applied { amount: dec!(200) });

        let later = fx.stores.invoices.get(fx.org, later.id).await.unwrap();
        assert_eq!(later.outstanding_amount, dec!(100));
        assert_eq!(later.status, InvoiceStatus::PartiallyPaid);
    }

    #[tokio::test]
    async fn test_interrupted_application_is_repaired() {
        let invoices = Arc::new(FlakyStore::<Invoice>::new());
        let mut stores = Stores::in_memory();
        stores.invoices = invoices.clone();
        let fx = Fixture::with_stores(stores);
        let invoice = fx.approved_invoice("INV-1", &[(ProductId::new(), dec!(1), dec!(300))]).await;
        let payment = fx.cleared_payment("PAY-1", dec!(500)).await;
        let engine = engine(&fx);

        invoices.fail_next_save();
        assert!(engine
            .match_payment_to_invoice(fx.org, payment.id, invoice.id, dec!(100))
            .await
            .is_err());

        // The payment side committed; the retry must see only 200 left.
        let retry = engine
            .match_payment_to_invoice(fx.org, payment.id, invoice.id, dec!(250))
            .await;
        assert!(matches!(retry, Err(MatchingError::Validation(_))));

        engine
            .match_payment_to_invoice(fx.org, payment.id, invoice.id, dec!(200))
            .await
            .unwrap();
        let invoice = fx.stores.invoices.get(fx.org, invoice.id).await.unwrap();
        assert_eq!(invoice.amount_paid, dec!(300));
        assert_eq!(invoice.receipts.len(), 1);
    }

    #[tokio::test]
    async fn test_batch_match_buckets_invoices() {
        let fx = Fixture::new();
        let a = ProductId::new();
        let b = ProductId::new();
        let c = ProductId::new();
        fx.approved_po(&[(a, dec!(10), dec!(10.00))]).await;
        fx.approved_po(&[
            (b, dec!(10), dec!(10.00)),
            (b, dec!(10), dec!(10.00)),
            (b, dec!(10), dec!(10.00)),
            (b, dec!(10), dec!(10.00)),
        ])
        .await;
        fx.approved_invoice("INV-OK", &[(a, dec!(10), dec!(10.00))]).await;
        // 4 of 5 lines match: 80% confidence lands in review.
        fx.approved_invoice(
            "INV-REVIEW",
            &[
                (b, dec!(10), dec!(10.00)),
                (b, dec!(10), dec!(10.00)),
                (b, dec!(10), dec!(10.00)),
                (b, dec!(10), dec!(10.00)),
                (c, dec!(1), dec!(1.00)),
            ],
        )
        .await;
        fx.approved_invoice("INV-NONE", &[(c, dec!(1), dec!(1.00))]).await;

        let report = engine(&fx).batch_match_invoices(fx.org, fx.customer).await.unwrap();

        assert_eq!(report.succeeded.len(), 1);
        assert_eq!(report.succeeded[0].reference, "INV-OK");
        assert_eq!(report.needs_review.len(), 1);
        assert_eq!(report.needs_review[0].reference, "INV-REVIEW");
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].reference, "INV-NONE");
        assert!(report.failed.is_empty());
    }

    #[tokio::test]
    async fn test_three_way_match_is_fail_fast() {
        let fx = Fixture::new();
        let product = ProductId::new();
        let po = fx.approved_po(&[(product, dec!(100), dec!(10.00))]).await;
        let invoice = fx.approved_invoice("INV-1", &[(product, dec!(100), dec!(12.00))]).await;
        let payment = fx.cleared_payment("PAY-1", dec!(1200)).await;

        let result = engine(&fx)
            .complete_three_way_match(fx.org, po.id, invoice.id, payment.id)
            .await
            .unwrap();

        assert!(!result.is_complete());
        assert!(result.payment_match.is_none());
        let payment = fx.stores.payments.get(fx.org, payment.id).await.unwrap();
        assert_eq!(payment.unapplied_amount, dec!(1200));
    }

    #[tokio::test]
    async fn test_three_way_match_applies_payment() {
        let fx = Fixture::new();
        let product = ProductId::new();
        let po = fx.approved_po(&[(product, dec!(100), dec!(10.00))]).await;
        let invoice = fx.approved_invoice("INV-1", &[(product, dec!(100), dec!(10.00))]).await;
        let payment = fx.cleared_payment("PAY-1", dec!(1500)).await;

        let result = engine(&fx)
            .complete_three_way_match(fx.org, po.id, invoice.id, payment.id)
            .await
            .unwrap();

        assert!(result.is_complete());
        let applied = result.payment_match.unwrap();
        assert_eq!(applied.amount_applied, dec!(1000));
        assert_eq!(applied.payment_unapplied, dec!(500));
    }
}
