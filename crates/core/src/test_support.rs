//! Fixtures shared by service tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use tally_shared::types::{
    Currency, CustomerId, OrganizationId, PageRequest, PageResponse, ProductId, UserId,
};

use crate::documents::{
    Deduction, Document, Invoice, InvoiceLine, Payment, PurchaseOrder, PurchaseOrderLine,
    PurchaseOrderStatus,
};
use crate::ports::{KeyedLocks, MemoryAuditSink, MemoryStore, Repository, StoreError, StoreResult, Stores};
use crate::workflow::{Actor, UserRole};

pub(crate) fn today() -> NaiveDate {
    Utc::now().date_naive()
}

pub(crate) fn days_from_today(days: i64) -> NaiveDate {
    today() + Duration::days(days)
}

pub(crate) fn approver() -> Actor {
    Actor::new(UserId::new(), UserRole::Approver)
}

pub(crate) fn admin() -> Actor {
    Actor::new(UserId::new(), UserRole::Admin)
}

/// Memory store where one upcoming save can be made to fail.
#[derive(Debug)]
pub(crate) struct FlakyStore<T: Document> {
    inner: MemoryStore<T>,
    // Saves left until the failing one; 0 = never fail.
    countdown: AtomicUsize,
}

impl<T: Document> FlakyStore<T> {
    pub(crate) fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            countdown: AtomicUsize::new(0),
        }
    }

    pub(crate) fn fail_next_save(&self) {
        self.fail_nth_save(1);
    }

    /// Makes the `n`th save from now fail; the ones before it succeed.
    pub(crate) fn fail_nth_save(&self, n: usize) {
        self.countdown.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl<T: Document> Repository<T> for FlakyStore<T> {
    async fn find_by_id(&self, organization_id: OrganizationId, id: T::Id) -> StoreResult<Option<T>> {
        self.inner.find_by_id(organization_id, id).await
    }

    async fn find(
        &self,
        organization_id: OrganizationId,
        filter: &T::Filter,
        page: PageRequest,
    ) -> StoreResult<PageResponse<T>> {
        self.inner.find(organization_id, filter, page).await
    }

    async fn save(&self, document: T) -> StoreResult<T> {
        let remaining = self
            .countdown
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .unwrap_or_else(|n| n);
        if remaining == 1 {
            return Err(StoreError::Backend("connection reset".to_string()));
        }
        self.inner.save(document).await
    }

    async fn count(&self, organization_id: OrganizationId, filter: &T::Filter) -> StoreResult<u64> {
        self.inner.count(organization_id, filter).await
    }
}

/// One organization and customer with empty in-memory stores.
pub(crate) struct Fixture {
    pub org: OrganizationId,
    pub customer: CustomerId,
    pub stores: Stores,
    pub audit: Arc<MemoryAuditSink>,
    pub locks: KeyedLocks,
}

impl Fixture {
    pub(crate) fn new() -> Self {
        Self::with_stores(Stores::in_memory())
    }

    pub(crate) fn with_stores(stores: Stores) -> Self {
        Self {
            org: OrganizationId::new(),
            customer: CustomerId::new(),
            stores,
            audit: Arc::new(MemoryAuditSink::new()),
            locks: KeyedLocks::new(),
        }
    }

    /// Saves an approved order with one line per `(product, quantity, price)`.
    pub(crate) async fn approved_po(&self, lines: &[(ProductId, Decimal, Decimal)]) -> PurchaseOrder {
        let lines = lines
            .iter()
            .zip(1..)
            .map(|(&(product, quantity, price), n)| PurchaseOrderLine::new(n, product, quantity, price))
            .collect();
        let mut po = PurchaseOrder::new(
            self.org,
            "PO-1001",
            self.customer,
            days_from_today(-2),
            Currency::Usd,
            lines,
        );
        po.status = PurchaseOrderStatus::Approved;
        self.stores.purchase_orders.save(po).await.unwrap()
    }

    /// Saves an approved invoice due in 30 days.
    pub(crate) async fn approved_invoice(&self, number: &str, lines: &[(ProductId, Decimal, Decimal)]) -> Invoice {
        self.approved_invoice_due(number, days_from_today(30), lines).await
    }

    pub(crate) async fn approved_invoice_due(
        &self,
        number: &str,
        due_date: NaiveDate,
        lines: &[(ProductId, Decimal, Decimal)],
    ) -> Invoice {
        let lines = lines
            .iter()
            .zip(1..)
            .map(|(&(product, quantity, price), n)| InvoiceLine::new(n, product, quantity, price))
            .collect();
        let mut invoice = Invoice::new(
            self.org,
            number,
            self.customer,
            today().min(due_date),
            due_date,
            Currency::Usd,
            lines,
        );
        invoice.approve().unwrap();
        self.stores.invoices.save(invoice).await.unwrap()
    }

    pub(crate) async fn cleared_payment(&self, number: &str, amount: Decimal) -> Payment {
        let mut payment = Payment::new(self.org, number, self.customer, today(), amount, Currency::Usd);
        payment.clear().unwrap();
        self.stores.payments.save(payment).await.unwrap()
    }

    pub(crate) async fn approved_deduction(&self, number: &str, amount: Decimal) -> Deduction {
        let mut deduction = Deduction::new(
            self.org,
            number,
            self.customer,
            today(),
            amount,
            Currency::Usd,
            "Short shipment",
        );
        deduction.approve().unwrap();
        self.stores.deductions.save(deduction).await.unwrap()
    }
}
