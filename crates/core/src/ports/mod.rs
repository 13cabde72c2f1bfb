//! Ports to persistence and external collaborators.
//!
//! Services depend only on these traits; `tally-db` provides the database
//! implementations and this module ships in-memory ones.

pub mod audit;
pub mod ledger;
pub mod locks;
pub mod memory;
pub mod store;

use std::sync::Arc;

pub use audit::{AuditError, AuditEvent, AuditSink, MemoryAuditSink, TracingAuditSink, emit};
pub use ledger::{GatewayError, GlGateway, MemoryGlGateway};
pub use locks::{KeyGuard, KeyedLocks};
pub use memory::MemoryStore;
pub use store::{FIND_ALL_PAGE_SIZE, Repository, StoreError, StoreResult, prepare_for_save};

use crate::documents::{
    Accrual, Deduction, Invoice, Payment, PurchaseOrder, Settlement, SpendAgreement,
};

/// One repository per document type.
#[derive(Clone)]
pub struct Stores {
    /// Purchase orders.
    pub purchase_orders: Arc<dyn Repository<PurchaseOrder>>,
    /// Invoices.
    pub invoices: Arc<dyn Repository<Invoice>>,
    /// Payments.
    pub payments: Arc<dyn Repository<Payment>>,
    /// Deductions.
    pub deductions: Arc<dyn Repository<Deduction>>,
    /// Settlements.
    pub settlements: Arc<dyn Repository<Settlement>>,
    /// Accruals.
    pub accruals: Arc<dyn Repository<Accrual>>,
    /// Spend agreements.
    pub spend_agreements: Arc<dyn Repository<SpendAgreement>>,
}

impl Stores {
    /// Creates empty in-memory stores.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            purchase_orders: Arc::new(MemoryStore::new()),
            invoices: Arc::new(MemoryStore::new()),
            payments: Arc::new(MemoryStore::new()),
            deductions: Arc::new(MemoryStore::new()),
            settlements: Arc::new(MemoryStore::new()),
            accruals: Arc::new(MemoryStore::new()),
            spend_agreements: Arc::new(MemoryStore::new()),
        }
    }
}

impl std::fmt::Debug for Stores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stores").finish_non_exhaustive()
    }
}
