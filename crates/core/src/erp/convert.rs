//! Conversion of mapped ERP documents into ledger documents.

use std::collections::HashMap;

use rust_decimal::Decimal;
use tally_shared::types::{CustomerId, OrganizationId, ProductId, PurchaseOrderId};

use super::error::MappingError;
use super::mapping::{MappedDocument, MappedLine};
use crate::documents::{
    DocRef, Invoice, InvoiceLine, Payment, PurchaseOrder, PurchaseOrderLine,
};

/// Resolves external codes to internal identifiers.
pub trait CodeResolver {
    /// Resolves an ERP customer code.
    fn customer(&self, code: &str) -> Option<CustomerId>;

    /// Resolves an ERP product code.
    fn product(&self, code: &str) -> Option<ProductId>;

    /// Resolves a purchase-order number quoted on an invoice.
    fn purchase_order(&self, _number: &str) -> Option<PurchaseOrderId> {
        None
    }
}

/// In-memory code table.
#[derive(Debug, Clone, Default)]
pub struct CodeTable {
    /// Customer codes.
    pub customers: HashMap<String, CustomerId>,
    /// Product codes.
    pub products: HashMap<String, ProductId>,
    /// Purchase-order numbers.
    pub purchase_orders: HashMap<String, PurchaseOrderId>,
}

impl CodeTable {
    /// Registers a customer code.
    #[must_use]
    pub fn with_customer(mut self, code: impl Into<String>, id: CustomerId) -> Self {
        self.customers.insert(code.into(), id);
        self
    }

    /// Registers a product code.
    #[must_use]
    pub fn with_product(mut self, code: impl Into<String>, id: ProductId) -> Self {
        self.products.insert(code.into(), id);
        self
    }

    /// Registers a purchase-order number.
    #[must_use]
    pub fn with_purchase_order(mut self, number: impl Into<String>, id: PurchaseOrderId) -> Self {
        self.purchase_orders.insert(number.into(), id);
        self
    }
}

impl CodeResolver for CodeTable {
    fn customer(&self, code: &str) -> Option<CustomerId> {
        self.customers.get(code).copied()
    }

    fn product(&self, code: &str) -> Option<ProductId> {
        self.products.get(code).copied()
    }

    fn purchase_order(&self, number: &str) -> Option<PurchaseOrderId> {
        self.purchase_orders.get(number).copied()
    }
}

impl MappedDocument {
    /// Builds a draft purchase order.
    ///
    /// # Errors
    ///
    /// Returns `NoLines` for an empty document and `UnknownCustomer` or
    /// `UnknownProduct` for unresolved codes.
    pub fn into_purchase_order(
        self,
        organization_id: OrganizationId,
        resolver: &impl CodeResolver,
    ) -> Result<PurchaseOrder, MappingError> {
        let customer_id = self.resolve_customer(resolver)?;
        let lines = self.lines_with(resolver, |line, product| {
            let mut po_line =
                PurchaseOrderLine::new(line.line_number, product, line.quantity, line.unit_price);
            po_line.description.clone_from(&line.description);
            po_line.tax = line.tax;
            po_line.discount = line.discount;
            po_line
        })?;

        let mut order = PurchaseOrder::new(
            organization_id,
            self.number,
            customer_id,
            self.document_date,
            self.currency,
            lines,
        );
        order.expected_date = self.due_date;
        Ok(order)
    }

    /// Builds a draft invoice.
    ///
    /// A quoted purchase-order number is linked when the resolver knows it.
    ///
    /// # Errors
    ///
    /// Returns `MissingField` without a due date, `NoLines` for an empty
    /// document and `UnknownCustomer` or `UnknownProduct` for unresolved
    /// codes.
    pub fn into_invoice(
        self,
        organization_id: OrganizationId,
        resolver: &impl CodeResolver,
    ) -> Result<Invoice, MappingError> {
        let due_date = self
            .due_date
            .ok_or_else(|| MappingError::missing(self.system.mapping().due_date))?;
        let customer_id = self.resolve_customer(resolver)?;
        let lines = self.lines_with(resolver, |line, product| {
            let mut invoice_line =
                InvoiceLine::new(line.line_number, product, line.quantity, line.unit_price);
            invoice_line.description.clone_from(&line.description);
            invoice_line.tax = line.tax;
            invoice_line.discount = line.discount;
            invoice_line
        })?;

        let mut invoice = Invoice::new(
            organization_id,
            self.number,
            customer_id,
            self.document_date,
            due_date,
            self.currency,
            lines,
        );
        if let Some(rate) = self.exchange_rate.filter(|r| *r > Decimal::ZERO) {
            invoice.exchange_rate = rate;
        }
        invoice.purchase_order = self
            .reference
            .as_deref()
            .and_then(|number| resolver.purchase_order(number).map(|id| DocRef::new(id, number)));
        Ok(invoice)
    }

    /// Builds a pending payment.
    ///
    /// The header amount is used when present, otherwise the line total.
    ///
    /// # Errors
    ///
    /// Returns `MissingField` when neither a header amount nor lines are
    /// present and `UnknownCustomer` for an unresolved code.
    pub fn into_payment(
        self,
        organization_id: OrganizationId,
        resolver: &impl CodeResolver,
    ) -> Result<Payment, MappingError> {
        let customer_id = self.resolve_customer(resolver)?;
        let amount = match self.amount {
            Some(amount) => amount,
            None if !self.lines.is_empty() => self.lines.iter().map(MappedLine::net_amount).sum(),
            None => return Err(MappingError::missing(self.system.mapping().amount)),
        };
        if amount <= Decimal::ZERO {
            return Err(MappingError::invalid(
                self.system.mapping().amount,
                amount.to_string(),
                "positive amount",
            ));
        }

        let mut payment = Payment::new(
            organization_id,
            self.number,
            customer_id,
            self.document_date,
            self.currency.round(amount),
            self.currency,
        );
        payment.reference = self.reference;
        Ok(payment)
    }

    fn resolve_customer(&self, resolver: &impl CodeResolver) -> Result<CustomerId, MappingError> {
        resolver
            .customer(&self.customer_code)
            .ok_or_else(|| MappingError::UnknownCustomer(self.customer_code.clone()))
    }

    fn lines_with<L>(
        &self,
        resolver: &impl CodeResolver,
        build: impl Fn(&MappedLine, ProductId) -> L,
    ) -> Result<Vec<L>, MappingError> {
        if self.lines.is_empty() {
            return Err(MappingError::NoLines(self.number.clone()));
        }
        self.lines
            .iter()
            .map(|line| {
                resolver
                    .product(&line.product_code)
                    .map(|product| build(line, product))
                    .ok_or_else(|| MappingError::UnknownProduct(line.product_code.clone()))
            })
            .collect()
    }
}

impl MappedLine {
    /// Quantity times price, less discount, plus tax.
    #[must_use]
    pub fn net_amount(&self) -> Decimal {
        self.quantity * self.unit_price - self.discount + self.tax
    }
}
