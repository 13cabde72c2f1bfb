//! Pure scoring of an invoice against a purchase order.
//!
//! Nothing here touches a store: [`evaluate_match`] is the dry run used by
//! both the committing path and the batch matcher.

use std::collections::HashMap;

use rust_decimal::Decimal;
use tally_shared::config::MatchingConfig;
use tracing::debug;

use super::error::MatchingError;
use super::types::{LineMatch, MatchException, MatchResult};
use crate::documents::{Invoice, InvoiceLine, PurchaseOrder, PurchaseOrderLine};

const HALF: Decimal = Decimal::from_parts(50, 0, 0, false, 0);

/// Relative difference of `actual` from `expected`.
///
/// A zero expectation yields zero when both are zero and 100% otherwise.
#[must_use]
pub fn variance_ratio(actual: Decimal, expected: Decimal) -> Decimal {
    if expected.is_zero() {
        return if actual.is_zero() { Decimal::ZERO } else { Decimal::ONE };
    }
    ((actual - expected) / expected).abs()
}

/// Line confidence: half from price agreement, half from quantity
/// agreement, floored at zero.
#[must_use]
pub fn line_confidence(price_variance: Decimal, quantity_variance: Decimal) -> Decimal {
    let score = HALF * (Decimal::ONE - price_variance) + HALF * (Decimal::ONE - quantity_variance);
    score.max(Decimal::ZERO).round_dp(2)
}

/// Evaluates an invoice against a purchase order without mutating either.
///
/// Availability on each PO line ignores allocations already made by this
/// invoice, so re-evaluating a committed match reproduces it.
///
/// # Errors
///
/// Returns `MatchingError::CustomerMismatch` if the documents belong to
/// different customers.
pub fn evaluate_match(
    invoice: &Invoice,
    po: &PurchaseOrder,
    config: &MatchingConfig,
) -> Result<MatchResult, MatchingError> {
    if invoice.customer_id != po.customer_id {
        return Err(MatchingError::CustomerMismatch {
            left: invoice.number.clone(),
            right: po.number.clone(),
        });
    }

    let exceptions = header_exceptions(invoice, po, config);

    let mut claimed: HashMap<u32, Decimal> = HashMap::new();
    let mut line_matches = Vec::new();
    let mut unmatched_lines = Vec::new();

    for line in &invoice.lines {
        match best_candidate(invoice, line, po, &claimed, config) {
            Some(found) => {
                *claimed.entry(found.po_line).or_insert(Decimal::ZERO) += found.quantity;
                line_matches.push(found);
            }
            None => unmatched_lines.push(line.line_number),
        }
    }

    let confidence = if invoice.lines.is_empty() {
        Decimal::ZERO
    } else {
        (Decimal::from(line_matches.len()) * Decimal::ONE_HUNDRED / Decimal::from(invoice.lines.len()))
            .round_dp(2)
    };
    let matched = exceptions.is_empty() && confidence >= config.auto_match_confidence;

    debug!(
        invoice = %invoice.number,
        purchase_order = %po.number,
        %confidence,
        matched,
        exceptions = exceptions.len(),
        "Evaluated invoice against purchase order"
    );

    Ok(MatchResult {
        invoice: invoice.doc_ref(),
        purchase_order: po.doc_ref(),
        matched,
        confidence,
        exceptions,
        line_matches,
        unmatched_lines,
    })
}

fn header_exceptions(invoice: &Invoice, po: &PurchaseOrder, config: &MatchingConfig) -> Vec<MatchException> {
    let mut exceptions = Vec::new();

    if invoice.lines.is_empty() {
        exceptions.push(MatchException::NoLines);
    }
    if !po.status.is_open_for_invoicing() {
        exceptions.push(MatchException::PurchaseOrderNotOpen { status: po.status });
    }
    if invoice.currency != po.currency {
        exceptions.push(MatchException::CurrencyMismatch {
            invoice: invoice.currency,
            purchase_order: po.currency,
        });
    }

    let difference = invoice.totals.total - po.totals.total;
    if difference.abs() > config.amount_tolerance {
        exceptions.push(MatchException::AmountVariance {
            invoice_total: invoice.totals.total,
            po_total: po.totals.total,
            difference,
        });
    }

    let days = (invoice.invoice_date - po.order_date).num_days().abs();
    if days > config.date_window_days {
        exceptions.push(MatchException::DateOutsideWindow {
            days,
            window_days: config.date_window_days,
        });
    }

    exceptions
}

fn best_candidate(
    invoice: &Invoice,
    line: &InvoiceLine,
    po: &PurchaseOrder,
    claimed: &HashMap<u32, Decimal>,
    config: &MatchingConfig,
) -> Option<LineMatch> {
    po.lines
        .iter()
        .filter(|po_line| po_line.product_id == line.product_id)
        .filter_map(|po_line| {
            let available = po_line.remaining_quantity_excluding(invoice.id)
                - claimed.get(&po_line.line_number).copied().unwrap_or_default();
            if available <= Decimal::ZERO {
                return None;
            }
            score_line(line, po_line, available, config)
        })
        // Highest confidence; on ties the lowest PO line number.
        .max_by(|a, b| a.confidence.cmp(&b.confidence).then(b.po_line.cmp(&a.po_line)))
}

fn score_line(
    line: &InvoiceLine,
    po_line: &PurchaseOrderLine,
    available: Decimal,
    config: &MatchingConfig,
) -> Option<LineMatch> {
    let price_variance = variance_ratio(line.unit_price, po_line.unit_price);
    let quantity_variance = variance_ratio(line.quantity, po_line.quantity);
    if price_variance > config.price_tolerance || quantity_variance > config.quantity_tolerance {
        return None;
    }
    let quantity = line.quantity.min(available);
    Some(LineMatch {
        invoice_line: line.line_number,
        po_line: po_line.line_number,
        product_id: line.product_id,
        quantity,
        amount: quantity * line.unit_price,
        price_variance,
        quantity_variance,
        confidence: line_confidence(price_variance, quantity_variance),
    })
}
