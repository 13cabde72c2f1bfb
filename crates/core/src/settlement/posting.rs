//! General ledger posting generated from a completed settlement.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tally_shared::config::GlAccountConfig;
use tally_shared::types::{Currency, CustomerId, OrganizationId, SettlementId};

use super::error::SettlementError;
use crate::documents::{DocRef, Settlement, SettlementItemType};

/// One side of a GL line. Exactly one of `debit` and `credit` is non-zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlLine {
    /// GL account code.
    pub account: String,
    /// Debit amount.
    pub debit: Decimal,
    /// Credit amount.
    pub credit: Decimal,
    /// Line description.
    pub description: String,
}

impl GlLine {
    /// Creates a debit line.
    pub fn debit(account: impl Into<String>, amount: Decimal, description: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            debit: amount,
            credit: Decimal::ZERO,
            description: description.into(),
        }
    }

    /// Creates a credit line.
    pub fn credit(account: impl Into<String>, amount: Decimal, description: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            debit: Decimal::ZERO,
            credit: amount,
            description: description.into(),
        }
    }

    /// Creates a debit for a positive amount or a credit for a negative one.
    pub fn signed(account: impl Into<String>, amount: Decimal, description: impl Into<String>) -> Self {
        if amount < Decimal::ZERO {
            Self::credit(account, -amount, description)
        } else {
            Self::debit(account, amount, description)
        }
    }
}

/// Balanced journal for one settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlPosting {
    /// Source settlement.
    pub settlement: DocRef<SettlementId>,
    /// Owning organization.
    pub organization_id: OrganizationId,
    /// Settled customer.
    pub customer_id: CustomerId,
    /// Currency of every line.
    pub currency: Currency,
    /// Posting date.
    pub posting_date: NaiveDate,
    /// Journal lines.
    pub lines: Vec<GlLine>,
}

impl GlPosting {
    /// Sum of debits.
    #[must_use]
    pub fn total_debits(&self) -> Decimal {
        self.lines.iter().map(|l| l.debit).sum()
    }

    /// Sum of credits.
    #[must_use]
    pub fn total_credits(&self) -> Decimal {
        self.lines.iter().map(|l| l.credit).sum()
    }
}

/// Builds the journal for a settlement.
///
/// Invoices debit receivables, payments credit cash, deductions credit
/// trade spend expense, adjustments and memos hit the adjustments account
/// by sign, and the net lands on the clearing account. Zero lines are
/// omitted.
///
/// # Errors
///
/// Returns `UnbalancedPosting` or `InvalidPosting` if the result fails
/// [`validate_lines`].
pub fn build_posting(settlement: &Settlement, accounts: &GlAccountConfig) -> Result<GlPosting, SettlementError> {
    let mut lines: Vec<GlLine> = settlement
        .items
        .iter()
        .filter(|item| !item.amount.is_zero())
        .map(|item| {
            let description = format!("{} {}", item.item_type, item.reference_number);
            match item.item_type {
                SettlementItemType::Invoice => {
                    GlLine::debit(&accounts.accounts_receivable, item.amount, description)
                }
                SettlementItemType::Payment => GlLine::credit(&accounts.cash, item.amount, description),
                SettlementItemType::Deduction => {
                    GlLine::credit(&accounts.trade_spend_expense, item.amount, description)
                }
                SettlementItemType::Adjustment | SettlementItemType::DebitMemo => {
                    GlLine::signed(&accounts.adjustments, item.amount, description)
                }
                SettlementItemType::CreditMemo => {
                    GlLine::signed(&accounts.adjustments, -item.amount, description)
                }
            }
        })
        .collect();

    let net = settlement.totals.net_settlement;
    if !net.is_zero() {
        lines.push(GlLine::signed(
            &accounts.settlement_clearing,
            -net,
            format!("net settlement {}", settlement.number),
        ));
    }

    validate_lines(&lines)?;
    Ok(GlPosting {
        settlement: settlement.doc_ref(),
        organization_id: settlement.organization_id,
        customer_id: settlement.customer_id,
        currency: settlement.currency,
        posting_date: settlement.settlement_date,
        lines,
    })
}

/// Validates that posting lines are one-sided, positive and balanced.
///
/// # Errors
///
/// Returns `InvalidPosting` for an empty posting or a malformed line and
/// `UnbalancedPosting` if debits and credits differ.
pub fn validate_lines(lines: &[GlLine]) -> Result<(), SettlementError> {
    if lines.is_empty() {
        return Err(SettlementError::InvalidPosting("posting has no lines".to_string()));
    }

    let mut debits = Decimal::ZERO;
    let mut credits = Decimal::ZERO;
    for line in lines {
        let one_sided = (line.debit > Decimal::ZERO && line.credit.is_zero())
            || (line.credit > Decimal::ZERO && line.debit.is_zero());
        if !one_sided {
            return Err(SettlementError::InvalidPosting(format!(
                "line on {} must carry one positive side",
                line.account
            )));
        }
        debits += line.debit;
        credits += line.credit;
    }

    if debits != credits {
        return Err(SettlementError::UnbalancedPosting { debits, credits });
    }
    Ok(())
}
