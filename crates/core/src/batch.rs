//! Per-item outcome accumulation for batch jobs.
//!
//! Batch loops never abort on one bad record: every item ends up in exactly
//! one bucket of a [`BatchReport`].

use serde::Serialize;
use tally_shared::types::OrganizationId;
use tracing::warn;

/// One item of a batch report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchItem {
    /// Document number (or other human reference).
    pub reference: String,
    /// Outcome detail.
    pub detail: String,
}

/// Outcome of a batch job for one organization.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    /// Job name.
    pub operation: String,
    /// Processed organization.
    pub organization_id: OrganizationId,
    /// Items committed.
    pub succeeded: Vec<BatchItem>,
    /// Items left for a person to look at.
    pub needs_review: Vec<BatchItem>,
    /// Items with nothing to do.
    pub skipped: Vec<BatchItem>,
    /// Items whose processing errored.
    pub failed: Vec<BatchItem>,
}

impl BatchReport {
    /// Creates an empty report.
    #[must_use]
    pub fn new(operation: impl Into<String>, organization_id: OrganizationId) -> Self {
        Self {
            operation: operation.into(),
            organization_id,
            succeeded: Vec::new(),
            needs_review: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
        }
    }

    /// Records a committed item.
    pub fn succeeded(&mut self, reference: impl Into<String>, detail: impl Into<String>) {
        self.succeeded.push(item(reference, detail));
    }

    /// Records an item that needs review.
    pub fn needs_review(&mut self, reference: impl Into<String>, detail: impl Into<String>) {
        self.needs_review.push(item(reference, detail));
    }

    /// Records a skipped item.
    pub fn skipped(&mut self, reference: impl Into<String>, detail: impl Into<String>) {
        self.skipped.push(item(reference, detail));
    }

    /// Records a failed item and logs it.
    pub fn failed(&mut self, reference: impl Into<String>, error: &dyn std::fmt::Display) {
        let failed = item(reference, error.to_string());
        warn!(
            operation = %self.operation,
            organization_id = %self.organization_id,
            reference = %failed.reference,
            error = %failed.detail,
            "Batch item failed"
        );
        self.failed.push(failed);
    }

    /// Total number of items seen.
    #[must_use]
    pub fn processed(&self) -> usize {
        self.succeeded.len() + self.needs_review.len() + self.skipped.len() + self.failed.len()
    }

    /// Returns true if no item failed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    /// Appends another report's items.
    pub fn merge(&mut self, other: Self) {
        self.succeeded.extend(other.succeeded);
        self.needs_review.extend(other.needs_review);
        self.skipped.extend(other.skipped);
        self.failed.extend(other.failed);
    }
}

fn item(reference: impl Into<String>, detail: impl Into<String>) -> BatchItem {
    BatchItem {
        reference: reference.into(),
        detail: detail.into(),
    }
}
