//! General ledger gateway port.

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::settlement::posting::GlPosting;

/// Error returned by GL gateways.
#[derive(Debug, thiserror::Error)]
#[error("GL gateway error: {0}")]
pub struct GatewayError(pub String);

/// Hands balanced postings to the general ledger.
#[async_trait]
pub trait GlGateway: Send + Sync {
    /// Submits one posting. Implementations must be idempotent per
    /// settlement ID.
    async fn submit(&self, posting: &GlPosting) -> Result<(), GatewayError>;
}

/// Collects postings in memory; used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryGlGateway {
    postings: Mutex<Vec<GlPosting>>,
}

impl MemoryGlGateway {
    /// Creates an empty gateway.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the submitted postings.
    pub async fn postings(&self) -> Vec<GlPosting> {
        self.postings.lock().await.clone()
    }
}

#[async_trait]
impl GlGateway for MemoryGlGateway {
    async fn submit(&self, posting: &GlPosting) -> Result<(), GatewayError> {
        let mut postings = self.postings.lock().await;
        postings.retain(|p| p.settlement.id != posting.settlement.id);
        postings.push(posting.clone());
        Ok(())
    }
}
