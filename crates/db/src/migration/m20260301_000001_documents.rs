//! Document table migration.
//!
//! Creates the single table holding every ledger document as JSONB.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();
        db.execute_unprepared(DOCUMENTS_SQL).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();
        db.execute_unprepared("DROP TABLE IF EXISTS recon_documents CASCADE;")
            .await?;
        Ok(())
    }
}

const DOCUMENTS_SQL: &str = r"
CREATE TABLE recon_documents (
    id UUID PRIMARY KEY,
    organization_id UUID NOT NULL,
    kind VARCHAR(32) NOT NULL,
    customer_id UUID,
    status VARCHAR(32) NOT NULL,
    document_date DATE NOT NULL,
    body JSONB NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    CONSTRAINT chk_recon_documents_kind CHECK (kind IN (
        'purchase_order', 'invoice', 'payment', 'deduction',
        'settlement', 'accrual', 'spend_agreement'
    ))
);

-- Repository scans: tenant + kind, ordered by business date
CREATE INDEX idx_recon_documents_scan
    ON recon_documents(organization_id, kind, document_date, id);

-- Per-customer scans (matching, settlement collection)
CREATE INDEX idx_recon_documents_customer
    ON recon_documents(organization_id, kind, customer_id, document_date)
    WHERE customer_id IS NOT NULL;

-- Status filters
CREATE INDEX idx_recon_documents_status
    ON recon_documents(organization_id, kind, status);
";
