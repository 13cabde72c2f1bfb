//! Audit trail and GL outbox migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();
        db.execute_unprepared(AUDIT_SQL).await?;
        db.execute_unprepared(OUTBOX_SQL).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();
        db.execute_unprepared(
            "DROP TABLE IF EXISTS recon_gl_postings CASCADE;
             DROP TABLE IF EXISTS recon_audit_events CASCADE;",
        )
        .await?;
        Ok(())
    }
}

const AUDIT_SQL: &str = r"
-- Append-only audit trail
CREATE TABLE recon_audit_events (
    id UUID PRIMARY KEY,
    organization_id UUID NOT NULL,
    entity_kind VARCHAR(32) NOT NULL,
    entity_id UUID NOT NULL,
    action VARCHAR(64) NOT NULL,
    actor_id UUID,
    before JSONB,
    after JSONB,
    occurred_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE INDEX idx_recon_audit_entity
    ON recon_audit_events(organization_id, entity_id, occurred_at);

CREATE OR REPLACE FUNCTION recon_audit_events_immutable()
RETURNS TRIGGER AS $$
BEGIN
    RAISE EXCEPTION 'recon_audit_events is append-only';
END;
$$ LANGUAGE plpgsql;

CREATE TRIGGER trg_recon_audit_events_immutable
    BEFORE UPDATE OR DELETE ON recon_audit_events
    FOR EACH ROW EXECUTE FUNCTION recon_audit_events_immutable();
";

const OUTBOX_SQL: &str = r"
-- One balanced posting per settlement, picked up by the GL export job
CREATE TABLE recon_gl_postings (
    settlement_id UUID PRIMARY KEY,
    organization_id UUID NOT NULL,
    settlement_number VARCHAR(64) NOT NULL,
    customer_id UUID NOT NULL,
    currency VARCHAR(3) NOT NULL,
    posting_date DATE NOT NULL,
    total_debits NUMERIC(19, 4) NOT NULL,
    total_credits NUMERIC(19, 4) NOT NULL,
    lines JSONB NOT NULL,
    exported_at TIMESTAMPTZ,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    CONSTRAINT chk_recon_gl_postings_balanced CHECK (total_debits = total_credits)
);

CREATE INDEX idx_recon_gl_postings_pending
    ON recon_gl_postings(organization_id, created_at)
    WHERE exported_at IS NULL;
";
