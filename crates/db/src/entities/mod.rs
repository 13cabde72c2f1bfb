//! `SeaORM` entities.

pub mod recon_audit_events;
pub mod recon_documents;
pub mod recon_gl_postings;
