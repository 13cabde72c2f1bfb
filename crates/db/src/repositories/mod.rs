//! Repository implementations of the core persistence ports.

mod audit_log;
mod document;
mod gl_outbox;

pub use audit_log::AuditLogRepository;
pub use document::DocumentRepository;
pub use gl_outbox::GlOutboxRepository;
