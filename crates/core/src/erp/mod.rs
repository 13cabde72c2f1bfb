//! ERP document import.
//!
//! Raw SAP, Oracle or plain JSON documents are mapped to a common shape
//! through static field tables, then converted into purchase orders,
//! invoices or payments once customer and product codes are resolved.

pub mod convert;
pub mod error;
pub mod mapping;

pub use convert::{CodeResolver, CodeTable};
pub use error::MappingError;
pub use mapping::{ErpSystem, FieldMapping, MappedDocument, MappedLine, map_document};
