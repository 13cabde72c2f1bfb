//! Multi-currency conversion for base-currency reporting.

pub mod conversion;

pub use conversion::{convert_amount, convert_to, to_base_amount};
