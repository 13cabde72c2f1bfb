//! Field-mapping tables translating raw ERP JSON into a common
//! header-and-lines shape.
//!
//! Field locations are JSON pointers; line fields are relative to each
//! element of the lines array.

use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tally_shared::types::Currency;

use super::error::MappingError;

/// Supported ERP source systems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErpSystem {
    /// SAP ERP (IDoc-style field names).
    Sap,
    /// Oracle E-Business Suite receivables.
    Oracle,
    /// Plain JSON layout.
    Generic,
}

impl ErpSystem {
    /// Returns the string representation of the system.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Sap => "sap",
            Self::Oracle => "oracle",
            Self::Generic => "generic",
        }
    }

    /// Returns the field-mapping table of the system.
    #[must_use]
    pub const fn mapping(self) -> &'static FieldMapping {
        match self {
            Self::Sap => &SAP,
            Self::Oracle => &ORACLE,
            Self::Generic => &GENERIC,
        }
    }
}

impl FromStr for ErpSystem {
    type Err = MappingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sap" => Ok(Self::Sap),
            "oracle" => Ok(Self::Oracle),
            "generic" | "json" => Ok(Self::Generic),
            _ => Err(MappingError::UnsupportedSystem(s.to_string())),
        }
    }
}

impl std::fmt::Display for ErpSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where each field lives in a system's documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldMapping {
    /// Document number.
    pub number: &'static str,
    /// Customer code.
    pub customer_code: &'static str,
    /// Document date.
    pub document_date: &'static str,
    /// Due date.
    pub due_date: &'static str,
    /// ISO currency code.
    pub currency: &'static str,
    /// Header amount (payments).
    pub amount: &'static str,
    /// External reference (customer PO number, payment reference).
    pub reference: &'static str,
    /// Exchange rate to the base currency.
    pub exchange_rate: &'static str,
    /// Lines array.
    pub lines: &'static str,
    /// Line number, relative to a line.
    pub line_number: &'static str,
    /// Product code, relative to a line.
    pub product_code: &'static str,
    /// Description, relative to a line.
    pub description: &'static str,
    /// Quantity, relative to a line.
    pub quantity: &'static str,
    /// Unit price, relative to a line.
    pub unit_price: &'static str,
    /// Discount, relative to a line.
    pub discount: &'static str,
    /// Tax, relative to a line.
    pub tax: &'static str,
    /// `chrono` format of dates.
    pub date_format: &'static str,
}

/// SAP field names.
pub const SAP: FieldMapping = FieldMapping {
    number: "/HEADER/BELNR",
    customer_code: "/HEADER/KUNNR",
    document_date: "/HEADER/BLDAT",
    due_date: "/HEADER/ZFBDT",
    currency: "/HEADER/WAERS",
    amount: "/HEADER/WRBTR",
    reference: "/HEADER/BSTNK",
    exchange_rate: "/HEADER/KURSF",
    lines: "/ITEMS",
    line_number: "/POSNR",
    product_code: "/MATNR",
    description: "/ARKTX",
    quantity: "/MENGE",
    unit_price: "/NETPR",
    discount: "/RABAT",
    tax: "/MWSBP",
    date_format: "%Y%m%d",
};

/// Oracle receivables field names.
pub const ORACLE: FieldMapping = FieldMapping {
    number: "/TRX_NUMBER",
    customer_code: "/BILL_TO_CUSTOMER_NUMBER",
    document_date: "/TRX_DATE",
    due_date: "/DUE_DATE",
    currency: "/INVOICE_CURRENCY_CODE",
    amount: "/AMOUNT",
    reference: "/PURCHASE_ORDER",
    exchange_rate: "/EXCHANGE_RATE",
    lines: "/LINES",
    line_number: "/LINE_NUMBER",
    product_code: "/INVENTORY_ITEM",
    description: "/DESCRIPTION",
    quantity: "/QUANTITY_INVOICED",
    unit_price: "/UNIT_SELLING_PRICE",
    discount: "/DISCOUNT_AMOUNT",
    tax: "/TAX_AMOUNT",
    date_format: "%Y-%m-%d",
};

/// Plain JSON field names.
pub const GENERIC: FieldMapping = FieldMapping {
    number: "/number",
    customer_code: "/customer/code",
    document_date: "/date",
    due_date: "/due_date",
    currency: "/currency",
    amount: "/amount",
    reference: "/reference",
    exchange_rate: "/exchange_rate",
    lines: "/lines",
    line_number: "/line_number",
    product_code: "/product",
    description: "/description",
    quantity: "/quantity",
    unit_price: "/unit_price",
    discount: "/discount",
    tax: "/tax",
    date_format: "%Y-%m-%d",
};

/// One mapped line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappedLine {
    /// Line number (position when the source has none).
    pub line_number: u32,
    /// External product code.
    pub product_code: String,
    /// Description.
    pub description: Option<String>,
    /// Quantity.
    pub quantity: Decimal,
    /// Unit price.
    pub unit_price: Decimal,
    /// Discount.
    pub discount: Decimal,
    /// Tax.
    pub tax: Decimal,
}

/// A source document in the common shape, before customer and product
/// codes are resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappedDocument {
    /// Source system.
    pub system: ErpSystem,
    /// Document number.
    pub number: String,
    /// External customer code.
    pub customer_code: String,
    /// Document date.
    pub document_date: NaiveDate,
    /// Due date, if the source carries one.
    pub due_date: Option<NaiveDate>,
    /// Currency.
    pub currency: Currency,
    /// Header amount, if the source carries one.
    pub amount: Option<Decimal>,
    /// External reference.
    pub reference: Option<String>,
    /// Exchange rate, if the source carries one.
    pub exchange_rate: Option<Decimal>,
    /// Lines.
    pub lines: Vec<MappedLine>,
}

/// Maps a raw ERP document into the common shape.
///
/// Header-only documents such as payments map with no lines.
///
/// # Errors
///
/// Returns `MissingField` for an absent required field and `InvalidValue`
/// for unparseable decimals, dates or currencies.
pub fn map_document(system: ErpSystem, raw: &Value) -> Result<MappedDocument, MappingError> {
    let m = system.mapping();

    let lines = match raw.pointer(m.lines) {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .zip(1u32..)
            .map(|(item, position)| map_line(m, item, position))
            .collect::<Result<_, _>>()?,
        Some(other) => return Err(MappingError::invalid(m.lines, other.to_string(), "array")),
    };

    let currency_code = required_text(raw, m.currency)?;
    let currency = Currency::from_str(&currency_code)
        .map_err(|_| MappingError::invalid(m.currency, currency_code.clone(), "currency"))?;

    Ok(MappedDocument {
        system,
        number: required_text(raw, m.number)?,
        customer_code: required_text(raw, m.customer_code)?,
        document_date: parse_date(m.document_date, &required_text(raw, m.document_date)?, m.date_format)?,
        due_date: optional_text(raw, m.due_date)
            .map(|d| parse_date(m.due_date, &d, m.date_format))
            .transpose()?,
        currency,
        amount: optional_decimal(raw, m.amount)?,
        reference: optional_text(raw, m.reference),
        exchange_rate: optional_decimal(raw, m.exchange_rate)?,
        lines,
    })
}

fn map_line(m: &FieldMapping, item: &Value, position: u32) -> Result<MappedLine, MappingError> {
    let line_number = match optional_text(item, m.line_number) {
        Some(raw) => raw
            .parse::<u32>()
            .map_err(|_| MappingError::invalid(m.line_number, raw.clone(), "line number"))?,
        None => position,
    };
    Ok(MappedLine {
        line_number,
        product_code: required_text(item, m.product_code)?,
        description: optional_text(item, m.description),
        quantity: required_decimal(item, m.quantity)?,
        unit_price: required_decimal(item, m.unit_price)?,
        discount: optional_decimal(item, m.discount)?.unwrap_or_default(),
        tax: optional_decimal(item, m.tax)?.unwrap_or_default(),
    })
}

/// Reads a field as trimmed text. Numbers are rendered as written.
fn optional_text(value: &Value, pointer: &str) -> Option<String> {
    match value.pointer(pointer)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn required_text(value: &Value, pointer: &str) -> Result<String, MappingError> {
    optional_text(value, pointer).ok_or_else(|| MappingError::missing(pointer))
}

fn optional_decimal(value: &Value, pointer: &str) -> Result<Option<Decimal>, MappingError> {
    optional_text(value, pointer)
        .map(|raw| parse_decimal(pointer, &raw))
        .transpose()
}

fn required_decimal(value: &Value, pointer: &str) -> Result<Decimal, MappingError> {
    parse_decimal(pointer, &required_text(value, pointer)?)
}

/// Parses a decimal, accepting SAP's trailing minus sign (`"12.50-"`).
pub(crate) fn parse_decimal(field: &str, raw: &str) -> Result<Decimal, MappingError> {
    let (digits, negative) = match raw.strip_suffix('-') {
        Some(digits) => (digits, true),
        None => (raw, false),
    };
    let parsed = Decimal::from_str(digits.trim())
        .or_else(|_| Decimal::from_scientific(digits.trim()))
        .map_err(|_| MappingError::invalid(field, raw, "decimal"))?;
    Ok(if negative { -parsed } else { parsed })
}

fn parse_date(field: &str, raw: &str, format: &str) -> Result<NaiveDate, MappingError> {
    NaiveDate::parse_from_str(raw, format).map_err(|_| MappingError::invalid(field, raw, "date"))
}
