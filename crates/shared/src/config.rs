//! Application configuration management.
//!
//! Every reconciliation tunable (tolerances, thresholds, GL accounts) lives
//! here with a serde default, so an empty config file reproduces the
//! documented defaults.

use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Database configuration.
    pub database: DatabaseConfig,
    /// Matching engine tolerances.
    #[serde(default)]
    pub matching: MatchingConfig,
    /// Accrual variance thresholds.
    #[serde(default)]
    pub accrual: AccrualConfig,
    /// Settlement and GL configuration.
    #[serde(default)]
    pub settlement: SettlementConfig,
    /// Approval rules.
    #[serde(default)]
    pub approval: ApprovalConfig,
    /// Batch runner configuration.
    #[serde(default)]
    pub batch: BatchConfig,
    /// Logging configuration.
    #[serde(default)]
    pub log: LogConfig,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Database connection URL.
    pub url: String,
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

/// Tolerances used when matching invoices to purchase orders.
#[derive(Debug, Clone, Deserialize)]
pub struct MatchingConfig {
    /// Maximum unit price variance as a fraction (0.05 = 5%).
    #[serde(default = "default_price_tolerance")]
    pub price_tolerance: Decimal,
    /// Maximum quantity variance as a fraction (0.02 = 2%).
    #[serde(default = "default_quantity_tolerance")]
    pub quantity_tolerance: Decimal,
    /// Maximum absolute difference between invoice and PO totals.
    #[serde(default = "default_amount_tolerance")]
    pub amount_tolerance: Decimal,
    /// Maximum days between PO order date and invoice date.
    #[serde(default = "default_date_window_days")]
    pub date_window_days: i64,
    /// Confidence at or above which a match is committed.
    #[serde(default = "default_auto_match_confidence")]
    pub auto_match_confidence: Decimal,
    /// Confidence at or above which a failed match is queued for review.
    #[serde(default = "default_review_confidence")]
    pub review_confidence: Decimal,
}

fn default_price_tolerance() -> Decimal {
    Decimal::new(5, 2)
}

fn default_quantity_tolerance() -> Decimal {
    Decimal::new(2, 2)
}

fn default_amount_tolerance() -> Decimal {
    Decimal::ONE_HUNDRED
}

fn default_date_window_days() -> i64 {
    30
}

fn default_auto_match_confidence() -> Decimal {
    Decimal::from(90)
}

fn default_review_confidence() -> Decimal {
    Decimal::from(70)
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            price_tolerance: default_price_tolerance(),
            quantity_tolerance: default_quantity_tolerance(),
            amount_tolerance: default_amount_tolerance(),
            date_window_days: default_date_window_days(),
            auto_match_confidence: default_auto_match_confidence(),
            review_confidence: default_review_confidence(),
        }
    }
}

/// Accrual variance thresholds, in percent.
#[derive(Debug, Clone, Deserialize)]
pub struct AccrualConfig {
    /// Below this absolute variance percent an accrual reconciles.
    #[serde(default = "default_reconcile_threshold")]
    pub reconcile_threshold_percent: Decimal,
    /// Above this absolute variance percent an accrual needs review.
    #[serde(default = "default_review_threshold")]
    pub review_threshold_percent: Decimal,
}

fn default_reconcile_threshold() -> Decimal {
    Decimal::from(5)
}

fn default_review_threshold() -> Decimal {
    Decimal::TEN
}

impl Default for AccrualConfig {
    fn default() -> Self {
        Self {
            reconcile_threshold_percent: default_reconcile_threshold(),
            review_threshold_percent: default_review_threshold(),
        }
    }
}

/// Settlement configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SettlementConfig {
    /// Allowed bank statement variance as a percent of the net settlement.
    #[serde(default = "default_bank_tolerance")]
    pub bank_tolerance_percent: Decimal,
    /// GL accounts used for settlement postings.
    #[serde(default)]
    pub gl_accounts: GlAccountConfig,
}

fn default_bank_tolerance() -> Decimal {
    Decimal::ONE
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            bank_tolerance_percent: default_bank_tolerance(),
            gl_accounts: GlAccountConfig::default(),
        }
    }
}

/// Chart of accounts codes referenced by settlement postings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GlAccountConfig {
    /// Accounts receivable.
    pub accounts_receivable: String,
    /// Cash / bank clearing.
    pub cash: String,
    /// Trade spend expense.
    pub trade_spend_expense: String,
    /// Settlement adjustments (credit/debit memos, manual adjustments).
    pub adjustments: String,
    /// Settlement clearing account that absorbs the net position.
    pub settlement_clearing: String,
}

impl Default for GlAccountConfig {
    fn default() -> Self {
        Self {
            accounts_receivable: "1200".to_string(),
            cash: "1000".to_string(),
            trade_spend_expense: "6100".to_string(),
            adjustments: "4900".to_string(),
            settlement_clearing: "2150".to_string(),
        }
    }
}

/// Approval rules evaluated by the approval policy.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApprovalConfig {
    /// Rules, matched by document type and amount range.
    #[serde(default)]
    pub rules: Vec<ApprovalRuleConfig>,
}

/// A single approval rule.
#[derive(Debug, Clone, Deserialize)]
pub struct ApprovalRuleConfig {
    /// Human-readable name.
    pub name: String,
    /// Minimum amount (inclusive).
    #[serde(default)]
    pub min_amount: Option<Decimal>,
    /// Maximum amount (inclusive).
    #[serde(default)]
    pub max_amount: Option<Decimal>,
    /// Document types this rule applies to (empty = all).
    #[serde(default)]
    pub document_types: Vec<String>,
    /// Role required for the approval step.
    pub required_role: String,
    /// Lower value = evaluated first.
    #[serde(default)]
    pub priority: i16,
}

/// Batch runner configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    /// Organizations processed by the batch runner.
    #[serde(default)]
    pub organizations: Vec<Uuid>,
    /// Maximum number of organizations processed concurrently.
    #[serde(default = "default_tenant_concurrency")]
    pub tenant_concurrency: usize,
}

fn default_tenant_concurrency() -> usize {
    4
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            organizations: Vec::new(),
            tenant_concurrency: default_tenant_concurrency(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Emit JSON log lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
    /// Default `EnvFilter` directive when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

fn default_log_filter() -> String {
    "tally=info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            json: false,
            filter: default_log_filter(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from environment and config files.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration cannot be loaded.
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{run_mode}")).required(false))
            .add_source(config::Environment::with_prefix("TALLY").separator("__"))
            .build()?;

        config.try_deserialize()
    }
}
