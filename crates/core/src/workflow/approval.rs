//! Approval rules and approval chains.
//!
//! Rules are matched by document type and amount range. Every matching
//! rule contributes one step to the chain; steps run from the lowest
//! required role upwards and each needs a different approver.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tally_shared::config::{ApprovalConfig, ApprovalRuleConfig};
use tally_shared::types::UserId;

use crate::workflow::error::ApprovalError;

/// User role in the organization hierarchy.
///
/// Roles are ordered from lowest to highest privilege.
/// Higher roles can perform all actions of lower roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    /// Read-only access.
    Viewer = 0,
    /// Can prepare and submit documents.
    Submitter = 1,
    /// Can approve documents within their limit.
    Approver = 2,
    /// Can approve and post documents.
    Accountant = 3,
    /// Full access except ownership transfer.
    Admin = 4,
    /// Full access including ownership transfer.
    Owner = 5,
}

impl UserRole {
    /// Parse a role from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "viewer" => Some(Self::Viewer),
            "submitter" => Some(Self::Submitter),
            "approver" => Some(Self::Approver),
            "accountant" => Some(Self::Accountant),
            "admin" => Some(Self::Admin),
            "owner" => Some(Self::Owner),
            _ => None,
        }
    }

    /// Returns the string representation of the role.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Viewer => "viewer",
            Self::Submitter => "submitter",
            Self::Approver => "approver",
            Self::Accountant => "accountant",
            Self::Admin => "admin",
            Self::Owner => "owner",
        }
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The user performing an approval action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    /// User ID.
    pub id: UserId,
    /// Role in the organization.
    pub role: UserRole,
    /// Approval limit; only enforced for the `Approver` role.
    pub approval_limit: Option<Decimal>,
}

impl Actor {
    /// Creates an actor without an approval limit.
    #[must_use]
    pub const fn new(id: UserId, role: UserRole) -> Self {
        Self {
            id,
            role,
            approval_limit: None,
        }
    }

    /// Sets the approval limit.
    #[must_use]
    pub const fn with_limit(mut self, limit: Decimal) -> Self {
        self.approval_limit = Some(limit);
        self
    }

    /// Checks that the actor may approve a step requiring `required_role`
    /// for a document of `amount`.
    ///
    /// # Errors
    ///
    /// Returns `InsufficientRole` if the role is too low and
    /// `ExceedsApprovalLimit` if an approver's limit is below the amount.
    pub fn can_approve(&self, required_role: UserRole, amount: Decimal) -> Result<(), ApprovalError> {
        if self.role < required_role {
            return Err(ApprovalError::InsufficientRole {
                user_role: self.role.to_string(),
                required_role: required_role.to_string(),
            });
        }

        // Higher roles have unlimited authority
        if self.role == UserRole::Approver
            && let Some(limit) = self.approval_limit
            && amount.abs() > limit
        {
            return Err(ApprovalError::ExceedsApprovalLimit {
                amount: amount.abs(),
                limit,
            });
        }

        Ok(())
    }
}

/// A rule contributing one approval step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalRule {
    /// Human-readable name for the rule.
    pub name: String,
    /// Minimum amount for this rule to apply (inclusive, None = no minimum).
    pub min_amount: Option<Decimal>,
    /// Maximum amount for this rule to apply (inclusive, None = no maximum).
    pub max_amount: Option<Decimal>,
    /// Document types this rule applies to (empty = all).
    pub document_types: Vec<String>,
    /// The role required to approve matching documents.
    pub required_role: UserRole,
    /// Priority for ordering rules of the same role (lower = first).
    pub priority: i16,
}

impl ApprovalRule {
    /// Returns true if the rule applies to the document.
    #[must_use]
    pub fn applies_to(&self, document_type: &str, amount: Decimal) -> bool {
        let amount = amount.abs();
        let type_matches =
            self.document_types.is_empty() || self.document_types.iter().any(|t| t == document_type);
        let above_min = self.min_amount.is_none_or(|min| amount >= min);
        let below_max = self.max_amount.is_none_or(|max| amount <= max);
        type_matches && above_min && below_max
    }
}

impl TryFrom<&ApprovalRuleConfig> for ApprovalRule {
    type Error = ApprovalError;

    fn try_from(config: &ApprovalRuleConfig) -> Result<Self, Self::Error> {
        let required_role =
            UserRole::parse(&config.required_role).ok_or_else(|| ApprovalError::UnknownRole {
                rule: config.name.clone(),
                role: config.required_role.clone(),
            })?;
        Ok(Self {
            name: config.name.clone(),
            min_amount: config.min_amount,
            max_amount: config.max_amount,
            document_types: config.document_types.clone(),
            required_role,
            priority: config.priority,
        })
    }
}

/// Produces the approval chain for a document.
pub trait ApprovalPolicy: Send + Sync {
    /// Returns the ordered steps a document must pass.
    fn approval_chain(&self, document_type: &str, amount: Decimal) -> Vec<ApprovalStep>;
}

/// Approval policy driven by configured rules.
#[derive(Debug, Clone)]
pub struct RuleBasedApprovalPolicy {
    rules: Vec<ApprovalRule>,
    default_role: UserRole,
}

impl Default for RuleBasedApprovalPolicy {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl RuleBasedApprovalPolicy {
    /// Creates a policy from rules; documents no rule covers need one
    /// `Approver` sign-off.
    #[must_use]
    pub fn new(rules: Vec<ApprovalRule>) -> Self {
        Self {
            rules,
            default_role: UserRole::Approver,
        }
    }

    /// Builds the policy from configuration.
    ///
    /// # Errors
    ///
    /// Returns `ApprovalError::UnknownRole` if a rule names an unknown role.
    pub fn from_config(config: &ApprovalConfig) -> Result<Self, ApprovalError> {
        let rules = config
            .rules
            .iter()
            .map(ApprovalRule::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(rules))
    }
}

impl ApprovalPolicy for RuleBasedApprovalPolicy {
    fn approval_chain(&self, document_type: &str, amount: Decimal) -> Vec<ApprovalStep> {
        let mut applicable: Vec<&ApprovalRule> = self
            .rules
            .iter()
            .filter(|r| r.applies_to(document_type, amount))
            .collect();

        if applicable.is_empty() {
            return vec![ApprovalStep::new("Default approval", self.default_role)];
        }

        applicable.sort_by_key(|r| (r.required_role, r.priority));
        applicable.dedup_by_key(|r| r.required_role);
        applicable
            .into_iter()
            .map(|r| ApprovalStep::new(r.name.clone(), r.required_role))
            .collect()
    }
}

/// One step of an approval chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalStep {
    /// Step name (rule name).
    pub name: String,
    /// Role required to approve the step.
    pub required_role: UserRole,
    /// Who approved the step.
    #[serde(default)]
    pub approved_by: Option<UserId>,
    /// When the step was approved.
    #[serde(default)]
    pub approved_at: Option<DateTime<Utc>>,
    /// Approver comments.
    #[serde(default)]
    pub comments: Option<String>,
}

impl ApprovalStep {
    /// Creates a pending step.
    #[must_use]
    pub fn new(name: impl Into<String>, required_role: UserRole) -> Self {
        Self {
            name: name.into(),
            required_role,
            approved_by: None,
            approved_at: None,
            comments: None,
        }
    }

    /// Returns true once approved.
    #[must_use]
    pub const fn is_approved(&self) -> bool {
        self.approved_by.is_some()
    }
}

/// Outcome recorded in the approval history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalAction {
    /// Step approved.
    Approved,
    /// Document rejected.
    Rejected,
}

/// Entry in the approval history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    /// Step the decision applied to.
    pub step: String,
    /// Deciding user.
    pub actor: UserId,
    /// Deciding user's role.
    pub role: UserRole,
    /// Approve or reject.
    pub action: ApprovalAction,
    /// Comments or rejection reason.
    #[serde(default)]
    pub comments: Option<String>,
    /// When the decision was made.
    pub decided_at: DateTime<Utc>,
}

/// Approval chain plus history, embedded in approvable documents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalState {
    /// Ordered steps.
    #[serde(default)]
    pub chain: Vec<ApprovalStep>,
    /// Every decision ever made, including on earlier chains.
    #[serde(default)]
    pub history: Vec<ApprovalDecision>,
}

impl ApprovalState {
    /// Replaces the chain with fresh steps. History is kept.
    pub fn start(&mut self, chain: Vec<ApprovalStep>) {
        self.chain = chain;
    }

    /// Returns true if a chain has been started.
    #[must_use]
    pub fn is_started(&self) -> bool {
        !self.chain.is_empty()
    }

    /// Returns true if every step is approved.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.is_started() && self.chain.iter().all(ApprovalStep::is_approved)
    }

    /// Returns the first step still awaiting approval.
    #[must_use]
    pub fn current_step(&self) -> Option<&ApprovalStep> {
        self.chain.iter().find(|s| !s.is_approved())
    }

    /// Approves the current step.
    ///
    /// Returns `true` when the chain is complete after this approval.
    ///
    /// # Errors
    ///
    /// Returns an error if no chain is active, the actor cannot approve the
    /// step, or already approved an earlier step.
    pub fn approve(
        &mut self,
        actor: &Actor,
        amount: Decimal,
        comments: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<bool, ApprovalError> {
        if !self.is_started() {
            return Err(ApprovalError::NoChain);
        }
        if self.chain.iter().any(|s| s.approved_by == Some(actor.id)) {
            return Err(ApprovalError::DuplicateApprover);
        }
        let step = self
            .chain
            .iter_mut()
            .find(|s| !s.is_approved())
            .ok_or(ApprovalError::ChainComplete)?;

        actor.can_approve(step.required_role, amount)?;

        step.approved_by = Some(actor.id);
        step.approved_at = Some(at);
        step.comments.clone_from(&comments);
        let step_name = step.name.clone();

        self.history.push(ApprovalDecision {
            step: step_name,
            actor: actor.id,
            role: actor.role,
            action: ApprovalAction::Approved,
            comments,
            decided_at: at,
        });
        Ok(self.is_complete())
    }

    /// Rejects the document, clearing approvals so the chain restarts on
    /// resubmission.
    ///
    /// # Errors
    ///
    /// Returns `RejectionReasonRequired` for a blank reason and
    /// `InsufficientRole` if the actor could not approve the current step.
    pub fn reject(
        &mut self,
        actor: &Actor,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<(), ApprovalError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(ApprovalError::RejectionReasonRequired);
        }
        let step_name = match self.current_step() {
            Some(step) => {
                if actor.role < step.required_role {
                    return Err(ApprovalError::InsufficientRole {
                        user_role: actor.role.to_string(),
                        required_role: step.required_role.to_string(),
                    });
                }
                step.name.clone()
            }
            None => String::new(),
        };

        for step in &mut self.chain {
            step.approved_by = None;
            step.approved_at = None;
            step.comments = None;
        }
        self.history.push(ApprovalDecision {
            step: step_name,
            actor: actor.id,
            role: actor.role,
            action: ApprovalAction::Rejected,
            comments: Some(reason.to_string()),
            decided_at: at,
        });
        Ok(())
    }
}
