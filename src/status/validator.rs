//! Unified Transition Validator
//!
//! Pure, re-entrant check of `(current, proposed, type)` against the flow
//! tables. Always safe to re-run against freshly reloaded state.

use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use super::flows::StatusFlows;
use super::unified::{
    Loose, StatusContext, StatusPhase, UnifiedTransactionStatus, UnifiedTransactionType,
};
use crate::error::StatusError;

/// Why a transition was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationFailure {
    UnknownStatus,
    UnknownTransactionType,
    NoFlowRules,
    SameStatus,
    NotAllowed,
    RequiresAdmin,
}

/// Structured verdict returned by the validator
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub current_status: Option<UnifiedTransactionStatus>,
    pub new_status: Option<UnifiedTransactionStatus>,
    pub transaction_type: Option<UnifiedTransactionType>,
    pub current_phase: Option<StatusPhase>,
    pub new_phase: Option<StatusPhase>,
    /// Every status reachable from `current_status`
    pub allowed_transitions: Vec<UnifiedTransactionStatus>,
    pub failure: Option<ValidationFailure>,
    pub error: Option<String>,
}

impl ValidationResult {
    fn rejected(failure: ValidationFailure, error: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            current_status: None,
            new_status: None,
            transaction_type: None,
            current_phase: None,
            new_phase: None,
            allowed_transitions: Vec::new(),
            failure: Some(failure),
            error: Some(error.into()),
        }
    }

    /// Convert the verdict into the error taxonomy
    pub fn into_result(self) -> Result<Self, StatusError> {
        if self.is_valid {
            return Ok(self);
        }
        let error = self.error.clone().unwrap_or_default();
        match (self.failure, self.current_status, self.new_status, self.transaction_type) {
            (Some(ValidationFailure::UnknownStatus), ..) => Err(StatusError::UnknownStatus(error)),
            (Some(ValidationFailure::UnknownTransactionType), ..) => {
                Err(StatusError::UnknownTransactionType(error))
            }
            (Some(ValidationFailure::NoFlowRules), _, _, Some(tx_type)) => {
                Err(StatusError::NoFlowRules(tx_type))
            }
            (_, Some(from), Some(to), Some(tx_type)) => Err(StatusError::InvalidTransition {
                from,
                to,
                tx_type,
                allowed: self.allowed_transitions,
                reason: error,
            }),
            _ => Err(StatusError::UnknownStatus(error)),
        }
    }
}

/// Validates proposed status changes against the flow tables
#[derive(Debug, Clone)]
pub struct UnifiedTransitionValidator {
    flows: Arc<StatusFlows>,
}

impl Default for UnifiedTransitionValidator {
    fn default() -> Self {
        Self::new(Arc::new(StatusFlows::canonical()))
    }
}

impl UnifiedTransitionValidator {
    pub fn new(flows: Arc<StatusFlows>) -> Self {
        Self { flows }
    }

    pub fn flows(&self) -> &StatusFlows {
        &self.flows
    }

    /// Validate a transition using the flow tables alone
    pub fn validate<'a>(
        &self,
        current: impl Into<Loose<'a, UnifiedTransactionStatus>>,
        new: impl Into<Loose<'a, UnifiedTransactionStatus>>,
        tx_type: impl Into<Loose<'a, UnifiedTransactionType>>,
    ) -> ValidationResult {
        self.validate_in_context(current, new, tx_type, None)
    }

    /// Validate a transition on behalf of a concrete caller context.
    ///
    /// Administrative resolution edges additionally require
    /// [`StatusContext::ManualAdmin`] when a context is supplied.
    pub fn validate_in_context<'a>(
        &self,
        current: impl Into<Loose<'a, UnifiedTransactionStatus>>,
        new: impl Into<Loose<'a, UnifiedTransactionStatus>>,
        tx_type: impl Into<Loose<'a, UnifiedTransactionType>>,
        context: Option<StatusContext>,
    ) -> ValidationResult {
        let (current, new) = match (current.into().resolve(), new.into().resolve()) {
            (Ok(c), Ok(n)) => (c, n),
            (Err(e), _) | (_, Err(e)) => {
                return ValidationResult::rejected(
                    ValidationFailure::UnknownStatus,
                    format!("invalid status or transaction type: {}", e),
                );
            }
        };
        let tx_type = match tx_type.into().resolve() {
            Ok(t) => t,
            Err(e) => {
                let mut result = ValidationResult::rejected(
                    ValidationFailure::UnknownTransactionType,
                    format!("invalid status or transaction type: {}", e),
                );
                result.current_status = Some(current);
                result.new_status = Some(new);
                return result;
            }
        };

        let mut result = ValidationResult {
            is_valid: false,
            current_status: Some(current),
            new_status: Some(new),
            transaction_type: Some(tx_type),
            current_phase: Some(current.phase()),
            new_phase: Some(new.phase()),
            allowed_transitions: Vec::new(),
            failure: None,
            error: None,
        };

        let Some(allowed) = self.flows.next_statuses(tx_type, current) else {
            result.failure = Some(ValidationFailure::NoFlowRules);
            result.error = Some(format!("no flow rules defined for transaction type {}", tx_type));
            return result;
        };
        result.allowed_transitions = allowed.to_vec();

        if current == new {
            result.failure = Some(ValidationFailure::SameStatus);
            result.error = Some(format!("status is already {}", current));
        } else if !allowed.contains(&new) {
            result.failure = Some(ValidationFailure::NotAllowed);
            result.error = Some(format!(
                "transition {} -> {} is not allowed for {}",
                current, new, tx_type
            ));
        } else if StatusFlows::is_admin_resolution_edge(tx_type, current, new)
            && context.is_some_and(|c| c != StatusContext::ManualAdmin)
        {
            result.failure = Some(ValidationFailure::RequiresAdmin);
            result.error = Some(format!(
                "transition {} -> {} is an administrative resolution and requires manual_admin context",
                current, new
            ));
        } else {
            result.is_valid = true;
        }

        debug!(
            tx_type = %tx_type,
            from = %current,
            to = %new,
            valid = result.is_valid,
            "Transition validated"
        );
        result
    }

    /// Legal next statuses, empty for terminal or unknown input
    pub fn allowed_next_statuses<'a>(
        &self,
        current: impl Into<Loose<'a, UnifiedTransactionStatus>>,
        tx_type: impl Into<Loose<'a, UnifiedTransactionType>>,
    ) -> Vec<UnifiedTransactionStatus> {
        match (current.into().resolve(), tx_type.into().resolve()) {
            (Ok(current), Ok(tx_type)) => self
                .flows
                .next_statuses(tx_type, current)
                .map(<[_]>::to_vec)
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }
}
