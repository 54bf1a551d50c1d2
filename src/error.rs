//! Status Engine Error Types
//!
//! One taxonomy for every failure the engine can surface. Each variant has a
//! stable code for API responses and a retryability classification.

use thiserror::Error;

use crate::status::{MappingError, UnifiedTransactionStatus, UnifiedTransactionType};
use crate::store::StoreError;

/// Broad error family, used by callers deciding how to react
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    Entity,
    BusinessRule,
    Consistency,
    Mapping,
    System,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StatusError {
    // === Validation Errors ===
    #[error("Invalid transition {from} -> {to} for {tx_type}: {reason}")]
    InvalidTransition {
        from: UnifiedTransactionStatus,
        to: UnifiedTransactionStatus,
        tx_type: UnifiedTransactionType,
        /// What the caller may do instead
        allowed: Vec<UnifiedTransactionStatus>,
        reason: String,
    },

    #[error("Unknown status: {0}")]
    UnknownStatus(String),

    #[error("Unknown transaction type: {0}")]
    UnknownTransactionType(String),

    #[error("No flow rules defined for transaction type {0}")]
    NoFlowRules(UnifiedTransactionType),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    // === Entity Errors ===
    #[error("{kind} not found: {id}")]
    EntityNotFound { kind: &'static str, id: String },

    // === Business Rule Errors ===
    #[error("Business rule '{rule}' violated: {message}")]
    BusinessRule { rule: &'static str, message: String },

    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("OTP verification required for transaction {0}")]
    OtpRequired(String),

    #[error("Operation not permitted: {0}")]
    Forbidden(String),

    // === Dual-write / Consistency Errors ===
    #[error("Partial write failure (legacy: {legacy:?}, unified: {unified:?})")]
    PartialWriteFailure {
        legacy: Option<String>,
        unified: Option<String>,
    },

    #[error("Concurrent modification: {0}")]
    ConcurrentModification(String),

    // === Idempotency Errors ===
    #[error("Request with idempotency key {0} is still processing")]
    RequestInProgress(String),

    // === Mapping Errors ===
    #[error(transparent)]
    Mapping(#[from] MappingError),

    // === System Errors ===
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("External provider error: {0}")]
    External(String),
}

impl StatusError {
    /// Stable error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            StatusError::InvalidTransition { .. } => "INVALID_TRANSITION",
            StatusError::UnknownStatus(_) => "UNKNOWN_STATUS",
            StatusError::UnknownTransactionType(_) => "UNKNOWN_TRANSACTION_TYPE",
            StatusError::NoFlowRules(_) => "NO_FLOW_RULES",
            StatusError::InvalidAmount(_) => "INVALID_AMOUNT",
            StatusError::EntityNotFound { .. } => "ENTITY_NOT_FOUND",
            StatusError::BusinessRule { .. } => "BUSINESS_RULE_VIOLATION",
            StatusError::InsufficientFunds(_) => "INSUFFICIENT_FUNDS",
            StatusError::OtpRequired(_) => "OTP_REQUIRED",
            StatusError::Forbidden(_) => "FORBIDDEN",
            StatusError::PartialWriteFailure { .. } => "PARTIAL_WRITE_FAILURE",
            StatusError::ConcurrentModification(_) => "CONCURRENT_MODIFICATION",
            StatusError::RequestInProgress(_) => "REQUEST_IN_PROGRESS",
            StatusError::Mapping(e) => e.code(),
            StatusError::Storage(_) => "STORAGE_ERROR",
            StatusError::External(_) => "EXTERNAL_ERROR",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            StatusError::InvalidTransition { .. }
            | StatusError::UnknownStatus(_)
            | StatusError::UnknownTransactionType(_)
            | StatusError::NoFlowRules(_)
            | StatusError::InvalidAmount(_) => ErrorCategory::Validation,
            StatusError::EntityNotFound { .. } => ErrorCategory::Entity,
            StatusError::BusinessRule { .. }
            | StatusError::InsufficientFunds(_)
            | StatusError::OtpRequired(_)
            | StatusError::Forbidden(_) => ErrorCategory::BusinessRule,
            StatusError::PartialWriteFailure { .. }
            | StatusError::ConcurrentModification(_)
            | StatusError::RequestInProgress(_) => ErrorCategory::Consistency,
            StatusError::Mapping(_) => ErrorCategory::Mapping,
            StatusError::Storage(_) | StatusError::External(_) => ErrorCategory::System,
        }
    }

    /// Whether re-invoking the same call after reloading state may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StatusError::PartialWriteFailure { .. }
                | StatusError::ConcurrentModification(_)
                | StatusError::RequestInProgress(_)
                | StatusError::Storage(_)
                | StatusError::External(_)
        )
    }

    /// Statuses the caller may move to instead, for actionable messages
    pub fn allowed_transitions(&self) -> &[UnifiedTransactionStatus] {
        match self {
            StatusError::InvalidTransition { allowed, .. } => allowed,
            _ => &[],
        }
    }
}

impl From<StoreError> for StatusError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(msg) => StatusError::ConcurrentModification(msg),
            StoreError::NotFound { kind, id } => StatusError::EntityNotFound { kind, id },
            StoreError::InsufficientBalance { user_id, currency } => {
                StatusError::InsufficientFunds(format!("user {} in {}", user_id, currency))
            }
            other => StatusError::Storage(other.to_string()),
        }
    }
}
