//! Facade request / result types

use serde::{Deserialize, Serialize};

use crate::dual_write::DualWriteResult;
use crate::error::StatusError;
use crate::models::{BalanceChange, LegacyRef, Metadata, OperationId, TransactionId};
use crate::status::{LegacyStatus, StatusContext, StatusValue, UnifiedTransactionStatus};

/// A requested status change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdateRequest {
    /// Target status, unified or in the entity's own legacy vocabulary
    pub new_status: StatusValue,
    pub reason: String,
    /// User id, admin id or subsystem name
    pub triggered_by: String,
    pub context: StatusContext,
    #[serde(default)]
    pub metadata: Metadata,
    /// Bypass transition validation (manual_admin only)
    #[serde(default)]
    pub force_update: bool,
    /// Do not append a history row (manual_admin only)
    #[serde(default)]
    pub skip_history: bool,
}

impl StatusUpdateRequest {
    pub fn new(new_status: impl Into<StatusValue>, context: StatusContext) -> Self {
        Self {
            new_status: new_status.into(),
            reason: String::new(),
            triggered_by: "system".to_string(),
            context,
            metadata: Metadata::new(),
            force_update: false,
            skip_history: false,
        }
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn triggered_by(mut self, actor: impl Into<String>) -> Self {
        self.triggered_by = actor.into();
        self
    }

    pub fn with_metadata(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn force(mut self) -> Self {
        self.force_update = true;
        self
    }

    pub fn without_history(mut self) -> Self {
        self.skip_history = true;
        self
    }

    /// Escape hatches only administrators may use
    pub fn uses_admin_override(&self) -> bool {
        self.force_update || self.skip_history
    }
}

/// Structured outcome of a facade call. Failures are reported here, never
/// raised, so workflow code can branch on `success`.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdateResult {
    pub success: bool,
    pub operation_id: OperationId,
    pub transaction_id: Option<TransactionId>,
    pub legacy_ref: Option<LegacyRef>,
    pub requested: StatusValue,
    pub old_status: Option<UnifiedTransactionStatus>,
    pub new_status: Option<UnifiedTransactionStatus>,
    /// Legacy value actually written
    pub legacy_status: Option<LegacyStatus>,
    pub error: Option<StatusError>,
    pub error_message: Option<String>,
    /// On rejection: what the caller may do instead. On success: what comes next.
    pub allowed_transitions: Vec<UnifiedTransactionStatus>,
    pub warnings: Vec<String>,
    pub dual_write: Option<DualWriteResult>,
    pub balance_changes: Vec<BalanceChange>,
    pub history_recorded: bool,
    pub forced: bool,
}

impl StatusUpdateResult {
    pub(super) fn started(operation_id: OperationId, request: &StatusUpdateRequest) -> Self {
        Self {
            success: false,
            operation_id,
            transaction_id: None,
            legacy_ref: None,
            requested: request.new_status,
            old_status: None,
            new_status: None,
            legacy_status: None,
            error: None,
            error_message: None,
            allowed_transitions: Vec::new(),
            warnings: Vec::new(),
            dual_write: None,
            balance_changes: Vec::new(),
            history_recorded: false,
            forced: false,
        }
    }

    pub(super) fn fail(&mut self, error: StatusError) {
        self.success = false;
        if !error.allowed_transitions().is_empty() {
            self.allowed_transitions = error.allowed_transitions().to_vec();
        }
        self.error_message = Some(error.to_string());
        self.error = Some(error);
    }

    pub(super) fn warn(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    pub fn error_code(&self) -> Option<&'static str> {
        self.error.as_ref().map(StatusError::code)
    }

    /// Re-invoking the same call after reloading state may succeed
    pub fn is_retryable(&self) -> bool {
        self.error.as_ref().is_some_and(StatusError::is_retryable)
    }

    pub fn into_result(self) -> Result<Self, StatusError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::{CashoutStatus, UnifiedTransactionType};

    #[test]
    fn test_request_builder() {
        let req = StatusUpdateRequest::new(CashoutStatus::Executing, StatusContext::ManualAdmin)
            .reason("provider confirmed by phone")
            .triggered_by("admin:42")
            .with_metadata("ticket", "OPS-991")
            .force();
        assert!(req.uses_admin_override());
        assert_eq!(req.triggered_by, "admin:42");
        assert_eq!(req.metadata["ticket"], "OPS-991");
        assert!(matches!(req.new_status, StatusValue::Legacy(_)));
    }

    #[test]
    fn test_fail_keeps_allowed_list() {
        let req = StatusUpdateRequest::new(
            UnifiedTransactionStatus::Success,
            StatusContext::UserAction,
        );
        let mut result = StatusUpdateResult::started(OperationId::new(), &req);
        result.fail(StatusError::InvalidTransition {
            from: UnifiedTransactionStatus::Pending,
            to: UnifiedTransactionStatus::Success,
            tx_type: UnifiedTransactionType::ExchangeSellCrypto,
            allowed: vec![UnifiedTransactionStatus::Cancelled],
            reason: "skip".into(),
        });
        assert!(!result.success);
        assert_eq!(result.error_code(), Some("INVALID_TRANSITION"));
        assert_eq!(
            result.allowed_transitions,
            vec![UnifiedTransactionStatus::Cancelled]
        );
        assert!(!result.is_retryable());
        assert!(result.into_result().is_err());
    }
}
