//! Financial audit trail
//!
//! A fixed allow-list of transitions move money in ways that must be
//! reconstructable later. They are emitted on the `financial_audit` target
//! with the balance movements of the same unit of work.

use tracing::info;

use crate::models::{BalanceChange, LegacyRef, OperationId, TransactionId};
use crate::status::{StatusContext, UnifiedTransactionStatus as S};

pub const AUDIT_TARGET: &str = "financial_audit";

const CRITICAL_EDGES: &[(S, S)] = &[
    (S::Pending, S::Success),
    (S::FundsHeld, S::Success),
    (S::ReleasePending, S::Success),
];

pub fn is_financially_critical(from: S, to: S, context: StatusContext) -> bool {
    context == StatusContext::ManualAdmin || CRITICAL_EDGES.contains(&(from, to))
}

pub struct AuditRecord<'a> {
    pub operation_id: OperationId,
    pub transaction_id: Option<TransactionId>,
    pub legacy_ref: Option<&'a LegacyRef>,
    pub from: S,
    pub to: S,
    pub context: StatusContext,
    pub triggered_by: &'a str,
    pub forced: bool,
    pub balance_changes: &'a [BalanceChange],
}

pub fn record(entry: &AuditRecord<'_>) {
    let balances = serde_json::to_string(entry.balance_changes).unwrap_or_default();
    info!(
        target: AUDIT_TARGET,
        operation_id = %entry.operation_id,
        transaction_id = ?entry.transaction_id.map(|id| id.to_string()),
        legacy_ref = ?entry.legacy_ref.map(|r| r.to_string()),
        from = %entry.from,
        to = %entry.to,
        context = %entry.context,
        triggered_by = entry.triggered_by,
        forced = entry.forced,
        balance_changes = %balances,
        "Financially critical status change"
    );
}
