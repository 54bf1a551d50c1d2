//! Post-update hooks
//!
//! Run after a status change has committed. Fire-and-forget: a slow or
//! failing hook never affects the outcome of the update that triggered it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::StatusError;
use crate::models::{LegacyRef, OperationId, TransactionId, UserId};
use crate::status::{LegacyStatus, StatusContext, UnifiedTransactionStatus, UnifiedTransactionType};

/// A committed status change
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusChangeEvent {
    pub operation_id: OperationId,
    pub transaction_id: Option<TransactionId>,
    pub legacy_ref: Option<LegacyRef>,
    pub transaction_type: UnifiedTransactionType,
    pub user_id: UserId,
    pub old_status: UnifiedTransactionStatus,
    pub new_status: UnifiedTransactionStatus,
    pub legacy_status: Option<LegacyStatus>,
    pub context: StatusContext,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[async_trait]
pub trait PostUpdateHook: Send + Sync {
    fn name(&self) -> &'static str;

    async fn on_status_changed(&self, event: &StatusChangeEvent) -> Result<(), StatusError>;
}

/// Spawn every hook on its own task
pub fn dispatch(
    hooks: &[Arc<dyn PostUpdateHook>],
    event: StatusChangeEvent,
) -> Vec<JoinHandle<()>> {
    if hooks.is_empty() {
        return Vec::new();
    }
    let event = Arc::new(event);
    hooks
        .iter()
        .map(|hook| {
            let hook = hook.clone();
            let event = event.clone();
            tokio::spawn(async move {
                match hook.on_status_changed(&event).await {
                    Ok(()) => debug!(
                        hook = hook.name(),
                        operation_id = %event.operation_id,
                        "Post-update hook finished"
                    ),
                    Err(e) => warn!(
                        hook = hook.name(),
                        operation_id = %event.operation_id,
                        error = %e,
                        "Post-update hook failed"
                    ),
                }
            })
        })
        .collect()
}
