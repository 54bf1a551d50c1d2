//! StatusUpdateFacade - orchestration of one status change

use chrono::Utc;
use std::sync::Arc;
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::audit::{self, AuditRecord};
use super::effects;
use super::hooks::{self, PostUpdateHook, StatusChangeEvent};
use super::rules::{self, RuleInput};
use super::types::{StatusUpdateRequest, StatusUpdateResult};
use super::StatusUpdateConfig;
use crate::dual_write::{DualWriteAdapter, EntityKey, EntityPair, WriteTarget, load_pair};
use crate::error::{ErrorCategory, StatusError};
use crate::models::{LegacyRef, OperationId, StatusHistoryEntry, TransactionId};
use crate::otp::OtpService;
use crate::status::{
    LegacyStatus, LegacySystemType, MappingError, StatusContext, StatusValue,
    UnifiedTransactionStatus, UnifiedTransactionType, UnifiedTransitionValidator,
};
use crate::store::{StoreTx, TransactionStore, rollback_quietly};

/// Everything decided inside the atomic scope, carried out of it
struct Staged {
    pair: EntityPair,
    tx_type: UnifiedTransactionType,
    current: UnifiedTransactionStatus,
    target: UnifiedTransactionStatus,
}

pub struct StatusUpdateFacade {
    store: Arc<dyn TransactionStore>,
    validator: UnifiedTransitionValidator,
    adapter: Arc<DualWriteAdapter>,
    otp: Arc<dyn OtpService>,
    hooks: Vec<Arc<dyn PostUpdateHook>>,
    config: StatusUpdateConfig,
}

impl StatusUpdateFacade {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        adapter: Arc<DualWriteAdapter>,
        otp: Arc<dyn OtpService>,
        config: StatusUpdateConfig,
    ) -> Self {
        Self {
            store,
            validator: UnifiedTransitionValidator::default(),
            adapter,
            otp,
            hooks: Vec::new(),
            config,
        }
    }

    pub fn with_validator(mut self, validator: UnifiedTransitionValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_hook(mut self, hook: Arc<dyn PostUpdateHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn adapter(&self) -> &DualWriteAdapter {
        &self.adapter
    }

    pub fn validator(&self) -> &UnifiedTransitionValidator {
        &self.validator
    }

    pub fn config(&self) -> &StatusUpdateConfig {
        &self.config
    }

    // ========================================================================
    // Entry points
    // ========================================================================

    pub async fn update_cashout_status(
        &self,
        cashout_id: &str,
        request: StatusUpdateRequest,
    ) -> StatusUpdateResult {
        self.update(EntityKey::Legacy(LegacyRef::cashout(cashout_id)), request)
            .await
    }

    pub async fn update_escrow_status(
        &self,
        escrow_id: &str,
        request: StatusUpdateRequest,
    ) -> StatusUpdateResult {
        self.update(EntityKey::Legacy(LegacyRef::escrow(escrow_id)), request)
            .await
    }

    pub async fn update_exchange_status(
        &self,
        order_id: &str,
        request: StatusUpdateRequest,
    ) -> StatusUpdateResult {
        self.update(EntityKey::Legacy(LegacyRef::exchange(order_id)), request)
            .await
    }

    pub async fn update_unified_transaction_status(
        &self,
        transaction_id: TransactionId,
        request: StatusUpdateRequest,
    ) -> StatusUpdateResult {
        self.update(EntityKey::Transaction(transaction_id), request)
            .await
    }

    /// Legal next statuses from the entity's current status
    pub async fn get_allowed_next_statuses(
        &self,
        key: &EntityKey,
    ) -> Result<Vec<UnifiedTransactionStatus>, StatusError> {
        let mut uow = self.store.begin().await?;
        let loaded = load_pair(uow.as_mut(), key).await;
        rollback_quietly(uow.as_mut()).await;
        let pair = loaded?;

        let tx_type = transaction_type(&pair).ok_or_else(|| not_found(key))?;
        let current = self
            .adapter
            .primary_status(&pair)?
            .ok_or_else(|| not_found(key))?;
        Ok(self.validator.allowed_next_statuses(current, tx_type))
    }

    /// Full status history of a transaction, oldest first
    pub async fn history(
        &self,
        transaction_id: TransactionId,
    ) -> Result<Vec<StatusHistoryEntry>, StatusError> {
        let mut uow = self.store.begin().await?;
        let rows = uow.history(transaction_id).await;
        rollback_quietly(uow.as_mut()).await;
        Ok(rows?)
    }

    // ========================================================================
    // Pipeline
    // ========================================================================

    async fn update(&self, key: EntityKey, request: StatusUpdateRequest) -> StatusUpdateResult {
        let operation_id = OperationId::new();
        let span = info_span!(
            "status_update",
            key = %key,
            operation_id = %operation_id,
            requested = %request.new_status,
            context = %request.context,
        );
        async {
            let mut result = StatusUpdateResult::started(operation_id, &request);
            if let Err(e) = self.run(&key, &request, &mut result).await {
                match e.category() {
                    ErrorCategory::System => {
                        error!(error = %e, code = e.code(), "Status update failed")
                    }
                    _ => warn!(error = %e, code = e.code(), "Status update rejected"),
                }
                result.fail(e);
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        key: &EntityKey,
        request: &StatusUpdateRequest,
        result: &mut StatusUpdateResult,
    ) -> Result<(), StatusError> {
        if request.uses_admin_override() && request.context != StatusContext::ManualAdmin {
            return Err(StatusError::Forbidden(
                "force_update and skip_history require manual_admin context".to_string(),
            ));
        }
        result.forced = request.force_update;

        let mut uow = self.store.begin().await?;
        let staged = match self.stage(uow.as_mut(), key, request, result).await {
            Ok(staged) => staged,
            Err(e) => {
                rollback_quietly(uow.as_mut()).await;
                if let StatusError::InvalidTransition { from, to, .. } = &e {
                    self.record_rejected(result, *from, *to, request).await;
                }
                return Err(e);
            }
        };
        uow.commit().await?;
        result.success = true;

        info!(
            transaction_id = ?result.transaction_id.map(|id| id.to_string()),
            from = %staged.current,
            to = %staged.target,
            forced = request.force_update,
            "Status updated"
        );

        self.record_history(result, &staged, request).await;

        if audit::is_financially_critical(staged.current, staged.target, request.context) {
            audit::record(&AuditRecord {
                operation_id: result.operation_id,
                transaction_id: result.transaction_id,
                legacy_ref: result.legacy_ref.as_ref(),
                from: staged.current,
                to: staged.target,
                context: request.context,
                triggered_by: &request.triggered_by,
                forced: request.force_update,
                balance_changes: &result.balance_changes,
            });
        }

        result.allowed_transitions = self
            .validator
            .allowed_next_statuses(staged.target, staged.tx_type);

        if let Some(user_id) = staged
            .pair
            .unified
            .as_ref()
            .map(|tx| tx.user_id)
            .or_else(|| staged.pair.legacy.as_ref().map(|e| e.user_id()))
        {
            hooks::dispatch(
                &self.hooks,
                StatusChangeEvent {
                    operation_id: result.operation_id,
                    transaction_id: result.transaction_id,
                    legacy_ref: result.legacy_ref.clone(),
                    transaction_type: staged.tx_type,
                    user_id,
                    old_status: staged.current,
                    new_status: staged.target,
                    legacy_status: result.legacy_status,
                    context: request.context,
                    reason: request.reason.clone(),
                    occurred_at: Utc::now(),
                },
            );
        }
        Ok(())
    }

    /// Steps that must commit or vanish together
    async fn stage(
        &self,
        uow: &mut dyn StoreTx,
        key: &EntityKey,
        request: &StatusUpdateRequest,
        result: &mut StatusUpdateResult,
    ) -> Result<Staged, StatusError> {
        // Load
        let pair = load_pair(uow, key).await?;
        let tx_type = transaction_type(&pair).ok_or_else(|| not_found(key))?;
        let current = self
            .adapter
            .primary_status(&pair)?
            .ok_or_else(|| not_found(key))?;
        result.transaction_id = pair.unified.as_ref().map(|tx| tx.transaction_id).or_else(|| {
            pair.legacy
                .as_ref()
                .and_then(|e| e.unified_transaction_id())
        });
        result.legacy_ref = pair.legacy_ref();
        result.old_status = Some(current);

        let (target, legacy_override) = self.normalize(&pair, tx_type, request.new_status)?;
        result.new_status = Some(target);
        debug!(tx_type = %tx_type, from = %current, to = %target, "Entity loaded");

        // Business rules
        let rule_input = RuleInput {
            pair: &pair,
            tx_type,
            current,
            target,
            context: request.context,
        };
        let warnings = rules::check(&rule_input, uow, self.otp.as_ref(), &self.config).await?;
        result.warnings.extend(warnings);

        // Transition validation
        if request.force_update {
            warn!(
                from = %current,
                to = %target,
                actor = %request.triggered_by,
                "Transition validation bypassed by administrator"
            );
            result.warn(format!(
                "validation bypassed by {} for {} -> {}",
                request.triggered_by, current, target
            ));
        } else {
            self.validator
                .validate_in_context(current, target, tx_type, Some(request.context))
                .into_result()?;
        }

        // Fund movements
        result.balance_changes = effects::apply(uow, &pair, tx_type, current, target).await?;

        // Dual-write
        let dual_write = self
            .adapter
            .update_status(
                uow,
                WriteTarget {
                    unified: pair.unified.as_ref(),
                    legacy: pair.legacy.as_ref(),
                },
                target,
                legacy_override,
                result.operation_id,
            )
            .await?;
        if !dual_write.success {
            return Err(StatusError::PartialWriteFailure {
                legacy: dual_write.legacy_error.clone(),
                unified: dual_write.unified_error.clone(),
            });
        }
        if dual_write.has_inconsistency {
            result.warn(format!(
                "legacy and unified records disagree after write (legacy: {}, unified: {})",
                dual_write.legacy_error.as_deref().unwrap_or("ok"),
                dual_write.unified_error.as_deref().unwrap_or("ok"),
            ));
        }
        if let Some(id) = dual_write.backfilled {
            result.transaction_id = Some(id);
        }
        result.legacy_status = dual_write.legacy_status;
        result.dual_write = Some(dual_write);

        Ok(Staged {
            pair,
            tx_type,
            current,
            target,
        })
    }

    /// Resolve the requested value to a unified target, keeping an explicit
    /// legacy value so it is written verbatim
    fn normalize(
        &self,
        pair: &EntityPair,
        tx_type: UnifiedTransactionType,
        requested: StatusValue,
    ) -> Result<(UnifiedTransactionStatus, Option<LegacyStatus>), StatusError> {
        match requested {
            StatusValue::Unified(status) => Ok((status, None)),
            StatusValue::Legacy(status) => {
                let expected = pair
                    .legacy_ref()
                    .map(|r| r.system)
                    .unwrap_or_else(|| LegacySystemType::for_transaction_type(tx_type));
                if status.system() != expected {
                    return Err(MappingError::SystemMismatch { status, expected }.into());
                }
                Ok((self.adapter.mapper().map_to_unified(status)?, Some(status)))
            }
        }
    }

    // ========================================================================
    // History
    // ========================================================================

    async fn record_history(
        &self,
        result: &mut StatusUpdateResult,
        staged: &Staged,
        request: &StatusUpdateRequest,
    ) {
        if request.skip_history {
            warn!(actor = %request.triggered_by, "History skipped by administrator");
            result.warn(format!("history skipped by {}", request.triggered_by));
            return;
        }
        let Some(transaction_id) = result.transaction_id else {
            result.warn("no unified transaction to record history against");
            return;
        };
        let entry = self.history_entry(
            transaction_id,
            staged.current,
            staged.target,
            true,
            request,
            result.operation_id,
        );
        match self.append_history(&entry).await {
            Ok(()) => result.history_recorded = true,
            Err(e) => {
                error!(
                    transaction_id = %transaction_id,
                    error = %e,
                    "History append failed after status commit"
                );
                result.warn(format!("status history not recorded: {}", e));
            }
        }
    }

    async fn record_rejected(
        &self,
        result: &mut StatusUpdateResult,
        from: UnifiedTransactionStatus,
        to: UnifiedTransactionStatus,
        request: &StatusUpdateRequest,
    ) {
        if !self.config.record_rejected_transitions || request.skip_history {
            return;
        }
        let Some(transaction_id) = result.transaction_id else {
            return;
        };
        let entry =
            self.history_entry(transaction_id, from, to, false, request, result.operation_id);
        match self.append_history(&entry).await {
            Ok(()) => result.history_recorded = true,
            Err(e) => warn!(
                transaction_id = %transaction_id,
                error = %e,
                "Rejected attempt not recorded"
            ),
        }
    }

    fn history_entry(
        &self,
        transaction_id: TransactionId,
        old_status: UnifiedTransactionStatus,
        new_status: UnifiedTransactionStatus,
        accepted: bool,
        request: &StatusUpdateRequest,
        operation_id: OperationId,
    ) -> StatusHistoryEntry {
        StatusHistoryEntry {
            history_id: ulid::Ulid::new(),
            transaction_id,
            old_status,
            new_status,
            accepted,
            forced: request.force_update,
            reason: request.reason.clone(),
            triggered_by: request.triggered_by.clone(),
            context: request.context,
            metadata: request.metadata.clone(),
            operation_id,
            created_at: Utc::now(),
        }
    }

    async fn append_history(&self, entry: &StatusHistoryEntry) -> Result<(), StatusError> {
        let mut uow = self.store.begin().await?;
        if let Err(e) = uow.append_history(entry).await {
            rollback_quietly(uow.as_mut()).await;
            return Err(e.into());
        }
        uow.commit().await?;
        Ok(())
    }
}

fn transaction_type(pair: &EntityPair) -> Option<UnifiedTransactionType> {
    pair.unified
        .as_ref()
        .map(|tx| tx.transaction_type)
        .or_else(|| pair.legacy.as_ref().map(|e| e.transaction_type()))
}

fn not_found(key: &EntityKey) -> StatusError {
    let kind = match key {
        EntityKey::Transaction(_) => "transaction",
        EntityKey::Legacy(r) => match r.system {
            LegacySystemType::Cashout => "cashout",
            LegacySystemType::Escrow => "escrow",
            LegacySystemType::Exchange => "exchange order",
        },
    };
    StatusError::EntityNotFound {
        kind,
        id: match key {
            EntityKey::Transaction(id) => id.to_string(),
            EntityKey::Legacy(r) => r.id.clone(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dual_write::{DualWriteConfig, DualWriteMode, DualWriteStrategy};
    use crate::models::{Escrow, LegacyEntity, WalletHold};
    use crate::otp::InMemoryOtpService;
    use crate::status::{EscrowStatus, LegacyStatusMapper, UnifiedTransactionStatus as S};
    use crate::store::MemoryStore;
    use rust_decimal_macros::dec;

    fn facade(store: &MemoryStore, config: DualWriteConfig) -> StatusUpdateFacade {
        let shared: Arc<dyn TransactionStore> = Arc::new(store.clone());
        let adapter =
            DualWriteAdapter::new(shared.clone(), Arc::new(LegacyStatusMapper::new()), config);
        StatusUpdateFacade::new(
            shared,
            Arc::new(adapter),
            Arc::new(InMemoryOtpService::default()),
            StatusUpdateConfig::default(),
        )
    }

    async fn seed_escrow(
        store: &MemoryStore,
        id: &str,
        status: EscrowStatus,
        unified: S,
        hold: bool,
    ) -> TransactionId {
        let now = Utc::now();
        let escrow = Escrow {
            escrow_id: id.into(),
            user_id: 1,
            seller_id: 2,
            amount: dec!(100),
            currency: "USDT".into(),
            status,
            unified_transaction_id: None,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        let hold_row = WalletHold::new(&escrow);
        let mut entity = LegacyEntity::Escrow(escrow);
        let tx = entity.to_unified(unified);
        entity.set_unified_transaction_id(Some(tx.transaction_id));

        let mut uow = store.begin().await.unwrap();
        uow.insert_legacy(&entity).await.unwrap();
        uow.insert_unified(&tx).await.unwrap();
        if hold {
            uow.insert_hold(&hold_row).await.unwrap();
        }
        uow.commit().await.unwrap();
        tx.transaction_id
    }

    #[tokio::test]
    async fn test_force_requires_admin() {
        let store = MemoryStore::new();
        seed_escrow(&store, "ES-1", EscrowStatus::Created, S::Pending, false).await;
        let facade = facade(&store, DualWriteConfig::default());

        let result = facade
            .update_escrow_status(
                "ES-1",
                StatusUpdateRequest::new(S::Success, StatusContext::UserAction).force(),
            )
            .await;
        assert!(!result.success);
        assert_eq!(result.error_code(), Some("FORBIDDEN"));
        assert_eq!(
            store.legacy_row(&LegacyRef::escrow("ES-1")).unwrap().status(),
            EscrowStatus::Created.into()
        );
    }

    #[tokio::test]
    async fn test_forced_update_is_recorded() {
        let store = MemoryStore::new();
        let id = seed_escrow(&store, "ES-2", EscrowStatus::Created, S::Pending, false).await;
        let facade = facade(&store, DualWriteConfig::default());

        let result = facade
            .update_escrow_status(
                "ES-2",
                StatusUpdateRequest::new(S::AwaitingApproval, StatusContext::ManualAdmin)
                    .triggered_by("admin:7")
                    .reason("buyer paid out of band")
                    .force(),
            )
            .await;
        assert!(result.success, "{:?}", result.error);
        assert!(result.forced);
        assert!(!result.warnings.is_empty());

        let history = facade.history(id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].forced);
        assert_eq!(history[0].triggered_by, "admin:7");
    }

    #[tokio::test]
    async fn test_rejected_transition_recorded_and_untouched() {
        let store = MemoryStore::new();
        let id = seed_escrow(&store, "ES-3", EscrowStatus::Created, S::Pending, false).await;
        let facade = facade(&store, DualWriteConfig::default());

        let result = facade
            .update_unified_transaction_status(
                id,
                StatusUpdateRequest::new(S::Success, StatusContext::UserAction),
            )
            .await;
        assert_eq!(result.error_code(), Some("INVALID_TRANSITION"));
        assert_eq!(
            result.allowed_transitions,
            vec![S::PaymentConfirmed, S::Cancelled]
        );
        assert_eq!(store.unified_row(id).unwrap().status, S::Pending);

        let history = store.history_rows(id);
        assert_eq!(history.len(), 1);
        assert!(!history[0].accepted);
    }

    #[tokio::test]
    async fn test_legacy_target_written_verbatim() {
        let store = MemoryStore::new();
        seed_escrow(&store, "ES-4", EscrowStatus::Created, S::Pending, false).await;
        let facade = facade(&store, DualWriteConfig::default());

        // Caller speaks the escrow vocabulary
        let result = facade
            .update_escrow_status(
                "ES-4",
                StatusUpdateRequest::new(
                    EscrowStatus::PaymentConfirmed,
                    StatusContext::WebhookResponse,
                ),
            )
            .await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.new_status, Some(S::PaymentConfirmed));
        assert_eq!(result.legacy_status, Some(EscrowStatus::PaymentConfirmed.into()));

        // A cashout value cannot address an escrow
        let result = facade
            .update_escrow_status(
                "ES-4",
                StatusUpdateRequest::new(
                    crate::status::CashoutStatus::Approved,
                    StatusContext::ManualAdmin,
                ),
            )
            .await;
        assert_eq!(
            result.error.as_ref().map(|e| e.category()),
            Some(ErrorCategory::Mapping)
        );
    }

    #[tokio::test]
    async fn test_unknown_entity() {
        let store = MemoryStore::new();
        let facade = facade(&store, DualWriteConfig::default());
        let result = facade
            .update_cashout_status(
                "CO-missing",
                StatusUpdateRequest::new(S::Processing, StatusContext::UserAction),
            )
            .await;
        assert_eq!(result.error_code(), Some("ENTITY_NOT_FOUND"));
        assert!(!result.is_retryable());
    }

    #[tokio::test]
    async fn test_fail_fast_partial_failure_leaves_nothing() {
        let store = MemoryStore::new();
        let id = seed_escrow(&store, "ES-5", EscrowStatus::Created, S::Pending, false).await;
        let facade = facade(
            &store,
            DualWriteConfig::new(
                DualWriteMode::DualWriteUnifiedPrimary,
                DualWriteStrategy::FailFast,
            ),
        );
        store.set_fail_legacy_writes(true);

        let result = facade
            .update_unified_transaction_status(
                id,
                StatusUpdateRequest::new(S::PaymentConfirmed, StatusContext::WebhookResponse),
            )
            .await;
        assert_eq!(result.error_code(), Some("PARTIAL_WRITE_FAILURE"));
        assert!(result.is_retryable());
        assert_eq!(store.unified_row(id).unwrap().status, S::Pending);
        assert!(store.history_rows(id).is_empty());
    }

    #[tokio::test]
    async fn test_history_failure_is_a_warning() {
        let store = MemoryStore::new();
        let id = seed_escrow(&store, "ES-6", EscrowStatus::Created, S::Pending, false).await;
        let facade = facade(&store, DualWriteConfig::default());
        store.set_fail_history_writes(true);

        let result = facade
            .update_escrow_status(
                "ES-6",
                StatusUpdateRequest::new(S::PaymentConfirmed, StatusContext::WebhookResponse),
            )
            .await;
        assert!(result.success);
        assert!(!result.history_recorded);
        assert!(result.warnings.iter().any(|w| w.contains("history")));
        assert_eq!(store.unified_row(id).unwrap().status, S::PaymentConfirmed);
    }

    #[tokio::test]
    async fn test_allowed_next_statuses() {
        let store = MemoryStore::new();
        seed_escrow(&store, "ES-7", EscrowStatus::Active, S::FundsHeld, true).await;
        let facade = facade(&store, DualWriteConfig::default());
        let allowed = facade
            .get_allowed_next_statuses(&EntityKey::Legacy(LegacyRef::escrow("ES-7")))
            .await
            .unwrap();
        assert_eq!(
            allowed,
            vec![
                S::ReleasePending,
                S::Disputed,
                S::Cancelled
            ]
        );
    }
}
