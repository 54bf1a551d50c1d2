//! Dual-write Adapter
//!
//! Applies one validated status change to the legacy row and the unified row
//! inside the caller's unit of work, under the configured mode and strategy.

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::config::DualWriteConfig;
use super::{EntityKey, EntityPair, load_pair};
use crate::error::StatusError;
use crate::models::{LegacyEntity, LegacyRef, OperationId, TransactionId, UnifiedTransaction};
use crate::status::{LegacyStatus, LegacyStatusMapper, MappingError, UnifiedTransactionStatus};
use crate::store::{StoreTx, TransactionStore};

const LEGACY_SAVEPOINT: &str = "dual_write_legacy";
const UNIFIED_SAVEPOINT: &str = "dual_write_unified";

/// Rows the write applies to, as loaded by the caller
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteTarget<'a> {
    pub unified: Option<&'a UnifiedTransaction>,
    pub legacy: Option<&'a LegacyEntity>,
}

/// Outcome of one dual-write attempt
#[derive(Debug, Clone, PartialEq)]
pub struct DualWriteResult {
    pub operation_id: OperationId,
    pub legacy_success: bool,
    pub unified_success: bool,
    pub legacy_error: Option<String>,
    pub unified_error: Option<String>,
    pub rollback_performed: bool,
    /// The two sides now disagree and need repair
    pub has_inconsistency: bool,
    /// Overall success under the configured mode and strategy
    pub success: bool,
    /// Legacy value written, if the legacy side was written
    pub legacy_status: Option<LegacyStatus>,
    /// Unified row created by this write
    pub backfilled: Option<TransactionId>,
}

/// Per-side outcome
#[derive(Debug, Clone, PartialEq)]
enum SideOutcome {
    Written,
    /// The transaction has no row on this side at all
    NotApplicable,
    /// The mode excludes this side
    Disabled,
    Failed(String),
    /// CAS found a different status than the one validated against
    Lost(String),
}

impl SideOutcome {
    fn ok(&self) -> bool {
        matches!(self, SideOutcome::Written | SideOutcome::NotApplicable)
    }

    /// This side was supposed to be written
    fn attempted(&self) -> bool {
        !matches!(self, SideOutcome::NotApplicable | SideOutcome::Disabled)
    }

    fn error(&self) -> Option<String> {
        match self {
            SideOutcome::Failed(e) | SideOutcome::Lost(e) => Some(e.clone()),
            _ => None,
        }
    }
}

struct LegacyPlan {
    legacy_ref: LegacyRef,
    from: LegacyStatus,
    to: LegacyStatus,
}

enum UnifiedPlan {
    Update {
        id: TransactionId,
        from: UnifiedTransactionStatus,
    },
    Backfill(Box<UnifiedTransaction>),
}

pub struct DualWriteAdapter {
    pub(super) store: Arc<dyn TransactionStore>,
    pub(super) mapper: Arc<LegacyStatusMapper>,
    config: DualWriteConfig,
}

impl DualWriteAdapter {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        mapper: Arc<LegacyStatusMapper>,
        config: DualWriteConfig,
    ) -> Self {
        Self {
            store,
            mapper,
            config,
        }
    }

    pub fn config(&self) -> DualWriteConfig {
        self.config
    }

    pub fn mapper(&self) -> &LegacyStatusMapper {
        &self.mapper
    }

    /// Write `new_status` to both sides.
    ///
    /// `legacy_target` overrides the reverse mapping when the caller asked for
    /// a specific legacy value. Lost races are returned as
    /// [`StatusError::ConcurrentModification`] whatever the strategy.
    pub async fn update_status(
        &self,
        uow: &mut dyn StoreTx,
        target: WriteTarget<'_>,
        new_status: UnifiedTransactionStatus,
        legacy_target: Option<LegacyStatus>,
        operation_id: OperationId,
    ) -> Result<DualWriteResult, StatusError> {
        let mode = self.config.mode;

        // Plan both sides before touching anything so mapping bugs abort cleanly
        let (legacy_plan, mut legacy_outcome) = match target.legacy {
            Some(entity) if mode.writes_legacy() => {
                let to = match legacy_target {
                    Some(status) if status.system() != entity.system() => {
                        return Err(MappingError::SystemMismatch {
                            status,
                            expected: entity.system(),
                        }
                        .into());
                    }
                    Some(status) => status,
                    None => self.mapper.map_from_unified(new_status, entity.system())?,
                };
                let plan = LegacyPlan {
                    legacy_ref: entity.legacy_ref(),
                    from: entity.status(),
                    to,
                };
                (Some(plan), SideOutcome::Disabled)
            }
            Some(_) => (None, SideOutcome::Disabled),
            None => match target.unified.and_then(UnifiedTransaction::legacy_ref) {
                Some(r) if mode.writes_legacy() => (
                    None,
                    SideOutcome::Failed(format!("legacy entity {} is missing", r)),
                ),
                Some(_) => (None, SideOutcome::Disabled),
                None => (None, SideOutcome::NotApplicable),
            },
        };

        // A transaction with no legacy row is only representable on the unified side
        let unified_participates =
            mode.writes_unified() || legacy_outcome == SideOutcome::NotApplicable;
        let (unified_plan, mut unified_outcome) = match (target.unified, target.legacy) {
            (Some(tx), _) if unified_participates => (
                Some(UnifiedPlan::Update {
                    id: tx.transaction_id,
                    from: tx.status,
                }),
                SideOutcome::Disabled,
            ),
            (None, Some(entity)) if unified_participates => {
                let mut tx = entity.to_unified(new_status);
                if let Some(id) = entity.unified_transaction_id() {
                    tx.transaction_id = id;
                }
                (
                    Some(UnifiedPlan::Backfill(Box::new(tx))),
                    SideOutcome::Disabled,
                )
            }
            (None, None) => {
                return Err(StatusError::EntityNotFound {
                    kind: "transaction",
                    id: "dual-write target".to_string(),
                });
            }
            _ => (None, SideOutcome::Disabled),
        };

        let mut backfilled = None;
        if mode.legacy_is_primary() {
            if let Some(plan) = &legacy_plan {
                legacy_outcome = self.write_legacy(uow, plan).await?;
            }
            if let Some(plan) = &unified_plan {
                unified_outcome = self
                    .write_unified(uow, plan, new_status, &mut backfilled)
                    .await?;
            }
        } else {
            if let Some(plan) = &unified_plan {
                unified_outcome = self
                    .write_unified(uow, plan, new_status, &mut backfilled)
                    .await?;
            }
            if let Some(plan) = &legacy_plan {
                legacy_outcome = self.write_legacy(uow, plan).await?;
            }
        }

        for outcome in [&legacy_outcome, &unified_outcome] {
            if let SideOutcome::Lost(msg) = outcome {
                warn!(operation_id = %operation_id, reason = %msg, "Dual-write lost a race");
                return Err(StatusError::ConcurrentModification(msg.clone()));
            }
        }

        let legacy_ok = legacy_outcome.ok();
        let unified_ok = unified_outcome.ok();
        let both_attempted = legacy_outcome.attempted() && unified_outcome.attempted();
        let mut rollback_performed = false;

        if self.config.rolls_back_on_partial_failure() && both_attempted && legacy_ok != unified_ok
        {
            let written_legacy = if legacy_ok { legacy_plan.as_ref() } else { None };
            let written_unified = if unified_ok { unified_plan.as_ref() } else { None };
            self.compensate(
                uow,
                written_legacy,
                written_unified,
                new_status,
                backfilled,
                operation_id,
            )
            .await?;
            rollback_performed = true;
            backfilled = None;
        }

        let success = self.config.overall_success(legacy_ok, unified_ok) && !rollback_performed;
        let result = DualWriteResult {
            operation_id,
            legacy_success: legacy_ok,
            unified_success: unified_ok,
            legacy_error: legacy_outcome.error(),
            unified_error: unified_outcome.error(),
            rollback_performed,
            has_inconsistency: both_attempted && legacy_ok != unified_ok && !rollback_performed,
            success,
            legacy_status: (legacy_outcome == SideOutcome::Written)
                .then(|| legacy_plan.as_ref().map(|p| p.to))
                .flatten(),
            backfilled,
        };

        self.guard(&result)?;

        if result.has_inconsistency {
            warn!(
                operation_id = %operation_id,
                mode = %mode,
                strategy = %self.config.strategy,
                legacy_error = ?result.legacy_error,
                unified_error = ?result.unified_error,
                "Dual-write left sides inconsistent"
            );
        } else if result.success {
            info!(
                operation_id = %operation_id,
                new_status = %new_status,
                legacy_status = ?result.legacy_status,
                "Dual-write applied"
            );
        }
        Ok(result)
    }

    /// Status as seen through the mode's primary system
    pub async fn read_current_status(
        &self,
        uow: &mut dyn StoreTx,
        key: &EntityKey,
    ) -> Result<UnifiedTransactionStatus, StatusError> {
        let pair = load_pair(uow, key).await?;
        let status = self
            .primary_status(&pair)?
            .ok_or_else(|| StatusError::EntityNotFound {
                kind: "transaction",
                id: key.to_string(),
            })?;
        debug!(key = %key, mode = %self.config.mode, status = %status, "Read current status");
        Ok(status)
    }

    /// Current unified status of a loaded pair.
    ///
    /// When both rows agree the unified value wins, since it is never lossy
    /// (escrow `release_pending` is stored as legacy `active`). When they
    /// disagree the mode's primary system decides.
    pub fn primary_status(
        &self,
        pair: &EntityPair,
    ) -> Result<Option<UnifiedTransactionStatus>, StatusError> {
        Ok(match (&pair.legacy, &pair.unified) {
            (Some(entity), Some(tx)) => {
                if self.mapper.is_consistent(entity.status(), tx.status)
                    || !self.config.mode.legacy_is_primary()
                {
                    Some(tx.status)
                } else {
                    Some(self.mapper.map_to_unified(entity.status())?)
                }
            }
            (None, Some(tx)) => Some(tx.status),
            (Some(entity), None) => Some(self.mapper.map_to_unified(entity.status())?),
            (None, None) => None,
        })
    }

    async fn write_legacy(
        &self,
        uow: &mut dyn StoreTx,
        plan: &LegacyPlan,
    ) -> Result<SideOutcome, StatusError> {
        uow.savepoint(LEGACY_SAVEPOINT).await?;
        let outcome = match uow
            .update_legacy_status(&plan.legacy_ref, plan.from, plan.to)
            .await
        {
            Ok(true) => SideOutcome::Written,
            Ok(false) => SideOutcome::Lost(format!(
                "legacy entity {} is no longer {}",
                plan.legacy_ref, plan.from
            )),
            Err(e) => SideOutcome::Failed(e.to_string()),
        };
        settle(uow, LEGACY_SAVEPOINT, outcome).await
    }

    async fn write_unified(
        &self,
        uow: &mut dyn StoreTx,
        plan: &UnifiedPlan,
        new_status: UnifiedTransactionStatus,
        backfilled: &mut Option<TransactionId>,
    ) -> Result<SideOutcome, StatusError> {
        uow.savepoint(UNIFIED_SAVEPOINT).await?;
        let outcome = match plan {
            UnifiedPlan::Update { id, from } => {
                match uow.update_unified_status(*id, *from, new_status).await {
                    Ok(true) => SideOutcome::Written,
                    Ok(false) => SideOutcome::Lost(format!(
                        "unified transaction {} is no longer {}",
                        id, from
                    )),
                    Err(e) => SideOutcome::Failed(e.to_string()),
                }
            }
            UnifiedPlan::Backfill(tx) => match uow.insert_unified(tx).await {
                Ok(()) => SideOutcome::Written,
                Err(e) => SideOutcome::Failed(e.to_string()),
            },
        };
        let outcome = settle(uow, UNIFIED_SAVEPOINT, outcome).await?;
        if let (UnifiedPlan::Backfill(tx), SideOutcome::Written) = (plan, &outcome) {
            info!(
                transaction_id = %tx.transaction_id,
                legacy_entity_id = ?tx.legacy_entity_id,
                "Backfilled unified transaction"
            );
            *backfilled = Some(tx.transaction_id);
        }
        Ok(outcome)
    }

    /// Undo whichever side succeeded
    async fn compensate(
        &self,
        uow: &mut dyn StoreTx,
        legacy: Option<&LegacyPlan>,
        unified: Option<&UnifiedPlan>,
        new_status: UnifiedTransactionStatus,
        backfilled: Option<TransactionId>,
        operation_id: OperationId,
    ) -> Result<(), StatusError> {
        if let Some(plan) = legacy {
            let restored = uow
                .update_legacy_status(&plan.legacy_ref, plan.to, plan.from)
                .await?;
            if !restored {
                error!(
                    operation_id = %operation_id,
                    legacy = %plan.legacy_ref,
                    "Legacy compensation found unexpected status"
                );
                return Err(StatusError::ConcurrentModification(format!(
                    "legacy entity {} changed during compensation",
                    plan.legacy_ref
                )));
            }
        }
        match (unified, backfilled) {
            (Some(_), Some(id)) => {
                uow.delete_unified(id).await?;
            }
            (Some(UnifiedPlan::Update { id, from }), None) => {
                let restored = uow.update_unified_status(*id, new_status, *from).await?;
                if !restored {
                    error!(
                        operation_id = %operation_id,
                        transaction_id = %id,
                        "Unified compensation found unexpected status"
                    );
                    return Err(StatusError::ConcurrentModification(format!(
                        "unified transaction {} changed during compensation",
                        id
                    )));
                }
            }
            _ => {}
        }
        warn!(operation_id = %operation_id, "Dual-write partial failure compensated");
        Ok(())
    }

    /// Last check before a result leaves the adapter
    fn guard(&self, result: &DualWriteResult) -> Result<(), StatusError> {
        let expected = self
            .config
            .overall_success(result.legacy_success, result.unified_success)
            && !result.rollback_performed;
        let violates_fail_fast = result.success
            && self.config.rolls_back_on_partial_failure()
            && !(result.legacy_success && result.unified_success);

        if result.success != expected || violates_fail_fast {
            error!(
                operation_id = %result.operation_id,
                mode = %self.config.mode,
                strategy = %self.config.strategy,
                legacy_success = result.legacy_success,
                unified_success = result.unified_success,
                "Dual-write result violates the consistency contract"
            );
            return Err(StatusError::PartialWriteFailure {
                legacy: result.legacy_error.clone(),
                unified: result.unified_error.clone(),
            });
        }
        Ok(())
    }
}

/// Keep a side's write, or return the unit of work to where it was before
/// the side was attempted so the other side can still commit
async fn settle(
    uow: &mut dyn StoreTx,
    savepoint: &str,
    outcome: SideOutcome,
) -> Result<SideOutcome, StatusError> {
    if let SideOutcome::Failed(_) = outcome {
        uow.rollback_to_savepoint(savepoint).await?;
    }
    uow.release_savepoint(savepoint).await?;
    Ok(outcome)
}
