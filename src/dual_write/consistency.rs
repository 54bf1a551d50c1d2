//! Consistency Checking & Read-repair

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{info, warn};

use super::adapter::DualWriteAdapter;
use super::{EntityKey, EntityPair, load_pair};
use crate::error::StatusError;
use crate::models::{LegacyRef, OperationId, StatusHistoryEntry, TransactionId};
use crate::status::{LegacyStatus, ParseEnumError, StatusContext, UnifiedTransactionStatus};
use crate::store::StoreTx;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscrepancyKind {
    StatusMismatch,
    AmountMismatch,
    UserIdMismatch,
    MissingLegacyEntity,
    MissingUnifiedTransaction,
}

impl DiscrepancyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscrepancyKind::StatusMismatch => "status_mismatch",
            DiscrepancyKind::AmountMismatch => "amount_mismatch",
            DiscrepancyKind::UserIdMismatch => "user_id_mismatch",
            DiscrepancyKind::MissingLegacyEntity => "missing_legacy_entity",
            DiscrepancyKind::MissingUnifiedTransaction => "missing_unified_transaction",
        }
    }
}

impl fmt::Display for DiscrepancyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One observed disagreement, with the value each side holds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discrepancy {
    pub kind: DiscrepancyKind,
    pub legacy_value: Option<String>,
    pub unified_value: Option<String>,
}

impl Discrepancy {
    fn new(kind: DiscrepancyKind, legacy: Option<String>, unified: Option<String>) -> Self {
        Self {
            kind,
            legacy_value: legacy,
            unified_value: unified,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyReport {
    pub key: EntityKey,
    pub transaction_id: Option<TransactionId>,
    pub legacy_ref: Option<LegacyRef>,
    pub legacy_status: Option<LegacyStatus>,
    pub unified_status: Option<UnifiedTransactionStatus>,
    /// What the legacy status maps to
    pub expected_unified_status: Option<UnifiedTransactionStatus>,
    pub discrepancies: Vec<Discrepancy>,
    pub checked_at: DateTime<Utc>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.discrepancies.is_empty()
    }

    pub fn has(&self, kind: DiscrepancyKind) -> bool {
        self.discrepancies.iter().any(|d| d.kind == kind)
    }

    pub fn kinds(&self) -> Vec<DiscrepancyKind> {
        self.discrepancies.iter().map(|d| d.kind).collect()
    }
}

/// Which side is authoritative during repair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairStrategy {
    UnifiedWins,
    LegacyWins,
    /// Log only; a human resolves it
    #[default]
    Manual,
}

impl RepairStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepairStrategy::UnifiedWins => "unified_wins",
            RepairStrategy::LegacyWins => "legacy_wins",
            RepairStrategy::Manual => "manual",
        }
    }
}

impl fmt::Display for RepairStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RepairStrategy {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            RepairStrategy::UnifiedWins,
            RepairStrategy::LegacyWins,
            RepairStrategy::Manual,
        ]
        .into_iter()
        .find(|r| r.as_str().eq_ignore_ascii_case(s.trim()))
        .ok_or_else(|| ParseEnumError::new("repair strategy", s))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairOutcome {
    pub strategy: RepairStrategy,
    /// Report taken before any repair
    pub before: ConsistencyReport,
    pub repaired: Vec<DiscrepancyKind>,
    /// Left for a human
    pub unresolved: Vec<Discrepancy>,
}

impl RepairOutcome {
    pub fn performed(&self) -> bool {
        !self.repaired.is_empty()
    }
}

impl DualWriteAdapter {
    /// Compare both stored representations of one transaction
    pub async fn check_consistency(
        &self,
        key: &EntityKey,
    ) -> Result<ConsistencyReport, StatusError> {
        let mut uow = self.store.begin().await?;
        let result = self.inspect(uow.as_mut(), key).await;
        uow.rollback().await?;
        result.map(|(report, _)| report)
    }

    /// Re-check, then overwrite the losing side
    pub async fn repair_inconsistency(
        &self,
        key: &EntityKey,
        strategy: RepairStrategy,
    ) -> Result<RepairOutcome, StatusError> {
        let mut uow = self.store.begin().await?;
        let (before, pair) = self.inspect(uow.as_mut(), key).await?;

        let mut outcome = RepairOutcome {
            strategy,
            before: before.clone(),
            repaired: Vec::new(),
            unresolved: Vec::new(),
        };

        if before.is_consistent() {
            uow.rollback().await?;
            return Ok(outcome);
        }

        if strategy == RepairStrategy::Manual {
            for d in &before.discrepancies {
                warn!(
                    key = %key,
                    discrepancy = %d.kind,
                    legacy_value = ?d.legacy_value,
                    unified_value = ?d.unified_value,
                    "Inconsistency left for manual resolution"
                );
            }
            outcome.unresolved = before.discrepancies.clone();
            uow.rollback().await?;
            return Ok(outcome);
        }

        let result = match strategy {
            RepairStrategy::UnifiedWins => {
                self.repair_legacy_side(uow.as_mut(), &before, pair, &mut outcome)
                    .await
            }
            RepairStrategy::LegacyWins => {
                self.repair_unified_side(uow.as_mut(), &before, pair, &mut outcome)
                    .await
            }
            RepairStrategy::Manual => Ok(()),
        };
        if let Err(e) = result {
            uow.rollback().await?;
            return Err(e);
        }

        if outcome.performed() {
            uow.commit().await?;
            info!(
                key = %key,
                strategy = %strategy,
                repaired = ?outcome.repaired,
                "Inconsistency repaired"
            );
        } else {
            uow.rollback().await?;
        }
        for d in &outcome.unresolved {
            warn!(
                key = %key,
                discrepancy = %d.kind,
                "Inconsistency cannot be repaired automatically"
            );
        }
        Ok(outcome)
    }

    pub(crate) async fn inspect(
        &self,
        uow: &mut dyn StoreTx,
        key: &EntityKey,
    ) -> Result<(ConsistencyReport, EntityPair), StatusError> {
        let pair = load_pair(uow, key).await?;
        if pair.is_empty() {
            return Err(StatusError::EntityNotFound {
                kind: "transaction",
                id: key.to_string(),
            });
        }

        let mut report = ConsistencyReport {
            key: key.clone(),
            transaction_id: pair.unified.as_ref().map(|tx| tx.transaction_id),
            legacy_ref: pair.legacy_ref(),
            legacy_status: pair.legacy.as_ref().map(|e| e.status()),
            unified_status: pair.unified.as_ref().map(|tx| tx.status),
            expected_unified_status: None,
            discrepancies: Vec::new(),
            checked_at: Utc::now(),
        };

        match (&pair.legacy, &pair.unified) {
            (Some(entity), Some(tx)) => {
                let expected = self.mapper.map_to_unified(entity.status())?;
                report.expected_unified_status = Some(expected);
                if !self.mapper.is_consistent(entity.status(), tx.status) {
                    report.discrepancies.push(Discrepancy::new(
                        DiscrepancyKind::StatusMismatch,
                        Some(entity.status().as_str().to_string()),
                        Some(tx.status.as_str().to_string()),
                    ));
                }
                if entity.amount() != tx.amount {
                    report.discrepancies.push(Discrepancy::new(
                        DiscrepancyKind::AmountMismatch,
                        Some(entity.amount().to_string()),
                        Some(tx.amount.to_string()),
                    ));
                }
                if entity.user_id() != tx.user_id {
                    report.discrepancies.push(Discrepancy::new(
                        DiscrepancyKind::UserIdMismatch,
                        Some(entity.user_id().to_string()),
                        Some(tx.user_id.to_string()),
                    ));
                }
            }
            (Some(entity), None) => {
                report.expected_unified_status = Some(self.mapper.map_to_unified(entity.status())?);
                report.discrepancies.push(Discrepancy::new(
                    DiscrepancyKind::MissingUnifiedTransaction,
                    Some(entity.legacy_ref().to_string()),
                    None,
                ));
            }
            (None, Some(tx)) => {
                // Unified-only transactions legitimately have no legacy row
                if let Some(r) = tx.legacy_ref() {
                    report.discrepancies.push(Discrepancy::new(
                        DiscrepancyKind::MissingLegacyEntity,
                        None,
                        Some(r.to_string()),
                    ));
                }
            }
            (None, None) => {}
        }

        Ok((report, pair))
    }

    async fn repair_legacy_side(
        &self,
        uow: &mut dyn StoreTx,
        before: &ConsistencyReport,
        pair: EntityPair,
        outcome: &mut RepairOutcome,
    ) -> Result<(), StatusError> {
        let (Some(mut entity), Some(tx)) = (pair.legacy, pair.unified) else {
            outcome.unresolved = before.discrepancies.clone();
            return Ok(());
        };

        for d in &before.discrepancies {
            match d.kind {
                DiscrepancyKind::StatusMismatch => {
                    let target = self.mapper.map_from_unified(tx.status, entity.system())?;
                    entity.set_status(target)?;
                    outcome.repaired.push(d.kind);
                }
                DiscrepancyKind::AmountMismatch => {
                    entity.set_amount(tx.amount);
                    outcome.repaired.push(d.kind);
                }
                DiscrepancyKind::UserIdMismatch => {
                    entity.set_user_id(tx.user_id);
                    outcome.repaired.push(d.kind);
                }
                _ => outcome.unresolved.push(d.clone()),
            }
        }
        if outcome.performed() {
            uow.update_legacy(&entity).await?;
        }
        Ok(())
    }

    async fn repair_unified_side(
        &self,
        uow: &mut dyn StoreTx,
        before: &ConsistencyReport,
        pair: EntityPair,
        outcome: &mut RepairOutcome,
    ) -> Result<(), StatusError> {
        let Some(entity) = pair.legacy else {
            outcome.unresolved = before.discrepancies.clone();
            return Ok(());
        };
        let legacy_view = self.mapper.map_to_unified(entity.status())?;

        let Some(mut tx) = pair.unified else {
            // Rebuild the missing unified row from the legacy one
            let mut tx = entity.to_unified(legacy_view);
            if let Some(id) = entity.unified_transaction_id() {
                tx.transaction_id = id;
            }
            uow.insert_unified(&tx).await?;
            outcome.repaired.push(DiscrepancyKind::MissingUnifiedTransaction);
            return Ok(());
        };

        let old_status = tx.status;
        for d in &before.discrepancies {
            match d.kind {
                DiscrepancyKind::StatusMismatch => {
                    tx.status = legacy_view;
                    outcome.repaired.push(d.kind);
                }
                DiscrepancyKind::AmountMismatch => {
                    tx.amount = entity.amount();
                    tx.total_amount = tx.amount + tx.fee_amount;
                    outcome.repaired.push(d.kind);
                }
                DiscrepancyKind::UserIdMismatch => {
                    tx.user_id = entity.user_id();
                    outcome.repaired.push(d.kind);
                }
                _ => outcome.unresolved.push(d.clone()),
            }
        }
        if !outcome.performed() {
            return Ok(());
        }
        uow.update_unified(&tx).await?;

        if old_status != tx.status {
            let mut metadata = crate::models::Metadata::new();
            metadata.insert("repair_strategy".into(), RepairStrategy::LegacyWins.as_str().into());
            uow.append_history(&StatusHistoryEntry {
                history_id: ulid::Ulid::new(),
                transaction_id: tx.transaction_id,
                old_status,
                new_status: tx.status,
                accepted: true,
                forced: true,
                reason: "consistency repair".to_string(),
                triggered_by: "consistency_repair".to_string(),
                context: StatusContext::ErrorRecovery,
                metadata,
                operation_id: OperationId::new(),
                created_at: Utc::now(),
            })
            .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dual_write::{DualWriteConfig, DualWriteMode, DualWriteStrategy};
    use crate::models::{ExchangeDirection, ExchangeOrder, LegacyEntity};
    use crate::status::{ExchangeStatus, LegacyStatusMapper};
    use crate::store::{MemoryStore, TransactionStore};
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn order(id: &str, status: ExchangeStatus) -> LegacyEntity {
        let now = Utc::now();
        LegacyEntity::Exchange(ExchangeOrder {
            order_id: id.into(),
            user_id: 55,
            direction: ExchangeDirection::SellCrypto,
            amount: dec!(0.25),
            currency: "BTC".into(),
            output_amount: dec!(15000),
            output_currency: "USD".into(),
            destination_address: None,
            status,
            unified_transaction_id: None,
            version: 0,
            created_at: now,
            updated_at: now,
        })
    }

    fn adapter(store: &MemoryStore) -> DualWriteAdapter {
        DualWriteAdapter::new(
            Arc::new(store.clone()),
            Arc::new(LegacyStatusMapper::new()),
            DualWriteConfig::new(
                DualWriteMode::DualWriteLegacyPrimary,
                DualWriteStrategy::FailFast,
            ),
        )
    }

    async fn seed_drifted(store: &MemoryStore) -> (LegacyEntity, TransactionId) {
        let entity = order("EX-1", ExchangeStatus::Processing);
        let mut tx = entity.to_unified(UnifiedTransactionStatus::PaymentConfirmed);
        tx.amount = dec!(0.3);
        let mut uow = store.begin().await.unwrap();
        uow.insert_legacy(&entity).await.unwrap();
        uow.insert_unified(&tx).await.unwrap();
        uow.commit().await.unwrap();
        (entity, tx.transaction_id)
    }

    #[tokio::test]
    async fn test_reports_status_and_amount_mismatch() {
        let store = MemoryStore::new();
        let (entity, _) = seed_drifted(&store).await;

        let report = adapter(&store)
            .check_consistency(&EntityKey::Legacy(entity.legacy_ref()))
            .await
            .unwrap();
        assert!(report.has(DiscrepancyKind::StatusMismatch));
        assert!(report.has(DiscrepancyKind::AmountMismatch));
        assert!(!report.has(DiscrepancyKind::UserIdMismatch));

        let status = report
            .discrepancies
            .iter()
            .find(|d| d.kind == DiscrepancyKind::StatusMismatch)
            .unwrap();
        assert_eq!(status.legacy_value.as_deref(), Some("processing"));
        assert_eq!(status.unified_value.as_deref(), Some("payment_confirmed"));
        assert_eq!(
            report.expected_unified_status,
            Some(UnifiedTransactionStatus::Processing)
        );
    }

    #[tokio::test]
    async fn test_manual_repair_mutates_nothing() {
        let store = MemoryStore::new();
        let (entity, id) = seed_drifted(&store).await;

        let outcome = adapter(&store)
            .repair_inconsistency(&EntityKey::Transaction(id), RepairStrategy::Manual)
            .await
            .unwrap();
        assert!(!outcome.performed());
        assert_eq!(outcome.unresolved.len(), 2);
        assert_eq!(
            store.unified_row(id).unwrap().status,
            UnifiedTransactionStatus::PaymentConfirmed
        );
        assert_eq!(
            store.legacy_row(&entity.legacy_ref()).unwrap().status(),
            ExchangeStatus::Processing.into()
        );
    }

    #[tokio::test]
    async fn test_legacy_wins_overwrites_unified() {
        let store = MemoryStore::new();
        let (_, id) = seed_drifted(&store).await;
        let adapter = adapter(&store);

        let outcome = adapter
            .repair_inconsistency(&EntityKey::Transaction(id), RepairStrategy::LegacyWins)
            .await
            .unwrap();
        assert_eq!(outcome.repaired.len(), 2);

        let row = store.unified_row(id).unwrap();
        assert_eq!(row.status, UnifiedTransactionStatus::Processing);
        assert_eq!(row.amount, dec!(0.25));
        assert_eq!(store.history_rows(id).len(), 1);
        assert!(
            adapter
                .check_consistency(&EntityKey::Transaction(id))
                .await
                .unwrap()
                .is_consistent()
        );
    }

    #[tokio::test]
    async fn test_unified_wins_overwrites_legacy() {
        let store = MemoryStore::new();
        let (entity, id) = seed_drifted(&store).await;

        adapter(&store)
            .repair_inconsistency(&EntityKey::Transaction(id), RepairStrategy::UnifiedWins)
            .await
            .unwrap();
        let legacy = store.legacy_row(&entity.legacy_ref()).unwrap();
        assert_eq!(legacy.status(), ExchangeStatus::PaymentConfirmed.into());
        assert_eq!(legacy.amount(), dec!(0.3));
    }

    async fn seed_wrong_owner(store: &MemoryStore, id: &str) -> (LegacyEntity, TransactionId) {
        let entity = order(id, ExchangeStatus::Processing);
        let mut tx = entity.to_unified(UnifiedTransactionStatus::Processing);
        tx.user_id = 56;
        let mut uow = store.begin().await.unwrap();
        uow.insert_legacy(&entity).await.unwrap();
        uow.insert_unified(&tx).await.unwrap();
        uow.commit().await.unwrap();
        (entity, tx.transaction_id)
    }

    #[tokio::test]
    async fn test_user_id_mismatch_follows_winning_side() {
        let store = MemoryStore::new();
        let adapter = adapter(&store);

        let (_, id) = seed_wrong_owner(&store, "EX-3").await;
        let key = EntityKey::Transaction(id);
        assert_eq!(
            adapter.check_consistency(&key).await.unwrap().kinds(),
            vec![DiscrepancyKind::UserIdMismatch]
        );
        let outcome = adapter
            .repair_inconsistency(&key, RepairStrategy::LegacyWins)
            .await
            .unwrap();
        assert_eq!(outcome.repaired, vec![DiscrepancyKind::UserIdMismatch]);
        assert!(outcome.unresolved.is_empty());
        assert_eq!(store.unified_row(id).unwrap().user_id, 55);
        assert!(adapter.check_consistency(&key).await.unwrap().is_consistent());

        let (entity, id) = seed_wrong_owner(&store, "EX-4").await;
        let key = EntityKey::Transaction(id);
        adapter
            .repair_inconsistency(&key, RepairStrategy::UnifiedWins)
            .await
            .unwrap();
        assert_eq!(store.legacy_row(&entity.legacy_ref()).unwrap().user_id(), 56);
        assert!(adapter.check_consistency(&key).await.unwrap().is_consistent());
    }

    #[tokio::test]
    async fn test_missing_unified_is_backfilled_by_legacy_wins() {
        let store = MemoryStore::new();
        let entity = order("EX-2", ExchangeStatus::RateLocked);
        let mut uow = store.begin().await.unwrap();
        uow.insert_legacy(&entity).await.unwrap();
        uow.commit().await.unwrap();
        let key = EntityKey::Legacy(entity.legacy_ref());

        let adapter = adapter(&store);
        let report = adapter.check_consistency(&key).await.unwrap();
        assert_eq!(report.kinds(), vec![DiscrepancyKind::MissingUnifiedTransaction]);

        adapter
            .repair_inconsistency(&key, RepairStrategy::LegacyWins)
            .await
            .unwrap();
        let report = adapter.check_consistency(&key).await.unwrap();
        assert!(report.is_consistent());
        assert_eq!(report.unified_status, Some(UnifiedTransactionStatus::FundsHeld));
    }
}
