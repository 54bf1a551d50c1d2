//! Consistency Worker
//!
//! Background worker that periodically compares the two stored
//! representations of recently touched transactions and applies the
//! configured repair strategy to any that disagree.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::dual_write::{DualWriteAdapter, EntityKey, RepairStrategy};
use crate::error::StatusError;
use crate::models::LegacyRef;
use crate::store::{TransactionStore, rollback_quietly};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsistencyWorkerConfig {
    pub enabled: bool,
    /// How often to scan
    pub scan_interval_secs: u64,
    /// Most recently updated rows checked per scan, from each side
    pub batch_size: usize,
    pub repair_strategy: RepairStrategy,
}

impl Default for ConsistencyWorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            scan_interval_secs: 60,
            batch_size: 100,
            repair_strategy: RepairStrategy::Manual,
        }
    }
}

/// What one scan found and did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub checked: usize,
    pub inconsistent: usize,
    pub repaired: usize,
    pub failed: usize,
}

pub struct ConsistencyWorker {
    store: Arc<dyn TransactionStore>,
    adapter: Arc<DualWriteAdapter>,
    config: ConsistencyWorkerConfig,
}

impl ConsistencyWorker {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        adapter: Arc<DualWriteAdapter>,
        config: ConsistencyWorkerConfig,
    ) -> Self {
        Self {
            store,
            adapter,
            config,
        }
    }

    pub fn with_defaults(store: Arc<dyn TransactionStore>, adapter: Arc<DualWriteAdapter>) -> Self {
        Self::new(store, adapter, ConsistencyWorkerConfig::default())
    }

    /// Scan on every interval tick until `shutdown` resolves
    pub async fn run(&self, shutdown: impl Future<Output = ()>) {
        info!(
            scan_interval_secs = self.config.scan_interval_secs,
            batch_size = self.config.batch_size,
            strategy = %self.config.repair_strategy,
            "Starting consistency worker"
        );

        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.config.scan_interval_secs.max(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.scan_and_repair().await {
                        error!(error = %e, "Consistency scan failed");
                    }
                }
                _ = &mut shutdown => {
                    info!("Consistency worker stopped");
                    return;
                }
            }
        }
    }

    /// Run a single check-and-repair cycle.
    ///
    /// Recent unified rows are checked first, then recent legacy rows that
    /// none of those reports covered, so a legacy row with no unified
    /// counterpart is still found.
    pub async fn scan_and_repair(&self) -> Result<ScanSummary, StatusError> {
        let mut uow = self.store.begin().await?;
        let recent = match uow.recent_transactions(self.config.batch_size).await {
            Ok(unified) => uow
                .recent_legacy(self.config.batch_size)
                .await
                .map(|legacy| (unified, legacy)),
            Err(e) => Err(e),
        };
        rollback_quietly(uow.as_mut()).await;
        let (recent_unified, recent_legacy) = recent?;

        let mut summary = ScanSummary::default();
        let mut covered = HashSet::new();
        for id in recent_unified {
            let key = EntityKey::Transaction(id);
            if let Some(legacy_ref) = self.check_one(key, &mut summary).await {
                covered.insert(legacy_ref);
            }
        }
        for legacy_ref in recent_legacy {
            if !covered.contains(&legacy_ref) {
                self.check_one(EntityKey::Legacy(legacy_ref), &mut summary).await;
            }
        }

        if summary.inconsistent > 0 {
            info!(
                checked = summary.checked,
                inconsistent = summary.inconsistent,
                repaired = summary.repaired,
                failed = summary.failed,
                "Consistency scan finished"
            );
        }
        Ok(summary)
    }

    /// Check one entity and repair it if needed. Returns the legacy row the
    /// check looked at, if any.
    async fn check_one(&self, key: EntityKey, summary: &mut ScanSummary) -> Option<LegacyRef> {
        summary.checked += 1;

        let report = match self.adapter.check_consistency(&key).await {
            Ok(report) => report,
            Err(e) => {
                summary.failed += 1;
                error!(key = %key, error = %e, "Consistency check failed");
                return None;
            }
        };
        if report.is_consistent() {
            return report.legacy_ref;
        }
        summary.inconsistent += 1;
        warn!(
            key = %key,
            kinds = ?report.kinds(),
            legacy_status = ?report.legacy_status,
            unified_status = ?report.unified_status,
            "Dual-write inconsistency detected"
        );

        match self
            .adapter
            .repair_inconsistency(&key, self.config.repair_strategy)
            .await
        {
            Ok(outcome) if outcome.performed() => summary.repaired += 1,
            Ok(_) => debug!(key = %key, "Inconsistency left unresolved"),
            Err(e) => {
                summary.failed += 1;
                error!(key = %key, error = %e, "Repair failed");
            }
        }
        report.legacy_ref
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dual_write::DualWriteConfig;
    use crate::models::{Escrow, LegacyEntity};
    use crate::status::{EscrowStatus, LegacyStatusMapper, UnifiedTransactionStatus};
    use crate::store::MemoryStore;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    async fn seed_divergent(store: &MemoryStore) -> crate::models::TransactionId {
        let now = Utc::now();
        let mut entity = LegacyEntity::Escrow(Escrow {
            escrow_id: "ES-W1".into(),
            user_id: 1,
            seller_id: 2,
            amount: dec!(10),
            currency: "USDT".into(),
            status: EscrowStatus::PaymentConfirmed,
            unified_transaction_id: None,
            version: 0,
            created_at: now,
            updated_at: now,
        });
        // Unified side never saw the payment confirmation
        let tx = entity.to_unified(UnifiedTransactionStatus::AwaitingPayment);
        entity.set_unified_transaction_id(Some(tx.transaction_id));
        let mut uow = store.begin().await.unwrap();
        uow.insert_legacy(&entity).await.unwrap();
        uow.insert_unified(&tx).await.unwrap();
        uow.commit().await.unwrap();
        tx.transaction_id
    }

    fn worker(store: &MemoryStore, strategy: RepairStrategy) -> ConsistencyWorker {
        let shared: Arc<dyn TransactionStore> = Arc::new(store.clone());
        let adapter = DualWriteAdapter::new(
            shared.clone(),
            Arc::new(LegacyStatusMapper::new()),
            DualWriteConfig::default(),
        );
        ConsistencyWorker::new(
            shared,
            Arc::new(adapter),
            ConsistencyWorkerConfig {
                repair_strategy: strategy,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_worker_config_default() {
        let config = ConsistencyWorkerConfig::default();
        assert_eq!(config.scan_interval_secs, 60);
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.repair_strategy, RepairStrategy::Manual);
    }

    #[tokio::test]
    async fn test_manual_strategy_only_reports() {
        let store = MemoryStore::new();
        let id = seed_divergent(&store).await;

        let summary = worker(&store, RepairStrategy::Manual)
            .scan_and_repair()
            .await
            .unwrap();
        assert_eq!(summary.checked, 1);
        assert_eq!(summary.inconsistent, 1);
        assert_eq!(summary.repaired, 0);
        assert_eq!(
            store.unified_row(id).unwrap().status,
            UnifiedTransactionStatus::AwaitingPayment
        );
    }

    #[tokio::test]
    async fn test_legacy_wins_repairs_unified_side() {
        let store = MemoryStore::new();
        let id = seed_divergent(&store).await;
        let w = worker(&store, RepairStrategy::LegacyWins);

        let summary = w.scan_and_repair().await.unwrap();
        assert_eq!(summary.repaired, 1);
        assert_eq!(
            store.unified_row(id).unwrap().status,
            UnifiedTransactionStatus::PaymentConfirmed
        );

        let again = w.scan_and_repair().await.unwrap();
        assert_eq!(again.inconsistent, 0);
    }

    #[tokio::test]
    async fn test_legacy_row_without_unified_is_found() {
        let store = MemoryStore::new();
        let id = seed_divergent(&store).await;
        let now = Utc::now();
        let orphan = LegacyEntity::Escrow(Escrow {
            escrow_id: "ES-W2".into(),
            user_id: 3,
            seller_id: 4,
            amount: dec!(25),
            currency: "USDT".into(),
            status: EscrowStatus::Created,
            unified_transaction_id: None,
            version: 0,
            created_at: now,
            updated_at: now,
        });
        let mut uow = store.begin().await.unwrap();
        uow.insert_legacy(&orphan).await.unwrap();
        uow.commit().await.unwrap();

        let w = worker(&store, RepairStrategy::LegacyWins);
        let summary = w.scan_and_repair().await.unwrap();
        // ES-W1 once through its unified row, ES-W2 through its legacy row
        assert_eq!(summary.checked, 2);
        assert_eq!(summary.inconsistent, 2);
        assert_eq!(summary.repaired, 2);
        assert_eq!(
            store.unified_row(id).unwrap().status,
            UnifiedTransactionStatus::PaymentConfirmed
        );

        let mut uow = store.begin().await.unwrap();
        let backfilled = uow
            .find_unified_by_legacy(&orphan.legacy_ref())
            .await
            .unwrap()
            .unwrap();
        uow.rollback().await.unwrap();
        assert_eq!(backfilled.status, UnifiedTransactionStatus::Pending);
        assert_eq!(backfilled.user_id, 3);

        let again = w.scan_and_repair().await.unwrap();
        assert_eq!(again.inconsistent, 0);
        assert_eq!(again.checked, 2);
    }

    #[tokio::test]
    async fn test_run_scans_until_shutdown() {
        let store = MemoryStore::new();
        let id = seed_divergent(&store).await;
        let w = worker(&store, RepairStrategy::LegacyWins);

        // First tick fires immediately
        w.run(tokio::time::sleep(Duration::from_millis(50))).await;
        assert_eq!(
            store.unified_row(id).unwrap().status,
            UnifiedTransactionStatus::PaymentConfirmed
        );
    }
}
