//! In-memory Store
//!
//! Optimistic implementation of [`TransactionStore`]. Each unit of work runs
//! against a private snapshot of the committed tables and remembers the
//! original value of every row it touched. `commit` re-checks those rows
//! against the committed state and fails with [`StoreError::Conflict`] if any
//! of them moved in the meantime.
//!
//! Like PostgreSQL, a write rejected by an injected fault leaves the unit of
//! work aborted: everything but a rollback fails until it returns to a
//! savepoint, and `commit` publishes nothing.
//!
//! Used by tests and by the binary when no PostgreSQL URL is configured.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::{StoreError, StoreTx, TransactionStore};
use crate::models::{
    BalanceChange, HoldStatus, IdempotencyToken, LegacyEntity, LegacyRef, StatusHistoryEntry,
    TransactionId, UnifiedTransaction, UserId, WalletHold,
};
use crate::status::{LegacyStatus, UnifiedTransactionStatus};

type WalletKey = (UserId, String);

#[derive(Debug, Clone, Default)]
struct Tables {
    unified: HashMap<TransactionId, UnifiedTransaction>,
    legacy: HashMap<LegacyRef, LegacyEntity>,
    history: Vec<StatusHistoryEntry>,
    wallets: HashMap<WalletKey, Decimal>,
    holds: HashMap<String, WalletHold>,
    idempotency: HashMap<String, IdempotencyToken>,
}

#[derive(Debug, Default)]
struct Faults {
    fail_legacy_writes: AtomicBool,
    fail_unified_writes: AtomicBool,
    fail_history_writes: AtomicBool,
    commit_delay: Mutex<Option<Duration>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panicking test thread must not wedge every other unit of work
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Shared handle; clones see the same tables
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    committed: Arc<Mutex<Tables>>,
    faults: Arc<Faults>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // === Failure injection ===

    /// Every legacy-row write fails with [`StoreError::Unavailable`]
    pub fn set_fail_legacy_writes(&self, fail: bool) {
        self.faults.fail_legacy_writes.store(fail, Ordering::SeqCst);
    }

    /// Every unified-row write fails with [`StoreError::Unavailable`]
    pub fn set_fail_unified_writes(&self, fail: bool) {
        self.faults.fail_unified_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_history_writes(&self, fail: bool) {
        self.faults.fail_history_writes.store(fail, Ordering::SeqCst);
    }

    /// Sleep before validating each commit, widening race windows in tests
    pub fn set_commit_delay(&self, delay: Option<Duration>) {
        *lock(&self.faults.commit_delay) = delay;
    }

    // === Direct inspection (bypasses units of work) ===

    pub fn seed_wallet(&self, user_id: UserId, currency: &str, balance: Decimal) {
        lock(&self.committed)
            .wallets
            .insert((user_id, currency.to_string()), balance);
    }

    pub fn unified_row(&self, id: TransactionId) -> Option<UnifiedTransaction> {
        lock(&self.committed).unified.get(&id).cloned()
    }

    pub fn legacy_row(&self, legacy: &LegacyRef) -> Option<LegacyEntity> {
        lock(&self.committed).legacy.get(legacy).cloned()
    }

    pub fn history_rows(&self, id: TransactionId) -> Vec<StatusHistoryEntry> {
        lock(&self.committed)
            .history
            .iter()
            .filter(|h| h.transaction_id == id)
            .cloned()
            .collect()
    }

    pub fn balance(&self, user_id: UserId, currency: &str) -> Decimal {
        lock(&self.committed)
            .wallets
            .get(&(user_id, currency.to_string()))
            .copied()
            .unwrap_or(Decimal::ZERO)
    }
}

#[async_trait]
impl TransactionStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let snapshot = lock(&self.committed).clone();
        Ok(Box::new(MemoryTx {
            committed: self.committed.clone(),
            faults: self.faults.clone(),
            history_base: snapshot.history.len(),
            working: snapshot,
            unified: Touched::default(),
            legacy: Touched::default(),
            wallets: Touched::default(),
            holds: Touched::default(),
            idempotency: Touched::default(),
            savepoints: Vec::new(),
            aborted: None,
            finished: false,
        }))
    }
}

// ============================================================================
// Unit of work
// ============================================================================

/// Rows a unit of work has read or written, with their values at first touch
#[derive(Debug)]
struct Touched<K, V> {
    originals: HashMap<K, Option<V>>,
    dirty: HashSet<K>,
}

impl<K, V> Default for Touched<K, V> {
    fn default() -> Self {
        Self {
            originals: HashMap::new(),
            dirty: HashSet::new(),
        }
    }
}

impl<K, V> Touched<K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone + PartialEq,
{
    fn read(&mut self, key: &K, working: &HashMap<K, V>) {
        if !self.originals.contains_key(key) {
            self.originals.insert(key.clone(), working.get(key).cloned());
        }
    }

    /// Must be called before `working` is mutated
    fn write(&mut self, key: &K, working: &HashMap<K, V>) {
        self.read(key, working);
        self.dirty.insert(key.clone());
    }

    fn validate(&self, table: &'static str, committed: &HashMap<K, V>) -> Result<(), StoreError> {
        for (key, original) in &self.originals {
            if committed.get(key) != original.as_ref() {
                return Err(StoreError::Conflict(format!(
                    "{} row {:?} changed concurrently",
                    table, key
                )));
            }
        }
        Ok(())
    }

    fn apply(&self, working: &HashMap<K, V>, committed: &mut HashMap<K, V>) {
        for key in &self.dirty {
            match working.get(key) {
                Some(v) => {
                    committed.insert(key.clone(), v.clone());
                }
                None => {
                    committed.remove(key);
                }
            }
        }
    }
}

struct MemoryTx {
    committed: Arc<Mutex<Tables>>,
    faults: Arc<Faults>,
    working: Tables,
    history_base: usize,
    unified: Touched<TransactionId, UnifiedTransaction>,
    legacy: Touched<LegacyRef, LegacyEntity>,
    wallets: Touched<WalletKey, Decimal>,
    holds: Touched<String, WalletHold>,
    idempotency: Touched<String, IdempotencyToken>,
    savepoints: Vec<(String, Tables)>,
    /// Why the unit of work is unusable, if a write failed
    aborted: Option<String>,
    finished: bool,
}

impl MemoryTx {
    fn ensure_not_finished(&self) -> Result<(), StoreError> {
        if self.finished {
            return Err(StoreError::Database(
                "unit of work already finished".to_string(),
            ));
        }
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        self.ensure_not_finished()?;
        if let Some(reason) = &self.aborted {
            return Err(StoreError::Aborted(reason.clone()));
        }
        Ok(())
    }

    fn fail_write(&mut self, flag: &AtomicBool, message: &str) -> Result<(), StoreError> {
        if flag.load(Ordering::SeqCst) {
            self.aborted = Some(message.to_string());
            return Err(StoreError::Unavailable(message.to_string()));
        }
        Ok(())
    }

    fn check_unified_fault(&mut self) -> Result<(), StoreError> {
        let faults = self.faults.clone();
        self.fail_write(
            &faults.fail_unified_writes,
            "unified transaction table rejected the write",
        )
    }

    fn check_legacy_fault(&mut self) -> Result<(), StoreError> {
        let faults = self.faults.clone();
        self.fail_write(&faults.fail_legacy_writes, "legacy table rejected the write")
    }

    fn savepoint_index(&self, name: &str) -> Result<usize, StoreError> {
        self.savepoints
            .iter()
            .rposition(|(n, _)| n == name)
            .ok_or_else(|| StoreError::NotFound {
                kind: "savepoint",
                id: name.to_string(),
            })
    }

    /// Validate touched rows and publish staged writes
    fn publish(&mut self) -> Result<(), StoreError> {
        let mut committed = lock(&self.committed);

        self.unified.validate("unified", &committed.unified)?;
        self.legacy.validate("legacy", &committed.legacy)?;
        self.wallets.validate("wallet", &committed.wallets)?;
        self.holds.validate("hold", &committed.holds)?;
        self.idempotency
            .validate("idempotency", &committed.idempotency)?;

        self.unified.apply(&self.working.unified, &mut committed.unified);
        self.legacy.apply(&self.working.legacy, &mut committed.legacy);
        self.wallets.apply(&self.working.wallets, &mut committed.wallets);
        self.holds.apply(&self.working.holds, &mut committed.holds);
        self.idempotency
            .apply(&self.working.idempotency, &mut committed.idempotency);

        // created_at is non-decreasing across the whole log
        for entry in self.working.history.drain(self.history_base..) {
            let mut entry = entry;
            if let Some(last) = committed.history.last()
                && entry.created_at < last.created_at
            {
                entry.created_at = last.created_at;
            }
            committed.history.push(entry);
        }

        Ok(())
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn get_unified(
        &mut self,
        id: TransactionId,
    ) -> Result<Option<UnifiedTransaction>, StoreError> {
        self.ensure_open()?;
        self.unified.read(&id, &self.working.unified);
        Ok(self.working.unified.get(&id).cloned())
    }

    async fn find_unified_by_legacy(
        &mut self,
        legacy: &LegacyRef,
    ) -> Result<Option<UnifiedTransaction>, StoreError> {
        self.ensure_open()?;
        let found = self
            .working
            .unified
            .values()
            .find(|tx| tx.legacy_ref().as_ref() == Some(legacy))
            .cloned();
        if let Some(tx) = &found {
            self.unified.read(&tx.transaction_id, &self.working.unified);
        }
        Ok(found)
    }

    async fn insert_unified(&mut self, tx: &UnifiedTransaction) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.check_unified_fault()?;
        if self.working.unified.contains_key(&tx.transaction_id) {
            return Err(StoreError::Duplicate(format!(
                "unified transaction {}",
                tx.transaction_id
            )));
        }
        self.unified.write(&tx.transaction_id, &self.working.unified);
        self.working.unified.insert(tx.transaction_id, tx.clone());
        Ok(())
    }

    async fn delete_unified(&mut self, id: TransactionId) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.unified.write(&id, &self.working.unified);
        self.working.unified.remove(&id);
        Ok(())
    }

    async fn update_unified_status(
        &mut self,
        id: TransactionId,
        expected: UnifiedTransactionStatus,
        new_status: UnifiedTransactionStatus,
    ) -> Result<bool, StoreError> {
        self.ensure_open()?;
        self.check_unified_fault()?;
        self.unified.read(&id, &self.working.unified);
        match self.working.unified.get(&id) {
            Some(row) if row.status == expected => {}
            Some(_) => return Ok(false),
            None => {
                return Err(StoreError::NotFound {
                    kind: "unified transaction",
                    id: id.to_string(),
                });
            }
        }
        self.unified.write(&id, &self.working.unified);
        if let Some(row) = self.working.unified.get_mut(&id) {
            row.status = new_status;
            row.version += 1;
            row.updated_at = Utc::now();
        }
        Ok(true)
    }

    async fn update_unified(&mut self, tx: &UnifiedTransaction) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.check_unified_fault()?;
        let id = tx.transaction_id;
        self.unified.write(&id, &self.working.unified);
        let current = self
            .working
            .unified
            .get(&id)
            .ok_or_else(|| StoreError::NotFound {
                kind: "unified transaction",
                id: id.to_string(),
            })?;
        if current.version != tx.version {
            return Err(StoreError::Conflict(format!(
                "unified transaction {} is at version {}, caller had {}",
                id, current.version, tx.version
            )));
        }
        let mut row = tx.clone();
        row.version += 1;
        row.updated_at = Utc::now();
        self.working.unified.insert(id, row);
        Ok(())
    }

    async fn recent_transactions(
        &mut self,
        limit: usize,
    ) -> Result<Vec<TransactionId>, StoreError> {
        self.ensure_open()?;
        let mut rows: Vec<&UnifiedTransaction> = self.working.unified.values().collect();
        rows.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then(b.transaction_id.cmp(&a.transaction_id))
        });
        Ok(rows
            .into_iter()
            .take(limit)
            .map(|tx| tx.transaction_id)
            .collect())
    }

    async fn get_legacy(&mut self, legacy: &LegacyRef) -> Result<Option<LegacyEntity>, StoreError> {
        self.ensure_open()?;
        self.legacy.read(legacy, &self.working.legacy);
        Ok(self.working.legacy.get(legacy).cloned())
    }

    async fn recent_legacy(&mut self, limit: usize) -> Result<Vec<LegacyRef>, StoreError> {
        self.ensure_open()?;
        let mut rows: Vec<(&LegacyRef, &LegacyEntity)> = self.working.legacy.iter().collect();
        rows.sort_by(|(ka, a), (kb, b)| {
            b.updated_at()
                .cmp(&a.updated_at())
                .then(kb.cmp(ka))
        });
        Ok(rows
            .into_iter()
            .take(limit)
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn insert_legacy(&mut self, entity: &LegacyEntity) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.check_legacy_fault()?;
        let key = entity.legacy_ref();
        if self.working.legacy.contains_key(&key) {
            return Err(StoreError::Duplicate(format!("legacy entity {}", key)));
        }
        self.legacy.write(&key, &self.working.legacy);
        self.working.legacy.insert(key, entity.clone());
        Ok(())
    }

    async fn update_legacy_status(
        &mut self,
        legacy: &LegacyRef,
        expected: LegacyStatus,
        new_status: LegacyStatus,
    ) -> Result<bool, StoreError> {
        self.ensure_open()?;
        self.check_legacy_fault()?;
        self.legacy.read(legacy, &self.working.legacy);
        match self.working.legacy.get(legacy) {
            Some(row) if row.status() == expected => {}
            Some(_) => return Ok(false),
            None => {
                return Err(StoreError::NotFound {
                    kind: "legacy entity",
                    id: legacy.to_string(),
                });
            }
        }
        self.legacy.write(legacy, &self.working.legacy);
        if let Some(row) = self.working.legacy.get_mut(legacy) {
            row.set_status(new_status)
                .map_err(|e| StoreError::Corrupt(e.to_string()))?;
            row.touch();
        }
        Ok(true)
    }

    async fn update_legacy(&mut self, entity: &LegacyEntity) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.check_legacy_fault()?;
        let key = entity.legacy_ref();
        self.legacy.write(&key, &self.working.legacy);
        let current = self
            .working
            .legacy
            .get(&key)
            .ok_or_else(|| StoreError::NotFound {
                kind: "legacy entity",
                id: key.to_string(),
            })?;
        if current.version() != entity.version() {
            return Err(StoreError::Conflict(format!(
                "legacy entity {} is at version {}, caller had {}",
                key,
                current.version(),
                entity.version()
            )));
        }
        let mut row = entity.clone();
        row.touch();
        self.working.legacy.insert(key, row);
        Ok(())
    }

    async fn append_history(&mut self, entry: &StatusHistoryEntry) -> Result<(), StoreError> {
        self.ensure_open()?;
        let faults = self.faults.clone();
        self.fail_write(
            &faults.fail_history_writes,
            "history table rejected the append",
        )?;
        self.working.history.push(entry.clone());
        Ok(())
    }

    async fn history(
        &mut self,
        id: TransactionId,
    ) -> Result<Vec<StatusHistoryEntry>, StoreError> {
        self.ensure_open()?;
        Ok(self
            .working
            .history
            .iter()
            .filter(|h| h.transaction_id == id)
            .cloned()
            .collect())
    }

    async fn wallet_balance(
        &mut self,
        user_id: UserId,
        currency: &str,
    ) -> Result<Decimal, StoreError> {
        self.ensure_open()?;
        let key = (user_id, currency.to_string());
        self.wallets.read(&key, &self.working.wallets);
        Ok(self
            .working
            .wallets
            .get(&key)
            .copied()
            .unwrap_or(Decimal::ZERO))
    }

    async fn adjust_wallet(
        &mut self,
        user_id: UserId,
        currency: &str,
        delta: Decimal,
    ) -> Result<BalanceChange, StoreError> {
        self.ensure_open()?;
        let key = (user_id, currency.to_string());
        let before = self
            .working
            .wallets
            .get(&key)
            .copied()
            .unwrap_or(Decimal::ZERO);
        let after = before + delta;
        if after < Decimal::ZERO {
            return Err(StoreError::InsufficientBalance {
                user_id,
                currency: currency.to_string(),
            });
        }
        self.wallets.write(&key, &self.working.wallets);
        self.working.wallets.insert(key, after);
        Ok(BalanceChange {
            user_id,
            currency: currency.to_string(),
            before,
            after,
        })
    }

    async fn active_hold(&mut self, escrow_id: &str) -> Result<Option<WalletHold>, StoreError> {
        self.ensure_open()?;
        let found = self
            .working
            .holds
            .values()
            .find(|h| h.escrow_id == escrow_id && h.status.is_active())
            .cloned();
        if let Some(hold) = &found {
            self.holds.read(&hold.hold_id, &self.working.holds);
        }
        Ok(found)
    }

    async fn insert_hold(&mut self, hold: &WalletHold) -> Result<(), StoreError> {
        self.ensure_open()?;
        if self.working.holds.contains_key(&hold.hold_id) {
            return Err(StoreError::Duplicate(format!("wallet hold {}", hold.hold_id)));
        }
        self.holds.write(&hold.hold_id, &self.working.holds);
        self.working.holds.insert(hold.hold_id.clone(), hold.clone());
        Ok(())
    }

    async fn update_hold_status(
        &mut self,
        hold_id: &str,
        status: HoldStatus,
    ) -> Result<(), StoreError> {
        self.ensure_open()?;
        let key = hold_id.to_string();
        self.holds.write(&key, &self.working.holds);
        let hold = self
            .working
            .holds
            .get_mut(&key)
            .ok_or_else(|| StoreError::NotFound {
                kind: "wallet hold",
                id: key.clone(),
            })?;
        hold.status = status;
        hold.updated_at = Utc::now();
        Ok(())
    }

    async fn get_idempotency_token(
        &mut self,
        key: &str,
    ) -> Result<Option<IdempotencyToken>, StoreError> {
        self.ensure_open()?;
        let key = key.to_string();
        self.idempotency.read(&key, &self.working.idempotency);
        Ok(self.working.idempotency.get(&key).cloned())
    }

    async fn insert_idempotency_token(
        &mut self,
        token: &IdempotencyToken,
    ) -> Result<(), StoreError> {
        self.ensure_open()?;
        let key = token.idempotency_key.clone();
        if self.working.idempotency.contains_key(&key) {
            return Err(StoreError::Duplicate(format!("idempotency key {}", key)));
        }
        self.idempotency.write(&key, &self.working.idempotency);
        self.working.idempotency.insert(key, token.clone());
        Ok(())
    }

    async fn update_idempotency_token(
        &mut self,
        token: &IdempotencyToken,
    ) -> Result<(), StoreError> {
        self.ensure_open()?;
        let key = token.idempotency_key.clone();
        if !self.working.idempotency.contains_key(&key) {
            return Err(StoreError::NotFound {
                kind: "idempotency token",
                id: key,
            });
        }
        self.idempotency.write(&key, &self.working.idempotency);
        self.working.idempotency.insert(key, token.clone());
        Ok(())
    }

    async fn savepoint(&mut self, name: &str) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.savepoints
            .push((name.to_string(), self.working.clone()));
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), StoreError> {
        self.ensure_not_finished()?;
        let idx = self.savepoint_index(name)?;
        self.savepoints.truncate(idx + 1);
        self.working = self.savepoints[idx].1.clone();
        self.aborted = None;
        Ok(())
    }

    async fn release_savepoint(&mut self, name: &str) -> Result<(), StoreError> {
        self.ensure_open()?;
        let idx = self.savepoint_index(name)?;
        self.savepoints.truncate(idx);
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        if let Some(reason) = self.aborted.take() {
            self.finished = true;
            return Err(StoreError::Aborted(reason));
        }
        self.ensure_open()?;
        let delay = *lock(&self.faults.commit_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.finished = true;
        self.publish()
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        self.finished = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Cashout, PayoutDestination};
    use crate::status::{CashoutStatus, UnifiedTransactionType};
    use rust_decimal_macros::dec;

    fn cashout(id: &str) -> LegacyEntity {
        let now = Utc::now();
        LegacyEntity::Cashout(Cashout {
            cashout_id: id.to_string(),
            user_id: 1001,
            amount: dec!(50),
            currency: "USDT".into(),
            fee_amount: dec!(1),
            destination: PayoutDestination::CryptoAddress {
                network: "TRC20".into(),
                address: "TXabc".into(),
            },
            status: CashoutStatus::Pending,
            provider_reference: None,
            unified_transaction_id: None,
            version: 0,
            created_at: now,
            updated_at: now,
        })
    }

    fn unified() -> UnifiedTransaction {
        UnifiedTransaction::new(
            1001,
            UnifiedTransactionType::WalletCashout,
            dec!(50),
            "USDT",
            dec!(1),
        )
        .with_legacy_entity("CO-1")
    }

    #[tokio::test]
    async fn test_commit_publishes_and_drop_discards() {
        let store = MemoryStore::new();
        let tx = unified();

        let mut uow = store.begin().await.unwrap();
        uow.insert_unified(&tx).await.unwrap();
        drop(uow);
        assert!(store.unified_row(tx.transaction_id).is_none());

        let mut uow = store.begin().await.unwrap();
        uow.insert_unified(&tx).await.unwrap();
        uow.commit().await.unwrap();
        assert!(store.unified_row(tx.transaction_id).is_some());
    }

    #[tokio::test]
    async fn test_cas_mismatch_returns_false() {
        let store = MemoryStore::new();
        let tx = unified();
        let mut uow = store.begin().await.unwrap();
        uow.insert_unified(&tx).await.unwrap();
        uow.commit().await.unwrap();

        let mut uow = store.begin().await.unwrap();
        let applied = uow
            .update_unified_status(
                tx.transaction_id,
                UnifiedTransactionStatus::Processing,
                UnifiedTransactionStatus::Failed,
            )
            .await
            .unwrap();
        assert!(!applied);
    }

    #[tokio::test]
    async fn test_concurrent_commit_conflicts() {
        let store = MemoryStore::new();
        let tx = unified();
        let mut uow = store.begin().await.unwrap();
        uow.insert_unified(&tx).await.unwrap();
        uow.commit().await.unwrap();

        let mut a = store.begin().await.unwrap();
        let mut b = store.begin().await.unwrap();
        assert!(
            a.update_unified_status(
                tx.transaction_id,
                UnifiedTransactionStatus::Pending,
                UnifiedTransactionStatus::Processing,
            )
            .await
            .unwrap()
        );
        assert!(
            b.update_unified_status(
                tx.transaction_id,
                UnifiedTransactionStatus::Pending,
                UnifiedTransactionStatus::Cancelled,
            )
            .await
            .unwrap()
        );

        a.commit().await.unwrap();
        let err = b.commit().await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let row = store.unified_row(tx.transaction_id).unwrap();
        assert_eq!(row.status, UnifiedTransactionStatus::Processing);
        assert_eq!(row.version, 1);
    }

    #[tokio::test]
    async fn test_legacy_write_fault() {
        let store = MemoryStore::new();
        let entity = cashout("CO-1");
        let mut uow = store.begin().await.unwrap();
        uow.insert_legacy(&entity).await.unwrap();
        uow.commit().await.unwrap();

        store.set_fail_legacy_writes(true);
        let mut uow = store.begin().await.unwrap();
        let err = uow
            .update_legacy_status(
                &entity.legacy_ref(),
                CashoutStatus::Pending.into(),
                CashoutStatus::Processing.into(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));

        // The failed write poisons the unit of work
        store.set_fail_legacy_writes(false);
        let err = uow.get_legacy(&entity.legacy_ref()).await.unwrap_err();
        assert!(matches!(err, StoreError::Aborted(_)));
        assert!(matches!(uow.commit().await, Err(StoreError::Aborted(_))));
    }

    #[tokio::test]
    async fn test_savepoint_recovers_from_failed_write() {
        let store = MemoryStore::new();
        let entity = cashout("CO-1");
        let tx = unified();
        let mut uow = store.begin().await.unwrap();
        uow.insert_legacy(&entity).await.unwrap();
        uow.insert_unified(&tx).await.unwrap();
        uow.commit().await.unwrap();

        let mut uow = store.begin().await.unwrap();
        uow.savepoint("unified_side").await.unwrap();
        assert!(
            uow.update_unified_status(
                tx.transaction_id,
                UnifiedTransactionStatus::Pending,
                UnifiedTransactionStatus::Processing,
            )
            .await
            .unwrap()
        );
        uow.release_savepoint("unified_side").await.unwrap();

        store.set_fail_legacy_writes(true);
        uow.savepoint("legacy_side").await.unwrap();
        uow.update_legacy_status(
            &entity.legacy_ref(),
            CashoutStatus::Pending.into(),
            CashoutStatus::Processing.into(),
        )
        .await
        .unwrap_err();
        uow.rollback_to_savepoint("legacy_side").await.unwrap();
        store.set_fail_legacy_writes(false);
        uow.commit().await.unwrap();

        assert_eq!(
            store.unified_row(tx.transaction_id).unwrap().status,
            UnifiedTransactionStatus::Processing
        );
        assert_eq!(
            store.legacy_row(&entity.legacy_ref()).unwrap().status(),
            CashoutStatus::Pending.into()
        );
    }

    #[tokio::test]
    async fn test_rollback_to_savepoint_discards_later_writes() {
        let store = MemoryStore::new();
        store.seed_wallet(9, "USDT", dec!(20));

        let mut uow = store.begin().await.unwrap();
        uow.adjust_wallet(9, "USDT", dec!(-5)).await.unwrap();
        uow.savepoint("after_debit").await.unwrap();
        uow.adjust_wallet(9, "USDT", dec!(-10)).await.unwrap();
        uow.rollback_to_savepoint("after_debit").await.unwrap();
        assert_eq!(uow.wallet_balance(9, "USDT").await.unwrap(), dec!(15));
        assert!(matches!(
            uow.release_savepoint("never_taken").await,
            Err(StoreError::NotFound { .. })
        ));
        uow.commit().await.unwrap();

        assert_eq!(store.balance(9, "USDT"), dec!(15));
    }

    #[tokio::test]
    async fn test_wallet_never_negative() {
        let store = MemoryStore::new();
        store.seed_wallet(7, "USD", dec!(10));

        let mut uow = store.begin().await.unwrap();
        let change = uow.adjust_wallet(7, "USD", dec!(-4)).await.unwrap();
        assert_eq!(change.before, dec!(10));
        assert_eq!(change.after, dec!(6));
        let err = uow.adjust_wallet(7, "USD", dec!(-7)).await.unwrap_err();
        assert!(matches!(err, StoreError::InsufficientBalance { .. }));
        uow.commit().await.unwrap();

        assert_eq!(store.balance(7, "USD"), dec!(6));
    }

    #[tokio::test]
    async fn test_history_created_at_monotonic() {
        let store = MemoryStore::new();
        let id = TransactionId::new();
        let entry = |offset_secs: i64| StatusHistoryEntry {
            history_id: ulid::Ulid::new(),
            transaction_id: id,
            old_status: UnifiedTransactionStatus::Pending,
            new_status: UnifiedTransactionStatus::Processing,
            accepted: true,
            forced: false,
            reason: String::new(),
            triggered_by: "system".into(),
            context: crate::status::StatusContext::AutomatedSystem,
            metadata: Default::default(),
            operation_id: crate::models::OperationId::new(),
            created_at: Utc::now() + chrono::Duration::seconds(offset_secs),
        };

        let mut uow = store.begin().await.unwrap();
        uow.append_history(&entry(10)).await.unwrap();
        uow.commit().await.unwrap();
        let mut uow = store.begin().await.unwrap();
        uow.append_history(&entry(-10)).await.unwrap();
        uow.commit().await.unwrap();

        let rows = store.history_rows(id);
        assert_eq!(rows.len(), 2);
        assert!(rows[1].created_at >= rows[0].created_at);
    }
}
