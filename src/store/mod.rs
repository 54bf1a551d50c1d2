//! Transactional Store
//!
//! Abstract unit-of-work storage the engine runs against. One call to
//! [`TransactionStore::begin`] is one atomic scope: nothing written through
//! the returned [`StoreTx`] is visible to anyone else until `commit`, and
//! dropping it without committing discards everything.
//!
//! Status updates are Compare-And-Swap: they only apply when the stored
//! status still equals the expected one, so a lost race is detected instead
//! of silently overwritten.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::warn;

use crate::models::{
    BalanceChange, HoldStatus, IdempotencyToken, LegacyEntity, LegacyRef, StatusHistoryEntry,
    TransactionId, UnifiedTransaction, UserId, WalletHold,
};
use crate::status::{LegacyStatus, UnifiedTransactionStatus};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Another unit of work changed a row this one depends on
    #[error("Write conflict: {0}")]
    Conflict(String),

    #[error("Duplicate key: {0}")]
    Duplicate(String),

    #[error("Insufficient balance for user {user_id} in {currency}")]
    InsufficientBalance { user_id: UserId, currency: String },

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Database error: {0}")]
    Database(String),

    /// A statement failed earlier in the unit of work and was not rolled back
    #[error("Unit of work aborted: {0}")]
    Aborted(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Duplicate(db.message().to_string())
            }
            // serialization_failure / deadlock_detected
            sqlx::Error::Database(db)
                if matches!(db.code().as_deref(), Some("40001") | Some("40P01")) =>
            {
                StoreError::Conflict(db.message().to_string())
            }
            // in_failed_sql_transaction
            sqlx::Error::Database(db) if db.code().as_deref() == Some("25P02") => {
                StoreError::Aborted(db.message().to_string())
            }
            _ => StoreError::Database(e.to_string()),
        }
    }
}

/// Factory for units of work
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Open a new atomic scope
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError>;
}

/// One open unit of work
#[async_trait]
pub trait StoreTx: Send {
    // === Unified transactions ===

    async fn get_unified(
        &mut self,
        id: TransactionId,
    ) -> Result<Option<UnifiedTransaction>, StoreError>;

    async fn find_unified_by_legacy(
        &mut self,
        legacy: &LegacyRef,
    ) -> Result<Option<UnifiedTransaction>, StoreError>;

    async fn insert_unified(&mut self, tx: &UnifiedTransaction) -> Result<(), StoreError>;

    /// Only used to undo a creation within the same unit of work
    async fn delete_unified(&mut self, id: TransactionId) -> Result<(), StoreError>;

    /// CAS status update. `Ok(false)` when the stored status is not `expected`.
    async fn update_unified_status(
        &mut self,
        id: TransactionId,
        expected: UnifiedTransactionStatus,
        new_status: UnifiedTransactionStatus,
    ) -> Result<bool, StoreError>;

    /// Full row update guarded by `tx.version`
    async fn update_unified(&mut self, tx: &UnifiedTransaction) -> Result<(), StoreError>;

    /// Most recently updated transactions first
    async fn recent_transactions(&mut self, limit: usize)
    -> Result<Vec<TransactionId>, StoreError>;

    // === Legacy entities ===

    async fn get_legacy(&mut self, legacy: &LegacyRef) -> Result<Option<LegacyEntity>, StoreError>;

    async fn insert_legacy(&mut self, entity: &LegacyEntity) -> Result<(), StoreError>;

    /// Most recently updated legacy rows of every system first
    async fn recent_legacy(&mut self, limit: usize) -> Result<Vec<LegacyRef>, StoreError>;

    /// CAS status update. `Ok(false)` when the stored status is not `expected`.
    async fn update_legacy_status(
        &mut self,
        legacy: &LegacyRef,
        expected: LegacyStatus,
        new_status: LegacyStatus,
    ) -> Result<bool, StoreError>;

    /// Full row update guarded by `entity.version()`
    async fn update_legacy(&mut self, entity: &LegacyEntity) -> Result<(), StoreError>;

    // === History (append-only) ===

    async fn append_history(&mut self, entry: &StatusHistoryEntry) -> Result<(), StoreError>;

    /// Oldest first
    async fn history(
        &mut self,
        id: TransactionId,
    ) -> Result<Vec<StatusHistoryEntry>, StoreError>;

    // === Wallets & holds ===

    async fn wallet_balance(&mut self, user_id: UserId, currency: &str)
    -> Result<Decimal, StoreError>;

    /// Apply a signed delta; fails rather than going negative
    async fn adjust_wallet(
        &mut self,
        user_id: UserId,
        currency: &str,
        delta: Decimal,
    ) -> Result<BalanceChange, StoreError>;

    /// The escrow's hold in `Active` or `Confirmed` state, if any
    async fn active_hold(&mut self, escrow_id: &str) -> Result<Option<WalletHold>, StoreError>;

    async fn insert_hold(&mut self, hold: &WalletHold) -> Result<(), StoreError>;

    async fn update_hold_status(
        &mut self,
        hold_id: &str,
        status: HoldStatus,
    ) -> Result<(), StoreError>;

    // === Idempotency tokens ===

    async fn get_idempotency_token(
        &mut self,
        key: &str,
    ) -> Result<Option<IdempotencyToken>, StoreError>;

    /// Fails with [`StoreError::Duplicate`] if the key exists
    async fn insert_idempotency_token(&mut self, token: &IdempotencyToken)
    -> Result<(), StoreError>;

    async fn update_idempotency_token(&mut self, token: &IdempotencyToken)
    -> Result<(), StoreError>;

    // === Scope ===

    /// Mark a point the unit of work can return to.
    ///
    /// A failed statement leaves the whole unit of work unusable until it is
    /// rolled back to a savepoint taken before the statement.
    async fn savepoint(&mut self, name: &str) -> Result<(), StoreError>;

    /// Discard everything since `name` and clear a failed-statement state.
    /// The savepoint stays defined.
    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), StoreError>;

    /// Forget `name`, keeping its effects
    async fn release_savepoint(&mut self, name: &str) -> Result<(), StoreError>;

    /// Fails, and publishes nothing, if an earlier statement failed and was
    /// not rolled back to a savepoint
    async fn commit(&mut self) -> Result<(), StoreError>;

    async fn rollback(&mut self) -> Result<(), StoreError>;
}

/// Discard a unit of work, logging rather than surfacing a rollback failure
pub async fn rollback_quietly(uow: &mut dyn StoreTx) {
    if let Err(e) = uow.rollback().await {
        warn!(error = %e, "Rollback failed");
    }
}
