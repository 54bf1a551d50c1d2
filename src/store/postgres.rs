//! PostgreSQL Store
//!
//! [`TransactionStore`] over a `sqlx` pool. One unit of work is one database
//! transaction. Rows are loaded with `SELECT ... FOR UPDATE` and status
//! writes are CAS updates (`WHERE status = expected`), so a concurrent writer
//! either blocks behind the lock or observes `rows_affected() == 0`.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{Postgres, Row, Transaction};
use std::fmt::Display;
use std::str::FromStr;

use super::{StoreError, StoreTx, TransactionStore};
use crate::models::{
    BalanceChange, Cashout, Escrow, ExchangeDirection, ExchangeOrder, HoldStatus,
    IdempotencyStatus, IdempotencyToken, LegacyEntity, LegacyRef, Metadata, OperationId,
    PayoutDestination, StatusHistoryEntry, TransactionId, UnifiedTransaction, UserId, WalletHold,
};
use crate::status::{
    LegacyStatus, LegacySystemType, StatusContext, UnifiedTransactionStatus,
    UnifiedTransactionType,
};

const SCHEMA: &str = include_str!("../../migrations/0001_unified_transactions.sql");

const UNIFIED_COLUMNS: &str = "transaction_id, user_id, transaction_type, status, amount, \
     currency, fee_amount, total_amount, legacy_entity_id, retry_count, metadata, version, \
     created_at, updated_at";

const HISTORY_COLUMNS: &str = "history_id, transaction_id, old_status, new_status, accepted, \
     forced, reason, triggered_by, context, metadata, operation_id, created_at";

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Create tables and indexes if they do not exist
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        tracing::info!("Unified transaction schema ensured");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl TransactionStore for PgStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgStoreTx { tx: Some(tx) }))
    }
}

struct PgStoreTx {
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgStoreTx {
    fn conn(&mut self) -> Result<&mut PgConnection, StoreError> {
        self.tx
            .as_deref_mut()
            .ok_or_else(|| StoreError::Database("unit of work already finished".to_string()))
    }

    async fn legacy_exists(&mut self, legacy: &LegacyRef) -> Result<bool, StoreError> {
        let (table, id_col) = legacy_table(legacy.system);
        let sql = format!("SELECT 1 FROM {} WHERE {} = $1", table, id_col);
        let row = sqlx::query(&sql)
            .bind(&legacy.id)
            .fetch_optional(self.conn()?)
            .await?;
        Ok(row.is_some())
    }
}

/// Savepoint names are interpolated into SQL, so only plain identifiers pass
fn savepoint_ident(name: &str) -> Result<&str, StoreError> {
    let valid = !name.is_empty()
        && name.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(name)
    } else {
        Err(StoreError::Database(format!("invalid savepoint name: {:?}", name)))
    }
}

fn legacy_table(system: LegacySystemType) -> (&'static str, &'static str) {
    match system {
        LegacySystemType::Cashout => ("cashouts", "cashout_id"),
        LegacySystemType::Escrow => ("escrows", "escrow_id"),
        LegacySystemType::Exchange => ("exchange_orders", "order_id"),
    }
}

// ============================================================================
// Row decoding
// ============================================================================

fn parse_col<T>(row: &PgRow, col: &str) -> Result<T, StoreError>
where
    T: FromStr,
    T::Err: Display,
{
    let raw: String = row.try_get(col)?;
    raw.parse()
        .map_err(|e| StoreError::Corrupt(format!("{}: {}", col, e)))
}

fn parse_opt_id(row: &PgRow, col: &str) -> Result<Option<TransactionId>, StoreError> {
    let raw: Option<String> = row.try_get(col)?;
    raw.map(|s| {
        s.parse()
            .map_err(|e| StoreError::Corrupt(format!("{}: {}", col, e)))
    })
    .transpose()
}

fn row_to_unified(row: &PgRow) -> Result<UnifiedTransaction, StoreError> {
    let metadata: Json<Metadata> = row.try_get("metadata")?;
    Ok(UnifiedTransaction {
        transaction_id: parse_col(row, "transaction_id")?,
        user_id: row.try_get("user_id")?,
        transaction_type: parse_col(row, "transaction_type")?,
        status: parse_col(row, "status")?,
        amount: row.try_get("amount")?,
        currency: row.try_get("currency")?,
        fee_amount: row.try_get("fee_amount")?,
        total_amount: row.try_get("total_amount")?,
        legacy_entity_id: row.try_get("legacy_entity_id")?,
        retry_count: row.try_get("retry_count")?,
        metadata: metadata.0,
        version: row.try_get("version")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_legacy(system: LegacySystemType, row: &PgRow) -> Result<LegacyEntity, StoreError> {
    Ok(match system {
        LegacySystemType::Cashout => {
            let destination: Json<PayoutDestination> = row.try_get("destination")?;
            LegacyEntity::Cashout(Cashout {
                cashout_id: row.try_get("cashout_id")?,
                user_id: row.try_get("user_id")?,
                amount: row.try_get("amount")?,
                currency: row.try_get("currency")?,
                fee_amount: row.try_get("fee_amount")?,
                destination: destination.0,
                status: parse_col(row, "status")?,
                provider_reference: row.try_get("provider_reference")?,
                unified_transaction_id: parse_opt_id(row, "unified_transaction_id")?,
                version: row.try_get("version")?,
                created_at: row.try_get("created_at")?,
                updated_at: row.try_get("updated_at")?,
            })
        }
        LegacySystemType::Escrow => LegacyEntity::Escrow(Escrow {
            escrow_id: row.try_get("escrow_id")?,
            user_id: row.try_get("user_id")?,
            seller_id: row.try_get("seller_id")?,
            amount: row.try_get("amount")?,
            currency: row.try_get("currency")?,
            status: parse_col(row, "status")?,
            unified_transaction_id: parse_opt_id(row, "unified_transaction_id")?,
            version: row.try_get("version")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        }),
        LegacySystemType::Exchange => {
            let direction: String = row.try_get("direction")?;
            let direction = match direction.as_str() {
                "buy_crypto" => ExchangeDirection::BuyCrypto,
                "sell_crypto" => ExchangeDirection::SellCrypto,
                other => {
                    return Err(StoreError::Corrupt(format!("direction: {}", other)));
                }
            };
            LegacyEntity::Exchange(ExchangeOrder {
                order_id: row.try_get("order_id")?,
                user_id: row.try_get("user_id")?,
                direction,
                amount: row.try_get("amount")?,
                currency: row.try_get("currency")?,
                output_amount: row.try_get("output_amount")?,
                output_currency: row.try_get("output_currency")?,
                destination_address: row.try_get("destination_address")?,
                status: parse_col(row, "status")?,
                unified_transaction_id: parse_opt_id(row, "unified_transaction_id")?,
                version: row.try_get("version")?,
                created_at: row.try_get("created_at")?,
                updated_at: row.try_get("updated_at")?,
            })
        }
    })
}

fn row_to_history(row: &PgRow) -> Result<StatusHistoryEntry, StoreError> {
    let metadata: Json<Metadata> = row.try_get("metadata")?;
    let operation_id: uuid::Uuid = row.try_get("operation_id")?;
    Ok(StatusHistoryEntry {
        history_id: parse_col(row, "history_id")?,
        transaction_id: parse_col(row, "transaction_id")?,
        old_status: parse_col(row, "old_status")?,
        new_status: parse_col(row, "new_status")?,
        accepted: row.try_get("accepted")?,
        forced: row.try_get("forced")?,
        reason: row.try_get("reason")?,
        triggered_by: row.try_get("triggered_by")?,
        context: parse_col::<StatusContext>(row, "context")?,
        metadata: metadata.0,
        operation_id: OperationId::from(operation_id),
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_hold(row: &PgRow) -> Result<WalletHold, StoreError> {
    Ok(WalletHold {
        hold_id: row.try_get("hold_id")?,
        escrow_id: row.try_get("escrow_id")?,
        user_id: row.try_get("user_id")?,
        currency: row.try_get("currency")?,
        amount: row.try_get("amount")?,
        status: parse_col::<HoldStatus>(row, "status")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_token(row: &PgRow) -> Result<IdempotencyToken, StoreError> {
    Ok(IdempotencyToken {
        idempotency_key: row.try_get("idempotency_key")?,
        status: parse_col::<IdempotencyStatus>(row, "status")?,
        resource_id: row.try_get("resource_id")?,
        created_at: row.try_get("created_at")?,
        expires_at: row.try_get("expires_at")?,
    })
}

fn types_for_system(system: LegacySystemType) -> Vec<String> {
    UnifiedTransactionType::ALL
        .into_iter()
        .filter(|t| LegacySystemType::for_transaction_type(*t) == system)
        .map(|t| t.as_str().to_string())
        .collect()
}

// ============================================================================
// Unit of work
// ============================================================================

#[async_trait]
impl StoreTx for PgStoreTx {
    async fn get_unified(
        &mut self,
        id: TransactionId,
    ) -> Result<Option<UnifiedTransaction>, StoreError> {
        let sql = format!(
            "SELECT {} FROM unified_transactions WHERE transaction_id = $1 FOR UPDATE",
            UNIFIED_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(self.conn()?)
            .await?;
        row.as_ref().map(row_to_unified).transpose()
    }

    async fn find_unified_by_legacy(
        &mut self,
        legacy: &LegacyRef,
    ) -> Result<Option<UnifiedTransaction>, StoreError> {
        let sql = format!(
            "SELECT {} FROM unified_transactions \
             WHERE legacy_entity_id = $1 AND transaction_type = ANY($2) \
             ORDER BY created_at ASC LIMIT 1 FOR UPDATE",
            UNIFIED_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(&legacy.id)
            .bind(types_for_system(legacy.system))
            .fetch_optional(self.conn()?)
            .await?;
        row.as_ref().map(row_to_unified).transpose()
    }

    async fn insert_unified(&mut self, tx: &UnifiedTransaction) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO unified_transactions
                (transaction_id, user_id, transaction_type, status, amount, currency,
                 fee_amount, total_amount, legacy_entity_id, retry_count, metadata, version,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(tx.transaction_id.to_string())
        .bind(tx.user_id)
        .bind(tx.transaction_type.as_str())
        .bind(tx.status.as_str())
        .bind(tx.amount)
        .bind(&tx.currency)
        .bind(tx.fee_amount)
        .bind(tx.total_amount)
        .bind(&tx.legacy_entity_id)
        .bind(tx.retry_count)
        .bind(Json(&tx.metadata))
        .bind(tx.version)
        .bind(tx.created_at)
        .bind(tx.updated_at)
        .execute(self.conn()?)
        .await?;
        Ok(())
    }

    async fn delete_unified(&mut self, id: TransactionId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM unified_transactions WHERE transaction_id = $1")
            .bind(id.to_string())
            .execute(self.conn()?)
            .await?;
        Ok(())
    }

    async fn update_unified_status(
        &mut self,
        id: TransactionId,
        expected: UnifiedTransactionStatus,
        new_status: UnifiedTransactionStatus,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE unified_transactions
            SET status = $1, version = version + 1, updated_at = NOW()
            WHERE transaction_id = $2 AND status = $3
            "#,
        )
        .bind(new_status.as_str())
        .bind(id.to_string())
        .bind(expected.as_str())
        .execute(self.conn()?)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }
        let exists = sqlx::query("SELECT 1 FROM unified_transactions WHERE transaction_id = $1")
            .bind(id.to_string())
            .fetch_optional(self.conn()?)
            .await?;
        match exists {
            Some(_) => Ok(false),
            None => Err(StoreError::NotFound {
                kind: "unified transaction",
                id: id.to_string(),
            }),
        }
    }

    async fn update_unified(&mut self, tx: &UnifiedTransaction) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE unified_transactions
            SET user_id = $1, status = $2, amount = $3, currency = $4, fee_amount = $5,
                total_amount = $6, legacy_entity_id = $7, retry_count = $8, metadata = $9,
                version = version + 1, updated_at = NOW()
            WHERE transaction_id = $10 AND version = $11
            "#,
        )
        .bind(tx.user_id)
        .bind(tx.status.as_str())
        .bind(tx.amount)
        .bind(&tx.currency)
        .bind(tx.fee_amount)
        .bind(tx.total_amount)
        .bind(&tx.legacy_entity_id)
        .bind(tx.retry_count)
        .bind(Json(&tx.metadata))
        .bind(tx.transaction_id.to_string())
        .bind(tx.version)
        .execute(self.conn()?)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "unified transaction {} moved past version {}",
                tx.transaction_id, tx.version
            )));
        }
        Ok(())
    }

    async fn recent_transactions(
        &mut self,
        limit: usize,
    ) -> Result<Vec<TransactionId>, StoreError> {
        let rows = sqlx::query(
            "SELECT transaction_id FROM unified_transactions ORDER BY updated_at DESC LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(self.conn()?)
        .await?;
        rows.iter()
            .map(|row| parse_col(row, "transaction_id"))
            .collect()
    }

    async fn get_legacy(&mut self, legacy: &LegacyRef) -> Result<Option<LegacyEntity>, StoreError> {
        let (table, id_col) = legacy_table(legacy.system);
        let sql = format!("SELECT * FROM {} WHERE {} = $1 FOR UPDATE", table, id_col);
        let row = sqlx::query(&sql)
            .bind(&legacy.id)
            .fetch_optional(self.conn()?)
            .await?;
        row.as_ref()
            .map(|row| row_to_legacy(legacy.system, row))
            .transpose()
    }

    async fn recent_legacy(&mut self, limit: usize) -> Result<Vec<LegacyRef>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT system, id FROM (
                SELECT 'cashout' AS system, cashout_id AS id, updated_at FROM cashouts
                UNION ALL
                SELECT 'escrow', escrow_id, updated_at FROM escrows
                UNION ALL
                SELECT 'exchange', order_id, updated_at FROM exchange_orders
            ) legacy
            ORDER BY updated_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(self.conn()?)
        .await?;
        rows.iter()
            .map(|row| {
                let system: LegacySystemType = parse_col(row, "system")?;
                let id: String = row.try_get("id")?;
                Ok(LegacyRef::new(system, id))
            })
            .collect()
    }

    async fn insert_legacy(&mut self, entity: &LegacyEntity) -> Result<(), StoreError> {
        let unified_id = entity.unified_transaction_id().map(|id| id.to_string());
        match entity {
            LegacyEntity::Cashout(c) => {
                sqlx::query(
                    r#"
                    INSERT INTO cashouts
                        (cashout_id, user_id, amount, currency, fee_amount, destination, status,
                         provider_reference, unified_transaction_id, version, created_at, updated_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                    "#,
                )
                .bind(&c.cashout_id)
                .bind(c.user_id)
                .bind(c.amount)
                .bind(&c.currency)
                .bind(c.fee_amount)
                .bind(Json(&c.destination))
                .bind(c.status.as_str())
                .bind(&c.provider_reference)
                .bind(unified_id)
                .bind(c.version)
                .bind(c.created_at)
                .bind(c.updated_at)
                .execute(self.conn()?)
                .await?;
            }
            LegacyEntity::Escrow(e) => {
                sqlx::query(
                    r#"
                    INSERT INTO escrows
                        (escrow_id, user_id, seller_id, amount, currency, status,
                         unified_transaction_id, version, created_at, updated_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                    "#,
                )
                .bind(&e.escrow_id)
                .bind(e.user_id)
                .bind(e.seller_id)
                .bind(e.amount)
                .bind(&e.currency)
                .bind(e.status.as_str())
                .bind(unified_id)
                .bind(e.version)
                .bind(e.created_at)
                .bind(e.updated_at)
                .execute(self.conn()?)
                .await?;
            }
            LegacyEntity::Exchange(x) => {
                sqlx::query(
                    r#"
                    INSERT INTO exchange_orders
                        (order_id, user_id, direction, amount, currency, output_amount,
                         output_currency, destination_address, status, unified_transaction_id,
                         version, created_at, updated_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                    "#,
                )
                .bind(&x.order_id)
                .bind(x.user_id)
                .bind(x.direction.as_str())
                .bind(x.amount)
                .bind(&x.currency)
                .bind(x.output_amount)
                .bind(&x.output_currency)
                .bind(&x.destination_address)
                .bind(x.status.as_str())
                .bind(unified_id)
                .bind(x.version)
                .bind(x.created_at)
                .bind(x.updated_at)
                .execute(self.conn()?)
                .await?;
            }
        }
        Ok(())
    }

    async fn update_legacy_status(
        &mut self,
        legacy: &LegacyRef,
        expected: LegacyStatus,
        new_status: LegacyStatus,
    ) -> Result<bool, StoreError> {
        if new_status.system() != legacy.system || expected.system() != legacy.system {
            return Err(StoreError::Corrupt(format!(
                "status {} does not belong to {}",
                new_status, legacy
            )));
        }
        let (table, id_col) = legacy_table(legacy.system);
        let sql = format!(
            "UPDATE {} SET status = $1, version = version + 1, updated_at = NOW() \
             WHERE {} = $2 AND status = $3",
            table, id_col
        );
        let result = sqlx::query(&sql)
            .bind(new_status.as_str())
            .bind(&legacy.id)
            .bind(expected.as_str())
            .execute(self.conn()?)
            .await?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }
        if self.legacy_exists(legacy).await? {
            Ok(false)
        } else {
            Err(StoreError::NotFound {
                kind: "legacy entity",
                id: legacy.to_string(),
            })
        }
    }

    async fn update_legacy(&mut self, entity: &LegacyEntity) -> Result<(), StoreError> {
        let unified_id = entity.unified_transaction_id().map(|id| id.to_string());
        let result = match entity {
            LegacyEntity::Cashout(c) => {
                sqlx::query(
                    r#"
                    UPDATE cashouts
                    SET user_id = $1, amount = $2, currency = $3, fee_amount = $4,
                        destination = $5, status = $6, provider_reference = $7,
                        unified_transaction_id = $8, version = version + 1, updated_at = NOW()
                    WHERE cashout_id = $9 AND version = $10
                    "#,
                )
                .bind(c.user_id)
                .bind(c.amount)
                .bind(&c.currency)
                .bind(c.fee_amount)
                .bind(Json(&c.destination))
                .bind(c.status.as_str())
                .bind(&c.provider_reference)
                .bind(unified_id)
                .bind(&c.cashout_id)
                .bind(c.version)
                .execute(self.conn()?)
                .await?
            }
            LegacyEntity::Escrow(e) => {
                sqlx::query(
                    r#"
                    UPDATE escrows
                    SET user_id = $1, seller_id = $2, amount = $3, currency = $4, status = $5,
                        unified_transaction_id = $6, version = version + 1, updated_at = NOW()
                    WHERE escrow_id = $7 AND version = $8
                    "#,
                )
                .bind(e.user_id)
                .bind(e.seller_id)
                .bind(e.amount)
                .bind(&e.currency)
                .bind(e.status.as_str())
                .bind(unified_id)
                .bind(&e.escrow_id)
                .bind(e.version)
                .execute(self.conn()?)
                .await?
            }
            LegacyEntity::Exchange(x) => {
                sqlx::query(
                    r#"
                    UPDATE exchange_orders
                    SET user_id = $1, amount = $2, currency = $3, output_amount = $4,
                        output_currency = $5, destination_address = $6, status = $7,
                        unified_transaction_id = $8, version = version + 1, updated_at = NOW()
                    WHERE order_id = $9 AND version = $10
                    "#,
                )
                .bind(x.user_id)
                .bind(x.amount)
                .bind(&x.currency)
                .bind(x.output_amount)
                .bind(&x.output_currency)
                .bind(&x.destination_address)
                .bind(x.status.as_str())
                .bind(unified_id)
                .bind(&x.order_id)
                .bind(x.version)
                .execute(self.conn()?)
                .await?
            }
        };

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "legacy entity {} moved past version {}",
                entity.legacy_ref(),
                entity.version()
            )));
        }
        Ok(())
    }

    async fn append_history(&mut self, entry: &StatusHistoryEntry) -> Result<(), StoreError> {
        // created_at is assigned by the database (clock_timestamp) to keep it monotonic
        sqlx::query(
            r#"
            INSERT INTO unified_transaction_status_history
                (history_id, transaction_id, old_status, new_status, accepted, forced,
                 reason, triggered_by, context, metadata, operation_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(entry.history_id.to_string())
        .bind(entry.transaction_id.to_string())
        .bind(entry.old_status.as_str())
        .bind(entry.new_status.as_str())
        .bind(entry.accepted)
        .bind(entry.forced)
        .bind(&entry.reason)
        .bind(&entry.triggered_by)
        .bind(entry.context.as_str())
        .bind(Json(&entry.metadata))
        .bind(entry.operation_id.inner())
        .execute(self.conn()?)
        .await?;
        Ok(())
    }

    async fn history(
        &mut self,
        id: TransactionId,
    ) -> Result<Vec<StatusHistoryEntry>, StoreError> {
        let sql = format!(
            "SELECT {} FROM unified_transaction_status_history \
             WHERE transaction_id = $1 ORDER BY created_at ASC, history_id ASC",
            HISTORY_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_all(self.conn()?)
            .await?;
        rows.iter().map(row_to_history).collect()
    }

    async fn wallet_balance(
        &mut self,
        user_id: UserId,
        currency: &str,
    ) -> Result<Decimal, StoreError> {
        let balance = sqlx::query_scalar::<_, Decimal>(
            "SELECT balance FROM wallet_balances WHERE user_id = $1 AND currency = $2",
        )
        .bind(user_id)
        .bind(currency)
        .fetch_optional(self.conn()?)
        .await?;
        Ok(balance.unwrap_or(Decimal::ZERO))
    }

    async fn adjust_wallet(
        &mut self,
        user_id: UserId,
        currency: &str,
        delta: Decimal,
    ) -> Result<BalanceChange, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO wallet_balances (user_id, currency, balance)
            VALUES ($1, $2, 0)
            ON CONFLICT (user_id, currency) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(currency)
        .execute(self.conn()?)
        .await?;

        let before = sqlx::query_scalar::<_, Decimal>(
            "SELECT balance FROM wallet_balances WHERE user_id = $1 AND currency = $2 FOR UPDATE",
        )
        .bind(user_id)
        .bind(currency)
        .fetch_one(self.conn()?)
        .await?;

        let after = before + delta;
        if after < Decimal::ZERO {
            return Err(StoreError::InsufficientBalance {
                user_id,
                currency: currency.to_string(),
            });
        }

        sqlx::query(
            r#"
            UPDATE wallet_balances SET balance = $1, updated_at = NOW()
            WHERE user_id = $2 AND currency = $3
            "#,
        )
        .bind(after)
        .bind(user_id)
        .bind(currency)
        .execute(self.conn()?)
        .await?;

        Ok(BalanceChange {
            user_id,
            currency: currency.to_string(),
            before,
            after,
        })
    }

    async fn active_hold(&mut self, escrow_id: &str) -> Result<Option<WalletHold>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT hold_id, escrow_id, user_id, currency, amount, status, created_at, updated_at
            FROM wallet_holds
            WHERE escrow_id = $1 AND status IN ($2, $3)
            ORDER BY created_at DESC
            LIMIT 1
            FOR UPDATE
            "#,
        )
        .bind(escrow_id)
        .bind(HoldStatus::Active.as_str())
        .bind(HoldStatus::Confirmed.as_str())
        .fetch_optional(self.conn()?)
        .await?;
        row.as_ref().map(row_to_hold).transpose()
    }

    async fn insert_hold(&mut self, hold: &WalletHold) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO wallet_holds
                (hold_id, escrow_id, user_id, currency, amount, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&hold.hold_id)
        .bind(&hold.escrow_id)
        .bind(hold.user_id)
        .bind(&hold.currency)
        .bind(hold.amount)
        .bind(hold.status.as_str())
        .bind(hold.created_at)
        .bind(hold.updated_at)
        .execute(self.conn()?)
        .await?;
        Ok(())
    }

    async fn update_hold_status(
        &mut self,
        hold_id: &str,
        status: HoldStatus,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE wallet_holds SET status = $1, updated_at = NOW() WHERE hold_id = $2",
        )
        .bind(status.as_str())
        .bind(hold_id)
        .execute(self.conn()?)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                kind: "wallet hold",
                id: hold_id.to_string(),
            });
        }
        Ok(())
    }

    async fn get_idempotency_token(
        &mut self,
        key: &str,
    ) -> Result<Option<IdempotencyToken>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT idempotency_key, status, resource_id, created_at, expires_at
            FROM idempotency_tokens
            WHERE idempotency_key = $1
            FOR UPDATE
            "#,
        )
        .bind(key)
        .fetch_optional(self.conn()?)
        .await?;
        row.as_ref().map(row_to_token).transpose()
    }

    async fn insert_idempotency_token(
        &mut self,
        token: &IdempotencyToken,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO idempotency_tokens
                (idempotency_key, status, resource_id, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&token.idempotency_key)
        .bind(token.status.as_str())
        .bind(&token.resource_id)
        .bind(token.created_at)
        .bind(token.expires_at)
        .execute(self.conn()?)
        .await?;
        Ok(())
    }

    async fn update_idempotency_token(
        &mut self,
        token: &IdempotencyToken,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE idempotency_tokens
            SET status = $1, resource_id = $2, expires_at = $3
            WHERE idempotency_key = $4
            "#,
        )
        .bind(token.status.as_str())
        .bind(&token.resource_id)
        .bind(token.expires_at)
        .bind(&token.idempotency_key)
        .execute(self.conn()?)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                kind: "idempotency token",
                id: token.idempotency_key.clone(),
            });
        }
        Ok(())
    }

    async fn savepoint(&mut self, name: &str) -> Result<(), StoreError> {
        let sql = format!("SAVEPOINT {}", savepoint_ident(name)?);
        sqlx::query(&sql).execute(self.conn()?).await?;
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), StoreError> {
        let sql = format!("ROLLBACK TO SAVEPOINT {}", savepoint_ident(name)?);
        sqlx::query(&sql).execute(self.conn()?).await?;
        Ok(())
    }

    async fn release_savepoint(&mut self, name: &str) -> Result<(), StoreError> {
        let sql = format!("RELEASE SAVEPOINT {}", savepoint_ident(name)?);
        sqlx::query(&sql).execute(self.conn()?).await?;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        // COMMIT on an aborted transaction silently rolls back
        if let Err(e) = sqlx::query("SELECT 1").execute(self.conn()?).await {
            if let Some(tx) = self.tx.take()
                && let Err(rollback_err) = tx.rollback().await
            {
                tracing::warn!(error = %rollback_err, "Rollback of aborted unit of work failed");
            }
            return Err(match StoreError::from(e) {
                StoreError::Aborted(msg) => StoreError::Aborted(msg),
                other => StoreError::Aborted(other.to_string()),
            });
        }
        let tx = self
            .tx
            .take()
            .ok_or_else(|| StoreError::Database("unit of work already finished".to_string()))?;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        if let Some(tx) = self.tx.take() {
            tx.rollback().await?;
        }
        Ok(())
    }
}
