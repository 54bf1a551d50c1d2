//! Transaction Data Model
//!
//! The unified transaction row, the three legacy entity rows that mirror it,
//! the append-only status history, wallet holds and idempotency tokens.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::status::{
    CashoutStatus, EscrowStatus, ExchangeStatus, LegacyStatus, LegacySystemType, MappingError,
    StatusContext, UnifiedTransactionStatus, UnifiedTransactionType,
};

pub type UserId = i64;
pub type Metadata = serde_json::Map<String, serde_json::Value>;

// ============================================================================
// Identifiers
// ============================================================================

/// Unified transaction ID - ULID based, sortable, no coordination needed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(ulid::Ulid);

impl TransactionId {
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }

    pub fn inner(&self) -> ulid::Ulid {
        self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TransactionId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(ulid::Ulid::from_string(s)?))
    }
}

/// Correlates one logical update across the dual-write and its history row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(uuid::Uuid);

impl OperationId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn inner(&self) -> uuid::Uuid {
        self.0
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<uuid::Uuid> for OperationId {
    fn from(id: uuid::Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Address of a legacy row: which system, which id
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LegacyRef {
    pub system: LegacySystemType,
    pub id: String,
}

impl LegacyRef {
    pub fn new(system: LegacySystemType, id: impl Into<String>) -> Self {
        Self {
            system,
            id: id.into(),
        }
    }

    pub fn cashout(id: impl Into<String>) -> Self {
        Self::new(LegacySystemType::Cashout, id)
    }

    pub fn escrow(id: impl Into<String>) -> Self {
        Self::new(LegacySystemType::Escrow, id)
    }

    pub fn exchange(id: impl Into<String>) -> Self {
        Self::new(LegacySystemType::Exchange, id)
    }
}

impl fmt::Display for LegacyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.system, self.id)
    }
}

// ============================================================================
// Unified transaction
// ============================================================================

/// The unified view of one logical transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedTransaction {
    pub transaction_id: TransactionId,
    pub user_id: UserId,
    pub transaction_type: UnifiedTransactionType,
    pub status: UnifiedTransactionStatus,
    pub amount: Decimal,
    pub currency: String,
    pub fee_amount: Decimal,
    pub total_amount: Decimal,
    /// Back-reference to the legacy row, if the transaction has one
    pub legacy_entity_id: Option<String>,
    pub retry_count: i32,
    pub metadata: Metadata,
    /// Optimistic concurrency version, bumped on every write
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UnifiedTransaction {
    /// New transaction in `pending`
    pub fn new(
        user_id: UserId,
        transaction_type: UnifiedTransactionType,
        amount: Decimal,
        currency: impl Into<String>,
        fee_amount: Decimal,
    ) -> Self {
        let now = Utc::now();
        Self {
            transaction_id: TransactionId::new(),
            user_id,
            transaction_type,
            status: UnifiedTransactionStatus::Pending,
            amount,
            currency: currency.into(),
            fee_amount,
            total_amount: amount + fee_amount,
            legacy_entity_id: None,
            retry_count: 0,
            metadata: Metadata::new(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_legacy_entity(mut self, legacy_id: impl Into<String>) -> Self {
        self.legacy_entity_id = Some(legacy_id.into());
        self
    }

    /// Legacy row address derived from the transaction type and back-reference
    pub fn legacy_ref(&self) -> Option<LegacyRef> {
        self.legacy_entity_id.as_ref().map(|id| {
            LegacyRef::new(
                LegacySystemType::for_transaction_type(self.transaction_type),
                id.clone(),
            )
        })
    }
}

impl fmt::Display for UnifiedTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Transaction[{}] {} user={} amount={} {} status={}",
            self.transaction_id,
            self.transaction_type,
            self.user_id,
            self.amount,
            self.currency,
            self.status
        )
    }
}

// ============================================================================
// Legacy entities
// ============================================================================

/// Where a cashout pays out to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PayoutDestination {
    CryptoAddress { network: String, address: String },
    BankAccount { account_reference: String },
    /// Settled internally by moving wallet balance to another user
    InternalUser { user_id: UserId },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cashout {
    pub cashout_id: String,
    pub user_id: UserId,
    pub amount: Decimal,
    pub currency: String,
    pub fee_amount: Decimal,
    pub destination: PayoutDestination,
    pub status: CashoutStatus,
    pub provider_reference: Option<String>,
    pub unified_transaction_id: Option<TransactionId>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Escrow {
    pub escrow_id: String,
    /// Buyer; funds the escrow
    pub user_id: UserId,
    pub seller_id: UserId,
    pub amount: Decimal,
    pub currency: String,
    pub status: EscrowStatus,
    pub unified_transaction_id: Option<TransactionId>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeDirection {
    BuyCrypto,
    SellCrypto,
}

impl ExchangeDirection {
    pub fn transaction_type(&self) -> UnifiedTransactionType {
        match self {
            ExchangeDirection::BuyCrypto => UnifiedTransactionType::ExchangeBuyCrypto,
            ExchangeDirection::SellCrypto => UnifiedTransactionType::ExchangeSellCrypto,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeDirection::BuyCrypto => "buy_crypto",
            ExchangeDirection::SellCrypto => "sell_crypto",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeOrder {
    pub order_id: String,
    pub user_id: UserId,
    pub direction: ExchangeDirection,
    /// Amount the user pays in
    pub amount: Decimal,
    pub currency: String,
    /// Amount credited on success
    pub output_amount: Decimal,
    pub output_currency: String,
    /// Required for buy orders before processing
    pub destination_address: Option<String>,
    pub status: ExchangeStatus,
    pub unified_transaction_id: Option<TransactionId>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Any legacy row, with uniform access to the fields the engine needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "system", rename_all = "snake_case")]
pub enum LegacyEntity {
    Cashout(Cashout),
    Escrow(Escrow),
    Exchange(ExchangeOrder),
}

impl LegacyEntity {
    pub fn system(&self) -> LegacySystemType {
        match self {
            LegacyEntity::Cashout(_) => LegacySystemType::Cashout,
            LegacyEntity::Escrow(_) => LegacySystemType::Escrow,
            LegacyEntity::Exchange(_) => LegacySystemType::Exchange,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            LegacyEntity::Cashout(c) => &c.cashout_id,
            LegacyEntity::Escrow(e) => &e.escrow_id,
            LegacyEntity::Exchange(x) => &x.order_id,
        }
    }

    pub fn legacy_ref(&self) -> LegacyRef {
        LegacyRef::new(self.system(), self.id())
    }

    pub fn status(&self) -> LegacyStatus {
        match self {
            LegacyEntity::Cashout(c) => LegacyStatus::Cashout(c.status),
            LegacyEntity::Escrow(e) => LegacyStatus::Escrow(e.status),
            LegacyEntity::Exchange(x) => LegacyStatus::Exchange(x.status),
        }
    }

    /// Set the native status; rejects values from another system's vocabulary
    pub fn set_status(&mut self, status: LegacyStatus) -> Result<(), MappingError> {
        match (self, status) {
            (LegacyEntity::Cashout(c), LegacyStatus::Cashout(s)) => c.status = s,
            (LegacyEntity::Escrow(e), LegacyStatus::Escrow(s)) => e.status = s,
            (LegacyEntity::Exchange(x), LegacyStatus::Exchange(s)) => x.status = s,
            (entity, status) => {
                return Err(MappingError::SystemMismatch {
                    status,
                    expected: entity.system(),
                });
            }
        }
        Ok(())
    }

    pub fn user_id(&self) -> UserId {
        match self {
            LegacyEntity::Cashout(c) => c.user_id,
            LegacyEntity::Escrow(e) => e.user_id,
            LegacyEntity::Exchange(x) => x.user_id,
        }
    }

    pub fn set_user_id(&mut self, user_id: UserId) {
        match self {
            LegacyEntity::Cashout(c) => c.user_id = user_id,
            LegacyEntity::Escrow(e) => e.user_id = user_id,
            LegacyEntity::Exchange(x) => x.user_id = user_id,
        }
    }

    pub fn amount(&self) -> Decimal {
        match self {
            LegacyEntity::Cashout(c) => c.amount,
            LegacyEntity::Escrow(e) => e.amount,
            LegacyEntity::Exchange(x) => x.amount,
        }
    }

    pub fn set_amount(&mut self, amount: Decimal) {
        match self {
            LegacyEntity::Cashout(c) => c.amount = amount,
            LegacyEntity::Escrow(e) => e.amount = amount,
            LegacyEntity::Exchange(x) => x.amount = amount,
        }
    }

    pub fn currency(&self) -> &str {
        match self {
            LegacyEntity::Cashout(c) => &c.currency,
            LegacyEntity::Escrow(e) => &e.currency,
            LegacyEntity::Exchange(x) => &x.currency,
        }
    }

    pub fn fee_amount(&self) -> Decimal {
        match self {
            LegacyEntity::Cashout(c) => c.fee_amount,
            LegacyEntity::Escrow(_) | LegacyEntity::Exchange(_) => Decimal::ZERO,
        }
    }

    pub fn transaction_type(&self) -> UnifiedTransactionType {
        match self {
            LegacyEntity::Cashout(_) => UnifiedTransactionType::WalletCashout,
            LegacyEntity::Escrow(_) => UnifiedTransactionType::Escrow,
            LegacyEntity::Exchange(x) => x.direction.transaction_type(),
        }
    }

    pub fn unified_transaction_id(&self) -> Option<TransactionId> {
        match self {
            LegacyEntity::Cashout(c) => c.unified_transaction_id,
            LegacyEntity::Escrow(e) => e.unified_transaction_id,
            LegacyEntity::Exchange(x) => x.unified_transaction_id,
        }
    }

    pub fn set_unified_transaction_id(&mut self, id: Option<TransactionId>) {
        match self {
            LegacyEntity::Cashout(c) => c.unified_transaction_id = id,
            LegacyEntity::Escrow(e) => e.unified_transaction_id = id,
            LegacyEntity::Exchange(x) => x.unified_transaction_id = id,
        }
    }

    pub fn version(&self) -> i64 {
        match self {
            LegacyEntity::Cashout(c) => c.version,
            LegacyEntity::Escrow(e) => e.version,
            LegacyEntity::Exchange(x) => x.version,
        }
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        match self {
            LegacyEntity::Cashout(c) => c.updated_at,
            LegacyEntity::Escrow(e) => e.updated_at,
            LegacyEntity::Exchange(x) => x.updated_at,
        }
    }

    /// Bump version and `updated_at` after a write
    pub fn touch(&mut self) {
        let now = Utc::now();
        match self {
            LegacyEntity::Cashout(c) => {
                c.version += 1;
                c.updated_at = now;
            }
            LegacyEntity::Escrow(e) => {
                e.version += 1;
                e.updated_at = now;
            }
            LegacyEntity::Exchange(x) => {
                x.version += 1;
                x.updated_at = now;
            }
        }
    }

    /// Unified row reconstructed from this legacy row (used for backfill)
    pub fn to_unified(&self, status: UnifiedTransactionStatus) -> UnifiedTransaction {
        let mut tx = UnifiedTransaction::new(
            self.user_id(),
            self.transaction_type(),
            self.amount(),
            self.currency(),
            self.fee_amount(),
        )
        .with_legacy_entity(self.id());
        tx.status = status;
        tx
    }
}

// ============================================================================
// History
// ============================================================================

/// One row of the append-only status audit trail. Never mutated once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusHistoryEntry {
    pub history_id: ulid::Ulid,
    pub transaction_id: TransactionId,
    pub old_status: UnifiedTransactionStatus,
    pub new_status: UnifiedTransactionStatus,
    /// `false` for recorded rejected attempts
    pub accepted: bool,
    /// Validation was bypassed by an administrator
    pub forced: bool,
    pub reason: String,
    pub triggered_by: String,
    pub context: StatusContext,
    pub metadata: Metadata,
    pub operation_id: OperationId,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Wallets & holds
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldStatus {
    /// Placed, funds earmarked
    Active,
    /// Confirmed when the escrow entered `funds_held`
    Confirmed,
    /// Paid out to the seller
    Released,
    /// Returned to the buyer
    Refunded,
}

impl HoldStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, HoldStatus::Active | HoldStatus::Confirmed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HoldStatus::Active => "active",
            HoldStatus::Confirmed => "confirmed",
            HoldStatus::Released => "released",
            HoldStatus::Refunded => "refunded",
        }
    }
}

impl FromStr for HoldStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(HoldStatus::Active),
            "confirmed" => Ok(HoldStatus::Confirmed),
            "released" => Ok(HoldStatus::Released),
            "refunded" => Ok(HoldStatus::Refunded),
            other => Err(format!("unknown hold status: {}", other)),
        }
    }
}

/// Funds earmarked for an escrow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletHold {
    pub hold_id: String,
    pub escrow_id: String,
    pub user_id: UserId,
    pub currency: String,
    pub amount: Decimal,
    pub status: HoldStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WalletHold {
    pub fn new(escrow: &Escrow) -> Self {
        let now = Utc::now();
        Self {
            hold_id: format!("HOLD-{}", ulid::Ulid::new()),
            escrow_id: escrow.escrow_id.clone(),
            user_id: escrow.user_id,
            currency: escrow.currency.clone(),
            amount: escrow.amount,
            status: HoldStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Balance movement caused by a fund-management side effect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceChange {
    pub user_id: UserId,
    pub currency: String,
    pub before: Decimal,
    pub after: Decimal,
}

// ============================================================================
// Idempotency
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyStatus {
    Processing,
    Completed,
    Failed,
}

impl IdempotencyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdempotencyStatus::Processing => "processing",
            IdempotencyStatus::Completed => "completed",
            IdempotencyStatus::Failed => "failed",
        }
    }
}

impl FromStr for IdempotencyStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(IdempotencyStatus::Processing),
            "completed" => Ok(IdempotencyStatus::Completed),
            "failed" => Ok(IdempotencyStatus::Failed),
            other => Err(format!("unknown idempotency status: {}", other)),
        }
    }
}

/// Guards one-off administrative operations against double execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyToken {
    pub idempotency_key: String,
    pub status: IdempotencyStatus,
    pub resource_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyToken {
    pub fn processing(key: impl Into<String>, ttl: chrono::Duration) -> Self {
        let now = Utc::now();
        Self {
            idempotency_key: key.into(),
            status: IdempotencyStatus::Processing,
            resource_id: None,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_escrow() -> Escrow {
        let now = Utc::now();
        Escrow {
            escrow_id: "ES-1".into(),
            user_id: 10,
            seller_id: 20,
            amount: dec!(250),
            currency: "USDT".into(),
            status: EscrowStatus::Created,
            unified_transaction_id: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_transaction_id_roundtrip() {
        let id = TransactionId::new();
        let parsed: TransactionId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-ulid".parse::<TransactionId>().is_err());
    }

    #[test]
    fn test_new_transaction_is_pending() {
        let tx = UnifiedTransaction::new(
            7,
            UnifiedTransactionType::WalletCashout,
            dec!(100),
            "USD",
            dec!(1.5),
        );
        assert_eq!(tx.status, UnifiedTransactionStatus::Pending);
        assert_eq!(tx.total_amount, dec!(101.5));
        assert!(tx.legacy_ref().is_none());
    }

    #[test]
    fn test_legacy_ref_follows_type() {
        let tx = UnifiedTransaction::new(
            7,
            UnifiedTransactionType::ExchangeBuyCrypto,
            dec!(100),
            "NGN",
            Decimal::ZERO,
        )
        .with_legacy_entity("EX-9");
        assert_eq!(tx.legacy_ref(), Some(LegacyRef::exchange("EX-9")));
    }

    #[test]
    fn test_set_status_rejects_foreign_vocabulary() {
        let mut entity = LegacyEntity::Escrow(sample_escrow());
        assert!(entity.set_status(EscrowStatus::Active.into()).is_ok());
        assert_eq!(entity.status(), LegacyStatus::Escrow(EscrowStatus::Active));

        let err = entity
            .set_status(CashoutStatus::Executing.into())
            .unwrap_err();
        assert!(matches!(err, MappingError::SystemMismatch { .. }));
    }

    #[test]
    fn test_to_unified_backfill() {
        let entity = LegacyEntity::Escrow(sample_escrow());
        let tx = entity.to_unified(UnifiedTransactionStatus::PaymentConfirmed);
        assert_eq!(tx.transaction_type, UnifiedTransactionType::Escrow);
        assert_eq!(tx.legacy_entity_id.as_deref(), Some("ES-1"));
        assert_eq!(tx.amount, dec!(250));
        assert_eq!(tx.status, UnifiedTransactionStatus::PaymentConfirmed);
    }

    #[test]
    fn test_hold_activity() {
        assert!(HoldStatus::Active.is_active());
        assert!(HoldStatus::Confirmed.is_active());
        assert!(!HoldStatus::Released.is_active());
        assert_eq!("refunded".parse::<HoldStatus>(), Ok(HoldStatus::Refunded));
    }

    #[test]
    fn test_idempotency_token_expiry() {
        let token = IdempotencyToken::processing("credit-1", chrono::Duration::seconds(60));
        assert!(!token.is_expired(Utc::now()));
        assert!(token.is_expired(Utc::now() + chrono::Duration::seconds(61)));
    }
}
