//! Legacy Status Vocabularies
//!
//! The three per-domain status enums that predate the unified model. They are
//! externally defined and only ever mapped, never redefined.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::unified::{ParseEnumError, UnifiedTransactionStatus, UnifiedTransactionType};

/// Declares a legacy status enum with its snake_case wire names and `ALL`
/// in declaration order.
macro_rules! legacy_status_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $kind:literal {
            $($(#[$vmeta:meta])* $variant:ident => $wire:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $wire),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                $name::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_str().eq_ignore_ascii_case(s.trim()))
                    .ok_or_else(|| ParseEnumError::new($kind, s))
            }
        }
    };
}

legacy_status_enum! {
    /// Wallet cashout statuses
    CashoutStatus, "cashout status" {
        Pending => "pending",
        OtpPending => "otp_pending",
        UserConfirmPending => "user_confirm_pending",
        AdminPending => "admin_pending",
        PendingAddressConfig => "pending_address_config",
        PendingServiceFunding => "pending_service_funding",
        Approved => "approved",
        Processing => "processing",
        Executing => "executing",
        AwaitingResponse => "awaiting_response",
        Success => "success",
        /// Deprecated alias of `Success`, still present in old rows.
        Completed => "completed",
        Failed => "failed",
        Expired => "expired",
        Cancelled => "cancelled",
    }
}

legacy_status_enum! {
    /// Escrow trade statuses
    EscrowStatus, "escrow status" {
        Created => "created",
        PaymentPending => "payment_pending",
        PendingDeposit => "pending_deposit",
        PaymentConfirmed => "payment_confirmed",
        PartialPayment => "partial_payment",
        PendingSeller => "pending_seller",
        Active => "active",
        Completed => "completed",
        PaymentFailed => "payment_failed",
        Disputed => "disputed",
        Cancelled => "cancelled",
        Refunded => "refunded",
        Expired => "expired",
    }
}

legacy_status_enum! {
    /// Currency exchange order statuses
    ExchangeStatus, "exchange status" {
        Created => "created",
        AwaitingDeposit => "awaiting_deposit",
        PaymentConfirmed => "payment_confirmed",
        PaymentReceived => "payment_received",
        RateLocked => "rate_locked",
        PendingApproval => "pending_approval",
        Processing => "processing",
        Completed => "completed",
        Failed => "failed",
        Cancelled => "cancelled",
        Expired => "expired",
    }
}

/// Legacy subsystem identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegacySystemType {
    Cashout,
    Escrow,
    Exchange,
}

impl LegacySystemType {
    pub const ALL: [LegacySystemType; 3] = [
        LegacySystemType::Cashout,
        LegacySystemType::Escrow,
        LegacySystemType::Exchange,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LegacySystemType::Cashout => "cashout",
            LegacySystemType::Escrow => "escrow",
            LegacySystemType::Exchange => "exchange",
        }
    }

    /// The legacy system that owns rows of a given transaction type
    pub fn for_transaction_type(tx_type: UnifiedTransactionType) -> Self {
        match tx_type {
            UnifiedTransactionType::WalletCashout => LegacySystemType::Cashout,
            UnifiedTransactionType::ExchangeSellCrypto
            | UnifiedTransactionType::ExchangeBuyCrypto => LegacySystemType::Exchange,
            UnifiedTransactionType::Escrow => LegacySystemType::Escrow,
        }
    }

    /// Every status value the system defines, in declaration order
    pub fn statuses(&self) -> Vec<LegacyStatus> {
        match self {
            LegacySystemType::Cashout => CashoutStatus::ALL
                .iter()
                .map(|s| LegacyStatus::Cashout(*s))
                .collect(),
            LegacySystemType::Escrow => EscrowStatus::ALL
                .iter()
                .map(|s| LegacyStatus::Escrow(*s))
                .collect(),
            LegacySystemType::Exchange => ExchangeStatus::ALL
                .iter()
                .map(|s| LegacyStatus::Exchange(*s))
                .collect(),
        }
    }
}

impl fmt::Display for LegacySystemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LegacySystemType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LegacySystemType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseEnumError::new("legacy system type", s))
    }
}

/// A status value native to one of the legacy systems
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "system", content = "status", rename_all = "snake_case")]
pub enum LegacyStatus {
    Cashout(CashoutStatus),
    Escrow(EscrowStatus),
    Exchange(ExchangeStatus),
}

impl LegacyStatus {
    pub fn system(&self) -> LegacySystemType {
        match self {
            LegacyStatus::Cashout(_) => LegacySystemType::Cashout,
            LegacyStatus::Escrow(_) => LegacySystemType::Escrow,
            LegacyStatus::Exchange(_) => LegacySystemType::Exchange,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LegacyStatus::Cashout(s) => s.as_str(),
            LegacyStatus::Escrow(s) => s.as_str(),
            LegacyStatus::Exchange(s) => s.as_str(),
        }
    }

    /// Parse a raw value within the given system's vocabulary
    pub fn parse(system: LegacySystemType, raw: &str) -> Result<Self, ParseEnumError> {
        Ok(match system {
            LegacySystemType::Cashout => LegacyStatus::Cashout(raw.parse()?),
            LegacySystemType::Escrow => LegacyStatus::Escrow(raw.parse()?),
            LegacySystemType::Exchange => LegacyStatus::Exchange(raw.parse()?),
        })
    }
}

impl fmt::Display for LegacyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.system(), self.as_str())
    }
}

impl From<CashoutStatus> for LegacyStatus {
    fn from(s: CashoutStatus) -> Self {
        LegacyStatus::Cashout(s)
    }
}

impl From<EscrowStatus> for LegacyStatus {
    fn from(s: EscrowStatus) -> Self {
        LegacyStatus::Escrow(s)
    }
}

impl From<ExchangeStatus> for LegacyStatus {
    fn from(s: ExchangeStatus) -> Self {
        LegacyStatus::Exchange(s)
    }
}

/// A requested target status, expressed either in unified terms or in the
/// vocabulary of the entity's own legacy system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatusValue {
    Unified(UnifiedTransactionStatus),
    Legacy(LegacyStatus),
}

impl fmt::Display for StatusValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusValue::Unified(s) => write!(f, "{}", s),
            StatusValue::Legacy(s) => write!(f, "{}", s),
        }
    }
}

impl From<UnifiedTransactionStatus> for StatusValue {
    fn from(s: UnifiedTransactionStatus) -> Self {
        StatusValue::Unified(s)
    }
}

impl From<LegacyStatus> for StatusValue {
    fn from(s: LegacyStatus) -> Self {
        StatusValue::Legacy(s)
    }
}

impl From<CashoutStatus> for StatusValue {
    fn from(s: CashoutStatus) -> Self {
        StatusValue::Legacy(s.into())
    }
}

impl From<EscrowStatus> for StatusValue {
    fn from(s: EscrowStatus) -> Self {
        StatusValue::Legacy(s.into())
    }
}

impl From<ExchangeStatus> for StatusValue {
    fn from(s: ExchangeStatus) -> Self {
        StatusValue::Legacy(s.into())
    }
}
