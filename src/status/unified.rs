//! Unified Status Vocabulary
//!
//! The single status vocabulary every transaction type and every legacy
//! system is translated into, plus the lifecycle phase each status lives in.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Error returned when a raw string does not name a known enum member.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Loosely-typed input accepted at the public entry points only.
///
/// Callers may hand over either the typed value or its string form; it is
/// normalized once via [`Loose::resolve`] and never travels further as a string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Loose<'a, T> {
    Typed(T),
    Raw(&'a str),
}

impl<T> Loose<'_, T>
where
    T: FromStr<Err = ParseEnumError> + Copy,
{
    pub fn resolve(self) -> Result<T, ParseEnumError> {
        match self {
            Loose::Typed(value) => Ok(value),
            Loose::Raw(raw) => raw.trim().parse(),
        }
    }
}

impl<'a> From<&'a str> for Loose<'a, UnifiedTransactionStatus> {
    fn from(raw: &'a str) -> Self {
        Loose::Raw(raw)
    }
}

impl From<UnifiedTransactionStatus> for Loose<'_, UnifiedTransactionStatus> {
    fn from(value: UnifiedTransactionStatus) -> Self {
        Loose::Typed(value)
    }
}

impl<'a> From<&'a str> for Loose<'a, UnifiedTransactionType> {
    fn from(raw: &'a str) -> Self {
        Loose::Raw(raw)
    }
}

impl From<UnifiedTransactionType> for Loose<'_, UnifiedTransactionType> {
    fn from(value: UnifiedTransactionType) -> Self {
        Loose::Typed(value)
    }
}

// ============================================================================
// Phases
// ============================================================================

/// Ordered lifecycle phase. `Ord` follows the lifecycle:
/// Initiation < Authorization < Processing < Terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusPhase {
    Initiation,
    Authorization,
    Processing,
    Terminal,
}

impl StatusPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusPhase::Initiation => "initiation",
            StatusPhase::Authorization => "authorization",
            StatusPhase::Processing => "processing",
            StatusPhase::Terminal => "terminal",
        }
    }
}

impl fmt::Display for StatusPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Unified status
// ============================================================================

/// Canonical transaction status (16 values)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnifiedTransactionStatus {
    Pending,
    AwaitingPayment,
    PaymentConfirmed,
    PartialPayment,
    FundsHeld,
    AwaitingApproval,
    OtpPending,
    AdminPending,
    Processing,
    AwaitingResponse,
    ReleasePending,
    Success,
    Failed,
    Cancelled,
    Disputed,
    Expired,
}

impl UnifiedTransactionStatus {
    pub const ALL: [UnifiedTransactionStatus; 16] = [
        UnifiedTransactionStatus::Pending,
        UnifiedTransactionStatus::AwaitingPayment,
        UnifiedTransactionStatus::PaymentConfirmed,
        UnifiedTransactionStatus::PartialPayment,
        UnifiedTransactionStatus::FundsHeld,
        UnifiedTransactionStatus::AwaitingApproval,
        UnifiedTransactionStatus::OtpPending,
        UnifiedTransactionStatus::AdminPending,
        UnifiedTransactionStatus::Processing,
        UnifiedTransactionStatus::AwaitingResponse,
        UnifiedTransactionStatus::ReleasePending,
        UnifiedTransactionStatus::Success,
        UnifiedTransactionStatus::Failed,
        UnifiedTransactionStatus::Cancelled,
        UnifiedTransactionStatus::Disputed,
        UnifiedTransactionStatus::Expired,
    ];

    /// Phase membership. Independent of transaction type.
    pub fn phase(&self) -> StatusPhase {
        use UnifiedTransactionStatus::*;
        match self {
            Pending | AwaitingPayment | PaymentConfirmed => StatusPhase::Initiation,
            FundsHeld | AwaitingApproval | OtpPending | AdminPending => StatusPhase::Authorization,
            Processing | AwaitingResponse | ReleasePending => StatusPhase::Processing,
            Success | Failed | Cancelled | Disputed | Expired | PartialPayment => {
                StatusPhase::Terminal
            }
        }
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        self.phase() == StatusPhase::Terminal
    }

    pub fn as_str(&self) -> &'static str {
        use UnifiedTransactionStatus::*;
        match self {
            Pending => "pending",
            AwaitingPayment => "awaiting_payment",
            PaymentConfirmed => "payment_confirmed",
            PartialPayment => "partial_payment",
            FundsHeld => "funds_held",
            AwaitingApproval => "awaiting_approval",
            OtpPending => "otp_pending",
            AdminPending => "admin_pending",
            Processing => "processing",
            AwaitingResponse => "awaiting_response",
            ReleasePending => "release_pending",
            Success => "success",
            Failed => "failed",
            Cancelled => "cancelled",
            Disputed => "disputed",
            Expired => "expired",
        }
    }
}

impl fmt::Display for UnifiedTransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UnifiedTransactionStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        UnifiedTransactionStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseEnumError::new("unified status", s))
    }
}

// ============================================================================
// Transaction type
// ============================================================================

/// Unified transaction type. Each type owns its own flow table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnifiedTransactionType {
    WalletCashout,
    ExchangeSellCrypto,
    ExchangeBuyCrypto,
    Escrow,
}

impl UnifiedTransactionType {
    pub const ALL: [UnifiedTransactionType; 4] = [
        UnifiedTransactionType::WalletCashout,
        UnifiedTransactionType::ExchangeSellCrypto,
        UnifiedTransactionType::ExchangeBuyCrypto,
        UnifiedTransactionType::Escrow,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            UnifiedTransactionType::WalletCashout => "wallet_cashout",
            UnifiedTransactionType::ExchangeSellCrypto => "exchange_sell_crypto",
            UnifiedTransactionType::ExchangeBuyCrypto => "exchange_buy_crypto",
            UnifiedTransactionType::Escrow => "escrow",
        }
    }
}

impl fmt::Display for UnifiedTransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UnifiedTransactionType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        UnifiedTransactionType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseEnumError::new("transaction type", s))
    }
}

// ============================================================================
// Transition context
// ============================================================================

/// Who or what triggered a status change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusContext {
    ManualAdmin,
    AutomatedSystem,
    WebhookResponse,
    UserAction,
    RetryProcessing,
    TimeoutHandling,
    ErrorRecovery,
}

impl StatusContext {
    pub const ALL: [StatusContext; 7] = [
        StatusContext::ManualAdmin,
        StatusContext::AutomatedSystem,
        StatusContext::WebhookResponse,
        StatusContext::UserAction,
        StatusContext::RetryProcessing,
        StatusContext::TimeoutHandling,
        StatusContext::ErrorRecovery,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StatusContext::ManualAdmin => "manual_admin",
            StatusContext::AutomatedSystem => "automated_system",
            StatusContext::WebhookResponse => "webhook_response",
            StatusContext::UserAction => "user_action",
            StatusContext::RetryProcessing => "retry_processing",
            StatusContext::TimeoutHandling => "timeout_handling",
            StatusContext::ErrorRecovery => "error_recovery",
        }
    }
}

impl fmt::Display for StatusContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatusContext {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StatusContext::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseEnumError::new("status context", s))
    }
}
