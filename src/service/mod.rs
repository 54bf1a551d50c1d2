//! Transaction Service
//!
//! Drives whole workflows (creation, OTP gate, payout with retry, callbacks,
//! internal settlement, escrow holds, administrative credits). Every status
//! change goes through the [`StatusUpdateFacade`](crate::facade::StatusUpdateFacade).

pub mod provider;
pub mod transaction_service;

pub use provider::{MockPayoutProvider, PayoutProvider, PayoutReceipt, PayoutRequest, ProviderError};
pub use transaction_service::{
    AdminCredit, AdminCreditOutcome, CallbackOutcome, CashoutProcessing, CreatedTransaction,
    NewTransaction, PayoutCallback, TransactionService,
};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionServiceConfig {
    /// Provider attempts per cashout before it is failed
    pub max_payout_retries: u32,
    /// Pause between provider attempts
    pub retry_delay_ms: u64,
    /// Lifetime of an administrative idempotency key
    pub idempotency_ttl_secs: i64,
}

impl Default for TransactionServiceConfig {
    fn default() -> Self {
        Self {
            max_payout_retries: 3,
            retry_delay_ms: 250,
            idempotency_ttl_secs: 86_400,
        }
    }
}
