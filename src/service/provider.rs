//! Payout Provider seam
//!
//! Provider clients classify their own failures. The service only needs to
//! know whether trying again can help.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use thiserror::Error;

use crate::models::{PayoutDestination, TransactionId, UserId};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Timeouts, rate limits, 5xx: the same request may succeed later
    #[error("Provider temporarily unavailable: {0}")]
    Retryable(String),

    /// Bad destination, compliance block, user error: retrying cannot help
    #[error("Payout rejected: {0}")]
    NonRetryable(String),
}

impl ProviderError {
    pub fn code(&self) -> &'static str {
        match self {
            ProviderError::Retryable(_) => "PROVIDER_UNAVAILABLE",
            ProviderError::NonRetryable(_) => "PAYOUT_REJECTED",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Retryable(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PayoutRequest {
    pub transaction_id: TransactionId,
    pub cashout_id: String,
    pub user_id: UserId,
    pub amount: Decimal,
    pub currency: String,
    pub destination: PayoutDestination,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayoutReceipt {
    pub provider_reference: String,
}

#[async_trait]
pub trait PayoutProvider: Send + Sync {
    /// Provider name for logging
    fn name(&self) -> &'static str;

    /// Submit a payout. Must be idempotent on `transaction_id`.
    async fn submit_payout(&self, request: &PayoutRequest) -> Result<PayoutReceipt, ProviderError>;
}

/// Scriptable provider for tests and local runs
#[derive(Debug, Default)]
pub struct MockPayoutProvider {
    /// Transient failures to return before succeeding
    transient_failures: AtomicU32,
    reject: Mutex<Option<String>>,
    calls: AtomicU32,
    submitted: Mutex<Vec<PayoutRequest>>,
}

impl MockPayoutProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_transient_failures(&self, count: u32) {
        self.transient_failures.store(count, Ordering::SeqCst);
    }

    pub fn set_reject(&self, reason: Option<&str>) {
        if let Ok(mut reject) = self.reject.lock() {
            *reject = reason.map(str::to_string);
        }
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn submitted(&self) -> Vec<PayoutRequest> {
        self.submitted
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl PayoutProvider for MockPayoutProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn submit_payout(&self, request: &PayoutRequest) -> Result<PayoutReceipt, ProviderError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some(reason) = self.reject.lock().ok().and_then(|r| r.clone()) {
            return Err(ProviderError::NonRetryable(reason));
        }

        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(ProviderError::Retryable(format!(
                "upstream timeout on attempt {}",
                call
            )));
        }

        if let Ok(mut submitted) = self.submitted.lock() {
            submitted.push(request.clone());
        }
        Ok(PayoutReceipt {
            provider_reference: format!("MOCK-{}", request.transaction_id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn request() -> PayoutRequest {
        PayoutRequest {
            transaction_id: TransactionId::new(),
            cashout_id: "CO-1".into(),
            user_id: 1,
            amount: dec!(10),
            currency: "USD".into(),
            destination: PayoutDestination::BankAccount {
                account_reference: "NG-0123".into(),
            },
        }
    }

    #[tokio::test]
    async fn test_transient_failures_then_success() {
        let provider = MockPayoutProvider::new();
        provider.set_transient_failures(2);
        let req = request();

        assert!(provider.submit_payout(&req).await.unwrap_err().is_retryable());
        assert!(provider.submit_payout(&req).await.unwrap_err().is_retryable());
        let receipt = provider.submit_payout(&req).await.unwrap();
        assert!(receipt.provider_reference.starts_with("MOCK-"));
        assert_eq!(provider.call_count(), 3);
        assert_eq!(provider.submitted().len(), 1);
    }

    #[tokio::test]
    async fn test_rejection_is_not_retryable() {
        let provider = MockPayoutProvider::new();
        provider.set_reject(Some("account closed"));
        let err = provider.submit_payout(&request()).await.unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(err.code(), "PAYOUT_REJECTED");
    }
}
