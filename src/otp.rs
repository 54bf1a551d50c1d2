//! OTP Collaborator
//!
//! The engine never delivers or checks codes itself. It only asks two
//! questions: does this kind of transaction need OTP, and has it been
//! verified for this transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashSet;

use crate::models::TransactionId;
use crate::status::UnifiedTransactionType;

#[async_trait]
pub trait OtpService: Send + Sync {
    /// Whether transactions of this type are OTP-gated at all
    fn requires_otp(&self, tx_type: UnifiedTransactionType) -> bool;

    /// Whether OTP has been verified for this transaction
    async fn is_verified(&self, transaction_id: TransactionId) -> bool;
}

/// Process-local OTP state, for tests and single-node deployments
#[derive(Debug)]
pub struct InMemoryOtpService {
    gated: HashSet<UnifiedTransactionType>,
    verified: DashMap<TransactionId, DateTime<Utc>>,
}

impl Default for InMemoryOtpService {
    fn default() -> Self {
        Self::new([UnifiedTransactionType::WalletCashout])
    }
}

impl InMemoryOtpService {
    pub fn new(gated: impl IntoIterator<Item = UnifiedTransactionType>) -> Self {
        Self {
            gated: gated.into_iter().collect(),
            verified: DashMap::new(),
        }
    }

    pub fn mark_verified(&self, transaction_id: TransactionId) {
        self.verified.insert(transaction_id, Utc::now());
    }

    pub fn revoke(&self, transaction_id: TransactionId) {
        self.verified.remove(&transaction_id);
    }

    pub fn verified_at(&self, transaction_id: TransactionId) -> Option<DateTime<Utc>> {
        self.verified.get(&transaction_id).map(|v| *v)
    }
}

#[async_trait]
impl OtpService for InMemoryOtpService {
    fn requires_otp(&self, tx_type: UnifiedTransactionType) -> bool {
        self.gated.contains(&tx_type)
    }

    async fn is_verified(&self, transaction_id: TransactionId) -> bool {
        self.verified.contains_key(&transaction_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_only_cashouts_gated_by_default() {
        let otp = InMemoryOtpService::default();
        assert!(otp.requires_otp(UnifiedTransactionType::WalletCashout));
        assert!(!otp.requires_otp(UnifiedTransactionType::Escrow));
        assert!(!otp.requires_otp(UnifiedTransactionType::ExchangeBuyCrypto));
    }

    #[tokio::test]
    async fn test_verify_and_revoke() {
        let otp = InMemoryOtpService::default();
        let id = TransactionId::new();
        assert!(!otp.is_verified(id).await);

        otp.mark_verified(id);
        assert!(otp.is_verified(id).await);
        assert!(otp.verified_at(id).is_some());

        otp.revoke(id);
        assert!(!otp.is_verified(id).await);
    }
}
