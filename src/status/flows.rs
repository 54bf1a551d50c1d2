//! Status Flow Tables
//!
//! Per transaction type adjacency maps: `status -> [allowed next statuses]`.
//! A status that is not a source key has no outgoing transitions for that type.
//!
//! ```text
//! wallet_cashout:        pending → processing → awaiting_response → success
//!                            ↓          ↓                ↓
//!                        cancelled    failed           failed
//!
//! exchange_*_crypto:     pending → awaiting_payment → payment_confirmed → processing → success
//!
//! escrow:                pending → payment_confirmed → awaiting_approval → funds_held
//!                            → release_pending → success
//!                        disputed → success | cancelled   (admin resolution)
//! ```

use std::collections::HashMap;

use super::unified::UnifiedTransactionStatus as S;
use super::unified::{UnifiedTransactionStatus, UnifiedTransactionType};

type FlowTable = HashMap<UnifiedTransactionStatus, Vec<UnifiedTransactionStatus>>;

const WALLET_CASHOUT: &[(S, &[S])] = &[
    (S::Pending, &[S::Processing, S::Cancelled]),
    (S::Processing, &[S::AwaitingResponse, S::Failed]),
    (S::AwaitingResponse, &[S::Success, S::Failed]),
];

const EXCHANGE_SELL_CRYPTO: &[(S, &[S])] = &[
    (S::Pending, &[S::AwaitingPayment, S::Cancelled]),
    (S::AwaitingPayment, &[S::PaymentConfirmed, S::Cancelled]),
    (S::PaymentConfirmed, &[S::Processing, S::Failed]),
    (S::Processing, &[S::Success, S::Failed]),
];

// Same shape as sell today, declared separately so the two can diverge.
const EXCHANGE_BUY_CRYPTO: &[(S, &[S])] = &[
    (S::Pending, &[S::AwaitingPayment, S::Cancelled]),
    (S::AwaitingPayment, &[S::PaymentConfirmed, S::Cancelled]),
    (S::PaymentConfirmed, &[S::Processing, S::Failed]),
    (S::Processing, &[S::Success, S::Failed]),
];

const ESCROW: &[(S, &[S])] = &[
    (S::Pending, &[S::PaymentConfirmed, S::Cancelled]),
    (S::PaymentConfirmed, &[S::AwaitingApproval, S::Cancelled]),
    (S::AwaitingApproval, &[S::FundsHeld, S::Cancelled]),
    (S::FundsHeld, &[S::ReleasePending, S::Disputed, S::Cancelled]),
    (S::ReleasePending, &[S::Success, S::Disputed]),
    (S::Disputed, &[S::Success, S::Cancelled]),
];

/// Immutable set of flow tables, built once and shared.
#[derive(Debug, Clone, Default)]
pub struct StatusFlows {
    tables: HashMap<UnifiedTransactionType, FlowTable>,
}

impl StatusFlows {
    /// Terminal-to-terminal edges that exist only for administrative
    /// resolution. These are the sole exceptions to terminal finality.
    pub const ADMIN_RESOLUTION_EDGES: &'static [(UnifiedTransactionType, S, S)] = &[
        (UnifiedTransactionType::Escrow, S::Disputed, S::Success),
        (UnifiedTransactionType::Escrow, S::Disputed, S::Cancelled),
    ];

    /// The production flow tables for all four transaction types
    pub fn canonical() -> Self {
        Self::empty()
            .with_table(UnifiedTransactionType::WalletCashout, WALLET_CASHOUT)
            .with_table(UnifiedTransactionType::ExchangeSellCrypto, EXCHANGE_SELL_CRYPTO)
            .with_table(UnifiedTransactionType::ExchangeBuyCrypto, EXCHANGE_BUY_CRYPTO)
            .with_table(UnifiedTransactionType::Escrow, ESCROW)
    }

    /// No tables registered at all
    pub fn empty() -> Self {
        Self {
            tables: HashMap::new(),
        }
    }

    /// Register (or replace) the table of one transaction type
    pub fn with_table(
        mut self,
        tx_type: UnifiedTransactionType,
        edges: &[(UnifiedTransactionStatus, &[UnifiedTransactionStatus])],
    ) -> Self {
        let table = edges
            .iter()
            .map(|(from, to)| (*from, to.to_vec()))
            .collect();
        self.tables.insert(tx_type, table);
        self
    }

    pub fn has_type(&self, tx_type: UnifiedTransactionType) -> bool {
        self.tables.contains_key(&tx_type)
    }

    /// Legal successors of `current`, `None` if the type has no table.
    pub fn next_statuses(
        &self,
        tx_type: UnifiedTransactionType,
        current: UnifiedTransactionStatus,
    ) -> Option<&[UnifiedTransactionStatus]> {
        let table = self.tables.get(&tx_type)?;
        Some(table.get(&current).map(Vec::as_slice).unwrap_or(&[]))
    }

    /// Every `(from, to)` edge of a type's table
    pub fn edges(
        &self,
        tx_type: UnifiedTransactionType,
    ) -> Vec<(UnifiedTransactionStatus, UnifiedTransactionStatus)> {
        let mut edges: Vec<_> = self
            .tables
            .get(&tx_type)
            .into_iter()
            .flat_map(|table| {
                table
                    .iter()
                    .flat_map(|(from, tos)| tos.iter().map(move |to| (*from, *to)))
            })
            .collect();
        edges.sort();
        edges
    }

    pub fn is_admin_resolution_edge(
        tx_type: UnifiedTransactionType,
        from: UnifiedTransactionStatus,
        to: UnifiedTransactionStatus,
    ) -> bool {
        Self::ADMIN_RESOLUTION_EDGES.contains(&(tx_type, from, to))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_types_registered() {
        let flows = StatusFlows::canonical();
        for t in UnifiedTransactionType::ALL {
            assert!(flows.has_type(t), "missing table for {}", t);
        }
    }

    #[test]
    fn test_unlisted_status_has_no_successors() {
        let flows = StatusFlows::canonical();
        let next = flows
            .next_statuses(UnifiedTransactionType::WalletCashout, S::FundsHeld)
            .unwrap();
        assert!(next.is_empty());
    }

    #[test]
    fn test_unregistered_type() {
        let flows = StatusFlows::empty();
        assert!(
            flows
                .next_statuses(UnifiedTransactionType::Escrow, S::Pending)
                .is_none()
        );
    }

    #[test]
    fn test_escrow_declares_admin_edges() {
        let flows = StatusFlows::canonical();
        for (t, from, to) in StatusFlows::ADMIN_RESOLUTION_EDGES {
            let next = flows.next_statuses(*t, *from).unwrap();
            assert!(next.contains(to));
        }
    }

    #[test]
    fn test_buy_and_sell_are_independent_entries() {
        let flows = StatusFlows::canonical().with_table(
            UnifiedTransactionType::ExchangeBuyCrypto,
            &[(S::Pending, &[S::Cancelled])],
        );
        assert_eq!(
            flows
                .next_statuses(UnifiedTransactionType::ExchangeSellCrypto, S::Pending)
                .unwrap(),
            &[S::AwaitingPayment, S::Cancelled]
        );
        assert_eq!(
            flows
                .next_statuses(UnifiedTransactionType::ExchangeBuyCrypto, S::Pending)
                .unwrap(),
            &[S::Cancelled]
        );
    }
}
