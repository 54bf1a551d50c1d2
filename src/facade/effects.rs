//! Fund-management side effects
//!
//! Balance and hold movements implied by a status change. They run in the
//! same unit of work as the dual-write, so they commit or vanish together
//! with the status.
//!
//! | type     | transition                                | effect                       |
//! |----------|-------------------------------------------|------------------------------|
//! | cashout  | into processing, awaiting_response, success | debit total (amount + fee) |
//! | cashout  | out of those (→ failed)                   | refund total                 |
//! | cashout  | → success, internal destination           | credit recipient with amount |
//! | escrow   | → funds_held                              | confirm hold                 |
//! | escrow   | → success                                 | release hold to seller       |
//! | escrow   | → cancelled with a live hold              | refund hold to buyer         |
//! | exchange | → success                                 | credit output currency       |

use rust_decimal::Decimal;
use tracing::info;

use crate::dual_write::EntityPair;
use crate::error::StatusError;
use crate::models::{BalanceChange, HoldStatus, LegacyEntity, PayoutDestination, UserId};
use crate::status::{UnifiedTransactionStatus as S, UnifiedTransactionType as T};
use crate::store::StoreTx;

pub const RULE_ESCROW_SELLER: &str = "escrow_release_requires_seller";

pub async fn apply(
    uow: &mut dyn StoreTx,
    pair: &EntityPair,
    tx_type: T,
    from: S,
    to: S,
) -> Result<Vec<BalanceChange>, StatusError> {
    let changes = match tx_type {
        T::WalletCashout => cashout(uow, pair, from, to).await?,
        T::Escrow => escrow(uow, pair, to).await?,
        T::ExchangeBuyCrypto | T::ExchangeSellCrypto => exchange(uow, pair, to).await?,
    };
    for change in &changes {
        info!(
            user_id = change.user_id,
            currency = %change.currency,
            before = %change.before,
            after = %change.after,
            "Balance moved by status change"
        );
    }
    Ok(changes)
}

/// Owner, currency and total of the transaction, from whichever row exists
fn funds(pair: &EntityPair) -> Option<(UserId, String, Decimal, Decimal)> {
    match (&pair.unified, &pair.legacy) {
        (Some(tx), _) => Some((tx.user_id, tx.currency.clone(), tx.amount, tx.total_amount)),
        (None, Some(e)) => Some((
            e.user_id(),
            e.currency().to_string(),
            e.amount(),
            e.amount() + e.fee_amount(),
        )),
        (None, None) => None,
    }
}

async fn cashout(
    uow: &mut dyn StoreTx,
    pair: &EntityPair,
    from: S,
    to: S,
) -> Result<Vec<BalanceChange>, StatusError> {
    let Some((user_id, currency, amount, total)) = funds(pair) else {
        return Ok(Vec::new());
    };
    let mut changes = Vec::new();
    match (cashout_debited(from), cashout_debited(to)) {
        (false, true) => changes.push(uow.adjust_wallet(user_id, &currency, -total).await?),
        (true, false) => changes.push(uow.adjust_wallet(user_id, &currency, total).await?),
        _ => {}
    }
    if to == S::Success
        && from != S::Success
        && let Some(LegacyEntity::Cashout(c)) = &pair.legacy
        && let PayoutDestination::InternalUser { user_id: recipient } = &c.destination
    {
        changes.push(uow.adjust_wallet(*recipient, &currency, amount).await?);
    }
    Ok(changes)
}

/// Whether the owner's wallet stays debited while the cashout sits in
/// `status`. Wallet movements follow changes of this flag.
fn cashout_debited(status: S) -> bool {
    matches!(status, S::Processing | S::AwaitingResponse | S::Success)
}

async fn escrow(
    uow: &mut dyn StoreTx,
    pair: &EntityPair,
    to: S,
) -> Result<Vec<BalanceChange>, StatusError> {
    let Some(legacy_ref) = pair.legacy_ref() else {
        return Ok(Vec::new());
    };
    let mut changes = Vec::new();
    match to {
        S::FundsHeld => {
            if let Some(hold) = uow.active_hold(&legacy_ref.id).await?
                && hold.status == HoldStatus::Active
            {
                uow.update_hold_status(&hold.hold_id, HoldStatus::Confirmed)
                    .await?;
            }
        }
        S::Success => {
            let Some(LegacyEntity::Escrow(escrow)) = &pair.legacy else {
                return Err(StatusError::BusinessRule {
                    rule: RULE_ESCROW_SELLER,
                    message: format!(
                        "escrow {} has no legacy record naming the seller",
                        legacy_ref.id
                    ),
                });
            };
            let hold = uow.active_hold(&escrow.escrow_id).await?.ok_or_else(|| {
                StatusError::BusinessRule {
                    rule: super::rules::RULE_ESCROW_ACTIVE_HOLD,
                    message: format!("escrow {} has no held funds to release", escrow.escrow_id),
                }
            })?;
            uow.update_hold_status(&hold.hold_id, HoldStatus::Released)
                .await?;
            changes.push(
                uow.adjust_wallet(escrow.seller_id, &hold.currency, hold.amount)
                    .await?,
            );
        }
        S::Cancelled => {
            if let Some(hold) = uow.active_hold(&legacy_ref.id).await? {
                uow.update_hold_status(&hold.hold_id, HoldStatus::Refunded)
                    .await?;
                changes.push(
                    uow.adjust_wallet(hold.user_id, &hold.currency, hold.amount)
                        .await?,
                );
            }
        }
        _ => {}
    }
    Ok(changes)
}

async fn exchange(
    uow: &mut dyn StoreTx,
    pair: &EntityPair,
    to: S,
) -> Result<Vec<BalanceChange>, StatusError> {
    if to != S::Success {
        return Ok(Vec::new());
    }
    match &pair.legacy {
        Some(LegacyEntity::Exchange(order)) => Ok(vec![
            uow.adjust_wallet(order.user_id, &order.output_currency, order.output_amount)
                .await?,
        ]),
        _ => Ok(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Cashout, Escrow, UnifiedTransaction, WalletHold};
    use crate::status::{CashoutStatus, EscrowStatus};
    use crate::store::{MemoryStore, TransactionStore};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn cashout_pair(destination: PayoutDestination) -> EntityPair {
        let now = Utc::now();
        let cashout = Cashout {
            cashout_id: "CO-1".into(),
            user_id: 1,
            amount: dec!(100),
            currency: "USD".into(),
            fee_amount: dec!(2),
            destination,
            status: CashoutStatus::Pending,
            provider_reference: None,
            unified_transaction_id: None,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        let legacy = LegacyEntity::Cashout(cashout);
        let unified: UnifiedTransaction = legacy.to_unified(S::Pending);
        EntityPair {
            unified: Some(unified),
            legacy: Some(legacy),
        }
    }

    #[tokio::test]
    async fn test_cashout_debit_then_refund() {
        let store = MemoryStore::new();
        store.seed_wallet(1, "USD", dec!(150));
        let pair = cashout_pair(PayoutDestination::BankAccount {
            account_reference: "GB00".into(),
        });
        let mut uow = store.begin().await.unwrap();

        let debit = apply(uow.as_mut(), &pair, T::WalletCashout, S::Pending, S::Processing)
            .await
            .unwrap();
        assert_eq!(debit[0].after, dec!(48));

        let refund = apply(uow.as_mut(), &pair, T::WalletCashout, S::Processing, S::Failed)
            .await
            .unwrap();
        assert_eq!(refund[0].after, dec!(150));
    }

    #[tokio::test]
    async fn test_forced_skip_debits_before_refund() {
        let store = MemoryStore::new();
        store.seed_wallet(1, "USD", dec!(150));
        let pair = cashout_pair(PayoutDestination::BankAccount {
            account_reference: "GB00".into(),
        });
        let mut uow = store.begin().await.unwrap();

        let skipped = apply(
            uow.as_mut(),
            &pair,
            T::WalletCashout,
            S::Pending,
            S::AwaitingResponse,
        )
        .await
        .unwrap();
        assert_eq!(skipped[0].after, dec!(48));

        let refund = apply(
            uow.as_mut(),
            &pair,
            T::WalletCashout,
            S::AwaitingResponse,
            S::Failed,
        )
        .await
        .unwrap();
        assert_eq!(refund[0].after, dec!(150));
    }

    #[tokio::test]
    async fn test_failure_without_debit_moves_nothing() {
        let store = MemoryStore::new();
        store.seed_wallet(1, "USD", dec!(150));
        let pair = cashout_pair(PayoutDestination::BankAccount {
            account_reference: "GB00".into(),
        });
        let mut uow = store.begin().await.unwrap();
        let changes = apply(uow.as_mut(), &pair, T::WalletCashout, S::Pending, S::Failed)
            .await
            .unwrap();
        assert!(changes.is_empty());
        assert_eq!(uow.wallet_balance(1, "USD").await.unwrap(), dec!(150));
    }

    #[tokio::test]
    async fn test_cashout_debit_needs_funds() {
        let store = MemoryStore::new();
        store.seed_wallet(1, "USD", dec!(50));
        let pair = cashout_pair(PayoutDestination::BankAccount {
            account_reference: "GB00".into(),
        });
        let mut uow = store.begin().await.unwrap();
        let err = apply(uow.as_mut(), &pair, T::WalletCashout, S::Pending, S::Processing)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INSUFFICIENT_FUNDS");
    }

    #[tokio::test]
    async fn test_internal_cashout_credits_recipient() {
        let store = MemoryStore::new();
        let pair = cashout_pair(PayoutDestination::InternalUser { user_id: 9 });
        let mut uow = store.begin().await.unwrap();
        let changes = apply(
            uow.as_mut(),
            &pair,
            T::WalletCashout,
            S::AwaitingResponse,
            S::Success,
        )
        .await
        .unwrap();
        assert_eq!(changes[0].user_id, 9);
        assert_eq!(changes[0].after, dec!(100));
    }

    #[tokio::test]
    async fn test_escrow_release_and_refund() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let escrow = Escrow {
            escrow_id: "ES-1".into(),
            user_id: 1,
            seller_id: 2,
            amount: dec!(80),
            currency: "USDT".into(),
            status: EscrowStatus::Active,
            unified_transaction_id: None,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        let hold = WalletHold::new(&escrow);
        let pair = EntityPair {
            unified: None,
            legacy: Some(LegacyEntity::Escrow(escrow)),
        };

        let mut uow = store.begin().await.unwrap();
        uow.insert_hold(&hold).await.unwrap();
        apply(uow.as_mut(), &pair, T::Escrow, S::AwaitingApproval, S::FundsHeld)
            .await
            .unwrap();
        assert_eq!(
            uow.active_hold("ES-1").await.unwrap().unwrap().status,
            HoldStatus::Confirmed
        );

        let released = apply(uow.as_mut(), &pair, T::Escrow, S::ReleasePending, S::Success)
            .await
            .unwrap();
        assert_eq!(released[0].user_id, 2);
        assert_eq!(released[0].after, dec!(80));
        assert!(uow.active_hold("ES-1").await.unwrap().is_none());

        // Nothing left to refund
        let refunded = apply(uow.as_mut(), &pair, T::Escrow, S::Disputed, S::Cancelled)
            .await
            .unwrap();
        assert!(refunded.is_empty());
    }
}
