//! Transaction workflows
//!
//! Creation writes both rows in one unit of work. Everything after that is
//! a sequence of facade calls plus the few non-status writes a workflow owns
//! (provider reference, retry counter, escrow hold, idempotency token).

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::TransactionServiceConfig;
use super::provider::{PayoutProvider, PayoutRequest, ProviderError};
use crate::dual_write::{EntityKey, EntityPair, load_pair};
use crate::error::StatusError;
use crate::facade::audit::AUDIT_TARGET;
use crate::facade::{StatusUpdateFacade, StatusUpdateRequest, StatusUpdateResult};
use crate::models::{
    BalanceChange, Cashout, Escrow, ExchangeDirection, ExchangeOrder, IdempotencyStatus,
    IdempotencyToken, LegacyEntity, LegacyRef, PayoutDestination, TransactionId, UserId,
    WalletHold,
};
use crate::otp::OtpService;
use crate::status::{
    CashoutStatus, EscrowStatus, ExchangeStatus, StatusContext, UnifiedTransactionStatus as S,
    UnifiedTransactionType,
};
use crate::store::{StoreError, StoreTx, TransactionStore, rollback_quietly};

pub const RULE_DISTINCT_PARTIES: &str = "parties_must_differ";
pub const RULE_CASHOUT_STATE: &str = "cashout_not_processable";
pub const RULE_INTERNAL_DESTINATION: &str = "internal_transfer_requires_internal_destination";

// ============================================================================
// Request / outcome types
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum NewTransaction {
    Cashout {
        user_id: UserId,
        amount: Decimal,
        currency: String,
        fee_amount: Decimal,
        destination: PayoutDestination,
    },
    Escrow {
        buyer_id: UserId,
        seller_id: UserId,
        amount: Decimal,
        currency: String,
    },
    Exchange {
        user_id: UserId,
        direction: ExchangeDirection,
        amount: Decimal,
        currency: String,
        output_amount: Decimal,
        output_currency: String,
        destination_address: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreatedTransaction {
    pub transaction_id: TransactionId,
    pub legacy_ref: LegacyRef,
    pub transaction_type: UnifiedTransactionType,
    /// The caller must collect OTP before the transaction can progress
    pub requires_otp: bool,
}

/// Where a cashout ended up after one processing run
#[derive(Debug, Clone, PartialEq)]
pub struct CashoutProcessing {
    pub status: S,
    /// Provider attempts made in this run
    pub attempts: u32,
    pub provider_reference: Option<String>,
    pub provider_error: Option<ProviderError>,
    /// Last facade call of the run
    pub result: StatusUpdateResult,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayoutCallback {
    pub success: bool,
    pub provider_reference: Option<String>,
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CallbackOutcome {
    Applied(StatusUpdateResult),
    /// Redelivered webhook for a status already reached
    AlreadyApplied(S),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminCredit {
    pub idempotency_key: String,
    pub user_id: UserId,
    pub currency: String,
    pub amount: Decimal,
    pub admin_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AdminCreditOutcome {
    Applied(BalanceChange),
    AlreadyApplied { resource_id: Option<String> },
}

// ============================================================================
// Service
// ============================================================================

pub struct TransactionService {
    store: Arc<dyn TransactionStore>,
    facade: Arc<StatusUpdateFacade>,
    otp: Arc<dyn OtpService>,
    provider: Arc<dyn PayoutProvider>,
    config: TransactionServiceConfig,
}

impl TransactionService {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        facade: Arc<StatusUpdateFacade>,
        otp: Arc<dyn OtpService>,
        provider: Arc<dyn PayoutProvider>,
        config: TransactionServiceConfig,
    ) -> Self {
        Self {
            store,
            facade,
            otp,
            provider,
            config,
        }
    }

    pub fn facade(&self) -> &StatusUpdateFacade {
        &self.facade
    }

    pub fn requires_otp(&self, tx_type: UnifiedTransactionType) -> bool {
        self.otp.requires_otp(tx_type)
    }

    /// Create a transaction: unified row plus its legacy mirror, linked both
    /// ways, both in the initial status. No history row is written.
    pub async fn create_transaction(
        &self,
        new: NewTransaction,
    ) -> Result<CreatedTransaction, StatusError> {
        let entity = build_entity(new)?;
        let mut unified = entity.to_unified(S::Pending);
        let transaction_id = unified.transaction_id;
        if let LegacyEntity::Exchange(order) = &entity
            && let Some(address) = &order.destination_address
        {
            unified
                .metadata
                .insert("destination_address".into(), address.clone().into());
        }
        let mut entity = entity;
        entity.set_unified_transaction_id(Some(transaction_id));

        let mut uow = self.store.begin().await?;
        let written = async {
            uow.insert_unified(&unified).await?;
            uow.insert_legacy(&entity).await?;
            uow.commit().await
        }
        .await;
        if let Err(e) = written {
            rollback_quietly(uow.as_mut()).await;
            return Err(e.into());
        }

        let created = CreatedTransaction {
            transaction_id,
            legacy_ref: entity.legacy_ref(),
            transaction_type: unified.transaction_type,
            requires_otp: self.requires_otp(unified.transaction_type),
        };
        info!(
            transaction_id = %transaction_id,
            legacy = %created.legacy_ref,
            tx_type = %created.transaction_type,
            amount = %unified.amount,
            currency = %unified.currency,
            "Transaction created"
        );
        Ok(created)
    }

    // ========================================================================
    // Cashout
    // ========================================================================

    /// Move a cashout from `pending` through the payout provider.
    ///
    /// OTP is a hard gate here regardless of the facade's enforcement mode.
    /// A cashout already in `processing` is resumed without a second debit.
    pub async fn process_cashout(
        &self,
        cashout_id: &str,
        actor: &str,
    ) -> Result<CashoutProcessing, StatusError> {
        let key = EntityKey::Legacy(LegacyRef::cashout(cashout_id));
        let (pair, current) = self.load(&key).await?;
        let cashout = cashout_of(&pair, cashout_id)?;
        let transaction_id = pair
            .unified
            .as_ref()
            .map(|tx| tx.transaction_id)
            .or(cashout.unified_transaction_id);

        if self.requires_otp(UnifiedTransactionType::WalletCashout) {
            let verified = match transaction_id {
                Some(id) => self.otp.is_verified(id).await,
                None => false,
            };
            if !verified {
                return Err(StatusError::OtpRequired(cashout_id.to_string()));
            }
        }

        let transaction_id = match current {
            S::Pending => {
                let started = self
                    .facade
                    .update_cashout_status(
                        cashout_id,
                        StatusUpdateRequest::new(S::Processing, StatusContext::UserAction)
                            .triggered_by(actor)
                            .reason("cashout submitted"),
                    )
                    .await
                    .into_result()?;
                started.transaction_id.or(transaction_id)
            }
            S::Processing => transaction_id,
            other => {
                return Err(StatusError::BusinessRule {
                    rule: RULE_CASHOUT_STATE,
                    message: format!(
                        "cashout {} is {}, not pending or processing",
                        cashout_id, other
                    ),
                });
            }
        };
        let transaction_id = transaction_id.ok_or_else(|| StatusError::EntityNotFound {
            kind: "transaction",
            id: cashout_id.to_string(),
        })?;

        if matches!(cashout.destination, PayoutDestination::InternalUser { .. }) {
            return self.settle_internal(&cashout, actor).await;
        }

        let request = PayoutRequest {
            transaction_id,
            cashout_id: cashout_id.to_string(),
            user_id: cashout.user_id,
            amount: cashout.amount,
            currency: cashout.currency.clone(),
            destination: cashout.destination.clone(),
        };
        self.submit_with_retry(&request).await
    }

    async fn submit_with_retry(
        &self,
        request: &PayoutRequest,
    ) -> Result<CashoutProcessing, StatusError> {
        let max_attempts = self.config.max_payout_retries.max(1);
        let mut attempts = 0;
        let mut last_error = None;

        while attempts < max_attempts {
            attempts += 1;
            match self.provider.submit_payout(request).await {
                Ok(receipt) => {
                    self.record_provider_reference(&request.cashout_id, &receipt.provider_reference)
                        .await;
                    let submitted = StatusUpdateRequest::new(
                        S::AwaitingResponse,
                        StatusContext::AutomatedSystem,
                    )
                    .triggered_by(self.provider.name())
                    .reason("payout submitted to provider")
                    .with_metadata("provider_reference", receipt.provider_reference.clone())
                    .with_metadata("attempts", attempts);
                    let result = self
                        .facade
                        .update_cashout_status(&request.cashout_id, submitted)
                        .await
                        .into_result()?;
                    return Ok(CashoutProcessing {
                        status: S::AwaitingResponse,
                        attempts,
                        provider_reference: Some(receipt.provider_reference),
                        provider_error: None,
                        result,
                    });
                }
                Err(e) if e.is_retryable() && attempts < max_attempts => {
                    warn!(
                        cashout_id = %request.cashout_id,
                        provider = self.provider.name(),
                        attempt = attempts,
                        error = %e,
                        "Payout attempt failed, retrying"
                    );
                    self.bump_retry_count(request.transaction_id).await;
                    tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
                    last_error = Some(e);
                }
                Err(e) => {
                    last_error = Some(e);
                    break;
                }
            }
        }

        let Some(error) = last_error else {
            return Err(StatusError::External("no payout attempt was made".to_string()));
        };
        let context = if error.is_retryable() {
            StatusContext::RetryProcessing
        } else {
            StatusContext::ErrorRecovery
        };
        warn!(
            cashout_id = %request.cashout_id,
            attempts,
            code = error.code(),
            error = %error,
            "Payout failed, refunding"
        );
        let result = self
            .facade
            .update_cashout_status(
                &request.cashout_id,
                StatusUpdateRequest::new(S::Failed, context)
                    .triggered_by(self.provider.name())
                    .reason(format!("payout failed after {} attempt(s): {}", attempts, error))
                    .with_metadata("provider_error", error.code()),
            )
            .await
            .into_result()?;
        Ok(CashoutProcessing {
            status: S::Failed,
            attempts,
            provider_reference: None,
            provider_error: Some(error),
            result,
        })
    }

    /// Settle a `processing` cashout whose destination is another user's
    /// wallet, without going through the provider.
    pub async fn internal_transfer(
        &self,
        cashout_id: &str,
        actor: &str,
    ) -> Result<CashoutProcessing, StatusError> {
        let key = EntityKey::Legacy(LegacyRef::cashout(cashout_id));
        let (pair, current) = self.load(&key).await?;
        let cashout = cashout_of(&pair, cashout_id)?;
        if current != S::Processing {
            return Err(StatusError::BusinessRule {
                rule: RULE_CASHOUT_STATE,
                message: format!("cashout {} is {}, not processing", cashout_id, current),
            });
        }
        self.settle_internal(&cashout, actor).await
    }

    async fn settle_internal(
        &self,
        cashout: &Cashout,
        actor: &str,
    ) -> Result<CashoutProcessing, StatusError> {
        let PayoutDestination::InternalUser { user_id: recipient } = cashout.destination else {
            return Err(StatusError::BusinessRule {
                rule: RULE_INTERNAL_DESTINATION,
                message: format!("cashout {} pays out externally", cashout.cashout_id),
            });
        };
        if recipient == cashout.user_id {
            return Err(StatusError::BusinessRule {
                rule: RULE_DISTINCT_PARTIES,
                message: format!("cashout {} pays the sender back", cashout.cashout_id),
            });
        }

        for (target, reason) in [
            (S::AwaitingResponse, "internal transfer booked"),
            (S::Success, "internal transfer settled"),
        ] {
            let result = self
                .facade
                .update_cashout_status(
                    &cashout.cashout_id,
                    StatusUpdateRequest::new(target, StatusContext::AutomatedSystem)
                        .triggered_by(actor)
                        .reason(reason)
                        .with_metadata("recipient_user_id", recipient),
                )
                .await
                .into_result()?;
            if target == S::Success {
                info!(
                    cashout_id = %cashout.cashout_id,
                    from_user = cashout.user_id,
                    to_user = recipient,
                    amount = %cashout.amount,
                    "Internal transfer settled"
                );
                return Ok(CashoutProcessing {
                    status: S::Success,
                    attempts: 0,
                    provider_reference: None,
                    provider_error: None,
                    result,
                });
            }
        }
        Err(StatusError::External(format!(
            "internal transfer of {} did not reach success",
            cashout.cashout_id
        )))
    }

    /// Apply a provider webhook. Redelivery of an already applied outcome is
    /// acknowledged without another update.
    pub async fn handle_payout_callback(
        &self,
        cashout_id: &str,
        callback: PayoutCallback,
    ) -> Result<CallbackOutcome, StatusError> {
        let target = if callback.success { S::Success } else { S::Failed };
        let key = EntityKey::Legacy(LegacyRef::cashout(cashout_id));
        let (_, current) = self.load(&key).await?;
        if current == target {
            info!(cashout_id, status = %current, "Duplicate payout callback ignored");
            return Ok(CallbackOutcome::AlreadyApplied(current));
        }

        let reason = match (&callback.failure_reason, callback.success) {
            (_, true) => "provider confirmed payout".to_string(),
            (Some(r), false) => format!("provider reported failure: {}", r),
            (None, false) => "provider reported failure".to_string(),
        };
        let mut request = StatusUpdateRequest::new(target, StatusContext::WebhookResponse)
            .triggered_by(self.provider.name())
            .reason(reason);
        if let Some(reference) = callback.provider_reference {
            request = request.with_metadata("provider_reference", reference);
        }
        let result = self
            .facade
            .update_cashout_status(cashout_id, request)
            .await
            .into_result()?;
        Ok(CallbackOutcome::Applied(result))
    }

    // ========================================================================
    // Escrow
    // ========================================================================

    /// Debit the buyer and open the escrow's hold. Returns the existing hold
    /// when one is already live.
    pub async fn place_escrow_hold(&self, escrow_id: &str) -> Result<WalletHold, StatusError> {
        let mut uow = self.store.begin().await?;
        match stage_hold(uow.as_mut(), escrow_id).await {
            Ok((hold, true)) => {
                uow.commit().await?;
                info!(
                    escrow_id,
                    hold_id = %hold.hold_id,
                    buyer = hold.user_id,
                    amount = %hold.amount,
                    currency = %hold.currency,
                    "Escrow hold placed"
                );
                Ok(hold)
            }
            Ok((hold, false)) => {
                rollback_quietly(uow.as_mut()).await;
                Ok(hold)
            }
            Err(e) => {
                rollback_quietly(uow.as_mut()).await;
                Err(e)
            }
        }
    }

    // ========================================================================
    // Administrative credit
    // ========================================================================

    /// Credit a wallet at most once per idempotency key
    pub async fn admin_credit(
        &self,
        credit: AdminCredit,
    ) -> Result<AdminCreditOutcome, StatusError> {
        if credit.amount <= Decimal::ZERO {
            return Err(StatusError::InvalidAmount(format!(
                "admin credit must be positive, got {}",
                credit.amount
            )));
        }
        if let Some(outcome) = self.claim_token(&credit.idempotency_key).await? {
            return Ok(outcome);
        }

        match self.apply_credit(&credit).await {
            Ok(change) => {
                info!(
                    target: AUDIT_TARGET,
                    idempotency_key = %credit.idempotency_key,
                    admin_id = %credit.admin_id,
                    user_id = credit.user_id,
                    currency = %credit.currency,
                    amount = %credit.amount,
                    before = %change.before,
                    after = %change.after,
                    reason = %credit.reason,
                    "Administrative credit"
                );
                Ok(AdminCreditOutcome::Applied(change))
            }
            Err(e) => {
                self.mark_token(&credit.idempotency_key, IdempotencyStatus::Failed, None)
                    .await;
                Err(e)
            }
        }
    }

    /// `Some` when the key was already completed; `None` once this caller owns it
    async fn claim_token(&self, key: &str) -> Result<Option<AdminCreditOutcome>, StatusError> {
        let ttl = chrono::Duration::seconds(self.config.idempotency_ttl_secs);
        let now = Utc::now();
        let in_progress = |e: StoreError| match e {
            StoreError::Duplicate(_) | StoreError::Conflict(_) => {
                StatusError::RequestInProgress(key.to_string())
            }
            other => other.into(),
        };

        let mut uow = self.store.begin().await?;
        let existing = match uow.get_idempotency_token(key).await {
            Ok(t) => t,
            Err(e) => {
                rollback_quietly(uow.as_mut()).await;
                return Err(e.into());
            }
        };
        let claimed = match existing {
            Some(token) if !token.is_expired(now) => match token.status {
                IdempotencyStatus::Completed => {
                    rollback_quietly(uow.as_mut()).await;
                    return Ok(Some(AdminCreditOutcome::AlreadyApplied {
                        resource_id: token.resource_id,
                    }));
                }
                IdempotencyStatus::Processing => {
                    rollback_quietly(uow.as_mut()).await;
                    return Err(StatusError::RequestInProgress(key.to_string()));
                }
                IdempotencyStatus::Failed => {
                    uow.update_idempotency_token(&IdempotencyToken::processing(key, ttl))
                        .await
                }
            },
            Some(_) => {
                uow.update_idempotency_token(&IdempotencyToken::processing(key, ttl))
                    .await
            }
            None => {
                uow.insert_idempotency_token(&IdempotencyToken::processing(key, ttl))
                    .await
            }
        };
        if let Err(e) = claimed {
            rollback_quietly(uow.as_mut()).await;
            return Err(in_progress(e));
        }
        uow.commit().await.map_err(in_progress)?;
        Ok(None)
    }

    async fn apply_credit(&self, credit: &AdminCredit) -> Result<BalanceChange, StatusError> {
        let mut uow = self.store.begin().await?;
        let applied = async {
            let change = uow
                .adjust_wallet(credit.user_id, &credit.currency, credit.amount)
                .await?;
            let mut token = uow
                .get_idempotency_token(&credit.idempotency_key)
                .await?
                .ok_or_else(|| StoreError::NotFound {
                    kind: "idempotency_token",
                    id: credit.idempotency_key.clone(),
                })?;
            token.status = IdempotencyStatus::Completed;
            token.resource_id = Some(format!("wallet:{}:{}", credit.user_id, credit.currency));
            uow.update_idempotency_token(&token).await?;
            uow.commit().await?;
            Ok::<_, StoreError>(change)
        }
        .await;
        match applied {
            Ok(change) => Ok(change),
            Err(e) => {
                rollback_quietly(uow.as_mut()).await;
                Err(e.into())
            }
        }
    }

    async fn mark_token(&self, key: &str, status: IdempotencyStatus, resource_id: Option<String>) {
        let outcome = async {
            let mut uow = self.store.begin().await?;
            if let Some(mut token) = uow.get_idempotency_token(key).await? {
                token.status = status;
                token.resource_id = resource_id;
                uow.update_idempotency_token(&token).await?;
            }
            uow.commit().await
        }
        .await;
        if let Err(e) = outcome {
            warn!(idempotency_key = key, error = %e, "Failed to update idempotency token");
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn load(&self, key: &EntityKey) -> Result<(EntityPair, S), StatusError> {
        let mut uow = self.store.begin().await?;
        let loaded = load_pair(uow.as_mut(), key).await;
        rollback_quietly(uow.as_mut()).await;
        let pair = loaded?;
        let status = self
            .facade
            .adapter()
            .primary_status(&pair)?
            .ok_or_else(|| StatusError::EntityNotFound {
                kind: "transaction",
                id: key.to_string(),
            })?;
        Ok((pair, status))
    }

    /// Best effort: the status path does not depend on it
    async fn record_provider_reference(&self, cashout_id: &str, reference: &str) {
        let outcome = async {
            let mut uow = self.store.begin().await?;
            if let Some(LegacyEntity::Cashout(mut cashout)) =
                uow.get_legacy(&LegacyRef::cashout(cashout_id)).await?
            {
                cashout.provider_reference = Some(reference.to_string());
                uow.update_legacy(&LegacyEntity::Cashout(cashout)).await?;
            }
            uow.commit().await
        }
        .await;
        if let Err(e) = outcome {
            warn!(cashout_id, error = %e, "Failed to store provider reference");
        }
    }

    async fn bump_retry_count(&self, transaction_id: TransactionId) {
        let outcome = async {
            let mut uow = self.store.begin().await?;
            if let Some(mut tx) = uow.get_unified(transaction_id).await? {
                tx.retry_count += 1;
                uow.update_unified(&tx).await?;
            }
            uow.commit().await
        }
        .await;
        if let Err(e) = outcome {
            warn!(transaction_id = %transaction_id, error = %e, "Failed to bump retry count");
        }
    }
}

fn build_entity(new: NewTransaction) -> Result<LegacyEntity, StatusError> {
    let now = Utc::now();
    let id = ulid::Ulid::new();
    let entity = match new {
        NewTransaction::Cashout {
            user_id,
            amount,
            currency,
            fee_amount,
            destination,
        } => {
            positive("amount", amount)?;
            if fee_amount < Decimal::ZERO {
                return Err(StatusError::InvalidAmount(format!(
                    "fee cannot be negative, got {}",
                    fee_amount
                )));
            }
            LegacyEntity::Cashout(Cashout {
                cashout_id: format!("CO-{}", id),
                user_id,
                amount,
                currency,
                fee_amount,
                destination,
                status: CashoutStatus::Pending,
                provider_reference: None,
                unified_transaction_id: None,
                version: 0,
                created_at: now,
                updated_at: now,
            })
        }
        NewTransaction::Escrow {
            buyer_id,
            seller_id,
            amount,
            currency,
        } => {
            positive("amount", amount)?;
            if buyer_id == seller_id {
                return Err(StatusError::BusinessRule {
                    rule: RULE_DISTINCT_PARTIES,
                    message: format!("user {} cannot buy from themselves", buyer_id),
                });
            }
            LegacyEntity::Escrow(Escrow {
                escrow_id: format!("ES-{}", id),
                user_id: buyer_id,
                seller_id,
                amount,
                currency,
                status: EscrowStatus::Created,
                unified_transaction_id: None,
                version: 0,
                created_at: now,
                updated_at: now,
            })
        }
        NewTransaction::Exchange {
            user_id,
            direction,
            amount,
            currency,
            output_amount,
            output_currency,
            destination_address,
        } => {
            positive("amount", amount)?;
            positive("output amount", output_amount)?;
            LegacyEntity::Exchange(ExchangeOrder {
                order_id: format!("EX-{}", id),
                user_id,
                direction,
                amount,
                currency,
                output_amount,
                output_currency,
                destination_address,
                status: ExchangeStatus::Created,
                unified_transaction_id: None,
                version: 0,
                created_at: now,
                updated_at: now,
            })
        }
    };
    Ok(entity)
}

fn positive(field: &str, value: Decimal) -> Result<(), StatusError> {
    if value <= Decimal::ZERO {
        return Err(StatusError::InvalidAmount(format!(
            "{} must be positive, got {}",
            field, value
        )));
    }
    Ok(())
}

fn cashout_of(pair: &EntityPair, cashout_id: &str) -> Result<Cashout, StatusError> {
    match &pair.legacy {
        Some(LegacyEntity::Cashout(c)) => Ok(c.clone()),
        _ => Err(StatusError::EntityNotFound {
            kind: "cashout",
            id: cashout_id.to_string(),
        }),
    }
}

/// Returns the hold and whether it was created by this call
async fn stage_hold(
    uow: &mut dyn StoreTx,
    escrow_id: &str,
) -> Result<(WalletHold, bool), StatusError> {
    let Some(LegacyEntity::Escrow(escrow)) = uow.get_legacy(&LegacyRef::escrow(escrow_id)).await?
    else {
        return Err(StatusError::EntityNotFound {
            kind: "escrow",
            id: escrow_id.to_string(),
        });
    };
    if let Some(existing) = uow.active_hold(escrow_id).await? {
        return Ok((existing, false));
    }
    uow.adjust_wallet(escrow.user_id, &escrow.currency, -escrow.amount)
        .await?;
    let hold = WalletHold::new(&escrow);
    uow.insert_hold(&hold).await?;
    Ok((hold, true))
}
