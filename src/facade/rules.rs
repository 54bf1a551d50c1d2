//! Business-rule pre-checks
//!
//! Domain rules run before generic transition validation and before any
//! write. A hard rule aborts the update. A soft rule adds a warning.

use tracing::warn;

use super::{OtpEnforcement, StatusUpdateConfig};
use crate::dual_write::EntityPair;
use crate::error::StatusError;
use crate::models::LegacyEntity;
use crate::otp::OtpService;
use crate::status::{StatusContext, UnifiedTransactionStatus as S, UnifiedTransactionType as T};
use crate::store::StoreTx;

pub const RULE_ESCROW_ACTIVE_HOLD: &str = "escrow_requires_active_hold";
pub const RULE_EXCHANGE_DESTINATION: &str = "buy_order_requires_destination_address";
pub const RULE_POSITIVE_AMOUNT: &str = "amount_must_be_positive";

/// What the rules are evaluated against
pub struct RuleInput<'a> {
    pub pair: &'a EntityPair,
    pub tx_type: T,
    pub current: S,
    pub target: S,
    pub context: StatusContext,
}

/// Run every applicable rule; returns soft warnings
pub async fn check(
    input: &RuleInput<'_>,
    uow: &mut dyn StoreTx,
    otp: &dyn OtpService,
    config: &StatusUpdateConfig,
) -> Result<Vec<String>, StatusError> {
    let mut warnings = Vec::new();

    // Cancellation and failure must always be reachable, whatever the amount
    if !input.target.is_terminal() {
        check_amount(input)?;
    }

    match input.tx_type {
        T::WalletCashout => {
            if let Some(w) = check_cashout_otp(input, otp, config).await? {
                warnings.push(w);
            }
        }
        T::Escrow => check_escrow_hold(input, uow).await?,
        T::ExchangeBuyCrypto => check_buy_destination(input)?,
        T::ExchangeSellCrypto => {}
    }
    Ok(warnings)
}

fn check_amount(input: &RuleInput<'_>) -> Result<(), StatusError> {
    let amount = match (&input.pair.unified, &input.pair.legacy) {
        (Some(tx), _) => tx.amount,
        (None, Some(entity)) => entity.amount(),
        (None, None) => return Ok(()),
    };
    if amount <= rust_decimal::Decimal::ZERO {
        return Err(StatusError::BusinessRule {
            rule: RULE_POSITIVE_AMOUNT,
            message: format!("amount {} cannot move to {}", amount, input.target),
        });
    }
    Ok(())
}

/// Cashouts over the threshold entering `processing` outside a webhook
/// should carry a recorded OTP verification.
async fn check_cashout_otp(
    input: &RuleInput<'_>,
    otp: &dyn OtpService,
    config: &StatusUpdateConfig,
) -> Result<Option<String>, StatusError> {
    if input.target != S::Processing
        || input.current != S::Pending
        || input.context == StatusContext::WebhookResponse
        || !otp.requires_otp(input.tx_type)
    {
        return Ok(None);
    }
    let amount = match (&input.pair.unified, &input.pair.legacy) {
        (Some(tx), _) => tx.amount,
        (None, Some(entity)) => entity.amount(),
        (None, None) => return Ok(None),
    };
    if amount < config.otp_threshold {
        return Ok(None);
    }

    let verified = match &input.pair.unified {
        Some(tx) => otp.is_verified(tx.transaction_id).await,
        None => false,
    };
    if verified {
        return Ok(None);
    }

    let subject = input
        .pair
        .unified
        .as_ref()
        .map(|tx| tx.transaction_id.to_string())
        .or_else(|| input.pair.legacy_ref().map(|r| r.to_string()))
        .unwrap_or_default();
    match config.otp_enforcement {
        OtpEnforcement::Enforce => Err(StatusError::OtpRequired(subject)),
        OtpEnforcement::Warn => {
            warn!(
                subject = %subject,
                amount = %amount,
                "Cashout entering processing without OTP verification"
            );
            Ok(Some(format!(
                "cashout {} of {} entered processing without OTP verification",
                subject, amount
            )))
        }
    }
}

async fn check_escrow_hold(
    input: &RuleInput<'_>,
    uow: &mut dyn StoreTx,
) -> Result<(), StatusError> {
    if !matches!(input.target, S::FundsHeld | S::ReleasePending) {
        return Ok(());
    }
    let Some(legacy_ref) = input.pair.legacy_ref() else {
        return Err(StatusError::BusinessRule {
            rule: RULE_ESCROW_ACTIVE_HOLD,
            message: "escrow has no legacy record to hold funds against".to_string(),
        });
    };
    if uow.active_hold(&legacy_ref.id).await?.is_none() {
        return Err(StatusError::BusinessRule {
            rule: RULE_ESCROW_ACTIVE_HOLD,
            message: format!("escrow {} has no active wallet hold", legacy_ref.id),
        });
    }
    Ok(())
}

fn check_buy_destination(input: &RuleInput<'_>) -> Result<(), StatusError> {
    if input.target != S::Processing {
        return Ok(());
    }
    let has_address = match &input.pair.legacy {
        Some(LegacyEntity::Exchange(order)) => order
            .destination_address
            .as_deref()
            .is_some_and(|a| !a.trim().is_empty()),
        _ => input
            .pair
            .unified
            .as_ref()
            .and_then(|tx| tx.metadata.get("destination_address"))
            .and_then(|v| v.as_str())
            .is_some_and(|a| !a.trim().is_empty()),
    };
    if !has_address {
        return Err(StatusError::BusinessRule {
            rule: RULE_EXCHANGE_DESTINATION,
            message: "buy order has no destination address".to_string(),
        });
    }
    Ok(())
}
