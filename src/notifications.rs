//! Status-change notifications
//!
//! Template selection is a closed enum matched exhaustively, so adding a
//! template without a renderer does not compile. Delivery goes through a
//! [`NotificationSink`].

use async_trait::async_trait;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;

use crate::error::StatusError;
use crate::facade::{PostUpdateHook, StatusChangeEvent};
use crate::models::UserId;
use crate::status::{UnifiedTransactionStatus as S, UnifiedTransactionType as T};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationTemplate {
    CashoutProcessing,
    CashoutCompleted,
    CashoutFailed,
    EscrowPaymentReceived,
    EscrowFunded,
    EscrowReleased,
    EscrowDisputed,
    ExchangeCompleted,
    ExchangeFailed,
    TransactionCancelled,
    TransactionExpired,
}

impl NotificationTemplate {
    pub fn id(&self) -> &'static str {
        match self {
            NotificationTemplate::CashoutProcessing => "cashout_processing",
            NotificationTemplate::CashoutCompleted => "cashout_completed",
            NotificationTemplate::CashoutFailed => "cashout_failed",
            NotificationTemplate::EscrowPaymentReceived => "escrow_payment_received",
            NotificationTemplate::EscrowFunded => "escrow_funded",
            NotificationTemplate::EscrowReleased => "escrow_released",
            NotificationTemplate::EscrowDisputed => "escrow_disputed",
            NotificationTemplate::ExchangeCompleted => "exchange_completed",
            NotificationTemplate::ExchangeFailed => "exchange_failed",
            NotificationTemplate::TransactionCancelled => "transaction_cancelled",
            NotificationTemplate::TransactionExpired => "transaction_expired",
        }
    }

    /// Template for a status change, if the user should hear about it
    pub fn for_event(event: &StatusChangeEvent) -> Option<Self> {
        let template = match (event.transaction_type, event.new_status) {
            (_, S::Cancelled) => NotificationTemplate::TransactionCancelled,
            (_, S::Expired) => NotificationTemplate::TransactionExpired,
            (T::WalletCashout, S::Processing) => NotificationTemplate::CashoutProcessing,
            (T::WalletCashout, S::Success) => NotificationTemplate::CashoutCompleted,
            (T::WalletCashout, S::Failed) => NotificationTemplate::CashoutFailed,
            (T::Escrow, S::PaymentConfirmed) => NotificationTemplate::EscrowPaymentReceived,
            (T::Escrow, S::FundsHeld) => NotificationTemplate::EscrowFunded,
            (T::Escrow, S::Success) => NotificationTemplate::EscrowReleased,
            (T::Escrow, S::Disputed) => NotificationTemplate::EscrowDisputed,
            (T::ExchangeBuyCrypto | T::ExchangeSellCrypto, S::Success) => {
                NotificationTemplate::ExchangeCompleted
            }
            (T::ExchangeBuyCrypto | T::ExchangeSellCrypto, S::Failed) => {
                NotificationTemplate::ExchangeFailed
            }
            _ => return None,
        };
        Some(template)
    }

    pub fn render(&self, event: &StatusChangeEvent) -> Notification {
        let reference = event
            .transaction_id
            .map(|id| id.to_string())
            .or_else(|| event.legacy_ref.as_ref().map(|r| r.id.clone()))
            .unwrap_or_default();
        let (subject, body) = match self {
            NotificationTemplate::CashoutProcessing => (
                "Cashout in progress",
                format!("Your cashout {} is being processed.", reference),
            ),
            NotificationTemplate::CashoutCompleted => (
                "Cashout completed",
                format!("Your cashout {} has been paid out.", reference),
            ),
            NotificationTemplate::CashoutFailed => (
                "Cashout failed",
                format!(
                    "Your cashout {} could not be completed and the funds were returned.",
                    reference
                ),
            ),
            NotificationTemplate::EscrowPaymentReceived => (
                "Escrow payment received",
                format!("Payment for escrow {} has been confirmed.", reference),
            ),
            NotificationTemplate::EscrowFunded => (
                "Escrow funded",
                format!("Funds for escrow {} are now held.", reference),
            ),
            NotificationTemplate::EscrowReleased => (
                "Escrow released",
                format!("Escrow {} has been released to the seller.", reference),
            ),
            NotificationTemplate::EscrowDisputed => (
                "Escrow disputed",
                format!("Escrow {} is under dispute. An administrator will review it.", reference),
            ),
            NotificationTemplate::ExchangeCompleted => (
                "Exchange completed",
                format!("Your exchange {} has completed.", reference),
            ),
            NotificationTemplate::ExchangeFailed => (
                "Exchange failed",
                format!("Your exchange {} has failed.", reference),
            ),
            NotificationTemplate::TransactionCancelled => (
                "Transaction cancelled",
                format!("Transaction {} was cancelled.", reference),
            ),
            NotificationTemplate::TransactionExpired => (
                "Transaction expired",
                format!("Transaction {} has expired.", reference),
            ),
        };
        Notification {
            template: *self,
            user_id: event.user_id,
            subject: subject.to_string(),
            body,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub template: NotificationTemplate,
    pub user_id: UserId,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, notification: Notification) -> Result<(), StatusError>;
}

/// Writes notifications to the log only
#[derive(Debug, Default)]
pub struct LoggingSink;

#[async_trait]
impl NotificationSink for LoggingSink {
    async fn deliver(&self, notification: Notification) -> Result<(), StatusError> {
        info!(
            template = notification.template.id(),
            user_id = notification.user_id,
            subject = %notification.subject,
            "Notification"
        );
        Ok(())
    }
}

/// Collects notifications in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    delivered: Mutex<Vec<Notification>>,
}

impl MemorySink {
    pub fn delivered(&self) -> Vec<Notification> {
        self.delivered
            .lock()
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    /// Poll until at least `count` notifications arrived or `timeout` passed
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<Notification> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let delivered = self.delivered();
            if delivered.len() >= count || tokio::time::Instant::now() >= deadline {
                return delivered;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl NotificationSink for MemorySink {
    async fn deliver(&self, notification: Notification) -> Result<(), StatusError> {
        self.delivered
            .lock()
            .map_err(|_| StatusError::External("notification buffer poisoned".to_string()))?
            .push(notification);
        Ok(())
    }
}

/// Post-update hook that notifies the transaction owner
pub struct NotificationHook {
    sink: Arc<dyn NotificationSink>,
}

impl NotificationHook {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl PostUpdateHook for NotificationHook {
    fn name(&self) -> &'static str {
        "notification"
    }

    async fn on_status_changed(&self, event: &StatusChangeEvent) -> Result<(), StatusError> {
        let Some(template) = NotificationTemplate::for_event(event) else {
            return Ok(());
        };
        self.sink.deliver(template.render(event)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OperationId, TransactionId};
    use crate::status::StatusContext;
    use chrono::Utc;

    fn event(tx_type: T, from: S, to: S) -> StatusChangeEvent {
        StatusChangeEvent {
            operation_id: OperationId::new(),
            transaction_id: Some(TransactionId::new()),
            legacy_ref: None,
            transaction_type: tx_type,
            user_id: 5,
            old_status: from,
            new_status: to,
            legacy_status: None,
            context: StatusContext::WebhookResponse,
            reason: String::new(),
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn test_template_selection() {
        assert_eq!(
            NotificationTemplate::for_event(&event(
                T::WalletCashout,
                S::AwaitingResponse,
                S::Success
            )),
            Some(NotificationTemplate::CashoutCompleted)
        );
        assert_eq!(
            NotificationTemplate::for_event(&event(T::Escrow, S::FundsHeld, S::Cancelled)),
            Some(NotificationTemplate::TransactionCancelled)
        );
        // Internal hops are silent
        assert_eq!(
            NotificationTemplate::for_event(&event(T::Escrow, S::FundsHeld, S::ReleasePending)),
            None
        );
    }

    #[tokio::test]
    async fn test_hook_delivers_rendered_notification() {
        let sink = Arc::new(MemorySink::default());
        let hook = NotificationHook::new(sink.clone());
        let e = event(T::ExchangeSellCrypto, S::Processing, S::Failed);

        hook.on_status_changed(&e).await.unwrap();
        let delivered = sink.delivered();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].template, NotificationTemplate::ExchangeFailed);
        assert_eq!(delivered[0].user_id, 5);
        assert!(delivered[0].body.contains(&e.transaction_id.unwrap().to_string()));
    }
}
