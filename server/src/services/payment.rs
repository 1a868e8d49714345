//! Hosted checkout for paid registrations and the confirmation that
//! finalizes them.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::registration::{Finalizer, RegistrationChange, RegistrationFeed};
use crate::gateway::{to_minor_units, CheckoutRequest, SharedGateway};
use crate::models::{Credential, PaymentRecord, PaymentStatus, Pricing};
use crate::store::SharedStore;
use crate::utils::error::AppError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutHandle {
    pub checkout_url: String,
    pub external_session_id: String,
}

/// What the post-checkout page shows the payer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStatusView {
    pub session_id: String,
    pub event_id: Uuid,
    pub status: PaymentStatus,
    pub amount: Decimal,
    pub currency: String,
    pub registration_confirmed: bool,
}

pub struct PaymentService {
    store: SharedStore,
    gateway: SharedGateway,
    finalizer: Finalizer,
    feed: RegistrationFeed,
    public_base_url: String,
}

impl PaymentService {
    pub fn new(
        store: SharedStore,
        gateway: SharedGateway,
        finalizer: Finalizer,
        feed: RegistrationFeed,
        public_base_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            gateway,
            finalizer,
            feed,
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Opens a checkout session and records it as a pending payment. The
    /// amount is copied from the event now, so later price edits never
    /// reach an in-flight session.
    pub async fn create_session(
        &self,
        event_id: Uuid,
        registration_id: Uuid,
        user_id: Uuid,
        email: &str,
    ) -> Result<CheckoutHandle, AppError> {
        let event = self
            .store
            .get_event(event_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Event not found".to_string()))?;

        let (amount, currency) = match &event.pricing {
            Pricing::Paid { amount, currency } if *amount > Decimal::ZERO => {
                (*amount, currency.clone())
            }
            _ => return Err(AppError::NotPayable),
        };
        let amount_minor = to_minor_units(amount, &currency).ok_or(AppError::NotPayable)?;

        let request = CheckoutRequest {
            amount_minor,
            currency: currency.clone(),
            product_name: format!("Event Registration: {}", event.title),
            description: format!("Registration for {}", event.title),
            customer_email: email.to_string(),
            success_url: format!(
                "{}/payment-success?session_id={{CHECKOUT_SESSION_ID}}",
                self.public_base_url
            ),
            cancel_url: format!("{}/?cancelled=true", self.public_base_url),
            event_id,
            registration_id,
            user_id,
        };

        let session = self
            .gateway
            .create_checkout(&request)
            .await
            .map_err(|e| AppError::GatewayError(e.to_string()))?;

        let now = Utc::now();
        let record = PaymentRecord {
            id: Uuid::new_v4(),
            event_id,
            registration_id,
            user_id,
            external_session_id: session.id.clone(),
            amount,
            currency,
            status: PaymentStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_payment(&record).await?;

        Ok(CheckoutHandle {
            checkout_url: session.url,
            external_session_id: session.id,
        })
    }

    /// Handles a verified checkout completion. Re-delivery of the same
    /// session is a no-op that returns the already issued credential.
    pub async fn confirm_payment(&self, session_id: &str) -> Result<Credential, AppError> {
        let payment = self
            .store
            .find_payment_by_session(session_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Payment session not found".to_string()))?;

        let status = if payment.status == PaymentStatus::Pending
            && self
                .store
                .transition_payment(session_id, PaymentStatus::Pending, PaymentStatus::Confirmed)
                .await?
        {
            info!(session_id, registration_id = %payment.registration_id, "Payment confirmed");
            PaymentStatus::Confirmed
        } else {
            // Lost a race or already handled; act on what is stored now.
            self.store
                .find_payment_by_session(session_id)
                .await?
                .map(|p| p.status)
                .unwrap_or(PaymentStatus::Failed)
        };

        if status == PaymentStatus::Failed {
            warn!(
                session_id,
                registration_id = %payment.registration_id,
                amount = %payment.amount,
                currency = %payment.currency,
                "Payment completed after the session expired, refund required"
            );
            return Err(AppError::ValidationError(
                "This checkout session has expired".to_string(),
            ));
        }

        let registration = self
            .store
            .get_registration(payment.registration_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Registration not found".to_string()))?;

        match self.finalizer.finalize(&registration).await {
            Err(AppError::EventFull) => {
                self.store
                    .transition_payment(session_id, PaymentStatus::Confirmed, PaymentStatus::Failed)
                    .await?;
                if self.store.delete_pending_registration(registration.id).await? {
                    self.feed.publish(RegistrationChange::Cancelled {
                        event_id: registration.event_id,
                        user_id: registration.user_id,
                        registration_id: registration.id,
                    });
                }
                warn!(
                    session_id,
                    registration_id = %registration.id,
                    amount = %payment.amount,
                    currency = %payment.currency,
                    "Event filled before payment confirmed, refund required"
                );
                Err(AppError::EventFull)
            }
            other => other,
        }
    }

    /// Marks a pending payment failed and removes its still-pending
    /// registration. Returns false when there was nothing pending.
    pub async fn fail_payment(&self, session_id: &str) -> Result<bool, AppError> {
        let Some(payment) = self.store.find_payment_by_session(session_id).await? else {
            debug!(session_id, "Unknown payment session");
            return Ok(false);
        };

        if !self
            .store
            .transition_payment(session_id, PaymentStatus::Pending, PaymentStatus::Failed)
            .await?
        {
            return Ok(false);
        }

        if self
            .store
            .delete_pending_registration(payment.registration_id)
            .await?
        {
            self.feed.publish(RegistrationChange::Cancelled {
                event_id: payment.event_id,
                user_id: payment.user_id,
                registration_id: payment.registration_id,
            });
        }
        info!(session_id, registration_id = %payment.registration_id, "Payment marked failed");

        Ok(true)
    }

    /// Fails every payment still pending after `ttl`. One bad record does
    /// not stop the sweep.
    pub async fn sweep_expired(&self, now: DateTime<Utc>, ttl: Duration) -> Result<usize, AppError> {
        let stale = self.store.list_pending_payments_before(now - ttl).await?;
        let mut expired = 0;

        for payment in stale {
            match self.fail_payment(&payment.external_session_id).await {
                Ok(true) => expired += 1,
                Ok(false) => {}
                Err(e) => warn!(
                    session_id = %payment.external_session_id,
                    error = %e,
                    "Failed to expire pending payment"
                ),
            }
        }

        if expired > 0 {
            info!(expired, "Expired pending payments");
        }
        Ok(expired)
    }

    /// Status of the caller's own checkout session. Sessions belonging to
    /// someone else look absent.
    pub async fn status_for(
        &self,
        session_id: &str,
        user_id: Uuid,
    ) -> Result<PaymentStatusView, AppError> {
        let payment = self
            .store
            .find_payment_by_session(session_id)
            .await?
            .filter(|p| p.user_id == user_id)
            .ok_or_else(|| AppError::NotFound("Payment session not found".to_string()))?;

        let registration_confirmed = self
            .store
            .get_registration(payment.registration_id)
            .await?
            .map(|r| r.is_confirmed())
            .unwrap_or(false);

        Ok(PaymentStatusView {
            session_id: payment.external_session_id,
            event_id: payment.event_id,
            status: payment.status,
            amount: payment.amount,
            currency: payment.currency,
            registration_confirmed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::registration::RegistrationResult;
    use crate::store::Store;
    use crate::testing::Fixture;

    async fn pending(fx: &Fixture, event_id: Uuid, username: &str) -> (Uuid, String) {
        let user = fx.user(username).await;
        match fx
            .registrations
            .register(event_id, user.id, "payer@example.org")
            .await
            .unwrap()
        {
            RegistrationResult::PendingPayment {
                registration_id,
                external_session_id,
                ..
            } => (registration_id, external_session_id),
            other => panic!("expected pending payment, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_confirm_twice_finalizes_once() {
        let fx = Fixture::new().await;
        let event = fx.paid_event(Decimal::new(2500, 2), "USD", None).await;
        let (registration_id, session_id) = pending(&fx, event.id, "ada").await;

        let first = fx.payments.confirm_payment(&session_id).await.unwrap();
        let second = fx.payments.confirm_payment(&session_id).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(fx.event(event.id).await.attendee_count, 1);
        assert_eq!(fx.store.credential_count().await, 1);
        let registration = fx.store.get_registration(registration_id).await.unwrap().unwrap();
        assert!(registration.is_confirmed());
        let payment = fx.store.find_payment_by_session(&session_id).await.unwrap().unwrap();
        assert_eq!(payment.status, PaymentStatus::Confirmed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_redelivery_finalizes_once() {
        let fx = Fixture::new().await;
        let event = fx.paid_event(Decimal::new(2500, 2), "USD", None).await;
        let (_, session_id) = pending(&fx, event.id, "ada").await;

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let payments = fx.payments.clone();
                let session_id = session_id.clone();
                tokio::spawn(async move { payments.confirm_payment(&session_id).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(fx.event(event.id).await.attendee_count, 1);
        assert_eq!(fx.store.credential_count().await, 1);
    }

    #[tokio::test]
    async fn test_price_change_does_not_touch_open_session() {
        let fx = Fixture::new().await;
        let event = fx.paid_event(Decimal::new(2500, 2), "USD", None).await;
        let (_, session_id) = pending(&fx, event.id, "ada").await;

        fx.store
            .set_pricing(
                event.id,
                Pricing::Paid {
                    amount: Decimal::new(9900, 2),
                    currency: "USD".to_string(),
                },
            )
            .await;

        let payment = fx.store.find_payment_by_session(&session_id).await.unwrap().unwrap();
        assert_eq!(payment.amount, Decimal::new(2500, 2));
    }

    #[tokio::test]
    async fn test_event_full_at_confirmation_fails_payment() {
        let fx = Fixture::new().await;
        let event = fx.paid_event(Decimal::new(2500, 2), "USD", Some(1)).await;
        let (_, first_session) = pending(&fx, event.id, "ada").await;
        let (second_registration, second_session) = pending(&fx, event.id, "grace").await;

        fx.payments.confirm_payment(&first_session).await.unwrap();
        let late = fx.payments.confirm_payment(&second_session).await;

        assert!(matches!(late, Err(AppError::EventFull)));
        assert_eq!(fx.event(event.id).await.attendee_count, 1);
        assert!(fx.store.get_registration(second_registration).await.unwrap().is_none());
        let payment = fx.store.find_payment_by_session(&second_session).await.unwrap().unwrap();
        assert_eq!(payment.status, PaymentStatus::Failed);
    }

    #[tokio::test]
    async fn test_expired_session_cannot_be_confirmed() {
        let fx = Fixture::new().await;
        let event = fx.paid_event(Decimal::new(2500, 2), "USD", None).await;
        let (registration_id, session_id) = pending(&fx, event.id, "ada").await;

        assert!(fx.payments.fail_payment(&session_id).await.unwrap());
        assert!(!fx.payments.fail_payment(&session_id).await.unwrap());
        assert!(fx.store.get_registration(registration_id).await.unwrap().is_none());

        let late = fx.payments.confirm_payment(&session_id).await;
        assert!(matches!(late, Err(AppError::ValidationError(_))));
        assert_eq!(fx.event(event.id).await.attendee_count, 0);
    }

    #[tokio::test]
    async fn test_sweep_expires_only_stale_sessions() {
        let fx = Fixture::new().await;
        let event = fx.paid_event(Decimal::new(2500, 2), "USD", None).await;
        let (stale_registration, stale_session) = pending(&fx, event.id, "ada").await;
        let (fresh_registration, fresh_session) = pending(&fx, event.id, "grace").await;
        fx.store
            .backdate_payment(&stale_session, Utc::now() - Duration::hours(2))
            .await;

        let expired = fx
            .payments
            .sweep_expired(Utc::now(), Duration::minutes(60))
            .await
            .unwrap();

        assert_eq!(expired, 1);
        assert!(fx.store.get_registration(stale_registration).await.unwrap().is_none());
        assert!(fx.store.get_registration(fresh_registration).await.unwrap().is_some());
        let fresh = fx.store.find_payment_by_session(&fresh_session).await.unwrap().unwrap();
        assert_eq!(fresh.status, PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn test_free_event_is_not_payable() {
        let fx = Fixture::new().await;
        let user = fx.user("ada").await;
        let event = fx.free_event(None).await;

        let result = fx
            .payments
            .create_session(event.id, Uuid::new_v4(), user.id, "ada@example.org")
            .await;

        assert!(matches!(result, Err(AppError::NotPayable)));
        assert!(fx.gateway.requests().is_empty());
    }

    #[tokio::test]
    async fn test_status_is_scoped_to_payer() {
        let fx = Fixture::new().await;
        let event = fx.paid_event(Decimal::new(2500, 2), "USD", None).await;
        let (registration_id, session_id) = pending(&fx, event.id, "ada").await;
        let payer = fx.store.get_registration(registration_id).await.unwrap().unwrap().user_id;
        let stranger = fx.user("eve").await;

        let view = fx.payments.status_for(&session_id, payer).await.unwrap();
        assert_eq!(view.status, PaymentStatus::Pending);
        assert!(!view.registration_confirmed);

        let hidden = fx.payments.status_for(&session_id, stranger.id).await;
        assert!(matches!(hidden, Err(AppError::NotFound(_))));
    }
}
