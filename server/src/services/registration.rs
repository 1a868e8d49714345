//! Registration lifecycle: intent, checks, optional payment hand-off, and
//! the finalize step shared by the free path and payment confirmation.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::credential;
use super::payment::PaymentService;
use crate::models::{Credential, Event, Registration};
use crate::store::{Finalization, SharedStore, StoreError};
use crate::utils::error::AppError;

const FEED_CAPACITY: usize = 256;

/// A change to some (event, user) registration, delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RegistrationChange {
    PendingPayment {
        event_id: Uuid,
        user_id: Uuid,
        registration_id: Uuid,
    },
    Confirmed {
        event_id: Uuid,
        user_id: Uuid,
        registration_id: Uuid,
    },
    Cancelled {
        event_id: Uuid,
        user_id: Uuid,
        registration_id: Uuid,
    },
    EventDeleted {
        event_id: Uuid,
    },
}

/// Observer channel for registration changes. Lagging subscribers lose the
/// oldest changes and should re-read state.
#[derive(Clone)]
pub struct RegistrationFeed {
    sender: broadcast::Sender<RegistrationChange>,
}

impl RegistrationFeed {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(FEED_CAPACITY);
        Self { sender }
    }

    pub fn publish(&self, change: RegistrationChange) {
        // No subscribers is the normal case for a headless server.
        if self.sender.send(change).is_err() {
            debug!("Registration change published with no subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistrationChange> {
        self.sender.subscribe()
    }
}

impl Default for RegistrationFeed {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs the finalize-registration transaction and reports its outcome.
#[derive(Clone)]
pub struct Finalizer {
    store: SharedStore,
    feed: RegistrationFeed,
}

impl Finalizer {
    pub fn new(store: SharedStore, feed: RegistrationFeed) -> Self {
        Self { store, feed }
    }

    /// Idempotent: a second call for the same registration returns the
    /// credential issued by the first and changes nothing.
    pub async fn finalize(&self, registration: &Registration) -> Result<Credential, AppError> {
        let candidate = credential::issue(registration.id, Utc::now());

        match self
            .store
            .finalize_registration(registration.id, &candidate)
            .await?
        {
            Finalization::Finalized(credential) => {
                info!(
                    registration_id = %registration.id,
                    event_id = %registration.event_id,
                    "Registration finalized"
                );
                self.feed.publish(RegistrationChange::Confirmed {
                    event_id: registration.event_id,
                    user_id: registration.user_id,
                    registration_id: registration.id,
                });
                Ok(credential)
            }
            Finalization::AlreadyFinalized(credential) => {
                debug!(registration_id = %registration.id, "Registration already finalized");
                Ok(credential)
            }
            Finalization::CapacityReached => Err(AppError::EventFull),
            Finalization::Missing => Err(AppError::NotFound("Registration not found".to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RegistrationResult {
    Confirmed {
        registration_id: Uuid,
        credential_id: Uuid,
    },
    PendingPayment {
        registration_id: Uuid,
        checkout_url: String,
        external_session_id: String,
    },
}

pub struct RegistrationService {
    store: SharedStore,
    payments: Arc<PaymentService>,
    finalizer: Finalizer,
    feed: RegistrationFeed,
}

impl RegistrationService {
    pub fn new(
        store: SharedStore,
        payments: Arc<PaymentService>,
        finalizer: Finalizer,
        feed: RegistrationFeed,
    ) -> Self {
        Self {
            store,
            payments,
            finalizer,
            feed,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistrationChange> {
        self.feed.subscribe()
    }

    /// Registers `user_id` for `event_id`. `email` comes from the identity
    /// provider and is only used to prefill checkout.
    pub async fn register(
        &self,
        event_id: Uuid,
        user_id: Uuid,
        email: &str,
    ) -> Result<RegistrationResult, AppError> {
        if self.store.get_profile(user_id).await?.is_none() {
            return Err(AppError::NotFound("User profile not found".to_string()));
        }
        if self.store.find_block(user_id).await?.is_some() {
            return Err(AppError::NotAuthorized(
                "Your account has been blocked from registering for events".to_string(),
            ));
        }

        if self
            .store
            .find_registration(event_id, user_id)
            .await?
            .is_some()
        {
            return Err(AppError::DuplicateRegistration);
        }

        let event = self
            .store
            .get_event(event_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Event not found".to_string()))?;

        let now = Utc::now();
        if !event.accepts_registrations(now) {
            return Err(AppError::RegistrationClosed);
        }
        if !event.has_room() {
            return Err(AppError::EventFull);
        }

        let registration = Registration::pending(event_id, user_id, now);
        self.store
            .insert_registration(&registration)
            .await
            .map_err(|e| match e {
                StoreError::UniqueViolation(_) => AppError::DuplicateRegistration,
                other => AppError::Store(other),
            })?;

        if event.pricing.is_free() {
            self.register_free(&registration).await
        } else {
            self.register_paid(&event, &registration, email).await
        }
    }

    async fn register_free(
        &self,
        registration: &Registration,
    ) -> Result<RegistrationResult, AppError> {
        match self.finalizer.finalize(registration).await {
            Ok(credential) => Ok(RegistrationResult::Confirmed {
                registration_id: registration.id,
                credential_id: credential.id,
            }),
            Err(err) => {
                self.compensate(registration).await;
                Err(err)
            }
        }
    }

    async fn register_paid(
        &self,
        event: &Event,
        registration: &Registration,
        email: &str,
    ) -> Result<RegistrationResult, AppError> {
        let handle = match self
            .payments
            .create_session(event.id, registration.id, registration.user_id, email)
            .await
        {
            Ok(handle) => handle,
            Err(err) => {
                self.compensate(registration).await;
                return Err(match err {
                    AppError::GatewayError(msg) | AppError::PaymentSetupFailed(msg) => {
                        AppError::PaymentSetupFailed(msg)
                    }
                    AppError::NotPayable => {
                        AppError::PaymentSetupFailed(format!("event {} is not payable", event.id))
                    }
                    other => other,
                });
            }
        };

        info!(
            registration_id = %registration.id,
            event_id = %event.id,
            session_id = %handle.external_session_id,
            "Registration awaiting payment"
        );
        self.feed.publish(RegistrationChange::PendingPayment {
            event_id: event.id,
            user_id: registration.user_id,
            registration_id: registration.id,
        });

        Ok(RegistrationResult::PendingPayment {
            registration_id: registration.id,
            checkout_url: handle.checkout_url,
            external_session_id: handle.external_session_id,
        })
    }

    /// Removes a registration whose follow-up step failed.
    async fn compensate(&self, registration: &Registration) {
        match self.store.delete_pending_registration(registration.id).await {
            Ok(true) => {
                warn!(registration_id = %registration.id, "Pending registration rolled back");
            }
            Ok(false) => {
                debug!(registration_id = %registration.id, "Nothing to roll back");
            }
            Err(e) => {
                error!(
                    registration_id = %registration.id,
                    error = %e,
                    "Failed to roll back pending registration"
                );
            }
        }
    }

    /// The caller's own scan credential as a PNG.
    pub async fn credential_png(&self, event_id: Uuid, user_id: Uuid) -> Result<Vec<u8>, AppError> {
        let registration = self
            .store
            .find_registration(event_id, user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("You are not registered for this event".to_string()))?;

        if !registration.is_confirmed() {
            return Err(AppError::ValidationError(
                "Your registration is awaiting payment".to_string(),
            ));
        }

        let credential = self
            .store
            .credential_for_registration(registration.id)
            .await?
            .ok_or_else(|| AppError::NotFound("No credential issued for this registration".to_string()))?;

        Ok(credential::render(&credential.payload)?)
    }
}
