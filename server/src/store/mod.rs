//! Persistence seam for the registration lifecycle.
//!
//! The store is the only synchronisation point shared by independent client
//! sessions, so every check that guards an invariant (capacity, one
//! registration per user, one credential per registration, one attendance
//! record per registration, one block per user) lives inside a single store
//! call rather than in service code.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    AdminAction, AttendanceRecord, BlockRecord, Credential, Event, PaymentRecord, PaymentStatus,
    Profile, Registration, Role,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("database error")]
    Database(#[source] sqlx::Error),

    #[error("stored row could not be decoded: {0}")]
    Decode(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                let constraint = db_err.constraint().unwrap_or("unknown").to_string();
                return StoreError::UniqueViolation(constraint);
            }
        }
        StoreError::Database(err)
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

pub type SharedStore = Arc<dyn Store>;

/// Result of the finalize-registration transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finalization {
    /// Counter incremented, registration confirmed, credential stored.
    Finalized(Credential),
    /// An earlier call already finalized this registration; nothing changed.
    AlreadyFinalized(Credential),
    /// The conditional increment found the event full; nothing changed.
    CapacityReached,
    /// Registration or event no longer exists.
    Missing,
}

/// Row counts removed by a cascading event delete.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CascadeReport {
    pub credentials: u64,
    pub attendance_records: u64,
    pub payments: u64,
    pub registrations: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformStats {
    pub total_events: i64,
    pub total_users: i64,
    pub total_registrations: i64,
    pub blocked_users: i64,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_profile(&self, profile: &Profile) -> StoreResult<()>;
    async fn get_profile(&self, id: Uuid) -> StoreResult<Option<Profile>>;
    /// Inserts `profile` unless a row with its id exists, and returns the
    /// stored row. An existing role is never changed.
    async fn ensure_profile(&self, profile: &Profile) -> StoreResult<Profile>;
    async fn set_role(&self, id: Uuid, role: Role) -> StoreResult<bool>;

    async fn insert_event(&self, event: &Event) -> StoreResult<()>;
    async fn get_event(&self, id: Uuid) -> StoreResult<Option<Event>>;
    /// All events, newest first.
    async fn list_events(&self) -> StoreResult<Vec<Event>>;

    /// Fails with `UniqueViolation` when the (event, user) pair already exists.
    async fn insert_registration(&self, registration: &Registration) -> StoreResult<()>;
    async fn get_registration(&self, id: Uuid) -> StoreResult<Option<Registration>>;
    async fn find_registration(
        &self,
        event_id: Uuid,
        user_id: Uuid,
    ) -> StoreResult<Option<Registration>>;
    async fn list_registrations(&self, event_id: Uuid) -> StoreResult<Vec<Registration>>;
    /// Deletes the registration only while it is still pending payment.
    /// Payment records for it are kept.
    async fn delete_pending_registration(&self, id: Uuid) -> StoreResult<bool>;

    /// Atomically: increment the event's attendee counter iff it is below
    /// capacity, flip the registration to confirmed, and store `candidate`
    /// as its credential. Idempotent per registration.
    async fn finalize_registration(
        &self,
        registration_id: Uuid,
        candidate: &Credential,
    ) -> StoreResult<Finalization>;

    async fn credential_for_registration(
        &self,
        registration_id: Uuid,
    ) -> StoreResult<Option<Credential>>;
    async fn find_credential_by_payload(&self, payload: &str) -> StoreResult<Option<Credential>>;

    /// Fails with `UniqueViolation` when the registration already has a record.
    async fn insert_attendance(&self, record: &AttendanceRecord) -> StoreResult<()>;

    async fn insert_payment(&self, payment: &PaymentRecord) -> StoreResult<()>;
    async fn find_payment_by_session(&self, session_id: &str)
        -> StoreResult<Option<PaymentRecord>>;
    /// Compare-and-swap on payment status. Returns false when the record was
    /// not in `from`.
    async fn transition_payment(
        &self,
        session_id: &str,
        from: PaymentStatus,
        to: PaymentStatus,
    ) -> StoreResult<bool>;
    async fn list_pending_payments_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<Vec<PaymentRecord>>;

    /// Fails with `UniqueViolation` when the user is already blocked.
    async fn insert_block(&self, block: &BlockRecord) -> StoreResult<()>;
    async fn delete_block(&self, user_id: Uuid) -> StoreResult<bool>;
    async fn find_block(&self, user_id: Uuid) -> StoreResult<Option<BlockRecord>>;
    async fn list_blocks(&self) -> StoreResult<Vec<BlockRecord>>;

    /// Removes credentials, attendance, payments, registrations and the event
    /// in that order, in one transaction. `None` when the event is absent.
    async fn delete_event_cascade(&self, event_id: Uuid) -> StoreResult<Option<CascadeReport>>;

    async fn insert_admin_action(&self, action: &AdminAction) -> StoreResult<()>;
    async fn stats(&self) -> StoreResult<PlatformStats>;

    /// Cheap round trip used by the health check.
    async fn ping(&self) -> StoreResult<()>;
}
