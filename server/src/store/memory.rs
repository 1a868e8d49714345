//! In-process store used by tests and `STORE_BACKEND=memory` runs.
//!
//! Every trait call takes the single table lock for its whole duration, which
//! makes each call one serialisable transaction, the same guarantee
//! `PgStore` gets from Postgres.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{CascadeReport, Finalization, PlatformStats, Store, StoreError, StoreResult};
use crate::models::{
    AdminAction, AttendanceRecord, BlockRecord, Credential, Event, PaymentRecord, PaymentStatus,
    Profile, Registration, RegistrationStatus, Role,
};
use crate::services::capacity::can_register;

#[derive(Default)]
struct Tables {
    profiles: HashMap<Uuid, Profile>,
    events: HashMap<Uuid, Event>,
    registrations: HashMap<Uuid, Registration>,
    credentials: HashMap<Uuid, Credential>,
    attendance: HashMap<Uuid, AttendanceRecord>,
    payments: HashMap<Uuid, PaymentRecord>,
    blocks: HashMap<Uuid, BlockRecord>,
    admin_actions: Vec<AdminAction>,
}

impl Tables {
    fn credential_of(&self, registration_id: Uuid) -> Option<&Credential> {
        self.credentials
            .values()
            .find(|c| c.registration_id == registration_id)
    }

    fn payment_by_session_mut(&mut self, session_id: &str) -> Option<&mut PaymentRecord> {
        self.payments
            .values_mut()
            .find(|p| p.external_session_id == session_id)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
impl MemoryStore {
    /// Number of dependent rows (registrations, credentials, attendance,
    /// payments) that still point at `event_id`.
    pub async fn rows_referencing_event(&self, event_id: Uuid) -> usize {
        let tables = self.tables.lock().await;
        let registration_ids: Vec<Uuid> = tables
            .registrations
            .values()
            .filter(|r| r.event_id == event_id)
            .map(|r| r.id)
            .collect();

        let credentials = tables
            .credentials
            .values()
            .filter(|c| registration_ids.contains(&c.registration_id))
            .count();
        let attendance = tables
            .attendance
            .values()
            .filter(|a| registration_ids.contains(&a.registration_id))
            .count();
        let payments = tables
            .payments
            .values()
            .filter(|p| p.event_id == event_id)
            .count();

        registration_ids.len() + credentials + attendance + payments
    }

    pub async fn credential_count(&self) -> usize {
        self.tables.lock().await.credentials.len()
    }

    pub async fn attendance_count(&self) -> usize {
        self.tables.lock().await.attendance.len()
    }

    pub async fn admin_actions(&self) -> Vec<AdminAction> {
        self.tables.lock().await.admin_actions.clone()
    }

    pub async fn set_pricing(&self, event_id: Uuid, pricing: crate::models::Pricing) {
        if let Some(event) = self.tables.lock().await.events.get_mut(&event_id) {
            event.pricing = pricing;
        }
    }

    pub async fn backdate_payment(&self, session_id: &str, created_at: DateTime<Utc>) {
        if let Some(payment) = self.tables.lock().await.payment_by_session_mut(session_id) {
            payment.created_at = created_at;
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_profile(&self, profile: &Profile) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        if tables.profiles.contains_key(&profile.id) {
            return Err(StoreError::UniqueViolation("profiles_pkey".into()));
        }
        tables.profiles.insert(profile.id, profile.clone());
        Ok(())
    }

    async fn get_profile(&self, id: Uuid) -> StoreResult<Option<Profile>> {
        Ok(self.tables.lock().await.profiles.get(&id).cloned())
    }

    async fn ensure_profile(&self, profile: &Profile) -> StoreResult<Profile> {
        let mut tables = self.tables.lock().await;
        Ok(tables
            .profiles
            .entry(profile.id)
            .or_insert_with(|| profile.clone())
            .clone())
    }

    async fn set_role(&self, id: Uuid, role: Role) -> StoreResult<bool> {
        let mut tables = self.tables.lock().await;
        Ok(match tables.profiles.get_mut(&id) {
            Some(profile) => {
                profile.role = role;
                true
            }
            None => false,
        })
    }

    async fn insert_event(&self, event: &Event) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        if tables.events.contains_key(&event.id) {
            return Err(StoreError::UniqueViolation("events_pkey".into()));
        }
        tables.events.insert(event.id, event.clone());
        Ok(())
    }

    async fn get_event(&self, id: Uuid) -> StoreResult<Option<Event>> {
        Ok(self.tables.lock().await.events.get(&id).cloned())
    }

    async fn list_events(&self) -> StoreResult<Vec<Event>> {
        let tables = self.tables.lock().await;
        let mut events: Vec<Event> = tables.events.values().cloned().collect();
        events.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(events)
    }

    async fn insert_registration(&self, registration: &Registration) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        let duplicate = tables.registrations.values().any(|r| {
            r.event_id == registration.event_id && r.user_id == registration.user_id
        });
        if duplicate {
            return Err(StoreError::UniqueViolation(
                "event_registrations_event_user_key".into(),
            ));
        }
        tables
            .registrations
            .insert(registration.id, registration.clone());
        Ok(())
    }

    async fn get_registration(&self, id: Uuid) -> StoreResult<Option<Registration>> {
        Ok(self.tables.lock().await.registrations.get(&id).cloned())
    }

    async fn find_registration(
        &self,
        event_id: Uuid,
        user_id: Uuid,
    ) -> StoreResult<Option<Registration>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .registrations
            .values()
            .find(|r| r.event_id == event_id && r.user_id == user_id)
            .cloned())
    }

    async fn list_registrations(&self, event_id: Uuid) -> StoreResult<Vec<Registration>> {
        let tables = self.tables.lock().await;
        let mut registrations: Vec<Registration> = tables
            .registrations
            .values()
            .filter(|r| r.event_id == event_id)
            .cloned()
            .collect();
        registrations.sort_by(|a, b| a.registered_at.cmp(&b.registered_at));
        Ok(registrations)
    }

    async fn delete_pending_registration(&self, id: Uuid) -> StoreResult<bool> {
        let mut tables = self.tables.lock().await;
        let pending = matches!(
            tables.registrations.get(&id),
            Some(r) if r.status == RegistrationStatus::PendingPayment
        );
        if !pending {
            return Ok(false);
        }
        tables.registrations.remove(&id);
        Ok(true)
    }

    async fn finalize_registration(
        &self,
        registration_id: Uuid,
        candidate: &Credential,
    ) -> StoreResult<Finalization> {
        let mut tables = self.tables.lock().await;

        let Some(registration) = tables.registrations.get(&registration_id).cloned() else {
            return Ok(Finalization::Missing);
        };

        let Some(next_status) = registration.status.confirm() else {
            return match tables.credential_of(registration_id) {
                Some(existing) => Ok(Finalization::AlreadyFinalized(existing.clone())),
                None => Err(StoreError::Decode(format!(
                    "confirmed registration {} has no credential",
                    registration_id
                ))),
            };
        };

        let Some(event) = tables.events.get_mut(&registration.event_id) else {
            return Ok(Finalization::Missing);
        };
        if !can_register(event.attendee_count, event.capacity) {
            return Ok(Finalization::CapacityReached);
        }
        event.attendee_count += 1;

        if let Some(reg) = tables.registrations.get_mut(&registration_id) {
            reg.status = next_status;
        }
        tables.credentials.insert(candidate.id, candidate.clone());

        Ok(Finalization::Finalized(candidate.clone()))
    }

    async fn credential_for_registration(
        &self,
        registration_id: Uuid,
    ) -> StoreResult<Option<Credential>> {
        let tables = self.tables.lock().await;
        Ok(tables.credential_of(registration_id).cloned())
    }

    async fn find_credential_by_payload(&self, payload: &str) -> StoreResult<Option<Credential>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .credentials
            .values()
            .find(|c| c.payload == payload)
            .cloned())
    }

    async fn insert_attendance(&self, record: &AttendanceRecord) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        let duplicate = tables
            .attendance
            .values()
            .any(|a| a.registration_id == record.registration_id);
        if duplicate {
            return Err(StoreError::UniqueViolation(
                "event_attendance_registration_key".into(),
            ));
        }
        tables.attendance.insert(record.id, record.clone());
        Ok(())
    }

    async fn insert_payment(&self, payment: &PaymentRecord) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        let duplicate = tables
            .payments
            .values()
            .any(|p| p.external_session_id == payment.external_session_id);
        if duplicate {
            return Err(StoreError::UniqueViolation("event_payments_session_key".into()));
        }
        tables.payments.insert(payment.id, payment.clone());
        Ok(())
    }

    async fn find_payment_by_session(
        &self,
        session_id: &str,
    ) -> StoreResult<Option<PaymentRecord>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .payments
            .values()
            .find(|p| p.external_session_id == session_id)
            .cloned())
    }

    async fn transition_payment(
        &self,
        session_id: &str,
        from: PaymentStatus,
        to: PaymentStatus,
    ) -> StoreResult<bool> {
        let mut tables = self.tables.lock().await;
        match tables.payment_by_session_mut(session_id) {
            Some(payment) if payment.status == from => {
                payment.status = to;
                payment.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_pending_payments_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<Vec<PaymentRecord>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .payments
            .values()
            .filter(|p| p.status == PaymentStatus::Pending && p.created_at < cutoff)
            .cloned()
            .collect())
    }

    async fn insert_block(&self, block: &BlockRecord) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        if tables.blocks.contains_key(&block.user_id) {
            return Err(StoreError::UniqueViolation("blocked_users_user_key".into()));
        }
        tables.blocks.insert(block.user_id, block.clone());
        Ok(())
    }

    async fn delete_block(&self, user_id: Uuid) -> StoreResult<bool> {
        Ok(self.tables.lock().await.blocks.remove(&user_id).is_some())
    }

    async fn find_block(&self, user_id: Uuid) -> StoreResult<Option<BlockRecord>> {
        Ok(self.tables.lock().await.blocks.get(&user_id).cloned())
    }

    async fn list_blocks(&self) -> StoreResult<Vec<BlockRecord>> {
        let tables = self.tables.lock().await;
        let mut blocks: Vec<BlockRecord> = tables.blocks.values().cloned().collect();
        blocks.sort_by(|a, b| b.blocked_at.cmp(&a.blocked_at));
        Ok(blocks)
    }

    async fn delete_event_cascade(&self, event_id: Uuid) -> StoreResult<Option<CascadeReport>> {
        let mut tables = self.tables.lock().await;
        if !tables.events.contains_key(&event_id) {
            return Ok(None);
        }

        let registration_ids: Vec<Uuid> = tables
            .registrations
            .values()
            .filter(|r| r.event_id == event_id)
            .map(|r| r.id)
            .collect();

        let mut report = CascadeReport::default();

        let before = tables.credentials.len();
        tables
            .credentials
            .retain(|_, c| !registration_ids.contains(&c.registration_id));
        report.credentials = (before - tables.credentials.len()) as u64;

        let before = tables.attendance.len();
        tables
            .attendance
            .retain(|_, a| !registration_ids.contains(&a.registration_id));
        report.attendance_records = (before - tables.attendance.len()) as u64;

        let before = tables.payments.len();
        tables.payments.retain(|_, p| p.event_id != event_id);
        report.payments = (before - tables.payments.len()) as u64;

        let before = tables.registrations.len();
        tables.registrations.retain(|_, r| r.event_id != event_id);
        report.registrations = (before - tables.registrations.len()) as u64;

        tables.events.remove(&event_id);
        Ok(Some(report))
    }

    async fn insert_admin_action(&self, action: &AdminAction) -> StoreResult<()> {
        self.tables.lock().await.admin_actions.push(action.clone());
        Ok(())
    }

    async fn stats(&self) -> StoreResult<PlatformStats> {
        let tables = self.tables.lock().await;
        Ok(PlatformStats {
            total_events: tables.events.len() as i64,
            total_users: tables.profiles.len() as i64,
            total_registrations: tables.registrations.len() as i64,
            blocked_users: tables.blocks.len() as i64,
        })
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}
