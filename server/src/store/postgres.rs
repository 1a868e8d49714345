use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use uuid::Uuid;

use super::{CascadeReport, Finalization, PlatformStats, Store, StoreError, StoreResult};
use crate::models::event::EventRow;
use crate::models::payment::PaymentRow;
use crate::models::registration::RegistrationRow;
use crate::models::user::ProfileRow;
use crate::models::{
    AdminAction, AttendanceRecord, BlockRecord, Credential, Event, PaymentRecord, PaymentStatus,
    Pricing, Profile, Registration, RegistrationStatus, Role,
};

const EVENT_COLUMNS: &str = "id, organizer_id, title, description, start_date, end_date, \
     location, is_online, event_type, tags, attendees, max_attendees, is_free, price, currency, \
     registration_enabled, created_at";

const REGISTRATION_COLUMNS: &str = "id, event_id, user_id, status, registered_at";

const CREDENTIAL_COLUMNS: &str = "id, registration_id, qr_code_data, created_at";

const PAYMENT_COLUMNS: &str = "id, event_id, registration_id, user_id, stripe_session_id, \
     amount, currency, status, created_at, updated_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        tracing::info!("Successfully connected to database");
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!()
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Unavailable(format!("migration failed: {}", e)))?;

        tracing::info!("Migrations run successfully");
        Ok(())
    }
}

fn decode_event(row: EventRow) -> StoreResult<Event> {
    Event::try_from(row).map_err(StoreError::Decode)
}

fn decode_registration(row: RegistrationRow) -> StoreResult<Registration> {
    Registration::try_from(row).map_err(StoreError::Decode)
}

fn decode_payment(row: PaymentRow) -> StoreResult<PaymentRecord> {
    PaymentRecord::try_from(row).map_err(StoreError::Decode)
}

fn role_text(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Admin => "admin",
    }
}

#[async_trait]
impl Store for PgStore {
    async fn insert_profile(&self, profile: &Profile) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO profiles (id, username, full_name, role, created_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(profile.id)
        .bind(&profile.username)
        .bind(&profile.full_name)
        .bind(role_text(profile.role))
        .bind(profile.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_profile(&self, id: Uuid) -> StoreResult<Option<Profile>> {
        let row: Option<ProfileRow> = sqlx::query_as(
            "SELECT id, username, full_name, role, created_at FROM profiles WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Profile::from))
    }

    async fn ensure_profile(&self, profile: &Profile) -> StoreResult<Profile> {
        let row: Option<ProfileRow> = sqlx::query_as(
            "WITH inserted AS ( \
                 INSERT INTO profiles (id, username, full_name, role, created_at) \
                 VALUES ($1, $2, $3, $4, $5) \
                 ON CONFLICT (id) DO NOTHING \
                 RETURNING id, username, full_name, role, created_at \
             ) \
             SELECT id, username, full_name, role, created_at FROM inserted \
             UNION ALL \
             SELECT id, username, full_name, role, created_at FROM profiles WHERE id = $1 \
             LIMIT 1",
        )
        .bind(profile.id)
        .bind(&profile.username)
        .bind(&profile.full_name)
        .bind(role_text(profile.role))
        .bind(profile.created_at)
        .fetch_optional(&self.pool)
        .await?;

        // A concurrent first insert commits after this statement's snapshot.
        match row {
            Some(row) => Ok(Profile::from(row)),
            None => self.get_profile(profile.id).await?.ok_or_else(|| {
                StoreError::Decode(format!("profile {} vanished during upsert", profile.id))
            }),
        }
    }

    async fn set_role(&self, id: Uuid, role: Role) -> StoreResult<bool> {
        let updated = sqlx::query("UPDATE profiles SET role = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(role_text(role))
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(updated > 0)
    }

    async fn insert_event(&self, event: &Event) -> StoreResult<()> {
        let (is_free, price, currency) = match &event.pricing {
            Pricing::Free => (true, None, None),
            Pricing::Paid { amount, currency } => (false, Some(*amount), Some(currency.clone())),
        };

        sqlx::query(&format!(
            "INSERT INTO events ({}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)",
            EVENT_COLUMNS
        ))
        .bind(event.id)
        .bind(event.organizer_id)
        .bind(&event.title)
        .bind(&event.description)
        .bind(event.start_date)
        .bind(event.end_date)
        .bind(&event.location)
        .bind(event.is_online)
        .bind(event.category.as_str())
        .bind(&event.tags)
        .bind(event.attendee_count)
        .bind(event.capacity)
        .bind(is_free)
        .bind(price)
        .bind(currency)
        .bind(event.registration_enabled)
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_event(&self, id: Uuid) -> StoreResult<Option<Event>> {
        let row: Option<EventRow> =
            sqlx::query_as(&format!("SELECT {} FROM events WHERE id = $1", EVENT_COLUMNS))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(decode_event).transpose()
    }

    async fn list_events(&self) -> StoreResult<Vec<Event>> {
        let rows: Vec<EventRow> = sqlx::query_as(&format!(
            "SELECT {} FROM events ORDER BY created_at DESC",
            EVENT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(decode_event).collect()
    }

    async fn insert_registration(&self, registration: &Registration) -> StoreResult<()> {
        sqlx::query(&format!(
            "INSERT INTO event_registrations ({}) VALUES ($1, $2, $3, $4, $5)",
            REGISTRATION_COLUMNS
        ))
        .bind(registration.id)
        .bind(registration.event_id)
        .bind(registration.user_id)
        .bind(registration.status.as_str())
        .bind(registration.registered_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_registration(&self, id: Uuid) -> StoreResult<Option<Registration>> {
        let row: Option<RegistrationRow> = sqlx::query_as(&format!(
            "SELECT {} FROM event_registrations WHERE id = $1",
            REGISTRATION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(decode_registration).transpose()
    }

    async fn find_registration(
        &self,
        event_id: Uuid,
        user_id: Uuid,
    ) -> StoreResult<Option<Registration>> {
        let row: Option<RegistrationRow> = sqlx::query_as(&format!(
            "SELECT {} FROM event_registrations WHERE event_id = $1 AND user_id = $2",
            REGISTRATION_COLUMNS
        ))
        .bind(event_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(decode_registration).transpose()
    }

    async fn list_registrations(&self, event_id: Uuid) -> StoreResult<Vec<Registration>> {
        let rows: Vec<RegistrationRow> = sqlx::query_as(&format!(
            "SELECT {} FROM event_registrations WHERE event_id = $1 ORDER BY registered_at",
            REGISTRATION_COLUMNS
        ))
        .bind(event_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(decode_registration).collect()
    }

    async fn delete_pending_registration(&self, id: Uuid) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;

        let status: Option<String> = sqlx::query_scalar(
            "SELECT status FROM event_registrations WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        if status.as_deref() != Some(RegistrationStatus::PendingPayment.as_str()) {
            return Ok(false);
        }

        sqlx::query("DELETE FROM event_registrations WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn finalize_registration(
        &self,
        registration_id: Uuid,
        candidate: &Credential,
    ) -> StoreResult<Finalization> {
        let mut tx = self.pool.begin().await?;

        // Event row first, then registration: the same order as
        // delete_event_cascade, so the two never wait on each other in a cycle.
        let event_id: Option<Uuid> =
            sqlx::query_scalar("SELECT event_id FROM event_registrations WHERE id = $1")
                .bind(registration_id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(event_id) = event_id else {
            return Ok(Finalization::Missing);
        };
        let locked: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM events WHERE id = $1 FOR NO KEY UPDATE")
                .bind(event_id)
                .fetch_optional(&mut *tx)
                .await?;
        if locked.is_none() {
            return Ok(Finalization::Missing);
        }

        // Serialises concurrent finalize calls for the same registration.
        let row: Option<RegistrationRow> = sqlx::query_as(&format!(
            "SELECT {} FROM event_registrations WHERE id = $1 FOR UPDATE",
            REGISTRATION_COLUMNS
        ))
        .bind(registration_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Ok(Finalization::Missing);
        };
        let registration = decode_registration(row)?;

        let Some(next_status) = registration.status.confirm() else {
            let existing: Option<Credential> = sqlx::query_as(&format!(
                "SELECT {} FROM registration_qr_codes WHERE registration_id = $1",
                CREDENTIAL_COLUMNS
            ))
            .bind(registration_id)
            .fetch_optional(&mut *tx)
            .await?;

            return existing.map(Finalization::AlreadyFinalized).ok_or_else(|| {
                StoreError::Decode(format!(
                    "confirmed registration {} has no credential",
                    registration_id
                ))
            });
        };

        let bumped = sqlx::query(
            "UPDATE events SET attendees = attendees + 1, updated_at = now() \
             WHERE id = $1 AND (max_attendees IS NULL OR attendees < max_attendees)",
        )
        .bind(registration.event_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if bumped == 0 {
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM events WHERE id = $1)")
                    .bind(registration.event_id)
                    .fetch_one(&mut *tx)
                    .await?;

            return Ok(if exists {
                Finalization::CapacityReached
            } else {
                Finalization::Missing
            });
        }

        sqlx::query("UPDATE event_registrations SET status = $2 WHERE id = $1")
            .bind(registration_id)
            .bind(next_status.as_str())
            .execute(&mut *tx)
            .await?;

        sqlx::query(&format!(
            "INSERT INTO registration_qr_codes ({}) VALUES ($1, $2, $3, $4)",
            CREDENTIAL_COLUMNS
        ))
        .bind(candidate.id)
        .bind(candidate.registration_id)
        .bind(&candidate.payload)
        .bind(candidate.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Finalization::Finalized(candidate.clone()))
    }

    async fn credential_for_registration(
        &self,
        registration_id: Uuid,
    ) -> StoreResult<Option<Credential>> {
        let credential = sqlx::query_as(&format!(
            "SELECT {} FROM registration_qr_codes WHERE registration_id = $1",
            CREDENTIAL_COLUMNS
        ))
        .bind(registration_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(credential)
    }

    async fn find_credential_by_payload(&self, payload: &str) -> StoreResult<Option<Credential>> {
        let credential = sqlx::query_as(&format!(
            "SELECT {} FROM registration_qr_codes WHERE qr_code_data = $1",
            CREDENTIAL_COLUMNS
        ))
        .bind(payload)
        .fetch_optional(&self.pool)
        .await?;
        Ok(credential)
    }

    async fn insert_attendance(&self, record: &AttendanceRecord) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO event_attendance (id, registration_id, checked_in_by, checked_in_at) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(record.id)
        .bind(record.registration_id)
        .bind(record.checked_in_by)
        .bind(record.checked_in_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_payment(&self, payment: &PaymentRecord) -> StoreResult<()> {
        sqlx::query(&format!(
            "INSERT INTO event_payments ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            PAYMENT_COLUMNS
        ))
        .bind(payment.id)
        .bind(payment.event_id)
        .bind(payment.registration_id)
        .bind(payment.user_id)
        .bind(&payment.external_session_id)
        .bind(payment.amount)
        .bind(&payment.currency)
        .bind(payment.status.as_str())
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_payment_by_session(
        &self,
        session_id: &str,
    ) -> StoreResult<Option<PaymentRecord>> {
        let row: Option<PaymentRow> = sqlx::query_as(&format!(
            "SELECT {} FROM event_payments WHERE stripe_session_id = $1",
            PAYMENT_COLUMNS
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(decode_payment).transpose()
    }

    async fn transition_payment(
        &self,
        session_id: &str,
        from: PaymentStatus,
        to: PaymentStatus,
    ) -> StoreResult<bool> {
        let updated = sqlx::query(
            "UPDATE event_payments SET status = $3, updated_at = now() \
             WHERE stripe_session_id = $1 AND status = $2",
        )
        .bind(session_id)
        .bind(from.as_str())
        .bind(to.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated == 1)
    }

    async fn list_pending_payments_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<Vec<PaymentRecord>> {
        let rows: Vec<PaymentRow> = sqlx::query_as(&format!(
            "SELECT {} FROM event_payments WHERE status = 'pending' AND created_at < $1",
            PAYMENT_COLUMNS
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(decode_payment).collect()
    }

    async fn insert_block(&self, block: &BlockRecord) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO blocked_users (id, user_id, blocked_by, reason, blocked_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(block.id)
        .bind(block.user_id)
        .bind(block.blocked_by)
        .bind(&block.reason)
        .bind(block.blocked_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_block(&self, user_id: Uuid) -> StoreResult<bool> {
        let deleted = sqlx::query("DELETE FROM blocked_users WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted > 0)
    }

    async fn find_block(&self, user_id: Uuid) -> StoreResult<Option<BlockRecord>> {
        let block = sqlx::query_as(
            "SELECT id, user_id, blocked_by, reason, blocked_at FROM blocked_users \
             WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(block)
    }

    async fn list_blocks(&self) -> StoreResult<Vec<BlockRecord>> {
        let blocks = sqlx::query_as(
            "SELECT id, user_id, blocked_by, reason, blocked_at FROM blocked_users \
             ORDER BY blocked_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(blocks)
    }

    async fn delete_event_cascade(&self, event_id: Uuid) -> StoreResult<Option<CascadeReport>> {
        let mut tx = self.pool.begin().await?;

        // Locking the event row blocks new registrations (their FK check needs
        // a key-share lock) until the cascade commits.
        let found: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM events WHERE id = $1 FOR UPDATE")
                .bind(event_id)
                .fetch_optional(&mut *tx)
                .await?;
        if found.is_none() {
            return Ok(None);
        }

        let credentials = sqlx::query(
            "DELETE FROM registration_qr_codes WHERE registration_id IN \
             (SELECT id FROM event_registrations WHERE event_id = $1)",
        )
        .bind(event_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let attendance_records = sqlx::query(
            "DELETE FROM event_attendance WHERE registration_id IN \
             (SELECT id FROM event_registrations WHERE event_id = $1)",
        )
        .bind(event_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let payments = sqlx::query("DELETE FROM event_payments WHERE event_id = $1")
            .bind(event_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let registrations = sqlx::query("DELETE FROM event_registrations WHERE event_id = $1")
            .bind(event_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        sqlx::query("DELETE FROM events WHERE id = $1")
            .bind(event_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(Some(CascadeReport {
            credentials,
            attendance_records,
            payments,
            registrations,
        }))
    }

    async fn insert_admin_action(&self, action: &AdminAction) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO admin_actions \
             (id, admin_id, action_type, target_user_id, target_event_id, reason, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(action.id)
        .bind(action.admin_id)
        .bind(action.action_type.as_str())
        .bind(action.target_user_id)
        .bind(action.target_event_id)
        .bind(&action.reason)
        .bind(action.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn stats(&self) -> StoreResult<PlatformStats> {
        let total_events: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM events")
            .fetch_one(&self.pool)
            .await?;
        let total_users: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM profiles")
            .fetch_one(&self.pool)
            .await?;
        let total_registrations: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM event_registrations")
                .fetch_one(&self.pool)
                .await?;
        let blocked_users: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM blocked_users")
            .fetch_one(&self.pool)
            .await?;

        Ok(PlatformStats {
            total_events,
            total_users,
            total_registrations,
            blocked_users,
        })
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
