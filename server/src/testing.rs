//! Fixtures shared by the unit tests.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::config::Config;
use crate::gateway::{CheckoutGateway, CheckoutRequest, CheckoutSession, GatewayError};
use crate::handlers::auth::Claims;
use crate::models::{
    AdminAction, AttendanceRecord, BlockRecord, Credential, Event, EventCategory, PaymentRecord,
    PaymentStatus, Pricing, Profile, Registration, Role,
};
use crate::services::{
    AdminService, AttendanceService, EventService, PaymentService, RegistrationService,
};
use crate::state::AppState;
use crate::store::{
    CascadeReport, Finalization, MemoryStore, PlatformStats, Store, StoreError, StoreResult,
};

pub const JWT_SECRET: &str = "test-jwt-secret";
pub const WEBHOOK_SECRET: &str = "whsec_test";

pub fn test_config() -> Config {
    let vars: HashMap<&str, &str> = [
        ("JWT_SECRET", JWT_SECRET),
        ("STRIPE_WEBHOOK_SECRET", WEBHOOK_SECRET),
        ("PUBLIC_BASE_URL", "https://app.test"),
        ("STORE_BACKEND", "memory"),
    ]
    .into_iter()
    .collect();
    Config::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap()
}

pub fn token_for(secret: &str, user_id: Uuid, email: &str) -> String {
    let claims = Claims {
        sub: user_id.to_string(),
        email: email.to_string(),
        exp: (Utc::now() + Duration::hours(1)).timestamp() as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}

pub fn profile(username: &str, role: Role) -> Profile {
    Profile {
        id: Uuid::new_v4(),
        username: Some(username.to_string()),
        full_name: None,
        role,
        created_at: Utc::now(),
    }
}

/// An open free event a week from now.
pub fn free_event(organizer_id: Uuid, capacity: Option<i32>) -> Event {
    let start = Utc::now() + Duration::days(7);
    Event {
        id: Uuid::new_v4(),
        organizer_id,
        title: "Community Meetup".to_string(),
        description: "Monthly meetup".to_string(),
        start_date: start,
        end_date: start + Duration::hours(3),
        location: Some("Town Hall".to_string()),
        is_online: false,
        category: EventCategory::Meetup,
        tags: vec!["community".to_string()],
        attendee_count: 0,
        capacity,
        pricing: Pricing::Free,
        registration_enabled: true,
        created_at: Utc::now(),
    }
}

/// Records every checkout request and hands out predictable sessions.
#[derive(Default)]
pub struct FakeGateway {
    requests: Mutex<Vec<CheckoutRequest>>,
    fail_next: AtomicBool,
    sessions: AtomicUsize,
}

impl FakeGateway {
    pub fn requests(&self) -> Vec<CheckoutRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl CheckoutGateway for FakeGateway {
    async fn create_checkout(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, GatewayError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(GatewayError::Unreachable("connection refused".to_string()));
        }
        self.requests.lock().unwrap().push(request.clone());

        let id = format!("cs_test_{}", self.sessions.fetch_add(1, Ordering::SeqCst) + 1);
        Ok(CheckoutSession {
            url: format!("https://checkout.test/{}", id),
            id,
        })
    }
}

/// Wired services over a fresh `MemoryStore`, with one admin profile.
pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub gateway: Arc<FakeGateway>,
    pub state: AppState,
    pub staff: Profile,
    pub events: Arc<EventService>,
    pub registrations: Arc<RegistrationService>,
    pub payments: Arc<PaymentService>,
    pub attendance: Arc<AttendanceService>,
    pub admin: Arc<AdminService>,
}

impl Fixture {
    pub async fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(FakeGateway::default());
        let state = AppState::new(test_config(), store.clone(), gateway.clone());

        let staff = profile("staff", Role::Admin);
        store.insert_profile(&staff).await.unwrap();

        Self {
            events: state.events.clone(),
            registrations: state.registrations.clone(),
            payments: state.payments.clone(),
            attendance: state.attendance.clone(),
            admin: state.admin.clone(),
            store,
            gateway,
            state,
            staff,
        }
    }

    pub async fn user(&self, username: &str) -> Profile {
        let user = profile(username, Role::User);
        self.store.insert_profile(&user).await.unwrap();
        user
    }

    pub async fn free_event(&self, capacity: Option<i32>) -> Event {
        let event = free_event(self.staff.id, capacity);
        self.store.insert_event(&event).await.unwrap();
        event
    }

    pub async fn paid_event(&self, amount: Decimal, currency: &str, capacity: Option<i32>) -> Event {
        let mut event = free_event(self.staff.id, capacity);
        event.title = "Paid Workshop".to_string();
        event.pricing = Pricing::Paid {
            amount,
            currency: currency.to_string(),
        };
        self.store.insert_event(&event).await.unwrap();
        event
    }

    pub async fn event(&self, id: Uuid) -> Event {
        self.store.get_event(id).await.unwrap().unwrap()
    }
}

/// Delegates to a `MemoryStore`, failing selected calls on demand.
pub struct FaultyStore {
    inner: Arc<MemoryStore>,
    audit_down: AtomicBool,
    attendance_failures: AtomicUsize,
    down: AtomicBool,
}

impl FaultyStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            audit_down: AtomicBool::new(false),
            attendance_failures: AtomicUsize::new(0),
            down: AtomicBool::new(false),
        }
    }

    /// Every audit insert fails.
    pub fn without_audit(self) -> Self {
        self.audit_down.store(true, Ordering::SeqCst);
        self
    }

    /// The next `times` attendance inserts fail.
    pub fn failing_attendance(self, times: usize) -> Self {
        self.attendance_failures.store(times, Ordering::SeqCst);
        self
    }

    /// Health pings fail.
    pub fn unreachable(self) -> Self {
        self.down.store(true, Ordering::SeqCst);
        self
    }

    fn take_attendance_failure(&self) -> bool {
        self.attendance_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Store for FaultyStore {
    async fn insert_profile(&self, profile: &Profile) -> StoreResult<()> {
        self.inner.insert_profile(profile).await
    }
    async fn get_profile(&self, id: Uuid) -> StoreResult<Option<Profile>> {
        self.inner.get_profile(id).await
    }
    async fn ensure_profile(&self, profile: &Profile) -> StoreResult<Profile> {
        self.inner.ensure_profile(profile).await
    }
    async fn set_role(&self, id: Uuid, role: Role) -> StoreResult<bool> {
        self.inner.set_role(id, role).await
    }
    async fn insert_event(&self, event: &Event) -> StoreResult<()> {
        self.inner.insert_event(event).await
    }
    async fn get_event(&self, id: Uuid) -> StoreResult<Option<Event>> {
        self.inner.get_event(id).await
    }
    async fn list_events(&self) -> StoreResult<Vec<Event>> {
        self.inner.list_events().await
    }
    async fn insert_registration(&self, registration: &Registration) -> StoreResult<()> {
        self.inner.insert_registration(registration).await
    }
    async fn get_registration(&self, id: Uuid) -> StoreResult<Option<Registration>> {
        self.inner.get_registration(id).await
    }
    async fn find_registration(
        &self,
        event_id: Uuid,
        user_id: Uuid,
    ) -> StoreResult<Option<Registration>> {
        self.inner.find_registration(event_id, user_id).await
    }
    async fn list_registrations(&self, event_id: Uuid) -> StoreResult<Vec<Registration>> {
        self.inner.list_registrations(event_id).await
    }
    async fn delete_pending_registration(&self, id: Uuid) -> StoreResult<bool> {
        self.inner.delete_pending_registration(id).await
    }
    async fn finalize_registration(
        &self,
        registration_id: Uuid,
        candidate: &Credential,
    ) -> StoreResult<Finalization> {
        self.inner.finalize_registration(registration_id, candidate).await
    }
    async fn credential_for_registration(
        &self,
        registration_id: Uuid,
    ) -> StoreResult<Option<Credential>> {
        self.inner.credential_for_registration(registration_id).await
    }
    async fn find_credential_by_payload(&self, payload: &str) -> StoreResult<Option<Credential>> {
        self.inner.find_credential_by_payload(payload).await
    }
    async fn insert_attendance(&self, record: &AttendanceRecord) -> StoreResult<()> {
        if self.take_attendance_failure() {
            return Err(StoreError::Unavailable("connection reset".to_string()));
        }
        self.inner.insert_attendance(record).await
    }
    async fn insert_payment(&self, payment: &PaymentRecord) -> StoreResult<()> {
        self.inner.insert_payment(payment).await
    }
    async fn find_payment_by_session(
        &self,
        session_id: &str,
    ) -> StoreResult<Option<PaymentRecord>> {
        self.inner.find_payment_by_session(session_id).await
    }
    async fn transition_payment(
        &self,
        session_id: &str,
        from: PaymentStatus,
        to: PaymentStatus,
    ) -> StoreResult<bool> {
        self.inner.transition_payment(session_id, from, to).await
    }
    async fn list_pending_payments_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<Vec<PaymentRecord>> {
        self.inner.list_pending_payments_before(cutoff).await
    }
    async fn insert_block(&self, block: &BlockRecord) -> StoreResult<()> {
        self.inner.insert_block(block).await
    }
    async fn delete_block(&self, user_id: Uuid) -> StoreResult<bool> {
        self.inner.delete_block(user_id).await
    }
    async fn find_block(&self, user_id: Uuid) -> StoreResult<Option<BlockRecord>> {
        self.inner.find_block(user_id).await
    }
    async fn list_blocks(&self) -> StoreResult<Vec<BlockRecord>> {
        self.inner.list_blocks().await
    }
    async fn delete_event_cascade(&self, event_id: Uuid) -> StoreResult<Option<CascadeReport>> {
        self.inner.delete_event_cascade(event_id).await
    }
    async fn insert_admin_action(&self, action: &AdminAction) -> StoreResult<()> {
        if self.audit_down.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("audit table locked".to_string()));
        }
        self.inner.insert_admin_action(action).await
    }
    async fn stats(&self) -> StoreResult<PlatformStats> {
        self.inner.stats().await
    }
    async fn ping(&self) -> StoreResult<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".to_string()));
        }
        self.inner.ping().await
    }
}
