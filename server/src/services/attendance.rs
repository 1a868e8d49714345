//! On-site check-in from a decoded scan payload.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::info;
use uuid::Uuid;

use super::credential;
use crate::models::AttendanceRecord;
use crate::store::{SharedStore, StoreError};
use crate::utils::error::AppError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceResult {
    pub registration_id: Uuid,
    pub attendee_name: String,
    pub checked_in_at: DateTime<Utc>,
}

pub struct AttendanceService {
    store: SharedStore,
}

impl AttendanceService {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Records attendance for the registration `payload` resolves to.
    /// The attendance table's unique key is what makes this at-most-once.
    pub async fn check_in(
        &self,
        event_id: Uuid,
        payload: &str,
        staff_id: Uuid,
    ) -> Result<AttendanceResult, AppError> {
        let staff = self.store.get_profile(staff_id).await?;
        if !staff.map(|p| p.is_admin()).unwrap_or(false) {
            return Err(AppError::NotAuthorized(
                "Only event staff can record attendance".to_string(),
            ));
        }

        if self.store.get_event(event_id).await?.is_none() {
            return Err(AppError::NotFound("Event not found".to_string()));
        }

        let payload = payload.trim();
        if !credential::is_well_formed(payload) {
            return Err(AppError::InvalidCredential);
        }

        let credential = self
            .store
            .find_credential_by_payload(payload)
            .await?
            .ok_or(AppError::InvalidCredential)?;
        let registration = self
            .store
            .get_registration(credential.registration_id)
            .await?
            .ok_or(AppError::InvalidCredential)?;

        if registration.event_id != event_id {
            return Err(AppError::WrongEvent);
        }

        let record = AttendanceRecord {
            id: Uuid::new_v4(),
            registration_id: registration.id,
            checked_in_by: staff_id,
            checked_in_at: Utc::now(),
        };
        self.store
            .insert_attendance(&record)
            .await
            .map_err(|e| match e {
                StoreError::UniqueViolation(_) => AppError::AlreadyCheckedIn,
                other => AppError::Store(other),
            })?;

        let attendee_name = self
            .store
            .get_profile(registration.user_id)
            .await?
            .map(|p| p.display_name())
            .unwrap_or_else(|| "Unknown User".to_string());

        info!(
            event_id = %event_id,
            registration_id = %registration.id,
            staff_id = %staff_id,
            "Attendee checked in"
        );

        Ok(AttendanceResult {
            registration_id: registration.id,
            attendee_name,
            checked_in_at: record.checked_in_at,
        })
    }
}

struct RecentScan {
    event_id: Uuid,
    payload: String,
    seen_at: Instant,
}

/// Collapses a burst of identical scans from one scanner into a single
/// attempt. Only the latest scan per staff member is remembered.
pub struct ScanDebouncer {
    window: Duration,
    recent: Mutex<HashMap<Uuid, RecentScan>>,
}

impl ScanDebouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            recent: Mutex::new(HashMap::new()),
        }
    }

    /// True when this scan should be processed.
    pub fn admit(&self, staff_id: Uuid, event_id: Uuid, payload: &str) -> bool {
        self.admit_at(staff_id, event_id, payload, Instant::now())
    }

    fn admit_at(&self, staff_id: Uuid, event_id: Uuid, payload: &str, now: Instant) -> bool {
        let mut recent = self.recent.lock().unwrap_or_else(PoisonError::into_inner);
        let payload = payload.trim();

        if let Some(last) = recent.get(&staff_id) {
            if last.event_id == event_id
                && last.payload == payload
                && now.saturating_duration_since(last.seen_at) < self.window
            {
                return false;
            }
        }

        recent.insert(
            staff_id,
            RecentScan {
                event_id,
                payload: payload.to_string(),
                seen_at: now,
            },
        );
        true
    }

    /// Drops the remembered scan so an immediate retry is processed.
    pub fn forget(&self, staff_id: Uuid) {
        self.recent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&staff_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::registration::RegistrationResult;
    use crate::store::Store;
    use crate::testing::Fixture;

    async fn confirmed_payload(fx: &Fixture, event_id: Uuid, username: &str) -> String {
        let user = fx.user(username).await;
        let RegistrationResult::Confirmed { registration_id, .. } = fx
            .registrations
            .register(event_id, user.id, "x@example.org")
            .await
            .unwrap()
        else {
            panic!("expected confirmation");
        };
        fx.store
            .credential_for_registration(registration_id)
            .await
            .unwrap()
            .unwrap()
            .payload
    }

    #[tokio::test]
    async fn test_second_scan_is_already_checked_in() {
        let fx = Fixture::new().await;
        let event = fx.free_event(None).await;
        let payload = confirmed_payload(&fx, event.id, "ada").await;

        let first = fx.attendance.check_in(event.id, &payload, fx.staff.id).await.unwrap();
        let second = fx.attendance.check_in(event.id, &payload, fx.staff.id).await;

        assert_eq!(first.attendee_name, "ada");
        assert!(matches!(second, Err(AppError::AlreadyCheckedIn)));
        assert_eq!(fx.store.attendance_count().await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_scans_record_once() {
        let fx = Fixture::new().await;
        let event = fx.free_event(None).await;
        let payload = confirmed_payload(&fx, event.id, "ada").await;

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let attendance = fx.attendance.clone();
                let payload = payload.clone();
                let (event_id, staff) = (event.id, fx.staff.id);
                tokio::spawn(async move { attendance.check_in(event_id, &payload, staff).await })
            })
            .collect();
        let mut successes = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                Err(AppError::AlreadyCheckedIn) => {}
                Err(other) => panic!("unexpected error {:?}", other),
            }
        }

        assert_eq!(successes, 1);
        assert_eq!(fx.store.attendance_count().await, 1);
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_payloads_are_invalid() {
        let fx = Fixture::new().await;
        let event = fx.free_event(None).await;

        let garbage = fx.attendance.check_in(event.id, "hello", fx.staff.id).await;
        assert!(matches!(garbage, Err(AppError::InvalidCredential)));

        let unknown = credential::issue(Uuid::new_v4(), Utc::now()).payload;
        let result = fx.attendance.check_in(event.id, &unknown, fx.staff.id).await;
        assert!(matches!(result, Err(AppError::InvalidCredential)));
    }

    #[tokio::test]
    async fn test_payload_for_other_event_is_wrong_event() {
        let fx = Fixture::new().await;
        let event = fx.free_event(None).await;
        let other = fx.free_event(None).await;
        let payload = confirmed_payload(&fx, event.id, "ada").await;

        let result = fx.attendance.check_in(other.id, &payload, fx.staff.id).await;

        assert!(matches!(result, Err(AppError::WrongEvent)));
        assert_eq!(fx.store.attendance_count().await, 0);
    }

    #[tokio::test]
    async fn test_non_staff_cannot_check_in() {
        let fx = Fixture::new().await;
        let event = fx.free_event(None).await;
        let payload = confirmed_payload(&fx, event.id, "ada").await;
        let visitor = fx.user("eve").await;

        let result = fx.attendance.check_in(event.id, &payload, visitor.id).await;

        assert!(matches!(result, Err(AppError::NotAuthorized(_))));
    }

    #[test]
    fn test_debouncer_drops_repeats_within_window() {
        let debouncer = ScanDebouncer::new(Duration::from_millis(3000));
        let staff = Uuid::new_v4();
        let event = Uuid::new_v4();
        let start = Instant::now();

        assert!(debouncer.admit_at(staff, event, "EH1-abc", start));
        assert!(!debouncer.admit_at(staff, event, "EH1-abc", start + Duration::from_millis(500)));
        assert!(!debouncer.admit_at(staff, event, " EH1-abc\n", start + Duration::from_millis(900)));
        assert!(debouncer.admit_at(staff, event, "EH1-abc", start + Duration::from_millis(3500)));
    }

    #[test]
    fn test_forgotten_scan_is_admitted_again() {
        let debouncer = ScanDebouncer::new(Duration::from_secs(3));
        let (staff, event) = (Uuid::new_v4(), Uuid::new_v4());

        assert!(debouncer.admit(staff, event, "EH1-abc"));
        debouncer.forget(staff);
        assert!(debouncer.admit(staff, event, "EH1-abc"));
        assert!(!debouncer.admit(staff, event, "EH1-abc"));
    }

    #[test]
    fn test_debouncer_admits_new_code_or_other_scanner() {
        let debouncer = ScanDebouncer::new(Duration::from_millis(3000));
        let staff = Uuid::new_v4();
        let event = Uuid::new_v4();
        let start = Instant::now();

        assert!(debouncer.admit_at(staff, event, "EH1-abc", start));
        assert!(debouncer.admit_at(Uuid::new_v4(), event, "EH1-abc", start));
        assert!(debouncer.admit_at(staff, event, "EH1-def", start));
        assert!(debouncer.admit_at(staff, event, "EH1-abc", start));
    }
}
