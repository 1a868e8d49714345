use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;
use uuid::Uuid;

/// Where a registration sits in its lifecycle. Paid registrations start in
/// `PendingPayment`; free ones are confirmed in the same request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStatus {
    PendingPayment,
    Confirmed,
}

impl RegistrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistrationStatus::PendingPayment => "pending_payment",
            RegistrationStatus::Confirmed => "confirmed",
        }
    }

    /// The finalize transition. `None` means the registration is already
    /// confirmed and finalize must not run again.
    pub fn confirm(self) -> Option<RegistrationStatus> {
        match self {
            RegistrationStatus::PendingPayment => Some(RegistrationStatus::Confirmed),
            RegistrationStatus::Confirmed => None,
        }
    }
}

impl FromStr for RegistrationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending_payment" => Ok(RegistrationStatus::PendingPayment),
            "confirmed" => Ok(RegistrationStatus::Confirmed),
            other => Err(format!("unknown registration status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub id: Uuid,
    pub event_id: Uuid,
    pub user_id: Uuid,
    pub status: RegistrationStatus,
    pub registered_at: DateTime<Utc>,
}

impl Registration {
    pub fn pending(event_id: Uuid, user_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_id,
            user_id,
            status: RegistrationStatus::PendingPayment,
            registered_at: now,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.status == RegistrationStatus::Confirmed
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct RegistrationRow {
    pub id: Uuid,
    pub event_id: Uuid,
    pub user_id: Uuid,
    pub status: String,
    pub registered_at: DateTime<Utc>,
}

impl TryFrom<RegistrationRow> for Registration {
    type Error = String;

    fn try_from(row: RegistrationRow) -> Result<Self, Self::Error> {
        Ok(Registration {
            id: row.id,
            event_id: row.event_id,
            user_id: row.user_id,
            status: row.status.parse()?,
            registered_at: row.registered_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confirm_is_one_way() {
        assert_eq!(
            RegistrationStatus::PendingPayment.confirm(),
            Some(RegistrationStatus::Confirmed)
        );
        assert_eq!(RegistrationStatus::Confirmed.confirm(), None);
    }

    #[test]
    fn test_status_parses_stored_text() {
        for status in [RegistrationStatus::PendingPayment, RegistrationStatus::Confirmed] {
            assert_eq!(status.as_str().parse::<RegistrationStatus>(), Ok(status));
        }
        assert!("cancelled".parse::<RegistrationStatus>().is_err());
    }
}
