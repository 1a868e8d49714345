use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Credential {
    pub id: Uuid,
    pub registration_id: Uuid,
    #[sqlx(rename = "qr_code_data")]
    pub payload: String,
    pub created_at: DateTime<Utc>,
}

impl Credential {
    pub fn new(registration_id: Uuid, payload: String, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            registration_id,
            payload,
            created_at: now,
        }
    }
}
