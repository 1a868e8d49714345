use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct BlockRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub blocked_by: Uuid,
    pub reason: String,
    pub blocked_at: DateTime<Utc>,
}
