use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminActionType {
    BlockUser,
    UnblockUser,
    DeleteEvent,
}

impl AdminActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdminActionType::BlockUser => "block_user",
            AdminActionType::UnblockUser => "unblock_user",
            AdminActionType::DeleteEvent => "delete_event",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminAction {
    pub id: Uuid,
    pub admin_id: Uuid,
    pub action_type: AdminActionType,
    pub target_user_id: Option<Uuid>,
    pub target_event_id: Option<Uuid>,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}
