//! Moderation actions gated on the persisted admin role.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use super::registration::{RegistrationChange, RegistrationFeed};
use crate::models::{
    AdminAction, AdminActionType, BlockRecord, Event, Profile, RegistrationStatus,
};
use crate::store::{CascadeReport, PlatformStats, SharedStore, StoreError};
use crate::utils::error::AppError;

/// Result of a best-effort audit write.
#[must_use]
#[derive(Debug)]
pub enum AuditOutcome {
    Recorded,
    Failed(StoreError),
}

impl AuditOutcome {
    /// The audit policy: a failed write never undoes the action. It is
    /// logged and handed back as a warning for the caller.
    pub fn or_else_warn(self) -> Option<String> {
        match self {
            AuditOutcome::Recorded => None,
            AuditOutcome::Failed(err) => {
                warn!(error = %err, "Admin action was not written to the audit log");
                Some("The action succeeded but could not be recorded in the audit log".to_string())
            }
        }
    }
}

/// A completed moderation action plus any warning the caller should see.
#[derive(Debug, Clone, Serialize)]
pub struct Moderated<T> {
    pub result: T,
    pub warning: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrantSummary {
    pub registration_id: Uuid,
    pub user_id: Uuid,
    pub display_name: String,
    pub status: RegistrationStatus,
    pub registered_at: DateTime<Utc>,
    pub is_blocked: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDetails {
    pub event: Event,
    pub registrations: Vec<RegistrantSummary>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockedUser {
    pub user_id: Uuid,
    pub display_name: String,
    pub reason: String,
    pub blocked_by: Uuid,
    pub blocked_at: DateTime<Utc>,
}

pub struct AdminService {
    store: SharedStore,
    feed: RegistrationFeed,
}

impl AdminService {
    pub fn new(store: SharedStore, feed: RegistrationFeed) -> Self {
        Self { store, feed }
    }

    async fn require_admin(&self, admin_id: Uuid) -> Result<Profile, AppError> {
        match self.store.get_profile(admin_id).await? {
            Some(profile) if profile.is_admin() => Ok(profile),
            _ => Err(AppError::NotAuthorized("Admin access required".to_string())),
        }
    }

    fn required_reason(reason: &str, action: &str) -> Result<String, AppError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(AppError::ValidationError(format!(
                "A reason is required to {}",
                action
            )));
        }
        Ok(reason.to_string())
    }

    async fn audit_log(
        &self,
        admin_id: Uuid,
        action_type: AdminActionType,
        target_user_id: Option<Uuid>,
        target_event_id: Option<Uuid>,
        reason: Option<String>,
    ) -> AuditOutcome {
        let action = AdminAction {
            id: Uuid::new_v4(),
            admin_id,
            action_type,
            target_user_id,
            target_event_id,
            reason,
            created_at: Utc::now(),
        };
        match self.store.insert_admin_action(&action).await {
            Ok(()) => AuditOutcome::Recorded,
            Err(e) => AuditOutcome::Failed(e),
        }
    }

    pub async fn block_user(
        &self,
        admin_id: Uuid,
        target_user_id: Uuid,
        reason: &str,
    ) -> Result<Moderated<BlockRecord>, AppError> {
        self.require_admin(admin_id).await?;
        let reason = Self::required_reason(reason, "block a user")?;

        if admin_id == target_user_id {
            return Err(AppError::ValidationError("You cannot block yourself".to_string()));
        }
        if self.store.get_profile(target_user_id).await?.is_none() {
            return Err(AppError::NotFound("User not found".to_string()));
        }

        let block = BlockRecord {
            id: Uuid::new_v4(),
            user_id: target_user_id,
            blocked_by: admin_id,
            reason: reason.clone(),
            blocked_at: Utc::now(),
        };
        self.store.insert_block(&block).await.map_err(|e| match e {
            StoreError::UniqueViolation(_) => {
                AppError::ValidationError("User is already blocked".to_string())
            }
            other => AppError::Store(other),
        })?;

        info!(admin_id = %admin_id, user_id = %target_user_id, "User blocked");

        let warning = self
            .audit_log(
                admin_id,
                AdminActionType::BlockUser,
                Some(target_user_id),
                None,
                Some(reason),
            )
            .await
            .or_else_warn();

        Ok(Moderated {
            result: block,
            warning,
        })
    }

    pub async fn unblock_user(
        &self,
        admin_id: Uuid,
        target_user_id: Uuid,
    ) -> Result<Moderated<()>, AppError> {
        self.require_admin(admin_id).await?;

        if !self.store.delete_block(target_user_id).await? {
            return Err(AppError::NotFound("User is not blocked".to_string()));
        }

        info!(admin_id = %admin_id, user_id = %target_user_id, "User unblocked");

        let warning = self
            .audit_log(
                admin_id,
                AdminActionType::UnblockUser,
                Some(target_user_id),
                None,
                None,
            )
            .await
            .or_else_warn();

        Ok(Moderated {
            result: (),
            warning,
        })
    }

    /// Deletes the event and everything that references it, in one store
    /// transaction.
    pub async fn delete_event(
        &self,
        admin_id: Uuid,
        event_id: Uuid,
        reason: &str,
    ) -> Result<Moderated<CascadeReport>, AppError> {
        self.require_admin(admin_id).await?;
        let reason = Self::required_reason(reason, "delete an event")?;

        let report = self
            .store
            .delete_event_cascade(event_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Event not found".to_string()))?;

        info!(
            admin_id = %admin_id,
            event_id = %event_id,
            registrations = report.registrations,
            payments = report.payments,
            "Event deleted"
        );
        self.feed.publish(RegistrationChange::EventDeleted { event_id });

        let warning = self
            .audit_log(
                admin_id,
                AdminActionType::DeleteEvent,
                None,
                Some(event_id),
                Some(reason),
            )
            .await
            .or_else_warn();

        Ok(Moderated {
            result: report,
            warning,
        })
    }

    pub async fn stats(&self, admin_id: Uuid) -> Result<PlatformStats, AppError> {
        self.require_admin(admin_id).await?;
        Ok(self.store.stats().await?)
    }

    pub async fn event_details(
        &self,
        admin_id: Uuid,
        event_id: Uuid,
    ) -> Result<EventDetails, AppError> {
        self.require_admin(admin_id).await?;

        let event = self
            .store
            .get_event(event_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Event not found".to_string()))?;

        let mut registrations = Vec::new();
        for registration in self.store.list_registrations(event_id).await? {
            let display_name = self
                .store
                .get_profile(registration.user_id)
                .await?
                .map(|p| p.display_name())
                .unwrap_or_else(|| "Unknown User".to_string());
            let is_blocked = self.store.find_block(registration.user_id).await?.is_some();

            registrations.push(RegistrantSummary {
                registration_id: registration.id,
                user_id: registration.user_id,
                display_name,
                status: registration.status,
                registered_at: registration.registered_at,
                is_blocked,
            });
        }

        Ok(EventDetails {
            event,
            registrations,
        })
    }

    pub async fn blocked_users(&self, admin_id: Uuid) -> Result<Vec<BlockedUser>, AppError> {
        self.require_admin(admin_id).await?;

        let mut blocked = Vec::new();
        for block in self.store.list_blocks().await? {
            let display_name = self
                .store
                .get_profile(block.user_id)
                .await?
                .map(|p| p.display_name())
                .unwrap_or_else(|| "Unknown User".to_string());
            blocked.push(BlockedUser {
                user_id: block.user_id,
                display_name,
                reason: block.reason,
                blocked_by: block.blocked_by,
                blocked_at: block.blocked_at,
            });
        }
        Ok(blocked)
    }
}
