use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::models::{Profile, Role};
use crate::store::SharedStore;
use crate::utils::error::AppError;

/// Keeps a profile row behind every authenticated identity.
pub struct ProfileService {
    store: SharedStore,
}

impl ProfileService {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Returns the caller's profile, creating an ordinary `user` row on first
    /// sight. Roles already stored are left alone.
    pub async fn ensure_member(&self, user_id: Uuid, email: &str) -> Result<Profile, AppError> {
        if let Some(profile) = self.store.get_profile(user_id).await? {
            return Ok(profile);
        }

        let username = email
            .split_once('@')
            .map(|(local, _)| local)
            .unwrap_or(email)
            .trim();
        let candidate = Profile {
            id: user_id,
            username: (!username.is_empty()).then(|| username.to_string()),
            full_name: None,
            role: Role::User,
            created_at: Utc::now(),
        };

        let profile = self.store.ensure_profile(&candidate).await?;
        info!(user_id = %user_id, "Profile ready on first sign-in");
        Ok(profile)
    }

    /// Grants `admin` to `user_id`, creating the profile when needed.
    pub async fn bootstrap_admin(&self, user_id: Uuid) -> Result<Profile, AppError> {
        let candidate = Profile {
            id: user_id,
            username: Some("admin".to_string()),
            full_name: None,
            role: Role::Admin,
            created_at: Utc::now(),
        };

        let mut profile = self.store.ensure_profile(&candidate).await?;
        if !profile.is_admin() {
            self.store.set_role(user_id, Role::Admin).await?;
            profile.role = Role::Admin;
        }
        info!(user_id = %user_id, "Bootstrap admin ready");
        Ok(profile)
    }
}
