use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::AppState;
use crate::utils::error::AppError;

/// Claims issued by the identity provider.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub exp: usize,
}

/// The authenticated caller. Roles are never read from the token; a
/// profile row exists for every extracted caller.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub email: String,
}

pub fn verify_token(token: &str, secret: &str) -> Result<AuthUser, AppError> {
    let key = DecodingKey::from_secret(secret.as_bytes());
    let claims = decode::<Claims>(token, &key, &Validation::new(Algorithm::HS256))
        .map_err(|e| AppError::AuthError(format!("invalid token: {}", e)))?
        .claims;

    let user_id = Uuid::parse_str(&claims.sub)
        .map_err(|_| AppError::AuthError("token subject is not a user id".to_string()))?;

    Ok(AuthUser {
        user_id,
        email: claims.email,
    })
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "))
            .ok_or_else(|| AppError::AuthError("missing bearer token".to_string()))?;

        let user = verify_token(token.trim(), &state.config.jwt_secret)?;
        state.profiles.ensure_member(user.user_id, &user.email).await?;
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::token_for;

    #[test]
    fn test_valid_token_yields_user_and_email() {
        let user_id = Uuid::new_v4();
        let token = token_for("secret", user_id, "ada@example.org");

        let user = verify_token(&token, "secret").unwrap();

        assert_eq!(user.user_id, user_id);
        assert_eq!(user.email, "ada@example.org");
    }

    #[test]
    fn test_wrong_secret_or_garbage_is_rejected() {
        let token = token_for("secret", Uuid::new_v4(), "ada@example.org");

        assert!(matches!(verify_token(&token, "other"), Err(AppError::AuthError(_))));
        assert!(matches!(verify_token("not.a.jwt", "secret"), Err(AppError::AuthError(_))));
    }
}
