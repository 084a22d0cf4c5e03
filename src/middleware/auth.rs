use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    Json,
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    models::auth::{AuthenticatedUser, Claims, StaffRole},
    state::AppState,
};

/// Audience the auth provider stamps on signed-in user tokens.
pub const TOKEN_AUDIENCE: &str = "authenticated";

type Rejection = (StatusCode, Json<Value>);

fn reject(status: StatusCode, message: &str) -> Rejection {
    (status, Json(json!({ "error": message })))
}

/// Any staff member: the token must be valid and the user must hold a role.
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = Rejection;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| reject(StatusCode::UNAUTHORIZED, "Missing Authorization header"))?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or_else(|| reject(StatusCode::UNAUTHORIZED, "Invalid Authorization header format"))?;

        let claims = decode_access_token(token, &state.config.auth_jwt_secret)
            .map_err(|_| reject(StatusCode::UNAUTHORIZED, "Invalid or expired token"))?;
        let user_id: Uuid = claims
            .sub
            .parse()
            .map_err(|_| reject(StatusCode::UNAUTHORIZED, "Invalid token subject"))?;

        let role: Option<String> = sqlx::query_scalar("SELECT role FROM user_roles WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&state.db)
            .await
            .map_err(|e| {
                tracing::error!("Role lookup failed: {e}");
                reject(StatusCode::INTERNAL_SERVER_ERROR, "Role lookup failed")
            })?;

        let role: StaffRole = role
            .as_deref()
            .and_then(|r| r.parse().ok())
            .ok_or_else(|| reject(StatusCode::FORBIDDEN, "Staff access required"))?;

        Ok(AuthenticatedUser {
            user_id,
            email: claims.email,
            role,
        })
    }
}

/// Staff member holding the `admin` role.
pub struct AdminUser(pub AuthenticatedUser);

impl FromRequestParts<AppState> for AdminUser {
    type Rejection = Rejection;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let user = AuthenticatedUser::from_request_parts(parts, state).await?;
        if !user.is_admin() {
            return Err(reject(StatusCode::FORBIDDEN, "Admin access required"));
        }
        Ok(AdminUser(user))
    }
}

pub fn decode_access_token(token: &str, secret: &str) -> Result<Claims, anyhow::Error> {
    let key = DecodingKey::from_secret(secret.as_bytes());
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    validation.set_audience(&[TOKEN_AUDIENCE]);

    let data = decode::<Claims>(token, &key, &validation)?;
    Ok(data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "test-secret";

    fn token(aud: &str, exp_offset: i64, secret: &str) -> String {
        let claims = Claims {
            sub: Uuid::new_v4().to_string(),
            exp: (chrono::Utc::now().timestamp() + exp_offset) as usize,
            iat: None,
            email: Some("staff@saunafest.test".into()),
            aud: Some(aud.into()),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    #[test]
    fn accepts_valid_token() {
        let claims = decode_access_token(&token(TOKEN_AUDIENCE, 3600, SECRET), SECRET).unwrap();
        assert_eq!(claims.email.as_deref(), Some("staff@saunafest.test"));
    }

    #[test]
    fn rejects_expired_token() {
        assert!(decode_access_token(&token(TOKEN_AUDIENCE, -3600, SECRET), SECRET).is_err());
    }

    #[test]
    fn rejects_wrong_audience_or_secret() {
        assert!(decode_access_token(&token("anon", 3600, SECRET), SECRET).is_err());
        assert!(decode_access_token(&token(TOKEN_AUDIENCE, 3600, "other"), SECRET).is_err());
    }
}
