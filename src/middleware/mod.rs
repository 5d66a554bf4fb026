use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, StatusCode},
};
use base64::{engine::general_purpose, Engine as _};
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// The acting customer, resolved from Basic auth. Identity management
/// (registration, roles) lives outside this service; this extractor only
/// answers "who is making the request" for ownership checks.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: i64,
    pub email: String,
    pub first_name: String,
    pub surname: String,
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    email: String,
    password_sha256: String,
    first_name: String,
    surname: String,
}

pub(crate) fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

// Basic Auth extractor
impl FromRequestParts<Arc<crate::AppState>> for AuthUser {
    type Rejection = StatusCode;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<crate::AppState>,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(StatusCode::UNAUTHORIZED)?;

        let encoded = auth_header
            .strip_prefix("Basic ")
            .ok_or(StatusCode::UNAUTHORIZED)?;

        let decoded = general_purpose::STANDARD
            .decode(encoded)
            .map_err(|_| StatusCode::UNAUTHORIZED)?;

        let credentials = String::from_utf8(decoded).map_err(|_| StatusCode::UNAUTHORIZED)?;

        // email:password
        let mut parts = credentials.splitn(2, ':');
        let email = parts.next().ok_or(StatusCode::UNAUTHORIZED)?;
        let password = parts.next().ok_or(StatusCode::UNAUTHORIZED)?;

        let row: Option<UserRow> = sqlx::query_as(
            "SELECT id, email, password_sha256, first_name, surname
             FROM users
             WHERE email = $1 AND is_active",
        )
        .bind(email)
        .fetch_optional(&state.db.pool)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let user = row.ok_or(StatusCode::UNAUTHORIZED)?;

        if sha256_hex(password) != user.password_sha256 {
            return Err(StatusCode::UNAUTHORIZED);
        }

        // best effort, failure here must not fail the request
        sqlx::query("UPDATE users SET last_logged_in = NOW() WHERE id = $1")
            .bind(user.id)
            .execute(&state.db.pool)
            .await
            .ok();

        Ok(AuthUser {
            user_id: user.id,
            email: user.email,
            first_name: user.first_name,
            surname: user.surname,
        })
    }
}
