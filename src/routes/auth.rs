use axum::{
    extract::State,
    http::{header::SET_COOKIE, HeaderMap, HeaderValue, StatusCode},
    Json,
};
use axum_extra::{headers::Cookie, typed_header::TypedHeader};
use chrono::{Duration as ChronoDuration, NaiveDateTime, Utc};
use diesel::prelude::*;
use diesel::PgConnection;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::info;
use uuid::Uuid;

use crate::{
    auth::{password, AuthenticatedUser},
    error::{AppError, AppResult},
    models::{NewRefreshToken, NewUser, RefreshToken, User},
    schema::{refresh_tokens, users, users::dsl},
    state::AppState,
    utils::json::{classify_bool, classify_nullable, Nullable},
};

use crate::schema::refresh_tokens::dsl as refresh_dsl;

const REFRESH_COOKIE_NAME: &str = "refresh_token";
const MAX_USERNAME_LENGTH: usize = 150;

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub password_confirm: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub is_business: bool,
}

#[derive(Serialize)]
pub struct RegisterResponse {
    pub user: UserProfile,
    #[serde(flatten)]
    pub token: LoginResponse,
}

#[derive(Deserialize)]
pub struct ChangePasswordRequest {
    pub old_password: String,
    pub new_password: String,
}

/// Public view of a user; never carries the password hash.
#[derive(Debug, Serialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub phone_number: Option<String>,
    pub is_business: bool,
    pub is_staff: bool,
    pub created_at: NaiveDateTime,
}

impl From<User> for UserProfile {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            full_name: user.full_name,
            phone_number: user.phone_number,
            is_business: user.is_business,
            is_staff: user.is_staff,
            created_at: user.created_at,
        }
    }
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = users)]
struct UpdateProfileChangeset {
    email: Option<String>,
    full_name: Option<String>,
    phone_number: Option<Option<String>>,
    is_business: Option<bool>,
}

pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> AppResult<(StatusCode, HeaderMap, Json<RegisterResponse>)> {
    let username = payload.username.trim();
    if username.is_empty() {
        return Err(AppError::bad_request("username must not be empty"));
    }
    if username.chars().count() > MAX_USERNAME_LENGTH {
        return Err(AppError::bad_request("username is too long"));
    }
    let email = normalize_email(&payload.email)?;
    password::validate_new_password(&payload.password).map_err(AppError::bad_request)?;
    if payload.password != payload.password_confirm {
        return Err(AppError::bad_request("passwords do not match"));
    }

    let mut conn = state.db()?;

    let username_taken = dsl::users
        .filter(dsl::username.eq(username))
        .select(dsl::id)
        .first::<Uuid>(&mut conn)
        .optional()?
        .is_some();
    if username_taken {
        return Err(AppError::conflict("username already taken"));
    }
    ensure_email_available(&mut conn, &email, None)?;

    let password_hash = password::hash_password(&payload.password).map_err(AppError::internal)?;
    let new_user = NewUser {
        id: Uuid::new_v4(),
        username: username.to_string(),
        email,
        password_hash,
        full_name: payload
            .full_name
            .map(|name| name.trim().to_string())
            .unwrap_or_default(),
        phone_number: payload
            .phone_number
            .map(|phone| phone.trim().to_string())
            .filter(|phone| !phone.is_empty()),
        is_business: payload.is_business,
        is_staff: false,
    };

    diesel::insert_into(users::table)
        .values(&new_user)
        .execute(&mut conn)
        .map_err(|err| AppError::from_unique_violation(err, "username or email already taken"))?;

    let user: User = dsl::users.find(new_user.id).first(&mut conn)?;
    info!(user_id = %user.id, username = %user.username, "registered user");

    let (headers, token) = issue_tokens(&state, &mut conn, &user)?;
    Ok((
        StatusCode::CREATED,
        headers,
        Json(RegisterResponse {
            user: user.into(),
            token,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<(HeaderMap, Json<LoginResponse>)> {
    let mut conn = state.db()?;

    let user: User = dsl::users
        .filter(dsl::username.eq(&payload.username))
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::unauthorized)?;

    let valid = password::verify_password(&payload.password, &user.password_hash)
        .map_err(|_| AppError::unauthorized())?;

    if !valid {
        return Err(AppError::unauthorized());
    }

    let (headers, token) = issue_tokens(&state, &mut conn, &user)?;
    Ok((headers, Json(token)))
}

pub async fn refresh(
    State(state): State<AppState>,
    jar: Option<TypedHeader<Cookie>>,
) -> AppResult<(HeaderMap, Json<LoginResponse>)> {
    let cookies = jar.ok_or_else(AppError::unauthorized)?;
    let refresh_value = cookies
        .get(REFRESH_COOKIE_NAME)
        .ok_or_else(AppError::unauthorized)?;

    let hashed = hash_refresh_token(refresh_value);
    let mut conn = state.db()?;
    let now_naive = Utc::now().naive_utc();

    let token = match refresh_dsl::refresh_tokens
        .filter(refresh_dsl::token_hash.eq(&hashed))
        .filter(refresh_dsl::revoked_at.is_null())
        .filter(refresh_dsl::expires_at.gt(now_naive))
        .first::<RefreshToken>(&mut conn)
    {
        Ok(token) => token,
        Err(diesel::result::Error::NotFound) => return Err(AppError::unauthorized()),
        Err(err) => return Err(AppError::from(err)),
    };

    // A concurrent refresh with the same cookie may have rotated it already.
    let revoked = diesel::update(
        refresh_dsl::refresh_tokens
            .filter(refresh_dsl::id.eq(token.id))
            .filter(refresh_dsl::revoked_at.is_null()),
    )
    .set((
        refresh_dsl::revoked_at.eq(now_naive),
        refresh_dsl::updated_at.eq(now_naive),
    ))
    .execute(&mut conn)?;
    if revoked == 0 {
        return Err(AppError::unauthorized());
    }

    let user: User = dsl::users
        .find(token.user_id)
        .first(&mut conn)
        .map_err(AppError::from)?;

    let (headers, token) = issue_tokens(&state, &mut conn, &user)?;
    Ok((headers, Json(token)))
}

pub async fn logout(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    jar: Option<TypedHeader<Cookie>>,
) -> AppResult<(HeaderMap, StatusCode)> {
    let mut conn = state.db()?;
    let now = Utc::now().naive_utc();
    let mut rows_affected = 0;

    if let Some(cookies) = jar {
        if let Some(value) = cookies.get(REFRESH_COOKIE_NAME) {
            let hashed = hash_refresh_token(value);
            rows_affected = diesel::update(
                refresh_dsl::refresh_tokens
                    .filter(refresh_dsl::token_hash.eq(hashed))
                    .filter(refresh_dsl::user_id.eq(user.user_id))
                    .filter(refresh_dsl::revoked_at.is_null()),
            )
            .set((
                refresh_dsl::revoked_at.eq(now),
                refresh_dsl::updated_at.eq(now),
            ))
            .execute(&mut conn)?;
        }
    }

    if rows_affected == 0 {
        revoke_all_refresh_tokens(&mut conn, user.user_id)?;
    }

    let mut headers = HeaderMap::new();
    headers.insert(SET_COOKIE, build_clear_refresh_cookie(&state)?);
    Ok((headers, StatusCode::NO_CONTENT))
}

pub async fn me(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<UserProfile>> {
    let mut conn = state.db()?;
    let record: User = dsl::users.find(user.user_id).first(&mut conn)?;
    Ok(Json(record.into()))
}

pub async fn update_me(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(body): Json<Value>,
) -> AppResult<Json<UserProfile>> {
    let mut conn = state.db()?;
    let existing: User = dsl::users.find(user.user_id).first(&mut conn)?;

    let mut changeset = UpdateProfileChangeset::default();
    let mut changed = false;

    match classify_nullable(body.get("full_name")).map_err(AppError::bad_request)? {
        Nullable::Omitted => {}
        Nullable::Null => {
            changeset.full_name = Some(String::new());
            changed = true;
        }
        Nullable::Value(value) => {
            changeset.full_name = Some(value.trim().to_string());
            changed = true;
        }
    }

    match classify_nullable(body.get("email")).map_err(AppError::bad_request)? {
        Nullable::Omitted => {}
        Nullable::Null => return Err(AppError::bad_request("email cannot be null")),
        Nullable::Value(value) => {
            let email = normalize_email(&value)?;
            if email != existing.email {
                ensure_email_available(&mut conn, &email, Some(existing.id))?;
                changeset.email = Some(email);
                changed = true;
            }
        }
    }

    match classify_nullable(body.get("phone_number")).map_err(AppError::bad_request)? {
        Nullable::Omitted => {}
        Nullable::Null => {
            changeset.phone_number = Some(None);
            changed = true;
        }
        Nullable::Value(value) => {
            let trimmed = value.trim();
            changeset.phone_number = Some((!trimmed.is_empty()).then(|| trimmed.to_string()));
            changed = true;
        }
    }

    if let Some(flag) = classify_bool(body.get("is_business")).map_err(AppError::bad_request)? {
        changeset.is_business = Some(flag);
        changed = true;
    }

    if !changed {
        return Ok(Json(existing.into()));
    }

    diesel::update(dsl::users.find(existing.id))
        .set(&changeset)
        .execute(&mut conn)
        .map_err(|err| AppError::from_unique_violation(err, "email already in use"))?;

    let updated: User = dsl::users.find(existing.id).first(&mut conn)?;
    Ok(Json(updated.into()))
}

pub async fn change_password(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<ChangePasswordRequest>,
) -> AppResult<(HeaderMap, StatusCode)> {
    let mut conn = state.db()?;
    let existing: User = dsl::users.find(user.user_id).first(&mut conn)?;

    let valid = password::verify_password(&payload.old_password, &existing.password_hash)
        .map_err(AppError::internal)?;
    if !valid {
        return Err(AppError::bad_request("old password is incorrect"));
    }
    password::validate_new_password(&payload.new_password).map_err(AppError::bad_request)?;

    let password_hash =
        password::hash_password(&payload.new_password).map_err(AppError::internal)?;
    diesel::update(dsl::users.find(existing.id))
        .set(dsl::password_hash.eq(password_hash))
        .execute(&mut conn)?;
    revoke_all_refresh_tokens(&mut conn, existing.id)?;

    info!(user_id = %existing.id, "password changed");

    let mut headers = HeaderMap::new();
    headers.insert(SET_COOKIE, build_clear_refresh_cookie(&state)?);
    Ok((headers, StatusCode::NO_CONTENT))
}

/// Creates an access token and a fresh refresh token for `user`.
fn issue_tokens(
    state: &AppState,
    conn: &mut PgConnection,
    user: &User,
) -> AppResult<(HeaderMap, LoginResponse)> {
    let access_token = state
        .jwt
        .generate_token(user.id, &user.username, user.is_staff)
        .map_err(AppError::internal)?;

    let now = Utc::now();
    let refresh_value = generate_refresh_token();
    let refresh_expires_at = now + ChronoDuration::days(state.config.refresh_token_expiry_days);

    let new_refresh = NewRefreshToken {
        id: Uuid::new_v4(),
        user_id: user.id,
        token_hash: hash_refresh_token(&refresh_value),
        issued_at: now.naive_utc(),
        expires_at: refresh_expires_at.naive_utc(),
    };

    diesel::insert_into(refresh_tokens::table)
        .values(&new_refresh)
        .execute(conn)?;

    let mut headers = HeaderMap::new();
    headers.insert(
        SET_COOKIE,
        build_refresh_cookie(state, &refresh_value, refresh_expires_at)?,
    );

    Ok((
        headers,
        LoginResponse {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: state.config.jwt_expiry_minutes * 60,
        },
    ))
}

fn revoke_all_refresh_tokens(conn: &mut PgConnection, user_id: Uuid) -> AppResult<usize> {
    let now = Utc::now().naive_utc();
    Ok(diesel::update(
        refresh_dsl::refresh_tokens
            .filter(refresh_dsl::user_id.eq(user_id))
            .filter(refresh_dsl::revoked_at.is_null()),
    )
    .set((
        refresh_dsl::revoked_at.eq(now),
        refresh_dsl::updated_at.eq(now),
    ))
    .execute(conn)?)
}

fn ensure_email_available(
    conn: &mut PgConnection,
    email: &str,
    except: Option<Uuid>,
) -> AppResult<()> {
    let mut query = dsl::users
        .filter(dsl::email.eq(email))
        .select(dsl::id)
        .into_boxed();
    if let Some(id) = except {
        query = query.filter(dsl::id.ne(id));
    }
    if query.first::<Uuid>(conn).optional()?.is_some() {
        return Err(AppError::conflict("email already in use"));
    }
    Ok(())
}

/// Lowercases the domain part and checks the address has a plausible shape.
fn normalize_email(raw: &str) -> AppResult<String> {
    let trimmed = raw.trim();
    let invalid = || AppError::bad_request("enter a valid email address");

    let (local, domain) = trimmed.rsplit_once('@').ok_or_else(invalid)?;
    let well_formed = !local.is_empty()
        && !domain.is_empty()
        && !local.contains('@')
        && !trimmed.chars().any(char::is_whitespace)
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.');
    if !well_formed {
        return Err(invalid());
    }
    Ok(format!("{local}@{}", domain.to_lowercase()))
}

fn hash_refresh_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

fn generate_refresh_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn build_refresh_cookie(
    state: &AppState,
    token: &str,
    expires_at: chrono::DateTime<Utc>,
) -> AppResult<HeaderValue> {
    let max_age = ChronoDuration::days(state.config.refresh_token_expiry_days).num_seconds();

    let mut parts = vec![format!("{}={}", REFRESH_COOKIE_NAME, token)];
    parts.push("Path=/".into());
    parts.push("HttpOnly".into());
    parts.push("SameSite=Strict".into());
    parts.push(format!("Max-Age={}", max_age));
    parts.push(format!("Expires={}", expires_at.to_rfc2822()));
    push_cookie_scope(state, &mut parts);

    HeaderValue::from_str(&parts.join("; ")).map_err(AppError::internal)
}

fn build_clear_refresh_cookie(state: &AppState) -> AppResult<HeaderValue> {
    let mut parts = vec![format!("{}=", REFRESH_COOKIE_NAME)];
    parts.push("Path=/".into());
    parts.push("HttpOnly".into());
    parts.push("SameSite=Strict".into());
    parts.push("Max-Age=0".into());
    parts.push("Expires=Thu, 01 Jan 1970 00:00:00 GMT".into());
    push_cookie_scope(state, &mut parts);

    HeaderValue::from_str(&parts.join("; ")).map_err(AppError::internal)
}

fn push_cookie_scope(state: &AppState, parts: &mut Vec<String>) {
    if state.config.refresh_cookie_secure {
        parts.push("Secure".into());
    }
    if let Some(domain) = &state.config.refresh_cookie_domain {
        parts.push(format!("Domain={}", domain));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_domain_is_lowercased() {
        assert_eq!(
            normalize_email("  Jane.Doe@Example.COM ").unwrap(),
            "Jane.Doe@example.com"
        );
    }

    #[test]
    fn malformed_emails_are_rejected() {
        for raw in ["", "jane", "jane@", "@example.com", "jane@localhost", "ja ne@example.com", "a@b@c.com", "jane@.com"] {
            assert!(normalize_email(raw).is_err(), "{raw}");
        }
    }

    #[test]
    fn refresh_tokens_are_random_and_hashed() {
        let first = generate_refresh_token();
        let second = generate_refresh_token();
        assert_eq!(first.len(), 64);
        assert_ne!(first, second);
        assert_eq!(hash_refresh_token(&first), hash_refresh_token(&first));
        assert_ne!(hash_refresh_token(&first), first);
    }
}
