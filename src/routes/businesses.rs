use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use url::Url;
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::models::{Business, NewBusiness};
use crate::schema::businesses;
use crate::state::AppState;
use crate::utils::json::{classify_nullable, classify_nullable_object, non_blank, Nullable};

const MAX_NAME_LENGTH: usize = 255;
const MAX_HANDLE_LENGTH: usize = 255;
const MAX_WEBSITE_LENGTH: usize = 200;

/// Fields a client may set on creation. Anything else in the body, including
/// `owner` and `is_verified`, is ignored.
#[derive(Deserialize)]
pub struct CreateBusinessRequest {
    pub business_name: String,
    pub description: Option<String>,
    pub instagram_handle: Option<String>,
    pub website: Option<String>,
    pub niche: Option<String>,
    pub integrations: Option<Value>,
}

#[derive(Deserialize, Default)]
pub struct ListBusinessesQuery {
    #[serde(default)]
    pub mine: bool,
}

#[derive(Deserialize)]
pub struct VerifyBusinessRequest {
    pub is_verified: bool,
}

#[derive(Debug, Serialize)]
pub struct BusinessResponse {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub business_name: String,
    pub description: Option<String>,
    pub instagram_handle: Option<String>,
    pub website: Option<String>,
    pub niche: Option<String>,
    pub integrations: Option<Value>,
    pub is_verified: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl From<Business> for BusinessResponse {
    fn from(business: Business) -> Self {
        Self {
            id: business.id,
            owner_id: business.owner_id,
            business_name: business.business_name,
            description: business.description,
            instagram_handle: business.instagram_handle,
            website: business.website,
            niche: business.niche,
            integrations: business.integrations,
            is_verified: business.is_verified,
            created_at: business.created_at,
            updated_at: business.updated_at,
        }
    }
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = businesses)]
struct UpdateBusinessChangeset {
    business_name: Option<String>,
    description: Option<Option<String>>,
    instagram_handle: Option<Option<String>>,
    website: Option<Option<String>>,
    niche: Option<Option<String>>,
    integrations: Option<Option<Value>>,
}

impl UpdateBusinessChangeset {
    fn is_empty(&self) -> bool {
        self.business_name.is_none()
            && self.description.is_none()
            && self.instagram_handle.is_none()
            && self.website.is_none()
            && self.niche.is_none()
            && self.integrations.is_none()
    }
}

pub async fn list_businesses(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(params): Query<ListBusinessesQuery>,
) -> AppResult<Json<Vec<BusinessResponse>>> {
    let mut conn = state.db()?;

    let mut query = businesses::table
        .order((businesses::business_name.asc(), businesses::created_at.asc()))
        .into_boxed();
    if params.mine {
        query = query.filter(businesses::owner_id.eq(user.user_id));
    }

    let rows: Vec<Business> = query.load(&mut conn)?;
    Ok(Json(rows.into_iter().map(BusinessResponse::from).collect()))
}

pub async fn create_business(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateBusinessRequest>,
) -> AppResult<(StatusCode, Json<BusinessResponse>)> {
    let business_name = validate_name(&payload.business_name)?;
    let instagram_handle = non_blank(payload.instagram_handle)
        .map(|handle| validate_handle(&handle))
        .transpose()?;
    let website = non_blank(payload.website)
        .map(|site| validate_website(&site))
        .transpose()?;
    let integrations = match payload.integrations {
        None | Some(Value::Null) => None,
        Some(Value::Object(map)) => Some(Value::Object(map)),
        Some(other) => {
            return Err(AppError::bad_request(format!(
                "integrations must be an object, got {other}"
            )))
        }
    };

    let mut conn = state.db()?;

    let already_owns = businesses::table
        .filter(businesses::owner_id.eq(user.user_id))
        .select(businesses::id)
        .first::<Uuid>(&mut conn)
        .optional()?
        .is_some();
    if already_owns {
        return Err(AppError::conflict("user already owns a business"));
    }

    let new_business = NewBusiness {
        id: Uuid::new_v4(),
        owner_id: user.user_id,
        business_name,
        description: non_blank(payload.description),
        instagram_handle,
        website,
        niche: non_blank(payload.niche),
        integrations,
    };

    diesel::insert_into(businesses::table)
        .values(&new_business)
        .execute(&mut conn)
        .map_err(|err| AppError::from_unique_violation(err, "user already owns a business"))?;

    let business: Business = businesses::table.find(new_business.id).first(&mut conn)?;
    info!(
        business_id = %business.id,
        owner_id = %business.owner_id,
        "created business"
    );

    Ok((StatusCode::CREATED, Json(business.into())))
}

pub async fn get_business(
    State(state): State<AppState>,
    Path(business_id): Path<Uuid>,
) -> AppResult<Json<BusinessResponse>> {
    let mut conn = state.db()?;
    let business: Business = businesses::table.find(business_id).first(&mut conn)?;
    Ok(Json(business.into()))
}

pub async fn update_business(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(business_id): Path<Uuid>,
    Json(body): Json<Value>,
) -> AppResult<Json<BusinessResponse>> {
    let mut conn = state.db()?;
    let existing: Business = businesses::table.find(business_id).first(&mut conn)?;
    ensure_can_manage(&user, &existing)?;

    let mut changeset = UpdateBusinessChangeset::default();

    match classify_nullable(body.get("business_name")).map_err(AppError::bad_request)? {
        Nullable::Omitted => {}
        Nullable::Null => return Err(AppError::bad_request("business_name cannot be null")),
        Nullable::Value(value) => {
            let name = validate_name(&value)?;
            if name != existing.business_name {
                changeset.business_name = Some(name);
            }
        }
    }

    changeset.description = optional_text(&body, "description", Ok)?;
    changeset.niche = optional_text(&body, "niche", Ok)?;
    changeset.instagram_handle = optional_text(&body, "instagram_handle", |v| validate_handle(&v))?;
    changeset.website = optional_text(&body, "website", |v| validate_website(&v))?;

    changeset.integrations =
        match classify_nullable_object(body.get("integrations")).map_err(AppError::bad_request)? {
            Nullable::Omitted => None,
            Nullable::Null => Some(None),
            Nullable::Value(map) => Some(Some(Value::Object(map))),
        };

    if changeset.is_empty() {
        return Ok(Json(existing.into()));
    }

    diesel::update(businesses::table.find(business_id))
        .set(&changeset)
        .execute(&mut conn)?;

    let updated: Business = businesses::table.find(business_id).first(&mut conn)?;
    Ok(Json(updated.into()))
}

pub async fn delete_business(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(business_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    let existing: Business = businesses::table.find(business_id).first(&mut conn)?;
    ensure_can_manage(&user, &existing)?;

    diesel::delete(businesses::table.find(business_id)).execute(&mut conn)?;
    info!(business_id = %business_id, deleted_by = %user.user_id, "deleted business");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn verify_business(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(business_id): Path<Uuid>,
    Json(payload): Json<VerifyBusinessRequest>,
) -> AppResult<Json<BusinessResponse>> {
    if !user.is_staff {
        return Err(AppError::forbidden("only staff can verify businesses"));
    }

    let mut conn = state.db()?;
    let updated = diesel::update(businesses::table.find(business_id))
        .set(businesses::is_verified.eq(payload.is_verified))
        .execute(&mut conn)?;
    if updated == 0 {
        return Err(AppError::not_found());
    }

    let business: Business = businesses::table.find(business_id).first(&mut conn)?;
    info!(
        business_id = %business.id,
        is_verified = business.is_verified,
        "updated business verification"
    );
    Ok(Json(business.into()))
}

fn ensure_can_manage(user: &AuthenticatedUser, business: &Business) -> AppResult<()> {
    if user.is_staff || business.owner_id == user.user_id {
        Ok(())
    } else {
        Err(AppError::forbidden("only the owner can modify this business"))
    }
}

/// Reads an optional text field for PATCH: omitted leaves it alone, `null` or a
/// blank string clears it, anything else goes through `validate`.
fn optional_text<F>(body: &Value, field: &str, validate: F) -> AppResult<Option<Option<String>>>
where
    F: FnOnce(String) -> AppResult<String>,
{
    match classify_nullable(body.get(field))
        .map_err(|err| AppError::bad_request(format!("{field}: {err}")))?
    {
        Nullable::Omitted => Ok(None),
        Nullable::Null => Ok(Some(None)),
        Nullable::Value(value) => match non_blank(Some(value)) {
            None => Ok(Some(None)),
            Some(value) => Ok(Some(Some(validate(value)?))),
        },
    }
}

fn validate_name(raw: &str) -> AppResult<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(AppError::bad_request("business_name must not be empty"));
    }
    if name.chars().count() > MAX_NAME_LENGTH {
        return Err(AppError::bad_request("business_name is too long"));
    }
    Ok(name.to_string())
}

fn validate_handle(raw: &str) -> AppResult<String> {
    if raw.chars().count() > MAX_HANDLE_LENGTH {
        return Err(AppError::bad_request("instagram_handle is too long"));
    }
    Ok(raw.to_string())
}

fn validate_website(raw: &str) -> AppResult<String> {
    if raw.chars().count() > MAX_WEBSITE_LENGTH {
        return Err(AppError::bad_request("website is too long"));
    }
    let parsed = Url::parse(raw).map_err(|_| AppError::bad_request("enter a valid URL"))?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(AppError::bad_request("enter a valid URL"));
    }
    Ok(raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn websites_must_be_absolute_http_urls() {
        assert!(validate_website("https://shop.example.com/about").is_ok());
        assert!(validate_website("http://localhost:8000").is_ok());
        for bad in ["shop.example.com", "ftp://files.example.com", "https://", "not a url"] {
            assert!(validate_website(bad).is_err(), "{bad}");
        }
        let long = format!("https://example.com/{}", "a".repeat(MAX_WEBSITE_LENGTH));
        assert!(validate_website(&long).is_err());
    }

    #[test]
    fn names_are_trimmed_and_required() {
        assert_eq!(validate_name("  Gadget Hub ").unwrap(), "Gadget Hub");
        assert!(validate_name("   ").is_err());
    }

    #[test]
    fn optional_text_clears_on_null_or_blank() {
        let body = json!({ "niche": null, "description": "  ", "website": "https://a.test" });
        assert_eq!(optional_text(&body, "niche", Ok).unwrap(), Some(None));
        assert_eq!(optional_text(&body, "description", Ok).unwrap(), Some(None));
        assert_eq!(optional_text(&body, "instagram_handle", Ok).unwrap(), None);
        assert_eq!(
            optional_text(&body, "website", |v| validate_website(&v)).unwrap(),
            Some(Some("https://a.test".to_string()))
        );
        assert!(optional_text(&json!({ "niche": 5 }), "niche", Ok).is_err());
    }

    #[test]
    fn staff_and_owner_can_manage() {
        let owner = Uuid::new_v4();
        let business = Business {
            id: Uuid::new_v4(),
            owner_id: owner,
            business_name: "Shop".into(),
            description: None,
            instagram_handle: None,
            website: None,
            niche: None,
            integrations: None,
            is_verified: false,
            created_at: chrono::Utc::now().naive_utc(),
            updated_at: chrono::Utc::now().naive_utc(),
        };
        let as_user = |user_id, is_staff| AuthenticatedUser {
            user_id,
            username: "u".into(),
            is_staff,
        };

        assert!(ensure_can_manage(&as_user(owner, false), &business).is_ok());
        assert!(ensure_can_manage(&as_user(Uuid::new_v4(), true), &business).is_ok());
        assert!(ensure_can_manage(&as_user(Uuid::new_v4(), false), &business).is_err());
    }
}
