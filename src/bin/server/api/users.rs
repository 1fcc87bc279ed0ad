use actix_web::{
    web::{self, ServiceConfig},
    HttpResponse,
};
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

use stiknes::{
    db::{
        conn::DbPool,
        models::{NewUser, Note, User, UserChanges},
    },
    error::Error as StiknesError,
    pagination::{Pagination, PaginationSummary},
    settings::Settings,
    utils::{hash_password, systemtime_to_iso8601},
    validate::{check_email, check_password, FieldError},
};

use super::{method_not_allowed, path_id, with_db, ErrorResponse};

pub fn config(cfg: &mut ServiceConfig) {
    cfg.service(
        web::resource("")
            .route(web::get().to(list_users))
            .route(web::post().to(create_user))
            .default_service(web::to(method_not_allowed)),
    )
    .service(
        web::resource("/{id}")
            .route(web::get().to(get_user))
            .route(web::put().to(update_user))
            .route(web::delete().to(delete_user))
            .default_service(web::to(method_not_allowed)),
    );
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    page: Option<String>,
    limit: Option<String>,
}

/// Body of create, update and register requests. Every field is optional at
/// this level so that missing fields turn into validation errors rather than
/// JSON errors.
#[derive(Debug, Deserialize)]
pub struct UserPayload {
    email: Option<String>,
    username: Option<String>,
    password: Option<String>,
}

impl UserPayload {
    /// The sign-up form hashes the trimmed password, so accounts created
    /// through it have to be checked the same way.
    pub fn trim_password(&mut self) {
        if let Some(p) = self.password.as_mut() {
            *p = p.trim().to_string();
        }
    }
}

#[derive(Debug, Serialize)]
struct NoteCount {
    notes: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UserListItem {
    id: String,
    email: String,
    username: String,
    created_at: String,
    #[serde(rename = "_count")]
    count: NoteCount,
}

#[derive(Debug, Serialize)]
struct UserList {
    users: Vec<UserListItem>,
    pagination: PaginationSummary,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OwnedNote {
    id: String,
    title: String,
    content: String,
    created_at: String,
    updated_at: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UserDetail {
    id: String,
    email: String,
    username: String,
    created_at: String,
    updated_at: String,
    notes: Vec<OwnedNote>,
}

/// What a freshly created or logged in user looks like to the client.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    id: String,
    email: String,
    username: String,
    created_at: String,
}

impl From<&User> for UserInfo {
    fn from(u: &User) -> Self {
        UserInfo {
            id: u.id.to_string(),
            email: u.email.clone(),
            username: u.username.clone(),
            created_at: systemtime_to_iso8601(&u.created_at),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UserUpdated {
    id: String,
    email: String,
    username: String,
    updated_at: String,
}

fn owned_note(n: &Note) -> OwnedNote {
    OwnedNote {
        id: n.id.to_string(),
        title: n.title.clone(),
        content: n.content.clone(),
        created_at: systemtime_to_iso8601(&n.created_at),
        updated_at: systemtime_to_iso8601(&n.updated_at),
    }
}

/// Validates a create/register request and turns it into a row to insert,
/// hashing the password on the way.
pub fn validate_new_user(payload: &UserPayload) -> Result<NewUser, ErrorResponse> {
    let mut errors: Vec<FieldError> = Vec::new();
    check_email(&mut errors, payload.email.as_deref());
    check_password(&mut errors, payload.password.as_deref());
    let username = payload.username.as_deref().map(str::trim).unwrap_or("");
    if username.is_empty() {
        errors.push(FieldError::body("username", "Username is required"));
    }
    if !errors.is_empty() {
        return Err(ErrorResponse::validation(errors));
    }

    let now = SystemTime::now();
    Ok(NewUser {
        email: payload.email.as_deref().unwrap_or("").trim().to_string(),
        username: username.to_string(),
        password: hash_password(payload.password.as_deref().unwrap_or("")),
        created_at: now,
        updated_at: now,
    })
}

/// Validates an update request. Only fields that are present are checked and
/// changed.
fn validate_user_changes(payload: &UserPayload) -> Result<UserChanges, ErrorResponse> {
    let mut errors: Vec<FieldError> = Vec::new();
    if payload.email.is_some() {
        check_email(&mut errors, payload.email.as_deref());
    }
    if payload.password.is_some() {
        check_password(&mut errors, payload.password.as_deref());
    }
    let username = payload.username.as_deref().map(str::trim);
    if username == Some("") {
        errors.push(FieldError::body("username", "Username cannot be empty"));
    }
    if !errors.is_empty() {
        return Err(ErrorResponse::validation(errors));
    }

    Ok(UserChanges {
        email: payload.email.as_deref().map(|e| e.trim().to_string()),
        username: username.map(String::from),
        password: payload.password.as_deref().map(hash_password),
        updated_at: SystemTime::now(),
    })
}

/// Maps a failed user write to a response. `duplicate_msg` is what the
/// client sees when the email is already taken, `failure_msg` is used for
/// everything that is not the client's fault.
fn user_write_error(
    e: &StiknesError,
    duplicate_msg: &str,
    failure_msg: &str,
) -> ErrorResponse {
    if e.is_not_found() {
        ErrorResponse::not_found("User not found")
    } else if e.is_unique_violation() {
        ErrorResponse::bad_request(duplicate_msg)
    } else {
        ErrorResponse::internal_server_error(failure_msg)
    }
}

/// Inserts a validated user. `duplicate_msg` is what the client sees when the
/// email is already taken.
pub async fn insert_user(
    pool: &web::Data<DbPool>,
    new_user: NewUser,
    duplicate_msg: &str,
) -> Result<User, ErrorResponse> {
    let email = new_user.email.clone();
    let user = with_db(pool, move |db| db.create_user(&new_user))
        .await
        .map_err(|e| {
            if e.is_unique_violation() {
                log::info!("Rejected user with already registered email {email}");
            }
            user_write_error(&e, duplicate_msg, "Failed to create user")
        })?;
    log::info!("Created user {} ({})", user.id, user.email);
    Ok(user)
}

/// GET /api/users
async fn list_users(
    settings: web::Data<Settings>,
    pool: web::Data<DbPool>,
    query: web::Query<ListQuery>,
) -> Result<HttpResponse, ErrorResponse> {
    let pagination = Pagination::from_query(
        query.page.as_deref(),
        query.limit.as_deref(),
        &settings.pagination,
    )
    .map_err(ErrorResponse::validation)?;

    let (offset, limit) = (pagination.offset(), pagination.limit);
    let (users, total) = with_db(&pool, move |db| db.list_users(offset, limit))
        .await
        .map_err(|_| ErrorResponse::internal_server_error("Failed to fetch users"))?;

    Ok(HttpResponse::Ok().json(UserList {
        users: users
            .iter()
            .map(|(u, n_notes)| UserListItem {
                id: u.id.to_string(),
                email: u.email.clone(),
                username: u.username.clone(),
                created_at: systemtime_to_iso8601(&u.created_at),
                count: NoteCount { notes: *n_notes },
            })
            .collect(),
        pagination: pagination.summary(total),
    }))
}

/// GET /api/users/{id}, including all of the user's notes.
async fn get_user(
    pool: web::Data<DbPool>,
    path: web::Path<String>,
) -> Result<HttpResponse, ErrorResponse> {
    let id = path_id(&path)?;

    let found = with_db(&pool, move |db| match db.get_user(id)? {
        Some(user) => {
            let notes = db.user_notes(&user)?;
            Ok(Some((user, notes)))
        }
        None => Ok(None),
    })
    .await
    .map_err(|_| ErrorResponse::internal_server_error("Failed to fetch user"))?;

    let (user, notes) = found.ok_or_else(|| ErrorResponse::not_found("User not found"))?;
    Ok(HttpResponse::Ok().json(UserDetail {
        id: user.id.to_string(),
        email: user.email.clone(),
        username: user.username.clone(),
        created_at: systemtime_to_iso8601(&user.created_at),
        updated_at: systemtime_to_iso8601(&user.updated_at),
        notes: notes.iter().map(owned_note).collect(),
    }))
}

/// POST /api/users
async fn create_user(
    pool: web::Data<DbPool>,
    payload: web::Json<UserPayload>,
) -> Result<HttpResponse, ErrorResponse> {
    let new_user = validate_new_user(&payload)?;
    let user = insert_user(&pool, new_user, "Email already exists").await?;
    Ok(HttpResponse::Created().json(UserInfo::from(&user)))
}

/// PUT /api/users/{id}
async fn update_user(
    pool: web::Data<DbPool>,
    path: web::Path<String>,
    payload: web::Json<UserPayload>,
) -> Result<HttpResponse, ErrorResponse> {
    let id = path_id(&path)?;
    let changes = validate_user_changes(&payload)?;

    let user = with_db(&pool, move |db| db.update_user(id, &changes))
        .await
        .map_err(|e| user_write_error(&e, "Email already exists", "Failed to update user"))?;

    log::info!("Updated user {}", user.id);
    Ok(HttpResponse::Ok().json(UserUpdated {
        id: user.id.to_string(),
        email: user.email,
        username: user.username,
        updated_at: systemtime_to_iso8601(&user.updated_at),
    }))
}

/// DELETE /api/users/{id}. The user's notes go with it.
async fn delete_user(
    pool: web::Data<DbPool>,
    path: web::Path<String>,
) -> Result<HttpResponse, ErrorResponse> {
    let id = path_id(&path)?;

    with_db(&pool, move |db| db.delete_user(id))
        .await
        .map_err(|e| user_write_error(&e, "Email already exists", "Failed to delete user"))?;

    log::info!("Deleted user {id}");
    Ok(HttpResponse::NoContent().finish())
}
