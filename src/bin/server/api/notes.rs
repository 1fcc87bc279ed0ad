use actix_web::{
    web::{self, ServiceConfig},
    HttpResponse,
};
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

use stiknes::{
    db::{
        conn::DbPool,
        models::{NewNote, Note, NoteChanges, UserSummary},
    },
    error::Error as StiknesError,
    pagination::{Pagination, PaginationSummary},
    settings::Settings,
    utils::systemtime_to_iso8601,
    validate::{parse_id, parse_id_value, FieldError, Location},
};

use super::{method_not_allowed, path_id, with_db, ErrorResponse};

pub fn config(cfg: &mut ServiceConfig) {
    cfg.service(
        web::resource("")
            .route(web::get().to(list_notes))
            .route(web::post().to(create_note))
            .default_service(web::to(method_not_allowed)),
    )
    .service(
        web::resource("/{id}")
            .route(web::get().to(get_note))
            .route(web::put().to(update_note))
            .route(web::delete().to(delete_note))
            .default_service(web::to(method_not_allowed)),
    );
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    page: Option<String>,
    limit: Option<String>,
    #[serde(rename = "userId")]
    user_id: Option<String>,
}

/// Body of create and update requests. `userId` may be sent either as a
/// number or as a string of digits, since ids are rendered as strings.
#[derive(Debug, Deserialize)]
struct NotePayload {
    title: Option<String>,
    content: Option<String>,
    #[serde(rename = "userId")]
    user_id: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct NoteOwner {
    id: String,
    email: String,
    username: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NoteResponse {
    id: String,
    title: String,
    content: String,
    user_id: String,
    created_at: String,
    updated_at: String,
    user: NoteOwner,
}

impl NoteResponse {
    fn new(note: Note, owner: UserSummary) -> Self {
        NoteResponse {
            id: note.id.to_string(),
            title: note.title,
            content: note.content,
            user_id: note.user_id.to_string(),
            created_at: systemtime_to_iso8601(&note.created_at),
            updated_at: systemtime_to_iso8601(&note.updated_at),
            user: NoteOwner {
                id: owner.id.to_string(),
                email: owner.email,
                username: owner.username,
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct NoteList {
    notes: Vec<NoteResponse>,
    pagination: PaginationSummary,
}

const USER_ID_MSG: &str = "Valid user ID is required";

fn validate_new_note(payload: &NotePayload) -> Result<NewNote, ErrorResponse> {
    let mut errors: Vec<FieldError> = Vec::new();
    let title = payload.title.as_deref().unwrap_or("");
    if title.trim().is_empty() {
        errors.push(FieldError::body("title", "Title is required"));
    }
    let user_id = payload.user_id.as_ref().and_then(parse_id_value);
    if user_id.is_none() {
        errors.push(FieldError::body("userId", USER_ID_MSG));
    }
    let Some(user_id) = user_id.filter(|_| errors.is_empty()) else {
        return Err(ErrorResponse::validation(errors));
    };

    let now = SystemTime::now();
    Ok(NewNote {
        title: title.to_string(),
        content: payload.content.clone().unwrap_or_default(),
        user_id,
        created_at: now,
        updated_at: now,
    })
}

fn validate_note_changes(payload: &NotePayload) -> Result<NoteChanges, ErrorResponse> {
    let mut errors: Vec<FieldError> = Vec::new();
    if let Some(title) = payload.title.as_deref() {
        if title.trim().is_empty() {
            errors.push(FieldError::body("title", "Title cannot be empty"));
        }
    }
    let user_id = match payload.user_id.as_ref() {
        Some(v) => {
            let parsed = parse_id_value(v);
            if parsed.is_none() {
                errors.push(FieldError::body("userId", USER_ID_MSG));
            }
            parsed
        }
        None => None,
    };
    if !errors.is_empty() {
        return Err(ErrorResponse::validation(errors));
    }

    Ok(NoteChanges {
        title: payload.title.clone(),
        content: payload.content.clone(),
        user_id,
        updated_at: SystemTime::now(),
    })
}

/// Maps a failed note write to a response. A foreign key violation means
/// the owner was deleted between the existence check and the write.
fn note_write_error(e: &StiknesError, failure_msg: &str) -> ErrorResponse {
    if e.is_not_found() {
        ErrorResponse::not_found("Note not found")
    } else if e.is_foreign_key_violation() {
        ErrorResponse::bad_request("User not found")
    } else {
        ErrorResponse::internal_server_error(failure_msg)
    }
}

/// GET /api/notes, optionally restricted to one owner with `?userId=`.
async fn list_notes(
    settings: web::Data<Settings>,
    pool: web::Data<DbPool>,
    query: web::Query<ListQuery>,
) -> Result<HttpResponse, ErrorResponse> {
    let pagination = Pagination::from_query(
        query.page.as_deref(),
        query.limit.as_deref(),
        &settings.pagination,
    );
    let owner = match query.user_id.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => parse_id(raw).map(Some).ok_or_else(|| {
            FieldError::new(Location::Query, "userId", "userId must be a valid id")
        }),
    };
    let (pagination, owner) = match (pagination, owner) {
        (Ok(p), Ok(o)) => (p, o),
        (p, o) => {
            let mut errors = p.err().unwrap_or_default();
            errors.extend(o.err());
            return Err(ErrorResponse::validation(errors));
        }
    };

    let (offset, limit) = (pagination.offset(), pagination.limit);
    let (notes, total) = with_db(&pool, move |db| db.list_notes(owner, offset, limit))
        .await
        .map_err(|_| ErrorResponse::internal_server_error("Failed to fetch notes"))?;

    Ok(HttpResponse::Ok().json(NoteList {
        notes: notes
            .into_iter()
            .map(|(note, owner)| NoteResponse::new(note, owner))
            .collect(),
        pagination: pagination.summary(total),
    }))
}

/// GET /api/notes/{id}
async fn get_note(
    pool: web::Data<DbPool>,
    path: web::Path<String>,
) -> Result<HttpResponse, ErrorResponse> {
    let id = path_id(&path)?;

    let (note, owner) = with_db(&pool, move |db| db.get_note(id))
        .await
        .map_err(|_| ErrorResponse::internal_server_error("Failed to fetch note"))?
        .ok_or_else(|| ErrorResponse::not_found("Note not found"))?;

    Ok(HttpResponse::Ok().json(NoteResponse::new(note, owner)))
}

/// POST /api/notes. The owner has to exist.
async fn create_note(
    pool: web::Data<DbPool>,
    payload: web::Json<NotePayload>,
) -> Result<HttpResponse, ErrorResponse> {
    let new_note = validate_new_note(&payload)?;

    // None when the owner does not exist
    let created = with_db(&pool, move |db| {
        if !db.user_exists(new_note.user_id)? {
            return Ok(None);
        }
        db.create_note(&new_note).map(Some)
    })
    .await
    .map_err(|e| note_write_error(&e, "Failed to create note"))?;

    let (note, owner) = created.ok_or_else(|| ErrorResponse::bad_request("User not found"))?;
    log::info!("Created note {} for user {}", note.id, note.user_id);
    Ok(HttpResponse::Created().json(NoteResponse::new(note, owner)))
}

/// PUT /api/notes/{id}. Moving a note to another owner requires that owner
/// to exist.
async fn update_note(
    pool: web::Data<DbPool>,
    path: web::Path<String>,
    payload: web::Json<NotePayload>,
) -> Result<HttpResponse, ErrorResponse> {
    let id = path_id(&path)?;
    let changes = validate_note_changes(&payload)?;

    // None when the new owner does not exist
    let updated = with_db(&pool, move |db| {
        if let Some(uid) = changes.user_id {
            if !db.user_exists(uid)? {
                return Ok(None);
            }
        }
        db.update_note(id, &changes).map(Some)
    })
    .await
    .map_err(|e| note_write_error(&e, "Failed to update note"))?;

    let (note, owner) = updated.ok_or_else(|| ErrorResponse::bad_request("User not found"))?;
    log::info!("Updated note {}", note.id);
    Ok(HttpResponse::Ok().json(NoteResponse::new(note, owner)))
}

/// DELETE /api/notes/{id}
async fn delete_note(
    pool: web::Data<DbPool>,
    path: web::Path<String>,
) -> Result<HttpResponse, ErrorResponse> {
    let id = path_id(&path)?;

    with_db(&pool, move |db| db.delete_note(id))
        .await
        .map_err(|e| note_write_error(&e, "Failed to delete note"))?;

    log::info!("Deleted note {id}");
    Ok(HttpResponse::NoContent().finish())
}
