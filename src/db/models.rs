use diesel::prelude::{
    AsChangeset, Associations, Identifiable, Insertable, Queryable, Selectable,
};
use std::time::SystemTime;

/// A full user row, including the password hash. Never serialize this one
/// directly, the API layer picks the fields it exposes.
#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = crate::db::schema::users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct User {
    pub id: i64,
    pub email: String,
    pub username: String,
    pub password: String,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
}

/// The public part of a user that gets embedded in note responses.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::db::schema::users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct UserSummary {
    pub id: i64,
    pub email: String,
    pub username: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::db::schema::users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NewUser {
    pub email: String,
    pub username: String,
    pub password: String,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
}

/// Partial update of a user. Fields left as `None` are not touched.
#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = crate::db::schema::users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct UserChanges {
    pub email: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub updated_at: SystemTime,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Associations)]
#[diesel(belongs_to(User))]
#[diesel(table_name = crate::db::schema::notes)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Note {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub user_id: i64,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::db::schema::notes)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NewNote {
    pub title: String,
    pub content: String,
    pub user_id: i64,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
}

/// Partial update of a note. Fields left as `None` are not touched.
#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = crate::db::schema::notes)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NoteChanges {
    pub title: Option<String>,
    pub content: Option<String>,
    pub user_id: Option<i64>,
    pub updated_at: SystemTime,
}
