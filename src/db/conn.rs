// Connection and query utilities

use diesel::{
    self,
    connection::SimpleConnection,
    r2d2::{ConnectionManager, Pool, PooledConnection},
    BelongingToDsl, Connection, ExpressionMethods, OptionalExtension, PgConnection, QueryDsl,
    RunQueryDsl, SelectableHelper,
};
use std::collections::HashMap;
use std::time::Duration;

use crate::{
    db::models::{NewNote, NewUser, Note, NoteChanges, User, UserChanges, UserSummary},
    error::Error,
    settings::Settings,
};

/// SQL that creates the tables if they are missing. Kept in sync with
/// `schema.rs`.
const SCHEMA_SQL: &str =
    include_str!("../../migrations/2025-06-01-000000_create_users_and_notes/up.sql");

pub type DbPool = Pool<ConnectionManager<PgConnection>>;

pub struct DatabaseConnection {
    pub conn: PooledConnection<ConnectionManager<PgConnection>>,
}

/// Converts a diesel error into our error type, logging it on the way. Errors
/// that the API layer turns into 4xx responses are only logged at debug level.
fn db_error(context: &str, e: diesel::result::Error) -> Error {
    let err = Error::from(e);
    if err.is_not_found() || err.is_unique_violation() || err.is_foreign_key_violation() {
        log::debug!("{context}: {err}");
    } else {
        log::error!("{context}: {err}");
    }
    err
}

fn pool_builder(s: &Settings) -> diesel::r2d2::Builder<ConnectionManager<PgConnection>> {
    Pool::builder()
        .max_size(s.postgres.pool_size)
        .connection_timeout(Duration::from_secs(u64::from(
            s.postgres.connect_timeout_seconds,
        )))
}

/// Creates the connection pool shared by the API workers. Connections are
/// opened on demand, so this succeeds even while the database is down.
pub fn build_pool(s: &Settings) -> DbPool {
    log::debug!(
        "Creating a pool of up to {} connections to postgres database {} at {}:{} as {}",
        s.postgres.pool_size,
        s.postgres.dbname,
        s.postgres.host,
        s.postgres.port,
        s.postgres.user
    );
    pool_builder(s)
        .min_idle(Some(0))
        .build_unchecked(ConnectionManager::new(s.postgres.connection_string()))
}

impl DatabaseConnection {
    /// Connects to the database using the postgres settings. Meant for
    /// one-off tools; the server takes its connections from a [`DbPool`].
    pub fn connect(s: &Settings) -> Result<Self, Error> {
        log::debug!(
            "Connecting to postgres database {} at {}:{} as {}",
            s.postgres.dbname,
            s.postgres.host,
            s.postgres.port,
            s.postgres.user
        );
        let pool = pool_builder(s)
            .max_size(1)
            .build(ConnectionManager::new(s.postgres.connection_string()))
            .map_err(|e| {
                log::error!("Failed to connect to database: {e}");
                Error::from(e)
            })?;
        Self::from_pool(&pool)
    }

    /// Checks out a connection from the pool, waiting at most the configured
    /// connect timeout.
    pub fn from_pool(pool: &DbPool) -> Result<Self, Error> {
        let conn = pool.get().map_err(|e| {
            log::error!("Could not get a database connection: {e}");
            Error::from(e)
        })?;
        log::debug!("Connection established.");
        Ok(DatabaseConnection { conn })
    }

    /// Creates the users and notes tables, unless they already exist.
    pub fn setup_schema(&mut self) -> Result<(), Error> {
        self.conn.batch_execute(SCHEMA_SQL).map_err(|e| {
            log::error!("Could not set up the database schema: {e}");
            Error::from(e)
        })
    }

    /// Round-trips a trivial query, used by the deep health check.
    pub fn ping(&mut self) -> Result<(), Error> {
        diesel::sql_query("SELECT 1")
            .execute(&mut self.conn)
            .map(|_| ())
            .map_err(|e| db_error("Database ping failed", e))
    }

    pub fn count_users(&mut self) -> Result<i64, Error> {
        use crate::db::schema::users;

        users::table
            .count()
            .get_result(&mut self.conn)
            .map_err(|e| db_error("Could not count users", e))
    }

    pub fn count_notes(&mut self) -> Result<i64, Error> {
        use crate::db::schema::notes;

        notes::table
            .count()
            .get_result(&mut self.conn)
            .map_err(|e| db_error("Could not count notes", e))
    }

    /// Returns one page of users, newest first, each paired with the number
    /// of notes they own. The second value is the total number of users.
    pub fn list_users(
        &mut self,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<(User, i64)>, i64), Error> {
        use crate::db::schema::{notes, users};

        let page: Vec<User> = users::table
            .select(User::as_select())
            .order((users::created_at.desc(), users::id.desc()))
            .offset(offset)
            .limit(limit)
            .load(&mut self.conn)
            .map_err(|e| db_error("Could not get users from database", e))?;

        let ids: Vec<i64> = page.iter().map(|u| u.id).collect();
        let counts: HashMap<i64, i64> = if ids.is_empty() {
            HashMap::new()
        } else {
            notes::table
                .filter(notes::user_id.eq_any(ids))
                .group_by(notes::user_id)
                .select((notes::user_id, diesel::dsl::count_star()))
                .load::<(i64, i64)>(&mut self.conn)
                .map_err(|e| db_error("Could not count notes per user", e))?
                .into_iter()
                .collect()
        };

        let total = self.count_users()?;
        let ret = page
            .into_iter()
            .map(|u| {
                let n = counts.get(&u.id).copied().unwrap_or(0);
                (u, n)
            })
            .collect();
        Ok((ret, total))
    }

    /// Returns the user with the specified id, if any.
    pub fn get_user(&mut self, user_id: i64) -> Result<Option<User>, Error> {
        use crate::db::schema::users;

        users::table
            .find(user_id)
            .select(User::as_select())
            .first(&mut self.conn)
            .optional()
            .map_err(|e| db_error("Could not get user from database", e))
    }

    /// Returns the user registered with the specified email, if any.
    pub fn get_user_by_email(&mut self, user_email: &str) -> Result<Option<User>, Error> {
        use crate::db::schema::users::{self, email};

        users::table
            .filter(email.eq(user_email))
            .select(User::as_select())
            .first(&mut self.conn)
            .optional()
            .map_err(|e| db_error("Could not look up user by email", e))
    }

    pub fn user_exists(&mut self, user_id: i64) -> Result<bool, Error> {
        use crate::db::schema::users;

        diesel::select(diesel::dsl::exists(users::table.find(user_id)))
            .get_result(&mut self.conn)
            .map_err(|e| db_error("Could not check whether user exists", e))
    }

    /// All notes owned by the user, newest first.
    pub fn user_notes(&mut self, user: &User) -> Result<Vec<Note>, Error> {
        use crate::db::schema::notes;

        Note::belonging_to(user)
            .select(Note::as_select())
            .order((notes::created_at.desc(), notes::id.desc()))
            .load(&mut self.conn)
            .map_err(|e| db_error("Could not get notes for user", e))
    }

    /// Inserts a new user. Fails with a unique violation if the email is
    /// already taken.
    pub fn create_user(&mut self, new_user: &NewUser) -> Result<User, Error> {
        use crate::db::schema::users;

        diesel::insert_into(users::table)
            .values(new_user)
            .returning(User::as_returning())
            .get_result(&mut self.conn)
            .map_err(|e| db_error("Could not insert new user into database", e))
    }

    /// Applies the changes to the user with the specified id. Fails with
    /// `NotFound` if there is no such user.
    pub fn update_user(&mut self, user_id: i64, changes: &UserChanges) -> Result<User, Error> {
        use crate::db::schema::users;

        diesel::update(users::table.find(user_id))
            .set(changes)
            .returning(User::as_returning())
            .get_result(&mut self.conn)
            .map_err(|e| db_error(&format!("Could not update user {user_id}"), e))
    }

    /// Deletes the user and, through the foreign key, all of their notes.
    pub fn delete_user(&mut self, user_id: i64) -> Result<(), Error> {
        use crate::db::schema::users;

        let n = diesel::delete(users::table.find(user_id))
            .execute(&mut self.conn)
            .map_err(|e| db_error(&format!("Could not delete user {user_id}"), e))?;
        if n == 0 {
            return Err(Error::from(diesel::result::Error::NotFound));
        }
        Ok(())
    }

    /// Returns one page of notes, newest first, together with their owners.
    /// Only notes owned by `owner` are considered when it is set. The second
    /// value is the total number of matching notes.
    pub fn list_notes(
        &mut self,
        owner: Option<i64>,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<(Note, UserSummary)>, i64), Error> {
        use crate::db::schema::{notes, users};

        let base_q = notes::table
            .inner_join(users::table)
            .select((Note::as_select(), UserSummary::as_select()))
            .order((notes::created_at.desc(), notes::id.desc()))
            .offset(offset)
            .limit(limit);

        let (q_result, total) = match owner {
            Some(uid) => (
                base_q
                    .filter(notes::user_id.eq(uid))
                    .load::<(Note, UserSummary)>(&mut self.conn),
                notes::table
                    .filter(notes::user_id.eq(uid))
                    .count()
                    .get_result::<i64>(&mut self.conn),
            ),
            None => (
                base_q.load::<(Note, UserSummary)>(&mut self.conn),
                notes::table.count().get_result::<i64>(&mut self.conn),
            ),
        };

        let ret: Vec<(Note, UserSummary)> =
            q_result.map_err(|e| db_error("Could not get notes from database", e))?;
        let total = total.map_err(|e| db_error("Could not count notes", e))?;
        Ok((ret, total))
    }

    /// Returns the note with the specified id and its owner, if any.
    pub fn get_note(&mut self, note_id: i64) -> Result<Option<(Note, UserSummary)>, Error> {
        use crate::db::schema::{notes, users};

        notes::table
            .inner_join(users::table)
            .filter(notes::id.eq(note_id))
            .select((Note::as_select(), UserSummary::as_select()))
            .first(&mut self.conn)
            .optional()
            .map_err(|e| db_error("Could not get note from database", e))
    }

    /// Inserts a new note and returns it together with its owner. Fails with
    /// a foreign key violation if the owner does not exist.
    pub fn create_note(&mut self, new_note: &NewNote) -> Result<(Note, UserSummary), Error> {
        use crate::db::schema::{notes, users};

        self.conn
            .transaction::<_, diesel::result::Error, _>(|conn| {
                let note: Note = diesel::insert_into(notes::table)
                    .values(new_note)
                    .returning(Note::as_returning())
                    .get_result(conn)?;
                let owner: UserSummary = users::table
                    .find(note.user_id)
                    .select(UserSummary::as_select())
                    .first(conn)?;
                Ok((note, owner))
            })
            .map_err(|e| db_error("Could not insert new note into database", e))
    }

    /// Applies the changes to the note with the specified id. Fails with
    /// `NotFound` if there is no such note.
    pub fn update_note(
        &mut self,
        note_id: i64,
        changes: &NoteChanges,
    ) -> Result<(Note, UserSummary), Error> {
        use crate::db::schema::{notes, users};

        self.conn
            .transaction::<_, diesel::result::Error, _>(|conn| {
                let note: Note = diesel::update(notes::table.find(note_id))
                    .set(changes)
                    .returning(Note::as_returning())
                    .get_result(conn)?;
                let owner: UserSummary = users::table
                    .find(note.user_id)
                    .select(UserSummary::as_select())
                    .first(conn)?;
                Ok((note, owner))
            })
            .map_err(|e| db_error(&format!("Could not update note {note_id}"), e))
    }

    pub fn delete_note(&mut self, note_id: i64) -> Result<(), Error> {
        use crate::db::schema::notes;

        let n = diesel::delete(notes::table.find(note_id))
            .execute(&mut self.conn)
            .map_err(|e| db_error(&format!("Could not delete note {note_id}"), e))?;
        if n == 0 {
            return Err(Error::from(diesel::result::Error::NotFound));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asserting::prelude::*;

    /// Nothing listens on port 1, so every checkout fails.
    fn unreachable_settings(pool_size: u32) -> Settings {
        let contents = format!(
            r#"
name = "stiknes-test"

[log]
dir = "logs"
verbose = false

[postgres]
user = "stiknes"
password = "secret"
host = "127.0.0.1"
port = 1
dbname = "stiknes"
connect_timeout_seconds = 1
pool_size = {pool_size}

[server]
address = "127.0.0.1"
port = 3000
max_payload = 1024
"#
        );
        Settings::parse_with_env(&contents, "/tmp", |_| None).unwrap()
    }

    #[test]
    fn test_pool_is_built_without_a_database() {
        let pool = build_pool(&unreachable_settings(4));
        assert_that!(pool.max_size()).is_equal_to(4);
        assert_that!(pool.state().connections).is_equal_to(0);
    }

    #[test]
    fn test_checkout_fails_without_a_database() {
        let pool = build_pool(&unreachable_settings(2));
        let res = DatabaseConnection::from_pool(&pool);
        assert_that!(matches!(res, Err(Error::DieselPoolError(_)))).is_true();
    }

    #[test]
    fn test_connect_fails_without_a_database() {
        assert_that!(DatabaseConnection::connect(&unreachable_settings(1)).is_err()).is_true();
    }
}
