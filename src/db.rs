/// Database functionality. Defines the users and notes tables and the
/// operations the API performs on them.
pub mod conn;
pub mod models;
pub mod schema;
