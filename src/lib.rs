/// Shared functionality of the notes backend, used by both the API server and
/// the management tool.
pub mod db;
pub mod error;
pub mod pagination;
pub mod settings;
pub mod utils;
pub mod validate;
