//! Input validation shared by the API handlers.
//!
//! Every check reports a [`FieldError`] instead of failing fast, so that a
//! request with several bad fields gets all of them back at once.

use serde::Serialize;

/// Minimum number of characters in a password.
pub const MIN_PASSWORD_LENGTH: usize = 6;

/// Where in the request a rejected value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Location {
    Body,
    Query,
    Params,
}

/// A single rejected input value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub path: String,
    pub msg: String,
    pub location: Location,
}

impl FieldError {
    pub fn new(location: Location, path: &str, msg: &str) -> Self {
        FieldError {
            kind: "field",
            path: path.to_string(),
            msg: msg.to_string(),
            location,
        }
    }

    pub fn body(path: &str, msg: &str) -> Self {
        Self::new(Location::Body, path, msg)
    }
}

/// Structural email check: a dot-atom local part, exactly one `@`, and a
/// dotted domain whose top level label is at least two letters. No
/// whitespace anywhere.
pub fn is_valid_email(s: &str) -> bool {
    if s.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = s.split_once('@') else {
        return false;
    };
    if domain.contains('@') {
        return false;
    }
    if local.is_empty() || local.split('.').any(str::is_empty) {
        return false;
    }
    let labels: Vec<&str> = domain.split('.').collect();
    let Some(tld) = labels.last() else {
        return false;
    };
    labels.len() >= 2
        && tld.chars().count() >= 2
        && tld.chars().all(char::is_alphabetic)
        && labels.iter().all(|l| {
            !l.is_empty()
                && !l.starts_with('-')
                && !l.ends_with('-')
                && l.chars().all(|c| c.is_alphanumeric() || c == '-')
        })
}

pub fn is_valid_password(s: &str) -> bool {
    s.chars().count() >= MIN_PASSWORD_LENGTH
}

/// Parses a database id from text. Ids are positive 64 bit integers.
pub fn parse_id(s: &str) -> Option<i64> {
    let s = s.trim();
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse::<i64>().ok().filter(|id| *id > 0)
}

/// Parses a database id from a JSON value, which may be either a number or a
/// string of digits.
pub fn parse_id_value(v: &serde_json::Value) -> Option<i64> {
    match v {
        serde_json::Value::Number(n) => n.as_i64().filter(|id| *id > 0),
        serde_json::Value::String(s) => parse_id(s),
        _ => None,
    }
}

/// Checks an email field. `None` means the field is required but missing.
pub fn check_email(errors: &mut Vec<FieldError>, email: Option<&str>) {
    match email {
        Some(e) if is_valid_email(e.trim()) => {}
        _ => errors.push(FieldError::body("email", "Please provide a valid email")),
    }
}

/// Checks a password field. `None` means the field is required but missing.
pub fn check_password(errors: &mut Vec<FieldError>, password: Option<&str>) {
    match password {
        Some(p) if is_valid_password(p) => {}
        _ => errors.push(FieldError::body(
            "password",
            "Password must be at least 6 characters long",
        )),
    }
}
