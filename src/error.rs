use diesel::result::DatabaseErrorKind;
use std::convert::From;
use toml;

#[derive(Debug)]
pub enum Error {
    IOError(std::io::Error),
    SetLoggerError(log::SetLoggerError),
    TOMLDeError(toml::de::Error),
    DieselConnectionError(diesel::ConnectionError),
    DieselError(diesel::result::Error),
    DieselPoolError(diesel::r2d2::PoolError),
    RawError(String),
}

impl std::error::Error for Error {}
impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::IOError(e) => {
                write!(f, "[IOError] {e}")
            }
            Error::SetLoggerError(e) => {
                write!(f, "[SetLoggerError] {e}")
            }
            Error::TOMLDeError(e) => {
                write!(f, "[TOMLDeError] {e}")
            }
            Error::DieselConnectionError(e) => {
                write!(f, "[DieselConnectionError] {e}")
            }
            Error::DieselError(e) => {
                write!(f, "[DieselError] {e}")
            }
            Error::DieselPoolError(e) => {
                write!(f, "[DieselPoolError] {e}")
            }
            Error::RawError(s) => {
                write!(f, "{s}")
            }
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::IOError(e)
    }
}

impl From<log::SetLoggerError> for Error {
    fn from(e: log::SetLoggerError) -> Self {
        Error::SetLoggerError(e)
    }
}

impl From<fern::InitError> for Error {
    fn from(e: fern::InitError) -> Self {
        match e {
            fern::InitError::Io(e) => Self::from(e),
            fern::InitError::SetLoggerError(e) => Self::from(e),
        }
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::TOMLDeError(e)
    }
}

impl From<diesel::ConnectionError> for Error {
    fn from(e: diesel::ConnectionError) -> Self {
        Error::DieselConnectionError(e)
    }
}

impl From<diesel::result::Error> for Error {
    fn from(e: diesel::result::Error) -> Self {
        Error::DieselError(e)
    }
}

impl From<diesel::r2d2::PoolError> for Error {
    fn from(e: diesel::r2d2::PoolError) -> Self {
        Error::DieselPoolError(e)
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::RawError(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::RawError(String::from(s))
    }
}

impl Error {
    pub fn err_string<T>(s: String) -> Result<T, Self> {
        Err(Self::from(s))
    }
    pub fn err_str<T>(s: &str) -> Result<T, Self> {
        Err(Self::from(s))
    }

    /// The row that was looked up, updated or deleted does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::DieselError(diesel::result::Error::NotFound))
    }

    /// A unique constraint was violated, i.e. the email is already taken.
    pub fn is_unique_violation(&self) -> bool {
        matches!(
            self,
            Error::DieselError(diesel::result::Error::DatabaseError(
                DatabaseErrorKind::UniqueViolation,
                _
            ))
        )
    }

    /// A foreign key constraint was violated, i.e. a note refers to a user
    /// that does not exist (anymore).
    pub fn is_foreign_key_violation(&self) -> bool {
        matches!(
            self,
            Error::DieselError(diesel::result::Error::DatabaseError(
                DatabaseErrorKind::ForeignKeyViolation,
                _
            ))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asserting::prelude::*;

    #[test]
    fn test_not_found_classification() {
        let e = Error::from(diesel::result::Error::NotFound);
        assert_that!(e.is_not_found()).is_true();
        assert_that!(e.is_unique_violation()).is_false();
        assert_that!(e.is_foreign_key_violation()).is_false();

        assert_that!(Error::from("something else").is_not_found()).is_false();
    }

    #[test]
    fn test_constraint_violation_classification() {
        let unique = Error::from(diesel::result::Error::DatabaseError(
            DatabaseErrorKind::UniqueViolation,
            Box::new(String::from("duplicate key value violates unique constraint")),
        ));
        assert_that!(unique.is_unique_violation()).is_true();
        assert_that!(unique.is_foreign_key_violation()).is_false();
        assert_that!(unique.is_not_found()).is_false();

        let fk = Error::from(diesel::result::Error::DatabaseError(
            DatabaseErrorKind::ForeignKeyViolation,
            Box::new(String::from("violates foreign key constraint")),
        ));
        assert_that!(fk.is_foreign_key_violation()).is_true();
        assert_that!(fk.is_unique_violation()).is_false();

        let other = Error::from(diesel::result::Error::DatabaseError(
            DatabaseErrorKind::CheckViolation,
            Box::new(String::from("check")),
        ));
        assert_that!(other.is_unique_violation()).is_false();
        assert_that!(other.is_foreign_key_violation()).is_false();
    }

    #[test]
    fn test_raw_error_display() {
        assert_that!(Error::from("no luck").to_string()).is_equal_to("no luck");
        assert_that!(Error::err_str::<()>("bad").is_err()).is_true();
    }

    #[test]
    fn test_diesel_error_display() {
        let e = Error::from(diesel::result::Error::NotFound);
        assert_that!(e.to_string()).starts_with("[DieselError]");
    }
}
