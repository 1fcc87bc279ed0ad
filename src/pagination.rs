use serde::Serialize;

use crate::settings::PaginationSettings;
use crate::validate::{FieldError, Location};

/// A validated `page`/`limit` pair. Pages are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
}

/// The `pagination` object returned next to every listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationSummary {
    pub total: i64,
    pub page: i64,
    pub limit: i64,
    pub total_pages: i64,
}

fn parse_positive(
    errors: &mut Vec<FieldError>,
    name: &str,
    value: Option<&str>,
    default: i64,
) -> i64 {
    match value.map(str::trim) {
        None | Some("") => default,
        Some(v) => match v.parse::<i64>() {
            Ok(n) if n >= 1 => n,
            _ => {
                errors.push(FieldError::new(
                    Location::Query,
                    name,
                    &format!("{name} must be a positive integer"),
                ));
                default
            }
        },
    }
}

impl Pagination {
    /// Builds a pagination from raw query parameters. Missing values fall back
    /// to page 1 and the configured default limit, and the limit is clamped to
    /// the configured maximum.
    pub fn from_query(
        page: Option<&str>,
        limit: Option<&str>,
        settings: &PaginationSettings,
    ) -> Result<Self, Vec<FieldError>> {
        let mut errors = Vec::new();
        let page = parse_positive(&mut errors, "page", page, 1);
        let limit = parse_positive(&mut errors, "limit", limit, settings.default_limit);
        if !errors.is_empty() {
            return Err(errors);
        }
        Ok(Pagination {
            page,
            limit: limit.min(settings.max_limit),
        })
    }

    /// Number of rows to skip. Saturates instead of overflowing for absurd
    /// page numbers, which then simply yield an empty page.
    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.limit)
    }

    pub fn summary(&self, total: i64) -> PaginationSummary {
        PaginationSummary {
            total,
            page: self.page,
            limit: self.limit,
            total_pages: if total <= 0 {
                0
            } else {
                (total + self.limit - 1) / self.limit
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::Location;
    use asserting::prelude::*;

    fn settings() -> PaginationSettings {
        PaginationSettings {
            default_limit: 10,
            max_limit: 50,
        }
    }

    #[test]
    fn test_defaults() {
        let p = Pagination::from_query(None, None, &settings()).unwrap();
        assert_that!(p).is_equal_to(Pagination { page: 1, limit: 10 });
        assert_that!(p.offset()).is_equal_to(0);

        let p = Pagination::from_query(Some(""), Some(" "), &settings()).unwrap();
        assert_that!(p).is_equal_to(Pagination { page: 1, limit: 10 });
    }

    #[test]
    fn test_offset() {
        let p = Pagination::from_query(Some("3"), Some("20"), &settings()).unwrap();
        assert_that!(p.offset()).is_equal_to(40);

        let p = Pagination {
            page: i64::MAX,
            limit: 10,
        };
        assert_that!(p.offset()).is_equal_to(i64::MAX);
    }

    #[test]
    fn test_limit_is_clamped() {
        let p = Pagination::from_query(Some("1"), Some("1000"), &settings()).unwrap();
        assert_that!(p.limit).is_equal_to(50);
    }

    #[test]
    fn test_invalid_values_are_reported() {
        let errors = Pagination::from_query(Some("0"), Some("ten"), &settings()).unwrap_err();
        let paths: Vec<&str> = errors.iter().map(|e| e.path.as_str()).collect();
        assert_that!(paths).is_equal_to(vec!["page", "limit"]);
        assert_that!(errors.iter().all(|e| e.location == Location::Query)).is_true();

        assert_that!(Pagination::from_query(Some("-1"), None, &settings())).is_err();
    }

    #[test]
    fn test_summary_total_pages() {
        let p = Pagination { page: 1, limit: 10 };
        assert_that!(p.summary(0).total_pages).is_equal_to(0);
        assert_that!(p.summary(1).total_pages).is_equal_to(1);
        assert_that!(p.summary(10).total_pages).is_equal_to(1);
        assert_that!(p.summary(11).total_pages).is_equal_to(2);
        assert_that!(p.summary(95)).is_equal_to(PaginationSummary {
            total: 95,
            page: 1,
            limit: 10,
            total_pages: 10,
        });
    }

    #[test]
    fn test_summary_serializes_camel_case() {
        let v = serde_json::to_value(Pagination { page: 2, limit: 5 }.summary(12)).unwrap();
        assert_that!(v).is_equal_to(serde_json::json!({
            "total": 12,
            "page": 2,
            "limit": 5,
            "totalPages": 3,
        }));
    }
}
