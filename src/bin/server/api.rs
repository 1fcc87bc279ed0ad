use actix_web::{
    error::{JsonPayloadError, QueryPayloadError},
    http::StatusCode,
    web::{self, ServiceConfig},
    HttpRequest, HttpResponse, ResponseError,
};
use serde::{Deserialize, Serialize};

use stiknes::{
    db::conn::{DatabaseConnection, DbPool},
    error::Error as StiknesError,
    settings::Settings,
    validate::{self, FieldError, Location},
};

use derive_more::derive::{Display, Error};

/// Builds an in-process app with the API routes for handler tests.
#[cfg(test)]
macro_rules! test_app {
    ($settings:expr) => {{
        let settings = $settings;
        let pool = stiknes::db::conn::build_pool(&settings);
        actix_web::test::init_service(
            actix_web::App::new()
                .configure(|cfg| crate::api::config(cfg, &settings, &pool))
                .default_service(actix_web::web::to(crate::api::not_found)),
        )
        .await
    }};
}

mod auth;
mod notes;
mod users;

/// Configuration for the API services. The pool is shared by all workers.
pub fn config(cfg: &mut ServiceConfig, settings: &Settings, pool: &DbPool) {
    cfg.app_data(web::Data::new(settings.clone()))
        .app_data(web::Data::new(pool.clone()))
        .app_data(
            web::JsonConfig::default()
                .limit(settings.server.max_payload)
                .error_handler(json_error_handler),
        )
        .app_data(web::QueryConfig::default().error_handler(query_error_handler))
        .route("/api/health", web::get().to(health))
        .service(web::scope("/api/users").configure(users::config))
        .service(web::scope("/api/notes").configure(notes::config))
        .service(web::scope("/api/auth").configure(auth::config));
}

/// The body of every non-2xx response. Plain failures carry a single
/// `error` message, rejected input carries one entry per bad field in
/// `errors`.
#[derive(Serialize, Debug, Display, Error)]
#[display("error response: {status}")]
pub struct ErrorResponse {
    #[serde(skip)]
    status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    errors: Vec<FieldError>,
}

impl actix_web::error::ResponseError for ErrorResponse {
    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(self)
    }
    fn status_code(&self) -> actix_web::http::StatusCode {
        StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl ErrorResponse {
    fn new(status: StatusCode, msg: &str) -> ErrorResponse {
        ErrorResponse {
            status: status.as_u16(),
            error: Some(msg.to_string()),
            errors: Vec::new(),
        }
    }
    pub fn bad_request(msg: &str) -> ErrorResponse {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }
    pub fn validation(errors: Vec<FieldError>) -> ErrorResponse {
        ErrorResponse {
            status: StatusCode::BAD_REQUEST.as_u16(),
            error: None,
            errors,
        }
    }
    pub fn unauthorized(msg: &str) -> ErrorResponse {
        Self::new(StatusCode::UNAUTHORIZED, msg)
    }
    pub fn not_found(msg: &str) -> ErrorResponse {
        Self::new(StatusCode::NOT_FOUND, msg)
    }
    pub fn internal_server_error(msg: &str) -> ErrorResponse {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }
}

/// "404: Not found" response for anything that no route matched.
/// This function is configured in main.rs
pub async fn not_found(req: HttpRequest) -> HttpResponse {
    log::debug!("No route for {} {}", req.method(), req.path());
    ErrorResponse::not_found("Route not found").error_response()
}

/// Used as the default service of resources that only accept some methods.
pub async fn method_not_allowed(req: HttpRequest) -> HttpResponse {
    log::debug!("Method {} not allowed on {}", req.method(), req.path());
    ErrorResponse::new(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed").error_response()
}

fn json_error_handler(err: JsonPayloadError, req: &HttpRequest) -> actix_web::Error {
    log::debug!("Rejected JSON body on {}: {err}", req.path());
    match &err {
        JsonPayloadError::OverflowKnownLength { .. } | JsonPayloadError::Overflow { .. } => {
            ErrorResponse::new(StatusCode::PAYLOAD_TOO_LARGE, "Request body too large").into()
        }
        JsonPayloadError::ContentType => {
            ErrorResponse::bad_request("Expected a JSON request body").into()
        }
        _ => ErrorResponse::bad_request("Invalid JSON body").into(),
    }
}

fn query_error_handler(err: QueryPayloadError, req: &HttpRequest) -> actix_web::Error {
    log::debug!("Rejected query string on {}: {err}", req.path());
    ErrorResponse::bad_request("Invalid query string").into()
}

/// Parses the `{id}` path segment.
pub fn path_id(raw: &str) -> Result<i64, ErrorResponse> {
    validate::parse_id(raw).ok_or_else(|| {
        ErrorResponse::validation(vec![FieldError::new(
            Location::Params,
            "id",
            "Invalid id",
        )])
    })
}

/// Checks out a pooled database connection and runs `f` on it on the
/// blocking thread pool, so that diesel does not stall the async workers.
pub async fn with_db<F, R>(pool: &web::Data<DbPool>, f: F) -> Result<R, StiknesError>
where
    F: FnOnce(&mut DatabaseConnection) -> Result<R, StiknesError> + Send + 'static,
    R: Send + 'static,
{
    let pool = pool.clone();
    web::block(move || {
        let mut db = DatabaseConnection::from_pool(&pool)?;
        f(&mut db)
    })
    .await
    .map_err(|e| {
        log::error!("Database task did not complete: {e}");
        StiknesError::from(format!("Database task did not complete: {e}"))
    })?
}

#[derive(Debug, Deserialize)]
struct HealthQuery {
    deep: Option<bool>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    message: &'static str,
}

/// Liveness probe. With `?deep=true` the database is pinged as well.
async fn health(
    pool: web::Data<DbPool>,
    query: web::Query<HealthQuery>,
) -> Result<HttpResponse, ErrorResponse> {
    if query.deep.unwrap_or(false) {
        with_db(&pool, |db| db.ping()).await.map_err(|_| {
            ErrorResponse::new(StatusCode::SERVICE_UNAVAILABLE, "Database is unreachable")
        })?;
    }
    Ok(HttpResponse::Ok().json(HealthResponse {
        status: "OK",
        message: "API is running",
    }))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use actix_web::test as atest;
    use asserting::prelude::*;
    use serde_json::{json, Value};

    /// Points at a port where nothing listens, so that every request that
    /// makes it past validation fails to connect.
    const TEST_SETTINGS: &str = r#"
name = "stiknes-test"

[log]
dir = "logs"
verbose = true

[postgres]
user = "stiknes"
password = "secret"
host = "127.0.0.1"
port = 1
dbname = "stiknes"
connect_timeout_seconds = 1

[server]
address = "127.0.0.1"
port = 3000
max_payload = 1024
"#;

    pub(crate) fn settings() -> Settings {
        Settings::parse_with_env(TEST_SETTINGS, "/tmp", |_| None).unwrap()
    }

    #[actix_web::test]
    async fn test_health() {
        let app = test_app!(settings());
        let req = atest::TestRequest::get().uri("/api/health").to_request();
        let resp: Value = atest::call_and_read_body_json(&app, req).await;
        assert_that!(resp).is_equal_to(json!({"status": "OK", "message": "API is running"}));
    }

    #[actix_web::test]
    async fn test_deep_health_without_database() {
        let app = test_app!(settings());
        let req = atest::TestRequest::get()
            .uri("/api/health?deep=true")
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_that!(resp.status()).is_equal_to(StatusCode::SERVICE_UNAVAILABLE);
    }

    #[actix_web::test]
    async fn test_invalid_health_query() {
        let app = test_app!(settings());
        let req = atest::TestRequest::get()
            .uri("/api/health?deep=maybe")
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_that!(resp.status()).is_equal_to(StatusCode::BAD_REQUEST);
        let body: Value = atest::read_body_json(resp).await;
        assert_that!(body).is_equal_to(json!({"error": "Invalid query string"}));
    }

    #[actix_web::test]
    async fn test_unknown_route() {
        let app = test_app!(settings());
        for uri in ["/api/nothing", "/", "/api/users/1/extra"] {
            let req = atest::TestRequest::get().uri(uri).to_request();
            let resp = atest::call_service(&app, req).await;
            assert_that!(resp.status()).is_equal_to(StatusCode::NOT_FOUND);
            let body: Value = atest::read_body_json(resp).await;
            assert_that!(body).is_equal_to(json!({"error": "Route not found"}));
        }
    }

    #[test]
    fn test_error_response_shapes() {
        let resp = ErrorResponse::not_found("User not found").error_response();
        assert_that!(resp.status()).is_equal_to(StatusCode::NOT_FOUND);

        let v = serde_json::to_value(ErrorResponse::bad_request("nope")).unwrap();
        assert_that!(v).is_equal_to(json!({"error": "nope"}));

        let v = serde_json::to_value(ErrorResponse::validation(vec![FieldError::body(
            "title",
            "Title is required",
        )]))
        .unwrap();
        assert_that!(v).is_equal_to(json!({"errors": [{
            "type": "field",
            "path": "title",
            "msg": "Title is required",
            "location": "body",
        }]}));
    }

    #[test]
    fn test_path_id() {
        assert_that!(path_id("12").ok()).is_equal_to(Some(12));
        let err = path_id("twelve").unwrap_err();
        assert_that!(err.status_code()).is_equal_to(StatusCode::BAD_REQUEST);
    }
}
