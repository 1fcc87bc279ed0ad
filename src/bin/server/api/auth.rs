// Account registration and login for the web frontend

use actix_web::{
    web::{self, ServiceConfig},
    HttpResponse,
};
use serde::Deserialize;

use stiknes::{
    db::conn::DbPool,
    utils::verify_password,
    validate::{is_valid_email, FieldError},
};

use super::{
    method_not_allowed,
    users::{insert_user, validate_new_user, UserInfo, UserPayload},
    with_db, ErrorResponse,
};

pub fn config(cfg: &mut ServiceConfig) {
    cfg.service(
        web::resource("/register")
            .route(web::post().to(register))
            .default_service(web::to(method_not_allowed)),
    )
    .service(
        web::resource("/login")
            .route(web::post().to(login))
            .default_service(web::to(method_not_allowed)),
    );
}

#[derive(Debug, Deserialize)]
struct LoginPayload {
    email: Option<String>,
    password: Option<String>,
}

/// POST /api/auth/register. Same rules as creating a user, but the password
/// is trimmed and a taken email is reported the way the sign-up form expects.
/// Does not log the user in.
async fn register(
    pool: web::Data<DbPool>,
    payload: web::Json<UserPayload>,
) -> Result<HttpResponse, ErrorResponse> {
    let mut payload = payload.into_inner();
    payload.trim_password();
    let new_user = validate_new_user(&payload)?;
    let user = insert_user(&pool, new_user, "Email already registered").await?;
    Ok(HttpResponse::Created().json(UserInfo::from(&user)))
}

/// POST /api/auth/login. Checks the trimmed password against the stored
/// hash and returns the public part of the account.
async fn login(
    pool: web::Data<DbPool>,
    payload: web::Json<LoginPayload>,
) -> Result<HttpResponse, ErrorResponse> {
    let email = payload.email.as_deref().unwrap_or("").trim().to_string();
    let password = payload.password.as_deref().unwrap_or("").trim().to_string();

    let mut errors: Vec<FieldError> = Vec::new();
    if !is_valid_email(&email) {
        errors.push(FieldError::body(
            "email",
            "Please enter a valid email address",
        ));
    }
    if password.is_empty() {
        errors.push(FieldError::body("password", "Password is required"));
    }
    if !errors.is_empty() {
        return Err(ErrorResponse::validation(errors));
    }

    let lookup = email.clone();
    let user = with_db(&pool, move |db| db.get_user_by_email(&lookup))
        .await
        .map_err(|_| ErrorResponse::internal_server_error("Failed to log in"))?
        .ok_or_else(|| {
            log::info!("Login attempt for unknown email {email}");
            ErrorResponse::unauthorized("No account found for this email")
        })?;

    if !verify_password(&password, &user.password) {
        log::info!("Login attempt with wrong password for user {}", user.id);
        return Err(ErrorResponse::unauthorized(
            "Incorrect password. Please try again",
        ));
    }

    log::info!("User {} logged in", user.id);
    Ok(HttpResponse::Ok().json(UserInfo::from(&user)))
}

#[cfg(test)]
mod tests {
    use crate::api::tests::settings;
    use actix_web::{http::StatusCode, test as atest};
    use asserting::prelude::*;
    use serde_json::{json, Value};

    #[actix_web::test]
    async fn test_login_validates_input() {
        let app = test_app!(settings());
        let req = atest::TestRequest::post()
            .uri("/api/auth/login")
            .set_json(json!({"email": "bad"}))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_that!(resp.status()).is_equal_to(StatusCode::BAD_REQUEST);
        let body: Value = atest::read_body_json(resp).await;
        assert_that!(body).is_equal_to(json!({"errors": [
            {
                "type": "field",
                "path": "email",
                "msg": "Please enter a valid email address",
                "location": "body",
            },
            {
                "type": "field",
                "path": "password",
                "msg": "Password is required",
                "location": "body",
            },
        ]}));
    }

    #[actix_web::test]
    async fn test_login_rejects_blank_password() {
        let app = test_app!(settings());
        let req = atest::TestRequest::post()
            .uri("/api/auth/login")
            .set_json(json!({"email": "ada@example.com", "password": "   "}))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_that!(resp.status()).is_equal_to(StatusCode::BAD_REQUEST);
        let body: Value = atest::read_body_json(resp).await;
        assert_that!(&body["errors"][0]["msg"]).is_equal_to(&json!("Password is required"));
    }

    #[actix_web::test]
    async fn test_register_trims_password_before_length_check() {
        let app = test_app!(settings());
        let req = atest::TestRequest::post()
            .uri("/api/auth/register")
            .set_json(json!({"email": "ada@example.com", "username": "ada", "password": "  abc  "}))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_that!(resp.status()).is_equal_to(StatusCode::BAD_REQUEST);
        let body: Value = atest::read_body_json(resp).await;
        assert_that!(&body["errors"][0]["path"]).is_equal_to(&json!("password"));
    }

    #[actix_web::test]
    async fn test_register_validates_input() {
        let app = test_app!(settings());
        let req = atest::TestRequest::post()
            .uri("/api/auth/register")
            .set_json(json!({"email": "ada@example.com", "password": "secret1", "username": ""}))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_that!(resp.status()).is_equal_to(StatusCode::BAD_REQUEST);
        let body: Value = atest::read_body_json(resp).await;
        assert_that!(&body["errors"][0]["path"]).is_equal_to(&json!("username"));
    }

    #[actix_web::test]
    async fn test_login_only_accepts_post() {
        let app = test_app!(settings());
        let req = atest::TestRequest::get().uri("/api/auth/login").to_request();
        let resp = atest::call_service(&app, req).await;
        assert_that!(resp.status()).is_equal_to(StatusCode::METHOD_NOT_ALLOWED);
    }

    #[actix_web::test]
    async fn test_login_database_failure() {
        let app = test_app!(settings());
        let req = atest::TestRequest::post()
            .uri("/api/auth/login")
            .set_json(json!({"email": "ada@example.com", "password": "secret1"}))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_that!(resp.status()).is_equal_to(StatusCode::INTERNAL_SERVER_ERROR);
    }
}
