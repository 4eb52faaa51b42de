use actix_web::dev::ServiceResponse;
use actix_web::http::StatusCode;
use actix_web::middleware::{ErrorHandlerResponse, ErrorHandlers};
use actix_web::{web, HttpResponse, ResponseError};

use crate::api::ErrorResponse;
use crate::book_store::StoreError;

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    /// Query string that could not be parsed, including unknown sort keys
    #[error("{0}")]
    BadRequest(String),

    /// Well-formed input with out of range values, or a malformed body or path
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Invalid API key")]
    Unauthorized,

    #[error("Rate limit exceeded. Maximum {0} requests per minute.")]
    RateLimited(usize),

    #[error("Database connection failed: {0}")]
    DependencyUnavailable(String),

    #[error("Internal server error")]
    Internal(#[from] StoreError),
}

impl ApiError {
    pub fn book_not_found() -> Self {
        ApiError::NotFound("Book not found".to_string())
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::DependencyUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if let ApiError::Internal(cause) = self {
            tracing::error!("Unhandled store failure {}", cause);
        }
        HttpResponse::build(self.status_code()).json(ErrorResponse {
            detail: self.to_string(),
        })
    }
}

/// Malformed query strings are answered with 400
pub fn query_config() -> web::QueryConfig {
    web::QueryConfig::default()
        .error_handler(|err, _req| ApiError::BadRequest(err.to_string()).into())
}

pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .error_handler(|err, _req| ApiError::Validation(err.to_string()).into())
}

pub fn path_config() -> web::PathConfig {
    web::PathConfig::default()
        .error_handler(|err, _req| ApiError::Validation(err.to_string()).into())
}

/// Routing answers with an empty body, these handlers give it the json error shape
pub fn error_handlers<B: 'static>() -> ErrorHandlers<B> {
    ErrorHandlers::new().handler(StatusCode::METHOD_NOT_ALLOWED, method_not_allowed)
}

fn method_not_allowed<B>(res: ServiceResponse<B>) -> actix_web::Result<ErrorHandlerResponse<B>> {
    let (req, _) = res.into_parts();
    let response = HttpResponse::MethodNotAllowed().json(ErrorResponse {
        detail: "Method Not Allowed".to_string(),
    });
    Ok(ErrorHandlerResponse::Response(
        ServiceResponse::new(req, response).map_into_right_body(),
    ))
}

#[cfg(test)]
mod error_tests {
    use actix_web::body::to_bytes;

    use super::*;

    #[actix_web::test]
    /// Tests that the internal cause never reaches the response body
    async fn test_internal_error_hides_details() {
        let error = ApiError::Internal(StoreError::Other("secret table missing".to_string()));
        let response = error.error_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = to_bytes(response.into_body()).await.unwrap();
        let body: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(body.detail, "Internal server error");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ApiError::book_not_found().status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::Unauthorized.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::RateLimited(60).status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ApiError::Validation("page".to_string()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ApiError::BadRequest("sort".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }
}
