use std::future::{ready, Ready};

use actix_web::dev::Payload;
use actix_web::web::Data;
use actix_web::{FromRequest, HttpRequest};
use paperclip::actix::Apiv2Security;

use crate::error::ApiError;

pub const API_KEY_HEADER: &str = "X-API-Key";

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub api_key: String,
}

/// Proof that the request carried the configured api key
#[derive(Debug, Clone, Copy, Apiv2Security)]
#[openapi(apiKey, in = "header", name = "X-API-Key")]
pub struct ApiKey;

impl FromRequest for ApiKey {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let Some(config) = req.app_data::<Data<AuthConfig>>() else {
            tracing::error!("Auth config missing in app data");
            return ready(Err(ApiError::Unauthorized.into()));
        };
        let provided = req
            .headers()
            .get(API_KEY_HEADER)
            .and_then(|value| value.to_str().ok());

        ready(match provided {
            Some(key) if key == config.api_key => Ok(ApiKey),
            _ => Err(ApiError::Unauthorized.into()),
        })
    }
}

#[cfg(test)]
mod auth_tests {
    use actix_web::test::TestRequest;

    use super::*;

    fn request_with_key(key: Option<&str>) -> HttpRequest {
        let request = TestRequest::default().app_data(Data::new(AuthConfig {
            api_key: "secret".to_string(),
        }));
        match key {
            Some(key) => request.insert_header((API_KEY_HEADER, key)),
            None => request,
        }
        .to_http_request()
    }

    #[actix_web::test]
    async fn test_api_key_extraction() {
        assert!(ApiKey::extract(&request_with_key(Some("secret")))
            .await
            .is_ok());
        assert!(ApiKey::extract(&request_with_key(Some("Secret")))
            .await
            .is_err());
        assert!(ApiKey::extract(&request_with_key(None)).await.is_err());
    }
}
