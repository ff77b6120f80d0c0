//! API-key authentication for the admin surface.
//!
//! Handlers opt into authentication by taking [`ApiKey`] as a parameter:
//! the extractor compares the `X-API-Key` header against the configured
//! shared secret and rejects with 401 otherwise, revealing nothing about
//! the configuration.

use actix_web::{dev::Payload, web, FromRequest, HttpRequest};
use std::future::{ready, Ready};
use tracing::warn;

use crate::config::Config;
use crate::errors::AppError;

/// Marker extractor proving the request carried a valid API key.
#[derive(Debug, Clone, Copy)]
pub struct ApiKey;

impl FromRequest for ApiKey {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let Some(config) = req.app_data::<web::Data<Config>>() else {
            tracing::error!("Config not found in app data");
            return ready(Err(AppError::internal("configuration not available")));
        };

        let provided = req
            .headers()
            .get("X-API-Key")
            .and_then(|value| value.to_str().ok());

        match provided {
            Some(key) if key_matches(key, &config.api_key) => ready(Ok(ApiKey)),
            _ => {
                warn!("Unauthorized API access attempt");
                ready(Err(AppError::InvalidApiKey))
            }
        }
    }
}

fn key_matches(provided: &str, expected: &str) -> bool {
    !expected.is_empty() && provided == expected
}
