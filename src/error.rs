use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

use crate::model::SubscriberId;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Forbidden: invalid control-plane secret")]
    Forbidden,
    #[error("Unauthorized subscriber: {0}")]
    Unauthorized(String),
    #[error("Delivery to {subscriber} failed: {source}")]
    DeliveryFailure {
        subscriber: SubscriberId,
        #[source]
        source: DeliveryError,
    },
    #[error("Transport dropped: {0}")]
    TransportDrop(String),
    #[error("Failed to encode signal: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure of a single send over a connection handle.
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("connection closed")]
    Closed,
    #[error("send timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
}

impl ResponseError for RelayError {
    fn status_code(&self) -> StatusCode {
        match self {
            RelayError::Forbidden => StatusCode::FORBIDDEN,
            RelayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let code = match self {
            RelayError::Forbidden => "forbidden",
            RelayError::Unauthorized(_) => "unauthorized",
            _ => "internal",
        };
        HttpResponse::build(self.status_code()).json(json!({
            "error": code,
            "detail": self.to_string(),
        }))
    }
}
