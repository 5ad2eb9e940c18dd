use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt::Display;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

/// Domain failure taxonomy shared by the allocator, resolver, and job runner.
#[derive(Debug, Error)]
pub enum FulfillmentError {
    #[error("resource not found")]
    NotFound,
    #[error("no units of {0} remaining")]
    Exhausted(String),
    #[error("recipient already holds a claim in this group")]
    AlreadyClaimed,
    #[error("a fulfillment run is already active for this group")]
    AlreadyRunning,
    #[error("{0}")]
    InvalidTarget(String),
    #[error("render failure: {0}")]
    RenderFailure(String),
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
}

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized")
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "resource not found")
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn unprocessable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, message)
    }

    pub fn internal<E: Display>(error: E) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status;
        let body = Json(ErrorResponse {
            error: self.message,
        });
        (status, body).into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl From<FulfillmentError> for AppError {
    fn from(value: FulfillmentError) -> Self {
        match value {
            FulfillmentError::NotFound => AppError::not_found(),
            FulfillmentError::Exhausted(_) => AppError::conflict(value.to_string()),
            FulfillmentError::AlreadyClaimed => AppError::conflict(value.to_string()),
            FulfillmentError::AlreadyRunning => AppError::conflict(value.to_string()),
            FulfillmentError::InvalidTarget(_) => AppError::unprocessable(value.to_string()),
            FulfillmentError::RenderFailure(_) => AppError::internal(value),
            FulfillmentError::Database(diesel::result::Error::NotFound) => AppError::not_found(),
            FulfillmentError::Database(err) => AppError::internal(err),
        }
    }
}

impl From<diesel::result::Error> for AppError {
    fn from(value: diesel::result::Error) -> Self {
        match value {
            diesel::result::Error::NotFound => AppError::not_found(),
            _ => AppError::internal(value),
        }
    }
}

impl From<jsonwebtoken::errors::Error> for AppError {
    fn from(value: jsonwebtoken::errors::Error) -> Self {
        AppError::internal(value)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        AppError::internal(value)
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        AppError::internal(value)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        AppError::internal(value)
    }
}
