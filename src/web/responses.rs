use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::render::PoolStats;
use crate::utils::error::ResolveError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceResponse {
    pub price: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

// Custom error types for the API
#[derive(Debug)]
pub enum ApiError {
    BadRequest { code: &'static str, message: String },
    BadGateway(String),
    ServiceUnavailable { code: &'static str, message: String },
    GatewayTimeout(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            ApiError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            ApiError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::GatewayTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::BadRequest { code, .. } => code,
            ApiError::BadGateway(_) => "PRICE_UNAVAILABLE",
            ApiError::ServiceUnavailable { code, .. } => code,
            ApiError::GatewayTimeout(_) => "TIMEOUT",
        }
    }

    pub fn message(&self) -> String {
        match self {
            ApiError::BadRequest { message, .. } => message.clone(),
            ApiError::BadGateway(msg) => msg.clone(),
            ApiError::ServiceUnavailable { message, .. } => message.clone(),
            ApiError::GatewayTimeout(msg) => msg.clone(),
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest {
            code: "INVALID_INPUT",
            message: msg.into(),
        }
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::GatewayTimeout(msg.into())
    }
}

impl From<ResolveError> for ApiError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::InvalidInput(msg) => ApiError::bad_request(msg),
            ResolveError::UnsupportedRetailer { retailer } => ApiError::BadRequest {
                code: "UNSUPPORTED_RETAILER",
                message: format!("Invalid store: {}", retailer),
            },
            ResolveError::Busy(_) => ApiError::ServiceUnavailable {
                code: "BUSY",
                message: "All price fetchers are busy, try again shortly".to_string(),
            },
            ResolveError::ShuttingDown => ApiError::ServiceUnavailable {
                code: "SHUTTING_DOWN",
                message: "Service is shutting down".to_string(),
            },
            // Retailer markup details stay in the logs.
            ResolveError::Unavailable(_) => ApiError::BadGateway("Price not found".to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorBody {
            error: self.error_code().to_string(),
            message: self.message(),
        };
        (status, Json(body)).into_response()
    }
}

// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub version: String,
    pub pool: PoolHealth,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PoolHealth {
    pub size: usize,
    pub busy: usize,
    pub idle: usize,
    pub vacant: usize,
}

impl HealthResponse {
    pub fn from_pool(stats: PoolStats, shutting_down: bool) -> Self {
        Self {
            status: if shutting_down { "shutting_down" } else { "healthy" }.to_string(),
            timestamp: chrono::Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            pool: PoolHealth {
                size: stats.size,
                busy: stats.busy,
                idle: stats.idle,
                vacant: stats.vacant,
            },
        }
    }
}
