// Route exports
pub mod matches;
pub mod profiles;

use crate::models::ErrorResponse;
use actix_web::{error, http::StatusCode, web, HttpRequest, HttpResponse, ResponseError};
use std::fmt;

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .configure(matches::configure)
            .configure(profiles::configure),
    );
}

/// A request actix rejected before it reached a handler
#[derive(Debug)]
pub struct RejectedRequest(ErrorResponse);

impl RejectedRequest {
    fn new(error: &str, message: String) -> Self {
        Self(ErrorResponse {
            error: error.to_string(),
            message,
            status_code: StatusCode::BAD_REQUEST.as_u16(),
        })
    }
}

impl fmt::Display for RejectedRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.0.error, self.0.message)
    }
}

impl ResponseError for RejectedRequest {
    fn status_code(&self) -> StatusCode {
        StatusCode::BAD_REQUEST
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::BadRequest().json(&self.0)
    }
}

fn reject_json(err: error::JsonPayloadError, req: &HttpRequest) -> actix_web::Error {
    tracing::info!("Rejected JSON body on {}: {}", req.path(), err);
    RejectedRequest::new("invalid_json", format!("Invalid JSON: {}", err)).into()
}

fn reject_path(err: error::PathError, req: &HttpRequest) -> actix_web::Error {
    tracing::info!("Rejected path {}: {}", req.path(), err);
    RejectedRequest::new("invalid_path", format!("Invalid path: {}", err)).into()
}

/// Extractor configs that answer malformed requests with an [`ErrorResponse`]
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(reject_json)
}

pub fn path_config() -> web::PathConfig {
    web::PathConfig::default().error_handler(reject_path)
}
