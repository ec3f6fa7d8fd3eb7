use actix_web::{web, HttpResponse, Responder};
use validator::Validate;
use crate::models::{CreateProfileRequest, ErrorResponse};
use crate::routes::matches::AppState;
use crate::services::StoreError;

/// Configure profile routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg
        .route("/profiles", web::post().to(create_profile))
        .route("/profiles/{profile_id}", web::get().to(get_profile));
}

fn store_failure(e: StoreError) -> HttpResponse {
    tracing::error!("Profile store failure: {}", e);
    HttpResponse::ServiceUnavailable().json(ErrorResponse {
        error: "Profile store unavailable".to_string(),
        message: e.to_string(),
        status_code: 503,
    })
}

/// Create profile endpoint
///
/// POST /api/v1/profiles
///
/// Request body:
/// ```json
/// { "profileId": "chris" }
/// ```
async fn create_profile(
    state: web::Data<AppState>,
    req: web::Json<CreateProfileRequest>,
) -> impl Responder {
    if let Err(errors) = req.validate() {
        return HttpResponse::BadRequest().json(ErrorResponse {
            error: "Validation failed".to_string(),
            message: errors.to_string(),
            status_code: 400,
        });
    }

    match state.coordinator.store().create(&req.profile_id).await {
        Ok(profile) => {
            tracing::info!("Registered profile {}", profile.id);
            HttpResponse::Created().json(profile)
        }
        Err(StoreError::AlreadyExists(id)) => HttpResponse::Conflict().json(ErrorResponse {
            error: "Profile already exists".to_string(),
            message: format!("Profile {} is already registered", id),
            status_code: 409,
        }),
        Err(e) => store_failure(e),
    }
}

/// Get profile endpoint
///
/// GET /api/v1/profiles/{profileId}
///
/// Returns the latest committed state, including status, partner and version.
async fn get_profile(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> impl Responder {
    let profile_id = path.into_inner();

    match state.coordinator.store().read(&profile_id).await {
        Ok(Some(profile)) => HttpResponse::Ok().json(profile),
        Ok(None) => HttpResponse::NotFound().json(ErrorResponse {
            error: "Profile not found".to_string(),
            message: format!("No profile with id {}", profile_id),
            status_code: 404,
        }),
        Err(e) => store_failure(e),
    }
}
