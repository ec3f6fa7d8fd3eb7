use actix_web::{web, HttpResponse, Responder};
use validator::Validate;
use crate::core::{AttemptOptions, CoordinatorError, IsolationPolicy, MatchCoordinator};
use crate::models::{AttemptMatchRequest, AttemptMatchResponse, ErrorResponse, HealthResponse, MatchOutcome};
use std::time::{Duration, Instant};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub coordinator: MatchCoordinator,
    pub default_policy: IsolationPolicy,
}

/// Configure all match-related routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg
        .route("/health", web::get().to(health_check))
        .route("/matches/attempt", web::post().to(attempt_match));
}

/// Health check endpoint
async fn health_check(state: web::Data<AppState>) -> impl Responder {
    let store = state.coordinator.store();
    let healthy = store.health_check().await.unwrap_or(false);

    let status = if healthy { "healthy" } else { "degraded" };

    HttpResponse::Ok().json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        store: store.backend().to_string(),
        timestamp: chrono::Utc::now(),
    })
}

fn bad_request(error: &str, message: String) -> HttpResponse {
    HttpResponse::BadRequest().json(ErrorResponse {
        error: error.to_string(),
        message,
        status_code: 400,
    })
}

/// Resolve the policy a request asked for, falling back to the configured one
fn requested_policy(
    req: &AttemptMatchRequest,
    default_policy: &IsolationPolicy,
) -> Result<IsolationPolicy, String> {
    let policy = match &req.policy {
        Some(name) => name.parse::<IsolationPolicy>().map_err(|e| e.to_string())?,
        None => default_policy.clone(),
    };

    match (policy, &req.advisory_key) {
        (IsolationPolicy::AdvisoryLock { .. }, Some(key)) => Ok(IsolationPolicy::advisory_keyed(key)),
        (_, Some(_)) => Err("advisoryKey is only valid with the advisory_lock policy".to_string()),
        (policy, None) => Ok(policy),
    }
}

fn requested_options(req: &AttemptMatchRequest, base: &AttemptOptions) -> AttemptOptions {
    let mut options = *base;
    if let Some(retry_limit) = req.retry_limit {
        options.retry_limit = retry_limit;
    }
    if let Some(ms) = req.lock_timeout_ms {
        options.lock_timeout = Duration::from_millis(ms);
    }
    options
}

/// Attempt match endpoint
///
/// POST /api/v1/matches/attempt
///
/// Request body:
/// ```json
/// {
///   "requesterId": "alice",
///   "profileId": "chris",
///   "policy": "read_committed|repeatable_read|row_lock|advisory_lock",
///   "advisoryKey": "optional",
///   "retryLimit": 3,
///   "lockTimeoutMs": 5000
/// }
/// ```
///
/// Every outcome is a 200 except `not_found`, which is a 404 with the same body.
/// An unreachable store is a 503.
async fn attempt_match(
    state: web::Data<AppState>,
    req: web::Json<AttemptMatchRequest>,
) -> impl Responder {
    if let Err(errors) = req.validate() {
        tracing::info!("Validation failed for attempt_match request: {:?}", errors);
        return bad_request("Validation failed", errors.to_string());
    }

    let policy = match requested_policy(&req, &state.default_policy) {
        Ok(policy) => policy,
        Err(message) => return bad_request("Invalid policy", message),
    };
    let options = requested_options(&req, state.coordinator.options());

    let started = Instant::now();
    let result = state
        .coordinator
        .attempt_match_with(&req.requester_id, &req.profile_id, &policy, &options)
        .await;

    match result {
        Ok(outcome) => {
            let response = AttemptMatchResponse {
                outcome,
                profile_id: req.profile_id.clone(),
                policy: policy.name().to_string(),
                elapsed_ms: started.elapsed().as_millis() as u64,
            };
            if response.outcome == MatchOutcome::NotFound {
                HttpResponse::NotFound().json(response)
            } else {
                HttpResponse::Ok().json(response)
            }
        }
        Err(CoordinatorError::Store(e)) if e.is_infrastructure() => {
            HttpResponse::ServiceUnavailable().json(ErrorResponse {
                error: "Profile store unavailable".to_string(),
                message: e.to_string(),
                status_code: 503,
            })
        }
        Err(e) => HttpResponse::InternalServerError().json(ErrorResponse {
            error: "Match attempt failed".to_string(),
            message: e.to_string(),
            status_code: 500,
        }),
    }
}
