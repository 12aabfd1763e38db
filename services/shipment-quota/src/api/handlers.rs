use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use tracing::{error, info, warn};

use crate::guard::{GuardError, QuotaOutcome};
use crate::storage::{StorageError, SubscriptionStore};
use crate::subscription::NewSubscription;

use super::types::{
    CheckQuotaRequest, CommitUsageRequest, CommitUsageResponse, ErrorResponse,
    FireResetResponse, SchedulerActionResponse, SubscriptionEnvelope, SubscriptionListResponse,
};
use super::ApiState;

type ApiError = (StatusCode, Json<ErrorResponse>);
type ApiResult<T> = Result<Json<T>, ApiError>;

/// Pre-operation hook. A store failure is reported as 503 so the caller
/// fails closed; no subscription detail is leaked.
pub async fn check_quota(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<CheckQuotaRequest>,
) -> ApiResult<QuotaOutcome> {
    match state.guard.check_and_reserve(&request.subscriber_id) {
        Ok(decision) => Ok(Json(decision.to_outcome())),
        Err(GuardError::InvalidSubscriber) => Err(bad_request(
            "invalid_subscriber_id",
            "subscriber_id cannot be empty",
        )),
        Err(GuardError::Storage(err)) => {
            error!(
                subscriber_id = %request.subscriber_id,
                error = %err,
                "quota check failed; denying"
            );
            Err(unavailable())
        }
    }
}

/// Post-success hook. Always accepted: commit failures are logged, never
/// surfaced to the shipment caller.
pub async fn commit_usage(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<CommitUsageRequest>,
) -> Result<(StatusCode, Json<CommitUsageResponse>), ApiError> {
    if request.subscription_id.trim().is_empty() {
        return Err(bad_request(
            "invalid_subscription_id",
            "subscription_id cannot be empty",
        ));
    }

    let outcome = state.guard.commit(&request.subscription_id);
    Ok((
        StatusCode::ACCEPTED,
        Json(CommitUsageResponse {
            subscription_id: request.subscription_id,
            outcome,
        }),
    ))
}

pub async fn create_subscription(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<NewSubscription>,
) -> Result<(StatusCode, Json<SubscriptionEnvelope>), ApiError> {
    let subscription = state
        .database
        .create_subscription(&request)
        .map_err(storage_error)?;

    info!(
        subscriber_id = %subscription.subscriber_id,
        subscription_id = %subscription.id,
        tier = %subscription.tier,
        limit = subscription.monthly_shipment_limit,
        "subscription created"
    );

    Ok((
        StatusCode::CREATED,
        Json(SubscriptionEnvelope { subscription }),
    ))
}

pub async fn list_subscriptions(
    State(state): State<Arc<ApiState>>,
) -> ApiResult<SubscriptionListResponse> {
    let subscriptions = state.database.list_subscriptions().map_err(storage_error)?;
    Ok(Json(SubscriptionListResponse { subscriptions }))
}

pub async fn get_active_subscription(
    State(state): State<Arc<ApiState>>,
    Path(subscriber_id): Path<String>,
) -> ApiResult<SubscriptionEnvelope> {
    match state
        .database
        .get_active_subscription(&subscriber_id)
        .map_err(storage_error)?
    {
        Some(subscription) => Ok(Json(SubscriptionEnvelope { subscription })),
        None => Err(not_found(
            "subscription_not_found",
            "no active subscription for subscriber",
        )),
    }
}

pub async fn scheduler_status(
    State(state): State<Arc<ApiState>>,
) -> ApiResult<crate::scheduler::SchedulerStatus> {
    Ok(Json(state.scheduler.status()))
}

pub async fn start_scheduler(
    State(state): State<Arc<ApiState>>,
) -> ApiResult<SchedulerActionResponse> {
    let changed = state.scheduler.start();
    Ok(Json(SchedulerActionResponse {
        changed,
        status: state.scheduler.status(),
    }))
}

pub async fn stop_scheduler(
    State(state): State<Arc<ApiState>>,
) -> ApiResult<SchedulerActionResponse> {
    let changed = state.scheduler.status().active;
    state.scheduler.stop().await;
    Ok(Json(SchedulerActionResponse {
        changed,
        status: state.scheduler.status(),
    }))
}

pub async fn fire_reset(State(state): State<Arc<ApiState>>) -> ApiResult<FireResetResponse> {
    let run = state.scheduler.fire_now().await;
    if !run.succeeded {
        warn!(error = ?run.error, "manual usage reset failed");
    }
    Ok(Json(FireResetResponse {
        run,
        status: state.scheduler.status(),
    }))
}

pub async fn health_check() -> ApiResult<serde_json::Value> {
    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": "shipment-quota"
    })))
}

fn storage_error(err: StorageError) -> ApiError {
    match err {
        StorageError::InvalidSubscription(message) => bad_request("invalid_subscription", &message),
        StorageError::ActiveSubscriptionExists(subscriber_id) => (
            StatusCode::CONFLICT,
            Json(ErrorResponse {
                error: format!("subscriber {subscriber_id} already has an active subscription"),
                code: "active_subscription_exists".to_string(),
                details: None,
            }),
        ),
        StorageError::SubscriptionNotFound(_) => {
            not_found("subscription_not_found", "subscription not found")
        }
        other => internal_error(other),
    }
}

fn bad_request(code: &str, message: &str) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: message.to_string(),
            code: code.to_string(),
            details: None,
        }),
    )
}

fn not_found(code: &str, message: &str) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: message.to_string(),
            code: code.to_string(),
            details: None,
        }),
    )
}

fn unavailable() -> ApiError {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ErrorResponse {
            error: "quota could not be verified, try again".to_string(),
            code: "quota_unavailable".to_string(),
            details: None,
        }),
    )
}

fn internal_error<E: std::fmt::Display>(err: E) -> ApiError {
    error!(error = %err, "subscription API internal error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: "internal server error".to_string(),
            code: "internal_error".to_string(),
            details: None,
        }),
    )
}
