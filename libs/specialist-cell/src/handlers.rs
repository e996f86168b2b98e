// libs/specialist-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_models::error::AppError;

use crate::models::{
    AvailabilityError, CreateExceptionRequest, CreateRecurringRuleRequest,
    DeactivateRuleRequest, WindowQuery,
};
use crate::services::availability::AvailabilityService;

fn map_error(e: AvailabilityError) -> AppError {
    match e {
        AvailabilityError::InvalidRange => {
            AppError::BadRequest("Date range start must be before end".to_string())
        }
        AvailabilityError::UnknownSpecialist => {
            AppError::NotFound("Specialist has no availability rules".to_string())
        }
        AvailabilityError::RuleNotFound => {
            AppError::NotFound("Availability rule not found".to_string())
        }
        AvailabilityError::InvalidRule(msg) => AppError::ValidationError(msg),
        AvailabilityError::Storage(msg) => AppError::Database(msg),
    }
}

#[axum::debug_handler]
pub async fn create_recurring_rule(
    State(service): State<Arc<AvailabilityService>>,
    Path(specialist_id): Path<Uuid>,
    Json(request): Json<CreateRecurringRuleRequest>,
) -> Result<Json<Value>, AppError> {
    let rule = service
        .create_recurring_rule(specialist_id, request)
        .await
        .map_err(map_error)?;

    Ok(Json(json!({
        "success": true,
        "rule": rule
    })))
}

#[axum::debug_handler]
pub async fn create_exception(
    State(service): State<Arc<AvailabilityService>>,
    Path(specialist_id): Path<Uuid>,
    Json(request): Json<CreateExceptionRequest>,
) -> Result<Json<Value>, AppError> {
    let rule = service
        .create_exception(specialist_id, request)
        .await
        .map_err(map_error)?;

    Ok(Json(json!({
        "success": true,
        "rule": rule
    })))
}

#[axum::debug_handler]
pub async fn deactivate_rule(
    State(service): State<Arc<AvailabilityService>>,
    Path(rule_id): Path<Uuid>,
    Json(request): Json<DeactivateRuleRequest>,
) -> Result<Json<Value>, AppError> {
    let rule = service
        .deactivate_rule(rule_id, request.actor_id)
        .await
        .map_err(map_error)?;

    Ok(Json(json!({
        "success": true,
        "rule": rule
    })))
}

#[axum::debug_handler]
pub async fn list_rules(
    State(service): State<Arc<AvailabilityService>>,
    Path(specialist_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let rules = service.list_rules(specialist_id).await.map_err(map_error)?;

    Ok(Json(json!({ "rules": rules })))
}

#[axum::debug_handler]
pub async fn resolve_windows(
    State(service): State<Arc<AvailabilityService>>,
    Path(specialist_id): Path<Uuid>,
    Query(query): Query<WindowQuery>,
) -> Result<Json<Value>, AppError> {
    let windows = service
        .resolve(specialist_id, query.from, query.to)
        .await
        .map_err(map_error)?;

    Ok(Json(json!({ "windows": windows })))
}
