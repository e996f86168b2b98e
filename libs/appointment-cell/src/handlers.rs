// libs/appointment-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_models::error::AppError;

use crate::models::{
    AppointmentSearchQuery, BookingError, CreateAppointmentRequest,
    RescheduleAppointmentRequest, TransitionRequest,
};
use crate::services::booking::BookingEngine;

fn map_error(e: BookingError) -> AppError {
    match e {
        BookingError::InvalidWindow(msg) => AppError::BadRequest(msg),
        BookingError::InvalidRange => {
            AppError::BadRequest("Date range start must be before end".to_string())
        }
        BookingError::BookingConflict { reason, .. } => {
            AppError::Conflict(format!("Booking conflict: {}", reason))
        }
        BookingError::InvalidTransition { from, event } => AppError::BadRequest(format!(
            "Event {} is not legal from status {}",
            event, from
        )),
        BookingError::AlreadyTerminal => {
            AppError::Conflict("Appointment is in a terminal state".to_string())
        }
        BookingError::Timeout => AppError::Timeout("Booking deadline expired".to_string()),
        BookingError::NotFound(what) => AppError::NotFound(format!("{} not found", what)),
        BookingError::PersistenceFailure(msg) => AppError::Database(msg),
    }
}

#[axum::debug_handler]
pub async fn create_appointment(
    State(engine): State<Arc<BookingEngine>>,
    Json(request): Json<CreateAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let appointment = engine.create(request).await.map_err(map_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment booked successfully"
    })))
}

#[axum::debug_handler]
pub async fn get_appointment(
    State(engine): State<Arc<BookingEngine>>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let appointment = engine.get(appointment_id).await.map_err(map_error)?;

    Ok(Json(json!(appointment)))
}

#[axum::debug_handler]
pub async fn search_appointments(
    State(engine): State<Arc<BookingEngine>>,
    Query(query): Query<AppointmentSearchQuery>,
) -> Result<Json<Value>, AppError> {
    let appointments = engine.search(query).await.map_err(map_error)?;
    let count = appointments.len();

    Ok(Json(json!({
        "appointments": appointments,
        "count": count
    })))
}

#[axum::debug_handler]
pub async fn reschedule_appointment(
    State(engine): State<Arc<BookingEngine>>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<RescheduleAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let appointment = engine
        .reschedule(appointment_id, request)
        .await
        .map_err(map_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment rescheduled successfully"
    })))
}

#[axum::debug_handler]
pub async fn transition_appointment(
    State(engine): State<Arc<BookingEngine>>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<TransitionRequest>,
) -> Result<Json<Value>, AppError> {
    let appointment = engine
        .transition(appointment_id, request.event, request.actor_id)
        .await
        .map_err(map_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment
    })))
}
