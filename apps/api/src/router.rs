use std::sync::Arc;

use axum::{routing::get, Json, Router};
use serde_json::json;

use appointment_cell::services::booking::BookingEngine;
use appointment_cell::services::dispatch::{SupabaseAuditSink, SupabaseNotificationDispatcher};
use appointment_cell::store::SupabaseAppointmentStore;
use shared_config::AppConfig;
use shared_database::SupabaseClient;
use specialist_cell::services::availability::AvailabilityService;
use specialist_cell::store::SupabaseAvailabilityStore;

/// Build the booking engine and availability service once; the engine's
/// per-specialist locks only serialize callers if every request shares them.
pub fn create_router(config: &AppConfig) -> Router {
    let supabase = Arc::new(SupabaseClient::new(config));

    let availability = Arc::new(AvailabilityService::new(Arc::new(
        SupabaseAvailabilityStore::new(Arc::clone(&supabase)),
    )));

    let engine = Arc::new(BookingEngine::new(
        Arc::new(SupabaseAppointmentStore::new(Arc::clone(&supabase))),
        Arc::clone(&availability),
        Arc::new(SupabaseNotificationDispatcher::new(Arc::clone(&supabase))),
        Arc::new(SupabaseAuditSink::new(Arc::clone(&supabase))),
        config.booking_max_attempts,
    ));

    Router::new()
        .route("/health", get(health_check))
        .nest(
            "/api/v1/specialists",
            specialist_cell::router::specialist_routes(availability),
        )
        .nest(
            "/api/v1/appointments",
            appointment_cell::router::appointment_routes(engine),
        )
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": "syei-backoffice-api"
    }))
}
