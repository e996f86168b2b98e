// libs/specialist-cell/src/router.rs
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers;
use crate::services::availability::AvailabilityService;

pub fn specialist_routes(service: Arc<AvailabilityService>) -> Router {
    Router::new()
        .route("/{specialist_id}/availability", post(handlers::create_recurring_rule))
        .route("/{specialist_id}/availability", get(handlers::list_rules))
        .route("/{specialist_id}/availability/exceptions", post(handlers::create_exception))
        .route("/{specialist_id}/availability/windows", get(handlers::resolve_windows))
        .route("/availability/{rule_id}/deactivate", post(handlers::deactivate_rule))
        .with_state(service)
}
