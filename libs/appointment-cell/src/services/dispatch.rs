// libs/appointment-cell/src/services/dispatch.rs
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::debug;

use shared_database::SupabaseClient;

use crate::models::{AuditEntry, BookingEvent, BookingEventType};

/// Receives booking outcome events. Fire-and-forget: the engine logs a
/// failed dispatch and moves on, it never rolls back the booking write.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn dispatch(&self, event: &BookingEvent) -> Result<()>;
}

/// Receives before/after snapshots of every appointment mutation. Failures
/// here are reported to observability, never to the booking caller.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: &AuditEntry) -> Result<()>;
}

// ==============================================================================
// POSTGREST-BACKED COLLABORATORS
// ==============================================================================

pub struct SupabaseNotificationDispatcher {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseNotificationDispatcher {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    fn title_for(event_type: &BookingEventType) -> &'static str {
        match event_type {
            BookingEventType::Created => "Appointment booked",
            BookingEventType::Rescheduled => "Appointment rescheduled",
            BookingEventType::StatusChanged => "Appointment status updated",
        }
    }
}

#[async_trait]
impl NotificationDispatcher for SupabaseNotificationDispatcher {
    async fn dispatch(&self, event: &BookingEvent) -> Result<()> {
        let notification_data = json!({
            "user_id": event.patient_id,
            "title": Self::title_for(&event.event_type),
            "message": format!(
                "Appointment {} with specialist {}",
                event.appointment_id, event.specialist_id
            ),
            "notification_type": "appointment",
            "is_read": false,
            "created_at": event.timestamp.to_rfc3339(),
        });

        let _: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/notifications",
                Some(notification_data),
                Some(representation_headers()),
            )
            .await?;

        debug!(
            "Dispatched {:?} event for appointment {}",
            event.event_type, event.appointment_id
        );
        Ok(())
    }
}

pub struct SupabaseAuditSink {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseAuditSink {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }
}

#[async_trait]
impl AuditSink for SupabaseAuditSink {
    async fn record(&self, entry: &AuditEntry) -> Result<()> {
        let audit_data = json!({
            "table_name": entry.table_name,
            "record_id": entry.record_id,
            "action": entry.action,
            "old_values": entry.old_values,
            "new_values": entry.new_values,
            "user_id": entry.user_id,
            "timestamp": entry.timestamp.to_rfc3339(),
        });

        let _: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/audit_logs",
                Some(audit_data),
                Some(representation_headers()),
            )
            .await?;

        debug!("Audit entry recorded for {}", entry.record_id);
        Ok(())
    }
}

fn representation_headers() -> reqwest::header::HeaderMap {
    let mut headers = reqwest::header::HeaderMap::new();
    headers.insert(
        "Prefer",
        reqwest::header::HeaderValue::from_static("return=representation"),
    );
    headers
}

// ==============================================================================
// RECORDING COLLABORATORS
// ==============================================================================

/// Captures events in memory; used by tests and local development.
#[derive(Default)]
pub struct RecordingDispatcher {
    events: Mutex<Vec<BookingEvent>>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<BookingEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingDispatcher {
    async fn dispatch(&self, event: &BookingEvent) -> Result<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl RecordingAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().unwrap().clone()
    }
}

#[async_trait]
impl AuditSink for RecordingAuditSink {
    async fn record(&self, entry: &AuditEntry) -> Result<()> {
        self.entries.lock().unwrap().push(entry.clone());
        Ok(())
    }
}
