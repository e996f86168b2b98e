// libs/appointment-cell/src/store.rs
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use shared_database::SupabaseClient;

use crate::models::{
    Appointment, AppointmentSearchQuery, AppointmentStatus, StoreError,
};

/// Persistence boundary for appointments. All writes go through the
/// BookingEngine so the no-overlap invariant holds.
#[async_trait]
pub trait AppointmentStore: Send + Sync {
    async fn specialist_exists(&self, specialist_id: Uuid) -> Result<bool, StoreError>;
    async fn patient_exists(&self, patient_id: Uuid) -> Result<bool, StoreError>;
    async fn get(&self, appointment_id: Uuid) -> Result<Appointment, StoreError>;
    /// Appointments with status in {Pending, Confirmed} whose `[start, end)`
    /// interval intersects the given range, minus `exclude`.
    async fn active_for_specialist_in_range(
        &self,
        specialist_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        exclude: Option<Uuid>,
    ) -> Result<Vec<Appointment>, StoreError>;
    async fn insert(&self, appointment: &Appointment) -> Result<(), StoreError>;
    async fn update_window(
        &self,
        appointment_id: Uuid,
        new_start: DateTime<Utc>,
        new_end: DateTime<Utc>,
        actor: Uuid,
    ) -> Result<Appointment, StoreError>;
    async fn update_status(
        &self,
        appointment_id: Uuid,
        status: AppointmentStatus,
        actor: Uuid,
    ) -> Result<Appointment, StoreError>;
    async fn search(&self, query: &AppointmentSearchQuery) -> Result<Vec<Appointment>, StoreError>;
}

// ==============================================================================
// POSTGREST-BACKED STORE
// ==============================================================================

pub struct SupabaseAppointmentStore {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseAppointmentStore {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    async fn row_exists(&self, path: &str) -> Result<bool, StoreError> {
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, path, None)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(!result.is_empty())
    }

    fn parse_appointments(result: Vec<Value>) -> Result<Vec<Appointment>, StoreError> {
        result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Appointment>, _>>()
            .map_err(|e| StoreError::Backend(format!("Failed to parse appointments: {}", e)))
    }

    fn map_write_error(e: anyhow::Error) -> StoreError {
        let msg = e.to_string();
        // PostgREST reports exclusion/serialization aborts as 40001/40P01
        if msg.contains("40001") || msg.contains("40P01") || msg.contains("could not serialize") {
            StoreError::Serialization
        } else {
            StoreError::Backend(msg)
        }
    }
}

#[async_trait]
impl AppointmentStore for SupabaseAppointmentStore {
    async fn specialist_exists(&self, specialist_id: Uuid) -> Result<bool, StoreError> {
        self.row_exists(&format!("/rest/v1/specialists?id=eq.{}&select=id", specialist_id))
            .await
    }

    async fn patient_exists(&self, patient_id: Uuid) -> Result<bool, StoreError> {
        self.row_exists(&format!("/rest/v1/patients?id=eq.{}&select=id", patient_id))
            .await
    }

    async fn get(&self, appointment_id: Uuid) -> Result<Appointment, StoreError> {
        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, None)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let mut appointments = Self::parse_appointments(result)?;
        if appointments.is_empty() {
            return Err(StoreError::NotFound);
        }
        Ok(appointments.remove(0))
    }

    async fn active_for_specialist_in_range(
        &self,
        specialist_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        exclude: Option<Uuid>,
    ) -> Result<Vec<Appointment>, StoreError> {
        let mut query_parts = vec![
            format!("specialist_id=eq.{}", specialist_id),
            format!("start_datetime=lt.{}", urlencoding::encode(&end.to_rfc3339())),
            format!("end_datetime=gt.{}", urlencoding::encode(&start.to_rfc3339())),
            "status=in.(Pending,Confirmed)".to_string(),
        ];

        if let Some(exclude_id) = exclude {
            query_parts.push(format!("id=neq.{}", exclude_id));
        }

        let path = format!(
            "/rest/v1/appointments?{}&order=start_datetime.asc",
            query_parts.join("&")
        );

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, None)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Self::parse_appointments(result)
    }

    async fn insert(&self, appointment: &Appointment) -> Result<(), StoreError> {
        let appointment_data = json!({
            "id": appointment.id,
            "specialist_id": appointment.specialist_id,
            "patient_id": appointment.patient_id,
            "start_datetime": appointment.start_datetime.to_rfc3339(),
            "end_datetime": appointment.end_datetime.to_rfc3339(),
            "status": appointment.status.to_string(),
            "appointment_type": appointment.appointment_type.to_string(),
            "internal_notes": appointment.internal_notes,
            "created_at": appointment.created_at.to_rfc3339(),
            "updated_at": appointment.updated_at.to_rfc3339(),
            "created_by": appointment.created_by,
            "updated_by": appointment.updated_by,
        });

        let result: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/appointments",
                Some(appointment_data),
                Some(representation_headers()),
            )
            .await
            .map_err(Self::map_write_error)?;

        if result.is_empty() {
            return Err(StoreError::Backend(
                "Failed to create appointment".to_string(),
            ));
        }

        debug!("Appointment {} stored", appointment.id);
        Ok(())
    }

    async fn update_window(
        &self,
        appointment_id: Uuid,
        new_start: DateTime<Utc>,
        new_end: DateTime<Utc>,
        actor: Uuid,
    ) -> Result<Appointment, StoreError> {
        let update_data = json!({
            "start_datetime": new_start.to_rfc3339(),
            "end_datetime": new_end.to_rfc3339(),
            "updated_at": Utc::now().to_rfc3339(),
            "updated_by": actor,
        });

        self.patch(appointment_id, update_data).await
    }

    async fn update_status(
        &self,
        appointment_id: Uuid,
        status: AppointmentStatus,
        actor: Uuid,
    ) -> Result<Appointment, StoreError> {
        let update_data = json!({
            "status": status.to_string(),
            "updated_at": Utc::now().to_rfc3339(),
            "updated_by": actor,
        });

        self.patch(appointment_id, update_data).await
    }

    async fn search(&self, query: &AppointmentSearchQuery) -> Result<Vec<Appointment>, StoreError> {
        let mut query_parts = Vec::new();

        if let Some(specialist_id) = query.specialist_id {
            query_parts.push(format!("specialist_id=eq.{}", specialist_id));
        }
        if let Some(patient_id) = query.patient_id {
            query_parts.push(format!("patient_id=eq.{}", patient_id));
        }
        if let Some(status) = query.status {
            query_parts.push(format!("status=eq.{}", status));
        }
        if let Some(from_date) = query.from_date {
            query_parts.push(format!(
                "start_datetime=gte.{}",
                urlencoding::encode(&from_date.to_rfc3339())
            ));
        }
        if let Some(to_date) = query.to_date {
            query_parts.push(format!(
                "start_datetime=lte.{}",
                urlencoding::encode(&to_date.to_rfc3339())
            ));
        }

        let mut path = format!(
            "/rest/v1/appointments?{}&order=start_datetime.asc",
            query_parts.join("&")
        );

        if let Some(limit) = query.limit {
            path.push_str(&format!("&limit={}", limit));
        }
        if let Some(offset) = query.offset {
            path.push_str(&format!("&offset={}", offset));
        }

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, None)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Self::parse_appointments(result)
    }
}

impl SupabaseAppointmentStore {
    async fn patch(&self, appointment_id: Uuid, update_data: Value) -> Result<Appointment, StoreError> {
        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);

        let result: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                Some(update_data),
                Some(representation_headers()),
            )
            .await
            .map_err(Self::map_write_error)?;

        let mut appointments = Self::parse_appointments(result)?;
        if appointments.is_empty() {
            return Err(StoreError::NotFound);
        }
        Ok(appointments.remove(0))
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
// IN-MEMORY STORE
// ==============================================================================

/// Process-local store used by tests and local development. Specialist and
/// patient ids must be registered up front; the real identity rows live in
/// the external user store.
#[derive(Default)]
pub struct MemoryAppointmentStore {
    appointments: Mutex<HashMap<Uuid, Appointment>>,
    specialists: Mutex<HashSet<Uuid>>,
    patients: Mutex<HashSet<Uuid>>,
}

impl MemoryAppointmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_specialist(&self, specialist_id: Uuid) {
        self.specialists.lock().unwrap().insert(specialist_id);
    }

    pub fn register_patient(&self, patient_id: Uuid) {
        self.patients.lock().unwrap().insert(patient_id);
    }
}

#[async_trait]
impl AppointmentStore for MemoryAppointmentStore {
    async fn specialist_exists(&self, specialist_id: Uuid) -> Result<bool, StoreError> {
        Ok(self.specialists.lock().unwrap().contains(&specialist_id))
    }

    async fn patient_exists(&self, patient_id: Uuid) -> Result<bool, StoreError> {
        Ok(self.patients.lock().unwrap().contains(&patient_id))
    }

    async fn get(&self, appointment_id: Uuid) -> Result<Appointment, StoreError> {
        self.appointments
            .lock()
            .unwrap()
            .get(&appointment_id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn active_for_specialist_in_range(
        &self,
        specialist_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        exclude: Option<Uuid>,
    ) -> Result<Vec<Appointment>, StoreError> {
        let appointments = self.appointments.lock().unwrap();
        let mut matching: Vec<Appointment> = appointments
            .values()
            .filter(|apt| {
                apt.specialist_id == specialist_id
                    && apt.status.is_active()
                    && apt.overlaps(start, end)
                    && Some(apt.id) != exclude
            })
            .cloned()
            .collect();
        matching.sort_by_key(|apt| apt.start_datetime);
        Ok(matching)
    }

    async fn insert(&self, appointment: &Appointment) -> Result<(), StoreError> {
        self.appointments
            .lock()
            .unwrap()
            .insert(appointment.id, appointment.clone());
        Ok(())
    }

    async fn update_window(
        &self,
        appointment_id: Uuid,
        new_start: DateTime<Utc>,
        new_end: DateTime<Utc>,
        actor: Uuid,
    ) -> Result<Appointment, StoreError> {
        let mut appointments = self.appointments.lock().unwrap();
        let appointment = appointments
            .get_mut(&appointment_id)
            .ok_or(StoreError::NotFound)?;
        appointment.start_datetime = new_start;
        appointment.end_datetime = new_end;
        appointment.updated_at = Utc::now();
        appointment.updated_by = Some(actor);
        Ok(appointment.clone())
    }

    async fn update_status(
        &self,
        appointment_id: Uuid,
        status: AppointmentStatus,
        actor: Uuid,
    ) -> Result<Appointment, StoreError> {
        let mut appointments = self.appointments.lock().unwrap();
        let appointment = appointments
            .get_mut(&appointment_id)
            .ok_or(StoreError::NotFound)?;
        appointment.status = status;
        appointment.updated_at = Utc::now();
        appointment.updated_by = Some(actor);
        Ok(appointment.clone())
    }

    async fn search(&self, query: &AppointmentSearchQuery) -> Result<Vec<Appointment>, StoreError> {
        let appointments = self.appointments.lock().unwrap();
        let mut matching: Vec<Appointment> = appointments
            .values()
            .filter(|apt| {
                query.specialist_id.map_or(true, |id| apt.specialist_id == id)
                    && query.patient_id.map_or(true, |id| apt.patient_id == id)
                    && query.status.map_or(true, |s| apt.status == s)
                    && query.from_date.map_or(true, |d| apt.start_datetime >= d)
                    && query.to_date.map_or(true, |d| apt.start_datetime <= d)
            })
            .cloned()
            .collect();
        matching.sort_by_key(|apt| apt.start_datetime);

        let offset = query.offset.unwrap_or(0).max(0) as usize;
        let matching: Vec<Appointment> = matching.into_iter().skip(offset).collect();
        if let Some(limit) = query.limit {
            return Ok(matching.into_iter().take(limit.max(0) as usize).collect());
        }
        Ok(matching)
    }
}
