// libs/appointment-cell/src/services/booking.rs
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use specialist_cell::AvailabilityService;

use crate::models::{
    Appointment, AppointmentSearchQuery, AppointmentStatus, AuditEntry, BookingError,
    BookingEvent, BookingEventType, ConflictCheck, CreateAppointmentRequest,
    RescheduleAppointmentRequest, StoreError, TransitionEvent,
};
use crate::services::conflict::ConflictDetector;
use crate::services::dispatch::{AuditSink, NotificationDispatcher};
use crate::services::lifecycle::AppointmentLifecycle;
use crate::store::AppointmentStore;

/// Per-specialist mutual exclusion. The specialist's appointment rows are
/// the shared resource; holding the guard across check-then-write is what
/// keeps the no-overlap invariant true under concurrent callers.
#[derive(Default)]
struct SpecialistLocks {
    inner: Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>,
}

impl SpecialistLocks {
    async fn acquire(&self, specialist_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.inner.lock().unwrap();
            Arc::clone(
                locks
                    .entry(specialist_id)
                    .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
            )
        };
        lock.lock_owned().await
    }
}

pub struct BookingEngine {
    appointments: Arc<dyn AppointmentStore>,
    conflicts: ConflictDetector,
    lifecycle: AppointmentLifecycle,
    dispatcher: Arc<dyn NotificationDispatcher>,
    audit: Arc<dyn AuditSink>,
    locks: SpecialistLocks,
    max_attempts: u32,
}

impl BookingEngine {
    pub fn new(
        appointments: Arc<dyn AppointmentStore>,
        availability: Arc<AvailabilityService>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        audit: Arc<dyn AuditSink>,
        max_attempts: u32,
    ) -> Self {
        let conflicts = ConflictDetector::new(Arc::clone(&appointments), availability);
        Self {
            appointments,
            conflicts,
            lifecycle: AppointmentLifecycle::new(),
            dispatcher,
            audit,
            locks: SpecialistLocks::default(),
            max_attempts: max_attempts.max(1),
        }
    }

    /// Book a new appointment. The record lands as Pending; any conflict
    /// leaves the store untouched.
    pub async fn create(
        &self,
        request: CreateAppointmentRequest,
    ) -> Result<Appointment, BookingError> {
        match request.deadline_ms {
            Some(ms) => {
                let deadline = Duration::from_millis(ms);
                tokio::time::timeout(deadline, self.create_inner(request))
                    .await
                    .map_err(|_| BookingError::Timeout)?
            }
            None => self.create_inner(request).await,
        }
    }

    async fn create_inner(
        &self,
        request: CreateAppointmentRequest,
    ) -> Result<Appointment, BookingError> {
        info!(
            "Booking appointment for patient {} with specialist {}",
            request.patient_id, request.specialist_id
        );

        if request.end_datetime <= request.start_datetime {
            return Err(BookingError::InvalidWindow(
                "end must be strictly after start".to_string(),
            ));
        }

        if !self
            .appointments
            .specialist_exists(request.specialist_id)
            .await
            .map_err(BookingError::from)?
        {
            return Err(BookingError::NotFound("Specialist".to_string()));
        }
        if !self
            .appointments
            .patient_exists(request.patient_id)
            .await
            .map_err(BookingError::from)?
        {
            return Err(BookingError::NotFound("Patient".to_string()));
        }

        let _guard = self.locks.acquire(request.specialist_id).await;

        for attempt in 1..=self.max_attempts {
            // Authoritative check, re-run on every attempt so a transient
            // abort is never reported as a booking conflict
            match self
                .conflicts
                .check(
                    request.specialist_id,
                    request.start_datetime,
                    request.end_datetime,
                    None,
                )
                .await?
            {
                ConflictCheck::Available => {}
                ConflictCheck::Conflict {
                    reason,
                    conflicting_appointment_id,
                } => {
                    warn!(
                        "Booking rejected for specialist {}: {}",
                        request.specialist_id, reason
                    );
                    return Err(BookingError::conflict(reason, conflicting_appointment_id));
                }
            }

            let now = Utc::now();
            let appointment = Appointment {
                id: Uuid::new_v4(),
                specialist_id: request.specialist_id,
                patient_id: request.patient_id,
                start_datetime: request.start_datetime,
                end_datetime: request.end_datetime,
                status: AppointmentStatus::Pending,
                appointment_type: request.appointment_type.clone(),
                internal_notes: request.internal_notes.clone(),
                created_at: now,
                updated_at: now,
                created_by: Some(request.actor_id),
                updated_by: Some(request.actor_id),
            };

            match self.appointments.insert(&appointment).await {
                Ok(()) => {
                    info!("Appointment {} booked as Pending", appointment.id);
                    self.post_commit(BookingEventType::Created, &appointment, None, request.actor_id)
                        .await;
                    return Ok(appointment);
                }
                Err(StoreError::Serialization) if attempt < self.max_attempts => {
                    warn!(
                        "Serialization abort on booking attempt {}/{}, retrying",
                        attempt, self.max_attempts
                    );
                    tokio::time::sleep(Duration::from_millis(100 * attempt as u64)).await;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(StoreError::Serialization.into())
    }

    /// Move a live appointment to a new window, keeping its status. The
    /// appointment's own interval is excluded from the conflict check so a
    /// shift that overlaps only itself succeeds.
    pub async fn reschedule(
        &self,
        appointment_id: Uuid,
        request: RescheduleAppointmentRequest,
    ) -> Result<Appointment, BookingError> {
        match request.deadline_ms {
            Some(ms) => {
                let deadline = Duration::from_millis(ms);
                tokio::time::timeout(deadline, self.reschedule_inner(appointment_id, request))
                    .await
                    .map_err(|_| BookingError::Timeout)?
            }
            None => self.reschedule_inner(appointment_id, request).await,
        }
    }

    async fn reschedule_inner(
        &self,
        appointment_id: Uuid,
        request: RescheduleAppointmentRequest,
    ) -> Result<Appointment, BookingError> {
        debug!("Rescheduling appointment {}", appointment_id);

        if request.new_end <= request.new_start {
            return Err(BookingError::InvalidWindow(
                "end must be strictly after start".to_string(),
            ));
        }

        let current = self.get(appointment_id).await?;
        let _guard = self.locks.acquire(current.specialist_id).await;

        // Re-read under the lock; the status may have moved since the
        // unguarded read
        let current = self.get(appointment_id).await?;
        if !self.lifecycle.can_reschedule(&current.status) {
            return Err(BookingError::AlreadyTerminal);
        }

        for attempt in 1..=self.max_attempts {
            match self
                .conflicts
                .check(
                    current.specialist_id,
                    request.new_start,
                    request.new_end,
                    Some(appointment_id),
                )
                .await?
            {
                ConflictCheck::Available => {}
                ConflictCheck::Conflict {
                    reason,
                    conflicting_appointment_id,
                } => {
                    warn!(
                        "Reschedule of {} rejected: {}",
                        appointment_id, reason
                    );
                    return Err(BookingError::conflict(reason, conflicting_appointment_id));
                }
            }

            match self
                .appointments
                .update_window(appointment_id, request.new_start, request.new_end, request.actor_id)
                .await
            {
                Ok(updated) => {
                    info!(
                        "Appointment {} rescheduled to [{}, {})",
                        appointment_id, request.new_start, request.new_end
                    );
                    let old = serde_json::to_value(&current).ok();
                    self.post_commit(BookingEventType::Rescheduled, &updated, old, request.actor_id)
                        .await;
                    return Ok(updated);
                }
                Err(StoreError::Serialization) if attempt < self.max_attempts => {
                    warn!(
                        "Serialization abort on reschedule attempt {}/{}, retrying",
                        attempt, self.max_attempts
                    );
                    tokio::time::sleep(Duration::from_millis(100 * attempt as u64)).await;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(StoreError::Serialization.into())
    }

    /// Drive the appointment state machine one edge.
    pub async fn transition(
        &self,
        appointment_id: Uuid,
        event: TransitionEvent,
        actor: Uuid,
    ) -> Result<Appointment, BookingError> {
        debug!("Transition {} requested for appointment {}", event, appointment_id);

        let current = self.get(appointment_id).await?;
        let _guard = self.locks.acquire(current.specialist_id).await;

        let current = self.get(appointment_id).await?;
        let next = self.lifecycle.next_status(&current.status, &event)?;

        let updated = self
            .appointments
            .update_status(appointment_id, next, actor)
            .await
            .map_err(BookingError::from)?;

        info!(
            "Appointment {} moved {} -> {} ({})",
            appointment_id, current.status, next, event
        );

        let old = serde_json::to_value(&current).ok();
        self.post_commit(BookingEventType::StatusChanged, &updated, old, actor)
            .await;
        Ok(updated)
    }

    pub async fn get(&self, appointment_id: Uuid) -> Result<Appointment, BookingError> {
        self.appointments
            .get(appointment_id)
            .await
            .map_err(BookingError::from)
    }

    pub async fn search(
        &self,
        query: AppointmentSearchQuery,
    ) -> Result<Vec<Appointment>, BookingError> {
        self.appointments
            .search(&query)
            .await
            .map_err(BookingError::from)
    }

    /// Best-effort post-commit work: domain event plus audit snapshot.
    /// Neither may fail the booking that already happened.
    async fn post_commit(
        &self,
        event_type: BookingEventType,
        appointment: &Appointment,
        old_values: Option<Value>,
        actor: Uuid,
    ) {
        let event = BookingEvent {
            event_type,
            appointment_id: appointment.id,
            specialist_id: appointment.specialist_id,
            patient_id: appointment.patient_id,
            timestamp: Utc::now(),
        };
        if let Err(e) = self.dispatcher.dispatch(&event).await {
            warn!(
                "Notification dispatch failed for appointment {} (ignored): {}",
                appointment.id, e
            );
        }

        let action = if old_values.is_some() { "UPDATE" } else { "INSERT" };
        let entry = AuditEntry {
            table_name: "appointments".to_string(),
            record_id: appointment.id,
            action: action.to_string(),
            old_values,
            new_values: serde_json::to_value(appointment).ok(),
            user_id: actor,
            timestamp: Utc::now(),
        };
        if let Err(e) = self.audit.record(&entry).await {
            error!(
                "Audit write failed for appointment {}: {}",
                appointment.id, e
            );
        }
    }
}
