// libs/appointment-cell/src/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use specialist_cell::AvailabilityError;

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

/// One row of the `appointments` table. Times are half-open `[start, end)`;
/// an appointment ending exactly when another begins does not overlap it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub specialist_id: Uuid,
    pub patient_id: Uuid,
    pub start_datetime: DateTime<Utc>,
    pub end_datetime: DateTime<Utc>,
    pub status: AppointmentStatus,
    pub appointment_type: AppointmentType,
    pub internal_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: Option<Uuid>,
    pub updated_by: Option<Uuid>,
}

impl Appointment {
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start_datetime < end && start < self.end_datetime
    }
}

/// Wire strings match the schema's check constraint exactly.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Canceled,
    Completed,
    NoShow,
}

impl AppointmentStatus {
    /// Terminal states accept no transitions and no time-range edits.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Canceled
                | AppointmentStatus::Completed
                | AppointmentStatus::NoShow
        )
    }

    /// Statuses that occupy a time slot for conflict purposes.
    pub fn is_active(&self) -> bool {
        matches!(self, AppointmentStatus::Pending | AppointmentStatus::Confirmed)
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Pending => write!(f, "Pending"),
            AppointmentStatus::Confirmed => write!(f, "Confirmed"),
            AppointmentStatus::Canceled => write!(f, "Canceled"),
            AppointmentStatus::Completed => write!(f, "Completed"),
            AppointmentStatus::NoShow => write!(f, "NoShow"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AppointmentType {
    #[serde(alias = "initial_consultation", alias = "initial")]
    InitialConsultation,

    #[serde(alias = "follow_up", alias = "followup")]
    FollowUp,

    #[serde(alias = "treatment", alias = "session")]
    Treatment,

    #[serde(alias = "assessment", alias = "evaluation")]
    Assessment,
}

impl fmt::Display for AppointmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentType::InitialConsultation => write!(f, "InitialConsultation"),
            AppointmentType::FollowUp => write!(f, "FollowUp"),
            AppointmentType::Treatment => write!(f, "Treatment"),
            AppointmentType::Assessment => write!(f, "Assessment"),
        }
    }
}

/// Events the state machine accepts. Edges: Pending --confirm--> Confirmed;
/// Pending|Confirmed --cancel--> Canceled; Confirmed --complete--> Completed;
/// Confirmed --mark_no_show--> NoShow.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransitionEvent {
    Confirm,
    Cancel,
    Complete,
    MarkNoShow,
}

impl fmt::Display for TransitionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionEvent::Confirm => write!(f, "confirm"),
            TransitionEvent::Cancel => write!(f, "cancel"),
            TransitionEvent::Complete => write!(f, "complete"),
            TransitionEvent::MarkNoShow => write!(f, "mark_no_show"),
        }
    }
}

// ==============================================================================
// REQUEST/RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAppointmentRequest {
    pub specialist_id: Uuid,
    pub patient_id: Uuid,
    pub start_datetime: DateTime<Utc>,
    pub end_datetime: DateTime<Utc>,
    pub appointment_type: AppointmentType,
    pub internal_notes: Option<String>,
    pub actor_id: Uuid,
    /// Optional caller deadline in milliseconds; expiry yields Timeout with
    /// no partial write.
    pub deadline_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescheduleAppointmentRequest {
    pub new_start: DateTime<Utc>,
    pub new_end: DateTime<Utc>,
    pub actor_id: Uuid,
    pub deadline_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRequest {
    pub event: TransitionEvent,
    pub actor_id: Uuid,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppointmentSearchQuery {
    pub specialist_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
    pub status: Option<AppointmentStatus>,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
    pub limit: Option<i32>,
    pub offset: Option<i32>,
}

// ==============================================================================
// CONFLICT DETECTION MODELS
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictCheck {
    Available,
    Conflict {
        reason: ConflictReason,
        conflicting_appointment_id: Option<Uuid>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictReason {
    DoubleBooked,
    OutsideAvailability,
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictReason::DoubleBooked => write!(f, "double-booked"),
            ConflictReason::OutsideAvailability => write!(f, "outside-availability"),
        }
    }
}

// ==============================================================================
// DOMAIN EVENTS AND AUDIT MODELS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BookingEventType {
    Created,
    Rescheduled,
    StatusChanged,
}

/// Outcome event handed to the notification dispatcher. Fire-and-forget:
/// delivery failure never affects the booking write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingEvent {
    pub event_type: BookingEventType,
    pub appointment_id: Uuid,
    pub specialist_id: Uuid,
    pub patient_id: Uuid,
    pub timestamp: DateTime<Utc>,
}

/// Before/after snapshot written to the audit sink on every mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub table_name: String,
    pub record_id: Uuid,
    pub action: String,
    pub old_values: Option<Value>,
    pub new_values: Option<Value>,
    pub user_id: Uuid,
    pub timestamp: DateTime<Utc>,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

/// Storage-layer failures, kept separate from business errors so transient
/// serialization aborts can be retried instead of surfacing as conflicts.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("serialization failure")]
    Serialization,

    #[error("record not found")]
    NotFound,

    #[error("backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum BookingError {
    #[error("Invalid appointment window: {0}")]
    InvalidWindow(String),

    #[error("Invalid date range: start must be before end")]
    InvalidRange,

    #[error("Booking conflict: {reason}")]
    BookingConflict {
        reason: ConflictReason,
        conflicting_appointment_id: Option<Uuid>,
    },

    #[error("Event {event} is not legal from status {from}")]
    InvalidTransition {
        from: AppointmentStatus,
        event: TransitionEvent,
    },

    #[error("Appointment is in a terminal state")]
    AlreadyTerminal,

    #[error("Operation deadline expired")]
    Timeout,

    #[error("{0} not found")]
    NotFound(String),

    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),
}

impl BookingError {
    pub fn conflict(reason: ConflictReason, conflicting_appointment_id: Option<Uuid>) -> Self {
        BookingError::BookingConflict {
            reason,
            conflicting_appointment_id,
        }
    }
}

impl From<StoreError> for BookingError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => BookingError::NotFound("Appointment".to_string()),
            StoreError::Serialization => {
                // Only reachable once the engine has stopped retrying
                BookingError::PersistenceFailure("serialization retries exhausted".to_string())
            }
            StoreError::Backend(msg) => BookingError::PersistenceFailure(msg),
        }
    }
}

impl From<AvailabilityError> for BookingError {
    fn from(e: AvailabilityError) -> Self {
        match e {
            AvailabilityError::InvalidRange => BookingError::InvalidRange,
            AvailabilityError::UnknownSpecialist => {
                BookingError::NotFound("Specialist availability".to_string())
            }
            AvailabilityError::RuleNotFound => {
                BookingError::NotFound("Availability rule".to_string())
            }
            AvailabilityError::InvalidRule(msg) => BookingError::PersistenceFailure(format!(
                "malformed availability rule: {}",
                msg
            )),
            AvailabilityError::Storage(msg) => BookingError::PersistenceFailure(msg),
        }
    }
}
