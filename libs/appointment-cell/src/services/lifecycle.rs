// libs/appointment-cell/src/services/lifecycle.rs
use tracing::{debug, warn};

use crate::models::{AppointmentStatus, BookingError, TransitionEvent};

pub struct AppointmentLifecycle;

impl AppointmentLifecycle {
    pub fn new() -> Self {
        Self
    }

    /// Resolve the status an event leads to, or reject the edge. A terminal
    /// appointment rejects every event with AlreadyTerminal; illegal edges
    /// between live states reject with InvalidTransition.
    pub fn next_status(
        &self,
        current: &AppointmentStatus,
        event: &TransitionEvent,
    ) -> Result<AppointmentStatus, BookingError> {
        debug!("Validating transition {} from {}", event, current);

        if current.is_terminal() {
            warn!("Transition {} attempted on terminal status {}", event, current);
            return Err(BookingError::AlreadyTerminal);
        }

        match (current, event) {
            (AppointmentStatus::Pending, TransitionEvent::Confirm) => {
                Ok(AppointmentStatus::Confirmed)
            }
            (AppointmentStatus::Pending, TransitionEvent::Cancel)
            | (AppointmentStatus::Confirmed, TransitionEvent::Cancel) => {
                Ok(AppointmentStatus::Canceled)
            }
            (AppointmentStatus::Confirmed, TransitionEvent::Complete) => {
                Ok(AppointmentStatus::Completed)
            }
            (AppointmentStatus::Confirmed, TransitionEvent::MarkNoShow) => {
                Ok(AppointmentStatus::NoShow)
            }
            _ => {
                warn!("Invalid transition attempted: {} from {}", event, current);
                Err(BookingError::InvalidTransition {
                    from: *current,
                    event: *event,
                })
            }
        }
    }

    /// Events legal from the given status.
    pub fn valid_events(&self, current: &AppointmentStatus) -> Vec<TransitionEvent> {
        match current {
            AppointmentStatus::Pending => {
                vec![TransitionEvent::Confirm, TransitionEvent::Cancel]
            }
            AppointmentStatus::Confirmed => vec![
                TransitionEvent::Cancel,
                TransitionEvent::Complete,
                TransitionEvent::MarkNoShow,
            ],
            // Terminal states accept nothing
            AppointmentStatus::Canceled
            | AppointmentStatus::Completed
            | AppointmentStatus::NoShow => vec![],
        }
    }

    /// Time-range edits are only legal while the appointment is live.
    pub fn can_reschedule(&self, current: &AppointmentStatus) -> bool {
        current.is_active()
    }
}

impl Default for AppointmentLifecycle {
    fn default() -> Self {
        Self::new()
    }
}
