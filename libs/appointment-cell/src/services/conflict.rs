use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use specialist_cell::{AvailabilityError, AvailabilityService};

use crate::models::{BookingError, ConflictCheck, ConflictReason};
use crate::store::AppointmentStore;

/// Decides whether a candidate window double-books the specialist or falls
/// outside resolved availability. Read-only; the BookingEngine re-runs the
/// check under its serialization guard before any write.
pub struct ConflictDetector {
    appointments: Arc<dyn AppointmentStore>,
    availability: Arc<AvailabilityService>,
}

impl ConflictDetector {
    pub fn new(
        appointments: Arc<dyn AppointmentStore>,
        availability: Arc<AvailabilityService>,
    ) -> Self {
        Self {
            appointments,
            availability,
        }
    }

    pub async fn check(
        &self,
        specialist_id: Uuid,
        candidate_start: DateTime<Utc>,
        candidate_end: DateTime<Utc>,
        exclude_appointment_id: Option<Uuid>,
    ) -> Result<ConflictCheck, BookingError> {
        if candidate_end <= candidate_start {
            return Err(BookingError::InvalidWindow(
                "end must be strictly after start".to_string(),
            ));
        }

        debug!(
            "Checking conflicts for specialist {} from {} to {}",
            specialist_id, candidate_start, candidate_end
        );

        // Intervals are half-open [start, end): two windows overlap iff
        // s1 < e2 && s2 < e1, so back-to-back bookings never collide.
        let existing = self
            .appointments
            .active_for_specialist_in_range(
                specialist_id,
                candidate_start,
                candidate_end,
                exclude_appointment_id,
            )
            .await
            .map_err(BookingError::from)?;

        for appointment in &existing {
            if appointment.overlaps(candidate_start, candidate_end) {
                warn!(
                    "Double-booking detected for specialist {}: appointment {}",
                    specialist_id, appointment.id
                );
                return Ok(ConflictCheck::Conflict {
                    reason: ConflictReason::DoubleBooked,
                    conflicting_appointment_id: Some(appointment.id),
                });
            }
        }

        // The candidate must sit entirely inside one resolved window; a
        // booking may not span the gap between two windows.
        let from = candidate_start.date_naive();
        let to = candidate_end.date_naive() + Duration::days(1);
        let windows = match self.availability.resolve(specialist_id, from, to).await {
            Ok(windows) => windows,
            // No rules at all: nothing is bookable for this specialist
            Err(AvailabilityError::UnknownSpecialist) => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        let contained = windows
            .iter()
            .any(|w| w.contains(candidate_start, candidate_end));

        if !contained {
            return Ok(ConflictCheck::Conflict {
                reason: ConflictReason::OutsideAvailability,
                conflicting_appointment_id: None,
            });
        }

        Ok(ConflictCheck::Available)
    }
}
