// libs/specialist-cell/src/models.rs
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ==============================================================================
// AVAILABILITY RULE MODELS
// ==============================================================================

/// One row of the `availability_blocks` table. A rule is either recurring
/// (day_of_week set, exception_date null) or a date exception
/// (exception_date set). A closure exception carries no times at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityRule {
    pub id: Uuid,
    pub specialist_id: Uuid,
    pub day_of_week: Option<u8>,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub exception_date: Option<NaiveDate>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: Option<Uuid>,
    pub updated_by: Option<Uuid>,
}

/// The two forms a stored rule can take. Exceptions replace every recurring
/// rule for their date; `hours: None` closes the whole day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleForm {
    Recurring {
        weekday: u8, // 1 = Monday .. 7 = Sunday
        start: NaiveTime,
        end: NaiveTime,
    },
    Exception {
        date: NaiveDate,
        hours: Option<(NaiveTime, NaiveTime)>,
    },
}

impl AvailabilityRule {
    /// Classify the row into its tagged form, rejecting shapes the schema's
    /// check constraints would never have admitted.
    pub fn form(&self) -> Result<RuleForm, AvailabilityError> {
        if let Some(date) = self.exception_date {
            let hours = match (self.start_time, self.end_time) {
                (Some(start), Some(end)) => {
                    if end <= start {
                        return Err(AvailabilityError::InvalidRule(
                            "exception end time must be after start time".to_string(),
                        ));
                    }
                    Some((start, end))
                }
                (None, None) => None,
                _ => {
                    return Err(AvailabilityError::InvalidRule(
                        "exception must carry both times or neither".to_string(),
                    ))
                }
            };
            return Ok(RuleForm::Exception { date, hours });
        }

        let weekday = self.day_of_week.ok_or_else(|| {
            AvailabilityError::InvalidRule(
                "recurring rule is missing day_of_week".to_string(),
            )
        })?;
        if !(1..=7).contains(&weekday) {
            return Err(AvailabilityError::InvalidRule(
                "day_of_week must be between 1 (Monday) and 7 (Sunday)".to_string(),
            ));
        }
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) if end > start => Ok(RuleForm::Recurring {
                weekday,
                start,
                end,
            }),
            (Some(_), Some(_)) => Err(AvailabilityError::InvalidRule(
                "end time must be after start time".to_string(),
            )),
            _ => Err(AvailabilityError::InvalidRule(
                "recurring rule is missing start or end time".to_string(),
            )),
        }
    }
}

/// A concrete bookable window, already anchored to a calendar date.
/// Windows are half-open: the end instant is not included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl AvailabilityWindow {
    /// Whether `[start, end)` fits entirely inside this window.
    pub fn contains(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start <= start && end <= self.end
    }
}

// ==============================================================================
// REQUEST MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRecurringRuleRequest {
    pub day_of_week: u8,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub actor_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateExceptionRequest {
    pub date: NaiveDate,
    /// Omit both times to close the date entirely.
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub actor_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeactivateRuleRequest {
    pub actor_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowQuery {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum AvailabilityError {
    #[error("Invalid date range: start must be before end")]
    InvalidRange,

    #[error("Specialist has no availability rules")]
    UnknownSpecialist,

    #[error("Availability rule not found")]
    RuleNotFound,

    #[error("Invalid availability rule: {0}")]
    InvalidRule(String),

    #[error("Storage error: {0}")]
    Storage(String),
}
