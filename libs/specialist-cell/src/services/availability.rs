use std::sync::Arc;

use chrono::{Datelike, NaiveDate, NaiveTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::{
    AvailabilityError, AvailabilityRule, AvailabilityWindow, CreateExceptionRequest,
    CreateRecurringRuleRequest, RuleForm,
};
use crate::store::AvailabilityStore;

/// Rule management plus the resolver that expands stored rules into
/// concrete bookable windows.
pub struct AvailabilityService {
    store: Arc<dyn AvailabilityStore>,
}

impl AvailabilityService {
    pub fn new(store: Arc<dyn AvailabilityStore>) -> Self {
        Self { store }
    }

    /// Create a recurring weekly rule for a specialist.
    pub async fn create_recurring_rule(
        &self,
        specialist_id: Uuid,
        request: CreateRecurringRuleRequest,
    ) -> Result<AvailabilityRule, AvailabilityError> {
        debug!("Creating recurring rule for specialist {}", specialist_id);

        if !(1..=7).contains(&request.day_of_week) {
            return Err(AvailabilityError::InvalidRule(
                "day_of_week must be between 1 (Monday) and 7 (Sunday)".to_string(),
            ));
        }
        if request.end_time <= request.start_time {
            return Err(AvailabilityError::InvalidRule(
                "end time must be after start time".to_string(),
            ));
        }

        let now = Utc::now();
        let rule = AvailabilityRule {
            id: Uuid::new_v4(),
            specialist_id,
            day_of_week: Some(request.day_of_week),
            start_time: Some(request.start_time),
            end_time: Some(request.end_time),
            exception_date: None,
            is_active: true,
            created_at: now,
            updated_at: now,
            created_by: Some(request.actor_id),
            updated_by: Some(request.actor_id),
        };

        self.store.insert_rule(&rule).await?;
        info!("Recurring rule {} created for specialist {}", rule.id, specialist_id);
        Ok(rule)
    }

    /// Create a date exception. An exception replaces every recurring rule
    /// for its date; omitting the hours closes the date entirely.
    pub async fn create_exception(
        &self,
        specialist_id: Uuid,
        request: CreateExceptionRequest,
    ) -> Result<AvailabilityRule, AvailabilityError> {
        debug!(
            "Creating exception for specialist {} on {}",
            specialist_id, request.date
        );

        match (request.start_time, request.end_time) {
            (Some(start), Some(end)) if end <= start => {
                return Err(AvailabilityError::InvalidRule(
                    "end time must be after start time".to_string(),
                ));
            }
            (Some(_), None) | (None, Some(_)) => {
                return Err(AvailabilityError::InvalidRule(
                    "exception must carry both times or neither".to_string(),
                ));
            }
            _ => {}
        }

        let now = Utc::now();
        let rule = AvailabilityRule {
            id: Uuid::new_v4(),
            specialist_id,
            day_of_week: None,
            start_time: request.start_time,
            end_time: request.end_time,
            exception_date: Some(request.date),
            is_active: true,
            created_at: now,
            updated_at: now,
            created_by: Some(request.actor_id),
            updated_by: Some(request.actor_id),
        };

        self.store.insert_rule(&rule).await?;
        info!(
            "Exception rule {} created for specialist {} on {}",
            rule.id, specialist_id, request.date
        );
        Ok(rule)
    }

    /// Soft-delete a rule. Rows referenced by booking history are never
    /// removed outright.
    pub async fn deactivate_rule(
        &self,
        rule_id: Uuid,
        actor: Uuid,
    ) -> Result<AvailabilityRule, AvailabilityError> {
        let rule = self.store.set_rule_active(rule_id, false, actor).await?;
        info!("Availability rule {} deactivated", rule_id);
        Ok(rule)
    }

    pub async fn list_rules(
        &self,
        specialist_id: Uuid,
    ) -> Result<Vec<AvailabilityRule>, AvailabilityError> {
        self.store.rules_for_specialist(specialist_id).await
    }

    /// Expand the specialist's rules into concrete windows for each day of
    /// `[from, to)`. The result is chronological and pairwise disjoint; it
    /// is a pure function of the stored rules, so callers may re-run it
    /// freely and will see the same answer for the same rows.
    pub async fn resolve(
        &self,
        specialist_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<AvailabilityWindow>, AvailabilityError> {
        if from >= to {
            return Err(AvailabilityError::InvalidRange);
        }

        let rules = self.store.rules_for_specialist(specialist_id).await?;
        if rules.is_empty() {
            return Err(AvailabilityError::UnknownSpecialist);
        }

        let forms = rules
            .iter()
            .filter(|r| r.is_active)
            .map(AvailabilityRule::form)
            .collect::<Result<Vec<RuleForm>, _>>()?;

        let mut windows = Vec::new();
        let mut day = from;
        while day < to {
            windows.extend(windows_for_day(&forms, day));
            day = match day.succ_opt() {
                Some(next) => next,
                None => break,
            };
        }

        debug!(
            "Resolved {} windows for specialist {} over [{}, {})",
            windows.len(),
            specialist_id,
            from,
            to
        );
        Ok(windows)
    }
}

/// Windows for a single calendar day: exceptions replace the recurring set,
/// a closure yields nothing, and overlapping or adjacent intervals merge
/// into their union.
fn windows_for_day(rules: &[RuleForm], date: NaiveDate) -> Vec<AvailabilityWindow> {
    let weekday = date.weekday().number_from_monday() as u8;

    let exceptions: Vec<&Option<(NaiveTime, NaiveTime)>> = rules
        .iter()
        .filter_map(|r| match r {
            RuleForm::Exception { date: d, hours } if *d == date => Some(hours),
            _ => None,
        })
        .collect();

    let intervals: Vec<(NaiveTime, NaiveTime)> = if !exceptions.is_empty() {
        if exceptions.iter().any(|hours| hours.is_none()) {
            // A closure beats any open exception for the same date
            return Vec::new();
        }
        exceptions.into_iter().filter_map(|hours| *hours).collect()
    } else {
        rules
            .iter()
            .filter_map(|r| match r {
                RuleForm::Recurring { weekday: w, start, end } if *w == weekday => {
                    Some((*start, *end))
                }
                _ => None,
            })
            .collect()
    };

    merge_intervals(intervals)
        .into_iter()
        .map(|(start, end)| AvailabilityWindow {
            start: date.and_time(start).and_utc(),
            end: date.and_time(end).and_utc(),
        })
        .collect()
}

/// Sort-and-sweep union merge. Adjacent intervals coalesce so a bookable
/// block is never split on an internal seam.
fn merge_intervals(mut intervals: Vec<(NaiveTime, NaiveTime)>) -> Vec<(NaiveTime, NaiveTime)> {
    if intervals.is_empty() {
        return intervals;
    }

    intervals.sort();

    let mut merged: Vec<(NaiveTime, NaiveTime)> = Vec::with_capacity(intervals.len());
    for (start, end) in intervals {
        match merged.last_mut() {
            Some((_, last_end)) if start <= *last_end => {
                if end > *last_end {
                    *last_end = end;
                }
            }
            _ => merged.push((start, end)),
        }
    }

    merged
}
