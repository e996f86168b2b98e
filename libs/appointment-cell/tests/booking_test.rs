// libs/appointment-cell/tests/booking_test.rs
//
// Booking engine behavior over the in-memory stores: conflict detection,
// lifecycle edges, reschedule semantics, deadlines and the concurrent
// double-booking race.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use assert_matches::assert_matches;
use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use uuid::Uuid;

use appointment_cell::models::{
    AppointmentSearchQuery, AppointmentType, BookingError, ConflictReason,
    CreateAppointmentRequest, RescheduleAppointmentRequest, StoreError,
};
use appointment_cell::services::dispatch::{RecordingAuditSink, RecordingDispatcher};
use appointment_cell::store::AppointmentStore;
use appointment_cell::{
    Appointment, AppointmentStatus, BookingEngine, BookingEventType, MemoryAppointmentStore,
    TransitionEvent,
};
use specialist_cell::models::{CreateExceptionRequest, CreateRecurringRuleRequest};
use specialist_cell::{AvailabilityService, MemoryAvailabilityStore};

// ==============================================================================
// TEST FIXTURES AND UTILITIES
// ==============================================================================

struct TestSetup {
    engine: Arc<BookingEngine>,
    appointments: Arc<MemoryAppointmentStore>,
    availability: Arc<AvailabilityService>,
    dispatcher: Arc<RecordingDispatcher>,
    audit: Arc<RecordingAuditSink>,
    specialist_id: Uuid,
    patient_id: Uuid,
    actor: Uuid,
}

impl TestSetup {
    fn with_store(appointments: Arc<dyn AppointmentStore>, memory: Arc<MemoryAppointmentStore>) -> Self {
        let availability = Arc::new(AvailabilityService::new(Arc::new(
            MemoryAvailabilityStore::new(),
        )));
        let dispatcher = Arc::new(RecordingDispatcher::new());
        let audit = Arc::new(RecordingAuditSink::new());

        let engine = Arc::new(BookingEngine::new(
            appointments,
            Arc::clone(&availability),
            Arc::clone(&dispatcher) as Arc<dyn appointment_cell::NotificationDispatcher>,
            Arc::clone(&audit) as Arc<dyn appointment_cell::AuditSink>,
            3,
        ));

        let specialist_id = Uuid::new_v4();
        let patient_id = Uuid::new_v4();
        memory.register_specialist(specialist_id);
        memory.register_patient(patient_id);

        Self {
            engine,
            appointments: memory,
            availability,
            dispatcher,
            audit,
            specialist_id,
            patient_id,
            actor: Uuid::new_v4(),
        }
    }

    async fn new() -> Self {
        let memory = Arc::new(MemoryAppointmentStore::new());
        let setup = Self::with_store(
            Arc::clone(&memory) as Arc<dyn AppointmentStore>,
            memory,
        );
        setup.open_every_day().await;
        setup
    }

    /// Recurring availability 08:00-18:00 for all seven weekdays.
    async fn open_every_day(&self) {
        for day_of_week in 1..=7 {
            self.availability
                .create_recurring_rule(
                    self.specialist_id,
                    CreateRecurringRuleRequest {
                        day_of_week,
                        start_time: t(8, 0),
                        end_time: t(18, 0),
                        actor_id: self.actor,
                    },
                )
                .await
                .unwrap();
        }
    }

    fn create_request(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> CreateAppointmentRequest {
        CreateAppointmentRequest {
            specialist_id: self.specialist_id,
            patient_id: self.patient_id,
            start_datetime: start,
            end_datetime: end,
            appointment_type: AppointmentType::InitialConsultation,
            internal_notes: None,
            actor_id: self.actor,
            deadline_ms: None,
        }
    }

    async fn book(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Appointment {
        self.engine
            .create(self.create_request(start, end))
            .await
            .expect("booking should succeed")
    }
}

fn t(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

// 2024-06-03 and 2024-06-10 are Mondays.
fn monday(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 3, h, m, 0).unwrap()
}

// ==============================================================================
// CREATE
// ==============================================================================

#[tokio::test]
async fn create_books_pending_appointment() {
    let setup = TestSetup::new().await;

    let appointment = setup.book(monday(9, 0), monday(10, 0)).await;

    assert_eq!(appointment.status, AppointmentStatus::Pending);
    assert_eq!(appointment.specialist_id, setup.specialist_id);
    assert_eq!(appointment.created_by, Some(setup.actor));

    let events = setup.dispatcher.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, BookingEventType::Created);
    assert_eq!(events[0].appointment_id, appointment.id);

    let entries = setup.audit.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].action, "INSERT");
    assert!(entries[0].old_values.is_none());
    assert!(entries[0].new_values.is_some());
    assert_eq!(entries[0].user_id, setup.actor);
}

#[tokio::test]
async fn back_to_back_appointments_do_not_conflict() {
    let setup = TestSetup::new().await;

    let first = setup.book(monday(9, 0), monday(10, 0)).await;
    let second = setup.book(monday(10, 0), monday(11, 0)).await;

    assert_eq!(first.end_datetime, second.start_datetime);
    assert_eq!(second.status, AppointmentStatus::Pending);
}

#[tokio::test]
async fn overlapping_create_is_double_booked() {
    let setup = TestSetup::new().await;

    let first = setup.book(monday(9, 0), monday(10, 0)).await;

    let result = setup
        .engine
        .create(setup.create_request(monday(9, 30), monday(10, 30)))
        .await;

    assert_matches!(
        result,
        Err(BookingError::BookingConflict {
            reason: ConflictReason::DoubleBooked,
            conflicting_appointment_id: Some(id),
        }) if id == first.id
    );
}

#[tokio::test]
async fn canceled_appointment_frees_its_slot() {
    let setup = TestSetup::new().await;

    let first = setup.book(monday(9, 0), monday(10, 0)).await;
    setup
        .engine
        .transition(first.id, TransitionEvent::Cancel, setup.actor)
        .await
        .unwrap();

    let rebooked = setup.book(monday(9, 0), monday(10, 0)).await;
    assert_eq!(rebooked.status, AppointmentStatus::Pending);
}

#[tokio::test]
async fn closure_exception_rejects_booking_as_outside_availability() {
    let setup = TestSetup::new().await;

    // Recurring Monday hours exist, but 2024-06-10 is closed
    setup
        .availability
        .create_exception(
            setup.specialist_id,
            CreateExceptionRequest {
                date: chrono::NaiveDate::from_ymd_opt(2024, 6, 10).unwrap(),
                start_time: None,
                end_time: None,
                actor_id: setup.actor,
            },
        )
        .await
        .unwrap();

    let start = Utc.with_ymd_and_hms(2024, 6, 10, 9, 30, 0).unwrap();
    let end = Utc.with_ymd_and_hms(2024, 6, 10, 10, 0, 0).unwrap();
    let result = setup.engine.create(setup.create_request(start, end)).await;

    assert_matches!(
        result,
        Err(BookingError::BookingConflict {
            reason: ConflictReason::OutsideAvailability,
            conflicting_appointment_id: None,
        })
    );
}

#[tokio::test]
async fn booking_outside_working_hours_is_rejected() {
    let setup = TestSetup::new().await;

    let result = setup
        .engine
        .create(setup.create_request(monday(6, 0), monday(7, 0)))
        .await;

    assert_matches!(
        result,
        Err(BookingError::BookingConflict {
            reason: ConflictReason::OutsideAvailability,
            ..
        })
    );
}

#[tokio::test]
async fn booking_may_not_span_an_availability_gap() {
    let memory = Arc::new(MemoryAppointmentStore::new());
    let setup = TestSetup::with_store(
        Arc::clone(&memory) as Arc<dyn AppointmentStore>,
        memory,
    );

    // Two adjacent-but-separate windows: 08:00-12:00 and 13:00-18:00
    for hours in [(t(8, 0), t(12, 0)), (t(13, 0), t(18, 0))] {
        setup
            .availability
            .create_recurring_rule(
                setup.specialist_id,
                CreateRecurringRuleRequest {
                    day_of_week: 1,
                    start_time: hours.0,
                    end_time: hours.1,
                    actor_id: setup.actor,
                },
            )
            .await
            .unwrap();
    }

    let result = setup
        .engine
        .create(setup.create_request(monday(11, 0), monday(14, 0)))
        .await;

    assert_matches!(
        result,
        Err(BookingError::BookingConflict {
            reason: ConflictReason::OutsideAvailability,
            ..
        })
    );
}

#[tokio::test]
async fn invalid_window_is_rejected_without_write() {
    let setup = TestSetup::new().await;

    let result = setup
        .engine
        .create(setup.create_request(monday(10, 0), monday(10, 0)))
        .await;
    assert_matches!(result, Err(BookingError::InvalidWindow(_)));

    let stored = setup
        .appointments
        .search(&AppointmentSearchQuery::default())
        .await
        .unwrap();
    assert!(stored.is_empty());
    assert!(setup.dispatcher.events().is_empty());
}

#[tokio::test]
async fn unknown_specialist_and_patient_are_not_found() {
    let setup = TestSetup::new().await;

    let mut request = setup.create_request(monday(9, 0), monday(10, 0));
    request.specialist_id = Uuid::new_v4();
    assert_matches!(
        setup.engine.create(request).await,
        Err(BookingError::NotFound(what)) if what == "Specialist"
    );

    let mut request = setup.create_request(monday(9, 0), monday(10, 0));
    request.patient_id = Uuid::new_v4();
    assert_matches!(
        setup.engine.create(request).await,
        Err(BookingError::NotFound(what)) if what == "Patient"
    );
}

// ==============================================================================
// CONCURRENCY
// ==============================================================================

#[tokio::test]
async fn concurrent_identical_creates_admit_exactly_one() {
    let setup = TestSetup::new().await;

    let first = tokio::spawn({
        let engine = Arc::clone(&setup.engine);
        let request = setup.create_request(monday(9, 0), monday(10, 0));
        async move { engine.create(request).await }
    });
    let second = tokio::spawn({
        let engine = Arc::clone(&setup.engine);
        let request = setup.create_request(monday(9, 0), monday(10, 0));
        async move { engine.create(request).await }
    });

    let outcomes = [first.await.unwrap(), second.await.unwrap()];
    let won = outcomes.iter().filter(|r| r.is_ok()).count();
    assert_eq!(won, 1, "exactly one concurrent booking may win");

    let lost = outcomes
        .iter()
        .filter(|r| {
            matches!(
                r,
                Err(BookingError::BookingConflict {
                    reason: ConflictReason::DoubleBooked,
                    ..
                })
            )
        })
        .count();
    assert_eq!(lost, 1, "the loser must see a double-booked conflict");

    let winner = outcomes.into_iter().flatten().next().unwrap();
    assert_eq!(winner.status, AppointmentStatus::Pending);
}

// ==============================================================================
// RESCHEDULE
// ==============================================================================

#[tokio::test]
async fn reschedule_overlapping_only_itself_succeeds() {
    let setup = TestSetup::new().await;

    let appointment = setup.book(monday(9, 0), monday(10, 0)).await;
    setup
        .engine
        .transition(appointment.id, TransitionEvent::Confirm, setup.actor)
        .await
        .unwrap();

    let updated = setup
        .engine
        .reschedule(
            appointment.id,
            RescheduleAppointmentRequest {
                new_start: monday(9, 30),
                new_end: monday(10, 30),
                actor_id: setup.actor,
                deadline_ms: None,
            },
        )
        .await
        .unwrap();

    assert_eq!(updated.start_datetime, monday(9, 30));
    assert_eq!(updated.end_datetime, monday(10, 30));
    // Status survives the move
    assert_eq!(updated.status, AppointmentStatus::Confirmed);
}

#[tokio::test]
async fn reschedule_onto_another_booking_leaves_record_unchanged() {
    let setup = TestSetup::new().await;

    let first = setup.book(monday(9, 0), monday(10, 0)).await;
    let second = setup.book(monday(11, 0), monday(12, 0)).await;

    let result = setup
        .engine
        .reschedule(
            second.id,
            RescheduleAppointmentRequest {
                new_start: monday(9, 30),
                new_end: monday(10, 30),
                actor_id: setup.actor,
                deadline_ms: None,
            },
        )
        .await;

    assert_matches!(
        result,
        Err(BookingError::BookingConflict {
            reason: ConflictReason::DoubleBooked,
            conflicting_appointment_id: Some(id),
        }) if id == first.id
    );

    let unchanged = setup.engine.get(second.id).await.unwrap();
    assert_eq!(unchanged.start_datetime, second.start_datetime);
    assert_eq!(unchanged.end_datetime, second.end_datetime);
}

#[tokio::test]
async fn reschedule_of_terminal_appointment_is_rejected() {
    let setup = TestSetup::new().await;

    let appointment = setup.book(monday(9, 0), monday(10, 0)).await;
    setup
        .engine
        .transition(appointment.id, TransitionEvent::Cancel, setup.actor)
        .await
        .unwrap();

    let result = setup
        .engine
        .reschedule(
            appointment.id,
            RescheduleAppointmentRequest {
                new_start: monday(14, 0),
                new_end: monday(15, 0),
                actor_id: setup.actor,
                deadline_ms: None,
            },
        )
        .await;

    assert_matches!(result, Err(BookingError::AlreadyTerminal));
}

#[tokio::test]
async fn reschedule_emits_event_and_audit_snapshot() {
    let setup = TestSetup::new().await;

    let appointment = setup.book(monday(9, 0), monday(10, 0)).await;
    setup
        .engine
        .reschedule(
            appointment.id,
            RescheduleAppointmentRequest {
                new_start: monday(14, 0),
                new_end: monday(15, 0),
                actor_id: setup.actor,
                deadline_ms: None,
            },
        )
        .await
        .unwrap();

    let events = setup.dispatcher.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].event_type, BookingEventType::Rescheduled);

    let entries = setup.audit.entries();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1].action, "UPDATE");
    assert!(entries[1].old_values.is_some());
}

// ==============================================================================
// TRANSITIONS
// ==============================================================================

#[tokio::test]
async fn cancel_twice_yields_already_terminal_and_leaves_record_alone() {
    let setup = TestSetup::new().await;

    let appointment = setup.book(monday(9, 0), monday(10, 0)).await;
    let canceled = setup
        .engine
        .transition(appointment.id, TransitionEvent::Cancel, setup.actor)
        .await
        .unwrap();
    assert_eq!(canceled.status, AppointmentStatus::Canceled);

    let result = setup
        .engine
        .transition(appointment.id, TransitionEvent::Cancel, setup.actor)
        .await;
    assert_matches!(result, Err(BookingError::AlreadyTerminal));

    let unchanged = setup.engine.get(appointment.id).await.unwrap();
    assert_eq!(unchanged.status, AppointmentStatus::Canceled);
    assert_eq!(unchanged.updated_at, canceled.updated_at);
}

#[tokio::test]
async fn confirmed_appointment_completes() {
    let setup = TestSetup::new().await;

    let appointment = setup.book(monday(9, 0), monday(10, 0)).await;
    setup
        .engine
        .transition(appointment.id, TransitionEvent::Confirm, setup.actor)
        .await
        .unwrap();
    let completed = setup
        .engine
        .transition(appointment.id, TransitionEvent::Complete, setup.actor)
        .await
        .unwrap();

    assert_eq!(completed.status, AppointmentStatus::Completed);
    assert_eq!(completed.updated_by, Some(setup.actor));
}

#[tokio::test]
async fn pending_appointment_cannot_complete_or_no_show() {
    let setup = TestSetup::new().await;

    let appointment = setup.book(monday(9, 0), monday(10, 0)).await;

    assert_matches!(
        setup
            .engine
            .transition(appointment.id, TransitionEvent::Complete, setup.actor)
            .await,
        Err(BookingError::InvalidTransition { .. })
    );
    assert_matches!(
        setup
            .engine
            .transition(appointment.id, TransitionEvent::MarkNoShow, setup.actor)
            .await,
        Err(BookingError::InvalidTransition { .. })
    );
}

#[tokio::test]
async fn transition_of_missing_appointment_is_not_found() {
    let setup = TestSetup::new().await;

    let result = setup
        .engine
        .transition(Uuid::new_v4(), TransitionEvent::Confirm, setup.actor)
        .await;
    assert_matches!(result, Err(BookingError::NotFound(_)));
}

// ==============================================================================
// STORE FAILURE HANDLING
// ==============================================================================

/// Delegating store whose inserts abort with a serialization failure a set
/// number of times before succeeding.
struct FlakyStore {
    inner: Arc<MemoryAppointmentStore>,
    failures_remaining: AtomicU32,
}

#[async_trait]
impl AppointmentStore for FlakyStore {
    async fn specialist_exists(&self, specialist_id: Uuid) -> Result<bool, StoreError> {
        self.inner.specialist_exists(specialist_id).await
    }

    async fn patient_exists(&self, patient_id: Uuid) -> Result<bool, StoreError> {
        self.inner.patient_exists(patient_id).await
    }

    async fn get(&self, appointment_id: Uuid) -> Result<Appointment, StoreError> {
        self.inner.get(appointment_id).await
    }

    async fn active_for_specialist_in_range(
        &self,
        specialist_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        exclude: Option<Uuid>,
    ) -> Result<Vec<Appointment>, StoreError> {
        self.inner
            .active_for_specialist_in_range(specialist_id, start, end, exclude)
            .await
    }

    async fn insert(&self, appointment: &Appointment) -> Result<(), StoreError> {
        if self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StoreError::Serialization);
        }
        self.inner.insert(appointment).await
    }

    async fn update_window(
        &self,
        appointment_id: Uuid,
        new_start: DateTime<Utc>,
        new_end: DateTime<Utc>,
        actor: Uuid,
    ) -> Result<Appointment, StoreError> {
        self.inner
            .update_window(appointment_id, new_start, new_end, actor)
            .await
    }

    async fn update_status(
        &self,
        appointment_id: Uuid,
        status: AppointmentStatus,
        actor: Uuid,
    ) -> Result<Appointment, StoreError> {
        self.inner.update_status(appointment_id, status, actor).await
    }

    async fn search(&self, query: &AppointmentSearchQuery) -> Result<Vec<Appointment>, StoreError> {
        self.inner.search(query).await
    }
}

#[tokio::test]
async fn transient_serialization_aborts_are_retried() {
    let memory = Arc::new(MemoryAppointmentStore::new());
    let flaky = Arc::new(FlakyStore {
        inner: Arc::clone(&memory),
        failures_remaining: AtomicU32::new(2),
    });
    let setup = TestSetup::with_store(flaky as Arc<dyn AppointmentStore>, memory);
    setup.open_every_day().await;

    // Two aborts, then success on the third attempt
    let appointment = setup.book(monday(9, 0), monday(10, 0)).await;
    assert_eq!(appointment.status, AppointmentStatus::Pending);
}

#[tokio::test]
async fn exhausted_serialization_retries_surface_as_persistence_failure() {
    let memory = Arc::new(MemoryAppointmentStore::new());
    let flaky = Arc::new(FlakyStore {
        inner: Arc::clone(&memory),
        failures_remaining: AtomicU32::new(u32::MAX),
    });
    let setup = TestSetup::with_store(flaky as Arc<dyn AppointmentStore>, memory);
    setup.open_every_day().await;

    let result = setup
        .engine
        .create(setup.create_request(monday(9, 0), monday(10, 0)))
        .await;

    // A transient-abort storm is not a booking conflict
    assert_matches!(result, Err(BookingError::PersistenceFailure(_)));
}

/// Delegating store whose insert stalls long enough for a caller deadline
/// to expire first.
struct SlowStore {
    inner: Arc<MemoryAppointmentStore>,
}

#[async_trait]
impl AppointmentStore for SlowStore {
    async fn specialist_exists(&self, specialist_id: Uuid) -> Result<bool, StoreError> {
        self.inner.specialist_exists(specialist_id).await
    }

    async fn patient_exists(&self, patient_id: Uuid) -> Result<bool, StoreError> {
        self.inner.patient_exists(patient_id).await
    }

    async fn get(&self, appointment_id: Uuid) -> Result<Appointment, StoreError> {
        self.inner.get(appointment_id).await
    }

    async fn active_for_specialist_in_range(
        &self,
        specialist_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        exclude: Option<Uuid>,
    ) -> Result<Vec<Appointment>, StoreError> {
        self.inner
            .active_for_specialist_in_range(specialist_id, start, end, exclude)
            .await
    }

    async fn insert(&self, appointment: &Appointment) -> Result<(), StoreError> {
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        self.inner.insert(appointment).await
    }

    async fn update_window(
        &self,
        appointment_id: Uuid,
        new_start: DateTime<Utc>,
        new_end: DateTime<Utc>,
        actor: Uuid,
    ) -> Result<Appointment, StoreError> {
        self.inner
            .update_window(appointment_id, new_start, new_end, actor)
            .await
    }

    async fn update_status(
        &self,
        appointment_id: Uuid,
        status: AppointmentStatus,
        actor: Uuid,
    ) -> Result<Appointment, StoreError> {
        self.inner.update_status(appointment_id, status, actor).await
    }

    async fn search(&self, query: &AppointmentSearchQuery) -> Result<Vec<Appointment>, StoreError> {
        self.inner.search(query).await
    }
}

#[tokio::test]
async fn expired_deadline_times_out_with_no_partial_write() {
    let memory = Arc::new(MemoryAppointmentStore::new());
    let slow = Arc::new(SlowStore {
        inner: Arc::clone(&memory),
    });
    let setup = TestSetup::with_store(slow as Arc<dyn AppointmentStore>, Arc::clone(&memory));
    setup.open_every_day().await;

    let mut request = setup.create_request(monday(9, 0), monday(10, 0));
    request.deadline_ms = Some(20);

    let result = setup.engine.create(request).await;
    assert_matches!(result, Err(BookingError::Timeout));

    // The stalled insert was cancelled before it could land
    let stored = memory.search(&AppointmentSearchQuery::default()).await.unwrap();
    assert!(stored.is_empty());
    assert!(setup.dispatcher.events().is_empty());
}

// ==============================================================================
// QUERIES
// ==============================================================================

#[tokio::test]
async fn search_filters_by_status_and_range() {
    let setup = TestSetup::new().await;

    let first = setup.book(monday(9, 0), monday(10, 0)).await;
    let second = setup.book(monday(11, 0), monday(12, 0)).await;
    setup
        .engine
        .transition(second.id, TransitionEvent::Cancel, setup.actor)
        .await
        .unwrap();

    let pending = setup
        .engine
        .search(AppointmentSearchQuery {
            specialist_id: Some(setup.specialist_id),
            status: Some(AppointmentStatus::Pending),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, first.id);

    let morning_only = setup
        .engine
        .search(AppointmentSearchQuery {
            from_date: Some(monday(8, 0)),
            to_date: Some(monday(10, 30)),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(morning_only.len(), 1);
    assert_eq!(morning_only[0].id, first.id);
}
