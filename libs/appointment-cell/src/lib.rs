pub mod handlers;
pub mod models;
pub mod router;
pub mod services;
pub mod store;

pub use models::{
    Appointment, AppointmentStatus, AppointmentType, BookingError, BookingEvent,
    BookingEventType, ConflictCheck, ConflictReason, TransitionEvent,
};
pub use services::booking::BookingEngine;
pub use services::conflict::ConflictDetector;
pub use services::dispatch::{
    AuditSink, NotificationDispatcher, RecordingAuditSink, RecordingDispatcher,
    SupabaseAuditSink, SupabaseNotificationDispatcher,
};
pub use services::lifecycle::AppointmentLifecycle;
pub use store::{AppointmentStore, MemoryAppointmentStore, SupabaseAppointmentStore};
