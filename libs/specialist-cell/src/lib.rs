pub mod handlers;
pub mod models;
pub mod router;
pub mod services;
pub mod store;

// Re-export the types the booking engine consumes
pub use models::{AvailabilityError, AvailabilityRule, AvailabilityWindow, RuleForm};
pub use services::availability::AvailabilityService;
pub use store::{AvailabilityStore, MemoryAvailabilityStore, SupabaseAvailabilityStore};
