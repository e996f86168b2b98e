pub mod booking;
pub mod conflict;
pub mod dispatch;
pub mod lifecycle;
