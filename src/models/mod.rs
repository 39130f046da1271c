pub mod attendance_event;
pub mod event;
pub mod organizer;
pub mod registration;
pub mod station;
