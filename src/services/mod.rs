pub mod checkin;
pub mod importer;
pub mod rate_limit;
pub mod scancode;
pub mod secrets;
pub mod token;
pub mod webhook;
