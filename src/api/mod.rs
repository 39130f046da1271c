// API module - HTTP endpoints

pub mod auth;
pub mod checkin;
pub mod events;
pub mod health;
pub mod middleware;
pub mod registrations;
pub mod stations;
