//! API handlers module

pub mod achievements;
pub mod admin;
pub mod auth;
pub mod health;
pub mod lecturer;
pub mod notifications;
pub mod reports;
