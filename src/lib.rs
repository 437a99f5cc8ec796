//! # fieldwatch
//!
//! Condition-monitoring core for remote RTU/PLC devices: connection health
//! tracking, reading classification, and a deduplicating alarm lifecycle,
//! backed by SeaORM stores.

pub mod conditions;
pub mod config;
pub mod crypto;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod health;
pub mod models;
pub mod poller;
pub mod repositories;
pub mod retention;
pub mod telemetry;
pub mod validation;
pub use migration;
