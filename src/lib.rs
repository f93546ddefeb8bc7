//! Group decision engine: one plurality poll per event, exactly-once voting,
//! transactional tallies and deterministic winner resolution.

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod memory;
pub mod models;
pub mod notifier;
pub mod poll;
pub mod routes;
pub mod services;
pub mod store;
pub mod sweeper;

pub use engine::DecisionEngine;
pub use error::PollError;
