//! Domain model for guest stays.

pub mod aggregates;
pub mod commands;
pub mod events;
