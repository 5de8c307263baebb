//! Decision logic for group checkouts.

pub mod commands;
pub mod events;
pub mod process_manager;
