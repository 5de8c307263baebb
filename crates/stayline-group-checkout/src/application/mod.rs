//! Application services for group checkouts.

pub mod command_handlers;
pub mod event_handler;
pub mod query_handlers;
