//! Application services for guest stays.

pub mod command_handlers;
pub mod query_handlers;
