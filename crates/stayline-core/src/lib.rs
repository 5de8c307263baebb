//! Stayline Core: shared event-sourcing abstractions.
//!
//! This crate defines the traits and types that every bounded context and
//! infrastructure adapter depends on. It contains no infrastructure code.

pub mod aggregate;
pub mod aggregate_store;
pub mod checkpoint;
pub mod clock;
pub mod command;
pub mod concurrency;
pub mod dead_letter;
pub mod document;
pub mod error;
pub mod event;
pub mod event_log;
