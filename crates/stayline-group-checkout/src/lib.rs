//! Stayline: Group Checkout process manager.
//!
//! Checks out several guest stays on behalf of one clerk request. The
//! process manager is not event sourced: its state is a document, and the
//! facts it decides are published to the group's stream in the event log.

pub mod application;
pub mod domain;
