//! Stayline: Guest Stay bounded context.
//!
//! Responsible for a guest's account during a stay: check-in, charges,
//! payments and check-out, plus the read model of currently open stays.

pub mod application;
pub mod domain;
pub mod projection;
