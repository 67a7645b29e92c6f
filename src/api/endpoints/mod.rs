//! Endpoint handlers.
//!
//! Handlers only parse input and shape output; pipeline work runs through
//! `ApiContext::run_blocking`.

pub mod analyze;
pub mod extract;
pub mod health;
pub mod index;
pub mod predict;
