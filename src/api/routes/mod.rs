//! API route modules.

pub mod interactions;
pub mod sessions;
