pub mod api;
pub mod app;
pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod global;
pub mod housekeeping;
pub mod platform;
pub mod recruit;
pub mod session;
pub mod ui;
