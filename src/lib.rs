//! Scheduled alert dispatcher: pushes due reminders and marks them sent.
pub mod config;
pub mod db;
pub mod dispatch;
pub mod model;
pub mod push;
pub mod trigger;
