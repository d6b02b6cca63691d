//! BDD step definitions for balance sentinel service

pub mod api_steps;
pub mod scheduler_steps;
pub mod threshold_steps;
