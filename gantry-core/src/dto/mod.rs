//! Data Transfer Objects
//!
//! This module contains DTOs exchanged between the engine and whatever front
//! end drives it (CLI, HTTP layer). DTOs are lightweight, serializable views
//! of domain entities.

pub mod log;
pub mod run;
pub mod submission;
