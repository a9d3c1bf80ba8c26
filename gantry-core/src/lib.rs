//! Gantry Core
//!
//! Core types and abstractions for the Gantry CI/CD pipeline engine.
//!
//! This crate contains:
//! - Domain types: Submissions, pipeline runs, stage states and log entries
//! - DTOs: Lightweight views of the domain types for callers and front-ends

pub mod domain;
pub mod dto;
