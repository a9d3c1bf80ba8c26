//! Core domain types
//!
//! This module contains the core domain structures used across Gantry crates.
//! The engine owns and mutates these types while a run is in flight; observers
//! only ever receive cloned snapshots of them.

pub mod log;
pub mod run;
pub mod submission;
