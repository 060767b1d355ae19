//! Shared utilities for the assuan workspace
//!
//! This crate provides:
//! - Connection identifiers used to correlate log lines of one session
//! - Default paths for the daemon socket and configuration file

mod ids;
mod paths;

pub use ids::*;
pub use paths::*;
