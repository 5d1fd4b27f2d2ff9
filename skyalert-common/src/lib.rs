//! # Skyalert Common Library
//!
//! Shared code for the skyalert services including:
//! - Error type shared by every crate
//! - Bootstrap configuration loading (TOML, environment, defaults)
//! - SQLite pool initialization and schema creation
//! - Observation timestamp helpers

pub mod config;
pub mod db;
pub mod error;
pub mod time;

pub use error::{Error, Result};
