//! # frameloop Common Library
//!
//! Shared code for the frameloop workspace:
//! - Error type shared by configuration loading
//! - TOML configuration loading and config file resolution
//! - Microsecond/second time conversions
//! - Human-readable timestamp formatting for logs and the simulator

pub mod config;
pub mod error;
pub mod human_time;
pub mod time;

pub use error::{Error, Result};
