//! vigil library crate.
//!
//! Watches one live broadcast through streamlink and records every episode
//! with ffmpeg. The binary wires these modules together; they are exposed
//! here for integration testing.

pub mod config;
pub mod error;
pub mod logging;
pub mod monitor;
pub mod notification;
pub mod panic_hook;
pub mod recorder;
pub mod scheduler;
pub mod utils;

pub use error::{Error, Result};
