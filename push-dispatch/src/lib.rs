//! push-dispatch library crate.
//!
//! Push notification dispatch for the farm visitor service: audience
//! selection, concurrent Web Push delivery with retries, and reporting.

pub mod config;
pub mod database;
pub mod domain;
pub mod error;
pub mod logging;
pub mod push;

pub use error::{Error, Result};
