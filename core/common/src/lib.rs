//! Common utilities and types shared across Courier crates.
//!
//! This module provides the error type every crate reports through and the
//! message identifier used as the queue's primary key.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::MessageId;
