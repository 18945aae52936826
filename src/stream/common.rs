//! Common utilities module
//!
//! Shared error types used across the stream container.

pub mod error;

pub use error::{ErrorKind, Result, StreamError};
