//! Shared types for civic-pulse

mod error;

pub use error::{ErrorKind, PulseError, Result};
