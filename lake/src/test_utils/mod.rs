//! Fixtures for unit and integration tests.

#[cfg(feature = "failpoints")]
pub mod failpoints;
pub mod fixtures;

pub use fixtures::*;
