//! Tracing setup shared by the lake binaries and tests.

pub mod tracing;
