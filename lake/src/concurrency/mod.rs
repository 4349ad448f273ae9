//! Coordination primitives shared by the phases.

pub mod shutdown;
