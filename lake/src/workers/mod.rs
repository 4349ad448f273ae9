//! Bounded parallel execution of independent units of work.

pub mod pool;
