//! On-disk layouts of the raw and organized representations.

pub mod organized;
pub mod raw;
