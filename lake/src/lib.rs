pub mod codec;
pub mod concurrency;
pub mod error;
pub mod failpoints;
pub mod hash;
pub mod layout;
mod macros;
pub mod pipeline;
pub mod reorg;
pub mod status;
pub mod table;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
pub mod validate;
pub mod workers;
