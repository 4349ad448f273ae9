//! Configuration types and loading for the lake reorganization engine.
//!
//! Configuration is layered: a base file, an environment specific file selected through
//! `APP_ENVIRONMENT`, and `APP_`-prefixed environment variable overrides.

mod environment;
mod load;
pub mod shared;

pub use environment::Environment;
pub use load::{Config, LoadConfigError, load_config, load_config_from};
