//! # jobhub Config
//!
//! Configuration management for the jobhub scheduler: schema, TOML loading
//! with environment expansion, and validation.

mod error;
mod loader;
mod schema;
mod validator;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::*;
pub use validator::{ConfigValidator, ValidationError, ValidationResult, ValidationWarning};
