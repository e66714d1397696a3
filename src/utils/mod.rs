// src/utils/mod.rs
//! Common utilities: configuration and errors

pub mod config;
pub mod errors;

pub use config::{CvmConfig, DeploymentMode};
pub use errors::{CvmError, Result};
