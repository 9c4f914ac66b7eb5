//! # Core Runtime Module
//!
//! Foundational runtime infrastructure for the offline chart library core:
//! - Logging and tracing infrastructure
//! - Configuration management
//! - Event bus system
//!
//! Every other core crate depends on this one for its configuration,
//! logging conventions and event broadcasting.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use config::{CacheNamespaces, CoreConfig, CoreConfigBuilder};
pub use error::{Error, Result};
