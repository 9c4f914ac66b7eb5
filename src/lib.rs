//! Workspace placeholder crate.
//!
//! This crate exists to expose shared feature flags that map to the individual
//! workspace crates. Host applications can depend on
//! `chart-library-workspace` and enable `desktop-shims` without wiring each
//! crate individually.

pub use core_service::*;
