//! # Othos Common
//!
//! Shared infrastructure for Othos crates: the service registration layer
//! used to wire crate-provided services together at the application's
//! composition root.
//!
//! This crate deliberately has no dependencies on other Othos crates so that
//! every crate can depend on it without cycles.

pub mod di;

pub use di::{ServiceEntry, ServiceFactory};
