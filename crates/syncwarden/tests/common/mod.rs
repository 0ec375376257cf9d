//! Shared test utilities for syncwarden integration tests.
//!
//! This module provides:
//! - `TestHarness` wiring a controller over an in-memory cluster
//! - Builders for applications and resource manifests

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::{StaticRenderer, TestHarness};
