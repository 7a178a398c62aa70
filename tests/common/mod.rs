//! Common test utilities and helpers
//!
//! This module provides shared utilities for all tests including:
//! - In-memory fakes of the engine's collaborators
//! - Transport message builders
//! - Custom assertion macros

pub mod assertions;
pub mod messages;

// Re-export commonly used utilities
pub use fakes::*;
pub use messages::*;
