//! Error handling for decode operations
//!
//! This module re-exports the error types defined alongside the shared
//! data model. It uses thiserror for ergonomic error handling and keeps
//! one variant per failure class of the decode contract.

pub use crate::common::DecodeError;
pub use crate::common::Result;
