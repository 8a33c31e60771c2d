//! HTTP service implementation.
//!
//! ## Structure
//!
//! - [`handler`] - axum router and request handlers.
//! - [`error`] - mapping of failures onto JSON error responses.

pub mod error;
pub mod handler;
