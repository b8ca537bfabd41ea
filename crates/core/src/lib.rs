//! `orderflow-core`: shared domain primitives.
//!
//! Identifiers and the domain error model. No infrastructure concerns live here.

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::OrderId;
