//! Domain layer for the arbiter system
//!
//! Core models, error taxonomy and the port traits adapters implement.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{DomainError, DomainResult, GenerationError};
