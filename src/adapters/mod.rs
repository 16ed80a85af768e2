//! Infrastructure adapters for external systems.

pub mod clock;
pub mod generators;
pub mod memory;
pub mod sqlite;
