//! Domain layer types and invariants.

pub mod attachment;
pub mod entities;
pub mod error;
pub mod types;
