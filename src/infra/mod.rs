//! Infrastructure adapters and runtime bootstrap.

pub mod assets;
pub mod error;
pub mod http;
pub mod jobs_fs;
pub mod sources;
pub mod telemetry;
