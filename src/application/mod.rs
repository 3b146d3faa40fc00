//! Application services: the job lifecycle and the storage seam beneath it.

pub mod error;
pub mod lifecycle;
pub mod repos;
pub mod watcher;
