//! jobdock tracks build and render jobs through status-partitioned storage.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
pub mod presentation;
