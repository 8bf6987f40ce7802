// Library exports for the CLI and integration tests

pub mod cache;
pub mod config;
pub mod db;
pub mod import;
pub mod reconcile;
pub mod remote;
pub mod sync;
