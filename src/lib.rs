// Library exports for the binary and integration tests

pub mod config;
pub mod error;
pub mod events;
pub mod import;
pub mod logging;
pub mod validation;
