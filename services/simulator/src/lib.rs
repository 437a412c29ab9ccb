//! Load simulator service library crate.
//!
//! # Purpose
//! Exposes the simulator's configuration, client driver and diagnostics
//! endpoint for use by the simulator binary and integration tests.
pub mod config;
pub mod diagnostics;
pub mod driver;

#[cfg(test)]
mod test_support;
