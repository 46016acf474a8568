//! Common types and utilities for the bwtest copy bandwidth benchmark
//!
//! This crate holds the pieces every other bwtest crate agrees on: the
//! benchmark configuration, the buffer size sweep and the process exit codes.

pub mod config;
pub mod exit;
pub mod sizes;

pub use config::{BenchConfig, ConfigError};
pub use sizes::{SIZE_SWEEP, largest_size};
