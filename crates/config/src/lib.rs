//! Configuration module for the mkv2mp4 batch converter
//!
//! Handles loading configuration from TOML files and environment variable overrides.

pub mod config;

pub use config::*;
