// LogSentinel - platform/mod.rs
//
// Platform layer: filesystem checks, the line reader, and configuration.
// Dependencies: core, util, directories, toml.
// Must NOT depend on: app.

pub mod config;
pub mod fs;
pub mod reader;
