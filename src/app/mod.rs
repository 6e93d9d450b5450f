// LogSentinel - app/mod.rs
//
// Application layer: directory scanning, the tail engine, the background
// watch service and the issue sink boundary.
// Dependencies: core, platform, util.

pub mod engine;
pub mod scanner;
pub mod service;
pub mod sink;
