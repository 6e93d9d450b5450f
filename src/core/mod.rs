// LogSentinel - core/mod.rs
//
// Core logic layer: classification, position bookkeeping, decoding,
// capture assembly and deduplication.
// Dependencies: standard library, regex, chrono, serde, encoding_rs.
// Must NOT depend on: platform, app, or perform any filesystem I/O.

pub mod capture;
pub mod classifier;
pub mod decode;
pub mod dedup;
pub mod model;
pub mod tracker;
