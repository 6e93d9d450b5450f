// LogSentinel - lib.rs
//
// Library entry point. Exposes every layer so the binary, the integration
// tests and embedders share one implementation.

pub mod app;
pub mod core;
pub mod platform;
pub mod util;
