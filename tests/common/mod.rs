//! Common test utilities for resumable-ingest integration tests

#[allow(dead_code)]
pub mod fixtures;
#[allow(dead_code)]
pub mod producer;

#[allow(unused_imports)]
pub use fixtures::*;
#[allow(unused_imports)]
pub use producer::*;
