//! Testing utilities and mock implementations
//!
//! Lets the pipeline run in tests without a model endpoint, a PDF corpus,
//! or a Redis server.

pub mod mocks;

pub use mocks::*;
