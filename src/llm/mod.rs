//! LLM provider abstraction used by the intent classifier
//!
//! Providers are injected behind [`LlmProvider`] so the classifier can run
//! against a real endpoint, a mock, or no model at all.

pub mod provider;
pub mod providers;

pub use provider::*;
pub use providers::*;
