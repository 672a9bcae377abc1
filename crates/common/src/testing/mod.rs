//! Testing utilities
//!
//! Mock implementations of the auth seams, available to this crate's tests
//! and, through the `test-utils` feature, to downstream crates:
//!
//! - [`MockTokenExchanger`]: scripted token endpoint that records requests
//! - [`ScriptedPrompt`]: records presented URLs and returns a pasted code

pub mod mocks;

pub use mocks::{MockTokenExchanger, RecordedExchange, ScriptedPrompt};
