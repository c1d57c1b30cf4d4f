//! Shared test utilities for explainer integration tests.
//!
//! This module provides:
//! - `TestHarness` for isolated runs against a temp data directory
//! - `DeckBuilder` for producing `.pptx` fixtures in memory
//! - Scripted generation services

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::TestHarness;
