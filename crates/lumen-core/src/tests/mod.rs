//! Scenario tests for lumen-core
//!
//! These drive a whole `LumenCore` against shell-script plugins written to a
//! temp directory:
//! - One-shot sessions, navigation depth and escape handling
//! - Global search over indexed items, web search and prefix activation
//! - Entry-point replay into a kept-open session
//! - Daemon lifecycle, session tokens and restart exhaustion
//! - Write coalescing of the history log

// Test modules use exact float comparisons and test-specific casts
#![allow(clippy::float_cmp, clippy::cast_possible_truncation)]

mod daemon_tests;
mod engine_tests;
mod fixtures;
mod persistence_tests;
