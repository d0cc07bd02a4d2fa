//! Shared storage contract tests.
//!
//! Tests every storage trait against all implementations. Each
//! implementation's test binary builds a store and runs the suites through
//! the `run_*_tests!` macros.
//!
//! Tests share one store per suite, so every test works on its own users,
//! game types, levels and windows.

pub mod earning_store_tests;
pub mod fixtures;
pub mod operation_store_tests;
pub mod rate_store_tests;
pub mod tier_store_tests;
pub mod user_state_tests;
