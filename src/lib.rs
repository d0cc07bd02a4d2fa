//! Rakeback - wager cashback engine
//!
//! Credits cashback on completed wagers, tracks loyalty tier progression and
//! pays available cashback out to user balances. Financial writes run under
//! a persisted retry orchestrator so transient storage failures never lose
//! or double-credit an earning.

pub mod config;
pub mod engine;
pub mod ingest;
pub mod ledger;
pub mod model;
pub mod notify;
pub mod progression;
pub mod rates;
pub mod retry;
pub mod scheduler;
pub mod storage;
pub mod utils;

pub use engine::{CashbackEngine, CashbackError, EngineSettings};
