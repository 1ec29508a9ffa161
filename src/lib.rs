//! PREDICTOOR: epoch-driven two-sided price-direction prediction agent.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod backtest;
pub mod clock;
pub mod config;
pub mod engine;
pub mod feeds;
pub mod gateway;
pub mod model;
pub mod storage;
pub mod strategy;
pub mod types;
