//! Backtest-driven weight tuner and constrained batch generator for
//! fixed-size draws (15 of 25 by default).
pub mod analytics;
pub mod backtest;
pub mod config;
pub mod database;
pub mod error;
pub mod generator;
pub mod guard;
pub mod lock;
pub mod models;
pub mod pipeline;
pub mod sampler;
pub mod scoring;
pub mod search;
pub mod stats;
pub mod store;
