//! AEGIS: autonomous trading decision core.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod analysis;
pub mod config;
pub mod dashboard;
pub mod data;
pub mod engine;
pub mod llm;
pub mod platforms;
pub mod storage;
pub mod strategy;
pub mod types;
