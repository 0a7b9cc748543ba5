//! EDGESCOUT: prediction market edge scanner.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod alerts;
pub mod config;
pub mod engine;
pub mod llm;
pub mod platforms;
pub mod storage;
pub mod types;
