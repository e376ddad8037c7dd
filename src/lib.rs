//! FLOODWATCH: Weekly per-region flood-risk report generator
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod data;
pub mod llm;
pub mod engine;
pub mod storage;
pub mod api;
