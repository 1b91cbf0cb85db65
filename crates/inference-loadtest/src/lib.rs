// Numan Thabit 2025
// crates/inference-loadtest/src/lib.rs
#![forbid(unsafe_code)]

pub mod config;
pub mod report;
pub mod runner;
pub mod stats;
pub mod workload;
