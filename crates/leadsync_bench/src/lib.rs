//! Benchmarks for leadsync.
//!
//! The benchmarks live under `benches/`; this library holds the shared data
//! generators.

pub mod utils;
