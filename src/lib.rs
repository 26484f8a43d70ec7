//! fuzzdiff library crate.
//!
//! The primary interface is the `fuzzdiff` binary. The library exposes the
//! trial engine so integration tests can drive the pipeline, the worker pool
//! and the aggregator directly, with scripted or real external tools.

pub mod artifacts;
pub mod config;
pub mod error;
pub mod format;
pub mod outcome;
pub mod pipeline;
pub mod pool;
pub mod preflight;
pub mod process;
pub mod report;
pub mod run;
pub mod telemetry;
pub mod toolchain;
