//! Trace-replay conformance harness for tagheap.
//!
//! This crate provides:
//! - Trace fixtures: named allocate/release scripts as committed JSON
//! - Trace replay: run a script against a fresh heap, validating alignment,
//!   disjointness, payload round-trips, byte conservation, and tag audits
//! - Trace synthesis: seeded random scripts for reproducible soak runs
//! - Reporting: machine-readable replay reports with a canonical digest of
//!   the provider's map/unmap event stream

#![forbid(unsafe_code)]

pub mod runner;
pub mod synth;
pub mod trace;

pub use runner::{TraceReport, TraceRunner};
pub use synth::synth_fixture;
pub use trace::{DEFAULT_PAGE_LIMIT, TraceError, TraceFixture, TraceOp};
