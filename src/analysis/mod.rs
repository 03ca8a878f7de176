//! Analysis modules.
//!
//! The aggregator turns census rows into per-occupation statistics.

pub mod aggregator;

pub use aggregator::*;
