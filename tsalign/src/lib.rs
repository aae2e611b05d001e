//! Streaming marker-free tilt-series alignment.
//!
//! A [`scheduler::StreamingScheduler`] watches a growing collection of tilt
//! series, runs each one through prepare, align and materialize steps on a
//! dependency-aware executor, and routes the results into a success or a
//! failure collection. Both collections are closed once the input stream is
//! closed and every tilt series has been handled.

pub mod align;
pub mod cli;
pub mod collection;
pub mod compose;
pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod output;
pub mod pipeline;
pub mod scheduler;

pub use error::{Error, Result};
