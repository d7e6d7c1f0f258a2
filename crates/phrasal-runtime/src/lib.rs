//! Phrasal Runtime
//!
//! This crate runs generation for many intents in parallel and writes the
//! output to disk.
//!
//! # Features
//!
//! - One blocking worker per intent, bounded by `workers`
//! - Backpressure through a bounded channel to a single async sink
//! - Newline-delimited JSON output per intent and partition
//!
//! # Usage
//!
//! ```rust,ignore
//! use phrasal_runtime::{NdjsonWriter, Runtime};
//!
//! let runtime = Runtime::new(generation, runtime_config);
//! let mut writer = NdjsonWriter::new("out/travel");
//! let report = runtime.run(Arc::new(graph), &request, &mut writer).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod engine;
pub mod error;
pub mod jobs;
pub mod writer;

pub use engine::{RunReport, Runtime};
pub use error::{Error, Result};
pub use jobs::{IntentFailure, IntentJob};
pub use writer::{BatchSink, NdjsonWriter};
