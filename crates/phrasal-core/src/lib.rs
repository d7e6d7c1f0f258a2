//! Phrasal Core Library
//!
//! This crate turns `.phrasal` grammars into labeled training utterances:
//! - Grammar parsing with precise syntax error locations
//! - Definition graph construction and structural validation
//! - Weight resolution for alternatives
//! - Exhaustive and sampled generation with dedup and train/test partitioning
//! - Token emission to caller-provided sinks
//!
//! # Architecture
//!
//! ```text
//! ┌─────────┐     ┌─────────┐     ┌─────────┐     ┌─────────┐     ┌─────────┐
//! │ Grammar │────▶│  Graph  │────▶│ Weights │────▶│Generator│────▶│  Sink   │
//! │ (Parse) │     │(Validate│     │(Resolve)│     │ (Expand)│     │ (Emit)  │
//! └─────────┘     └─────────┘     └─────────┘     └─────────┘     └─────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use phrasal_core::{compile, Dataset, GenerationConfig, GenerationRequest, Generator};
//!
//! let source = "%[greet]\n    hello @[name]\n\n@[name]\n    ada\n    grace\n";
//! let config = GenerationConfig::default();
//! let graph = compile(source, &config)?;
//!
//! let mut dataset = Dataset::default();
//! let summary = Generator::new(&graph, &config).run(&GenerationRequest::all(), &mut dataset)?;
//!
//! assert_eq!(summary.training_total(), 2);
//! assert_eq!(dataset.intent("greet").unwrap().training[0].text(), "hello ada");
//! # Ok::<(), phrasal_core::Error>(())
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cancel;
pub mod config;
pub mod emitter;
pub mod error;
mod expand;
pub mod generator;
pub mod grammar;
pub mod graph;
pub mod parser;
pub mod partition;
pub mod token;
pub mod weights;

pub use cancel::Cancellation;
pub use config::{Config, GenerationConfig, ProjectConfig, RuntimeConfig};
pub use emitter::{Batch, Dataset, IntentDataset, OwnedBatch, Sink, SinkError};
pub use error::{Error, Result, SyntaxError, Warning};
pub use generator::{
    GenerationRequest, Generator, IntentPlan, IntentSummary, Request, RunSummary, Strategy,
    UtteranceStream,
};
pub use grammar::{Definition, DefinitionKey, DefinitionKind, Element, Grammar};
pub use graph::{Cardinality, DefId, DefinitionGraph};
pub use parser::Parser;
pub use partition::{Partition, PartitionPlan};
pub use token::{Token, Utterance};

/// Parse, validate and weight a grammar in one step.
///
/// Every structural error (syntax, weights, cycles, undefined references)
/// surfaces here, before any utterance is generated.
pub fn compile(source: &str, config: &GenerationConfig) -> Result<DefinitionGraph> {
    config.validate()?;
    let grammar = Parser::new().parse_str(source)?;
    DefinitionGraph::build(grammar, config)
}
