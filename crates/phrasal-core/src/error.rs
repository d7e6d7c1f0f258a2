//! Error types for phrasal-core

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::emitter::SinkError;

/// Result type alias for phrasal-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Malformed grammar text, with a 1-based source location.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} (line {line}, column {column})")]
pub struct SyntaxError {
    /// Human-readable description
    pub message: String,
    /// 1-based line number
    pub line: usize,
    /// 1-based column number (in characters)
    pub column: usize,
}

impl SyntaxError {
    /// Create a syntax error at the given location
    pub fn new(message: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            message: message.into(),
            line,
            column,
        }
    }
}

/// Errors that can occur in phrasal-core
///
/// Everything except [`Error::Cancelled`] and [`Error::Sink`] is structural:
/// it is raised before generation starts and no partial grammar is used.
#[derive(Error, Debug)]
pub enum Error {
    /// Grammar text could not be parsed
    #[error("syntax error: {0}")]
    Syntax(#[from] SyntaxError),

    /// Explicit weights of one definition add up to more than 100%
    #[error("weights of {definition} add up to {total}%, more than 100%")]
    WeightOverflow {
        /// Offending definition, e.g. `@[city]`
        definition: String,
        /// Sum of the explicit percentages
        total: f64,
    },

    /// A definition without any alternative
    #[error("{definition} has no sentences")]
    EmptyDefinition {
        /// Offending definition
        definition: String,
    },

    /// Definitions reference each other without any optional escape
    #[error("cyclic definition: {}", .cycle.join(" -> "))]
    CyclicDefinition {
        /// Definitions along the cycle; the first one is repeated at the end
        cycle: Vec<String>,
    },

    /// A reference names a definition that does not exist
    #[error("{from} references undefined {missing}")]
    UndefinedReference {
        /// Definition containing the reference
        from: String,
        /// The missing definition
        missing: String,
    },

    /// An intent was referenced from a sentence
    #[error("{from} references intent {intent}; intents cannot be referenced")]
    IntentReference {
        /// Definition containing the reference
        from: String,
        /// The referenced intent
        intent: String,
    },

    /// A slot expands (possibly through aliases) into another slot
    #[error("slot {slot} cannot contain slot {nested}")]
    NestedSlot {
        /// Outer slot
        slot: String,
        /// Slot reached from inside it
        nested: String,
    },

    /// Generation requested for an intent the grammar does not declare
    #[error("unknown intent '{name}'")]
    UnknownIntent {
        /// Requested intent name
        name: String,
    },

    /// The run was cancelled; partial output was already delivered
    #[error("generation cancelled after {produced} utterances")]
    Cancelled {
        /// Utterances delivered before cancellation
        produced: usize,
    },

    /// The sink rejected a batch
    #[error(transparent)]
    Sink(SinkError),

    /// Configuration file could not be found
    #[error("configuration file not found: {path}")]
    ConfigNotFound {
        /// Path that was searched
        path: String,
    },

    /// Failed to parse YAML configuration
    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// Invalid configuration value
    #[error("invalid configuration: {message}")]
    ConfigInvalid {
        /// Description of what's invalid
        message: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error is detected before generation (grammar or config problem)
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Error::Syntax(_)
                | Error::WeightOverflow { .. }
                | Error::EmptyDefinition { .. }
                | Error::CyclicDefinition { .. }
                | Error::UndefinedReference { .. }
                | Error::IntentReference { .. }
                | Error::NestedSlot { .. }
        )
    }
}

/// Recoverable conditions reported alongside partial results
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    /// Not enough distinct utterances could be produced for an intent
    InsufficientUniqueExamples {
        /// Intent name
        intent: String,
        /// Number of utterances requested
        requested: usize,
        /// Number of distinct utterances produced
        produced: usize,
    },
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Warning::InsufficientUniqueExamples {
                intent,
                requested,
                produced,
            } => write!(
                f,
                "intent '{}': requested {} unique examples but only {} could be generated",
                intent, requested, produced
            ),
        }
    }
}
