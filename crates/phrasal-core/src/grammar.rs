//! Grammar syntax tree
//!
//! The parser produces a [`Grammar`]: an ordered list of [`Definition`]s, each
//! holding ordered [`Alternative`]s made of [`Element`]s. Order is preserved
//! everywhere because exhaustive generation follows declaration order.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// The three kinds of definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefinitionKind {
    /// Generation entry point, declared with `%[name]`
    Intent,
    /// Entity-producing definition, declared with `@[name]`
    Slot,
    /// Reusable wording, declared with `~[name]`
    Alias,
}

impl DefinitionKind {
    /// The sigil that introduces this kind in grammar text
    pub fn sigil(self) -> char {
        match self {
            DefinitionKind::Intent => '%',
            DefinitionKind::Slot => '@',
            DefinitionKind::Alias => '~',
        }
    }

    /// Map a sigil back to its kind
    pub fn from_sigil(sigil: char) -> Option<Self> {
        match sigil {
            '%' => Some(DefinitionKind::Intent),
            '@' => Some(DefinitionKind::Slot),
            '~' => Some(DefinitionKind::Alias),
            _ => None,
        }
    }
}

impl fmt::Display for DefinitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DefinitionKind::Intent => "intent",
            DefinitionKind::Slot => "slot",
            DefinitionKind::Alias => "alias",
        };
        f.write_str(name)
    }
}

/// Unique identity of a definition: kind, name and optional variation.
///
/// `@[city#capital]` is the `capital` variation of slot `city`; it is a
/// separate definition from `@[city]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DefinitionKey {
    /// Definition kind
    pub kind: DefinitionKind,
    /// Definition name
    pub name: String,
    /// Variation selected with `#variation`
    pub variation: Option<String>,
}

impl DefinitionKey {
    /// Key without a variation
    pub fn new(kind: DefinitionKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            variation: None,
        }
    }

    /// Key for a named variation
    pub fn with_variation(mut self, variation: impl Into<String>) -> Self {
        self.variation = Some(variation.into());
        self
    }
}

impl fmt::Display for DefinitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.variation {
            Some(variation) => write!(f, "{}[{}#{}]", self.kind.sigil(), self.name, variation),
            None => write!(f, "{}[{}]", self.kind.sigil(), self.name),
        }
    }
}

/// A named grammar rule
#[derive(Debug, Clone, PartialEq)]
pub struct Definition {
    /// Identity
    pub key: DefinitionKey,
    /// Header arguments, e.g. `('training': '20')`
    pub args: BTreeMap<String, String>,
    /// Alternatives in declaration order
    pub alternatives: Vec<Alternative>,
    /// Header line (1-based)
    pub line: usize,
}

impl Definition {
    /// Look up a header argument
    pub fn arg(&self, key: &str) -> Option<&str> {
        self.args.get(key).map(String::as_str)
    }
}

/// One candidate expansion of a definition
#[derive(Debug, Clone, PartialEq)]
pub struct Alternative {
    /// Elements in order
    pub elements: Vec<Element>,
    /// Explicit weight as a percentage in (0, 100]
    pub weight: Option<f64>,
    /// Source line (1-based)
    pub line: usize,
}

/// A unit inside an alternative
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Element {
    /// Plain text; `optional` segments are written `?[text]`
    Literal {
        /// The text, trimmed
        text: String,
        /// Whether the segment may be dropped
        optional: bool,
    },
    /// Reference to a slot or alias
    Reference(Reference),
}

impl Element {
    /// Whether the element may be dropped entirely
    pub fn is_optional(&self) -> bool {
        match self {
            Element::Literal { optional, .. } => *optional,
            Element::Reference(reference) => reference.optional,
        }
    }
}

/// An inline `~[name#argument?]` or `@[name#argument?]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    /// Kind of the referenced definition
    pub kind: DefinitionKind,
    /// Referenced name
    pub name: String,
    /// Variation to select
    pub argument: Option<String>,
    /// Trailing `?`
    pub optional: bool,
    /// Column of the sigil (1-based)
    pub column: usize,
}

impl Reference {
    /// Key of the definition this reference points to
    pub fn target(&self) -> DefinitionKey {
        DefinitionKey {
            kind: self.kind,
            name: self.name.clone(),
            variation: self.argument.clone(),
        }
    }
}

/// A parsed grammar document
#[derive(Debug, Clone, PartialEq)]
pub struct Grammar {
    /// Definitions in declaration order
    pub definitions: Vec<Definition>,
    content_hash: String,
}

impl Grammar {
    /// Create a grammar from definitions, fingerprinting the given source text
    pub fn new(definitions: Vec<Definition>, source: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(source.as_bytes());
        Self {
            definitions,
            content_hash: hex::encode(hasher.finalize()),
        }
    }

    /// SHA-256 of the source text, hex encoded
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    /// Intent definitions in declaration order
    pub fn intents(&self) -> impl Iterator<Item = &Definition> {
        self.definitions
            .iter()
            .filter(|d| d.key.kind == DefinitionKind::Intent)
    }

    /// Find a definition by key
    pub fn find(&self, key: &DefinitionKey) -> Option<&Definition> {
        self.definitions.iter().find(|d| &d.key == key)
    }
}
