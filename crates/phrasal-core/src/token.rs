//! Generated utterances
//!
//! An [`Utterance`] is an ordered sequence of [`Token`]s: plain words and
//! resolved slot values. Sinks receive utterances in this shape.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One unit of a generated sentence
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Token {
    /// A literal word
    Word {
        /// The word
        text: String,
    },
    /// A slot value
    Entity {
        /// Slot name (without variation)
        slot: String,
        /// Surface text as it appears in the sentence
        value: String,
        /// Alias the value was spelled through, when the slot sentence is a
        /// single alias reference
        synonym: Option<String>,
    },
}

impl Token {
    /// Create a word token
    pub fn word(text: impl Into<String>) -> Self {
        Token::Word { text: text.into() }
    }

    /// Create an entity token
    pub fn entity(slot: impl Into<String>, value: impl Into<String>, synonym: Option<String>) -> Self {
        Token::Entity {
            slot: slot.into(),
            value: value.into(),
            synonym,
        }
    }

    /// Surface text of the token
    pub fn text(&self) -> &str {
        match self {
            Token::Word { text } => text,
            Token::Entity { value, .. } => value,
        }
    }

    /// Whether this token is a slot value
    pub fn is_entity(&self) -> bool {
        matches!(self, Token::Entity { .. })
    }
}

/// One generated sentence
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Utterance {
    tokens: Vec<Token>,
}

impl Utterance {
    /// Create an utterance from tokens
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens }
    }

    /// Tokens in order
    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    /// Consume into tokens
    pub fn into_tokens(self) -> Vec<Token> {
        self.tokens
    }

    /// Number of tokens
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Whether the utterance has no tokens
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Flattened text: token texts joined by single spaces.
    ///
    /// Two utterances with the same text are duplicates.
    pub fn text(&self) -> String {
        let mut text = String::new();
        for token in &self.tokens {
            if !text.is_empty() {
                text.push(' ');
            }
            text.push_str(token.text());
        }
        text
    }

    /// Entity tokens only
    pub fn entities(&self) -> impl Iterator<Item = &Token> {
        self.tokens.iter().filter(|t| t.is_entity())
    }
}

impl fmt::Display for Utterance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text())
    }
}

impl From<Vec<Token>> for Utterance {
    fn from(tokens: Vec<Token>) -> Self {
        Self::new(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_joins_words_and_entities() {
        let utterance = Utterance::new(vec![
            Token::word("fly"),
            Token::word("to"),
            Token::entity("city", "new york", Some("nyc".to_string())),
        ]);
        assert_eq!(utterance.text(), "fly to new york");
        assert_eq!(utterance.len(), 3);
        assert_eq!(utterance.entities().count(), 1);
    }

    #[test]
    fn test_empty_utterance() {
        let utterance = Utterance::default();
        assert!(utterance.is_empty());
        assert_eq!(utterance.text(), "");
    }

    #[test]
    fn test_token_json_shape() {
        let utterance = Utterance::new(vec![
            Token::word("book"),
            Token::entity("city", "paris", None),
        ]);
        let value = serde_json::to_value(&utterance).unwrap();
        assert_eq!(
            value,
            json!([
                {"type": "word", "text": "book"},
                {"type": "entity", "slot": "city", "value": "paris", "synonym": null}
            ])
        );
    }
}
