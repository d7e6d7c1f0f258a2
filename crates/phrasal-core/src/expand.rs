//! Expansion of definitions into token sequences

use rand::Rng;
use rand::rngs::StdRng;

use crate::grammar::DefinitionKind;
use crate::graph::{Cardinality, Choice, DefId, DefinitionGraph, Step};
use crate::token::{Token, Utterance};

fn paths(cardinality: Cardinality) -> u128 {
    cardinality.finite().unwrap_or(u128::MAX)
}

fn push_words(words: &[String], out: &mut Vec<Token>) {
    out.extend(words.iter().map(|w| Token::word(w.as_str())));
}

/// Append the expansion of `target` to `out`. Aliases splice inline; a slot
/// collapses into one entity token, or nothing when it expands to no words.
/// `expand` writes the chosen alternative and returns its synonym.
fn emit_reference(
    graph: &DefinitionGraph,
    target: DefId,
    out: &mut Vec<Token>,
    expand: impl FnOnce(&mut Vec<Token>) -> Option<String>,
) {
    let key = graph.node(target).key();
    if key.kind != DefinitionKind::Slot {
        expand(out);
        return;
    }

    let mut inner = Vec::new();
    let synonym = expand(&mut inner);
    if inner.is_empty() {
        return;
    }
    let value = Utterance::new(inner).text();
    out.push(Token::entity(key.name.as_str(), value, synonym));
}

/// Every expansion path of a definition, in depth-first declaration order.
///
/// Paths are numbered in mixed radix (first element most significant), so
/// the n-th utterance is decoded from `n` without keeping any stack.
pub(crate) struct Enumeration<'g> {
    graph: &'g DefinitionGraph,
    root: DefId,
    next: u128,
    total: u128,
}

impl<'g> Enumeration<'g> {
    pub(crate) fn new(graph: &'g DefinitionGraph, root: DefId) -> Self {
        Self {
            graph,
            root,
            next: 0,
            total: paths(graph.cardinality(root)),
        }
    }

    fn expand_node(&self, id: DefId, mut index: u128, out: &mut Vec<Token>) -> Option<String> {
        for choice in self.graph.node(id).choices() {
            let size = paths(choice.cardinality());
            if index < size {
                self.expand_choice(choice, index, out);
                return choice.synonym.clone();
            }
            index -= size;
        }
        None
    }

    fn expand_choice(&self, choice: &Choice, mut index: u128, out: &mut Vec<Token>) {
        let mut digits = vec![0u128; choice.steps.len()];
        for (step, digit) in choice.steps.iter().zip(digits.iter_mut()).rev() {
            let radix = self.radix(step);
            *digit = index % radix;
            index /= radix;
        }

        for (step, digit) in choice.steps.iter().zip(digits) {
            match step {
                // Present is digit 0 so present comes before absent.
                Step::Words { words, optional } => {
                    if !optional || digit == 0 {
                        push_words(words, out);
                    }
                }
                Step::Reference { target, optional } => {
                    if *optional && digit == paths(self.graph.cardinality(*target)) {
                        continue;
                    }
                    emit_reference(self.graph, *target, out, |out| {
                        self.expand_node(*target, digit, out)
                    });
                }
            }
        }
    }

    fn radix(&self, step: &Step) -> u128 {
        match step {
            Step::Words { optional: false, .. } => 1,
            Step::Words { optional: true, .. } => 2,
            Step::Reference { target, optional } => {
                let size = paths(self.graph.cardinality(*target));
                if *optional { size.saturating_add(1) } else { size }
            }
        }
    }
}

impl Iterator for Enumeration<'_> {
    type Item = Utterance;

    fn next(&mut self) -> Option<Utterance> {
        if self.next >= self.total {
            return None;
        }
        let mut out = Vec::new();
        self.expand_node(self.root, self.next, &mut out);
        self.next += 1;
        Some(Utterance::new(out))
    }
}

/// Independent random draws from a definition
pub(crate) struct Sampler<'g> {
    graph: &'g DefinitionGraph,
    rng: StdRng,
    optional_probability: f64,
    max_depth: usize,
}

impl<'g> Sampler<'g> {
    pub(crate) fn new(
        graph: &'g DefinitionGraph,
        rng: StdRng,
        optional_probability: f64,
        max_depth: usize,
    ) -> Self {
        Self {
            graph,
            rng,
            optional_probability,
            max_depth,
        }
    }

    pub(crate) fn sample(&mut self, root: DefId) -> Utterance {
        let mut out = Vec::new();
        self.expand_node(root, 0, &mut out);
        Utterance::new(out)
    }

    fn expand_node(&mut self, id: DefId, depth: usize, out: &mut Vec<Token>) -> Option<String> {
        let graph = self.graph;
        let choice = self.pick(graph.node(id).choices())?;

        for step in &choice.steps {
            match step {
                Step::Words { words, optional } => {
                    if !optional || self.rng.gen_bool(self.optional_probability) {
                        push_words(words, out);
                    }
                }
                Step::Reference { target, optional } => {
                    if *optional
                        && (depth >= self.max_depth || !self.rng.gen_bool(self.optional_probability))
                    {
                        continue;
                    }
                    emit_reference(graph, *target, out, |out| {
                        self.expand_node(*target, depth + 1, out)
                    });
                }
            }
        }
        choice.synonym.clone()
    }

    /// Roulette selection over resolved probabilities
    fn pick<'c>(&mut self, choices: &'c [Choice]) -> Option<&'c Choice> {
        let roll: f64 = self.rng.gen_range(0.0..1.0);
        let mut cumulative = 0.0;
        let mut last = None;
        for choice in choices.iter().filter(|c| c.probability() > 0.0) {
            cumulative += choice.probability();
            last = Some(choice);
            if roll < cumulative {
                return Some(choice);
            }
        }
        last.or(choices.first())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile;
    use crate::config::GenerationConfig;
    use rand::SeedableRng;

    fn graph(source: &str) -> DefinitionGraph {
        compile(source, &GenerationConfig::default()).unwrap()
    }

    fn texts(graph: &DefinitionGraph, intent: &str) -> Vec<String> {
        Enumeration::new(graph, graph.intent(intent).unwrap())
            .map(|u| u.text())
            .collect()
    }

    #[test]
    fn test_enumeration_is_depth_first() {
        let graph = graph("%[a]\n    ~[hi] ?[there]\n    bye\n\n~[hi]\n    hi\n    hello\n");
        assert_eq!(
            texts(&graph, "a"),
            vec!["hi there", "hi", "hello there", "hello", "bye"]
        );
    }

    #[test]
    fn test_optional_reference_present_before_absent() {
        let graph = graph("%[a]\n    go ~[where?]\n\n~[where]\n    home\n    out\n");
        assert_eq!(texts(&graph, "a"), vec!["go home", "go out", "go"]);
    }

    #[test]
    fn test_slot_becomes_one_entity() {
        let graph = graph("%[a]\n    fly to @[city]\n\n@[city]\n    ~[nyc]\n    paris\n\n~[nyc]\n    new york\n");
        let utterances: Vec<_> = Enumeration::new(&graph, graph.intent("a").unwrap()).collect();
        assert_eq!(
            utterances[0].tokens(),
            &[
                Token::word("fly"),
                Token::word("to"),
                Token::entity("city", "new york", Some("nyc".to_string())),
            ]
        );
        assert_eq!(
            utterances[1].tokens()[2],
            Token::entity("city", "paris", None)
        );
    }

    #[test]
    fn test_empty_slot_expansion_emits_nothing() {
        let graph = graph("%[a]\n    hi @[who]\n\n@[who]\n    ?[bob]\n");
        let utterances: Vec<_> = Enumeration::new(&graph, graph.intent("a").unwrap()).collect();
        assert_eq!(utterances.len(), 2);
        assert_eq!(utterances[0].tokens()[1], Token::entity("who", "bob", None));
        assert_eq!(utterances[1].tokens(), &[Token::word("hi")]);
    }

    #[test]
    fn test_slot_variation_expands_only_that_variation() {
        let graph = graph("%[a]\n    @[city#big]\n\n@[city#big]\n    tokyo\n\n@[city#small]\n    bled\n");
        let utterances: Vec<_> = Enumeration::new(&graph, graph.intent("a").unwrap()).collect();
        assert_eq!(utterances, vec![Utterance::new(vec![Token::entity("city", "tokyo", None)])]);
    }

    #[test]
    fn test_sampler_respects_zero_weight() {
        let graph = graph("%[a]\n    *[100%] yes\n    no\n");
        let mut sampler = Sampler::new(&graph, StdRng::seed_from_u64(1), 0.5, 32);
        let a = graph.intent("a").unwrap();
        for _ in 0..50 {
            assert_eq!(sampler.sample(a).text(), "yes");
        }
    }

    #[test]
    fn test_sampler_terminates_on_optional_recursion() {
        let graph = graph("%[a]\n    ~[more]\n\n~[more]\n    x ~[more?]\n");
        let mut sampler = Sampler::new(&graph, StdRng::seed_from_u64(7), 1.0, 5);
        let utterance = sampler.sample(graph.intent("a").unwrap());
        // Always taking the optional branch stops at the depth limit.
        assert_eq!(utterance.text(), "x x x x x");
    }
}
