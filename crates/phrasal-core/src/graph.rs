//! Definition graph
//!
//! The grammar is linked into an index-based graph: every definition gets a
//! [`DefId`] and references are resolved to ids once, so traversals (cycle
//! detection, cardinality, expansion) work over integers and never chase
//! names.
//!
//! Building the graph performs every structural check:
//! - undefined references and references to intents
//! - weight resolution (see [`crate::weights`])
//! - cycles made only of non-optional references
//! - slots that expand into other slots

use std::collections::HashMap;
use std::fmt;

use crate::config::GenerationConfig;
use crate::error::{Error, Result};
use crate::grammar::{DefinitionKey, DefinitionKind, Element, Grammar};
use crate::weights;

/// Index of a definition inside a [`DefinitionGraph`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DefId(usize);

impl DefId {
    /// Position in declaration order
    pub fn index(self) -> usize {
        self.0
    }
}

/// Number of distinct expansion paths of a definition or alternative
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// Finite path count (saturating at `u128::MAX`)
    Finite(u128),
    /// Optional recursion makes the space infinite
    Unbounded,
}

impl Cardinality {
    /// Exactly one path
    pub const ONE: Cardinality = Cardinality::Finite(1);

    /// The finite count, if any
    pub fn finite(self) -> Option<u128> {
        match self {
            Cardinality::Finite(n) => Some(n),
            Cardinality::Unbounded => None,
        }
    }

    /// Whether the count is finite and at most `limit`
    pub fn is_within(self, limit: u128) -> bool {
        self.finite().is_some_and(|n| n <= limit)
    }

    fn plus(self, other: Cardinality) -> Cardinality {
        match (self, other) {
            (Cardinality::Finite(a), Cardinality::Finite(b)) => Cardinality::Finite(a.saturating_add(b)),
            _ => Cardinality::Unbounded,
        }
    }

    fn times(self, other: Cardinality) -> Cardinality {
        match (self, other) {
            (Cardinality::Finite(a), Cardinality::Finite(b)) => Cardinality::Finite(a.saturating_mul(b)),
            _ => Cardinality::Unbounded,
        }
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cardinality::Finite(n) => write!(f, "{}", n),
            Cardinality::Unbounded => f.write_str("unbounded"),
        }
    }
}

/// A linked element
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Step {
    Words { words: Vec<String>, optional: bool },
    Reference { target: DefId, optional: bool },
}

/// A linked alternative with its resolved probability
#[derive(Debug, Clone, PartialEq)]
pub struct Choice {
    pub(crate) steps: Vec<Step>,
    pub(crate) weight: Option<f64>,
    pub(crate) probability: f64,
    pub(crate) cardinality: Cardinality,
    pub(crate) synonym: Option<String>,
    pub(crate) line: usize,
}

impl Choice {
    /// Explicit weight as written (percentage)
    pub fn weight(&self) -> Option<f64> {
        self.weight
    }

    /// Resolved probability in [0, 1]
    pub fn probability(&self) -> f64 {
        self.probability
    }

    /// Number of expansion paths of this alternative
    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    /// Source line
    pub fn line(&self) -> usize {
        self.line
    }
}

/// A linked definition
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub(crate) key: DefinitionKey,
    pub(crate) args: std::collections::BTreeMap<String, String>,
    pub(crate) choices: Vec<Choice>,
    pub(crate) cardinality: Cardinality,
}

impl Node {
    /// Definition identity
    pub fn key(&self) -> &DefinitionKey {
        &self.key
    }

    /// Header argument
    pub fn arg(&self, key: &str) -> Option<&str> {
        self.args.get(key).map(String::as_str)
    }

    /// Alternatives in declaration order
    pub fn choices(&self) -> &[Choice] {
        &self.choices
    }

    /// Number of expansion paths
    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }
}

/// Validated, weighted grammar ready for generation
#[derive(Debug, Clone)]
pub struct DefinitionGraph {
    nodes: Vec<Node>,
    index: HashMap<DefinitionKey, DefId>,
    content_hash: String,
}

impl DefinitionGraph {
    /// Link, weight and validate a grammar
    pub fn build(grammar: Grammar, config: &GenerationConfig) -> Result<Self> {
        let mut graph = Self::link(grammar)?;
        graph.compute_cardinalities();
        weights::resolve(&mut graph, u128::from(config.exhaustive_ceiling))?;
        graph.check_cycles()?;
        graph.check_nested_slots()?;

        tracing::debug!(
            definitions = graph.nodes.len(),
            intents = graph.intents().count(),
            "definition graph ready"
        );
        Ok(graph)
    }

    fn link(grammar: Grammar) -> Result<Self> {
        let content_hash = grammar.content_hash().to_string();
        let index: HashMap<DefinitionKey, DefId> = grammar
            .definitions
            .iter()
            .enumerate()
            .map(|(i, d)| (d.key.clone(), DefId(i)))
            .collect();

        let mut nodes = Vec::with_capacity(grammar.definitions.len());
        for definition in grammar.definitions {
            let mut choices = Vec::with_capacity(definition.alternatives.len());
            for alternative in definition.alternatives {
                let mut steps = Vec::with_capacity(alternative.elements.len());
                for element in alternative.elements {
                    let step = match element {
                        Element::Literal { text, optional } => Step::Words {
                            words: text.split_whitespace().map(str::to_string).collect(),
                            optional,
                        },
                        Element::Reference(reference) => {
                            let target = reference.target();
                            if target.kind == DefinitionKind::Intent {
                                return Err(Error::IntentReference {
                                    from: definition.key.to_string(),
                                    intent: target.to_string(),
                                });
                            }
                            let id = index.get(&target).copied().ok_or_else(|| {
                                Error::UndefinedReference {
                                    from: definition.key.to_string(),
                                    missing: target.to_string(),
                                }
                            })?;
                            Step::Reference {
                                target: id,
                                optional: reference.optional,
                            }
                        }
                    };
                    steps.push(step);
                }
                choices.push(Choice {
                    steps,
                    weight: alternative.weight,
                    probability: 0.0,
                    cardinality: Cardinality::ONE,
                    synonym: None,
                    line: alternative.line,
                });
            }
            nodes.push(Node {
                key: definition.key,
                args: definition.args,
                choices,
                cardinality: Cardinality::ONE,
            });
        }

        // A slot sentence made of a single alias reference spells a synonym
        // whose canonical value is the alias name.
        let names: Vec<String> = nodes.iter().map(|n| n.key.name.clone()).collect();
        for node in nodes.iter_mut().filter(|n| n.key.kind == DefinitionKind::Slot) {
            for choice in &mut node.choices {
                if let [Step::Reference { target, optional: false }] = choice.steps.as_slice() {
                    choice.synonym = Some(names[target.0].clone());
                }
            }
        }

        Ok(Self {
            nodes,
            index,
            content_hash,
        })
    }

    /// Number of definitions
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no definitions
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// SHA-256 of the grammar source
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    /// Node by id
    pub fn node(&self, id: DefId) -> &Node {
        &self.nodes[id.0]
    }

    /// Look up a definition
    pub fn get(&self, key: &DefinitionKey) -> Option<DefId> {
        self.index.get(key).copied()
    }

    /// All ids in declaration order
    pub fn ids(&self) -> impl Iterator<Item = DefId> + '_ {
        (0..self.nodes.len()).map(DefId)
    }

    /// Intent ids in declaration order
    pub fn intents(&self) -> impl Iterator<Item = DefId> + '_ {
        self.ids()
            .filter(|id| self.node(*id).key.kind == DefinitionKind::Intent)
    }

    /// Find an intent by name
    pub fn intent(&self, name: &str) -> Option<DefId> {
        self.get(&DefinitionKey::new(DefinitionKind::Intent, name))
    }

    /// Number of expansion paths of a definition
    pub fn cardinality(&self, id: DefId) -> Cardinality {
        self.node(id).cardinality
    }

    pub(crate) fn nodes_mut(&mut self) -> &mut [Node] {
        &mut self.nodes
    }

    fn references(&self, id: DefId) -> impl Iterator<Item = (DefId, bool)> + '_ {
        self.node(id).choices.iter().flat_map(|c| {
            c.steps.iter().filter_map(|step| match step {
                Step::Reference { target, optional } => Some((*target, *optional)),
                Step::Words { .. } => None,
            })
        })
    }

    fn compute_cardinalities(&mut self) {
        let mut state = vec![Visit::New; self.nodes.len()];
        let mut totals = vec![Cardinality::ONE; self.nodes.len()];
        let mut per_choice: Vec<Vec<Cardinality>> =
            self.nodes.iter().map(|n| vec![Cardinality::ONE; n.choices.len()]).collect();

        for id in self.ids() {
            count_paths(self, id, &mut state, &mut totals, &mut per_choice);
        }

        for ((node, total), choices) in self.nodes.iter_mut().zip(totals).zip(per_choice) {
            node.cardinality = total;
            for (choice, cardinality) in node.choices.iter_mut().zip(choices) {
                choice.cardinality = cardinality;
            }
        }
    }

    /// Reject cycles whose every edge is a non-optional reference.
    fn check_cycles(&self) -> Result<()> {
        let mut state = vec![Visit::New; self.nodes.len()];
        let mut stack = Vec::new();
        for id in self.ids() {
            if state[id.0] == Visit::New {
                if let Some(cycle) = self.find_cycle(id, &mut state, &mut stack) {
                    let cycle: Vec<String> = cycle.iter().map(|id| self.node(*id).key.to_string()).collect();
                    tracing::debug!(cycle = %cycle.join(" -> "), "rejecting cyclic grammar");
                    return Err(Error::CyclicDefinition { cycle });
                }
            }
        }
        Ok(())
    }

    fn find_cycle(&self, id: DefId, state: &mut [Visit], stack: &mut Vec<DefId>) -> Option<Vec<DefId>> {
        state[id.0] = Visit::Active;
        stack.push(id);
        for (target, optional) in self.references(id) {
            if optional {
                continue;
            }
            match state[target.0] {
                Visit::Active => {
                    let start = stack.iter().position(|s| *s == target).unwrap_or(0);
                    let mut cycle = stack[start..].to_vec();
                    cycle.push(target);
                    return Some(cycle);
                }
                Visit::New => {
                    if let Some(cycle) = self.find_cycle(target, state, stack) {
                        return Some(cycle);
                    }
                }
                Visit::Done => {}
            }
        }
        stack.pop();
        state[id.0] = Visit::Done;
        None
    }

    fn check_nested_slots(&self) -> Result<()> {
        for slot in self.ids().filter(|id| self.node(*id).key.kind == DefinitionKind::Slot) {
            let mut seen = vec![false; self.nodes.len()];
            let mut pending: Vec<DefId> = self.references(slot).map(|(t, _)| t).collect();
            while let Some(id) = pending.pop() {
                if std::mem::replace(&mut seen[id.0], true) {
                    continue;
                }
                if self.node(id).key.kind == DefinitionKind::Slot {
                    return Err(Error::NestedSlot {
                        slot: self.node(slot).key.to_string(),
                        nested: self.node(id).key.to_string(),
                    });
                }
                pending.extend(self.references(id).map(|(t, _)| t));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    New,
    Active,
    Done,
}

/// Memoized path count. Reaching a definition that is still being counted
/// means recursion, which only optional references allow; the count is then
/// unbounded for everything on the current path.
fn count_paths(
    graph: &DefinitionGraph,
    id: DefId,
    state: &mut [Visit],
    totals: &mut [Cardinality],
    per_choice: &mut [Vec<Cardinality>],
) -> Cardinality {
    match state[id.0] {
        Visit::Done => return totals[id.0],
        Visit::Active => return Cardinality::Unbounded,
        Visit::New => {}
    }
    state[id.0] = Visit::Active;

    let node = graph.node(id);
    let mut total = Cardinality::Finite(0);
    for (index, choice) in node.choices.iter().enumerate() {
        let mut paths = Cardinality::ONE;
        for step in &choice.steps {
            let step_paths = match step {
                Step::Words { optional: true, .. } => Cardinality::Finite(2),
                Step::Words { optional: false, .. } => Cardinality::ONE,
                Step::Reference { target, optional } => {
                    let inner = count_paths(graph, *target, state, totals, per_choice);
                    if *optional { inner.plus(Cardinality::ONE) } else { inner }
                }
            };
            paths = paths.times(step_paths);
        }
        per_choice[id.0][index] = paths;
        total = total.plus(paths);
    }

    state[id.0] = Visit::Done;
    totals[id.0] = total;
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile;
    use crate::grammar::{Alternative, Definition};

    fn build(source: &str) -> Result<DefinitionGraph> {
        compile(source, &GenerationConfig::default())
    }

    #[test]
    fn test_ids_follow_declaration_order() {
        let graph = build("%[a]\n    x ~[b]\n\n~[b]\n    y\n").unwrap();
        let a = graph.intent("a").unwrap();
        let b = graph.get(&DefinitionKey::new(DefinitionKind::Alias, "b")).unwrap();
        assert_eq!((a.index(), b.index()), (0, 1));
        assert_eq!(graph.intents().collect::<Vec<_>>(), vec![a]);
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn test_undefined_reference() {
        let err = build("%[a]\n    x ~[missing]\n").unwrap_err();
        match err {
            Error::UndefinedReference { from, missing } => {
                assert_eq!(from, "%[a]");
                assert_eq!(missing, "~[missing]");
            }
            other => panic!("Expected undefined reference, got {:?}", other),
        }
    }

    #[test]
    fn test_reference_to_missing_variation_is_undefined() {
        let err = build("%[a]\n    x @[city#big]\n\n@[city]\n    paris\n").unwrap_err();
        assert!(matches!(err, Error::UndefinedReference { ref missing, .. } if missing == "@[city#big]"));
    }

    #[test]
    fn test_mutual_recursion_is_cyclic() {
        let err = build("%[go]\n    ~[a]\n\n~[a]\n    x ~[b]\n\n~[b]\n    y ~[a]\n").unwrap_err();
        match err {
            Error::CyclicDefinition { cycle } => {
                assert_eq!(cycle, vec!["~[a]", "~[b]", "~[a]"]);
            }
            other => panic!("Expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_self_reference_is_cyclic() {
        let err = build("~[a]\n    x ~[a]\n").unwrap_err();
        assert!(matches!(err, Error::CyclicDefinition { ref cycle } if cycle == &["~[a]", "~[a]"]));
    }

    #[test]
    fn test_optional_recursion_is_unbounded() {
        let graph = build("%[go]\n    ~[a]\n\n~[a]\n    x ~[b?]\n\n~[b]\n    y ~[a]\n").unwrap();
        let go = graph.intent("go").unwrap();
        assert_eq!(graph.cardinality(go), Cardinality::Unbounded);
    }

    #[test]
    fn test_cardinality_counts_paths() {
        // 2 greetings x (2 cities + absent) x (present/absent)
        let graph = build(
            "%[a]\n    ~[hi] @[city?] ?[please]\n    bye\n\n~[hi]\n    hi\n    hello\n\n@[city]\n    paris\n    rome\n",
        )
        .unwrap();
        let a = graph.intent("a").unwrap();
        assert_eq!(graph.cardinality(a), Cardinality::Finite(2 * 3 * 2 + 1));
        let choices = graph.node(a).choices();
        assert_eq!(choices[0].cardinality(), Cardinality::Finite(12));
        assert_eq!(choices[1].cardinality(), Cardinality::ONE);
    }

    #[test]
    fn test_nested_slot_is_rejected() {
        let err = build("@[outer]\n    ~[wrap]\n\n~[wrap]\n    @[inner]\n\n@[inner]\n    x\n").unwrap_err();
        match err {
            Error::NestedSlot { slot, nested } => {
                assert_eq!(slot, "@[outer]");
                assert_eq!(nested, "@[inner]");
            }
            other => panic!("Expected nested slot, got {:?}", other),
        }
    }

    #[test]
    fn test_synonym_detection() {
        let graph = build("@[city]\n    ~[nyc]\n    paris\n    ~[nyc] city\n\n~[nyc]\n    new york\n").unwrap();
        let city = graph.get(&DefinitionKey::new(DefinitionKind::Slot, "city")).unwrap();
        let synonyms: Vec<_> = graph.node(city).choices().iter().map(|c| c.synonym.clone()).collect();
        assert_eq!(synonyms, vec![Some("nyc".to_string()), None, None]);
    }

    #[test]
    fn test_intent_reference_from_programmatic_grammar() {
        let grammar = Grammar::new(
            vec![Definition {
                key: DefinitionKey::new(DefinitionKind::Intent, "a"),
                args: Default::default(),
                alternatives: vec![Alternative {
                    elements: vec![Element::Reference(crate::grammar::Reference {
                        kind: DefinitionKind::Intent,
                        name: "a".to_string(),
                        argument: None,
                        optional: false,
                        column: 5,
                    })],
                    weight: None,
                    line: 2,
                }],
                line: 1,
            }],
            "",
        );
        let err = DefinitionGraph::build(grammar, &GenerationConfig::default()).unwrap_err();
        assert!(matches!(err, Error::IntentReference { .. }));
    }

    #[test]
    fn test_empty_definition_from_programmatic_grammar() {
        let grammar = Grammar::new(
            vec![Definition {
                key: DefinitionKey::new(DefinitionKind::Alias, "nothing"),
                args: Default::default(),
                alternatives: vec![],
                line: 1,
            }],
            "",
        );
        let err = DefinitionGraph::build(grammar, &GenerationConfig::default()).unwrap_err();
        assert!(matches!(err, Error::EmptyDefinition { ref definition } if definition == "~[nothing]"));
    }
}
