//! Generation engine
//!
//! For every intent the generator picks a [`Strategy`]: small finite spaces
//! are enumerated exhaustively, large or unbounded ones are sampled. Output
//! is deduplicated on flattened text, split into training and testing, and
//! pushed to a [`Sink`] in batches.
//!
//! Sampling is seeded per intent from the run seed and the intent name, so
//! an intent produces the same utterances whether it runs alone, in
//! sequence with the others, or on its own worker.

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;

use crate::cancel::Cancellation;
use crate::config::GenerationConfig;
use crate::emitter::{Emitter, Sink};
use crate::error::{Error, Result, Warning};
use crate::expand::{Enumeration, Sampler};
use crate::graph::{DefId, DefinitionGraph};
use crate::partition::{Partition, PartitionPlan};
use crate::token::Utterance;

/// How many utterances to produce per intent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Request {
    /// Every distinct utterance, up to the exhaustive ceiling
    All,
    /// This many distinct utterances
    Samples(usize),
}

/// Run-level generation request
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationRequest {
    /// Amount per intent
    pub shape: Request,
    /// Fraction reserved for testing
    pub test_fraction: Option<f64>,
}

impl GenerationRequest {
    /// Everything, all of it training
    pub fn all() -> Self {
        Self {
            shape: Request::All,
            test_fraction: None,
        }
    }

    /// `n` utterances per intent, all of it training
    pub fn samples(n: usize) -> Self {
        Self {
            shape: Request::Samples(n),
            test_fraction: None,
        }
    }

    /// Reserve a fraction of every intent for testing
    pub fn with_test_fraction(mut self, fraction: f64) -> Self {
        self.test_fraction = Some(fraction);
        self
    }
}

/// How an intent is generated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Strategy {
    /// Enumerate every path in declaration order
    Exhaustive {
        /// Number of paths
        paths: u64,
    },
    /// Independent weighted draws
    Sampled {
        /// Unique utterances to aim for
        draws: usize,
    },
}

/// Resolved generation plan for one intent
#[derive(Debug, Clone, PartialEq)]
pub struct IntentPlan {
    /// Intent id
    pub intent: DefId,
    /// Intent name
    pub name: String,
    /// Chosen strategy
    pub strategy: Strategy,
    /// Unique utterances to stop at
    pub target: usize,
    /// Requested count; producing fewer raises a warning
    pub requested: Option<usize>,
    /// Train/test split
    pub partition: PartitionPlan,
    /// Seed for this intent's sampler
    pub seed: u64,
}

/// Outcome of generating one intent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentSummary {
    /// Intent name
    pub intent: String,
    /// Strategy used
    pub strategy: Strategy,
    /// Training utterances produced
    pub training: usize,
    /// Test utterances produced
    pub testing: usize,
    /// Non-fatal problems
    pub warnings: Vec<Warning>,
    /// Whether generation stopped early
    pub cancelled: bool,
}

impl IntentSummary {
    /// Utterances produced across both partitions
    pub fn total(&self) -> usize {
        self.training + self.testing
    }
}

/// Outcome of a whole run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Run seed the per-intent seeds were derived from
    pub seed: u64,
    /// Per-intent outcomes in declaration order
    pub intents: Vec<IntentSummary>,
    /// Whether the run stopped early
    pub cancelled: bool,
}

impl RunSummary {
    /// Training utterances across intents
    pub fn training_total(&self) -> usize {
        self.intents.iter().map(|i| i.training).sum()
    }

    /// Test utterances across intents
    pub fn testing_total(&self) -> usize {
        self.intents.iter().map(|i| i.testing).sum()
    }

    /// Every warning raised during the run
    pub fn warnings(&self) -> impl Iterator<Item = &Warning> {
        self.intents.iter().flat_map(|i| i.warnings.iter())
    }

    /// Whether generation stopped early
    pub fn cancelled(&self) -> bool {
        self.cancelled
    }

    /// Turn a cancelled run into [`Error::Cancelled`]
    pub fn ensure_complete(self) -> Result<Self> {
        if self.cancelled {
            return Err(Error::Cancelled {
                produced: self.training_total() + self.testing_total(),
            });
        }
        Ok(self)
    }
}

/// Derive an intent's sampling seed from the run seed
pub fn intent_seed(run_seed: u64, intent: &str) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(run_seed.to_le_bytes());
    hasher.update(intent.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

/// Generates utterances from a validated graph
#[derive(Debug, Clone)]
pub struct Generator<'g> {
    graph: &'g DefinitionGraph,
    config: GenerationConfig,
    seed: u64,
    cancellation: Cancellation,
}

impl<'g> Generator<'g> {
    /// Create a generator. Without a configured seed, one is drawn from OS
    /// entropy and reported in the run summary.
    pub fn new(graph: &'g DefinitionGraph, config: &GenerationConfig) -> Self {
        Self {
            graph,
            config: config.clone(),
            seed: config.seed.unwrap_or_else(rand::random),
            cancellation: Cancellation::new(),
        }
    }

    /// Stop at the next utterance boundary once `cancellation` trips
    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Run seed
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Resolve strategy, target and split for an intent
    pub fn plan(&self, intent: &str, request: &GenerationRequest) -> Result<IntentPlan> {
        let id = self.graph.intent(intent).ok_or_else(|| Error::UnknownIntent {
            name: intent.to_string(),
        })?;
        let node = self.graph.node(id);

        // ('training': 'N', 'testing': 'M') on the intent overrides the run
        let count = |key: &str| node.arg(key).and_then(|v| v.trim().parse::<usize>().ok());
        let (shape, fixed_test) = match (count("training"), count("testing")) {
            (None, None) => (request.shape, None),
            (training, testing) => {
                let testing = testing.unwrap_or(0);
                (Request::Samples(training.unwrap_or(0) + testing), Some(testing))
            }
        };

        let paths = node.cardinality();
        let ceiling = self.config.exhaustive_ceiling;
        let (strategy, target, requested) = match shape {
            Request::All => match paths.finite().filter(|n| *n <= u128::from(ceiling)) {
                Some(n) => {
                    let n = n as u64;
                    (Strategy::Exhaustive { paths: n }, to_usize(n), None)
                }
                None => {
                    let draws = to_usize(ceiling);
                    (Strategy::Sampled { draws }, draws, None)
                }
            },
            Request::Samples(n) => match paths.finite().filter(|p| *p <= n as u128) {
                Some(p) => (Strategy::Exhaustive { paths: p as u64 }, n, Some(n)),
                None => (Strategy::Sampled { draws: n }, n, Some(n)),
            },
        };

        let expected = match strategy {
            Strategy::Exhaustive { paths } => target.min(to_usize(paths)),
            Strategy::Sampled { draws } => draws,
        };
        let partition = match (fixed_test, request.test_fraction) {
            (Some(test), _) => PartitionPlan::fixed(expected, test),
            (None, Some(fraction)) => PartitionPlan::from_fraction(expected, fraction),
            (None, None) => PartitionPlan::none(expected),
        };

        tracing::debug!(
            intent,
            cardinality = %paths,
            ?strategy,
            target,
            test = partition.test(),
            "planned intent"
        );

        Ok(IntentPlan {
            intent: id,
            name: intent.to_string(),
            strategy,
            target,
            requested,
            partition,
            seed: intent_seed(self.seed, intent),
        })
    }

    /// Plans for every intent in declaration order
    pub fn plans(&self, request: &GenerationRequest) -> Result<Vec<IntentPlan>> {
        self.graph
            .intents()
            .map(|id| self.plan(&self.graph.node(id).key().name, request))
            .collect()
    }

    /// Lazily produce the unique utterances of a plan.
    ///
    /// The split is sized from the unique utterances the plan can actually
    /// reach: both sources are deterministic, so when a test share is
    /// reserved a dry pass counts them before the real one starts.
    pub fn stream(&self, plan: &IntentPlan) -> UtteranceStream<'g> {
        let mut partition = plan.partition;
        if partition.test() > 0 {
            let unique = self.stream_with(plan, PartitionPlan::none(plan.target)).count();
            if unique < partition.total() {
                partition = partition.resize(unique);
                tracing::debug!(
                    intent = %plan.name,
                    unique,
                    test = partition.test(),
                    "resized split to unique utterances"
                );
            }
        }
        self.stream_with(plan, partition)
    }

    fn stream_with(&self, plan: &IntentPlan, partition: PartitionPlan) -> UtteranceStream<'g> {
        let source = match plan.strategy {
            Strategy::Exhaustive { .. } => Source::Exhaustive(Enumeration::new(self.graph, plan.intent)),
            Strategy::Sampled { .. } => Source::Sampled(Sampler::new(
                self.graph,
                StdRng::seed_from_u64(plan.seed),
                self.config.optional_probability,
                self.config.max_depth,
            )),
        };
        UtteranceStream {
            source,
            root: plan.intent,
            seen: HashSet::new(),
            produced: 0,
            target: plan.target,
            attempts: 0,
            max_attempts: self.config.attempts_per_example.saturating_mul(plan.target),
            partition,
            cancellation: self.cancellation.clone(),
            cancelled: false,
        }
    }

    /// Generate one intent into `sink`
    pub fn generate_intent<S: Sink + ?Sized>(&self, plan: &IntentPlan, sink: &mut S) -> Result<IntentSummary> {
        let mut stream = self.stream(plan);
        let mut emitter = Emitter::new(&plan.name, self.config.batch_size, sink.supports_incremental());
        let (mut training, mut testing) = (0, 0);

        for (partition, utterance) in stream.by_ref() {
            match partition {
                Partition::Training => training += 1,
                Partition::Testing => testing += 1,
            }
            emitter.push(sink, partition, utterance)?;
        }
        emitter.finish(sink)?;

        let cancelled = stream.was_cancelled();
        let mut warnings = Vec::new();
        if let Some(requested) = plan.requested {
            let produced = training + testing;
            if !cancelled && produced < requested {
                let warning = Warning::InsufficientUniqueExamples {
                    intent: plan.name.clone(),
                    requested,
                    produced,
                };
                tracing::warn!("{}", warning);
                warnings.push(warning);
            }
        }
        if cancelled {
            tracing::warn!(intent = %plan.name, produced = training + testing, "generation cancelled");
        }

        Ok(IntentSummary {
            intent: plan.name.clone(),
            strategy: plan.strategy,
            training,
            testing,
            warnings,
            cancelled,
        })
    }

    /// Generate every intent, in declaration order, into `sink`
    pub fn run<S: Sink + ?Sized>(&self, request: &GenerationRequest, sink: &mut S) -> Result<RunSummary> {
        let plans = self.plans(request)?;
        tracing::info!(intents = plans.len(), seed = self.seed, "generating");

        let mut summary = RunSummary {
            seed: self.seed,
            ..Default::default()
        };
        for plan in &plans {
            let intent = self.generate_intent(plan, sink)?;
            let cancelled = intent.cancelled;
            summary.intents.push(intent);
            if cancelled {
                summary.cancelled = true;
                break;
            }
        }

        tracing::info!(
            training = summary.training_total(),
            testing = summary.testing_total(),
            "generation finished"
        );
        Ok(summary)
    }
}

fn to_usize(n: u64) -> usize {
    usize::try_from(n).unwrap_or(usize::MAX)
}

enum Source<'g> {
    Exhaustive(Enumeration<'g>),
    Sampled(Sampler<'g>),
}

/// Iterator over the unique utterances of one intent, tagged with their
/// partition
pub struct UtteranceStream<'g> {
    source: Source<'g>,
    root: DefId,
    seen: HashSet<String>,
    produced: usize,
    target: usize,
    attempts: usize,
    max_attempts: usize,
    partition: PartitionPlan,
    cancellation: Cancellation,
    cancelled: bool,
}

impl UtteranceStream<'_> {
    /// Unique utterances yielded so far
    pub fn produced(&self) -> usize {
        self.produced
    }

    /// Whether the stream stopped because of cancellation
    pub fn was_cancelled(&self) -> bool {
        self.cancelled
    }
}

impl Iterator for UtteranceStream<'_> {
    type Item = (Partition, Utterance);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.produced >= self.target || self.cancelled {
                return None;
            }
            if self.cancellation.is_cancelled() {
                self.cancelled = true;
                return None;
            }

            let utterance = match &mut self.source {
                Source::Exhaustive(enumeration) => enumeration.next()?,
                Source::Sampled(sampler) => {
                    if self.attempts >= self.max_attempts {
                        return None;
                    }
                    self.attempts += 1;
                    sampler.sample(self.root)
                }
            };

            if !self.seen.insert(utterance.text()) {
                continue;
            }
            let partition = self.partition.assign(self.produced);
            self.produced += 1;
            return Some((partition, utterance));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile;
    use crate::emitter::{Batch, Dataset, SinkError};
    use crate::token::Token;

    const FLIGHTS: &str = "\
%[book]
    ~[please?] book a @[city]
    fly to @[city] ?[tomorrow]

~[please]
    please
    kindly

@[city]
    paris
    rome
    ~[nyc]

~[nyc]
    new york
    nyc
";

    fn graph(source: &str) -> DefinitionGraph {
        compile(source, &GenerationConfig::default()).unwrap()
    }

    fn seeded(seed: u64) -> GenerationConfig {
        GenerationConfig {
            seed: Some(seed),
            ..Default::default()
        }
    }

    fn texts(utterances: &[Utterance]) -> Vec<String> {
        utterances.iter().map(Utterance::text).collect()
    }

    #[test]
    fn test_entity_resolution() {
        let graph = graph("%[a]\n    book a @[city]\n\n@[city]\n    paris\n    rome\n");
        let mut dataset = Dataset::default();
        Generator::new(&graph, &seeded(1))
            .run(&GenerationRequest::all(), &mut dataset)
            .unwrap();

        let training = &dataset.intent("a").unwrap().training;
        assert_eq!(texts(training), vec!["book a paris", "book a rome"]);
        assert_eq!(
            training[0].tokens(),
            &[
                Token::word("book"),
                Token::word("a"),
                Token::entity("city", "paris", None)
            ]
        );
    }

    #[test]
    fn test_optional_element_yields_empty_utterance() {
        let graph = graph("%[a]\n    ?[hello]\n");
        let mut dataset = Dataset::default();
        let summary = Generator::new(&graph, &seeded(1))
            .run(&GenerationRequest::all(), &mut dataset)
            .unwrap();

        assert_eq!(summary.training_total(), 2);
        let training = &dataset.intent("a").unwrap().training;
        assert_eq!(texts(training), vec!["hello", ""]);
        assert!(training[1].is_empty());
    }

    #[test]
    fn test_exhaustive_completeness() {
        let graph = graph(FLIGHTS);
        let book = graph.intent("book").unwrap();
        let paths = graph.cardinality(book).finite().unwrap();
        // (2 + absent) x 4 cities + 4 cities x 2
        assert_eq!(paths, 3 * 4 + 4 * 2);

        let mut dataset = Dataset::default();
        Generator::new(&graph, &seeded(1))
            .run(&GenerationRequest::all(), &mut dataset)
            .unwrap();
        let produced = texts(&dataset.intent("book").unwrap().training);
        assert_eq!(produced.len(), 20);
        assert_eq!(produced[0], "please book a paris");
        assert_eq!(produced[19], "fly to nyc");
    }

    #[test]
    fn test_no_duplicates_when_paths_collide() {
        let graph = graph("%[a]\n    hi ?[there]\n    hi there\n    hi\n");
        let mut dataset = Dataset::default();
        let summary = Generator::new(&graph, &seeded(1))
            .run(&GenerationRequest::all(), &mut dataset)
            .unwrap();
        assert_eq!(summary.training_total(), 2);
        assert_eq!(texts(&dataset.intent("a").unwrap().training), vec!["hi there", "hi"]);
    }

    #[test]
    fn test_sampled_output_is_unique_and_deterministic() {
        let config = GenerationConfig {
            exhaustive_ceiling: 5,
            ..seeded(42)
        };
        let graph = compile(FLIGHTS, &config).unwrap();
        let request = GenerationRequest::samples(12).with_test_fraction(0.25);

        let collect = || {
            let mut dataset = Dataset::default();
            let summary = Generator::new(&graph, &config).run(&request, &mut dataset).unwrap();
            (summary, dataset)
        };
        let (first_summary, first) = collect();
        let (_, second) = collect();

        let book = first.intent("book").unwrap();
        assert_eq!(book, second.intent("book").unwrap());
        assert_eq!(first_summary.intents[0].strategy, Strategy::Sampled { draws: 12 });
        assert_eq!((book.training.len(), book.testing.len()), (9, 3));

        let mut all: Vec<String> = texts(&book.training);
        all.extend(texts(&book.testing));
        let unique: HashSet<&String> = all.iter().collect();
        assert_eq!(unique.len(), all.len());
    }

    #[test]
    fn test_samples_request_above_space_uses_exhaustive_and_warns() {
        let graph = graph("%[a]\n    yes\n    no\n");
        let mut dataset = Dataset::default();
        let summary = Generator::new(&graph, &seeded(1))
            .run(&GenerationRequest::samples(5), &mut dataset)
            .unwrap();

        let intent = &summary.intents[0];
        assert_eq!(intent.strategy, Strategy::Exhaustive { paths: 2 });
        assert_eq!(intent.training, 2);
        assert_eq!(
            summary.warnings().collect::<Vec<_>>(),
            vec![&Warning::InsufficientUniqueExamples {
                intent: "a".to_string(),
                requested: 5,
                produced: 2,
            }]
        );
    }

    #[test]
    fn test_sampled_shortfall_warns() {
        // Unbounded, but every draw flattens to the same text.
        let graph = graph("%[a]\n    x ~[loop?]\n\n~[loop]\n    ~[loop?]\n");
        let config = GenerationConfig {
            attempts_per_example: 3,
            ..seeded(9)
        };
        let mut dataset = Dataset::default();
        let summary = Generator::new(&graph, &config)
            .run(&GenerationRequest::samples(10), &mut dataset)
            .unwrap();

        assert_eq!(summary.intents[0].strategy, Strategy::Sampled { draws: 10 });
        assert_eq!(summary.training_total(), 1);
        assert_eq!(summary.warnings().count(), 1);
    }

    #[test]
    fn test_disjoint_split() {
        let graph = graph(FLIGHTS);
        let mut dataset = Dataset::default();
        let summary = Generator::new(&graph, &seeded(3))
            .run(&GenerationRequest::all().with_test_fraction(0.2), &mut dataset)
            .unwrap();

        assert_eq!((summary.training_total(), summary.testing_total()), (16, 4));
        let book = dataset.intent("book").unwrap();
        let training: HashSet<String> = texts(&book.training).into_iter().collect();
        assert!(texts(&book.testing).iter().all(|t| !training.contains(t)));
    }

    #[test]
    fn test_split_sized_from_unique_paths() {
        // 4 paths collapse into 2 distinct utterances
        let graph = graph("%[a]\n    hi ?[there]\n    hi there\n    hi\n");
        let mut dataset = Dataset::default();
        let summary = Generator::new(&graph, &seeded(1))
            .run(&GenerationRequest::all().with_test_fraction(0.3), &mut dataset)
            .unwrap();

        assert_eq!((summary.training_total(), summary.testing_total()), (1, 1));
        let a = dataset.intent("a").unwrap();
        assert_eq!(texts(&a.training), vec!["hi there"]);
        assert_eq!(texts(&a.testing), vec!["hi"]);
    }

    #[test]
    fn test_split_sized_from_sampled_shortfall() {
        // Unbounded, but only two distinct texts exist
        let graph = graph("%[a]\n    ~[word] ~[loop?]\n\n~[word]\n    yes\n    no\n\n~[loop]\n    ~[loop?]\n");
        let mut dataset = Dataset::default();
        let summary = Generator::new(&graph, &seeded(9))
            .run(&GenerationRequest::samples(10).with_test_fraction(0.5), &mut dataset)
            .unwrap();

        assert_eq!(summary.intents[0].strategy, Strategy::Sampled { draws: 10 });
        assert_eq!((summary.training_total(), summary.testing_total()), (1, 1));
        assert_eq!(summary.warnings().count(), 1);
    }

    #[test]
    fn test_intent_arguments_override_request() {
        let graph = graph("%[a]('training': '3', 'testing': '1')\n    ~[n] ~[n]\n\n~[n]\n    one\n    two\n    three\n");
        let mut dataset = Dataset::default();
        let summary = Generator::new(&graph, &seeded(5))
            .run(&GenerationRequest::all(), &mut dataset)
            .unwrap();

        let intent = &summary.intents[0];
        assert_eq!((intent.training, intent.testing), (3, 1));
        assert!(summary.warnings().next().is_none());
    }

    #[test]
    fn test_unknown_intent() {
        let graph = graph("%[a]\n    x\n");
        let err = Generator::new(&graph, &seeded(1))
            .plan("b", &GenerationRequest::all())
            .unwrap_err();
        assert!(matches!(err, Error::UnknownIntent { ref name } if name == "b"));
    }

    #[test]
    fn test_cancellation_keeps_partial_output() {
        let graph = graph("%[a]\n    one\n    two\n    three\n");
        let cancellation = Cancellation::new();
        let generator = Generator::new(&graph, &seeded(1)).with_cancellation(cancellation.clone());

        let mut seen = Vec::new();
        let mut sink = |batch: Batch<'_>| -> std::result::Result<(), SinkError> {
            seen.extend(batch.utterances.iter().map(Utterance::text));
            cancellation.cancel();
            Ok(())
        };
        let summary = generator.run(&GenerationRequest::all(), &mut sink).unwrap();

        assert!(summary.cancelled());
        assert_eq!(seen, vec!["one"]);
        assert!(matches!(
            summary.ensure_complete(),
            Err(Error::Cancelled { produced: 1 })
        ));
    }

    #[test]
    fn test_sink_error_aborts_run() {
        let graph = graph("%[a]\n    one\n");
        let mut sink = |_: Batch<'_>| -> std::result::Result<(), SinkError> {
            Err(std::io::Error::other("closed pipe").into())
        };
        let err = Generator::new(&graph, &seeded(1))
            .run(&GenerationRequest::all(), &mut sink)
            .unwrap_err();
        assert_eq!(err.to_string(), "closed pipe");
    }

    #[test]
    fn test_intent_seed_depends_on_name() {
        assert_eq!(intent_seed(1, "a"), intent_seed(1, "a"));
        assert_ne!(intent_seed(1, "a"), intent_seed(1, "b"));
        assert_ne!(intent_seed(1, "a"), intent_seed(2, "a"));
    }
}
