//! Integration tests for the grammar-to-utterance pipeline
//!
//! Tests use grammar files on disk to verify:
//! - Parsing and validation through the public API
//! - Seeded reproducibility
//! - Train/test split across intents
//! - Error reporting before any output is produced

use std::collections::HashSet;
use tempfile::TempDir;

use phrasal_core::{
    Batch, Cardinality, Config, Dataset, DefinitionGraph, Error, GenerationConfig,
    GenerationRequest, Generator, Parser, Partition, Sink, SinkError, Token, Utterance,
};

const TRAVEL: &str = "\
// travel assistant
%[book_flight]('training': '20', 'testing': '5')
    ~[polite?] ~[book] a flight to @[city]
    ~[book] @[city] ?[please]

%[greet]
    ~[hi]
    ~[hi] there

~[polite]
    please
    could you

~[book]
    book
    *[20%] reserve
    get me

~[hi]
    hi
    hello

@[city]
    paris
    rome
    ~[nyc]
    ~[sf]

~[nyc]
    new york
    big apple

~[sf]
    san francisco
";

fn write_grammar(source: &str) -> (TempDir, std::path::PathBuf) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("travel.phrasal");
    std::fs::write(&path, source).unwrap();
    (dir, path)
}

fn compile_file(path: &std::path::Path, config: &GenerationConfig) -> DefinitionGraph {
    let grammar = Parser::new().parse_file(path).unwrap();
    DefinitionGraph::build(grammar, config).unwrap()
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

// =============================================================================
// Pipeline Tests
// =============================================================================

#[test]
fn test_file_to_dataset() {
    let (_dir, path) = write_grammar(TRAVEL);
    let config = seeded(17);
    let graph = compile_file(&path, &config);

    let mut dataset = Dataset::default();
    let summary = Generator::new(&graph, &config)
        .run(&GenerationRequest::all(), &mut dataset)
        .unwrap();

    let book = dataset.intent("book_flight").unwrap();
    assert_eq!(book.training.len(), 20);
    assert_eq!(book.testing.len(), 5);

    // greet is small enough to enumerate
    let greet = dataset.intent("greet").unwrap();
    assert_eq!(
        texts(&greet.training),
        vec!["hi", "hello", "hi there", "hello there"]
    );
    assert!(greet.testing.is_empty());

    assert_eq!(summary.training_total(), 24);
    assert_eq!(summary.testing_total(), 5);
    assert!(summary.warnings().next().is_none());
    assert!(!summary.cancelled());
}

#[test]
fn test_entities_carry_synonyms() {
    let (_dir, path) = write_grammar(TRAVEL);
    let config = seeded(3);
    let graph = compile_file(&path, &config);

    let mut dataset = Dataset::default();
    Generator::new(&graph, &config)
        .run(&GenerationRequest::all(), &mut dataset)
        .unwrap();

    let book = dataset.intent("book_flight").unwrap();
    for utterance in book.training.iter().chain(&book.testing) {
        let entities: Vec<&Token> = utterance.entities().collect();
        assert_eq!(entities.len(), 1, "{}", utterance);
        match entities[0] {
            Token::Entity {
                slot,
                value,
                synonym,
            } => {
                assert_eq!(slot, "city");
                match value.as_str() {
                    "paris" | "rome" => assert!(synonym.is_none()),
                    "new york" | "big apple" => assert_eq!(synonym.as_deref(), Some("nyc")),
                    "san francisco" => assert_eq!(synonym.as_deref(), Some("sf")),
                    other => panic!("Unexpected city '{}'", other),
                }
            }
            other => panic!("Expected entity, got {:?}", other),
        }
    }
}

#[test]
fn test_same_seed_same_output() {
    let (_dir, path) = write_grammar(TRAVEL);
    let config = seeded(99);
    let graph = compile_file(&path, &config);
    let request = GenerationRequest::samples(30).with_test_fraction(0.1);

    let run = || {
        let mut dataset = Dataset::default();
        Generator::new(&graph, &config).run(&request, &mut dataset).unwrap();
        dataset
    };
    let (first, second) = (run(), run());
    for (name, data) in first.intents() {
        assert_eq!(Some(data), second.intent(name));
    }
}

#[test]
fn test_partitions_are_disjoint() {
    let (_dir, path) = write_grammar(TRAVEL);
    let config = seeded(5);
    let graph = compile_file(&path, &config);

    let mut dataset = Dataset::default();
    Generator::new(&graph, &config)
        .run(&GenerationRequest::all().with_test_fraction(0.5), &mut dataset)
        .unwrap();

    for (_, data) in dataset.intents() {
        let training: HashSet<String> = texts(&data.training).into_iter().collect();
        for text in texts(&data.testing) {
            assert!(!training.contains(&text), "'{}' in both partitions", text);
        }
    }
}

#[test]
fn test_cardinality_through_public_api() {
    let (_dir, path) = write_grammar(TRAVEL);
    let graph = compile_file(&path, &GenerationConfig::default());

    let greet = graph.intent("greet").unwrap();
    assert_eq!(graph.cardinality(greet), Cardinality::Finite(4));
    // (2 polite + absent) x 3 verbs x 5 cities + 3 verbs x 5 cities x 2
    let book = graph.intent("book_flight").unwrap();
    assert_eq!(graph.cardinality(book), Cardinality::Finite(45 + 30));
}

// =============================================================================
// Sink Behaviour
// =============================================================================

struct Buffered {
    batches: Vec<(String, Partition, usize)>,
}

impl Sink for Buffered {
    fn accept(&mut self, batch: Batch<'_>) -> Result<(), SinkError> {
        self.batches
            .push((batch.intent.to_string(), batch.partition, batch.utterances.len()));
        Ok(())
    }

    fn supports_incremental(&self) -> bool {
        false
    }
}

#[test]
fn test_non_incremental_sink_receives_whole_partitions() {
    let (_dir, path) = write_grammar(TRAVEL);
    let config = seeded(8);
    let graph = compile_file(&path, &config);

    let mut sink = Buffered { batches: Vec::new() };
    Generator::new(&graph, &config)
        .run(&GenerationRequest::all(), &mut sink)
        .unwrap();

    assert_eq!(
        sink.batches,
        vec![
            ("book_flight".to_string(), Partition::Training, 20),
            ("book_flight".to_string(), Partition::Testing, 5),
            ("greet".to_string(), Partition::Training, 4),
        ]
    );
}

// =============================================================================
// Error Handling
// =============================================================================

#[test]
fn test_syntax_error_reports_location() {
    let (_dir, path) = write_grammar("%[a]\n    hello ~[world\n");
    let err = Parser::new().parse_file(&path).unwrap_err();
    match err {
        Error::Syntax(syntax) => {
            assert_eq!(syntax.line, 2);
            assert!(syntax.column > 1);
        }
        other => panic!("Expected syntax error, got {:?}", other),
    }
}

#[test]
fn test_structural_errors_are_structural() {
    let cases = [
        "%[a]\n    ~[b]\n\n~[b]\n    *[70%] x\n    *[40%] y\n",
        "%[a]\n    ~[b]\n\n~[b]\n    ~[b] x\n",
        "%[a]\n    ~[missing]\n",
    ];
    for source in cases {
        let err = phrasal_core::compile(source, &GenerationConfig::default()).unwrap_err();
        assert!(err.is_structural(), "{} should be structural", err);
    }
}

#[test]
fn test_config_next_to_grammar() {
    let (dir, _path) = write_grammar(TRAVEL);
    std::fs::write(
        dir.path().join("phrasal.yaml"),
        "generation:\n  seed: 1234\n  samples: 3\n",
    )
    .unwrap();

    let config = Config::load_or_default(dir.path()).unwrap();
    let generation = &config.project.generation;
    assert_eq!(generation.seed, Some(1234));

    let graph = compile_file(&dir.path().join("travel.phrasal"), generation);
    let mut dataset = Dataset::default();
    let summary = Generator::new(&graph, generation)
        .run(&generation.request(), &mut dataset)
        .unwrap();

    assert_eq!(summary.seed, 1234);
    // the intent arguments still win for book_flight
    assert_eq!(dataset.intent("book_flight").unwrap().training.len(), 20);
    assert_eq!(dataset.intent("greet").unwrap().training.len(), 3);
}
