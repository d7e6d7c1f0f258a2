//! Generate training data command

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use phrasal_core::{Cancellation, IntentSummary, Warning};
use phrasal_runtime::{IntentFailure, NdjsonWriter, Runtime};

/// Command line overrides for a generation run
#[derive(Debug, Default)]
pub struct Options {
    /// Output directory
    pub out: Option<String>,
    /// Utterances per intent
    pub samples: Option<usize>,
    /// Fraction reserved for testing
    pub test_fraction: Option<f64>,
    /// Run seed
    pub seed: Option<u64>,
    /// Concurrent intents
    pub workers: Option<usize>,
    /// Deadline in seconds
    pub timeout_secs: Option<u64>,
}

/// Written next to the generated files
#[derive(Serialize)]
struct Manifest<'a> {
    grammar: String,
    content_hash: &'a str,
    seed: u64,
    cancelled: bool,
    intents: &'a [IntentSummary],
    warnings: Vec<&'a Warning>,
    failures: &'a [IntentFailure],
}

/// Run the generate command
pub async fn run(config_path: Option<&str>, grammar: &str, options: Options) -> Result<()> {
    let (grammar_path, grammar_dir) = super::grammar_path(grammar)?;
    let mut config = super::load_config(config_path, &grammar_dir)?;

    if let Some(samples) = options.samples {
        config.generation.samples = Some(samples);
    }
    if let Some(fraction) = options.test_fraction {
        config.generation.test_fraction = Some(fraction);
    }
    if let Some(seed) = options.seed {
        config.generation.seed = Some(seed);
    }
    if let Some(workers) = options.workers {
        config.runtime.workers = workers;
    }

    let graph = Arc::new(super::compile(&grammar_path, &config.generation)?);
    let out_dir = output_dir(&grammar_path, &grammar_dir, options.out.as_deref(), config.output_dir.as_deref());
    tracing::info!("Generating {} into {}", grammar_path.display(), out_dir.display());

    let cancellation = match options.timeout_secs {
        Some(secs) => Cancellation::with_timeout(Duration::from_secs(secs)),
        None => Cancellation::new(),
    };
    let runtime = Runtime::from_config(&config).with_cancellation(cancellation);
    let request = config.generation.request();

    let mut writer = NdjsonWriter::new(&out_dir);
    let report = runtime.run(Arc::clone(&graph), &request, &mut writer).await?;

    for intent in &report.summary.intents {
        tracing::info!(
            "✓ {}: {} training, {} testing",
            intent.intent,
            intent.training,
            intent.testing
        );
    }

    std::fs::create_dir_all(&out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;
    let manifest = Manifest {
        grammar: grammar_path.display().to_string(),
        content_hash: graph.content_hash(),
        seed: report.summary.seed,
        cancelled: report.summary.cancelled,
        intents: &report.summary.intents,
        warnings: report.summary.warnings().collect(),
        failures: &report.failures,
    };
    let manifest_path = out_dir.join("manifest.json");
    std::fs::write(&manifest_path, serde_json::to_string_pretty(&manifest)?)
        .with_context(|| format!("Failed to write {}", manifest_path.display()))?;

    if !report.failures.is_empty() {
        anyhow::bail!("{} intent(s) failed", report.failures.len());
    }
    report.summary.ensure_complete()?;

    tracing::info!("✓ Wrote {} utterances to {}", writer.lines(), out_dir.display());
    Ok(())
}

/// `--out`, then the configured directory, then `<grammar dir>/<grammar name>`
fn output_dir(grammar: &Path, grammar_dir: &Path, out: Option<&str>, configured: Option<&str>) -> PathBuf {
    if let Some(out) = out {
        return PathBuf::from(out);
    }
    if let Some(configured) = configured {
        return grammar_dir.join(configured);
    }
    let stem = grammar
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    grammar_dir.join(stem)
}
