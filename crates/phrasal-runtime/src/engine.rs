//! Parallel generation engine

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{Semaphore, mpsc};

use phrasal_core::{
    Cancellation, DefinitionGraph, GenerationConfig, GenerationRequest, Generator, IntentSummary,
    OwnedBatch, ProjectConfig, RunSummary, RuntimeConfig,
};

use crate::error::Result;
use crate::jobs::{IntentFailure, IntentJob};
use crate::writer::BatchSink;

/// Outcome of a parallel run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Summaries of the intents that finished, in declaration order
    pub summary: RunSummary,

    /// Intents that failed
    pub failures: Vec<IntentFailure>,
}

impl RunReport {
    /// Whether every intent finished without error or cancellation
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && !self.summary.cancelled
    }
}

/// Runtime engine generating intents on blocking workers
pub struct Runtime {
    generation: GenerationConfig,
    runtime: RuntimeConfig,
    cancellation: Cancellation,
}

impl Runtime {
    /// Create a new runtime with the given configuration
    pub fn new(generation: GenerationConfig, runtime: RuntimeConfig) -> Self {
        Self {
            generation,
            runtime,
            cancellation: Cancellation::new(),
        }
    }

    /// Create a runtime from a loaded project configuration
    pub fn from_config(config: &ProjectConfig) -> Self {
        Self::new(config.generation.clone(), config.runtime.clone())
    }

    /// Share `cancellation` with every worker
    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Handle that stops the run at the next utterance boundary
    pub fn cancellation(&self) -> &Cancellation {
        &self.cancellation
    }

    /// Generate every intent of `graph` into `sink`.
    ///
    /// Intents run concurrently (at most `workers` at a time) and their
    /// batches reach `sink` in order per intent. A failing intent is
    /// recorded in the report without stopping the others; a failing sink
    /// cancels the run and is returned as an error.
    pub async fn run<S: BatchSink + ?Sized>(
        &self,
        graph: Arc<DefinitionGraph>,
        request: &GenerationRequest,
        sink: &mut S,
    ) -> Result<RunReport> {
        self.runtime.validate()?;

        // Pin the run seed so every worker derives the same per-intent seeds
        let mut generation = self.generation.clone();
        let plans = {
            let generator = Generator::new(&graph, &generation);
            generation.seed = Some(generator.seed());
            generator.plans(request)?
        };
        let seed = generation.seed.unwrap_or_default();

        tracing::info!(
            intents = plans.len(),
            workers = self.runtime.workers,
            seed,
            "Starting generation"
        );

        let semaphore = Arc::new(Semaphore::new(self.runtime.workers));
        let (tx, mut rx) = mpsc::channel::<OwnedBatch>(self.runtime.channel_capacity);

        let mut names = Vec::with_capacity(plans.len());
        let mut handles = Vec::with_capacity(plans.len());
        for plan in plans {
            let job = IntentJob::new(plan);
            names.push(job.intent().to_string());

            let graph = Arc::clone(&graph);
            let generation = generation.clone();
            let cancellation = self.cancellation.clone();
            let semaphore = Arc::clone(&semaphore);
            let tx = tx.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await?;
                let summary = tokio::task::spawn_blocking(move || {
                    job.execute(&graph, &generation, cancellation, tx)
                })
                .await??;
                Ok::<IntentSummary, anyhow::Error>(summary)
            }));
        }
        drop(tx);

        let mut sink_error = None;
        while let Some(batch) = rx.recv().await {
            if sink_error.is_some() {
                // Keep draining so blocked workers can observe cancellation
                continue;
            }
            if let Err(e) = sink.accept(batch).await {
                self.cancellation.cancel();
                sink_error = Some(e);
            }
        }

        let mut report = RunReport {
            summary: RunSummary {
                seed,
                ..Default::default()
            },
            failures: Vec::new(),
        };
        for (intent, joined) in names.into_iter().zip(futures::future::join_all(handles).await) {
            match joined.map_err(anyhow::Error::from).and_then(|r| r) {
                Ok(summary) => {
                    report.summary.cancelled |= summary.cancelled;
                    report.summary.intents.push(summary);
                }
                Err(e) => {
                    tracing::error!(intent = %intent, "Intent failed: {:#}", e);
                    report.failures.push(IntentFailure {
                        intent,
                        error: format!("{:#}", e),
                    });
                }
            }
        }

        if let Some(e) = sink_error {
            return Err(e.context("Output sink rejected a batch"));
        }
        sink.close().await.context("Failed to close output sink")?;

        tracing::info!(
            training = report.summary.training_total(),
            testing = report.summary.testing_total(),
            failed = report.failures.len(),
            "Generation complete"
        );
        Ok(report)
    }
}
