//! Per-intent jobs for blocking workers

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use phrasal_core::{
    Batch, Cancellation, DefinitionGraph, GenerationConfig, Generator, IntentPlan, IntentSummary,
    OwnedBatch, Sink, SinkError,
};

/// Job to generate a single intent
#[derive(Debug, Clone)]
pub struct IntentJob {
    /// Resolved plan for the intent
    pub plan: IntentPlan,
}

impl IntentJob {
    /// Create a new intent job
    pub fn new(plan: IntentPlan) -> Self {
        Self { plan }
    }

    /// Intent name
    pub fn intent(&self) -> &str {
        &self.plan.name
    }

    /// Generate the intent, forwarding every batch into `tx`.
    ///
    /// Blocks the calling thread whenever the channel is full; run it on a
    /// blocking worker.
    pub fn execute(
        &self,
        graph: &DefinitionGraph,
        config: &GenerationConfig,
        cancellation: Cancellation,
        tx: mpsc::Sender<OwnedBatch>,
    ) -> phrasal_core::Result<IntentSummary> {
        tracing::debug!(intent = %self.intent(), "worker started");
        let generator = Generator::new(graph, config).with_cancellation(cancellation);
        let mut sink = ChannelSink { tx };
        generator.generate_intent(&self.plan, &mut sink)
    }
}

/// Forwards batches to the async side of the runtime
struct ChannelSink {
    tx: mpsc::Sender<OwnedBatch>,
}

impl Sink for ChannelSink {
    fn accept(&mut self, batch: Batch<'_>) -> Result<(), SinkError> {
        self.tx
            .blocking_send(batch.into())
            .map_err(|_| "output channel closed".into())
    }
}

/// An intent that failed without stopping the rest of the run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentFailure {
    /// Intent name
    pub intent: String,

    /// Error message
    pub error: String,
}
