//! Token emission
//!
//! Generated utterances reach the caller through a [`Sink`]. The emitter
//! groups them into [`Batch`]es of `batch_size` utterances per partition;
//! sinks that cannot consume incrementally get one batch per partition when
//! the intent is finished.

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::partition::Partition;
use crate::token::Utterance;

/// Error type returned by sinks
pub type SinkError = Box<dyn std::error::Error + Send + Sync>;

/// An ordered group of utterances handed to a sink in one call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Batch<'a> {
    /// Intent the utterances belong to
    pub intent: &'a str,
    /// Position of this batch among the intent's batches
    pub index: usize,
    /// Training or testing
    pub partition: Partition,
    /// Utterances in generation order
    pub utterances: &'a [Utterance],
}

/// A [`Batch`] that owns its data, for crossing thread boundaries
#[derive(Debug, Clone, PartialEq)]
pub struct OwnedBatch {
    /// Intent the utterances belong to
    pub intent: String,
    /// Position of this batch among the intent's batches
    pub index: usize,
    /// Training or testing
    pub partition: Partition,
    /// Utterances in generation order
    pub utterances: Vec<Utterance>,
}

impl From<Batch<'_>> for OwnedBatch {
    fn from(batch: Batch<'_>) -> Self {
        Self {
            intent: batch.intent.to_string(),
            index: batch.index,
            partition: batch.partition,
            utterances: batch.utterances.to_vec(),
        }
    }
}

impl OwnedBatch {
    /// Borrow as a [`Batch`]
    pub fn as_batch(&self) -> Batch<'_> {
        Batch {
            intent: &self.intent,
            index: self.index,
            partition: self.partition,
            utterances: &self.utterances,
        }
    }
}

/// Receiver of generated utterances
///
/// Closures of the right shape are sinks:
///
/// ```rust
/// use phrasal_core::{Batch, Sink, SinkError};
///
/// let mut seen = 0;
/// let mut sink = |batch: Batch<'_>| -> Result<(), SinkError> {
///     seen += batch.utterances.len();
///     Ok(())
/// };
/// assert!(sink.supports_incremental());
/// ```
pub trait Sink {
    /// Consume one batch. An error aborts the intent being generated.
    fn accept(&mut self, batch: Batch<'_>) -> std::result::Result<(), SinkError>;

    /// Whether batches may be delivered while generation is still running
    fn supports_incremental(&self) -> bool {
        true
    }
}

impl<F> Sink for F
where
    F: FnMut(Batch<'_>) -> std::result::Result<(), SinkError>,
{
    fn accept(&mut self, batch: Batch<'_>) -> std::result::Result<(), SinkError> {
        self(batch)
    }
}

/// Utterances of one intent, split by partition
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntentDataset {
    /// Training utterances in generation order
    pub training: Vec<Utterance>,
    /// Test utterances in generation order
    pub testing: Vec<Utterance>,
}

impl IntentDataset {
    /// Utterances of one partition
    pub fn partition(&self, partition: Partition) -> &[Utterance] {
        match partition {
            Partition::Training => &self.training,
            Partition::Testing => &self.testing,
        }
    }
}

/// In-memory sink collecting everything per intent
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    intents: BTreeMap<String, IntentDataset>,
}

impl Dataset {
    /// Collected utterances of an intent
    pub fn intent(&self, name: &str) -> Option<&IntentDataset> {
        self.intents.get(name)
    }

    /// Intents with at least one utterance, by name
    pub fn intents(&self) -> impl Iterator<Item = (&str, &IntentDataset)> {
        self.intents.iter().map(|(name, data)| (name.as_str(), data))
    }

    /// Total number of collected utterances
    pub fn len(&self) -> usize {
        self.intents
            .values()
            .map(|d| d.training.len() + d.testing.len())
            .sum()
    }

    /// Whether nothing was collected
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Sink for Dataset {
    fn accept(&mut self, batch: Batch<'_>) -> std::result::Result<(), SinkError> {
        let entry = self.intents.entry(batch.intent.to_string()).or_default();
        let target = match batch.partition {
            Partition::Training => &mut entry.training,
            Partition::Testing => &mut entry.testing,
        };
        target.extend_from_slice(batch.utterances);
        Ok(())
    }
}

/// Per-intent batching state
pub(crate) struct Emitter {
    intent: String,
    batch_size: usize,
    incremental: bool,
    training: Vec<Utterance>,
    testing: Vec<Utterance>,
    next_index: usize,
}

impl Emitter {
    pub(crate) fn new(intent: &str, batch_size: usize, incremental: bool) -> Self {
        Self {
            intent: intent.to_string(),
            batch_size: batch_size.max(1),
            incremental,
            training: Vec::new(),
            testing: Vec::new(),
            next_index: 0,
        }
    }

    pub(crate) fn push<S: Sink + ?Sized>(
        &mut self,
        sink: &mut S,
        partition: Partition,
        utterance: Utterance,
    ) -> Result<()> {
        let batch_size = self.batch_size;
        let buffer = self.buffer(partition);
        buffer.push(utterance);
        let full = buffer.len() >= batch_size;
        if self.incremental && full {
            self.flush(sink, partition)?;
        }
        Ok(())
    }

    /// Deliver whatever is still buffered, training first
    pub(crate) fn finish<S: Sink + ?Sized>(&mut self, sink: &mut S) -> Result<()> {
        self.flush(sink, Partition::Training)?;
        self.flush(sink, Partition::Testing)
    }

    fn buffer(&mut self, partition: Partition) -> &mut Vec<Utterance> {
        match partition {
            Partition::Training => &mut self.training,
            Partition::Testing => &mut self.testing,
        }
    }

    fn flush<S: Sink + ?Sized>(&mut self, sink: &mut S, partition: Partition) -> Result<()> {
        let utterances = std::mem::take(self.buffer(partition));
        if utterances.is_empty() {
            return Ok(());
        }
        let index = self.next_index;
        self.next_index += 1;
        sink.accept(Batch {
            intent: &self.intent,
            index,
            partition,
            utterances: &utterances,
        })
        .map_err(Error::Sink)
    }
}
