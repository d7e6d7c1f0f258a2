//! Output sinks for the async runtime
//!
//! Workers hand [`OwnedBatch`]es to exactly one [`BatchSink`], in order per
//! intent. [`NdjsonWriter`] is the file sink used by the CLI:
//!
//! ```text
//! out/
//! ├── book_flight.ndjson        training, one JSON token array per line
//! ├── book_flight.test.ndjson   testing
//! └── greet.ndjson
//! ```

use anyhow::Context;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use phrasal_core::{Dataset, OwnedBatch, Partition, Sink};

use crate::error::Result;

/// Async receiver of generated batches
#[async_trait]
pub trait BatchSink: Send {
    /// Consume one batch
    async fn accept(&mut self, batch: OwnedBatch) -> Result<()>;

    /// Called once after the last batch of a run
    async fn close(&mut self) -> Result<()>;
}

#[async_trait]
impl BatchSink for Dataset {
    async fn accept(&mut self, batch: OwnedBatch) -> Result<()> {
        Sink::accept(self, batch.as_batch()).map_err(|e| anyhow::anyhow!(e))
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Writes one newline-delimited JSON file per intent and partition
pub struct NdjsonWriter {
    dir: PathBuf,
    writers: BTreeMap<(String, Partition), BufWriter<File>>,
    lines: usize,
}

impl NdjsonWriter {
    /// Create a writer for `dir`. Nothing touches the disk until the first
    /// batch arrives.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            writers: BTreeMap::new(),
            lines: 0,
        }
    }

    /// Output directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File an intent's partition is written to
    pub fn path_for(&self, intent: &str, partition: Partition) -> PathBuf {
        match partition {
            Partition::Training => self.dir.join(format!("{}.ndjson", intent)),
            Partition::Testing => self.dir.join(format!("{}.test.ndjson", intent)),
        }
    }

    /// Files opened so far
    pub fn files(&self) -> Vec<PathBuf> {
        self.writers
            .keys()
            .map(|(intent, partition)| self.path_for(intent, *partition))
            .collect()
    }

    /// Utterances written so far
    pub fn lines(&self) -> usize {
        self.lines
    }

    fn ensure_writer(&mut self, intent: &str, partition: Partition) -> Result<&mut BufWriter<File>> {
        let path = self.path_for(intent, partition);
        match self.writers.entry((intent.to_string(), partition)) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                std::fs::create_dir_all(&self.dir)
                    .with_context(|| format!("Failed to create {}", self.dir.display()))?;
                let file = File::create(&path)
                    .with_context(|| format!("Failed to create {}", path.display()))?;
                tracing::debug!("Writing {}", path.display());
                Ok(entry.insert(BufWriter::new(file)))
            }
        }
    }
}

#[async_trait]
impl BatchSink for NdjsonWriter {
    async fn accept(&mut self, batch: OwnedBatch) -> Result<()> {
        let writer = self.ensure_writer(&batch.intent, batch.partition)?;
        for utterance in &batch.utterances {
            let line = serde_json::to_string(utterance)?;
            writeln!(writer, "{}", line)?;
        }
        self.lines += batch.utterances.len();
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        for writer in self.writers.values_mut() {
            writer.flush()?;
        }
        tracing::debug!(files = self.writers.len(), lines = self.lines, "ndjson output flushed");
        Ok(())
    }
}
