//! Train/test partitioning
//!
//! A [`PartitionPlan`] decides, for the k-th unique utterance of an intent,
//! which set it belongs to. Test examples are spread at an even stride over
//! the output instead of being taken from its tail, so exhaustive
//! enumerations (which follow declaration order) test every region of the
//! grammar.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Destination set of an utterance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Partition {
    /// Training set
    Training,
    /// Test set
    Testing,
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Partition::Training => f.write_str("training"),
            Partition::Testing => f.write_str("testing"),
        }
    }
}

/// Reserves `test` of `total` expected utterances for testing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionPlan {
    total: usize,
    test: usize,
}

impl PartitionPlan {
    /// Everything goes to training
    pub fn none(total: usize) -> Self {
        Self { total, test: 0 }
    }

    /// Reserve a fraction of `total`, rounded to the nearest utterance
    pub fn from_fraction(total: usize, fraction: f64) -> Self {
        let test = (total as f64 * fraction.clamp(0.0, 1.0)).round() as usize;
        Self::fixed(total, test)
    }

    /// Reserve exactly `test` utterances (capped at `total`)
    pub fn fixed(total: usize, test: usize) -> Self {
        Self {
            total,
            test: test.min(total),
        }
    }

    /// Re-plan for the `unique` utterances actually available, keeping the
    /// test share (rounded half up). A plan already within `unique` is
    /// returned unchanged.
    pub fn resize(&self, unique: usize) -> Self {
        if unique >= self.total {
            return *self;
        }
        let (test, total, unique_wide) = (self.test as u128, self.total as u128, unique as u128);
        let test = (2 * test * unique_wide + total) / (2 * total);
        Self::fixed(unique, test as usize)
    }

    /// Expected number of utterances
    pub fn total(&self) -> usize {
        self.total
    }

    /// Utterances reserved for testing
    pub fn test(&self) -> usize {
        self.test
    }

    /// Partition of the k-th (zero-based) unique utterance
    pub fn assign(&self, k: usize) -> Partition {
        if self.test == 0 || k >= self.total {
            return Partition::Training;
        }
        let (k, test, total) = (k as u128, self.test as u128, self.total as u128);
        if (k + 1) * test / total > k * test / total {
            Partition::Testing
        } else {
            Partition::Training
        }
    }
}
