//! Weight resolution
//!
//! Every alternative gets a probability. Explicit `*[w%]` weights convert to
//! `w / 100`; the remaining mass is shared by the unweighted alternatives,
//! evenly by default or in proportion to their expansion counts with
//! `('distribution': 'regular')`.

use std::str::FromStr;

use crate::error::{Error, Result};
use crate::graph::{Cardinality, DefinitionGraph};

const TOLERANCE: f64 = 1e-9;

/// How unweighted alternatives share the remaining probability mass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Distribution {
    /// Equal shares
    #[default]
    Even,
    /// Shares proportional to each alternative's number of expansions
    Regular,
}

impl FromStr for Distribution {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "even" => Ok(Distribution::Even),
            "regular" => Ok(Distribution::Regular),
            other => Err(format!("unknown distribution '{}'", other)),
        }
    }
}

/// Annotate every alternative in the graph with its probability
pub fn resolve(graph: &mut DefinitionGraph, ceiling: u128) -> Result<()> {
    for node in graph.nodes_mut() {
        let distribution = node
            .args
            .get("distribution")
            .and_then(|d| d.parse().ok())
            .unwrap_or_default();
        let weights: Vec<Option<f64>> = node.choices.iter().map(|c| c.weight).collect();
        let sizes: Vec<Cardinality> = node.choices.iter().map(|c| c.cardinality).collect();

        let probabilities = probabilities(&weights, &sizes, distribution, ceiling).map_err(|e| match e {
            Rejected::Empty => Error::EmptyDefinition {
                definition: node.key.to_string(),
            },
            Rejected::Total(total) => Error::WeightOverflow {
                definition: node.key.to_string(),
                total,
            },
        })?;

        for (choice, probability) in node.choices.iter_mut().zip(probabilities) {
            choice.probability = probability;
        }
    }
    Ok(())
}

enum Rejected {
    Empty,
    Total(f64),
}

fn probabilities(
    weights: &[Option<f64>],
    sizes: &[Cardinality],
    distribution: Distribution,
    ceiling: u128,
) -> std::result::Result<Vec<f64>, Rejected> {
    if weights.is_empty() {
        return Err(Rejected::Empty);
    }

    let explicit: f64 = weights.iter().flatten().sum();
    if explicit > 100.0 + TOLERANCE {
        return Err(Rejected::Total(explicit));
    }

    let unweighted = weights.iter().filter(|w| w.is_none()).count();
    if unweighted == 0 {
        if explicit <= TOLERANCE {
            // All zero: fall back to an even split.
            return Ok(vec![1.0 / weights.len() as f64; weights.len()]);
        }
        // Everything weighted but short of 100%: rescale.
        return Ok(weights.iter().map(|w| w.unwrap_or(0.0) / explicit).collect());
    }

    let remaining = ((100.0 - explicit) / 100.0).max(0.0);
    let shares: Vec<f64> = weights
        .iter()
        .zip(sizes)
        .filter(|(w, _)| w.is_none())
        .map(|(_, size)| match distribution {
            Distribution::Even => 1.0,
            Distribution::Regular => size.finite().unwrap_or(ceiling).min(ceiling) as f64,
        })
        .collect();
    let share_total: f64 = shares.iter().sum();
    let mut shares = shares.into_iter();

    Ok(weights
        .iter()
        .map(|w| match w {
            Some(w) => w / 100.0,
            None => {
                let share = shares.next().unwrap_or(0.0);
                if share_total > 0.0 {
                    remaining * share / share_total
                } else {
                    remaining / unweighted as f64
                }
            }
        })
        .collect())
}
