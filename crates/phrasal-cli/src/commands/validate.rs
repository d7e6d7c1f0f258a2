//! Validate grammar command

use anyhow::Result;

use phrasal_core::{Generator, Strategy};

/// Run the validate command
pub async fn run(config_path: Option<&str>, grammar: &str) -> Result<()> {
    let (grammar_path, grammar_dir) = super::grammar_path(grammar)?;
    let config = super::load_config(config_path, &grammar_dir)?;
    tracing::info!("Validating grammar: {}", grammar_path.display());

    let graph = super::compile(&grammar_path, &config.generation)?;
    tracing::info!("✓ Definitions: {}", graph.len());
    tracing::info!("✓ Content hash: {}", graph.content_hash());

    let generator = Generator::new(&graph, &config.generation);
    let request = config.generation.request();
    for plan in generator.plans(&request)? {
        let cardinality = graph.cardinality(plan.intent);
        match plan.strategy {
            Strategy::Exhaustive { paths } => {
                tracing::info!("✓ {}: {} distinct utterances, exhaustive", plan.name, paths);
            }
            Strategy::Sampled { draws } => {
                tracing::info!(
                    "✓ {}: {} distinct utterances, sampling {}",
                    plan.name,
                    cardinality,
                    draws
                );
            }
        }
    }

    tracing::info!("✓ Grammar is valid");
    Ok(())
}
