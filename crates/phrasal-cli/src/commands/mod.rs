//! CLI command implementations

pub mod generate;
pub mod init;
pub mod validate;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use phrasal_core::{Config, DefinitionGraph, Error, GenerationConfig, Parser, ProjectConfig};

/// Grammar file extension
pub const GRAMMAR_EXTENSION: &str = "phrasal";

/// Check the grammar path and return it with its directory
fn grammar_path(grammar: &str) -> Result<(PathBuf, PathBuf)> {
    let path = PathBuf::from(grammar);
    let extension = path.extension().and_then(|e| e.to_str());
    if !extension.is_some_and(|e| e.eq_ignore_ascii_case(GRAMMAR_EXTENSION)) {
        anyhow::bail!(
            "Only .{} files are supported, got '{}'",
            GRAMMAR_EXTENSION,
            path.display()
        );
    }
    if !path.is_file() {
        anyhow::bail!("Grammar file '{}' not found", path.display());
    }
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
        .to_path_buf();
    Ok((path, dir))
}

/// Load an explicit configuration file, or `phrasal.yaml` next to the
/// grammar when there is one
fn load_config(config_path: Option<&str>, grammar_dir: &Path) -> Result<ProjectConfig> {
    let config = match config_path {
        Some(path) => Config::load(path).context("Failed to load configuration")?,
        None => Config::load_or_default(grammar_dir).context("Failed to load configuration")?,
    };
    Ok(config.project)
}

/// Parse and validate a grammar file, reporting syntax errors with their
/// location
fn compile(path: &Path, config: &GenerationConfig) -> Result<DefinitionGraph> {
    config.validate()?;
    let grammar = match Parser::new().parse_file(path) {
        Ok(grammar) => grammar,
        Err(Error::Syntax(e)) => {
            anyhow::bail!(
                "Syntax error in {}: {}\n  Line: {}\n  Column: {}",
                path.display(),
                e.message,
                e.line,
                e.column
            );
        }
        Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
    };
    DefinitionGraph::build(grammar, config)
        .with_context(|| format!("Invalid grammar {}", path.display()))
}
