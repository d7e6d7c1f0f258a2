//! Initialize a new Phrasal project

use anyhow::Result;
use std::fs;
use std::path::Path;

use phrasal_core::config::CONFIG_FILE_NAME;

use super::GRAMMAR_EXTENSION;

/// Run the init command
pub async fn run(path: &str, name: Option<&str>) -> Result<()> {
    let project_dir = Path::new(path);

    // Create directory if it doesn't exist
    if !project_dir.exists() {
        fs::create_dir_all(project_dir)?;
    }

    // Derive grammar name from directory name if not provided
    let abs_path = project_dir.canonicalize()?;
    let grammar_name = match name {
        Some(n) => n.to_string(),
        None => abs_path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("Could not determine grammar name from path"))?,
    };

    if project_dir.join(CONFIG_FILE_NAME).exists() {
        anyhow::bail!(
            "Directory '{}' already contains a {}",
            project_dir.display(),
            CONFIG_FILE_NAME
        );
    }

    tracing::info!("Creating new Phrasal project: {}", grammar_name);

    let config = r#"# Phrasal configuration
generation:
  # Intents with at most this many distinct utterances are enumerated
  exhaustive_ceiling: 10000
  optional_probability: 0.5
  test_fraction: 0.2
  seed: 42

runtime:
  workers: 4
"#;
    fs::write(project_dir.join(CONFIG_FILE_NAME), config)?;

    let grammar = r#"// Example grammar
%[greet]
    ~[hi] ?[there]
    ~[hi] @[name]

%[book_flight]('training': '20', 'testing': '5')
    ~[please?] book a flight to @[city]
    *[30%] fly me to @[city] ?[tomorrow]
    i need to get to @[city]

~[hi]
    hi
    hello
    hey

~[please]
    please
    could you

@[name]
    ada
    grace

@[city]
    paris
    lisbon
    ~[new_york]

~[new_york]
    new york
    nyc
    the big apple
"#;
    let grammar_file = project_dir.join(format!("{}.{}", grammar_name, GRAMMAR_EXTENSION));
    fs::write(&grammar_file, grammar)?;

    tracing::info!("✓ Created {}", CONFIG_FILE_NAME);
    tracing::info!("✓ Created {}", grammar_file.display());
    tracing::info!("");
    tracing::info!("Next steps:");
    tracing::info!("  phrasal validate {}", grammar_file.display());
    tracing::info!("  phrasal generate {}", grammar_file.display());

    Ok(())
}
