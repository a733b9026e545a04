//! `turnstile ingest` — Add a document to the knowledge index.

use std::path::Path;
use tracing::info;
use turnstile_config::AppConfig;

/// Label used when `--source` is not given: the file stem.
fn default_source(file: &Path) -> String {
    file.file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("document")
        .to_string()
}

pub async fn run(
    config_path: Option<&Path>,
    file: &Path,
    source: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config =
        AppConfig::load_with(config_path).map_err(|e| format!("Failed to load config: {e}"))?;

    let text = tokio::fs::read_to_string(file)
        .await
        .map_err(|e| format!("Failed to read {}: {e}", file.display()))?;
    if text.trim().is_empty() {
        return Err(format!("{} is empty", file.display()).into());
    }

    let source = source.unwrap_or_else(|| default_source(file));
    let provider = turnstile_providers::build_from_config(&config)?;
    let retriever = turnstile_gateway::build_retriever(&config, provider).await?;

    println!("Ingesting {} as \"{source}\"...", file.display());
    let chunks = retriever.ingest(&source, &text).await?;
    info!(source = %source, chunks, "Document ingested");
    println!("   Indexed {chunks} chunks into {}", config.knowledge.index_path);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_defaults_to_file_stem() {
        assert_eq!(default_source(Path::new("/docs/pricing-faq.md")), "pricing-faq");
        assert_eq!(default_source(Path::new("/")), "document");
    }
}
