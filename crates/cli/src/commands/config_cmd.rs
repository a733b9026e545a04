//! `turnstile config` — Configuration management commands.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use turnstile_config::AppConfig;

const REDACTED: &str = "***";

fn config_file(config_path: Option<&Path>) -> PathBuf {
    config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"))
}

/// Copy of `config` that is safe to print.
fn redacted(config: &AppConfig) -> AppConfig {
    let mut safe = config.clone();
    if safe.api_key.is_some() {
        safe.api_key = Some(REDACTED.into());
    }
    if safe.completion.api_key.is_some() {
        safe.completion.api_key = Some(REDACTED.into());
    }
    safe.gateway.tokens = config
        .gateway
        .tokens
        .values()
        .enumerate()
        .map(|(i, user)| (format!("{REDACTED}{i}"), user.clone()))
        .collect::<HashMap<_, _>>();
    if let Some(url) = &config.rate_limit.redis_url {
        if url.contains('@') {
            safe.rate_limit.redis_url = Some(REDACTED.into());
        }
    }
    safe
}

pub async fn validate(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    println!("Validating configuration...");

    match AppConfig::load_with(config_path) {
        Ok(config) => {
            println!("   Config parsed successfully");

            let mut warnings = Vec::new();

            if config.effective_api_key().is_none() {
                warnings.push("No API key set (set TURNSTILE_API_KEY or OPENAI_API_KEY)");
            }

            if config.gateway.tokens.is_empty() {
                warnings.push("No bearer tokens under [gateway.tokens]; every chat request will be rejected");
            }

            if config.gateway.host == "0.0.0.0" && config.gateway.dev_mode {
                warnings.push("Dev mode on a public bind exposes error details to clients");
            }

            if warnings.is_empty() {
                println!("   All checks passed");
            } else {
                println!();
                for w in &warnings {
                    println!("   warning: {w}");
                }
            }

            println!();
            println!("   Model:      {}", config.completion.model);
            println!("   Gateway:    {}:{}", config.gateway.host, config.gateway.port);
            println!(
                "   Rate:       {}/min, {}/day",
                config.rate_limit.per_minute, config.rate_limit.per_day
            );
            println!("   Usage DB:   {}", config.quota.database_url);
            println!("   Knowledge:  {}", config.knowledge.index_path);
        }
        Err(e) => {
            println!("   Config error: {e}");
            return Err(e.into());
        }
    }

    Ok(())
}

pub async fn show(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config =
        AppConfig::load_with(config_path).map_err(|e| format!("Failed to load config: {e}"))?;
    let toml_str = toml::to_string_pretty(&redacted(&config))?;
    println!("{toml_str}");
    Ok(())
}

pub async fn path(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", config_file(config_path).display());
    Ok(())
}

pub async fn init(config_path: Option<&Path>, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    let file = config_file(config_path);
    if file.exists() && !force {
        return Err(format!(
            "{} already exists (use --force to overwrite)",
            file.display()
        )
        .into());
    }
    if let Some(parent) = file.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&file, AppConfig::default_toml())?;
    println!("Wrote default configuration to {}", file.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_path_is_valid() {
        let path = config_file(None);
        assert!(path.to_str().unwrap().contains("config.toml"));
        assert_eq!(config_file(Some(Path::new("/tmp/t.toml"))), PathBuf::from("/tmp/t.toml"));
    }

    #[test]
    fn redaction_hides_secrets_but_keeps_users() {
        let mut config = AppConfig::default();
        config.api_key = Some("sk-live-123".into());
        config.completion.api_key = Some("sk-other".into());
        config.gateway.tokens = HashMap::from([("tok-secret".to_string(), "alice".to_string())]);
        config.rate_limit.redis_url = Some("redis://:hunter2@cache:6379".into());

        let printed = toml::to_string_pretty(&redacted(&config)).unwrap();
        assert!(!printed.contains("sk-live-123"));
        assert!(!printed.contains("sk-other"));
        assert!(!printed.contains("tok-secret"));
        assert!(!printed.contains("hunter2"));
        assert!(printed.contains("alice"));
    }

    #[tokio::test]
    async fn init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("config.toml");

        init(Some(&file), false).await.unwrap();
        let written = std::fs::read_to_string(&file).unwrap();
        assert!(written.contains("[rate_limit]"));

        assert!(init(Some(&file), false).await.is_err());
        assert!(init(Some(&file), true).await.is_ok());
        assert!(AppConfig::load_from(&file).is_ok());
    }
}
