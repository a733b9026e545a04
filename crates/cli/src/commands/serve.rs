//! `turnstile serve` — Start the HTTP gateway.

use std::path::Path;
use turnstile_config::{AppConfig, RateBackend};

pub async fn run(config_path: Option<&Path>, port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config =
        AppConfig::load_with(config_path).map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    println!("Turnstile Gateway");
    println!("   Listening:  {}:{}", config.gateway.host, config.gateway.port);
    println!("   Model:      {}", config.completion.model);
    println!(
        "   Rate store: {}",
        match config.rate_limit.backend {
            RateBackend::Memory => "memory",
            RateBackend::Redis => "redis",
        }
    );
    println!("   Knowledge:  {}", if config.knowledge.enabled { "enabled" } else { "disabled" });
    if config.gateway.dev_mode {
        println!("   Dev mode:   on (error details are returned to clients)");
    }

    turnstile_gateway::start(config).await?;

    Ok(())
}
