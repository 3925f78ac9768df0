use anyhow::{Context, Result};
use base64::{engine::general_purpose, Engine as _};
use clap::Parser;
use gridlink::cli::{Cli, Commands};
use gridlink::config::ClientConfig;
use gridlink::network::GridClient;
use gridlink::security::{fingerprint, StaticToken};
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

fn load_config(cli: &Cli) -> Result<ClientConfig> {
    let mut config = match &cli.config {
        Some(path) => ClientConfig::load(path)?,
        None => ClientConfig::load_or_default()?,
    };
    if !cli.servers.is_empty() {
        config.servers = cli.servers.clone();
    }
    Ok(config)
}

/// Print a value as text when it is UTF-8, as hex otherwise
fn display_value(value: &[u8]) -> String {
    match std::str::from_utf8(value) {
        Ok(text) => text.to_string(),
        Err(_) => format!("0x{}", hex::encode(value)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    debug!("Using configuration: {:?}", config);

    let mut client = GridClient::from_config(&config)?;
    if let Some(encoded) = &cli.token {
        let token = general_purpose::STANDARD
            .decode(encoded)
            .context("Security token is not valid base64")?;
        info!("Using security token {}", fingerprint(&token));
        client = client.with_token_supplier(Arc::new(StaticToken::new(token)));
    }
    if let Some(max_idle) = config.idle_timeout() {
        client.start_idle_pruner(max_idle);
    }

    let result = run(&client, &cli.command).await;

    if cli.stats {
        let stats = serde_json::json!({
            "operations": client.stats(),
            "pool": client.pool_status(),
        });
        println!("{}", serde_json::to_string_pretty(&stats)?);
    }

    client.shutdown();
    result
}

async fn run(client: &GridClient, command: &Commands) -> Result<()> {
    match command {
        Commands::Ping => {
            client.ping().await.context("Ping failed")?;
            println!("PONG");
        }
        Commands::Size { region } => {
            let size = client
                .size(region)
                .await
                .with_context(|| format!("Failed to read size of region '{}'", region))?;
            println!("{}", size);
        }
        Commands::Get { region, key } => {
            match client
                .get(region, key)
                .await
                .with_context(|| format!("Failed to get '{}' from '{}'", key, region))?
            {
                Some(value) => println!("{}", display_value(&value)),
                None => println!("(not found)"),
            }
        }
        Commands::Put { region, key, value } => {
            client
                .put(region, key, value.as_bytes().to_vec())
                .await
                .with_context(|| format!("Failed to put '{}' into '{}'", key, region))?;
            println!("OK");
        }
        Commands::Remove { region, key } => {
            let existed = client
                .remove(region, key)
                .await
                .with_context(|| format!("Failed to remove '{}' from '{}'", key, region))?;
            println!("{}", if existed { "removed" } else { "(not found)" });
        }
    }
    Ok(())
}
