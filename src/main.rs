//! cot-proxy: reverse proxy for chat-completion APIs
//!
//! A Rust-based reverse proxy that sits in front of an OpenAI-style
//! inference server and provides:
//! - Per-model "variants" selected via the model identifier
//! - Request rewriting (system prompt, weak defaults, weak logit bias)
//! - Think-tag removal from responses, buffered or streamed

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

use cot_proxy::{config::AppConfig, run_server, strip::ThinkTags, VariantRegistry};

#[derive(Parser)]
#[command(name = "cot-proxy")]
#[command(version = "0.1.0")]
#[command(about = "Reverse proxy that rewrites chat-completion traffic per model variant")]
#[command(long_about = "
cot-proxy is a reverse proxy for OpenAI-style chat-completion servers that
provides:
  - Per-model variants selected via the model identifier (model@label)
  - Request rewriting: system prompt prepend, weak defaults, weak logit bias
  - Think-tag removal from responses (buffered and streamed)

Example usage:
  cot-proxy run --config config.yaml
  cot-proxy list-variants --verbose
")]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, default_value = "config.yaml")]
    config: PathBuf,

    /// Set logging level (trace, debug, info, warn, error)
    #[arg(long, global = true, value_name = "LEVEL")]
    log_level: Option<LogLevel>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the proxy server
    Run {
        /// Override listen port
        #[arg(short, long)]
        port: Option<u16>,
        /// Override upstream URL (e.g., "https://api.example.com")
        #[arg(long)]
        upstream_url: Option<String>,
    },

    /// List all configured variants
    ListVariants {
        /// Show detailed information
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate configuration file
    CheckConfig,

    /// Test connection to the upstream server
    TestUpstream,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let level_filter = if let Some(level) = cli.log_level {
        level.to_string()
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
            .to_string()
    };

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&level_filter))
        .init();

    match cli.command {
        Commands::Run { port, upstream_url } => {
            run_proxy(cli.config, port, upstream_url).await?;
        }
        Commands::ListVariants { verbose } => {
            list_variants(cli.config, verbose);
        }
        Commands::CheckConfig => {
            check_config(cli.config)?;
        }
        Commands::TestUpstream => {
            test_upstream(cli.config).await?;
        }
    }

    Ok(())
}

/// Run the proxy server
async fn run_proxy(
    config_path: PathBuf,
    port_override: Option<u16>,
    upstream_url_override: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let mut config = load_config_or_exit(&config_path);

    // Apply CLI overrides
    if let Some(port) = port_override {
        config.server.port = port;
    }
    if let Some(url) = upstream_url_override {
        config.upstream.url = url;
    }

    tracing::info!("Loading configuration from {:?}", config_path);

    // Default tag pair is read from the environment exactly once, here, and
    // threaded through the registry from then on.
    let default_tags = ThinkTags::from_env();
    tracing::info!(
        start = %default_tags.start,
        end = %default_tags.end,
        "Default think tags"
    );

    let registry = match VariantRegistry::from_config(&config.variants, &default_tags) {
        Ok(registry) => registry,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let variant_names: Vec<&str> = registry
        .variants()
        .iter()
        .map(|v| v.name.as_str())
        .collect();
    tracing::info!(variants = ?variant_names, "Variants configured");

    // Run the server
    run_server(config, registry).await?;

    Ok(())
}

/// List all configured variants
fn list_variants(config_path: PathBuf, verbose: bool) {
    let config = load_config_or_exit(&config_path);
    let default_tags = ThinkTags::from_env();
    let registry = match VariantRegistry::from_config(&config.variants, &default_tags) {
        Ok(registry) => registry,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    println!("Configured variants:\n");

    for variant in registry.variants() {
        if verbose {
            println!("  {}:", variant.name);
            if !variant.label.is_empty() {
                println!("    Label: @{}", variant.label);
            }
            println!("    Strip think tags: {}", variant.thinking.strip);
            if variant.thinking.strip {
                println!(
                    "    Tags: {} ... {}",
                    variant.thinking.tags.start, variant.thinking.tags.end
                );
            }
            if !variant.weak_defaults.is_empty() {
                let mut keys: Vec<&str> =
                    variant.weak_defaults.keys().map(|k| k.as_str()).collect();
                keys.sort_unstable();
                println!("    Weak defaults: {}", keys.join(", "));
            }
            if !variant.weak_logit_bias.is_empty() {
                println!("    Weak logit bias entries: {}", variant.weak_logit_bias.len());
            }
            if let Some(ref path) = variant.system_prompt_file {
                println!("    System prompt file: {}", path.display());
            }
            if !variant.inject_at_end.is_empty() {
                println!("    Inject at end: {:?}", variant.inject_at_end);
            }
            println!();
        } else {
            let selector = if !variant.label.is_empty() {
                format!("@{}", variant.label)
            } else {
                "regex".to_string()
            };
            let strip = if variant.thinking.strip {
                "[strip]"
            } else {
                "[passthrough]"
            };
            println!("  {:30} {:14} {}", variant.name, strip, selector);
        }
    }

    if registry.variants().is_empty() {
        println!("  (none - every request uses the passthrough fallback)");
    }
}

/// Validate configuration file
fn check_config(config_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let config = match AppConfig::from_file(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    // Variant compilation surfaces regex/tag errors before the server starts
    let default_tags = ThinkTags::from_env();
    if let Err(e) = VariantRegistry::from_config(&config.variants, &default_tags) {
        eprintln!("✗ Configuration error: {}", e);
        std::process::exit(1);
    }

    println!("✓ Configuration file is valid\n");
    println!("Server:");
    println!("  Listen: {}:{}", config.server.host, config.server.port);
    println!("\nUpstream:");
    println!("  URL: {}", config.upstream.url);
    println!(
        "  TLS: {}",
        if config.upstream.is_tls() {
            "enabled"
        } else {
            "disabled"
        }
    );
    if let Some(ref tls) = config.upstream.tls {
        if tls.accept_invalid_certs {
            println!("  TLS: Accepting invalid certificates");
        }
        if let Some(ref ca) = tls.ca_cert_path {
            println!("  TLS CA: {}", ca);
        }
        if let Some(ref cert) = tls.client_cert_path {
            println!("  TLS Client Cert: {}", cert);
        }
    }
    println!("  Timeout: {}s", config.upstream.timeout_seconds);
    println!("  API key: {}", if config.upstream.api_key.is_some() { "configured" } else { "none" });
    println!("\nDefault think tags:");
    println!("  START: {}", default_tags.start);
    println!("  END: {}", default_tags.end);
    println!("\nVariants:");
    for variant in &config.variants {
        println!("  {} : strip={}", variant.name, variant.thinking.strip);
    }
    Ok(())
}

/// Test connection to the upstream server
async fn test_upstream(config_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config_or_exit(&config_path);
    let base_url = config.upstream.base_url();
    let health_url = format!("{}/health", base_url);

    println!("Testing connection to upstream: {}", health_url);

    let mut client_builder = reqwest::Client::builder().timeout(std::time::Duration::from_secs(5));

    // Apply TLS settings for test
    if let Some(ref tls) = config.upstream.tls {
        if tls.accept_invalid_certs {
            client_builder = client_builder.danger_accept_invalid_certs(true);
        }
        if let Some(ref ca_path) = tls.ca_cert_path {
            let ca_cert = std::fs::read(ca_path)?;
            let ca_cert = reqwest::Certificate::from_pem(&ca_cert)?;
            client_builder = client_builder.add_root_certificate(ca_cert);
        }
        if let (Some(cert_path), Some(key_path)) = (&tls.client_cert_path, &tls.client_key_path) {
            let cert_pem = std::fs::read(cert_path)?;
            let key_pem = std::fs::read(key_path)?;
            let identity = reqwest::Identity::from_pem(&[cert_pem, key_pem].concat())?;
            client_builder = client_builder.identity(identity);
        }
    }

    let client = client_builder.build()?;

    match client.get(&health_url).send().await {
        Ok(resp) => {
            if resp.status().is_success() {
                println!("✓ Upstream is reachable");
                println!("  Status: {}", resp.status());

                if let Ok(body) = resp.text().await {
                    println!("  Response: {}", body.trim());
                }
            } else {
                println!("✗ Upstream returned error status: {}", resp.status());
            }
        }
        Err(e) => {
            println!("✗ Failed to connect to upstream: {}", e);
            std::process::exit(1);
        }
    }

    // Also try /v1/models
    let models_url = format!("{}/v1/models", base_url);
    println!("\nTesting /v1/models endpoint: {}", models_url);

    match client.get(&models_url).send().await {
        Ok(resp) => {
            if resp.status().is_success() {
                println!("✓ /v1/models endpoint available");
                if let Ok(body) = resp.text().await {
                    if let Ok(json) = serde_json::from_str::<serde_json::Value>(&body) {
                        if let Some(data) = json.get("data").and_then(|d| d.as_array()) {
                            println!("  Available models: {}", data.len());
                            for model in data.iter().take(5) {
                                if let Some(id) = model.get("id").and_then(|i| i.as_str()) {
                                    println!("    - {}", id);
                                }
                            }
                        }
                    }
                }
            } else {
                println!("  /v1/models returned: {}", resp.status());
            }
        }
        Err(e) => {
            println!("  /v1/models error: {}", e);
        }
    }

    Ok(())
}

/// Load configuration or exit with error
fn load_config_or_exit(config_path: &PathBuf) -> AppConfig {
    match AppConfig::from_file(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            eprintln!("\nMake sure you have a config.yaml file.");
            eprintln!("You can copy config.yaml.default and modify it:");
            eprintln!("  cp config.yaml.default config.yaml");
            std::process::exit(1);
        }
    }
}
