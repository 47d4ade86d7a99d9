//! doc-triage command line entry point

use clap::{Parser, Subcommand};
use doc_triage::classifier::{Classifier, LlmIntentStrategy};
use doc_triage::config::{AppConfig, TraceBackendKind};
use doc_triage::llm::provider::{verify_provider, LlmProvider};
use doc_triage::llm::providers::{OpenAiConfig, OpenAiProvider};
use doc_triage::observability::init_default_logging;
use doc_triage::orchestrator::Orchestrator;
use doc_triage::server;
use doc_triage::trace::TraceStore;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Classify business documents and route the resulting actions
#[derive(Parser)]
#[command(name = "doc-triage")]
#[command(about = "Classify business documents and route the resulting actions")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "DOC_TRIAGE_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace); ignored when LOG_LEVEL is set
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP surface
    Serve,
    /// Run a single document through the pipeline and print the report
    Process {
        /// Document to process
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Validate the configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

const DEFAULT_CONFIG_PATHS: [&str; 2] = ["doc-triage.toml", "config/doc-triage.toml"];

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.verbose > 0 && std::env::var_os("LOG_LEVEL").is_none() {
        let level = if cli.verbose > 1 { "TRACE" } else { "DEBUG" };
        std::env::set_var("LOG_LEVEL", level);
    }
    init_default_logging();

    info!(version = env!("CARGO_PKG_VERSION"), "Starting doc-triage");

    let config = match load_configuration(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Serve => run_server(config).await,
        Commands::Process { file } => process_file(config, &file).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn load_configuration(config_path: Option<&Path>) -> Result<AppConfig, Box<dyn std::error::Error>> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(AppConfig::load_from_file(path)?);
    }

    for path_str in DEFAULT_CONFIG_PATHS {
        let path = PathBuf::from(path_str);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(AppConfig::load_from_file(&path)?);
        }
    }

    info!("No configuration file found, using built-in defaults");
    let config = AppConfig::default();
    config.validate()?;
    Ok(config)
}

/// Provider factory for the model classification tier
struct LlmProviderFactory;

impl LlmProviderFactory {
    /// `None` disables the model tier; a missing API key is not fatal
    async fn create_provider(config: &AppConfig) -> Option<Arc<dyn LlmProvider>> {
        if !config.llm.enabled {
            info!("Model classification tier disabled by configuration");
            return None;
        }

        let api_key = match config.get_llm_api_key() {
            Ok(key) => key,
            Err(e) => {
                warn!(error = %e, "No model API key, classifying with rules only");
                return None;
            }
        };

        match config.llm.provider.as_str() {
            "openai" => {
                let openai_config = OpenAiConfig {
                    api_key,
                    base_url: config.llm.base_url.clone(),
                    timeout: config.llm.timeout(),
                    ..Default::default()
                };
                match OpenAiProvider::new(openai_config) {
                    Ok(provider) => {
                        verify_provider(Arc::new(provider), config.llm.timeout()).await
                    }
                    Err(e) => {
                        warn!(error = %e, "Model provider unavailable, classifying with rules only");
                        None
                    }
                }
            }
            provider => {
                warn!(provider, "Unsupported LLM provider, classifying with rules only");
                None
            }
        }
    }
}

/// Trace store factory
struct TraceStoreFactory;

impl TraceStoreFactory {
    async fn create_store(config: &AppConfig) -> Result<TraceStore, Box<dyn std::error::Error>> {
        match config.trace_store.backend {
            TraceBackendKind::Memory => Ok(TraceStore::in_memory()),
            TraceBackendKind::Redis => Self::create_redis_store(config).await,
        }
    }

    #[cfg(feature = "redis")]
    async fn create_redis_store(
        config: &AppConfig,
    ) -> Result<TraceStore, Box<dyn std::error::Error>> {
        use doc_triage::trace::redis::RedisTraceBackend;

        let url = config
            .trace_store
            .redis_url
            .as_deref()
            .ok_or("trace_store.redis_url is not set")?;
        let backend = RedisTraceBackend::connect(url, config.trace_store.timeout()).await?;
        Ok(TraceStore::new(Arc::new(backend)))
    }

    #[cfg(not(feature = "redis"))]
    async fn create_redis_store(
        _config: &AppConfig,
    ) -> Result<TraceStore, Box<dyn std::error::Error>> {
        Err("trace_store.backend = \"redis\" needs a build with the `redis` feature".into())
    }
}

/// Bootstrap: wire the pipeline from configuration
async fn build_orchestrator(config: &AppConfig) -> Result<Orchestrator, Box<dyn std::error::Error>> {
    let store = TraceStoreFactory::create_store(config).await?;

    let classifier = match LlmProviderFactory::create_provider(config).await {
        Some(provider) => Classifier::with_llm(
            LlmIntentStrategy::new(provider, config.llm.model.clone())
                .with_temperature(config.llm.temperature)
                .with_max_tokens(config.llm.max_tokens)
                .with_timeout(config.llm.timeout()),
        ),
        None => Classifier::rule_based(),
    };

    info!(
        tiers = ?classifier.tier_names(),
        trace_backend = store.backend_name(),
        "Pipeline ready"
    );
    Ok(Orchestrator::from_config(config, classifier, store))
}

async fn run_server(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let orchestrator = Arc::new(build_orchestrator(&config).await?);
    server::serve(orchestrator, &config.server).await?;
    info!("Application shutdown complete");
    Ok(())
}

async fn process_file(config: AppConfig, file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let orchestrator = build_orchestrator(&config).await?;

    let bytes = tokio::fs::read(file).await?;
    let filename = file
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or("file name is not valid UTF-8")?;

    let report = orchestrator.process(filename, bytes).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn handle_config_command(config: &AppConfig, show: bool) -> Result<(), Box<dyn std::error::Error>> {
    config.validate()?;

    if show {
        println!("{}", toml::to_string_pretty(config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}
