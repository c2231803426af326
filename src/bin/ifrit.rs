use clap::{Parser, Subcommand};
use ifrit::{
    config::{EngineConfig, KeysConfig},
    initialize_system_handlers,
    provider::key_store::{KeyStore, MemoryKeyStore},
    Engine, Error, ExecuteOptions, InternalResult, ProgressEvent, ProviderId,
};
use serde::Serialize;
use serde_json::json;
use std::{path::PathBuf, sync::Arc};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to engine config file
    #[arg(short, long, env = "IFRIT_CONFIG", default_value = "ifrit.json")]
    config: PathBuf,

    /// Path to API keys file
    #[arg(short, long, env = "IFRIT_KEYS", default_value = "keys.json")]
    keys: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the capability catalog
    Capabilities,
    /// List registered handlers
    Handlers {
        /// Only handlers for this capability, in chain order
        #[arg(long)]
        capability: Option<String>,
    },
    /// Show handler coverage and config source
    Diagnostics,
    /// Execute a capability
    Run {
        capability: String,
        #[arg(short, long, default_value = "")]
        prompt: String,
        #[arg(short, long)]
        model: Option<String>,
        /// Preferred handler id
        #[arg(long)]
        prefer: Option<String>,
        /// Stop after the first handler
        #[arg(long)]
        no_fallback: bool,
        #[arg(long)]
        no_cache: bool,
        /// Run all handlers concurrently and merge results
        #[arg(long)]
        aggregate: bool,
    },
    /// Manage API keys
    Keys {
        #[command(subcommand)]
        command: KeysCommand,
    },
}

#[derive(Subcommand)]
enum KeysCommand {
    /// Key counts per provider
    Summary,
    /// Keys of one provider with their health
    Status { provider: String },
    /// Validate and store a key
    Add {
        provider: String,
        key: String,
        #[arg(short, long)]
        label: Option<String>,
        #[arg(long)]
        skip_validation: bool,
    },
    Remove { provider: String, key: String },
    /// Validate a key without storing it
    Validate { provider: String, key: String },
    /// Health of every configured provider
    Health,
}

fn load_config(cli: &Cli) -> InternalResult<EngineConfig> {
    if cli.config.exists() {
        Ok(EngineConfig::from_file(&cli.config)?)
    } else {
        debug!(path = ?cli.config, "config file not found, using defaults");
        Ok(EngineConfig::default())
    }
}

fn load_keys(cli: &Cli) -> InternalResult<KeysConfig> {
    if cli.keys.exists() {
        Ok(KeysConfig::from_file(&cli.keys)?)
    } else {
        Ok(KeysConfig::default())
    }
}

fn print_json<T: Serialize>(value: &T) -> InternalResult<()> {
    let text = serde_json::to_string_pretty(value).map_err(|e| Error::internal(e.to_string()))?;
    println!("{}", text);
    Ok(())
}

async fn run(cli: &Cli) -> InternalResult<()> {
    let config = load_config(cli)?;
    let keys = load_keys(cli)?;
    let store = Arc::new(MemoryKeyStore::from_config(&keys, &config.capability_settings));
    let engine = Engine::isolated(store.clone(), config)?;
    let report = initialize_system_handlers(&engine).await;
    info!(
        registered = report.registered.len(),
        failed = report.failures.len(),
        "engine ready"
    );

    match &cli.command {
        Command::Capabilities => print_json(&engine.capabilities()),
        Command::Handlers { capability } => {
            let handlers = match capability {
                Some(capability) => engine.handlers_for(capability),
                None => engine.handlers(),
            };
            let listing: Vec<_> = handlers
                .iter()
                .map(|handler| {
                    json!({
                        "id": handler.id(),
                        "name": handler.name(),
                        "priority": handler.priority(),
                        "source": handler.source(),
                        "provider": handler.provider_id(),
                        "capabilities": handler.capabilities().list(),
                    })
                })
                .collect();
            print_json(&listing)
        }
        Command::Diagnostics => print_json(&json!({
            "diagnostics": engine.diagnostics(),
            "registration": report,
        })),
        Command::Run {
            capability,
            prompt,
            model,
            prefer,
            no_fallback,
            no_cache,
            aggregate,
        } => {
            let mut options = ExecuteOptions::new(capability.as_str())
                .prompt(prompt.as_str())
                .use_fallback(!no_fallback)
                .use_cache(!no_cache)
                .on_progress(|event: ProgressEvent| debug!(?event, "progress"));
            if let Some(model) = model {
                options = options.model(model.as_str());
            }
            if let Some(prefer) = prefer {
                options = options.prefer(prefer.as_str());
            }
            let result = if *aggregate {
                engine.execute_aggregate(options).await
            } else {
                engine.execute(options).await
            };
            print_json(&result)?;
            if result.success {
                Ok(())
            } else {
                Err(Error::internal(result.error.unwrap_or_default()))
            }
        }
        Command::Keys { command } => {
            let manager = engine
                .key_manager()
                .ok_or_else(|| Error::internal("key manager not available"))?;
            match command {
                KeysCommand::Summary => print_json(&manager.summary()),
                KeysCommand::Status { provider } => print_json(&json!({
                    "cooldown_secs": manager.config().rate_limit_cooldown.as_secs(),
                    "keys": manager.key_status(&ProviderId::from(provider.as_str())),
                })),
                KeysCommand::Add {
                    provider,
                    key,
                    label,
                    skip_validation,
                } => {
                    let outcome = manager
                        .add_key(
                            &ProviderId::from(provider.as_str()),
                            key,
                            label.clone(),
                            *skip_validation,
                        )
                        .await;
                    print_json(&outcome)?;
                    if outcome.success {
                        KeysConfig::from_store(store.as_ref()).save(&cli.keys)?;
                    }
                    Ok(())
                }
                KeysCommand::Remove { provider, key } => {
                    let removed = manager.remove_key(&ProviderId::from(provider.as_str()), key);
                    if removed {
                        KeysConfig::from_store(store.as_ref()).save(&cli.keys)?;
                    }
                    print_json(&json!({ "removed": removed }))
                }
                KeysCommand::Validate { provider, key } => print_json(
                    &manager
                        .validate_key(&ProviderId::from(provider.as_str()), key)
                        .await,
                ),
                KeysCommand::Health => {
                    debug!(providers = store.providers().len(), "checking provider health");
                    print_json(&manager.check_all_health().await)
                }
            }
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(&cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
