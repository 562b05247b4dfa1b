use anyhow::{Context, Result};
use cancela::config::{Config, ConfigError, RoutingMode};
use cancela::Cancela;
use clap::{Parser, Subcommand};
use log::info;
use std::fs::OpenOptions;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cancela")]
#[command(about = "A sharding proxy for Redis-protocol key-value stores")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(author = "Cancela Team")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the cancela proxy
    Run {
        /// Path to configuration file
        #[arg(short, long, default_value = "config/cancela.toml")]
        config: PathBuf,
    },
    /// Generate example configuration files
    Config {
        /// Routing mode (direct or ring)
        #[arg(short, long)]
        mode: String,
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Validate configuration file
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Show version information
    Version,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => run_cancela(config)?,
        Commands::Config { mode, output } => generate_config(mode, output)?,
        Commands::Validate { config } => validate_config(config)?,
        Commands::Version => show_version(),
    }

    Ok(())
}

fn run_cancela(config_path: PathBuf) -> Result<()> {
    let config = Config::load_from_file(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    init_logging(&config)?;

    info!("Starting cancela v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded from: {:?}", config_path);
    info!("Routing mode: {:?}", config.routing.mode);
    info!("Listening on: {}", config.server.listen_addr);

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    if let Some(threads) = config.server.worker_threads {
        builder.worker_threads(threads);
    }
    let runtime = builder
        .enable_all()
        .thread_name("cancela-worker")
        .build()
        .context("Failed to build runtime")?;

    runtime.block_on(async move {
        let mut cancela = Cancela::new(config);
        cancela
            .initialize()
            .await
            .context("Failed to initialize cancela")?;

        cancela
            .run(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    log::error!("Failed to listen for shutdown signal: {}", e);
                    std::future::pending::<()>().await;
                }
                info!("Received shutdown signal");
            })
            .await
            .context("Failed to run cancela")
    })?;

    info!("cancela stopped");
    Ok(())
}

fn generate_config(mode: String, output: PathBuf) -> Result<()> {
    println!("Generating {} configuration file: {:?}", mode, output);

    Config::create_example_config(&output, &mode).context("Failed to generate config")?;

    println!("Configuration file generated successfully!");
    println!("Edit the file to match your environment and run:");
    println!("  cancela run --config {:?}", output);

    Ok(())
}

fn validate_config(config_path: PathBuf) -> Result<()> {
    println!("Validating configuration file: {:?}", config_path);

    match Config::load_from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration file is valid");
            println!("  Routing mode: {:?}", config.routing.mode);
            println!("  Hash function: {}", config.routing.hash);
            println!("  Listen address: {}", config.server.listen_addr);
            println!("  Max connections: {}", config.server.max_connections);
            println!(
                "  Password: {}",
                if config.server.password.is_some() { "set" } else { "none" }
            );

            let assignments = match config.routing.mode {
                RoutingMode::Direct => config.slot_assignments().ok(),
                RoutingMode::Ring => None,
            };
            println!("  Groups: {}", config.groups.len());
            for (index, group) in config.groups.iter().enumerate() {
                match &assignments {
                    Some(owners) => {
                        let slots = owners.iter().filter(|owner| **owner == index).count();
                        println!(
                            "    {} ({}, {} slots)",
                            group.name, group.policy, slots
                        );
                    }
                    None => println!(
                        "    {} ({}, weight {})",
                        group.name, group.policy, group.weight
                    ),
                }
                for host in &group.hosts {
                    println!(
                        "      {} {} [{}]",
                        host.name,
                        host.addr,
                        if host.master { "master" } else { "slave" }
                    );
                }
            }
            if !config.key_mappings.is_empty() {
                println!("  Key mappings: {}", config.key_mappings.len());
            }
        }
        Err(e) => {
            eprintln!("✗ Configuration file validation failed:");
            match &e {
                ConfigError::IoError(msg) => eprintln!("  File error: {}", msg),
                ConfigError::ParseError(msg) => eprintln!("  Parse error: {}", msg),
                ConfigError::ValidationError(msg) => eprintln!("  Validation error: {}", msg),
                ConfigError::SerializeError(msg) => eprintln!("  Serialization error: {}", msg),
            }
            return Err(e.into());
        }
    }

    Ok(())
}

fn show_version() {
    println!("cancela v{}", env!("CARGO_PKG_VERSION"));
    println!("A sharding proxy for Redis-protocol key-value stores");
    println!();
    println!(
        "Built with Rust {}",
        option_env!("CARGO_PKG_RUST_VERSION").unwrap_or("unknown")
    );
    println!("Target: {}", std::env::consts::ARCH);
    println!();
    println!("Features:");
    println!("  • Direct slot tables and weighted consistent-hash rings");
    println!("  • MGET/MSET/DEL fan-out across shard groups");
    println!("  • Master/slave read policies with pooled backend connections");
    println!("  • Group ejection and restore on backend failure");
    println!("  • Runtime slot and key remapping");
}

fn init_logging(config: &Config) -> Result<()> {
    let level = config.logging.level.as_str();

    if config.logging.format == "json" {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
        let subscriber = tracing_subscriber::fmt().json().with_env_filter(filter);
        match &config.logging.file {
            Some(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .with_context(|| format!("Failed to open log file {}", path))?;
                subscriber.with_writer(std::sync::Mutex::new(file)).init();
            }
            None => subscriber.init(),
        }
        info!("JSON logging initialized at level: {}", level);
        return Ok(());
    }

    let log_level = match level {
        "trace" => log::LevelFilter::Trace,
        "debug" => log::LevelFilter::Debug,
        "info" => log::LevelFilter::Info,
        "warn" => log::LevelFilter::Warn,
        "error" => log::LevelFilter::Error,
        _ => log::LevelFilter::Info,
    };

    let mut builder = env_logger::Builder::from_default_env();
    builder.filter_level(log_level);
    if let Some(path) = &config.logging.file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open log file {}", path))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    } else if !config.logging.stdout {
        builder.target(env_logger::Target::Stderr);
    } else {
        builder.target(env_logger::Target::Stdout);
    }
    builder.init();

    info!("Logging initialized at level: {:?}", log_level);
    Ok(())
}
