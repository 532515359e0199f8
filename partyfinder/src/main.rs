use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use partyfinder::aggregator;
use partyfinder::cli::{Cli, Commands};
use partyfinder::config::{self, AppConfig, CONFIG_PATH};
use partyfinder::export::{export_run_summary, CsvSink, RUN_SUMMARY_FILE};
use partyfinder::logger::{RunLogger, VerbosityLevel};
use partyfinder::maintenance;
use partyfinder::whois::{DisabledLookup, OrganizationLookup, WhoisClient};

fn setup_tracing(verbosity: VerbosityLevel) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.filter_directive()));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}

fn load_config(path: &Path) -> AppConfig {
    match AppConfig::load_from_path(path) {
        Ok(cfg) => cfg,
        Err(config::ConfigError::FileNotFound(path)) => match AppConfig::prompt_create_config(&path) {
            Ok(Some(created_path)) => {
                println!("✅ Created default configuration file at: {}", created_path.display());
                println!("   Edit this file to describe your device, then run partyfinder again.");
                std::process::exit(0);
            }
            Ok(None) => {
                eprintln!("❌ Configuration file not found at: {}", path.display());
                eprintln!("   Run with --init to create a default configuration file.");
                std::process::exit(1);
            }
            Err(e) => {
                eprintln!("❌ Failed to create configuration file: {}", e);
                std::process::exit(1);
            }
        },
        Err(e) => {
            eprintln!("❌ Configuration error: {}", e);
            std::process::exit(1);
        }
    }
}

async fn classify_device<L: OrganizationLookup>(config: &AppConfig, lookup: L, logger: &RunLogger) -> Result<()> {
    let classifier = aggregator::build_classifier(config, lookup)?;
    if classifier.suffixes().is_empty() {
        logger.info(&format!(
            "No first-party suffixes for {}; relying on unique-domain sets only",
            config.device.id
        ));
    }

    logger.info(&format!(
        "Classifying device {} for {} (wildcard policy: {})",
        config.device.id,
        config.device.years.join(", "),
        config.schema.unique_wildcard.as_str()
    ));

    let mut sink = CsvSink::new(config.device_output_dir());
    let summary = aggregator::run(config, &classifier, &mut sink, logger).await?;

    let summary_path = config.device_output_dir().join(RUN_SUMMARY_FILE);
    export_run_summary(&summary, &summary_path)?;
    logger.debug(&format!("Run summary written to {}", summary_path.display()));

    logger.print_final_summary(&summary);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(|| PathBuf::from(CONFIG_PATH));

    // Handle --init flag first (before any other processing)
    if cli.init {
        match AppConfig::create_default_config_at(&config_path) {
            Ok(path) => {
                println!("✅ Created default configuration file at: {}", path.display());
                println!("   Edit this file to describe your device, then run partyfinder again.");
                return Ok(());
            }
            Err(e) => {
                eprintln!("❌ Failed to create configuration file: {}", e);
                std::process::exit(1);
            }
        }
    }

    let verbosity = VerbosityLevel::from_verbose_count(cli.verbose);
    setup_tracing(verbosity);
    let logger = RunLogger::new(verbosity);

    let app_config = match load_config(&config_path).apply_overrides(&cli.overrides()) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("❌ Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            if app_config.whois.enabled {
                let servers_file = app_config.whois.servers_file.as_deref().map(config::expand_home);
                let client = WhoisClient::new(
                    servers_file.as_deref(),
                    app_config.whois.system_fallback,
                    Duration::from_secs(app_config.whois.timeout_secs),
                )
                .context("Failed to initialise WHOIS client")?;
                classify_device(&app_config, client, &logger).await?;
            } else {
                logger.info("WHOIS fallback disabled; unmapped domains resolve to Unknown");
                classify_device(&app_config, DisabledLookup, &logger).await?;
            }
        }
        Commands::Repair => {
            let rewritten = maintenance::repair_artifacts(&app_config)?;
            for path in &rewritten {
                println!("Normalized {}", path.display());
            }
            println!("{} file(s) normalized", rewritten.len());
        }
        Commands::InitIpMaps => {
            let created = maintenance::init_empty_ip_maps(&app_config)?;
            for path in &created {
                println!("Created empty {}", path.display());
            }
            println!("{} IP map(s) created", created.len());
        }
        Commands::FirstParty { domains } => {
            let (path, count) = maintenance::write_first_party(&app_config, &domains)?;
            println!("First-party domains ({}) saved to {}", count, path.display());
        }
    }

    Ok(())
}
