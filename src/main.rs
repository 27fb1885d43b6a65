use anyhow::{Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::Path;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use statetaxfinder::cli::{Args, Cli, Commands};
use statetaxfinder::config::{self, AppConfig};
use statetaxfinder::export::{self, ReportSink};
use statetaxfinder::fetch::PageFetcher;
use statetaxfinder::logger::{AnalysisLogger, VerbosityLevel};
use statetaxfinder::oracle::{Oracle, OracleBackend};
use statetaxfinder::pipeline::{PipelineSettings, StateExtractionPipeline};
use statetaxfinder::state_config;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let args = Args::from(&cli);
    let verbosity = VerbosityLevel::from_verbose_count(args.verbose);
    init_tracing(verbosity);

    // Subcommands run before the config file is required
    if let Some(Commands::ExampleConfigs { dir }) = &cli.command {
        let dir = dir
            .clone()
            .or_else(|| args.state_config_dir.clone())
            .unwrap_or_else(configured_state_config_dir);
        let written = state_config::write_example_configs(Path::new(&dir))?;
        if written.is_empty() {
            println!("Example configs already present in {}", dir);
        }
        for path in written {
            println!("✅ Wrote example state config: {}", path.display());
        }
        return Ok(());
    }

    if args.init {
        match AppConfig::create_default_config() {
            Ok(path) => {
                println!("✅ Created default configuration file at: {}", path.display());
                println!("   Edit this file to customize settings, then run statetaxfinder again.");
                std::process::exit(0);
            }
            Err(e) => {
                eprintln!("❌ Failed to create configuration file: {}", e);
                std::process::exit(1);
            }
        }
    }

    let app_config = match AppConfig::load() {
        Ok(cfg) => cfg,
        Err(config::ConfigError::FileNotFound(path)) => {
            // Config not found - prompt to create if interactive
            match AppConfig::prompt_create_config() {
                Ok(Some(created_path)) => {
                    println!("✅ Created default configuration file at: {}", created_path.display());
                    println!("   Edit this file to customize settings, then run statetaxfinder again.");
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
            }
        }
        Err(e) => {
            eprintln!("❌ Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let logger = match &args.log_file {
        Some(log_file_path) => AnalysisLogger::with_log_file(verbosity, log_file_path.clone()),
        None => AnalysisLogger::new(verbosity),
    };

    if let Err(e) = args.validate() {
        logger.error(&format!("Invalid arguments: {}", e));
        std::process::exit(1);
    }

    let state_dir = args
        .state_config_dir
        .clone()
        .unwrap_or_else(|| app_config.extraction.state_config_dir.clone());
    let mut state_set = match state_config::load_state_configs(Path::new(&state_dir)) {
        Ok(set) => set,
        Err(e) => {
            logger.error(&format!("{:#}", e));
            eprintln!("   Run `statetaxfinder example-configs` to create example state configs.");
            std::process::exit(1);
        }
    };

    for error in &state_set.errors {
        logger.info(&format!("Skipped state config: {}", error));
    }
    for code in state_set.select(&args.states) {
        warn!("No state config found for {}; skipping", code);
    }
    if state_set.configs.is_empty() {
        logger.error(&format!("No state configurations to process in {}", state_dir));
        std::process::exit(1);
    }
    state_set.apply_overrides(args.entity_type.as_deref(), args.industry.as_deref());

    let oracle = OracleBackend::from_config(&app_config.oracle, args.model.as_deref(), args.disable_oracle);
    logger.record_oracle(oracle.name());
    if !oracle.is_available() {
        logger.info("Oracle disabled; deriving values with local heuristics only");
    }

    let fetcher = PageFetcher::new(&app_config.http).context("Failed to build HTTP client")?;
    let first = &state_set.configs[0];
    logger.log_initialization(state_set.configs.len(), &first.entity_type, &first.industry);

    let pipeline = StateExtractionPipeline::new(fetcher, oracle, PipelineSettings::from_config(&app_config))
        .with_logger(logger.clone());
    let report = pipeline.run_batch(&state_set.configs).await;

    let sink = ReportSink::new(&app_config.output, args.output_dir.as_deref());
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
    match sink.write_all(&report, &args.export_formats(), &stamp) {
        Ok(written) => {
            for path in written {
                logger.log_export_success(&path.display().to_string());
            }
        }
        Err(e) => {
            logger.error(&format!("Failed to write results to {}: {:#}", sink.output_dir().display(), e));
            std::process::exit(1);
        }
    }

    if verbosity >= VerbosityLevel::Detailed {
        export::print_run_summary(&report);
    }
    logger.print_final_summary();

    if logger.is_log_export_enabled() {
        match logger.export_logs() {
            Ok(()) => {
                if let Some(ref log_file) = args.log_file {
                    println!("📄 Execution logs exported to: {}", log_file);
                    println!("   Total log entries: {}", logger.get_log_count());
                }
            }
            Err(e) => {
                eprintln!("⚠️ Warning: Failed to export logs: {}", e);
            }
        }
    }

    Ok(())
}

/// `RUST_LOG` wins; otherwise the level follows `-v`.
fn init_tracing(verbosity: VerbosityLevel) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("statetaxfinder={}", verbosity.tracing_directive())));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_ansi(std::io::stderr().is_terminal())
        .init();
}

fn configured_state_config_dir() -> String {
    AppConfig::load()
        .or_else(|_| AppConfig::from_toml_str(config::DEFAULT_CONFIG))
        .map(|c| c.extraction.state_config_dir)
        .unwrap_or_else(|_| "state_configs".to_string())
}
