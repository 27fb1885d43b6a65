use clap::{Parser, Subcommand};

/// Output formats accepted by `--format`
pub const OUTPUT_FORMATS: [&str; 4] = ["xlsx", "csv", "json", "all"];

#[derive(Parser, Debug)]
#[command(name = "statetaxfinder")]
#[command(about = "Extracts corporate tax-rate facts from US state tax agency web pages into a spreadsheet")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Create default configuration file at ./config/statetaxfinder.toml
    #[arg(long, global = true)]
    pub init: bool,

    /// Directory of per-state config files (overrides config)
    #[arg(long, alias = "config-dir", value_name = "DIR")]
    pub state_config_dir: Option<String>,

    /// State codes to process, e.g. --states NY CA (default: every config found)
    #[arg(short, long, num_args = 1.., value_name = "CODE")]
    pub states: Vec<String>,

    /// Entity type applied to every state (C_corp, S_corp, LLC, ...)
    #[arg(long)]
    pub entity_type: Option<String>,

    /// Industry applied to every state (shipping, manufacturing, retail, ...)
    #[arg(long)]
    pub industry: Option<String>,

    /// Output directory for results (overrides config)
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<String>,

    /// Output format: 'xlsx' (default), 'csv', 'json', or 'all'
    #[arg(short = 'f', long, default_value = "xlsx")]
    pub format: String,

    /// Use local heuristics only, never call the oracle
    #[arg(long)]
    pub disable_oracle: bool,

    /// Oracle model name (overrides environment and config)
    #[arg(long)]
    pub model: Option<String>,

    /// Verbose logging (use -v for INFO, -vv for DEBUG with per-section details)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Export execution logs to a file (specify file path)
    #[arg(long)]
    pub log_file: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write example New York and California state configs
    ExampleConfigs {
        /// Target directory (defaults to the configured state config directory)
        #[arg(long, value_name = "DIR")]
        dir: Option<String>,
    },
}

// Flattened view of the top-level flags used by the run
#[derive(Debug)]
pub struct Args {
    pub init: bool,
    pub state_config_dir: Option<String>,
    pub states: Vec<String>,
    pub entity_type: Option<String>,
    pub industry: Option<String>,
    pub output_dir: Option<String>,
    pub format: String,
    pub disable_oracle: bool,
    pub model: Option<String>,
    pub verbose: u8,
    pub log_file: Option<String>,
}

impl From<&Cli> for Args {
    fn from(cli: &Cli) -> Self {
        Args {
            init: cli.init,
            state_config_dir: cli.state_config_dir.clone(),
            states: cli.states.iter().map(|s| s.trim().to_uppercase()).collect(),
            entity_type: cli.entity_type.clone(),
            industry: cli.industry.clone(),
            output_dir: cli.output_dir.clone(),
            format: cli.format.to_lowercase(),
            disable_oracle: cli.disable_oracle,
            model: cli.model.clone(),
            verbose: cli.verbose,
            log_file: cli.log_file.clone(),
        }
    }
}

impl Args {
    pub fn validate(&self) -> Result<(), String> {
        if !OUTPUT_FORMATS.contains(&self.format.as_str()) {
            return Err("Output format must be 'xlsx', 'csv', 'json', or 'all'".to_string());
        }

        if let Some(code) = self.states.iter().find(|s| s.is_empty() || !s.chars().all(|c| c.is_ascii_alphanumeric())) {
            return Err(format!("Invalid state code '{}'", code));
        }

        for (flag, value) in [("--entity-type", &self.entity_type), ("--industry", &self.industry), ("--model", &self.model)] {
            if matches!(value, Some(v) if v.trim().is_empty()) {
                return Err(format!("{} cannot be empty", flag));
            }
        }

        Ok(())
    }

    /// Formats to write for the selected `--format`
    pub fn export_formats(&self) -> Vec<&'static str> {
        match self.format.as_str() {
            "all" => vec!["xlsx", "csv", "json"],
            "csv" => vec!["csv"],
            "json" => vec!["json"],
            _ => vec!["xlsx"],
        }
    }
}
