pub mod cli;
pub mod config;
pub mod deriver;
pub mod document;
pub mod export;
pub mod extractor;
pub mod fetch;
pub mod locator;
pub mod logger;
pub mod oracle;
pub mod pipeline;
pub mod section;
pub mod state_config;

pub use config::AppConfig;
pub use deriver::{DerivationMethod, FactStatus, PlaceholderReason, TaxFact};
pub use oracle::{GeminiOracle, Oracle, OracleBackend, OracleError};
pub use pipeline::{BatchReport, StateExtractionPipeline, StateOutcome, StateResult};
pub use section::{default_catalog, SectionKind, SectionSpec};
pub use state_config::{load_state_configs, StateConfig, StateConfigSet};
