//! Per-state orchestration: fetch, locate, extract, derive.
//!
//! Each state runs in isolation. Nothing that happens while processing one
//! state (fetch errors, missing sections, oracle failures) escapes as an
//! error; it becomes a placeholder fact and an audit line instead.

use crate::config::AppConfig;
use crate::deriver::{OracleStep, PlaceholderReason, RateDeriver, TaxFact};
use crate::document::HtmlDocument;
use crate::extractor::SectionBodyExtractor;
use crate::fetch::{FetchFailure, PageFetcher};
use crate::locator::SectionLocator;
use crate::logger::AnalysisLogger;
use crate::oracle::Oracle;
use crate::section::{ExtractedSection, MatchStrategy, SectionSpec};
use crate::state_config::StateConfig;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info};

/// Tunables taken from the application config.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub content_selectors: Vec<String>,
    pub max_visited_elements: usize,
    pub oracle_timeout: Duration,
    pub max_prompt_chars: usize,
}

impl PipelineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            content_selectors: config.extraction.content_selectors.clone(),
            max_visited_elements: config.extraction.max_visited_elements,
            oracle_timeout: Duration::from_secs(config.oracle.timeout_secs),
            max_prompt_chars: config.oracle.max_prompt_chars,
        }
    }
}

/// Facts for one state, in section order. Section keys are unique.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateResult {
    pub state_code: String,
    pub facts: Vec<TaxFact>,
}

impl StateResult {
    pub fn fact(&self, section: &str) -> Option<&TaxFact> {
        self.facts.iter().find(|f| f.section == section)
    }

    pub fn resolved_count(&self) -> usize {
        self.facts.iter().filter(|f| f.is_resolved()).count()
    }

    pub fn unresolved_count(&self) -> usize {
        self.facts.len() - self.resolved_count()
    }
}

/// Free-text reasoning trail for one state. Written out, never parsed back.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditEntry {
    pub state_code: String,
    blocks: Vec<String>,
}

impl AuditEntry {
    pub fn new(state_code: &str) -> Self {
        Self {
            state_code: state_code.to_string(),
            blocks: Vec::new(),
        }
    }

    pub fn record(&mut self, heading: &str, text: &str) {
        self.blocks.push(format!("--- {} ---\n{}", heading, text.trim_end()));
    }

    pub fn render(&self) -> String {
        self.blocks.join("\n\n")
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// Section text as extracted, kept for the raw-sections dump.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawSection {
    pub key: String,
    pub label: String,
    pub strategy: Option<MatchStrategy>,
    pub text: String,
}

/// Result of locating and extracting one section, before derivation.
#[derive(Debug, Clone)]
pub struct SectionExtraction {
    pub spec: SectionSpec,
    pub strategy: Option<MatchStrategy>,
    pub extracted: Option<ExtractedSection>,
}

/// Everything produced for one state.
#[derive(Debug, Clone)]
pub struct StateOutcome {
    pub config: StateConfig,
    pub result: StateResult,
    pub audit: AuditEntry,
    /// URL that served the page, if any did
    pub source_url: Option<String>,
    pub raw_sections: Vec<RawSection>,
    pub fetch_failure: Option<FetchFailure>,
    pub oracle_calls: usize,
    pub oracle_fallbacks: usize,
}

impl StateOutcome {
    pub fn fetched(&self) -> bool {
        self.fetch_failure.is_none()
    }
}

/// Outcomes for every state of a run, in input order.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub outcomes: Vec<StateOutcome>,
}

impl BatchReport {
    pub fn states_failed(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.fetched()).count()
    }

    pub fn sections_resolved(&self) -> usize {
        self.outcomes.iter().map(|o| o.result.resolved_count()).sum()
    }

    pub fn sections_unresolved(&self) -> usize {
        self.outcomes.iter().map(|o| o.result.unresolved_count()).sum()
    }
}

/// Locate and extract every section of a page. Synchronous so the parsed
/// document never lives across an await point.
pub fn extract_sections(
    html: &str,
    sections: &[SectionSpec],
    content_selectors: &[String],
    max_visited_elements: usize,
) -> Vec<SectionExtraction> {
    let document = HtmlDocument::parse(html);
    let root = document.content_root(content_selectors);
    let locator = SectionLocator::new(&document, root);
    let extractor = SectionBodyExtractor::new(sections, max_visited_elements);

    sections
        .iter()
        .map(|spec| match locator.locate(spec) {
            Some(located) => SectionExtraction {
                spec: spec.clone(),
                strategy: Some(located.strategy),
                extracted: Some(extractor.extract(&located, spec, root)),
            },
            None => SectionExtraction {
                spec: spec.clone(),
                strategy: None,
                extracted: None,
            },
        })
        .collect()
}

/// Runs the extraction for a batch of states, one at a time.
pub struct StateExtractionPipeline<O: Oracle> {
    fetcher: PageFetcher,
    oracle: O,
    settings: PipelineSettings,
    logger: Option<AnalysisLogger>,
}

impl<O: Oracle> StateExtractionPipeline<O> {
    pub fn new(fetcher: PageFetcher, oracle: O, settings: PipelineSettings) -> Self {
        Self {
            fetcher,
            oracle,
            settings,
            logger: None,
        }
    }

    /// Report progress and per-state results through the run logger.
    pub fn with_logger(mut self, logger: AnalysisLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    /// Best effort across all states: every config yields exactly one outcome.
    pub async fn run_batch(&self, configs: &[StateConfig]) -> BatchReport {
        if let Some(logger) = &self.logger {
            logger.start_progress(configs.len() as u64).await;
        }

        let mut report = BatchReport::default();
        for config in configs {
            if let Some(logger) = &self.logger {
                logger.update_progress(&format!("Processing {}", config.state_name)).await;
            }

            let outcome = self.run_state(config).await;

            if let Some(logger) = &self.logger {
                logger.log_state_complete(&outcome);
                logger.advance_progress(1).await;
            }
            report.outcomes.push(outcome);
        }

        if let Some(logger) = &self.logger {
            logger
                .finish_progress(&format!("Processed {} state(s)", report.outcomes.len()))
                .await;
        }
        report
    }

    /// Fetch one state's page (primary, then backups) and derive all its sections.
    pub async fn run_state(&self, config: &StateConfig) -> StateOutcome {
        info!("Processing {} ({})", config.state_name, config.state_code);
        let sections = config.sections();

        match self.fetcher.fetch_first(config.urls()).await {
            Ok(page) => {
                let mut outcome = self.extract_from_html(config, &page.html).await;
                outcome.source_url = Some(page.url);
                outcome
            }
            Err(failure) => fetch_failure_outcome(config, &sections, failure),
        }
    }

    /// Derive all sections of a state from an already-fetched page.
    pub async fn extract_from_html(&self, config: &StateConfig, html: &str) -> StateOutcome {
        let sections = config.sections();
        let selectors = config.content_selectors(&self.settings.content_selectors);
        let extractions = extract_sections(html, &sections, &selectors, self.settings.max_visited_elements);

        let deriver = RateDeriver::new(&self.oracle, self.settings.oracle_timeout, self.settings.max_prompt_chars);
        let context = config.context();

        let mut facts = Vec::with_capacity(extractions.len());
        let mut audit = AuditEntry::new(&config.state_code);
        let mut raw_sections = Vec::with_capacity(extractions.len());
        let mut oracle_calls = 0;
        let mut oracle_fallbacks = 0;

        for extraction in extractions {
            let spec = &extraction.spec;
            let label = spec.display_name();

            let Some(extracted) = extraction.extracted else {
                debug!("{}: {} not found, recording placeholder", config.state_code, spec.key);
                let fact = TaxFact::placeholder(spec, PlaceholderReason::SectionNotFound);
                audit.record(&label, &fact.description);
                raw_sections.push(RawSection {
                    key: spec.key.clone(),
                    label,
                    strategy: None,
                    text: "[section not found]".to_string(),
                });
                facts.push(fact);
                continue;
            };

            let derivation = deriver.derive(&extracted, spec, &context).await;
            match derivation.oracle_step {
                OracleStep::Answered => oracle_calls += 1,
                OracleStep::FellBack => {
                    oracle_calls += 1;
                    oracle_fallbacks += 1;
                }
                OracleStep::Skipped => {}
            }

            audit.record(&label, &derivation.reasoning);
            raw_sections.push(RawSection {
                key: spec.key.clone(),
                label,
                strategy: extraction.strategy,
                text: extracted.text(),
            });
            facts.push(derivation.fact);
        }

        StateOutcome {
            config: config.clone(),
            result: StateResult {
                state_code: config.state_code.clone(),
                facts,
            },
            audit,
            source_url: None,
            raw_sections,
            fetch_failure: None,
            oracle_calls,
            oracle_fallbacks,
        }
    }
}

/// Placeholder for every section when no URL could be fetched.
fn fetch_failure_outcome(config: &StateConfig, sections: &[SectionSpec], failure: FetchFailure) -> StateOutcome {
    let mut audit = AuditEntry::new(&config.state_code);
    let detail: Vec<String> = failure.attempts.iter().map(|e| e.to_string()).collect();
    audit.record("Fetch", &format!("All URLs failed:\n{}", detail.join("\n")));

    let facts = sections
        .iter()
        .map(|spec| TaxFact::placeholder(spec, PlaceholderReason::FetchFailure))
        .collect();

    StateOutcome {
        config: config.clone(),
        result: StateResult {
            state_code: config.state_code.clone(),
            facts,
        },
        audit,
        source_url: None,
        raw_sections: Vec::new(),
        fetch_failure: Some(failure),
        oracle_calls: 0,
        oracle_fallbacks: 0,
    }
}
