//! Turns extracted section text into a single normalized fact.
//!
//! Local heuristics are always available. When an oracle is configured it is
//! tried first and every oracle failure falls back to the local result for that
//! section only.

use crate::oracle::{parse_oracle_answer, Oracle, OracleAnswer, OracleError};
use crate::section::{ExtractedSection, SectionKind, SectionSpec};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

// Safety: compile-time constant patterns.
static RATE_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\$\s*)?(\d[\d,]*(?:\.\d+)?)\s*(%)?").unwrap()
});

static DOLLAR_AMOUNT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\s*\d").unwrap()
});

/// Value reported when a fact could not be determined
pub const UNRESOLVED_VALUE: &str = "N/A";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DerivationMethod {
    LocalHeuristic,
    LlmDerived,
    Unavailable,
}

impl fmt::Display for DerivationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DerivationMethod::LocalHeuristic => "local-heuristic",
            DerivationMethod::LlmDerived => "llm-derived",
            DerivationMethod::Unavailable => "unavailable",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
    Unknown,
}

impl Confidence {
    pub fn from_label(label: Option<&str>) -> Self {
        match label.map(|l| l.trim().to_lowercase()).as_deref() {
            Some("high") => Confidence::High,
            Some("medium") => Confidence::Medium,
            Some("low") => Confidence::Low,
            _ => Confidence::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FactStatus {
    Resolved,
    Unresolved,
}

/// Why a fact carries no real value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaceholderReason {
    FetchFailure,
    SectionNotFound,
    ValidationMismatch,
    UnparseableResponse,
    NoValue,
}

impl PlaceholderReason {
    pub fn describe(&self) -> &'static str {
        match self {
            PlaceholderReason::FetchFailure => "Not determined: source page could not be fetched",
            PlaceholderReason::SectionNotFound => "Not determined: section not found on source page",
            PlaceholderReason::ValidationMismatch => "Not determined: derived value failed validation",
            PlaceholderReason::UnparseableResponse => "Not determined: oracle response could not be parsed",
            PlaceholderReason::NoValue => "Not determined: no value found in section text",
        }
    }
}

/// One derived answer for one section.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaxFact {
    pub section: String,
    pub value: String,
    /// Client-facing sentence used in the summary column
    pub description: String,
    pub method: DerivationMethod,
    pub confidence: Option<Confidence>,
    pub status: FactStatus,
    pub justification: Option<String>,
    pub placeholder: Option<PlaceholderReason>,
}

impl TaxFact {
    pub fn placeholder(spec: &SectionSpec, reason: PlaceholderReason) -> Self {
        Self {
            section: spec.key.clone(),
            value: UNRESOLVED_VALUE.to_string(),
            description: reason.describe().to_string(),
            method: DerivationMethod::Unavailable,
            confidence: None,
            status: FactStatus::Unresolved,
            justification: None,
            placeholder: Some(reason),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.status == FactStatus::Resolved
    }
}

/// Jurisdiction and taxpayer framing for oracle prompts.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivationContext {
    pub state_name: String,
    pub state_code: String,
    pub entity_type: String,
    pub industry: String,
}

impl DerivationContext {
    /// "C_corp" renders as "C-corp"
    pub fn entity_label(&self) -> String {
        self.entity_type.replace('_', "-")
    }

    /// Suffix used in summaries, e.g. "(C-corp in shipping)"
    pub fn summary_suffix(&self) -> String {
        format!("({} in {})", self.entity_label(), self.industry)
    }
}

/// What happened on the oracle path for one section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OracleStep {
    Skipped,
    Answered,
    FellBack,
}

/// A fact plus the reasoning text recorded for it.
#[derive(Debug, Clone)]
pub struct Derivation {
    pub fact: TaxFact,
    pub reasoning: String,
    pub oracle_step: OracleStep,
}

/// Derives facts using an optional oracle and the local heuristics.
pub struct RateDeriver<'o, O: Oracle> {
    oracle: &'o O,
    timeout: Duration,
    max_prompt_chars: usize,
}

impl<'o, O: Oracle> RateDeriver<'o, O> {
    pub fn new(oracle: &'o O, timeout: Duration, max_prompt_chars: usize) -> Self {
        Self {
            oracle,
            timeout,
            max_prompt_chars,
        }
    }

    pub async fn derive(&self, extracted: &ExtractedSection, spec: &SectionSpec, context: &DerivationContext) -> Derivation {
        if !self.oracle.is_available() || !extracted.found_content {
            let fact = derive_local(extracted, spec);
            let reasoning = format!("Local heuristic: {}", fact.description);
            return Derivation {
                fact,
                reasoning,
                oracle_step: OracleStep::Skipped,
            };
        }

        let prompt = build_prompt(extracted, spec, context, self.max_prompt_chars);
        let secs = self.timeout.as_secs();
        let response = match tokio::time::timeout(self.timeout, self.oracle.complete(&prompt)).await {
            Ok(result) => result,
            Err(_) => Err(OracleError::Timeout(secs)),
        };

        match response {
            Ok(raw) => {
                let fact = interpret_answer(&raw, spec);
                Derivation {
                    fact,
                    reasoning: raw,
                    oracle_step: OracleStep::Answered,
                }
            }
            Err(e) => {
                warn!(
                    "Oracle {} failed for {} {}: {}; using local heuristic",
                    self.oracle.name(),
                    context.state_code,
                    spec.key,
                    e
                );
                let fact = derive_local(extracted, spec);
                let reasoning = format!("Oracle error: {}\nFell back to local heuristic: {}", e, fact.description);
                Derivation {
                    fact,
                    reasoning,
                    oracle_step: OracleStep::FellBack,
                }
            }
        }
    }
}

/// Deterministic derivation from the extracted text alone.
pub fn derive_local(extracted: &ExtractedSection, spec: &SectionSpec) -> TaxFact {
    match spec.kind {
        SectionKind::IncomeRate | SectionKind::CapitalRate => derive_rate(extracted, spec),
        SectionKind::MinimumTax => derive_minimum_tax(extracted, spec),
        SectionKind::Narrative => echo_text(extracted, spec),
    }
}

/// Final `|` field of the last line mentioning "all other".
fn derive_rate(extracted: &ExtractedSection, spec: &SectionSpec) -> TaxFact {
    let rate = extracted
        .lines()
        .into_iter()
        .filter(|line| line.to_lowercase().contains("all other"))
        .last()
        .and_then(|line| line.rsplit('|').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    match rate {
        Some(value) => TaxFact {
            section: spec.key.clone(),
            value: value.to_string(),
            description: format!("General business tax rate is {}", value),
            method: DerivationMethod::LocalHeuristic,
            confidence: None,
            status: FactStatus::Resolved,
            justification: None,
            placeholder: None,
        },
        None => {
            debug!("No 'all other' line in section {}", spec.key);
            TaxFact {
                section: spec.key.clone(),
                value: UNRESOLVED_VALUE.to_string(),
                description: format!("General business tax rate is {}", UNRESOLVED_VALUE),
                method: DerivationMethod::LocalHeuristic,
                confidence: None,
                status: FactStatus::Unresolved,
                justification: None,
                placeholder: Some(PlaceholderReason::NoValue),
            }
        }
    }
}

/// Range of whole-dollar amounts at or above the section floor.
fn derive_minimum_tax(extracted: &ExtractedSection, spec: &SectionSpec) -> TaxFact {
    let floor = spec.value_floor.unwrap_or(0);
    let mut amounts: Vec<u64> = extracted
        .lines()
        .into_iter()
        .filter(|line| line.contains('$'))
        .flat_map(|line| line.split('$').skip(1))
        .filter_map(parse_whole_dollars)
        .filter(|amount| *amount >= floor)
        .collect();
    amounts.sort_unstable();

    match (amounts.first(), amounts.last()) {
        (Some(min), Some(max)) => {
            let range = format!("${} to ${}", format_thousands(*min), format_thousands(*max));
            TaxFact {
                section: spec.key.clone(),
                value: format!("ranges from {}", range),
                description: format!("Graduated by revenue, ranging from {}", range),
                method: DerivationMethod::LocalHeuristic,
                confidence: None,
                status: FactStatus::Resolved,
                justification: None,
                placeholder: None,
            }
        }
        _ => echo_text(extracted, spec),
    }
}

/// A `$`-split field counts only when it is a bare integer once separators are removed.
fn parse_whole_dollars(field: &str) -> Option<u64> {
    let cleaned = field.replace(',', "");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() || !cleaned.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    cleaned.parse().ok()
}

/// Raw section text as the value, never empty.
fn echo_text(extracted: &ExtractedSection, spec: &SectionSpec) -> TaxFact {
    let text = extracted.text();
    let value = if text.trim().is_empty() {
        UNRESOLVED_VALUE.to_string()
    } else {
        text
    };
    TaxFact {
        section: spec.key.clone(),
        description: value.clone(),
        value,
        method: DerivationMethod::LocalHeuristic,
        confidence: Some(Confidence::Low),
        status: FactStatus::Unresolved,
        justification: None,
        placeholder: Some(PlaceholderReason::NoValue),
    }
}

pub fn format_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Prompt framing the section text for the oracle, content capped at `max_chars`.
pub fn build_prompt(extracted: &ExtractedSection, spec: &SectionSpec, context: &DerivationContext, max_chars: usize) -> String {
    let content: String = extracted.text().chars().take(max_chars).collect();
    let entity = context.entity_label();

    let task = match spec.kind {
        SectionKind::IncomeRate | SectionKind::CapitalRate => {
            "Identify the tax rate that applies to general business taxpayers (the \"all other\" category).".to_string()
        }
        SectionKind::MinimumTax => {
            "Identify the minimum tax amounts that apply to general business taxpayers, as a range from the smallest to the largest amount.".to_string()
        }
        SectionKind::Narrative => format!("Summarize what this section says about {}.", spec.name),
    };

    format!(
        "You are a tax analysis expert specializing in {entity} taxation in the {industry} industry.\n\
         Jurisdiction: {state} ({code})\n\
         Section: {section}, a {kind} section.\n\
         Only consider rules that apply to {entity}s; ignore S-corporations, partnerships and special industries such as banks or insurers.\n\n\
         CONTENT TO ANALYZE:\n{content}\n\n\
         {task}\n\n\
         Respond with JSON only, in this structure:\n\
         {{\"value\": \"the rate or range exactly as written in the content\", \"justification\": \"which row or sentence you used\", \"confidence\": \"high/medium/low\"}}\n",
        entity = entity,
        industry = context.industry,
        state = context.state_name,
        code = context.state_code,
        section = spec.display_name(),
        kind = spec.kind.label(),
        content = content,
        task = task,
    )
}

/// Turn a raw oracle response into a fact. Never discards the response: it is
/// kept as the justification when it cannot be parsed or validated.
pub fn interpret_answer(raw: &str, spec: &SectionSpec) -> TaxFact {
    let Some(answer) = parse_oracle_answer(raw) else {
        debug!("Oracle answer for {} is not structured JSON", spec.key);
        return TaxFact {
            section: spec.key.clone(),
            value: UNRESOLVED_VALUE.to_string(),
            description: PlaceholderReason::UnparseableResponse.describe().to_string(),
            method: DerivationMethod::LlmDerived,
            confidence: Some(Confidence::Unknown),
            status: FactStatus::Unresolved,
            justification: Some(raw.trim().to_string()),
            placeholder: Some(PlaceholderReason::UnparseableResponse),
        };
    };

    let justification = if answer.justification.is_empty() {
        None
    } else {
        Some(answer.justification.clone())
    };

    if !validate_answer(&answer, spec) {
        debug!("Oracle value '{}' for {} failed validation", answer.value, spec.key);
        return TaxFact {
            section: spec.key.clone(),
            value: UNRESOLVED_VALUE.to_string(),
            description: PlaceholderReason::ValidationMismatch.describe().to_string(),
            method: DerivationMethod::LlmDerived,
            confidence: Some(Confidence::from_label(answer.confidence.as_deref())),
            status: FactStatus::Unresolved,
            justification,
            placeholder: Some(PlaceholderReason::ValidationMismatch),
        };
    }

    let description = if spec.kind.is_rate() {
        format!("General business tax rate is {}", answer.value)
    } else {
        answer.value.clone()
    };

    TaxFact {
        section: spec.key.clone(),
        value: answer.value,
        description,
        method: DerivationMethod::LlmDerived,
        confidence: Some(Confidence::from_label(answer.confidence.as_deref())),
        status: FactStatus::Resolved,
        justification,
        placeholder: None,
    }
}

/// Configured expected values when present, otherwise a magnitude check by section kind.
pub fn validate_answer(answer: &OracleAnswer, spec: &SectionSpec) -> bool {
    if let Some(rule) = &spec.validation {
        if !rule.expected_values.is_empty() {
            let value = answer.value.as_str();
            let compact = value.replace(',', "");
            return rule
                .expected_values
                .iter()
                .all(|expected| value.contains(expected.as_str()) || compact.contains(&expected.replace(',', "")));
        }
    }

    match spec.kind {
        SectionKind::IncomeRate | SectionKind::CapitalRate => is_plausible_rate(&answer.value),
        SectionKind::MinimumTax => DOLLAR_AMOUNT.is_match(&answer.value),
        SectionKind::Narrative => true,
    }
}

/// The rate token is the first number that is neither a dollar amount nor a
/// bare four-digit year. Percentages must fall within 0..=100, bare decimals within 0..=1.
fn is_plausible_rate(value: &str) -> bool {
    for caps in RATE_NUMBER.captures_iter(value) {
        if caps.get(1).is_some() {
            continue;
        }
        let digits = &caps[2];
        let is_percent = caps.get(3).is_some();
        if !is_percent && digits.len() == 4 && digits.bytes().all(|b| b.is_ascii_digit()) {
            continue;
        }
        let Ok(number) = digits.replace(',', "").parse::<f64>() else {
            continue;
        };
        let limit = if is_percent { 100.0 } else { 1.0 };
        return (0.0..=limit).contains(&number);
    }
    false
}
