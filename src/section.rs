//! Section definitions and the intermediate results produced while locating
//! and extracting them.

use scraper::ElementRef;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Narrative sections stop after this many blocks
pub const NARRATIVE_BLOCK_CAP: usize = 3;
/// Sections known to carry large schedules stop after this many blocks
pub const TABLE_BLOCK_CAP: usize = 6;

/// Returned by heading-mode extraction when nothing could be accumulated
pub const CONTENT_NOT_FOUND: &str = "Content not found or structure changed.";

/// What kind of fact a section yields, which selects the derivation heuristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    /// A flat rate on an income base
    IncomeRate,
    /// A flat rate on a capital base
    CapitalRate,
    /// A minimum tax schedule expressed in dollar amounts
    MinimumTax,
    /// Free text with no derivable value
    Narrative,
}

impl SectionKind {
    pub fn is_rate(&self) -> bool {
        matches!(self, SectionKind::IncomeRate | SectionKind::CapitalRate)
    }

    pub fn label(&self) -> &'static str {
        match self {
            SectionKind::IncomeRate => "income tax rate",
            SectionKind::CapitalRate => "capital base tax rate",
            SectionKind::MinimumTax => "minimum tax",
            SectionKind::Narrative => "narrative",
        }
    }
}

/// Expected values an oracle answer must contain to be accepted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationRule {
    /// Every listed substring must appear in the answer (e.g. "0.065", "$25")
    #[serde(default)]
    pub expected_values: Vec<String>,
}

/// Static description of one tax section to find on a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionSpec {
    /// Short identifier used in `included_fields` (ENI, Capital, FDM)
    pub key: String,
    /// Canonical name, also the last-resort substring match
    pub name: String,
    pub kind: SectionKind,
    #[serde(default)]
    pub anchor: Option<String>,
    /// Marker phrase of a `<caption>` whose table is the section itself
    #[serde(default)]
    pub caption_marker: Option<String>,
    /// Phrases that identify the section heading directly
    #[serde(default)]
    pub aliases: Vec<String>,
    /// All of these fragments must appear in a candidate heading or paragraph
    #[serde(default)]
    pub required_keywords: Vec<String>,
    /// Canonical names of sections known to follow this one
    #[serde(default)]
    pub stop_phrases: Vec<String>,
    /// Extra phrases that identify this section when guarding other sections' bodies
    #[serde(default)]
    pub guard_keywords: Vec<String>,
    #[serde(default)]
    pub block_cap: Option<usize>,
    /// Prefer the first table after the located heading
    #[serde(default)]
    pub follow_table: Option<bool>,
    /// Minimum-tax amounts below this are discarded
    #[serde(default)]
    pub value_floor: Option<u64>,
    #[serde(default)]
    pub validation: Option<ValidationRule>,
}

impl SectionSpec {
    pub fn new(key: &str, name: &str, kind: SectionKind) -> Self {
        Self {
            key: key.to_string(),
            name: name.to_string(),
            kind,
            anchor: None,
            caption_marker: None,
            aliases: Vec::new(),
            required_keywords: Vec::new(),
            stop_phrases: Vec::new(),
            guard_keywords: Vec::new(),
            block_cap: None,
            follow_table: None,
            value_floor: None,
            validation: None,
        }
    }

    pub fn block_cap(&self) -> usize {
        self.block_cap.unwrap_or(match self.kind {
            SectionKind::MinimumTax => TABLE_BLOCK_CAP,
            _ => NARRATIVE_BLOCK_CAP,
        })
    }

    pub fn follows_table(&self) -> bool {
        self.follow_table.unwrap_or(matches!(
            self.kind,
            SectionKind::CapitalRate | SectionKind::MinimumTax
        ))
    }

    /// Phrases that mark a heading as belonging to this section
    pub fn identifying_keywords(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str()).chain(self.guard_keywords.iter().map(String::as_str))
    }

    /// Label used in output, e.g. "ENI (Entire Net Income)"
    pub fn display_name(&self) -> String {
        if self.key.eq_ignore_ascii_case(&self.name) {
            self.name.clone()
        } else {
            format!("{} ({})", self.key, self.name)
        }
    }
}

/// The sections extracted when a state config does not override them.
pub fn default_catalog() -> Vec<SectionSpec> {
    let mut eni = SectionSpec::new("ENI", "Entire Net Income", SectionKind::IncomeRate);
    eni.anchor = Some("eni".to_string());
    eni.caption_marker = Some("Business income tax rate".to_string());
    eni.aliases = vec!["business income tax rate".to_string()];
    eni.stop_phrases = vec!["Capital Base".to_string(), "Fixed Dollar Minimum".to_string()];
    // The anchor usually lands on a heading whose rates sit in a captioned table.
    eni.follow_table = Some(true);

    let mut capital = SectionSpec::new("Capital", "Capital Base", SectionKind::CapitalRate);
    capital.required_keywords = vec!["business".to_string(), "capital".to_string()];
    capital.stop_phrases = vec![
        "Fixed Dollar Minimum".to_string(),
        "Metropolitan transportation business tax".to_string(),
    ];

    let mut fdm = SectionSpec::new("FDM", "Fixed Dollar Minimum", SectionKind::MinimumTax);
    fdm.aliases = vec!["fixed dollar minimum tax for general business taxpayers".to_string()];
    fdm.stop_phrases = vec![
        "Metropolitan transportation business tax".to_string(),
        "S corporations".to_string(),
    ];
    fdm.value_floor = Some(25);

    vec![eni, capital, fdm]
}

/// Which locator strategy produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    Anchor,
    Caption,
    Alias,
    Fuzzy,
}

impl fmt::Display for MatchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MatchStrategy::Anchor => "anchor",
            MatchStrategy::Caption => "caption",
            MatchStrategy::Alias => "alias",
            MatchStrategy::Fuzzy => "fuzzy",
        };
        f.write_str(s)
    }
}

/// What the locator pointed at.
#[derive(Debug, Clone, Copy)]
pub enum SectionTarget<'a> {
    /// A heading or paragraph introducing the section
    Heading(ElementRef<'a>),
    /// A table that is the section body
    Table(ElementRef<'a>),
}

/// A section found in a document. Borrows from the parsed page.
#[derive(Debug, Clone, Copy)]
pub struct LocatedSection<'a> {
    pub target: SectionTarget<'a>,
    pub strategy: MatchStrategy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMode {
    Table,
    Narrative,
}

/// Content blocks belonging to a located section.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractedSection {
    pub key: String,
    pub mode: ExtractionMode,
    /// Table rows ("a | b | c") or paragraph/list text, in document order
    pub blocks: Vec<String>,
    /// False when `blocks` holds only a sentinel
    pub found_content: bool,
}

impl ExtractedSection {
    pub fn empty_table(spec: &SectionSpec) -> Self {
        Self {
            key: spec.key.clone(),
            mode: ExtractionMode::Table,
            blocks: vec![format!("[{} table empty]", spec.key)],
            found_content: false,
        }
    }

    pub fn not_found(spec: &SectionSpec) -> Self {
        Self {
            key: spec.key.clone(),
            mode: ExtractionMode::Narrative,
            blocks: vec![CONTENT_NOT_FOUND.to_string()],
            found_content: false,
        }
    }

    /// Table rows one per line; narrative blocks joined with a single space.
    pub fn text(&self) -> String {
        match self.mode {
            ExtractionMode::Table => self.blocks.join("\n"),
            ExtractionMode::Narrative => self.blocks.join(" "),
        }
    }

    pub fn lines(&self) -> Vec<&str> {
        match self.mode {
            ExtractionMode::Table => self.blocks.iter().map(String::as_str).collect(),
            ExtractionMode::Narrative => self
                .blocks
                .iter()
                .flat_map(|b| b.lines())
                .collect(),
        }
    }
}
