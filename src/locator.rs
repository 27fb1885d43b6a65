//! Finds the heading, paragraph or table that introduces a tax section.
//!
//! Strategies are tried in a fixed order and the first one that applies wins:
//! anchor id, table caption, alias phrase, required keywords, canonical name.
//! Within a strategy the first match in document order wins.

use crate::document::{self, HtmlDocument};
use crate::section::{LocatedSection, MatchStrategy, SectionSpec, SectionTarget};
use once_cell::sync::Lazy;
use scraper::{ElementRef, Selector};
use tracing::debug;

// Safety: compile-time constant selector, see document.rs.
static CAPTION_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("caption").unwrap()
});

type Strategy<'d> = fn(&SectionLocator<'d>, &SectionSpec) -> Option<LocatedSection<'d>>;

/// Locates sections within one parsed page.
pub struct SectionLocator<'d> {
    document: &'d HtmlDocument,
    root: ElementRef<'d>,
}

impl<'d> SectionLocator<'d> {
    /// `root` limits the caption, alias and name searches; anchors are looked up page-wide.
    pub fn new(document: &'d HtmlDocument, root: ElementRef<'d>) -> Self {
        Self { document, root }
    }

    /// Returns `None` when no strategy applies. Callers record a placeholder fact.
    pub fn locate(&self, spec: &SectionSpec) -> Option<LocatedSection<'d>> {
        let strategies: [Strategy<'d>; 5] = [
            Self::by_anchor,
            Self::by_caption,
            Self::by_alias,
            Self::by_required_keywords,
            Self::by_name,
        ];

        for strategy in strategies {
            if let Some(found) = strategy(self, spec) {
                debug!("Located section {} via {} match", spec.key, found.strategy);
                return Some(found);
            }
        }

        debug!("Section {} not found on page", spec.key);
        None
    }

    /// First non-boilerplate h2-h4 at or after the anchor element in document order.
    fn by_anchor(&self, spec: &SectionSpec) -> Option<LocatedSection<'d>> {
        let anchor_id = spec.anchor.as_deref()?;
        let anchor = self.document.find_by_id(anchor_id)?;

        document::elements_in_order(self.document.html().root_element())
            .skip_while(|el| *el != anchor)
            .filter(|el| !document::is_boilerplate(el))
            .find(document::is_section_heading)
            .map(|heading| LocatedSection {
                target: SectionTarget::Heading(heading),
                strategy: MatchStrategy::Anchor,
            })
    }

    /// Table whose caption contains the marker phrase.
    fn by_caption(&self, spec: &SectionSpec) -> Option<LocatedSection<'d>> {
        let marker = spec.caption_marker.as_deref()?.to_lowercase();

        self.root
            .select(&CAPTION_SELECTOR)
            .filter(|caption| document::flatten_text(caption).to_lowercase().contains(&marker))
            .find_map(|caption| {
                caption
                    .ancestors()
                    .filter_map(ElementRef::wrap)
                    .find(|a| document::tag_name(a) == "table")
            })
            .map(|table| LocatedSection {
                target: SectionTarget::Table(table),
                strategy: MatchStrategy::Caption,
            })
    }

    fn by_alias(&self, spec: &SectionSpec) -> Option<LocatedSection<'d>> {
        if spec.aliases.is_empty() {
            return None;
        }
        let aliases: Vec<String> = spec.aliases.iter().map(|a| a.to_lowercase()).collect();
        self.first_candidate(MatchStrategy::Alias, |text| {
            aliases.iter().any(|alias| text.contains(alias.as_str()))
        })
    }

    fn by_required_keywords(&self, spec: &SectionSpec) -> Option<LocatedSection<'d>> {
        if spec.required_keywords.is_empty() {
            return None;
        }
        let keywords: Vec<String> = spec.required_keywords.iter().map(|k| k.to_lowercase()).collect();
        self.first_candidate(MatchStrategy::Alias, |text| {
            keywords.iter().all(|kw| text.contains(kw.as_str()))
        })
    }

    fn by_name(&self, spec: &SectionSpec) -> Option<LocatedSection<'d>> {
        let name = spec.name.trim().to_lowercase();
        if name.is_empty() {
            return None;
        }
        self.first_candidate(MatchStrategy::Fuzzy, |text| text.contains(name.as_str()))
    }

    /// First non-boilerplate h2-h4 or `<p>` whose lowercased text satisfies `matches`.
    fn first_candidate<F>(&self, strategy: MatchStrategy, matches: F) -> Option<LocatedSection<'d>>
    where
        F: Fn(&str) -> bool,
    {
        document::elements_in_order(self.root)
            .filter(|el| document::is_section_heading(el) || document::tag_name(el) == "p")
            .filter(|el| !document::is_boilerplate(el))
            .find(|el| matches(&document::flatten_text(el).to_lowercase()))
            .map(|el| LocatedSection {
                target: SectionTarget::Heading(el),
                strategy,
            })
    }
}
