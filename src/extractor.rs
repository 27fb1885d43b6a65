//! Pulls the body text of a located section out of the page.
//!
//! Tables yield one `" | "`-joined string per row. Headings yield the text of
//! following sibling paragraphs and lists until a stop heading, the visit cap
//! or the block cap is reached.

use crate::document::{self, is_section_heading, tag_name};
use crate::section::{ExtractedSection, ExtractionMode, LocatedSection, SectionSpec, SectionTarget};
use once_cell::sync::Lazy;
use scraper::{ElementRef, Selector};
use tracing::debug;

// Safety: compile-time constant selectors, see document.rs.
static ROW_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("tr").unwrap()
});

static CELL_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("td, th").unwrap()
});

static LIST_ITEM_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("li").unwrap()
});

/// Default number of sibling elements a heading-mode walk may visit
pub const DEFAULT_MAX_VISITS: usize = 10;

/// Extracts section bodies for one state's set of sections.
pub struct SectionBodyExtractor<'s> {
    /// Every section being extracted for the page, used to detect where a body ends
    sections: &'s [SectionSpec],
    max_visits: usize,
}

impl<'s> SectionBodyExtractor<'s> {
    pub fn new(sections: &'s [SectionSpec], max_visits: usize) -> Self {
        Self {
            sections,
            max_visits: max_visits.max(1),
        }
    }

    /// `root` bounds the search for a table following a located heading.
    pub fn extract(&self, located: &LocatedSection<'_>, spec: &SectionSpec, root: ElementRef<'_>) -> ExtractedSection {
        match located.target {
            SectionTarget::Table(table) => extract_table(table, spec),
            SectionTarget::Heading(heading) => {
                if spec.follows_table() {
                    if let Some(table) = self.following_table(root, heading, spec) {
                        debug!("Section {} reads the table following its heading", spec.key);
                        return extract_table(table, spec);
                    }
                }
                self.extract_after_heading(heading, spec)
            }
        }
    }

    /// First `<table>` after `heading`, unless a heading for another section comes first.
    fn following_table<'a>(&self, root: ElementRef<'a>, heading: ElementRef<'a>, spec: &SectionSpec) -> Option<ElementRef<'a>> {
        for el in document::elements_after(root, heading) {
            if tag_name(&el) == "table" {
                return Some(el);
            }
            if is_section_heading(&el) && self.is_boundary(&document::flatten_text(&el), spec) {
                return None;
            }
        }
        None
    }

    fn extract_after_heading(&self, heading: ElementRef<'_>, spec: &SectionSpec) -> ExtractedSection {
        let cap = spec.block_cap();
        let mut blocks: Vec<String> = Vec::new();

        let siblings = heading
            .next_siblings()
            .filter_map(ElementRef::wrap)
            .take(self.max_visits);

        for sibling in siblings {
            if is_section_heading(&sibling) {
                if self.is_boundary(&document::flatten_text(&sibling), spec) {
                    break;
                }
                // A sub-heading inside the section; keep walking.
                continue;
            }

            let text = match tag_name(&sibling) {
                "p" => document::flatten_text(&sibling),
                "ul" | "ol" => sibling
                    .select(&LIST_ITEM_SELECTOR)
                    .map(|li| document::flatten_text(&li))
                    .filter(|t| !t.is_empty())
                    .collect::<Vec<_>>()
                    .join("; "),
                _ => String::new(),
            };

            if !text.is_empty() {
                blocks.push(text);
            }
            if blocks.len() >= cap {
                break;
            }
        }

        if blocks.is_empty() {
            return ExtractedSection::not_found(spec);
        }

        ExtractedSection {
            key: spec.key.clone(),
            mode: ExtractionMode::Narrative,
            blocks,
            found_content: true,
        }
    }

    /// A heading ends the current section when it names a known next section
    /// or carries a keyword of any other section being extracted.
    fn is_boundary(&self, heading_text: &str, spec: &SectionSpec) -> bool {
        let text = heading_text.to_lowercase();

        if spec
            .stop_phrases
            .iter()
            .any(|stop| text.contains(&stop.to_lowercase()))
        {
            return true;
        }

        self.sections
            .iter()
            .filter(|other| other.key != spec.key)
            .flat_map(|other| other.identifying_keywords())
            .any(|kw| !kw.is_empty() && text.contains(&kw.to_lowercase()))
    }
}

/// Every row with at least one non-empty cell, cells joined with `" | "`.
pub fn extract_table(table: ElementRef<'_>, spec: &SectionSpec) -> ExtractedSection {
    let rows: Vec<String> = table
        .select(&ROW_SELECTOR)
        .filter_map(|row| {
            let cells: Vec<String> = row
                .select(&CELL_SELECTOR)
                .map(|cell| document::flatten_text(&cell))
                .collect();
            if cells.iter().all(|c| c.is_empty()) {
                None
            } else {
                Some(cells.join(" | "))
            }
        })
        .collect();

    if rows.is_empty() {
        debug!("Table for section {} has no usable rows", spec.key);
        return ExtractedSection::empty_table(spec);
    }

    ExtractedSection {
        key: spec.key.clone(),
        mode: ExtractionMode::Table,
        blocks: rows,
        found_content: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::HtmlDocument;
    use crate::locator::SectionLocator;
    use crate::section::{default_catalog, SectionKind, CONTENT_NOT_FOUND};

    fn extract_from(html: &str, key: &str) -> ExtractedSection {
        let catalog = default_catalog();
        let spec = catalog.iter().find(|s| s.key == key).unwrap();
        let doc = HtmlDocument::parse(html);
        let root = doc.content_root(&["main"]);
        let located = SectionLocator::new(&doc, root).locate(spec).expect("section located");
        SectionBodyExtractor::new(&catalog, DEFAULT_MAX_VISITS).extract(&located, spec, root)
    }

    #[test]
    fn test_caption_table_rows() {
        let html = r#"<main><table><caption>Business income tax rate</caption>
            <tr><th>Taxpayer</th><th>Rate</th></tr>
            <tr><td>Small businesses</td><td>0.04</td></tr>
            <tr></tr>
            <tr><td> </td><td></td></tr>
            <tr><td>All other general business taxpayers</td><td>0.065</td></tr>
        </table></main>"#;
        let section = extract_from(html, "ENI");
        assert_eq!(section.mode, ExtractionMode::Table);
        assert_eq!(
            section.blocks,
            vec![
                "Taxpayer | Rate",
                "Small businesses | 0.04",
                "All other general business taxpayers | 0.065",
            ]
        );
        assert!(section.found_content);
    }

    #[test]
    fn test_empty_table_sentinel() {
        let html = r#"<main><table><caption>Business income tax rate</caption><tr><td></td></tr></table></main>"#;
        let section = extract_from(html, "ENI");
        assert_eq!(section.blocks, vec!["[ENI table empty]"]);
        assert!(!section.found_content);
    }

    #[test]
    fn test_heading_mode_stops_at_stop_phrase() {
        let html = r#"<main>
            <h3>Entire Net Income</h3>
            <p>First   paragraph.</p>
            <ul><li>one</li><li></li><li>two</li></ul>
            <h3>Business capital base</h3>
            <p>Capital text</p>
        </main>"#;
        let section = extract_from(html, "ENI");
        assert_eq!(section.mode, ExtractionMode::Narrative);
        assert_eq!(section.blocks, vec!["First paragraph.", "one; two"]);
        assert_eq!(section.text(), "First paragraph. one; two");
    }

    #[test]
    fn test_heading_mode_stops_at_other_section_keyword() {
        let mut catalog = default_catalog();
        catalog[0].stop_phrases.clear();
        let spec = catalog[0].clone();
        let html = r#"<main>
            <h3>Entire Net Income</h3>
            <p>ENI text</p>
            <h4>Rates</h4>
            <p>More ENI text</p>
            <h3>About the Fixed Dollar Minimum</h3>
            <p>FDM text</p>
        </main>"#;
        let doc = HtmlDocument::parse(html);
        let root = doc.content_root(&["main"]);
        let located = SectionLocator::new(&doc, root).locate(&spec).unwrap();
        let section = SectionBodyExtractor::new(&catalog, DEFAULT_MAX_VISITS).extract(&located, &spec, root);
        assert_eq!(section.blocks, vec!["ENI text", "More ENI text"]);
    }

    #[test]
    fn test_block_cap_is_never_exceeded() {
        let paragraphs: String = (0..8).map(|i| format!("<p>para {}</p>", i)).collect();
        let html = format!("<main><h3>Entire Net Income</h3>{}</main>", paragraphs);
        let section = extract_from(&html, "ENI");
        assert_eq!(section.blocks.len(), 3);
        assert_eq!(section.blocks[2], "para 2");
    }

    #[test]
    fn test_visit_cap_bounds_walk() {
        let filler: String = (0..12).map(|_| "<div>filler</div>").collect();
        let html = format!("<main><h3>Entire Net Income</h3>{}<p>too far</p></main>", filler);
        let section = extract_from(&html, "ENI");
        assert_eq!(section.blocks, vec![CONTENT_NOT_FOUND]);
        assert!(!section.found_content);
    }

    #[test]
    fn test_visit_cap_counts_elements_only() {
        let filler: String = (0..9).map(|_| "<div>x</div>\n  text node\n").collect();
        let html = format!("<main><h3>Entire Net Income</h3>{}<p>tenth</p></main>", filler);
        let section = extract_from(&html, "ENI");
        assert_eq!(section.blocks, vec!["tenth"]);
    }

    #[test]
    fn test_follow_table_after_paragraph() {
        let html = r#"<main>
            <p>Business capital base</p>
            <table>
              <tr><td>Cooperative housing corporations</td><td>0.04%</td></tr>
              <tr><td>All other taxpayers</td><td>0.1875%</td></tr>
            </table>
        </main>"#;
        let section = extract_from(html, "Capital");
        assert_eq!(section.mode, ExtractionMode::Table);
        assert_eq!(section.blocks.len(), 2);
        assert_eq!(section.blocks[1], "All other taxpayers | 0.1875%");
    }

    #[test]
    fn test_follow_table_does_not_cross_next_section() {
        let html = r#"<main>
            <h3>Business capital base</h3>
            <p>Capital narrative.</p>
            <h3>Fixed dollar minimum tax</h3>
            <table><tr><td>Receipts</td><td>$25</td></tr></table>
        </main>"#;
        let section = extract_from(html, "Capital");
        assert_eq!(section.mode, ExtractionMode::Narrative);
        assert_eq!(section.blocks, vec!["Capital narrative."]);
    }

    #[test]
    fn test_minimum_tax_table_stops_at_s_corporations() {
        let html = r#"<main>
            <h3>Fixed dollar minimum tax for general business taxpayers</h3>
            <p>Graduated by receipts.</p>
            <h3>S corporations</h3>
            <table><tr><td>Receipts not more than $100,000</td><td>$25</td></tr></table>
        </main>"#;
        let section = extract_from(html, "FDM");
        assert_eq!(section.mode, ExtractionMode::Narrative);
        assert_eq!(section.blocks, vec!["Graduated by receipts."]);
    }

    #[test]
    fn test_capital_stops_at_transportation_surcharge() {
        let html = r#"<main>
            <h3>Business capital base</h3>
            <p>Capital narrative.</p>
            <h3>Metropolitan transportation business tax (MTA surcharge)</h3>
            <table><tr><td>All other taxpayers</td><td>30%</td></tr></table>
        </main>"#;
        let section = extract_from(html, "Capital");
        assert_eq!(section.blocks, vec!["Capital narrative."]);
    }

    #[test]
    fn test_minimum_tax_uses_table_cap() {
        let spec = SectionSpec::new("MIN", "Minimum", SectionKind::MinimumTax);
        assert_eq!(spec.block_cap(), 6);
    }
}
