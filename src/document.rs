//! Parsed HTML page with the queries the section locator and extractor need.

use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

// Safety: All .unwrap() calls below are safe because the selector strings are
// compile-time constants containing valid CSS selectors. Selector::parse() only fails
// on malformed CSS selector syntax, which cannot occur with these hardcoded values.
static BODY_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("body").unwrap()
});

/// Tags whose contents are never part of a tax section
const BOILERPLATE_TAGS: [&str; 5] = ["nav", "header", "footer", "script", "style"];

/// Heading levels considered section boundaries
const SECTION_HEADING_TAGS: [&str; 3] = ["h2", "h3", "h4"];

/// A fetched page parsed into a queryable tree.
pub struct HtmlDocument {
    html: Html,
}

impl HtmlDocument {
    pub fn parse(source: &str) -> Self {
        Self {
            html: Html::parse_document(source),
        }
    }

    pub fn html(&self) -> &Html {
        &self.html
    }

    /// Narrow the page to its main content region.
    ///
    /// Selectors are tried in order and the first match wins. Invalid selectors
    /// (e.g. from a hand-written state config) are skipped. Falls back to
    /// `<body>`, then to the document root.
    pub fn content_root<S: AsRef<str>>(&self, selectors: &[S]) -> ElementRef<'_> {
        for raw in selectors {
            let raw = raw.as_ref();
            let selector = match Selector::parse(raw) {
                Ok(s) => s,
                Err(e) => {
                    debug!("Skipping invalid content selector '{}': {:?}", raw, e);
                    continue;
                }
            };
            if let Some(region) = self.html.select(&selector).next() {
                debug!("Content region selected by '{}'", raw);
                return region;
            }
        }

        self.html
            .select(&BODY_SELECTOR)
            .next()
            .unwrap_or_else(|| self.html.root_element())
    }

    /// Find the element carrying the given `id` attribute anywhere in the page.
    pub fn find_by_id(&self, id: &str) -> Option<ElementRef<'_>> {
        elements_in_order(self.html.root_element()).find(|el| el.value().id() == Some(id))
    }
}

/// All elements under `root` (including `root`) in document order.
pub fn elements_in_order(root: ElementRef<'_>) -> impl Iterator<Item = ElementRef<'_>> {
    root.descendants().filter_map(ElementRef::wrap)
}

/// Elements strictly after `start` in document order, skipping `start`'s own subtree.
pub fn elements_after<'a>(root: ElementRef<'a>, start: ElementRef<'a>) -> impl Iterator<Item = ElementRef<'a>> {
    let mut passed = false;
    elements_in_order(root).filter(move |el| {
        if passed {
            return !is_descendant_of(*el, start);
        }
        if *el == start {
            passed = true;
        }
        false
    })
}

/// True when `element` is nested somewhere inside `ancestor`.
pub fn is_descendant_of(element: ElementRef<'_>, ancestor: ElementRef<'_>) -> bool {
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .any(|a| a == ancestor)
}

/// Element tag name, lowercased by the parser.
pub fn tag_name<'a>(element: &ElementRef<'a>) -> &'a str {
    element.value().name()
}

/// h2, h3 or h4
pub fn is_section_heading(element: &ElementRef<'_>) -> bool {
    SECTION_HEADING_TAGS.contains(&tag_name(element))
}

/// Whether the element is, or sits inside, navigation or page chrome.
pub fn is_boilerplate(element: &ElementRef<'_>) -> bool {
    if BOILERPLATE_TAGS.contains(&tag_name(element)) {
        return true;
    }
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .any(|parent| BOILERPLATE_TAGS.contains(&parent.value().name()))
}

/// Text of an element with all runs of whitespace collapsed to single spaces.
pub fn flatten_text(element: &ElementRef<'_>) -> String {
    collapse_whitespace(&element.text().collect::<String>())
}

pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><body>
          <nav><h2>Menu</h2></nav>
          <div class="content">
            <h2 id="first">First</h2>
            <p>Alpha   beta
               gamma</p>
            <table><tr><td>x</td></tr></table>
          </div>
          <footer><p>Footer text</p></footer>
        </body></html>
    "#;

    #[test]
    fn test_content_root_uses_first_matching_selector() {
        let doc = HtmlDocument::parse(PAGE);
        let root = doc.content_root(&["main", ".content"]);
        assert_eq!(tag_name(&root), "div");
    }

    #[test]
    fn test_content_root_falls_back_to_body() {
        let doc = HtmlDocument::parse(PAGE);
        let root = doc.content_root(&["main", "#missing"]);
        assert_eq!(tag_name(&root), "body");
    }

    #[test]
    fn test_content_root_skips_invalid_selector() {
        let doc = HtmlDocument::parse(PAGE);
        let root = doc.content_root(&["[[[", ".content"]);
        assert_eq!(tag_name(&root), "div");
    }

    #[test]
    fn test_find_by_id() {
        let doc = HtmlDocument::parse(PAGE);
        let el = doc.find_by_id("first").unwrap();
        assert_eq!(flatten_text(&el), "First");
        assert!(doc.find_by_id("nope").is_none());
    }

    #[test]
    fn test_flatten_text_collapses_whitespace() {
        let doc = HtmlDocument::parse(PAGE);
        let p = elements_in_order(doc.html().root_element())
            .find(|e| tag_name(e) == "p")
            .unwrap();
        assert_eq!(flatten_text(&p), "Alpha beta gamma");
    }

    #[test]
    fn test_boilerplate_detection() {
        let doc = HtmlDocument::parse(PAGE);
        let root = doc.html().root_element();
        let headings: Vec<_> = elements_in_order(root).filter(is_section_heading).collect();
        assert_eq!(headings.len(), 2);
        assert!(is_boilerplate(&headings[0]));
        assert!(!is_boilerplate(&headings[1]));

        let footer_p = elements_in_order(root)
            .filter(|e| tag_name(e) == "p")
            .last()
            .unwrap();
        assert!(is_boilerplate(&footer_p));
    }

    #[test]
    fn test_elements_after_skips_own_subtree() {
        let doc = HtmlDocument::parse(
            "<div><section id='s'><p>inner</p></section><p>next</p></div>",
        );
        let section = doc.find_by_id("s").unwrap();
        let root = doc.html().root_element();
        let first_p = elements_after(root, section)
            .find(|e| tag_name(e) == "p")
            .unwrap();
        assert_eq!(flatten_text(&first_p), "next");
    }
}
