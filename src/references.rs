use crate::model::Reference;
use regex::Regex;
use scraper::node::Node;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::debug;
use url::Url;

pub const SCRIPTURE_LINK_PREFIX: &str = "/bible/";
pub const MAX_ANCESTOR_DEPTH: usize = 5;

pub const READING_SELECTORS: [&str; 10] = [
    "[data-test=readings]",
    ".readings",
    ".reading-list",
    ".plan-readings",
    "#readings",
    "main .readings",
    "article .readings",
    "pre code",
    "code",
    "pre",
];

const WINDOW_BOUNDARIES: [&str; 3] = ["start this plan", "about this plan", "day "];
const WINDOW_FALLBACK_LEN: usize = 600;

pub const CANONICAL_BOOKS: [&str; 66] = [
    "Genesis",
    "Exodus",
    "Leviticus",
    "Numbers",
    "Deuteronomy",
    "Joshua",
    "Judges",
    "Ruth",
    "1 Samuel",
    "2 Samuel",
    "1 Kings",
    "2 Kings",
    "1 Chronicles",
    "2 Chronicles",
    "Ezra",
    "Nehemiah",
    "Esther",
    "Job",
    "Psalms",
    "Proverbs",
    "Ecclesiastes",
    "Song of Songs",
    "Isaiah",
    "Jeremiah",
    "Lamentations",
    "Ezekiel",
    "Daniel",
    "Hosea",
    "Joel",
    "Amos",
    "Obadiah",
    "Jonah",
    "Micah",
    "Nahum",
    "Habakkuk",
    "Zephaniah",
    "Haggai",
    "Zechariah",
    "Malachi",
    "Matthew",
    "Mark",
    "Luke",
    "John",
    "Acts",
    "Romans",
    "1 Corinthians",
    "2 Corinthians",
    "Galatians",
    "Ephesians",
    "Philippians",
    "Colossians",
    "1 Thessalonians",
    "2 Thessalonians",
    "1 Timothy",
    "2 Timothy",
    "Titus",
    "Philemon",
    "Hebrews",
    "James",
    "1 Peter",
    "2 Peter",
    "1 John",
    "2 John",
    "3 John",
    "Jude",
    "Revelation",
];

const BOOK_ALIASES: [&str; 3] = ["Psalm", "Song of Solomon", "Song"];

// Longest names first so "Song of Songs" wins over "Song" and "1 John" over "John".
static BOOK_ALTERNATION: LazyLock<String> = LazyLock::new(|| {
    let mut names: Vec<&str> = CANONICAL_BOOKS.iter().chain(BOOK_ALIASES.iter()).copied().collect();
    names.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
    names
        .iter()
        .map(|name| regex::escape(name).replace(' ', r"\s+"))
        .collect::<Vec<_>>()
        .join("|")
});

static BOOK_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\b({})\s+(\d+(?:\s*[-–—]\s*\d+)?)\b",
        *BOOK_ALTERNATION
    ))
    .expect("book reference regex must be valid")
});

static LEADING_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)^({})\s+(\d+(?:\s*[-–—]\s*\d+)?)\b",
        *BOOK_ALTERNATION
    ))
    .expect("leading reference regex must be valid")
});

static BOOK_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(Genesis|Exodus|Leviticus|Numbers|Deuteronomy|Joshua|Judges|Ruth|Samuel|Kings|Chronicles|Ezra|Nehemiah|Esther|Job|Psalms?|Proverbs|Ecclesiastes|Song|Isaiah|Jeremiah|Lamentations|Ezekiel|Daniel|Hosea|Joel|Amos|Obadiah|Jonah|Micah|Nahum|Habakkuk|Zephaniah|Haggai|Zechariah|Malachi|Matthew|Mark|Luke|John|Acts|Romans|Corinthians|Galatians|Ephesians|Philippians|Colossians|Thessalonians|Timothy|Titus|Philemon|Hebrews|James|Peter|Jude|Revelation)\b",
    )
    .expect("book token regex must be valid")
});

static SEPARATORS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\s*[•·,|;]\s*").expect("separator regex must be valid")
});

static DASHES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*[–—]\s*").expect("dash regex must be valid"));

static SENTENCE_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]\s+|\n+").expect("sentence regex must be valid"));

static DIGIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d").expect("digit regex must be valid"));

static HEADINGS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h1, h2, h3, h4").expect("heading selector must be valid"));

static ANCHORS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("anchor selector must be valid"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    ScriptureHeading,
    ReadingSelectors,
    ScriptureWindow,
    WholePage,
}

pub const STRATEGY_CHAIN: [Strategy; 4] = [
    Strategy::ScriptureHeading,
    Strategy::ReadingSelectors,
    Strategy::ScriptureWindow,
    Strategy::WholePage,
];

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::ScriptureHeading => "scripture_heading",
            Strategy::ReadingSelectors => "reading_selectors",
            Strategy::ScriptureWindow => "scripture_window",
            Strategy::WholePage => "whole_page",
        }
    }

    fn apply(self, page: &Page) -> Vec<Reference> {
        match self {
            Strategy::ScriptureHeading => from_scripture_heading(&page.doc),
            Strategy::ReadingSelectors => from_reading_selectors(&page.doc),
            Strategy::ScriptureWindow => from_scripture_window(&page.text),
            Strategy::WholePage => from_whole_page(&page.text),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub strategy: Strategy,
    pub references: Vec<Reference>,
}

struct Page {
    doc: Html,
    text: String,
}

impl Page {
    fn parse(html: &str) -> Self {
        let doc = Html::parse_document(html);
        let text = flatten_text(&doc);
        Self { doc, text }
    }
}

/// Runs the strategy chain and returns the first non-empty result.
pub fn extract_references(html: &str) -> Option<Extraction> {
    let page = Page::parse(html);

    for strategy in STRATEGY_CHAIN {
        let references = strategy.apply(&page);
        if !references.is_empty() {
            debug!(
                strategy = strategy.name(),
                references = references.len(),
                "references extracted"
            );
            return Some(Extraction {
                strategy,
                references,
            });
        }
    }

    None
}

/// Normalizes one reference: numeric prefix kept, `Psalm` and the `Song`
/// variants unified, words title-cased, chapter ranges joined by an en dash.
pub fn normalize_reference(text: &str) -> Option<Reference> {
    let collapsed = collapse_whitespace(text);
    let caps = LEADING_REFERENCE.captures(&collapsed)?;

    let book = canonical_book_name(caps.get(1)?.as_str());
    let chapter = DASHES
        .replace_all(&caps.get(2)?.as_str().replace('-', "–"), "–")
        .split_whitespace()
        .collect::<String>();

    let normalized = format!("{book} {chapter}");
    Some(Reference::new(normalized))
}

/// Collapses whitespace and rewrites list separators to `"; "` and long
/// dashes to an en dash.
pub fn normalize_readings(text: &str) -> String {
    let collapsed = collapse_whitespace(text);
    let separated = SEPARATORS.replace_all(&collapsed, "; ");
    DASHES.replace_all(&separated, "–").trim().to_string()
}

pub fn mentions_book(text: &str) -> bool {
    BOOK_TOKEN.is_match(text)
}

/// Every `<Book> <chapter>[-<chapter>]` match in `text`, normalized and unique.
pub fn scan_book_references(text: &str) -> Vec<Reference> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for caps in BOOK_REFERENCE.captures_iter(text) {
        let (Some(book), Some(chapter)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let candidate = format!("{} {}", book.as_str(), chapter.as_str());
        if let Some(reference) = normalize_reference(&candidate) {
            push_unique(&mut out, &mut seen, reference);
        }
    }

    out
}

fn from_scripture_heading(doc: &Html) -> Vec<Reference> {
    for heading in doc.select(&HEADINGS) {
        let title = element_text(heading).to_ascii_lowercase();
        if !title.contains("scripture") {
            continue;
        }
        let Some(container) = scripture_container(heading) else {
            continue;
        };

        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for anchor in container.select(&ANCHORS) {
            if !is_scripture_link(anchor.value().attr("href")) {
                continue;
            }
            if let Some(reference) = normalize_reference(&element_text(anchor)) {
                push_unique(&mut out, &mut seen, reference);
            }
        }

        if !out.is_empty() {
            return out;
        }
    }

    Vec::new()
}

fn scripture_container(heading: ElementRef<'_>) -> Option<ElementRef<'_>> {
    heading
        .ancestors()
        .filter_map(ElementRef::wrap)
        .take(MAX_ANCESTOR_DEPTH)
        .find(|candidate| {
            candidate
                .select(&ANCHORS)
                .any(|anchor| is_scripture_link(anchor.value().attr("href")))
        })
}

fn is_scripture_link(href: Option<&str>) -> bool {
    let Some(href) = href.map(str::trim) else {
        return false;
    };
    if href.starts_with(SCRIPTURE_LINK_PREFIX) {
        return true;
    }
    Url::parse(href).is_ok_and(|url| url.path().starts_with(SCRIPTURE_LINK_PREFIX))
}

fn from_reading_selectors(doc: &Html) -> Vec<Reference> {
    for css in READING_SELECTORS {
        let Ok(selector) = Selector::parse(css) else {
            continue;
        };
        let Some(element) = doc.select(&selector).next() else {
            continue;
        };
        let text = element_text(element);
        if text.is_empty() || !mentions_book(&text) {
            continue;
        }

        let references = split_readings(&normalize_readings(&text));
        if !references.is_empty() {
            return references;
        }
    }

    Vec::new()
}

fn from_scripture_window(text: &str) -> Vec<Reference> {
    let lower = text.to_ascii_lowercase();
    let Some(start) = lower.find("scripture") else {
        return Vec::new();
    };
    let after = start + "scripture".len();

    let end = WINDOW_BOUNDARIES
        .iter()
        .filter_map(|boundary| lower[after..].find(boundary).map(|i| i + after))
        .min()
        .unwrap_or_else(|| floor_char_boundary(text, start + WINDOW_FALLBACK_LEN));

    scan_book_references(&text[start..end])
}

// Best effort: the line heuristic can pick up unrelated adjacent text.
fn from_whole_page(text: &str) -> Vec<Reference> {
    let references = scan_book_references(text);
    if !references.is_empty() {
        return references;
    }

    for line in SENTENCE_BREAK.split(text) {
        let line = line.trim();
        if line.is_empty() || !line.contains([';', ',']) {
            continue;
        }
        if !mentions_book(line) || !DIGIT.is_match(line) {
            continue;
        }

        let normalized = normalize_readings(line);
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for piece in normalized.split(';').map(str::trim) {
            if let Some(reference) = normalize_reference(piece) {
                push_unique(&mut out, &mut seen, reference);
            } else if mentions_book(piece) {
                push_unique(&mut out, &mut seen, Reference::new(piece));
            }
        }
        return out;
    }

    Vec::new()
}

// Labels and prose around a piece ("Today:", "Read", "Day 3") never become
// references; only whitelisted book names do.
fn split_readings(normalized: &str) -> Vec<Reference> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for piece in normalized.split(';') {
        for reference in scan_book_references(piece) {
            push_unique(&mut out, &mut seen, reference);
        }
    }
    out
}

fn push_unique(out: &mut Vec<Reference>, seen: &mut HashSet<String>, reference: Reference) {
    if seen.insert(reference.key()) {
        out.push(reference);
    }
}

fn canonical_book_name(raw: &str) -> String {
    let book = collapse_whitespace(raw);
    match book.to_ascii_lowercase().as_str() {
        "psalm" | "psalms" => "Psalms".to_string(),
        "song" | "song of songs" | "song of solomon" => "Song of Songs".to_string(),
        _ => title_case(&book),
    }
}

fn title_case(text: &str) -> String {
    text.split(' ')
        .enumerate()
        .map(|(index, word)| {
            let lower = word.to_lowercase();
            if index > 0 && lower == "of" {
                return lower;
            }
            let mut chars = lower.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn element_text(element: ElementRef<'_>) -> String {
    collapse_whitespace(&element.text().collect::<Vec<_>>().join(" "))
}

fn flatten_text(doc: &Html) -> String {
    let mut out = String::new();
    for node in doc.root_element().descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node.ancestors().filter_map(ElementRef::wrap).any(|el| {
            matches!(
                el.value().name(),
                "script" | "style" | "noscript" | "template"
            )
        });
        if !hidden {
            out.push_str(text);
            out.push(' ');
        }
    }
    collapse_whitespace(&out)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    let mut index = index.min(text.len());
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    fn refs(extraction: Option<Extraction>) -> Vec<String> {
        extraction
            .map(|e| e.references.iter().map(ToString::to_string).collect())
            .unwrap_or_default()
    }

    #[test]
    fn normalizes_numbered_books_and_spacing() {
        assert_eq!(
            normalize_reference("1 samuel   7").map(|r| r.to_string()),
            Some("1 Samuel 7".to_string())
        );
        assert_eq!(
            normalize_reference("Psalm 46-48").map(|r| r.to_string()),
            Some("Psalms 46–48".to_string())
        );
        assert_eq!(
            normalize_reference("song of solomon 2").map(|r| r.to_string()),
            Some("Song of Songs 2".to_string())
        );
        assert_eq!(
            normalize_reference("GENESIS 12:1-3").map(|r| r.to_string()),
            Some("Genesis 12".to_string())
        );
        assert!(normalize_reference("Read today").is_none());
        assert!(normalize_reference("Read Genesis 1").is_none());
        assert!(normalize_reference("Day 3").is_none());
    }

    #[test]
    fn readings_separators_are_normalized() {
        assert_eq!(
            normalize_readings("Genesis 1 , Job 2 • Psalms 3·Mark 4"),
            "Genesis 1; Job 2; Psalms 3; Mark 4"
        );
        assert_eq!(normalize_readings("Psalms 46 — 48"), "Psalms 46–48");
    }

    #[test]
    fn scan_prefers_longest_book_names() {
        let found = scan_book_references("Read Song of Songs 2 and 1 John 3 then John 4, song 5");
        let found = found.iter().map(ToString::to_string).collect::<Vec<_>>();
        assert_eq!(
            found,
            vec!["Song of Songs 2", "1 John 3", "John 4", "Song of Songs 5"]
        );
    }

    #[test]
    fn heading_anchors_win_over_text_fallbacks() {
        let html = r#"
            <html><body>
              <p>Yesterday we read Exodus 20 and Leviticus 1.</p>
              <section>
                <div>
                  <h2>Today's Scripture</h2>
                </div>
                <ul>
                  <li><a href="/bible/111/1SA.7">1 samuel 7</a></li>
                  <li><a href="/bible/111/PSA.46">Psalm 46-48</a></li>
                  <li><a href="/bible/111/1SA.7">1 Samuel 7</a></li>
                  <li><a href="/about">About us</a></li>
                </ul>
              </section>
              <pre>Genesis 1; Genesis 2</pre>
            </body></html>
        "#;

        let extraction = extract_references(html).expect("references expected");
        assert_eq!(extraction.strategy, Strategy::ScriptureHeading);
        assert_eq!(
            refs(Some(extraction)),
            vec!["1 Samuel 7", "Psalms 46–48"]
        );
    }

    #[test]
    fn heading_search_gives_up_beyond_ancestor_limit() {
        let html = r#"
            <html><body>
              <div><a href="/bible/1/GEN.1">Genesis 1</a>
                <div><div><div><div><div><div>
                  <h3>Scripture</h3>
                </div></div></div></div></div></div>
              </div>
            </body></html>
        "#;

        let extraction = extract_references(html).expect("fallback should still find it");
        assert_ne!(extraction.strategy, Strategy::ScriptureHeading);
        assert_eq!(refs(Some(extraction)), vec!["Genesis 1"]);
    }

    #[test]
    fn absolute_scripture_links_are_accepted() {
        let html = r#"<div><h4>SCRIPTURE</h4>
            <a href="https://www.bible.com/bible/1/MAT.5">Matthew 5</a></div>"#;
        let extraction = extract_references(html).expect("references expected");
        assert_eq!(extraction.strategy, Strategy::ScriptureHeading);
        assert_eq!(refs(Some(extraction)), vec!["Matthew 5"]);
    }

    #[test]
    fn reading_selector_block_is_split() {
        let html = r#"<html><body>
            <code>let x = 1;</code>
            <pre>Genesis 1-3, Psalm 1 • Matthew 1</pre>
        </body></html>"#;

        let extraction = extract_references(html).expect("references expected");
        assert_eq!(extraction.strategy, Strategy::ReadingSelectors);
        assert_eq!(
            refs(Some(extraction)),
            vec!["Genesis 1–3", "Psalms 1", "Matthew 1"]
        );
    }

    #[test]
    fn reading_selector_labels_are_not_references() {
        let blocks = [
            r#"<div class="readings">Read Genesis 1, Exodus 2</div>"#,
            r#"<div class="readings">Today: Genesis 1, Exodus 2</div>"#,
            r#"<pre>Day 3 • Genesis 1 • Exodus 2</pre>"#,
        ];

        for html in blocks {
            let extraction = extract_references(html).expect("references expected");
            assert_eq!(extraction.strategy, Strategy::ReadingSelectors, "{html}");
            assert_eq!(refs(Some(extraction)), vec!["Genesis 1", "Exodus 2"], "{html}");
        }
    }

    #[test]
    fn scripture_window_stops_at_boundary() {
        let html = r#"<html><body>
            <p>Scripture</p><p>Joshua 1</p><p>Judges 2</p>
            <p>Start this plan</p><p>Ruth 3</p>
        </body></html>"#;

        let extraction = extract_references(html).expect("references expected");
        assert_eq!(extraction.strategy, Strategy::ScriptureWindow);
        assert_eq!(refs(Some(extraction)), vec!["Joshua 1", "Judges 2"]);
    }

    #[test]
    fn whole_page_regex_fallback() {
        let html = "<html><body><p>This week: Nehemiah 8 and Esther 2.</p></body></html>";
        let extraction = extract_references(html).expect("references expected");
        assert_eq!(extraction.strategy, Strategy::WholePage);
        assert_eq!(refs(Some(extraction)), vec!["Nehemiah 8", "Esther 2"]);
    }

    #[test]
    fn script_text_is_ignored() {
        let html = r#"<html><body>
            <script>var plan = "Genesis 1";</script>
            <p>Nothing to read here.</p>
        </body></html>"#;
        assert!(extract_references(html).is_none());
    }

    #[test]
    fn no_references_yields_none() {
        assert!(extract_references("<html><body><h1>Welcome</h1></body></html>").is_none());
        assert!(extract_references("").is_none());
    }
}
