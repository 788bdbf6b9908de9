//! Feedback parsing: reviewer output text → [`FeedbackItem`] list.
//!
//! Parsing is tiered. Fenced JSON blocks are tried first, then a loose
//! `{...}` span anywhere in the text, then blank-line separated free text
//! with regex anchor extraction. If every tier comes up empty the raw text
//! is wrapped in a single synthetic item, so a non-empty reply is never
//! silently dropped.
//!
//! The free-text tier is best effort. It recognises only the documented
//! patterns (`rect(x, y, w, h)`, `x= y= width= height=`, a bare list of four
//! numbers, `center(x, y)`) and makes no attempt at phrases such as "top
//! left corner".

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::anchor::{numeric_tokens, parse_slide_page, sanitize_anchor_on_page, Anchor, SLIDE_PAGE_KEYS};
use crate::types::SlidePage;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum summary length in characters before truncation.
pub const MAX_SUMMARY_CHARS: usize = 800;

/// Maximum number of free-text blocks turned into items.
pub const MAX_TEXT_BLOCKS: usize = 12;

/// Maximum title length in characters before truncation.
pub const MAX_TITLE_CHARS: usize = 80;

/// Appended to truncated text.
pub const TRUNCATION_MARKER: char = '…';

/// Prefix of generated titles (`指摘 1`, `指摘 2`, ...).
pub const DEFAULT_TITLE_PREFIX: &str = "指摘";

/// Loose `{...}` spans tried before the loose-JSON tier gives up.
const MAX_LOOSE_JSON_CANDIDATES: usize = 64;

/// A numeric token as the free-text patterns accept it.
const NUM: &str = r"[-+]?(?:[0-9]+(?:\.[0-9]+)?|\.[0-9]+)%?";

static FENCED_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[ \t]*([A-Za-z0-9_-]*)[ \t]*\r?\n?(.*?)```").expect("valid regex")
});

static BLANK_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]*\n\s*").expect("valid regex"));

static LIST_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:\s*(?:[-*+•・●◦▪]|#{1,6}|[0-9]+[.)）]|[（(][0-9]+[)）])\s+)+")
        .expect("valid regex")
});

static SLIDE_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:\b(?:slides?|pages?|diapositiv[ae]s?|p\.)|スライド|ページ)\s*[#№:：]?\s*([0-9]+)|第\s*([0-9]+)\s*(?:枚目?|ページ|スライド)",
    )
    .expect("valid regex")
});

static RECT_CALL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)(?:\b(?:rect|rectangle|bbox|box|area|region|bounds)|矩形|領域|範囲)\s*[:=：]?\s*[\(\[\{{]\s*({NUM})\s*[,、]\s*({NUM})\s*[,、]\s*({NUM})\s*[,、]\s*({NUM})\s*[\)\]\}}]"
    ))
    .expect("valid regex")
});

static KEY_X_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"(?i)\bx\s*[:=：]\s*({NUM})")).expect("valid regex"));

static KEY_Y_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"(?i)\by\s*[:=：]\s*({NUM})")).expect("valid regex"));

static KEY_WIDTH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)(?:\b(?:width|w)|幅)\s*[:=：]\s*({NUM})")).expect("valid regex")
});

static KEY_HEIGHT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)(?:\b(?:height|h)|高さ)\s*[:=：]\s*({NUM})")).expect("valid regex")
});

static NUMBER_LIST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"{NUM}(?:\s*[,、\s]\s*{NUM}){{3,}}")).expect("valid regex")
});

static POINT_CALL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)(?:\b(?:center|centre|position|pos|point)|中心|位置|座標)\s*[:=：]?\s*[\(\[\{{]?\s*({NUM})\s*[,、]\s*({NUM})"
    ))
    .expect("valid regex")
});

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One review comment with zero or more positions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackItem {
    pub id: String,
    pub title: String,
    pub summary: String,
    #[serde(default)]
    pub anchors: Vec<Anchor>,
    /// The item's own declared page, meaningful when it has no anchors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slide_page: Option<SlidePage>,
}

impl FeedbackItem {
    /// Whether the item can be pinned anywhere.
    pub fn is_positioned(&self) -> bool {
        !self.anchors.is_empty()
    }
}

/// Which parsing tier produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseTier {
    FencedJson,
    LooseJson,
    FreeText,
    RawText,
}

impl ParseTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FencedJson => "fenced_json",
            Self::LooseJson => "loose_json",
            Self::FreeText => "free_text",
            Self::RawText => "raw_text",
        }
    }
}

/// Items plus the tier that produced them.
#[derive(Debug, Clone)]
pub struct ParseOutcome {
    pub tier: ParseTier,
    pub items: Vec<FeedbackItem>,
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Stateless reviewer-output parser.
pub struct FeedbackParser;

impl FeedbackParser {
    /// Parse reviewer output into feedback items. Never panics; the result
    /// is never empty.
    pub fn parse(raw: &str) -> Vec<FeedbackItem> {
        Self::parse_with_tier(raw).items
    }

    /// [`parse`](Self::parse), also reporting which tier succeeded.
    pub fn parse_with_tier(raw: &str) -> ParseOutcome {
        let text = raw.replace("\r\n", "\n");

        let mut outcome = if let Some(items) = non_empty(parse_fenced_json(&text)) {
            ParseOutcome { tier: ParseTier::FencedJson, items }
        } else if let Some(items) = non_empty(parse_loose_json(&text)) {
            ParseOutcome { tier: ParseTier::LooseJson, items }
        } else if let Some(items) = non_empty(parse_free_text(&text)) {
            ParseOutcome { tier: ParseTier::FreeText, items }
        } else {
            ParseOutcome {
                tier: ParseTier::RawText,
                items: vec![synthetic_item(&text)],
            }
        };

        ensure_unique_ids(&mut outcome.items);

        tracing::debug!(
            tier = outcome.tier.as_str(),
            items = outcome.items.len(),
            anchors = outcome.items.iter().map(|i| i.anchors.len()).sum::<usize>(),
            "Parsed reviewer output"
        );
        outcome
    }
}

fn non_empty(items: Vec<FeedbackItem>) -> Option<Vec<FeedbackItem>> {
    (!items.is_empty()).then_some(items)
}

// ---------------------------------------------------------------------------
// Structured tiers
// ---------------------------------------------------------------------------

fn parse_fenced_json(text: &str) -> Vec<FeedbackItem> {
    let mut items = Vec::new();
    let mut ordinal = 0;
    for caps in FENCED_BLOCK_RE.captures_iter(text) {
        let lang = caps.get(1).map_or("", |m| m.as_str());
        if !lang.is_empty() && !lang.eq_ignore_ascii_case("json") {
            continue;
        }
        let body = caps.get(2).map_or("", |m| m.as_str());
        match serde_json::from_str::<Value>(body.trim()) {
            Ok(value) => items.extend(items_from_value(&value, &mut ordinal)),
            Err(e) => tracing::debug!(error = %e, "Fenced block is not valid JSON"),
        }
    }
    items
}

fn parse_loose_json(text: &str) -> Vec<FeedbackItem> {
    for candidate in loose_json_candidates(text) {
        if let Ok(value) = serde_json::from_str::<Value>(candidate) {
            let mut ordinal = 0;
            let items = items_from_value(&value, &mut ordinal);
            if !items.is_empty() {
                return items;
            }
        }
    }
    Vec::new()
}

/// The outermost `{ ... }` span first, then balanced top-level spans, up to
/// [`MAX_LOOSE_JSON_CANDIDATES`] distinct spans.
fn loose_json_candidates(text: &str) -> Vec<&str> {
    let mut candidates = Vec::new();
    let mut seen = HashSet::new();
    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            let span = &text[start..=end];
            seen.insert(span);
            candidates.push(span);
        }
    }

    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start.take() {
                        let span = &text[s..=i];
                        if seen.insert(span) {
                            candidates.push(span);
                            if candidates.len() >= MAX_LOOSE_JSON_CANDIDATES {
                                break;
                            }
                        }
                    }
                }
            }
            _ => {}
        }
    }
    candidates
}

fn items_from_value(value: &Value, ordinal: &mut usize) -> Vec<FeedbackItem> {
    let entries = value
        .get("feedbackItems")
        .and_then(Value::as_array)
        .or_else(|| value.as_array())
        .or_else(|| value.get("items").and_then(Value::as_array));

    let Some(entries) = entries else {
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(|entry| {
            *ordinal += 1;
            item_from_entry(entry, *ordinal)
        })
        .collect()
}

fn item_from_entry(entry: &Value, ordinal: usize) -> Option<FeedbackItem> {
    if let Some(text) = entry.as_str() {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        return Some(FeedbackItem {
            id: format!("feedback-json-{ordinal}"),
            title: derive_title(None, text, ordinal),
            summary: truncate_chars(text, MAX_SUMMARY_CHARS),
            anchors: Vec::new(),
            slide_page: None,
        });
    }

    let obj = entry.as_object()?;

    let id = match obj.get("id") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => format!("feedback-json-{ordinal}"),
    };

    let summary = ["summary", "details", "description", "comment"]
        .iter()
        .find_map(|key| obj.get(*key).and_then(Value::as_str))
        .map(|s| truncate_chars(s.trim(), MAX_SUMMARY_CHARS))
        .unwrap_or_default();

    let heading = ["title", "heading", "name"]
        .iter()
        .find_map(|key| obj.get(*key).and_then(Value::as_str));

    let slide_page = SLIDE_PAGE_KEYS
        .iter()
        .find_map(|key| obj.get(*key).and_then(parse_slide_page));

    let raw_anchors: Vec<&Value> = match obj.get("anchors") {
        Some(Value::Array(list)) => list.iter().collect(),
        Some(single @ Value::Object(_)) => vec![single],
        _ => obj.get("anchor").into_iter().collect(),
    };

    let mut anchors: Vec<Anchor> = raw_anchors
        .into_iter()
        .enumerate()
        .filter_map(|(index, raw)| {
            let default_page = slide_page.unwrap_or_else(|| page_after(index));
            let anchor = sanitize_anchor_on_page(raw, index, default_page);
            if anchor.is_none() {
                tracing::debug!(ordinal, index, "Dropped unusable anchor");
            }
            anchor
        })
        .collect();
    anchors.sort_by_key(|a| a.anchor_index);

    Some(FeedbackItem {
        id,
        title: derive_title(heading, &summary, ordinal),
        summary,
        anchors,
        slide_page,
    })
}

fn page_after(index: usize) -> SlidePage {
    SlidePage::try_from(index).map_or(SlidePage::MAX, |i| i.saturating_add(1))
}

// ---------------------------------------------------------------------------
// Free-text tier
// ---------------------------------------------------------------------------

fn parse_free_text(text: &str) -> Vec<FeedbackItem> {
    BLANK_LINE_RE
        .split(text.trim())
        .map(str::trim)
        .filter(|block| !block.is_empty())
        .take(MAX_TEXT_BLOCKS)
        .enumerate()
        .map(|(index, block)| item_from_block(block, index + 1))
        .collect()
}

fn item_from_block(block: &str, ordinal: usize) -> FeedbackItem {
    let mut lines = block.lines().map(str::trim).filter(|l| !l.is_empty());
    let first = lines.next().unwrap_or_default();
    let rest: Vec<&str> = lines.collect();

    let anchors = extract_anchors(block);
    let slide_page = SLIDE_MARKER_RE
        .captures(block)
        .and_then(|caps| marker_page(&caps));

    FeedbackItem {
        id: format!("feedback-text-{ordinal}"),
        title: derive_title(Some(first), "", ordinal),
        summary: truncate_chars(&rest.join("\n"), MAX_SUMMARY_CHARS),
        anchors,
        slide_page,
    }
}

/// Extract anchors from one free-text block.
///
/// Each slide marker owns the text up to the next marker; within it the
/// first of rect call, keyed rect, number list, or point wins. A block with
/// no marker is searched for a rectangle only and pinned to slide 1.
fn extract_anchors(block: &str) -> Vec<Anchor> {
    let markers: Vec<(usize, usize, SlidePage)> = SLIDE_MARKER_RE
        .captures_iter(block)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            Some((whole.start(), whole.end(), marker_page(&caps)?))
        })
        .collect();

    if markers.is_empty() {
        return find_rect(block)
            .and_then(|rect| build_anchor(json!({ "rect": rect }), 0, 1))
            .into_iter()
            .collect();
    }

    let mut anchors = Vec::new();
    for (i, &(_, end, page)) in markers.iter().enumerate() {
        let segment_end = markers.get(i + 1).map_or(block.len(), |next| next.0);
        let segment = &block[end..segment_end];
        let index = anchors.len();

        let raw = find_rect(segment)
            .map(|rect| json!({ "rect": rect }))
            .or_else(|| find_point(segment).map(|point| json!({ "position": point })));

        if let Some(anchor) = raw.and_then(|raw| build_anchor(raw, index, page)) {
            anchors.push(anchor);
        }
    }
    anchors
}

fn build_anchor(raw: Value, index: usize, page: SlidePage) -> Option<Anchor> {
    sanitize_anchor_on_page(&raw, index, page)
}

fn marker_page(caps: &regex::Captures<'_>) -> Option<SlidePage> {
    caps.get(1)
        .or_else(|| caps.get(2))
        .and_then(|m| m.as_str().parse::<SlidePage>().ok())
        .filter(|page| *page >= 1)
}

/// Rect components as strings, so percent suffixes survive normalization.
fn find_rect(segment: &str) -> Option<[String; 4]> {
    if let Some(caps) = RECT_CALL_RE.captures(segment) {
        return Some([1usize, 2, 3, 4].map(|g| caps[g].to_string()));
    }

    let keyed = [&KEY_X_RE, &KEY_Y_RE, &KEY_WIDTH_RE, &KEY_HEIGHT_RE]
        .map(|re| re.captures(segment).map(|caps| caps[1].to_string()));
    if let [Some(x), Some(y), Some(w), Some(h)] = keyed {
        return Some([x, y, w, h]);
    }

    let list = NUMBER_LIST_RE.find(segment)?;
    let tokens = numeric_tokens(list.as_str());
    match tokens.as_slice() {
        [x, y, w, h, ..] => Some([x, y, w, h].map(|t| t.to_string())),
        _ => None,
    }
}

fn find_point(segment: &str) -> Option<[String; 2]> {
    let caps = POINT_CALL_RE.captures(segment)?;
    Some([caps[1].to_string(), caps[2].to_string()])
}

// ---------------------------------------------------------------------------
// Fallback and text helpers
// ---------------------------------------------------------------------------

fn synthetic_item(text: &str) -> FeedbackItem {
    let trimmed = text.trim();
    let first_line = trimmed.lines().map(str::trim).find(|l| !l.is_empty());
    FeedbackItem {
        id: "feedback-raw-1".to_string(),
        title: derive_title(first_line, "", 1),
        summary: truncate_chars(trimmed, MAX_SUMMARY_CHARS),
        anchors: Vec::new(),
        slide_page: None,
    }
}

/// Title from an explicit heading, else the summary's first line, else
/// `指摘 n`. Never empty.
fn derive_title(heading: Option<&str>, summary: &str, ordinal: usize) -> String {
    heading
        .map(clean_title)
        .filter(|t| !t.is_empty())
        .or_else(|| {
            summary
                .lines()
                .map(clean_title)
                .find(|t| !t.is_empty())
        })
        .unwrap_or_else(|| format!("{DEFAULT_TITLE_PREFIX} {ordinal}"))
}

/// Strip bullets, markdown headings, numbering and bold markers from the
/// first line of `raw`.
pub fn clean_title(raw: &str) -> String {
    let line = raw.lines().next().unwrap_or_default().trim();
    let stripped = LIST_MARKER_RE.replace(line, "");
    let cleaned = stripped.replace("**", "").replace("__", "");
    truncate_chars(cleaned.trim(), MAX_TITLE_CHARS)
}

/// Truncate to `max` characters, appending [`TRUNCATION_MARKER`] when cut.
pub fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max).collect();
    out.truncate(out.trim_end().len());
    out.push(TRUNCATION_MARKER);
    out
}

/// Suffix repeated ids (`a`, `a-2`, `a-3`) so ids stay unique in a run.
fn ensure_unique_ids(items: &mut [FeedbackItem]) {
    let mut seen = HashSet::new();
    for item in items.iter_mut() {
        if seen.insert(item.id.clone()) {
            continue;
        }
        let mut n = 2;
        while seen.contains(&format!("{}-{n}", item.id)) {
            n += 1;
        }
        item.id = format!("{}-{n}", item.id);
        seen.insert(item.id.clone());
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor::{Geometry, Point, Rect};

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    // -- structured tier ----------------------------------------------------

    #[test]
    fn fenced_json_round_trip() {
        let raw = "Here you go:\n```json\n{\"feedbackItems\":[{\"id\":\"a\",\"title\":\"T\",\"summary\":\"S\",\"slidePage\":2,\"anchors\":[{\"slidePage\":2,\"rect\":{\"x\":0.1,\"y\":0.2,\"width\":0.3,\"height\":0.4}}]}]}\n```\n";
        let outcome = FeedbackParser::parse_with_tier(raw);
        assert_eq!(outcome.tier, ParseTier::FencedJson);

        let items = outcome.items;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "a");
        assert_eq!(items[0].title, "T");
        assert_eq!(items[0].summary, "S");
        assert_eq!(items[0].slide_page, Some(2));
        assert_eq!(items[0].anchors.len(), 1);
        assert_eq!(items[0].anchors[0].slide_page, 2);
        assert_eq!(
            items[0].anchors[0].geometry,
            Geometry::Rect(Rect { x: 0.1, y: 0.2, width: 0.3, height: 0.4 })
        );
    }

    #[test]
    fn fenced_json_defaults_ids_and_titles() {
        let raw = "```\n{\"items\":[{\"details\":\"Font is too small\\nsecond line\"},{}]}\n```";
        let items = FeedbackParser::parse(raw);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, "feedback-json-1");
        assert_eq!(items[0].title, "Font is too small");
        assert_eq!(items[1].id, "feedback-json-2");
        assert_eq!(items[1].title, "指摘 2");
    }

    #[test]
    fn fenced_bare_array_drops_invalid_anchors() {
        let raw = "```json\n[{\"title\":\"Crowded\",\"anchors\":[{\"page\":1,\"rect\":[0.1,0.1,0,0.2]},{\"page\":1,\"center\":[40,40]}]}]\n```";
        let items = FeedbackParser::parse(raw);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].anchors.len(), 1);
        assert_eq!(items[0].anchors[0].geometry, Geometry::Position(Point { x: 0.4, y: 0.4 }));
    }

    #[test]
    fn anchors_default_to_item_page() {
        let raw = "```json\n{\"feedbackItems\":[{\"title\":\"x\",\"slide\":4,\"anchors\":[{\"x\":0.5,\"y\":0.5}]}]}\n```";
        let items = FeedbackParser::parse(raw);
        assert_eq!(items[0].anchors[0].slide_page, 4);
    }

    #[test]
    fn non_json_fence_is_ignored() {
        let raw = "```python\nprint('hi')\n```\n\nSlide 2: title is long";
        let outcome = FeedbackParser::parse_with_tier(raw);
        assert_eq!(outcome.tier, ParseTier::FreeText);
    }

    #[test]
    fn loose_json_span_is_parsed() {
        let raw = "Result follows {\"feedbackItems\":[{\"title\":\"Align\",\"summary\":\"Align the icons\",\"anchors\":[{\"slidePage\":3,\"position\":{\"x\":\"50%\",\"y\":\"10%\"}}]}]} end";
        let outcome = FeedbackParser::parse_with_tier(raw);
        assert_eq!(outcome.tier, ParseTier::LooseJson);
        assert_eq!(outcome.items[0].anchors[0].slide_page, 3);
        assert_eq!(outcome.items[0].anchors[0].geometry, Geometry::Position(Point { x: 0.5, y: 0.1 }));
    }

    #[test]
    fn loose_json_candidates_are_distinct_and_capped() {
        let raw: String = (0..10_000).map(|i| format!("{{\"k\":{}}} ", i % 100)).collect();
        let candidates = loose_json_candidates(&raw);
        assert_eq!(candidates.len(), MAX_LOOSE_JSON_CANDIDATES);
        let distinct: HashSet<&str> = candidates.iter().copied().collect();
        assert_eq!(distinct.len(), candidates.len());

        assert_ne!(FeedbackParser::parse_with_tier(&raw).tier, ParseTier::LooseJson);
    }

    #[test]
    fn broken_fenced_json_degrades_to_free_text() {
        let raw = "```json\n{\"feedbackItems\": [ {\"title\": \n```\n\nSlide 2: chart labels overlap";
        let outcome = FeedbackParser::parse_with_tier(raw);
        assert_eq!(outcome.tier, ParseTier::FreeText);
        assert!(!outcome.items.is_empty());
    }

    #[test]
    fn duplicate_ids_are_suffixed() {
        let raw = "```json\n[{\"id\":\"a\",\"title\":\"one\"},{\"id\":\"a\",\"title\":\"two\"}]\n```";
        let items = FeedbackParser::parse(raw);
        assert_eq!(items[0].id, "a");
        assert_eq!(items[1].id, "a-2");
    }

    // -- free-text tier -----------------------------------------------------

    #[test]
    fn free_text_scenario_rect_and_point() {
        let raw = "Slide 1: move the logo.\nrect(0.1,0.1,0.2,0.2)\n\nSlide 3: contrast is low\ncenter(0.8,0.9)";
        let outcome = FeedbackParser::parse_with_tier(raw);
        assert_eq!(outcome.tier, ParseTier::FreeText);

        let items = outcome.items;
        assert_eq!(items.len(), 2);

        assert_eq!(items[0].anchors.len(), 1);
        assert_eq!(items[0].anchors[0].slide_page, 1);
        assert_eq!(
            items[0].anchors[0].geometry,
            Geometry::Rect(Rect { x: 0.1, y: 0.1, width: 0.2, height: 0.2 })
        );

        assert_eq!(items[1].anchors.len(), 1);
        assert_eq!(items[1].anchors[0].slide_page, 3);
        assert_eq!(items[1].anchors[0].geometry, Geometry::Position(Point { x: 0.8, y: 0.9 }));
        assert_eq!(items[1].slide_page, Some(3));
    }

    #[test]
    fn free_text_keyed_rect_with_japanese_aliases() {
        let raw = "スライド 2: 文字が小さい\nx=10%, y=20%, 幅=30%, 高さ=10%";
        let items = FeedbackParser::parse(raw);
        let anchor = &items[0].anchors[0];
        assert_eq!(anchor.slide_page, 2);
        let rect = anchor.geometry.rect().unwrap();
        assert!(approx(rect.x, 0.1));
        assert!(approx(rect.y, 0.2));
        assert!(approx(rect.width, 0.3));
        assert!(approx(rect.height, 0.1));
    }

    #[test]
    fn free_text_bare_number_list() {
        let raw = "Page 4 - the chart is crowded\nregion is 0.1 0.2 0.5 0.5 roughly";
        let items = FeedbackParser::parse(raw);
        let anchor = &items[0].anchors[0];
        assert_eq!(anchor.slide_page, 4);
        assert_eq!(anchor.geometry.rect().map(|r| r.width), Some(0.5));
    }

    #[test]
    fn free_text_without_marker_pins_rect_to_slide_one() {
        let raw = "Logo is too big\nbbox(10, 10, 20, 20)";
        let items = FeedbackParser::parse(raw);
        assert_eq!(items[0].anchors.len(), 1);
        assert_eq!(items[0].anchors[0].slide_page, 1);
        assert_eq!(items[0].slide_page, None);
    }

    #[test]
    fn free_text_without_marker_ignores_points() {
        let raw = "Logo is too big\ncenter(0.5, 0.5)";
        let items = FeedbackParser::parse(raw);
        assert!(items[0].anchors.is_empty());
    }

    #[test]
    fn free_text_multiple_markers_in_one_block() {
        let raw = "Repeated header\nSlide 2 rect(0.1, 0.1, 0.3, 0.1) and Slide 5 center(0.2, 0.7)";
        let items = FeedbackParser::parse(raw);
        let pages: Vec<_> = items[0].anchors.iter().map(|a| a.slide_page).collect();
        assert_eq!(pages, vec![2, 5]);
        assert_eq!(items[0].anchors[1].anchor_index, 1);
    }

    #[test]
    fn free_text_recognises_diapositiva_markers() {
        let raw = "Diapositiva 4: testo troppo piccolo\nrect(0.1, 0.1, 0.3, 0.2)\n\nDiapositive 6 : titre trop long\ncenter(0.5, 0.2)";
        let items = FeedbackParser::parse(raw);
        assert_eq!(items[0].anchors[0].slide_page, 4);
        assert_eq!(items[1].anchors[0].slide_page, 6);
    }

    #[test]
    fn free_text_title_strips_numbering_and_bullets() {
        let raw = "1. **Too much text**\nSplit the paragraph\n\n- Colours clash\n\n## 3) Heading";
        let items = FeedbackParser::parse(raw);
        assert_eq!(items[0].title, "Too much text");
        assert_eq!(items[0].summary, "Split the paragraph");
        assert_eq!(items[1].title, "Colours clash");
        assert_eq!(items[2].title, "Heading");
    }

    #[test]
    fn free_text_block_cap() {
        let raw = (1..=20).map(|i| format!("Point {i}")).collect::<Vec<_>>().join("\n\n");
        let items = FeedbackParser::parse(&raw);
        assert_eq!(items.len(), MAX_TEXT_BLOCKS);
    }

    #[test]
    fn long_summary_is_truncated() {
        let raw = format!("Title\n{}", "a".repeat(2000));
        let items = FeedbackParser::parse(&raw);
        assert_eq!(items[0].summary.chars().count(), MAX_SUMMARY_CHARS + 1);
        assert!(items[0].summary.ends_with(TRUNCATION_MARKER));
    }

    // -- fallback -----------------------------------------------------------

    #[test]
    fn parse_is_never_empty() {
        let inputs = ["x", "   ", "\n\n\n", "{", "```json\n```", "}{", "Slide", "ページ 0"];
        for input in inputs {
            assert!(!FeedbackParser::parse(input).is_empty(), "empty result for {input:?}");
        }
    }

    #[test]
    fn whitespace_only_input_yields_synthetic_item() {
        let outcome = FeedbackParser::parse_with_tier("   \n  ");
        assert_eq!(outcome.tier, ParseTier::RawText);
        assert_eq!(outcome.items[0].title, "指摘 1");
        assert!(outcome.items[0].anchors.is_empty());
    }

    #[test]
    fn truncate_chars_respects_multibyte() {
        assert_eq!(truncate_chars("スライド", 2), "スラ…");
        assert_eq!(truncate_chars("short", 10), "short");
    }
}
