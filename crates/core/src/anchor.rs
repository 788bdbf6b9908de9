//! Anchor normalization.
//!
//! Converts the loosely-typed position values a reviewer model emits
//! (percent strings, 0–100 scales, pixel-ish numbers, corner boxes, bare
//! arrays) into canonical slide-relative geometry in `[0,1]×[0,1]`.
//!
//! Every function here is total: malformed input yields `None`, never a panic.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::SlidePage;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Keys that may carry an anchor's slide page, checked in order.
pub const SLIDE_PAGE_KEYS: &[&str] = &[
    "slidePage",
    "page",
    "slide",
    "pageNumber",
    "pageIndex",
    "slide_number",
];

/// Keys under which an anchor object may nest its rectangle.
const RECT_KEYS: &[&str] = &["rect", "bbox", "box", "area", "region", "bounds"];

/// Keys under which an anchor object may nest its point.
const POINT_KEYS: &[&str] = &["position", "point", "center", "centre"];

/// Keys that give an anchor object an inline extent.
const INLINE_EXTENT_KEYS: &[&str] = &["width", "w", "right", "height", "h", "bottom"];

/// A numeric token, optionally percent-suffixed.
static NUMBER_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[-+]?(?:[0-9]+(?:\.[0-9]+)?|\.[0-9]+)%?").expect("valid regex"));

/// The numeric prefix of a string, `parseFloat` style.
static LEADING_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[-+]?(?:[0-9]+(?:\.[0-9]*)?|\.[0-9]+)").expect("valid regex"));

static FIRST_INTEGER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[0-9]+").expect("valid regex"));

// ---------------------------------------------------------------------------
// Geometry types
// ---------------------------------------------------------------------------

/// Axis-aligned rectangle in slide-relative units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    /// A rectangle is usable only with a strictly positive, finite extent.
    pub fn is_valid(&self) -> bool {
        [self.x, self.y, self.width, self.height]
            .iter()
            .all(|v| v.is_finite())
            && self.width > 0.0
            && self.height > 0.0
    }

    pub fn center(&self) -> Point {
        Point {
            x: clamp_unit(self.x + self.width / 2.0),
            y: clamp_unit(self.y + self.height / 2.0),
        }
    }
}

/// Point in slide-relative units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// The single geometry an anchor or pin carries.
///
/// Serialized externally tagged, so it flattens into its owner as either a
/// `"rect"` or a `"position"` key.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Geometry {
    Rect(Rect),
    Position(Point),
}

impl Geometry {
    /// The point a pin is drawn at: the rectangle's centre for rect anchors.
    pub fn position(&self) -> Point {
        match self {
            Self::Rect(rect) => rect.center(),
            Self::Position(point) => *point,
        }
    }

    pub fn rect(&self) -> Option<Rect> {
        match self {
            Self::Rect(rect) => Some(*rect),
            Self::Position(_) => None,
        }
    }
}

/// Provenance of an anchor or pin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnchorSource {
    /// Produced by the reviewer model.
    #[default]
    Ai,
    /// Placed by the user on the canvas.
    Manual,
}

impl AnchorSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ai => "ai",
            Self::Manual => "manual",
        }
    }
}

/// A normalized position on one slide page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Anchor {
    pub slide_page: SlidePage,
    #[serde(flatten)]
    pub geometry: Geometry,
    pub anchor_index: usize,
    #[serde(default)]
    pub source: AnchorSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

// ---------------------------------------------------------------------------
// Ratio parsing
// ---------------------------------------------------------------------------

/// Convert a number or numeric string into a `[0,1]` ratio.
///
/// Scale rules, in order: a `%` suffix divides by 100; values `<= 1` are
/// already ratios; `<= 100` divides by 100; `<= 1000` by 1000; anything
/// larger by 10000. With `clamp == false` the result is returned unclamped.
pub fn to_ratio(value: &Value, clamp: bool) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().and_then(|v| scale_ratio(v, false, clamp)),
        Value::String(s) => ratio_from_str(s, clamp),
        _ => None,
    }
}

/// String form of [`to_ratio`]; only the leading numeric prefix is read.
pub fn ratio_from_str(text: &str, clamp: bool) -> Option<f64> {
    let trimmed = text.trim();
    let number = LEADING_NUMBER_RE.find(trimmed)?;
    let value: f64 = number.as_str().parse().ok()?;
    scale_ratio(value, trimmed.contains('%'), clamp)
}

fn scale_ratio(value: f64, percent: bool, clamp: bool) -> Option<f64> {
    if !value.is_finite() {
        return None;
    }
    let ratio = if percent {
        value / 100.0
    } else if value <= 1.0 {
        value
    } else if value <= 100.0 {
        value / 100.0
    } else if value <= 1000.0 {
        value / 1000.0
    } else {
        value / 10000.0
    };
    Some(if clamp { clamp_unit(ratio) } else { ratio })
}

fn clamp_unit(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}

// ---------------------------------------------------------------------------
// Rect / point normalization
// ---------------------------------------------------------------------------

/// Normalize a rectangle given as an object, a 4-element array, or a string
/// holding four numbers (positional `x, y, width, height`).
///
/// `{left, top, right, bottom}` objects are reinterpreted as a box. Returns
/// `None` when any component fails to parse; the result is clamped but not
/// checked for positive extent (see [`Rect::is_valid`]).
pub fn normalize_rect(raw: &Value) -> Option<Rect> {
    let [x, y, width, height] = rect_components(raw)?;
    Some(Rect {
        x: clamp_unit(x),
        y: clamp_unit(y),
        width: clamp_unit(width),
        height: clamp_unit(height),
    })
}

fn rect_components(raw: &Value) -> Option<[f64; 4]> {
    match raw {
        Value::Object(map) => {
            let x = to_ratio(pick(map, &["x", "left"])?, true)?;
            let y = to_ratio(pick(map, &["y", "top"])?, true)?;
            let width = match pick(map, &["width", "w"]) {
                Some(w) => to_ratio(w, false)?,
                None => to_ratio(pick(map, &["right"])?, false)? - x,
            };
            let height = match pick(map, &["height", "h"]) {
                Some(h) => to_ratio(h, false)?,
                None => to_ratio(pick(map, &["bottom"])?, false)? - y,
            };
            Some([x, y, width, height])
        }
        Value::Array(items) if items.len() >= 4 => Some([
            to_ratio(&items[0], true)?,
            to_ratio(&items[1], true)?,
            to_ratio(&items[2], false)?,
            to_ratio(&items[3], false)?,
        ]),
        Value::String(text) => {
            let tokens = numeric_tokens(text);
            if tokens.len() < 4 {
                return None;
            }
            Some([
                ratio_from_str(tokens[0], true)?,
                ratio_from_str(tokens[1], true)?,
                ratio_from_str(tokens[2], false)?,
                ratio_from_str(tokens[3], false)?,
            ])
        }
        _ => None,
    }
}

/// Normalize a point given as `{x, y}`, `{left, top}`, a 2-element array, or
/// a string holding two numbers.
pub fn normalize_point(raw: &Value) -> Option<Point> {
    let (x, y) = match raw {
        Value::Object(map) => (
            to_ratio(pick(map, &["x", "left"])?, true)?,
            to_ratio(pick(map, &["y", "top"])?, true)?,
        ),
        Value::Array(items) if items.len() >= 2 => {
            (to_ratio(&items[0], true)?, to_ratio(&items[1], true)?)
        }
        Value::String(text) => {
            let tokens = numeric_tokens(text);
            if tokens.len() < 2 {
                return None;
            }
            (
                ratio_from_str(tokens[0], true)?,
                ratio_from_str(tokens[1], true)?,
            )
        }
        _ => return None,
    };
    Some(Point { x, y })
}

/// All numeric tokens (with any `%` suffix) in `text`, in order.
pub fn numeric_tokens(text: &str) -> Vec<&str> {
    NUMBER_TOKEN_RE.find_iter(text).map(|m| m.as_str()).collect()
}

fn pick<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .find_map(|key| map.get(*key).filter(|v| !v.is_null()))
}

// ---------------------------------------------------------------------------
// Anchor sanitization
// ---------------------------------------------------------------------------

/// Turn a raw anchor value into a canonical [`Anchor`].
///
/// The slide page defaults to `fallback_index + 1`. A valid rectangle wins
/// over a point; an anchor with neither is rejected.
pub fn sanitize_anchor(raw: &Value, fallback_index: usize) -> Option<Anchor> {
    let default_page = SlidePage::try_from(fallback_index)
        .map_or(SlidePage::MAX, |index| index.saturating_add(1));
    sanitize_anchor_on_page(raw, fallback_index, default_page)
}

/// [`sanitize_anchor`] with an explicit default page, used when the owning
/// feedback item declares its own page.
pub fn sanitize_anchor_on_page(
    raw: &Value,
    fallback_index: usize,
    default_page: SlidePage,
) -> Option<Anchor> {
    let Some(map) = raw.as_object() else {
        // Bare arrays or strings carry geometry only.
        let geometry = resolve_geometry(None, raw)?;
        return Some(Anchor {
            slide_page: default_page,
            geometry,
            anchor_index: fallback_index,
            source: AnchorSource::Ai,
            confidence: None,
        });
    };

    let slide_page = SLIDE_PAGE_KEYS
        .iter()
        .find_map(|key| map.get(*key).and_then(parse_slide_page))
        .unwrap_or(default_page);

    let geometry = resolve_geometry(Some(map), raw)?;

    let anchor_index = map
        .get("anchorIndex")
        .and_then(Value::as_u64)
        .and_then(|i| usize::try_from(i).ok())
        .unwrap_or(fallback_index);

    let confidence = map.get("confidence").and_then(|c| match c {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    });

    Some(Anchor {
        slide_page,
        geometry,
        anchor_index,
        source: AnchorSource::Ai,
        confidence: confidence.filter(|c| c.is_finite()),
    })
}

fn resolve_geometry(map: Option<&Map<String, Value>>, raw: &Value) -> Option<Geometry> {
    let nested_rect = map.and_then(|m| {
        RECT_KEYS
            .iter()
            .filter_map(|key| m.get(*key))
            .find_map(|value| normalize_rect(value).filter(Rect::is_valid))
    });
    // The anchor itself carries an extent, so its x/y belong to that rect.
    let inline_extent = match map {
        Some(m) => INLINE_EXTENT_KEYS.iter().any(|k| m.contains_key(*k)),
        None => normalize_rect(raw).is_some(),
    };
    let inline_rect = || {
        if inline_extent {
            normalize_rect(raw).filter(Rect::is_valid)
        } else {
            None
        }
    };
    if let Some(rect) = nested_rect.or_else(inline_rect) {
        return Some(Geometry::Rect(rect));
    }

    let nested_point = map.and_then(|m| {
        POINT_KEYS
            .iter()
            .filter_map(|key| m.get(*key))
            .find_map(normalize_point)
    });
    // A degenerate inline rect is discarded rather than read as a point.
    let inline_point = || (!inline_extent).then(|| normalize_point(raw)).flatten();
    nested_point.or_else(inline_point).map(Geometry::Position)
}

/// Parse a 1-based slide page from a number or a string such as `"3"` or
/// `"Slide 3"`. Zero, negatives and non-numbers are rejected.
pub fn parse_slide_page(value: &Value) -> Option<SlidePage> {
    let page = match value {
        Value::Number(n) => {
            let v = n.as_f64()?;
            if !v.is_finite() || v < 1.0 || v > f64::from(SlidePage::MAX) {
                return None;
            }
            v.floor() as SlidePage
        }
        Value::String(s) => FIRST_INTEGER_RE.find(s)?.as_str().parse().ok()?,
        _ => return None,
    };
    (page >= 1).then_some(page)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
