//! Canvas geometry and the collaborators that report it.

use serde::{Deserialize, Serialize};
use slidepin_core::anchor::{Point, Rect};
use slidepin_core::types::SlidePage;

/// Bounding rectangle of the live slide canvas, in screen pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewportRect {
    pub top: f64,
    pub left: f64,
    pub width: f64,
    pub height: f64,
}

/// Pixel rectangle of a rect pin's highlight.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PixelRect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl ViewportRect {
    /// A zero-sized or non-finite canvas cannot host pins.
    pub fn is_usable(&self) -> bool {
        [self.top, self.left, self.width, self.height]
            .iter()
            .all(|v| v.is_finite())
            && self.width > 0.0
            && self.height > 0.0
    }

    /// Whether a pixel lies on the canvas (edges inclusive).
    pub fn contains(&self, px: f64, py: f64) -> bool {
        self.is_usable()
            && px >= self.left
            && px <= self.left + self.width
            && py >= self.top
            && py <= self.top + self.height
    }

    /// Slide-relative point for a pixel, clamped to `[margin, 1 - margin]`.
    pub fn to_normalized(&self, px: f64, py: f64, margin: f64) -> Point {
        let clamp = |v: f64| v.clamp(margin, 1.0 - margin);
        Point {
            x: clamp((px - self.left) / self.width),
            y: clamp((py - self.top) / self.height),
        }
    }

    /// Screen pixel for a slide-relative point.
    pub fn to_pixels(&self, point: Point) -> (f64, f64) {
        (
            self.left + point.x * self.width,
            self.top + point.y * self.height,
        )
    }

    pub fn rect_to_pixels(&self, rect: Rect) -> PixelRect {
        PixelRect {
            left: self.left + rect.x * self.width,
            top: self.top + rect.y * self.height,
            width: rect.width * self.width,
            height: rect.height * self.height,
        }
    }
}

/// Reports where the slide canvas currently is. `None` hides the overlay.
pub trait ViewportProvider: Send + Sync {
    fn viewport_rect(&self) -> Option<ViewportRect>;
}

/// Reports the 0-based index of the slide on screen; negative when unknown.
pub trait SlideIndexProvider: Send + Sync {
    fn active_slide_index(&self) -> i64;
}

/// 1-based page for a 0-based slide index. Unknown (negative) indices map
/// to slide 1.
pub fn slide_page_from_index(index: i64) -> SlidePage {
    if index < 0 {
        return 1;
    }
    SlidePage::try_from(index)
        .ok()
        .and_then(|i| i.checked_add(1))
        .unwrap_or(SlidePage::MAX)
}

/// Why the viewport was re-read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    Initial,
    Resize,
    Scroll,
    Navigation,
}

impl SyncTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Resize => "resize",
            Self::Scroll => "scroll",
            Self::Navigation => "navigation",
        }
    }
}
