//! Overlay state machine.
//!
//! Two modes: [`OverlayMode::Browse`] (initial), where canvas clicks are
//! inert and pins toggle a single detail bubble, and
//! [`OverlayMode::Placing`], where the next click on the canvas drops a
//! manual pin for one feedback item. Only one placement is active at a
//! time; starting another supersedes the first.
//!
//! The controller only reads the pin map, except through
//! [`PinStore::add_manual_pin`] and [`PinStore::regenerate`].

use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use serde_json::json;
use slidepin_core::anchor::AnchorSource;
use slidepin_core::feedback::{FeedbackItem, FeedbackParser};
use slidepin_core::pins::{Pin, PinStore, SyncStatus};
use slidepin_core::types::SlidePage;
use slidepin_events::{event_types, EventBus, ReviewEvent};

use crate::bubble::{bubble_placement, BubblePlacement};
use crate::config::OverlayConfig;
use crate::viewport::{
    slide_page_from_index, PixelRect, SlideIndexProvider, SyncTrigger, ViewportProvider, ViewportRect,
};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverlayMode {
    Browse,
    Placing { feedback_id: String },
}

/// Why a placement ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacementEnd {
    Placed,
    Escape,
    Cancel,
    Superseded,
}

impl PlacementEnd {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Placed => "placed",
            Self::Escape => "escape",
            Self::Cancel => "cancel",
            Self::Superseded => "superseded",
        }
    }
}

/// Result of a canvas click.
#[derive(Debug, Clone, PartialEq)]
pub enum ClickOutcome {
    /// Browse mode, no viewport, or outside the canvas.
    Ignored,
    Placed { pin: Pin, status: SyncStatus },
}

/// One pin as drawn on screen.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedPin {
    pub pin_id: String,
    pub feedback_id: Option<String>,
    pub title: Option<String>,
    pub source: AnchorSource,
    /// Pixel position of the marker.
    pub x: f64,
    pub y: f64,
    /// Pixel highlight for rect pins.
    pub highlight: Option<PixelRect>,
    pub placement: BubblePlacement,
    pub open: bool,
}

/// Everything needed to draw the overlay for the current slide.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlayFrame {
    pub visible: bool,
    pub slide_page: SlidePage,
    pub viewport: Option<ViewportRect>,
    /// Feedback id being placed, if any.
    pub placing: Option<String>,
    pub pins: Vec<RenderedPin>,
}

struct OverlayState {
    mode: OverlayMode,
    open_pin_id: Option<String>,
    viewport: Option<ViewportRect>,
    slide_page: SlidePage,
    visible: bool,
}

// ---------------------------------------------------------------------------
// OverlayController
// ---------------------------------------------------------------------------

pub struct OverlayController {
    pins: Arc<PinStore>,
    viewport: Arc<dyn ViewportProvider>,
    slides: Arc<dyn SlideIndexProvider>,
    bus: Arc<EventBus>,
    config: OverlayConfig,
    state: Mutex<OverlayState>,
}

impl OverlayController {
    /// The viewport starts unknown (overlay hidden) until the first
    /// [`sync_viewport`](Self::sync_viewport).
    pub fn new(
        pins: Arc<PinStore>,
        viewport: Arc<dyn ViewportProvider>,
        slides: Arc<dyn SlideIndexProvider>,
        bus: Arc<EventBus>,
        config: OverlayConfig,
    ) -> Self {
        let slide_page = slide_page_from_index(slides.active_slide_index());
        Self {
            pins,
            viewport,
            slides,
            bus,
            config,
            state: Mutex::new(OverlayState {
                mode: OverlayMode::Browse,
                open_pin_id: None,
                viewport: None,
                slide_page,
                visible: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, OverlayState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn publish(&self, event_type: &str, payload: serde_json::Value) {
        self.bus.publish(
            ReviewEvent::new(event_type)
                .for_document(self.pins.document_id())
                .with_payload(payload),
        );
    }

    fn report_sync(&self, operation: &str, status: &SyncStatus) {
        if let Some(event) = ReviewEvent::from_sync_status(self.pins.document_id(), operation, status) {
            self.bus.publish(event);
        }
    }

    // -- accessors ----------------------------------------------------------

    pub fn mode(&self) -> OverlayMode {
        self.lock().mode.clone()
    }

    pub fn slide_page(&self) -> SlidePage {
        self.lock().slide_page
    }

    pub fn open_pin_id(&self) -> Option<String> {
        self.lock().open_pin_id.clone()
    }

    pub fn viewport(&self) -> Option<ViewportRect> {
        self.lock().viewport
    }

    pub fn config(&self) -> &OverlayConfig {
        &self.config
    }

    pub fn pin_store(&self) -> &Arc<PinStore> {
        &self.pins
    }

    // -- placement ----------------------------------------------------------

    /// Enter placement mode for `feedback_id`, ending any placement already
    /// in progress with [`PlacementEnd::Superseded`].
    pub fn begin_placement(&self, feedback_id: &str) {
        let previous = {
            let mut state = self.lock();
            state.open_pin_id = None;
            std::mem::replace(
                &mut state.mode,
                OverlayMode::Placing {
                    feedback_id: feedback_id.to_string(),
                },
            )
        };

        if let OverlayMode::Placing { feedback_id: previous } = previous {
            self.publish(
                event_types::PLACEMENT_ENDED,
                json!({ "feedbackId": previous, "reason": PlacementEnd::Superseded.as_str() }),
            );
        }
        self.publish(event_types::PLACEMENT_STARTED, json!({ "feedbackId": feedback_id }));
        tracing::debug!(feedback_id, "Placement started");
        self.refresh_visibility();
    }

    fn end_placement(&self, reason: PlacementEnd) -> Option<String> {
        let ended = match std::mem::replace(&mut self.lock().mode, OverlayMode::Browse) {
            OverlayMode::Placing { feedback_id } => Some(feedback_id),
            OverlayMode::Browse => None,
        };
        if let Some(feedback_id) = &ended {
            self.publish(
                event_types::PLACEMENT_ENDED,
                json!({ "feedbackId": feedback_id, "reason": reason.as_str() }),
            );
            tracing::debug!(feedback_id = %feedback_id, reason = reason.as_str(), "Placement ended");
            self.refresh_visibility();
        }
        ended
    }

    /// Leave placement mode. `false` when not placing.
    pub fn cancel_placement(&self) -> bool {
        self.end_placement(PlacementEnd::Cancel).is_some()
    }

    /// Keyboard input using DOM key names. `Escape` ends a placement, or
    /// closes the open bubble in browse mode. Returns whether the key was
    /// consumed.
    pub fn handle_key(&self, key: &str) -> bool {
        if !matches!(key, "Escape" | "Esc") {
            return false;
        }
        if self.end_placement(PlacementEnd::Escape).is_some() {
            return true;
        }
        self.close_bubble()
    }

    /// A click on the page at pixel `(px, py)`.
    ///
    /// While placing, a click on the canvas pins the clicked point (clamped
    /// to the placement margin) to the current slide and returns to browse
    /// mode. Everything else is ignored.
    pub async fn handle_click(&self, px: f64, py: f64) -> ClickOutcome {
        let (feedback_id, slide_page, point) = {
            let mut state = self.lock();
            let OverlayMode::Placing { feedback_id } = &state.mode else {
                return ClickOutcome::Ignored;
            };
            let feedback_id = feedback_id.clone();
            let Some(viewport) = state.viewport.filter(|v| v.contains(px, py)) else {
                return ClickOutcome::Ignored;
            };
            let point = viewport.to_normalized(px, py, self.config.placement_margin);
            state.mode = OverlayMode::Browse;
            (feedback_id, state.slide_page, point)
        };

        let (pin, status) = self
            .pins
            .add_manual_pin(Some(&feedback_id), slide_page, point)
            .await;

        self.publish(
            event_types::PIN_PLACED,
            json!({
                "pinId": pin.pin_id,
                "feedbackId": feedback_id,
                "slidePage": slide_page,
                "x": point.x,
                "y": point.y,
            }),
        );
        self.publish(
            event_types::PLACEMENT_ENDED,
            json!({ "feedbackId": feedback_id, "reason": PlacementEnd::Placed.as_str() }),
        );
        self.report_sync("add_manual_pin", &status);
        self.refresh_visibility();

        ClickOutcome::Placed { pin, status }
    }

    // -- bubbles ------------------------------------------------------------

    /// Open the bubble of `pin_id`, or close it if it is already open. At
    /// most one bubble is open. Ignored while placing or for unknown pins.
    /// Returns the open pin afterwards.
    pub fn toggle_pin(&self, pin_id: &str) -> Option<String> {
        let known = self.pins.find_by_id(pin_id).is_some();
        let mut state = self.lock();
        if matches!(state.mode, OverlayMode::Placing { .. }) || !known {
            return state.open_pin_id.clone();
        }
        state.open_pin_id = if state.open_pin_id.as_deref() == Some(pin_id) {
            None
        } else {
            Some(pin_id.to_string())
        };
        state.open_pin_id.clone()
    }

    /// `true` when a bubble was open.
    pub fn close_bubble(&self) -> bool {
        self.lock().open_pin_id.take().is_some()
    }

    // -- synchronization ----------------------------------------------------

    /// Re-read the canvas rectangle. An unusable rectangle counts as no
    /// canvas.
    pub fn sync_viewport(&self, trigger: SyncTrigger) -> Option<ViewportRect> {
        let rect = self.viewport.viewport_rect().filter(ViewportRect::is_usable);
        self.lock().viewport = rect;

        self.publish(
            event_types::VIEWPORT_SYNCED,
            json!({ "trigger": trigger.as_str(), "visible": rect.is_some(), "rect": rect }),
        );
        tracing::trace!(trigger = trigger.as_str(), known = rect.is_some(), "Viewport synced");
        self.refresh_visibility();
        rect
    }

    /// Read the active slide; on change switch slides, close the bubble and
    /// resync the viewport. Returns the new page when it changed.
    pub fn poll_slide(&self) -> Option<SlidePage> {
        let page = slide_page_from_index(self.slides.active_slide_index());
        let previous = {
            let mut state = self.lock();
            if state.slide_page == page {
                return None;
            }
            state.open_pin_id = None;
            std::mem::replace(&mut state.slide_page, page)
        };

        self.publish(event_types::SLIDE_CHANGED, json!({ "from": previous, "to": page }));
        tracing::debug!(from = previous, to = page, "Slide changed");
        self.sync_viewport(SyncTrigger::Navigation);
        Some(page)
    }

    // -- feedback -----------------------------------------------------------

    /// Replace the AI pins with `items` and redraw.
    pub async fn apply_feedback(&self, items: Vec<FeedbackItem>) -> SyncStatus {
        let item_count = items.len();
        let status = self.pins.regenerate(items).await;

        if let Some(open) = self.open_pin_id() {
            if self.pins.find_by_id(&open).is_none() {
                self.close_bubble();
            }
        }

        self.publish(
            event_types::PINS_REGENERATED,
            json!({ "items": item_count, "pins": self.pins.total_pins() }),
        );
        self.report_sync("regenerate", &status);
        self.refresh_visibility();
        status
    }

    /// Parse reviewer output and apply it.
    pub async fn load_review(&self, raw: &str) -> SyncStatus {
        self.apply_feedback(FeedbackParser::parse(raw)).await
    }

    // -- rendering ----------------------------------------------------------

    fn compute_visible(&self, state: &OverlayState) -> bool {
        state.viewport.is_some()
            && (matches!(state.mode, OverlayMode::Placing { .. })
                || !self.pins.pins_for_slide(state.slide_page).is_empty())
    }

    /// Shown iff the canvas is known and either a placement is active or
    /// the current slide has pins.
    pub fn is_visible(&self) -> bool {
        let state = self.lock();
        self.compute_visible(&state)
    }

    fn refresh_visibility(&self) -> bool {
        let (visible, changed) = {
            let mut state = self.lock();
            let visible = self.compute_visible(&state);
            let changed = state.visible != visible;
            state.visible = visible;
            (visible, changed)
        };
        if changed {
            self.publish(event_types::OVERLAY_VISIBILITY, json!({ "visible": visible }));
            tracing::debug!(visible, "Overlay visibility changed");
        }
        visible
    }

    /// Pixel layout of the current slide's pins.
    pub fn render(&self) -> OverlayFrame {
        let (slide_page, viewport, placing, open) = {
            let state = self.lock();
            let placing = match &state.mode {
                OverlayMode::Placing { feedback_id } => Some(feedback_id.clone()),
                OverlayMode::Browse => None,
            };
            (state.slide_page, state.viewport, placing, state.open_pin_id.clone())
        };

        let pins = self.pins.pins_for_slide(slide_page);
        let feedback = self.pins.feedback();
        let visible = viewport.is_some() && (placing.is_some() || !pins.is_empty());

        let rendered = match viewport {
            Some(view) => pins
                .iter()
                .map(|pin| {
                    let position = pin.position();
                    let (x, y) = view.to_pixels(position);
                    let title = pin
                        .feedback_id
                        .as_deref()
                        .and_then(|id| feedback.iter().find(|item| item.id == id))
                        .map(|item| item.title.clone());
                    RenderedPin {
                        pin_id: pin.pin_id.clone(),
                        feedback_id: pin.feedback_id.clone(),
                        title,
                        source: pin.source,
                        x,
                        y,
                        highlight: pin.geometry.rect().map(|r| view.rect_to_pixels(r)),
                        placement: bubble_placement(position),
                        open: open.as_deref() == Some(pin.pin_id.as_str()),
                    }
                })
                .collect(),
            None => Vec::new(),
        };

        OverlayFrame {
            visible,
            slide_page,
            viewport,
            placing,
            pins: rendered,
        }
    }
}
