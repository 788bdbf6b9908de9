//! Event names published on the [`EventBus`](crate::EventBus).

/// Overlay entered placement mode. Payload: `feedbackId`.
pub const PLACEMENT_STARTED: &str = "placement.started";

/// Overlay left placement mode. Payload: `feedbackId`, `reason`.
pub const PLACEMENT_ENDED: &str = "placement.ended";

/// A manual pin was placed. Payload: `pinId`, `feedbackId`, `slidePage`, `x`, `y`.
pub const PIN_PLACED: &str = "pin.placed";

/// Pins were rebuilt from a new feedback batch. Payload: `items`, `pins`.
pub const PINS_REGENERATED: &str = "pins.regenerated";

/// The active slide changed. Payload: `from`, `to`.
pub const SLIDE_CHANGED: &str = "slide.changed";

/// The overlay re-read the viewport. Payload: `trigger` plus the rect, or
/// `visible: false` when the canvas is gone.
pub const VIEWPORT_SYNCED: &str = "viewport.synced";

/// Overlay visibility flipped. Payload: `visible`.
pub const OVERLAY_VISIBILITY: &str = "overlay.visibility";

/// A write-through failed; in-memory state is still authoritative.
/// Payload: `operation`, `reason`.
pub const STORAGE_FAILED: &str = "storage.failed";
