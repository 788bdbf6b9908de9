//! Screen overlay for slide pins.
//!
//! The overlay does not own the slide canvas. It is told where the canvas
//! is ([`ViewportProvider`]) and which slide is showing
//! ([`SlideIndexProvider`]), maps pins between slide-relative and pixel
//! coordinates, and runs the browse / placement state machine.
//!
//! [`runner`] keeps the overlay in sync: slide polling plus debounced
//! resize and scroll resyncs, in one cancellable background task.

pub mod bubble;
pub mod config;
pub mod controller;
pub mod runner;
pub mod viewport;

pub use bubble::{bubble_placement, BubblePlacement};
pub use config::OverlayConfig;
pub use controller::{ClickOutcome, OverlayController, OverlayFrame, OverlayMode, PlacementEnd, RenderedPin};
pub use runner::{OverlayHandle, OverlaySignal};
pub use viewport::{SlideIndexProvider, SyncTrigger, ViewportProvider, ViewportRect};
