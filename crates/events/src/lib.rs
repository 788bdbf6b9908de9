//! slidepin event bus.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`ReviewEvent`]: the event envelope for overlay, pin and storage
//!   activity.
//! - [`event_types`]: the dot-separated names published today.
//! - [`EventLogger`]: background subscriber that mirrors events into
//!   `tracing`.

pub mod bus;
pub mod event_types;
pub mod logger;

pub use bus::{EventBus, ReviewEvent};
pub use logger::EventLogger;
