//! Background synchronization loop.
//!
//! One task selects over the slide poll interval, the resize and scroll
//! debounce deadlines, pushed [`OverlaySignal`]s and cancellation. Pushed
//! navigation signals are handled immediately; polling still runs, so the
//! worst-case staleness stays at one poll interval either way.

use std::future::pending;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::controller::OverlayController;
use crate::viewport::SyncTrigger;

/// Host notifications fed into the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlaySignal {
    /// The window or canvas was resized. Debounced.
    Resize,
    /// Something scrolled (any element, capture phase). Debounced.
    Scroll,
    /// The host knows the slide changed. Checked immediately.
    Navigation,
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => pending().await,
    }
}

/// Run the sync loop until `cancel` fires.
///
/// Performs an initial viewport sync and slide check before entering the
/// loop. If every signal sender is dropped the loop keeps polling.
pub async fn run(
    controller: Arc<OverlayController>,
    mut signals: mpsc::UnboundedReceiver<OverlaySignal>,
    cancel: CancellationToken,
) {
    let config = controller.config().clone();
    tracing::info!(
        poll_ms = config.poll_interval.as_millis() as u64,
        resize_debounce_ms = config.resize_debounce.as_millis() as u64,
        scroll_debounce_ms = config.scroll_debounce.as_millis() as u64,
        "Overlay sync started"
    );

    controller.sync_viewport(SyncTrigger::Initial);
    controller.poll_slide();

    let mut poll = time::interval_at(Instant::now() + config.poll_interval, config.poll_interval);
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut resize_deadline: Option<Instant> = None;
    let mut scroll_deadline: Option<Instant> = None;
    let mut signals_open = true;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Overlay sync stopping");
                break;
            }
            _ = poll.tick() => {
                controller.poll_slide();
            }
            signal = signals.recv(), if signals_open => {
                match signal {
                    Some(OverlaySignal::Resize) => {
                        resize_deadline = Some(Instant::now() + config.resize_debounce);
                    }
                    Some(OverlaySignal::Scroll) => {
                        scroll_deadline = Some(Instant::now() + config.scroll_debounce);
                    }
                    Some(OverlaySignal::Navigation) => {
                        if controller.poll_slide().is_none() {
                            controller.sync_viewport(SyncTrigger::Navigation);
                        }
                    }
                    None => {
                        tracing::debug!("Overlay signal channel closed, polling only");
                        signals_open = false;
                    }
                }
            }
            _ = wait_until(resize_deadline) => {
                resize_deadline = None;
                controller.sync_viewport(SyncTrigger::Resize);
            }
            _ = wait_until(scroll_deadline) => {
                scroll_deadline = None;
                controller.sync_viewport(SyncTrigger::Scroll);
            }
        }
    }
}

/// Owner of a spawned sync loop.
pub struct OverlayHandle {
    signals: mpsc::UnboundedSender<OverlaySignal>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl OverlayHandle {
    /// Spawn [`run`] for `controller` on the current runtime.
    pub fn spawn(controller: Arc<OverlayController>) -> Self {
        let (signals, receiver) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(controller, receiver, cancel.clone()));
        Self { signals, cancel, task }
    }

    fn send(&self, signal: OverlaySignal) {
        if self.signals.send(signal).is_err() {
            tracing::warn!(?signal, "Overlay sync loop is gone, signal dropped");
        }
    }

    pub fn notify_resize(&self) {
        self.send(OverlaySignal::Resize);
    }

    pub fn notify_scroll(&self) {
        self.send(OverlaySignal::Scroll);
    }

    pub fn notify_navigation(&self) {
        self.send(OverlaySignal::Navigation);
    }

    /// Stop the loop and wait for it to exit.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Overlay sync task failed");
        }
    }
}
