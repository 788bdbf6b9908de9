//! Per-slide pin state.
//!
//! [`PinStore`] owns the `{slidePage → Pin[]}` map for one document. Readers
//! take cheap `Arc` snapshots; [`PinStore::regenerate`] builds a complete
//! new map before swapping it in, so a snapshot is always either the whole
//! old generation or the whole new one. Pins and feedback are swapped under
//! one lock, so they never come from different generations.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::anchor::{AnchorSource, Geometry, Point};
use crate::error::CoreError;
use crate::feedback::FeedbackItem;
use crate::persistence::{feedback_key, load_record, pins_key, save_record, KeyValueStore};
use crate::types::{SlidePage, Timestamp};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A renderable marker on one slide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pin {
    pub pin_id: String,
    /// `None` for ad-hoc pins not tied to a review comment.
    pub feedback_id: Option<String>,
    pub slide_page: SlidePage,
    #[serde(flatten)]
    pub geometry: Geometry,
    pub anchor_index: usize,
    pub source: AnchorSource,
    pub created_at: Timestamp,
}

impl Pin {
    /// Where the pin is drawn.
    pub fn position(&self) -> Point {
        self.geometry.position()
    }

    pub fn is_manual(&self) -> bool {
        self.source == AnchorSource::Manual
    }
}

/// Pins partitioned by slide page. Only pages with pins have a bucket.
pub type PinMap = BTreeMap<SlidePage, Vec<Pin>>;

/// Outcome of the write-through after a mutation.
///
/// The in-memory state is authoritative either way; `Unsaved` only means
/// the change will not survive a reload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    Saved,
    Unsaved { reason: String },
}

impl SyncStatus {
    pub fn is_saved(&self) -> bool {
        matches!(self, Self::Saved)
    }
}

// ---------------------------------------------------------------------------
// PinStore
// ---------------------------------------------------------------------------

/// Pins and the feedback items they were derived from. Swapped as a unit.
#[derive(Default)]
struct Generation {
    pins: Arc<PinMap>,
    feedback: Arc<Vec<FeedbackItem>>,
}

/// Pin and feedback state for one document, written through to a
/// [`KeyValueStore`] after every mutation.
pub struct PinStore {
    document_id: String,
    store: Arc<dyn KeyValueStore>,
    state: RwLock<Generation>,
}

impl PinStore {
    /// Empty state for `document_id`.
    pub fn new(document_id: impl Into<String>, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            document_id: document_id.into(),
            store,
            state: RwLock::new(Generation::default()),
        }
    }

    /// Reload the state last persisted for `document_id`. Missing records
    /// yield an empty store.
    pub async fn restore(
        document_id: impl Into<String>,
        store: Arc<dyn KeyValueStore>,
    ) -> Result<Self, CoreError> {
        let document_id = document_id.into();
        let pins: PinMap = load_record(store.as_ref(), &pins_key(&document_id))
            .await?
            .unwrap_or_default();
        let feedback: Vec<FeedbackItem> = load_record(store.as_ref(), &feedback_key(&document_id))
            .await?
            .unwrap_or_default();

        tracing::debug!(
            document_id = %document_id,
            slides = pins.len(),
            feedback = feedback.len(),
            "Restored pin state"
        );

        Ok(Self {
            document_id,
            store,
            state: RwLock::new(Generation {
                pins: Arc::new(pins),
                feedback: Arc::new(feedback),
            }),
        })
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    // -- mutations ----------------------------------------------------------

    /// Replace every AI pin with pins derived from `items`.
    ///
    /// Manual pins present when the new generation is swapped in are carried
    /// over. Each bucket ends up sorted by `anchor_index`.
    pub async fn regenerate(&self, items: Vec<FeedbackItem>) -> SyncStatus {
        let now = Utc::now();

        let mut next = PinMap::new();
        for item in &items {
            for anchor in &item.anchors {
                next.entry(anchor.slide_page).or_default().push(Pin {
                    pin_id: Uuid::new_v4().to_string(),
                    feedback_id: Some(item.id.clone()),
                    slide_page: anchor.slide_page,
                    geometry: anchor.geometry,
                    anchor_index: anchor.anchor_index,
                    source: anchor.source,
                    created_at: now,
                });
            }
        }

        let item_count = items.len();
        let (slides, total) = {
            let mut state = write_lock(&self.state);
            for pin in state.pins.values().flatten().filter(|p| p.is_manual()) {
                next.entry(pin.slide_page).or_default().push(pin.clone());
            }
            for bucket in next.values_mut() {
                bucket.sort_by_key(|p| p.anchor_index);
            }
            let counts = (next.len(), next.values().map(Vec::len).sum::<usize>());
            *state = Generation {
                pins: Arc::new(next),
                feedback: Arc::new(items),
            };
            counts
        };

        tracing::info!(
            document_id = %self.document_id,
            items = item_count,
            slides,
            pins = total,
            "Regenerated pins"
        );

        self.persist().await
    }

    /// Append a point-only manual pin to `slide_page` without touching other
    /// buckets.
    pub async fn add_manual_pin(
        &self,
        feedback_id: Option<&str>,
        slide_page: SlidePage,
        position: Point,
    ) -> (Pin, SyncStatus) {
        let slide_page = slide_page.max(1);
        let pin = {
            let mut state = write_lock(&self.state);
            let mut map = PinMap::clone(&state.pins);
            let bucket = map.entry(slide_page).or_default();
            let anchor_index = bucket.iter().map(|p| p.anchor_index + 1).max().unwrap_or(0);
            let pin = Pin {
                pin_id: Uuid::new_v4().to_string(),
                feedback_id: feedback_id.map(str::to_string),
                slide_page,
                geometry: Geometry::Position(Point {
                    x: position.x.clamp(0.0, 1.0),
                    y: position.y.clamp(0.0, 1.0),
                }),
                anchor_index,
                source: AnchorSource::Manual,
                created_at: Utc::now(),
            };
            bucket.push(pin.clone());
            state.pins = Arc::new(map);
            pin
        };

        tracing::info!(
            document_id = %self.document_id,
            pin_id = %pin.pin_id,
            slide = slide_page,
            feedback_id = ?pin.feedback_id,
            "Placed manual pin"
        );

        let status = self.persist().await;
        (pin, status)
    }

    /// Drop every manual pin, keeping AI pins.
    pub async fn clear_manual_pins(&self) -> SyncStatus {
        let removed = {
            let mut state = write_lock(&self.state);
            let mut map = PinMap::clone(&state.pins);
            let before: usize = map.values().map(Vec::len).sum();
            for bucket in map.values_mut() {
                bucket.retain(|p| !p.is_manual());
            }
            map.retain(|_, bucket| !bucket.is_empty());
            let after: usize = map.values().map(Vec::len).sum();
            state.pins = Arc::new(map);
            before - after
        };
        tracing::info!(document_id = %self.document_id, removed, "Cleared manual pins");
        self.persist().await
    }

    // -- queries ------------------------------------------------------------

    /// The current generation. Never partially updated.
    pub fn snapshot(&self) -> Arc<PinMap> {
        Arc::clone(&read_lock(&self.state).pins)
    }

    /// Feedback items of the current generation.
    pub fn feedback(&self) -> Arc<Vec<FeedbackItem>> {
        Arc::clone(&read_lock(&self.state).feedback)
    }

    pub fn feedback_item(&self, feedback_id: &str) -> Option<FeedbackItem> {
        self.feedback().iter().find(|i| i.id == feedback_id).cloned()
    }

    pub fn pins_for_slide(&self, slide_page: SlidePage) -> Vec<Pin> {
        self.snapshot().get(&slide_page).cloned().unwrap_or_default()
    }

    pub fn find_by_feedback(&self, feedback_id: &str) -> Vec<Pin> {
        self.snapshot()
            .values()
            .flatten()
            .filter(|p| p.feedback_id.as_deref() == Some(feedback_id))
            .cloned()
            .collect()
    }

    pub fn find_by_id(&self, pin_id: &str) -> Option<Pin> {
        self.snapshot()
            .values()
            .flatten()
            .find(|p| p.pin_id == pin_id)
            .cloned()
    }

    pub fn total_pins(&self) -> usize {
        self.snapshot().values().map(Vec::len).sum()
    }

    // -- persistence --------------------------------------------------------

    async fn persist(&self) -> SyncStatus {
        let (feedback, pins) = {
            let state = read_lock(&self.state);
            (Arc::clone(&state.feedback), Arc::clone(&state.pins))
        };

        let store = self.store.as_ref();
        let result = match save_record(store, &feedback_key(&self.document_id), &*feedback).await {
            Ok(()) => save_record(store, &pins_key(&self.document_id), &*pins).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => SyncStatus::Saved,
            Err(e) => {
                tracing::warn!(
                    document_id = %self.document_id,
                    error = %e,
                    "Failed to persist pin state"
                );
                SyncStatus::Unsaved {
                    reason: e.to_string(),
                }
            }
        }
    }
}

fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
