use std::sync::Arc;

use pose_capture_common::frame::TimestampedFrame;
use pose_capture_source::FrameReceiver;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::db::{CaptureDb, CaptureRecord};
use crate::keys::capture_key;
use crate::storage::CaptureStorage;
use crate::trigger::TriggerReason;

/// A captured frame, as shown by the control surface.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub jpeg: Vec<u8>,
    pub captured_at_ms: i64,
    pub seq: u64,
    pub reason: TriggerReason,
    /// Where the frame was persisted, if storing succeeded.
    pub object_key: Option<String>,
}

pub type SnapshotReceiver = watch::Receiver<Option<Arc<Snapshot>>>;

#[derive(Debug, Default)]
pub struct CaptureState {
    pub triggered: bool,
    pub image: Option<Arc<Snapshot>>,
}

/// Stores triggered frames.
///
/// The sink samples the newest frame from the source itself, so a capture
/// request carries only its reason.
pub struct CaptureSink {
    frames: FrameReceiver,
    state: CaptureState,
    snapshot_tx: watch::Sender<Option<Arc<Snapshot>>>,
    storage: Arc<CaptureStorage>,
    db: Option<Arc<CaptureDb>>,
    camera_id: String,
    prefix: String,
    retain: usize,
    /// `(captured_at_ms, seq)` and key of the last persisted frame.
    last_stored: Option<((i64, u64), String)>,
}

impl CaptureSink {
    pub fn new(
        frames: FrameReceiver,
        storage: Arc<CaptureStorage>,
        db: Option<Arc<CaptureDb>>,
        camera_id: String,
        prefix: String,
        retain: usize,
    ) -> Self {
        let (snapshot_tx, _) = watch::channel(None);
        Self {
            frames,
            state: CaptureState::default(),
            snapshot_tx,
            storage,
            db,
            camera_id,
            prefix,
            retain,
            last_stored: None,
        }
    }

    pub fn subscribe(&self) -> SnapshotReceiver {
        self.snapshot_tx.subscribe()
    }

    pub fn state(&self) -> &CaptureState {
        &self.state
    }

    /// Sample the current frame and store it as the snapshot.
    ///
    /// Returns `None` when the source has not produced a frame yet. Storage
    /// and database failures are logged; the in-memory snapshot is still
    /// replaced. A frame is persisted at most once: capturing it again
    /// republishes the snapshot under the existing key.
    pub async fn capture(&mut self, reason: TriggerReason) -> Option<Arc<Snapshot>> {
        let frame = self.frames.borrow().clone();
        let Some(frame) = frame else {
            warn!(trigger = reason.as_str(), "capture requested before any frame arrived");
            return None;
        };

        let frame_id = (frame.captured_at_ms, frame.seq);
        let already_stored = self
            .last_stored
            .as_ref()
            .filter(|(id, _)| *id == frame_id)
            .map(|(_, key)| key.clone());
        let stored_now = already_stored.is_none();
        let object_key = match already_stored {
            Some(key) => {
                debug!(seq = frame.seq, key = %key, "frame already stored");
                Some(key)
            }
            None => {
                let key = self.persist(&frame, &reason).await;
                if let Some(key) = &key {
                    self.last_stored = Some((frame_id, key.clone()));
                }
                key
            }
        };

        let snapshot = Arc::new(Snapshot {
            jpeg: frame.jpeg,
            captured_at_ms: frame.captured_at_ms,
            seq: frame.seq,
            reason,
            object_key,
        });

        self.state.triggered = true;
        self.state.image = Some(Arc::clone(&snapshot));
        self.snapshot_tx.send_replace(Some(Arc::clone(&snapshot)));

        match reason {
            TriggerReason::ArmAngle { side, angle_deg } => info!(
                seq = snapshot.seq,
                side = side.as_str(),
                angle_deg = format!("{angle_deg:.1}"),
                key = snapshot.object_key,
                "captured frame (arm angle)"
            ),
            _ => info!(
                seq = snapshot.seq,
                trigger = reason.as_str(),
                key = snapshot.object_key,
                "captured frame"
            ),
        }

        if stored_now && snapshot.object_key.is_some() {
            self.apply_retention().await;
        }
        Some(snapshot)
    }

    async fn persist(&self, frame: &TimestampedFrame, reason: &TriggerReason) -> Option<String> {
        let key = capture_key(
            &self.prefix,
            &self.camera_id,
            frame.captured_at_ms,
            frame.seq,
            reason.as_str(),
        );
        let size_bytes = frame.payload_size() as u64;

        match self
            .storage
            .put_capture(&key, frame.jpeg.clone(), frame.captured_at_ms, frame.seq)
            .await
        {
            Ok(()) => {
                self.record(&key, reason, frame.captured_at_ms, frame.seq, size_bytes);
                Some(key)
            }
            Err(e) => {
                error!(error = %e, key, "failed to store capture");
                None
            }
        }
    }

    /// Drop the current snapshot. Stored captures are kept.
    pub fn clear(&mut self) {
        self.state = CaptureState::default();
        self.snapshot_tx.send_replace(None);
        debug!("snapshot cleared");
    }

    fn record(&self, key: &str, reason: &TriggerReason, ts: i64, seq: u64, size_bytes: u64) {
        let Some(db) = &self.db else {
            return;
        };
        let (side, angle_deg) = match reason {
            TriggerReason::ArmAngle { side, angle_deg } => {
                (Some(side.as_str().to_string()), Some(*angle_deg))
            }
            _ => (None, None),
        };
        let record = CaptureRecord {
            trigger: reason.as_str().to_string(),
            side,
            angle_deg,
            captured_at_ms: ts,
            frame_seq: seq,
            object_key: key.to_string(),
            size_bytes,
        };
        if let Err(e) = db.insert_capture(&record) {
            error!(error = %e, key, "failed to insert capture into SQLite");
        }
    }

    async fn apply_retention(&self) {
        let removed = self.storage.enforce_retention(self.retain).await;
        if removed.is_empty() {
            return;
        }
        let (kept, bytes) = self.storage.stats().await;
        info!(
            evicted = removed.len(),
            kept,
            bytes,
            retain = self.retain,
            "evicted old captures"
        );
        if let Some(db) = &self.db {
            if let Err(e) = db.delete_by_keys(&removed) {
                error!(error = %e, "failed to delete evicted captures from SQLite");
            }
        }
    }
}
