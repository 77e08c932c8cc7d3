//! Gapless playback scheduling
//!
//! Units are chained back to back on the output device clock: each one starts
//! exactly where the previous one ends, no matter when it arrived. If the
//! device clock has already passed the cursor (a stall), the cursor is pulled
//! forward to "now" instead of scheduling into the past.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use super::backend::AudioFrame;
use super::output::{FinishNotifier, OutputDevice, UnitId};
use crate::error::Result;

/// One scheduled (or sounding) buffer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackUnit {
    pub id: UnitId,
    /// Start offset on the device clock, seconds
    pub start_at: f64,
    /// Duration, seconds
    pub duration: f64,
}

impl PlaybackUnit {
    pub fn end_at(&self) -> f64 {
        self.start_at + self.duration
    }
}

pub struct PlaybackScheduler {
    device: Box<dyn OutputDevice>,
    cursor: f64,
    active: HashMap<UnitId, PlaybackUnit>,
    next_id: UnitId,
    finished_tx: mpsc::UnboundedSender<UnitId>,
}

impl PlaybackScheduler {
    /// Completion notifications are delivered on `finished_tx`; the owner
    /// feeds each received id back through `on_finished`.
    pub fn new(device: Box<dyn OutputDevice>, finished_tx: mpsc::UnboundedSender<UnitId>) -> Self {
        Self {
            device,
            cursor: 0.0,
            active: HashMap::new(),
            next_id: 1,
            finished_tx,
        }
    }

    pub async fn acquire(&mut self) -> Result<()> {
        self.device.acquire().await
    }

    /// Drop everything and release the output device
    pub fn release(&mut self) {
        self.interrupt();
        self.device.release();
    }

    /// Schedule a decoded frame right after everything already queued
    pub fn enqueue(&mut self, frame: AudioFrame) -> Result<PlaybackUnit> {
        let now = self.device.current_time();
        self.cursor = self.cursor.max(now);

        let id = self.next_id;
        self.next_id += 1;

        let unit = PlaybackUnit {
            id,
            start_at: self.cursor,
            duration: frame.duration_secs(),
        };

        self.device.start_unit(
            Arc::new(frame),
            unit.start_at,
            FinishNotifier::new(id, self.finished_tx.clone()),
        )?;
        self.active.insert(id, unit);
        self.cursor += unit.duration;

        debug!(
            "Scheduled unit {} at {:.3}s for {:.3}s ({} active)",
            id,
            unit.start_at,
            unit.duration,
            self.active.len()
        );

        Ok(unit)
    }

    /// Record natural completion of a unit
    ///
    /// Returns true when this completion drained the active set. Ids that are
    /// no longer active (cleared by an interruption) are ignored.
    pub fn on_finished(&mut self, id: UnitId) -> bool {
        if self.active.remove(&id).is_none() {
            debug!("Ignoring completion of inactive unit {}", id);
            return false;
        }
        self.active.is_empty()
    }

    /// Stop everything immediately and reset the cursor
    pub fn interrupt(&mut self) {
        let stopped = self.active.len();
        for (id, _) in self.active.drain() {
            if let Err(e) = self.device.stop_unit(id) {
                debug!("Failed to stop unit {}: {}", id, e);
            }
        }
        self.cursor = 0.0;

        if stopped > 0 {
            debug!("Interrupted playback ({} units stopped)", stopped);
        }
    }

    pub fn cursor(&self) -> f64 {
        self.cursor
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    pub fn is_idle(&self) -> bool {
        self.active.is_empty()
    }

    pub fn current_time(&self) -> f64 {
        self.device.current_time()
    }
}
