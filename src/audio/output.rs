//! Output device abstraction and the software timeline that backs it
//!
//! The timeline owns the output clock (samples rendered so far) and mixes
//! scheduled units into whatever buffer the driver asks for. Drivers:
//! - Null: renders into nothing at wall-clock pace (headless runs)
//! - Manual: nothing advances the clock until the owner calls `advance`
//! - Speaker: cpal output stream (feature `cpal`)

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::backend::AudioFrame;
use crate::error::{Result, VoiceError};

/// Identifier of one scheduled playback unit
pub type UnitId = u64;

/// Null driver tick
const NULL_TICK: Duration = Duration::from_millis(20);

/// Fires once when a unit has finished sounding
#[derive(Debug)]
pub struct FinishNotifier {
    id: UnitId,
    tx: mpsc::UnboundedSender<UnitId>,
}

impl FinishNotifier {
    pub fn new(id: UnitId, tx: mpsc::UnboundedSender<UnitId>) -> Self {
        Self { id, tx }
    }

    pub fn id(&self) -> UnitId {
        self.id
    }

    pub fn notify(self) {
        // Receiver gone means the session is shutting down
        let _ = self.tx.send(self.id);
    }
}

/// Playback device as seen by the scheduler
#[async_trait::async_trait]
pub trait OutputDevice: Send {
    /// Open the device context; idempotent
    async fn acquire(&mut self) -> Result<()>;

    /// Close the device context and drop everything scheduled
    fn release(&mut self);

    fn is_acquired(&self) -> bool;

    /// Device clock in seconds
    fn current_time(&self) -> f64;

    /// Schedule `frame` to start at `start_at` seconds on the device clock
    fn start_unit(
        &mut self,
        frame: Arc<AudioFrame>,
        start_at: f64,
        notifier: FinishNotifier,
    ) -> Result<()>;

    /// Stop a unit; stopping one that already finished is a no-op
    fn stop_unit(&mut self, id: UnitId) -> Result<()>;
}

struct Voice {
    frame: Arc<AudioFrame>,
    start: u64,
    length: u64,
    notifier: FinishNotifier,
}

impl Voice {
    fn end(&self) -> u64 {
        self.start + self.length
    }

    fn sample_at(&self, t: u64, out_rate: u32) -> f32 {
        if t < self.start || t >= self.end() {
            return 0.0;
        }
        let offset = (t - self.start) * u64::from(self.frame.sample_rate) / u64::from(out_rate);
        let channels = self.frame.channels.max(1) as usize;
        self.frame
            .samples
            .get(offset as usize * channels)
            .copied()
            .unwrap_or(0.0)
    }
}

/// Sample clock plus the set of scheduled voices
pub struct Timeline {
    sample_rate: u32,
    rendered: u64,
    voices: Vec<Voice>,
}

impl Timeline {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            rendered: 0,
            voices: Vec::new(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Switch the clock to `sample_rate`, keeping the current time
    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        let sample_rate = sample_rate.max(1);
        if sample_rate == self.sample_rate {
            return;
        }
        let now = self.now();
        let (to, from) = (u64::from(sample_rate), u64::from(self.sample_rate));
        for voice in &mut self.voices {
            voice.start = voice.start * to / from;
            voice.length = (voice.length * to).div_ceil(from);
        }
        self.sample_rate = sample_rate;
        self.rendered = (now * f64::from(sample_rate)).round() as u64;
    }

    /// Clock in seconds
    pub fn now(&self) -> f64 {
        self.rendered as f64 / f64::from(self.sample_rate)
    }

    pub fn scheduled(&self) -> usize {
        self.voices.len()
    }

    /// Start of the earliest scheduled voice, in seconds
    pub fn earliest_start(&self) -> Option<f64> {
        self.voices
            .iter()
            .map(|v| v.start)
            .min()
            .map(|start| start as f64 / f64::from(self.sample_rate))
    }

    pub fn schedule(&mut self, frame: Arc<AudioFrame>, start_at: f64, notifier: FinishNotifier) {
        let start = (start_at.max(0.0) * f64::from(self.sample_rate)).round() as u64;
        let frame_rate = u64::from(frame.sample_rate.max(1));
        let length =
            (frame.frame_count() as u64 * u64::from(self.sample_rate)).div_ceil(frame_rate);

        self.voices.push(Voice {
            frame,
            start,
            length,
            notifier,
        });
    }

    pub fn cancel(&mut self, id: UnitId) -> bool {
        let before = self.voices.len();
        self.voices.retain(|v| v.notifier.id() != id);
        before != self.voices.len()
    }

    pub fn clear(&mut self) {
        self.voices.clear();
    }

    /// Mix scheduled voices into an interleaved buffer and advance the clock
    pub fn render(&mut self, out: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        for (k, frame) in out.chunks_mut(channels).enumerate() {
            let t = self.rendered + k as u64;
            let mixed: f32 = self
                .voices
                .iter()
                .map(|v| v.sample_at(t, self.sample_rate))
                .sum();
            let mixed = mixed.clamp(-1.0, 1.0);
            for sample in frame.iter_mut() {
                *sample = mixed;
            }
        }
        self.advance((out.len() / channels) as u64);
    }

    /// Advance the clock without producing samples
    pub fn advance(&mut self, frames: u64) {
        self.rendered += frames;

        let rendered = self.rendered;
        let mut index = 0;
        while index < self.voices.len() {
            if self.voices[index].end() <= rendered {
                let voice = self.voices.swap_remove(index);
                voice.notifier.notify();
            } else {
                index += 1;
            }
        }
    }
}

/// Shared handle to a timeline, usable from audio callbacks
#[derive(Clone)]
pub struct TimelineHandle(Arc<Mutex<Timeline>>);

impl TimelineHandle {
    pub fn new(sample_rate: u32) -> Self {
        Self(Arc::new(Mutex::new(Timeline::new(sample_rate))))
    }

    /// Lock the timeline; a poisoned lock is recovered since the timeline
    /// holds no invariants a panic could break halfway
    pub fn lock(&self) -> MutexGuard<'_, Timeline> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// What advances the timeline clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputDriver {
    /// Wall-clock paced, samples discarded
    Null,
    /// Advanced by the owner (tests, offline rendering)
    Manual,
    /// Default output device
    #[cfg(feature = "cpal")]
    Speaker,
}

enum RunningDriver {
    Null(JoinHandle<()>),
    #[cfg(feature = "cpal")]
    Speaker(super::device::SpeakerStream),
}

/// `OutputDevice` backed by a software timeline
pub struct TimelineOutput {
    timeline: TimelineHandle,
    driver: OutputDriver,
    running: Option<RunningDriver>,
    acquired: bool,
}

impl TimelineOutput {
    pub fn new(sample_rate: u32, driver: OutputDriver) -> Self {
        Self {
            timeline: TimelineHandle::new(sample_rate),
            driver,
            running: None,
            acquired: false,
        }
    }

    pub fn timeline(&self) -> TimelineHandle {
        self.timeline.clone()
    }

    fn spawn_null_driver(&self) -> JoinHandle<()> {
        let timeline = self.timeline.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            let (origin, rate) = {
                let t = timeline.lock();
                (t.rendered, t.sample_rate)
            };
            let mut interval = tokio::time::interval(NULL_TICK);
            loop {
                interval.tick().await;
                let target = origin + (started.elapsed().as_secs_f64() * f64::from(rate)) as u64;
                let mut t = timeline.lock();
                if target > t.rendered {
                    let frames = target - t.rendered;
                    t.advance(frames);
                }
            }
        })
    }
}

#[async_trait::async_trait]
impl OutputDevice for TimelineOutput {
    async fn acquire(&mut self) -> Result<()> {
        if self.acquired {
            return Ok(());
        }

        self.running = match self.driver {
            OutputDriver::Null => Some(RunningDriver::Null(self.spawn_null_driver())),
            OutputDriver::Manual => None,
            #[cfg(feature = "cpal")]
            OutputDriver::Speaker => Some(RunningDriver::Speaker(
                super::device::SpeakerStream::open(self.timeline.clone()).await?,
            )),
        };
        self.acquired = true;

        info!(
            "Output device acquired ({:?} driver, {}Hz)",
            self.driver,
            self.timeline.lock().sample_rate()
        );
        Ok(())
    }

    fn release(&mut self) {
        if !self.acquired {
            return;
        }

        match self.running.take() {
            Some(RunningDriver::Null(task)) => task.abort(),
            #[cfg(feature = "cpal")]
            Some(RunningDriver::Speaker(stream)) => stream.close(),
            None => {}
        }
        self.timeline.lock().clear();
        self.acquired = false;

        info!("Output device released");
    }

    fn is_acquired(&self) -> bool {
        self.acquired
    }

    fn current_time(&self) -> f64 {
        self.timeline.lock().now()
    }

    fn start_unit(
        &mut self,
        frame: Arc<AudioFrame>,
        start_at: f64,
        notifier: FinishNotifier,
    ) -> Result<()> {
        if !self.acquired {
            return Err(VoiceError::Device("output device not acquired".to_string()));
        }
        self.timeline.lock().schedule(frame, start_at, notifier);
        Ok(())
    }

    fn stop_unit(&mut self, id: UnitId) -> Result<()> {
        if !self.timeline.lock().cancel(id) {
            debug!("Unit {} already finished", id);
        }
        Ok(())
    }
}

impl Drop for TimelineOutput {
    fn drop(&mut self) {
        self.release();
    }
}
