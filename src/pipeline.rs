//! Per-camera stream loop.
//!
//! `CameraLoop` owns everything one camera needs: the detection stream
//! handle, the sampler, the presence tracker and the counters. Each `step`
//! handles exactly one incoming frame (or one connection attempt):
//!
//! ```text
//! sampler ──skip──> grab (no decode)
//!    └─process──> read ─> detect ─> filter ─> presence
//!                                               └─arrival─> snapshot ─> dispatch
//! ```
//!
//! Stream faults never end the loop. The handle is dropped, the loop waits
//! out the reconnect backoff and opens the stream again, with no retry cap.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use crate::detect::{Detection, DetectionFilter, DetectionRequest, DetectorBackend};
use crate::frame::Frame;
use crate::geometry::FrameSize;
use crate::ingest::{redact, FrameSource, StreamConnector, StreamEndpoints};
use crate::notify::{build_caption, DispatchOutcome, Dispatcher};
use crate::presence::{PresenceTracker, Transition};
use crate::sampler::{AdaptiveSampler, BoostPolicy, FrameAction};
use crate::snapshot::{SnapshotCapturer, SnapshotSource};

/// Longest uninterrupted sleep while waiting; shutdown is checked between slices.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

// ----------------------------------------------------------------------------
// Shutdown
// ----------------------------------------------------------------------------

/// Cooperative cancellation flag shared with the Ctrl-C handler.
#[derive(Clone, Debug, Default)]
pub struct Shutdown {
    flag: Arc<AtomicBool>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` in short slices. Returns `false` if shutdown was
    /// requested before the full duration elapsed.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_triggered() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }
}

// ----------------------------------------------------------------------------
// Loop state
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamHealth {
    Connected,
    Reconnecting,
}

/// Tunables for one camera loop.
#[derive(Clone, Debug)]
pub struct LoopSettings {
    pub camera: String,
    pub request: DetectionRequest,
    pub filter: DetectionFilter,
    pub reset_window: Duration,
    pub frame_skip: u32,
    pub latency_budget: Duration,
    pub boost_policy: BoostPolicy,
    pub detection_max_width: u32,
    pub reconnect_backoff: Duration,
    pub health_interval: Duration,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            camera: "Cam1".to_string(),
            request: DetectionRequest::default(),
            filter: DetectionFilter::default(),
            reset_window: Duration::from_secs(7),
            frame_skip: 5,
            latency_budget: Duration::from_millis(250),
            boost_policy: BoostPolicy::OneShot,
            detection_max_width: 640,
            reconnect_backoff: Duration::from_secs(5),
            health_interval: Duration::from_secs(60),
        }
    }
}

/// Counters reported in the health line and returned on shutdown.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub frames_seen: u64,
    pub frames_skipped: u64,
    pub frames_processed: u64,
    pub detector_errors: u64,
    pub arrivals: u64,
    pub notifications_sent: u64,
    pub notifications_failed: u64,
    pub connects: u64,
    pub stream_failures: u64,
}

/// What one `step` did.
#[derive(Clone, Debug, PartialEq)]
pub enum StepOutcome {
    /// The detection stream was (re)opened.
    Connected,
    /// Open, read or grab failed; the backoff has been waited out.
    Reconnecting,
    /// Frame discarded without decoding.
    Skipped,
    /// Frame decoded but the detector failed; presence was not updated.
    DetectorError,
    /// Frame ran through detection without producing an arrival.
    Processed(Transition),
    /// Absent -> Present edge. `snapshot` is `None` if no image could be built.
    Arrival {
        snapshot: Option<SnapshotSource>,
        dispatch: DispatchOutcome,
    },
    Stopped,
}

pub struct CameraLoop {
    settings: LoopSettings,
    endpoints: StreamEndpoints,
    connector: Arc<dyn StreamConnector>,
    detector: Box<dyn DetectorBackend>,
    capturer: SnapshotCapturer,
    dispatcher: Dispatcher,
    presence: PresenceTracker,
    sampler: AdaptiveSampler,
    source: Option<Box<dyn FrameSource>>,
    health: StreamHealth,
    stats: LoopStats,
}

impl CameraLoop {
    pub fn new(
        settings: LoopSettings,
        endpoints: StreamEndpoints,
        connector: Arc<dyn StreamConnector>,
        detector: Box<dyn DetectorBackend>,
        capturer: SnapshotCapturer,
        dispatcher: Dispatcher,
    ) -> Self {
        let presence = PresenceTracker::new(settings.reset_window);
        let sampler = AdaptiveSampler::new(
            settings.frame_skip,
            settings.latency_budget,
            settings.boost_policy,
        );
        Self {
            settings,
            endpoints,
            connector,
            detector,
            capturer,
            dispatcher,
            presence,
            sampler,
            source: None,
            health: StreamHealth::Reconnecting,
            stats: LoopStats::default(),
        }
    }

    pub fn camera(&self) -> &str {
        &self.settings.camera
    }

    pub fn health(&self) -> StreamHealth {
        self.health
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    /// Run until `shutdown` is triggered. Fails only if the detector cannot
    /// be initialised.
    pub fn run(&mut self, shutdown: &Shutdown) -> Result<LoopStats> {
        self.detector
            .warm_up()
            .with_context(|| format!("[{}] warm up detector {}", self.camera(), self.detector.name()))?;
        log::info!(
            "[{}] watching {} with detector {}, snapshots from {}",
            self.camera(),
            redact(&self.endpoints.detection),
            self.detector.name(),
            redact(&self.endpoints.snapshot)
        );

        let mut last_health = Instant::now();
        while self.step(shutdown) != StepOutcome::Stopped {
            if last_health.elapsed() >= self.settings.health_interval {
                self.log_health();
                last_health = Instant::now();
            }
        }

        self.source = None;
        self.log_health();
        log::info!("[{}] stream loop stopped", self.camera());
        Ok(self.stats)
    }

    /// Handle one frame, or one connection attempt when no stream is open.
    pub fn step(&mut self, shutdown: &Shutdown) -> StepOutcome {
        if shutdown.is_triggered() {
            return StepOutcome::Stopped;
        }
        let action = match self.source {
            None => return self.connect(shutdown),
            Some(_) => self.sampler.next_action(),
        };
        let Some(source) = self.source.as_mut() else {
            return StepOutcome::Reconnecting;
        };
        self.stats.frames_seen += 1;
        let pulled = match action {
            FrameAction::Skip => source.grab().map(|()| None),
            FrameAction::Process => source.read().map(Some),
        };
        match pulled {
            Ok(None) => {
                self.stats.frames_skipped += 1;
                StepOutcome::Skipped
            }
            Ok(Some(frame)) => self.process(&frame),
            Err(e) => self.lose_stream("read", e, shutdown),
        }
    }

    fn connect(&mut self, shutdown: &Shutdown) -> StepOutcome {
        match self.connector.open(&self.endpoints.detection) {
            Ok(source) => {
                log::info!("[{}] stream connected: {}", self.camera(), source.describe());
                self.source = Some(source);
                self.health = StreamHealth::Connected;
                self.sampler.reset();
                self.stats.connects += 1;
                StepOutcome::Connected
            }
            Err(e) => self.lose_stream("open", e, shutdown),
        }
    }

    fn lose_stream(&mut self, stage: &str, err: anyhow::Error, shutdown: &Shutdown) -> StepOutcome {
        self.source = None;
        self.health = StreamHealth::Reconnecting;
        self.stats.stream_failures += 1;
        log::warn!(
            "[{}] stream {} failed: {:#}; reconnecting in {:?}",
            self.camera(),
            stage,
            err,
            self.settings.reconnect_backoff
        );
        if !shutdown.sleep(self.settings.reconnect_backoff) {
            return StepOutcome::Stopped;
        }
        StepOutcome::Reconnecting
    }

    fn process(&mut self, frame: &Frame) -> StepOutcome {
        let input = frame.detection_image(self.settings.detection_max_width);
        let detection_size = FrameSize::new(input.width(), input.height());

        let started = Instant::now();
        let result = self.detector.detect(&input, &self.settings.request);
        self.sampler.record_inference(started.elapsed());

        let detections = match result {
            Ok(detections) => detections,
            Err(e) => {
                self.stats.detector_errors += 1;
                log::warn!(
                    "[{}] detector {} failed on frame {}: {:#}",
                    self.camera(),
                    self.detector.name(),
                    frame.sequence,
                    e
                );
                return StepOutcome::DetectorError;
            }
        };
        self.stats.frames_processed += 1;

        let accepted = self.settings.filter.apply(detections);
        let subject = DetectionFilter::best(&accepted).cloned();
        match self.presence.observe(subject.is_some(), frame.captured_at) {
            Transition::Arrived => match subject {
                Some(subject) => self.arrive(frame, detection_size, &subject),
                None => StepOutcome::Processed(Transition::Arrived),
            },
            Transition::Departed => {
                log::info!(
                    "[{}] no person for {:?}, re-armed",
                    self.camera(),
                    self.presence.reset_window()
                );
                StepOutcome::Processed(Transition::Departed)
            }
            other => StepOutcome::Processed(other),
        }
    }

    fn arrive(&mut self, frame: &Frame, detection: FrameSize, subject: &Detection) -> StepOutcome {
        self.stats.arrivals += 1;
        let camera = self.settings.camera.clone();
        log::info!(
            "[{}] person arrived (confidence {:.2}, frame {})",
            camera,
            subject.confidence,
            frame.sequence
        );

        let snapshot = match self
            .capturer
            .capture(&camera, frame, detection, &subject.bbox)
        {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.stats.notifications_failed += 1;
                let reason = format!("{:#}", e);
                log::error!("[{}] snapshot failed, event missed: {}", camera, reason);
                return StepOutcome::Arrival {
                    snapshot: None,
                    dispatch: DispatchOutcome::Failed { reason },
                };
            }
        };

        log::info!(
            "[{}] snapshot {}x{} from {:?} ({:?}), {} bytes",
            camera,
            snapshot.size.width,
            snapshot.size.height,
            snapshot.source,
            snapshot.refine,
            snapshot.jpeg.len()
        );
        let caption = build_caption(&camera, snapshot.event_time);
        let dispatch = self.dispatcher.dispatch(&camera, &snapshot.jpeg, &caption);
        if dispatch.is_delivered() {
            self.stats.notifications_sent += 1;
        } else {
            self.stats.notifications_failed += 1;
        }
        StepOutcome::Arrival {
            snapshot: Some(snapshot.source),
            dispatch,
        }
    }

    fn log_health(&self) {
        let stats = &self.stats;
        log::info!(
            "[{}] health={:?} present={} frames={} processed={} skipped={} arrivals={} sent={} failed={} stream_failures={}",
            self.camera(),
            self.health,
            self.presence.is_present(),
            stats.frames_seen,
            stats.frames_processed,
            stats.frames_skipped,
            stats.arrivals,
            stats.notifications_sent,
            stats.notifications_failed,
            stats.stream_failures
        );
    }
}
