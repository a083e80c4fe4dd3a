use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

use arrival_watch::{
    BoundingBox, CameraLoop, Detection, DispatchOutcome, Dispatcher, FrameSource, LoopSettings,
    NoFocalRegion, Notifier, PresenceState, RegionRefiner, RtspConnector, Shutdown,
    SnapshotCapturer, SnapshotSource, StepOutcome, StreamConnector, StreamEndpoints,
    StreamHealth, StubBackend, Transition, PERSON_CLASS_ID,
};

const DETECTION_URL: &str = "stub://sub?width=640&height=360";
const SNAPSHOT_URL: &str = "stub://main?width=1280&height=720";

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<(Vec<u8>, String)>>,
    fail: bool,
}

impl RecordingNotifier {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    fn sent(&self) -> Vec<(Vec<u8>, String)> {
        self.sent.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn send_photo(&self, photo: &Path, caption: &str) -> Result<()> {
        if self.fail {
            return Err(anyhow!("HTTP 429 Too Many Requests"));
        }
        let bytes = std::fs::read(photo)?;
        self.sent.lock().unwrap().push((bytes, caption.to_string()));
        Ok(())
    }
}

/// Synthetic connector that refuses the full-resolution stream.
struct NoMainStream(RtspConnector);

impl StreamConnector for NoMainStream {
    fn open(&self, url: &str) -> Result<Box<dyn FrameSource>> {
        if url.starts_with("stub://main") {
            return Err(anyhow!("main stream offline"));
        }
        self.0.open(url)
    }
}

/// Connector that never connects.
struct Offline;

impl StreamConnector for Offline {
    fn open(&self, _url: &str) -> Result<Box<dyn FrameSource>> {
        Err(anyhow!("no route to host"))
    }
}

fn person() -> Vec<Detection> {
    vec![Detection::new(
        PERSON_CLASS_ID,
        0.93,
        BoundingBox::new(100.0, 50.0, 200.0, 300.0),
    )]
}

fn settings() -> LoopSettings {
    LoopSettings {
        camera: "Yard".to_string(),
        frame_skip: 1,
        reset_window: Duration::from_secs(5),
        reconnect_backoff: Duration::from_millis(10),
        ..LoopSettings::default()
    }
}

struct Harness {
    camera: CameraLoop,
    notifier: Arc<RecordingNotifier>,
    temp_dir: tempfile::TempDir,
}

fn harness(
    settings: LoopSettings,
    detection_url: &str,
    connector: Arc<dyn StreamConnector>,
    detector: StubBackend,
    notifier: RecordingNotifier,
) -> Harness {
    let notifier = Arc::new(notifier);
    let temp_dir = tempfile::tempdir().expect("temp dir");
    let endpoints = StreamEndpoints {
        detection: detection_url.to_string(),
        snapshot: SNAPSHOT_URL.to_string(),
    };
    let refiner = RegionRefiner::new(Box::new(NoFocalRegion), 0.15);
    let capturer = SnapshotCapturer::new(connector.clone(), SNAPSHOT_URL, refiner, 95);
    let dispatcher = Dispatcher::new(notifier.clone()).with_temp_dir(temp_dir.path());
    let camera = CameraLoop::new(
        settings,
        endpoints,
        connector,
        Box::new(detector),
        capturer,
        dispatcher,
    );
    Harness {
        camera,
        notifier,
        temp_dir,
    }
}

fn temp_dir_is_empty(dir: &Path) -> bool {
    std::fs::read_dir(dir).unwrap().next().is_none()
}

#[test]
fn one_notification_per_presence_run() {
    let detector =
        StubBackend::with_script([person(), person(), person(), Vec::new(), person()]);
    let mut h = harness(
        settings(),
        DETECTION_URL,
        Arc::new(RtspConnector::default()),
        detector,
        RecordingNotifier::default(),
    );
    let shutdown = Shutdown::new();

    assert_eq!(h.camera.step(&shutdown), StepOutcome::Connected);
    assert_eq!(h.camera.health(), StreamHealth::Connected);
    assert_eq!(
        h.camera.step(&shutdown),
        StepOutcome::Arrival {
            snapshot: Some(SnapshotSource::FullResolution),
            dispatch: DispatchOutcome::Delivered,
        }
    );
    assert_eq!(h.camera.step(&shutdown), StepOutcome::Processed(Transition::Stayed));
    assert_eq!(h.camera.step(&shutdown), StepOutcome::Processed(Transition::Stayed));
    assert_eq!(h.camera.step(&shutdown), StepOutcome::Processed(Transition::Grace));
    assert_eq!(h.camera.step(&shutdown), StepOutcome::Processed(Transition::Stayed));

    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 1);
    let (jpeg, caption) = &sent[0];
    assert!(caption.starts_with("⚠ Person detected\nCamera: Yard\nTime: "));

    // (100,50)-(200,300) at 640x360 is (200,100)-(400,600) at 1280x720,
    // padded by 15% of 200x500.
    let image = image::load_from_memory(jpeg).expect("decode snapshot");
    assert_eq!((image.width(), image.height()), (260, 650));

    let stats = h.camera.stats();
    assert_eq!(stats.arrivals, 1);
    assert_eq!(stats.notifications_sent, 1);
    assert_eq!(stats.frames_processed, 5);
    assert!(temp_dir_is_empty(h.temp_dir.path()));
}

#[test]
fn absence_window_re_arms_the_alert() {
    let detector = StubBackend::with_script([person(), Vec::new(), Vec::new(), person()]);
    let mut h = harness(
        LoopSettings {
            reset_window: Duration::from_secs(2),
            ..settings()
        },
        DETECTION_URL,
        Arc::new(RtspConnector::default()),
        detector,
        RecordingNotifier::default(),
    );
    let shutdown = Shutdown::new();

    assert_eq!(h.camera.step(&shutdown), StepOutcome::Connected);
    assert!(matches!(h.camera.step(&shutdown), StepOutcome::Arrival { .. }));
    // The window must outlast the snapshot capture done during arrival.
    assert_eq!(h.camera.step(&shutdown), StepOutcome::Processed(Transition::Grace));
    std::thread::sleep(Duration::from_millis(2100));
    assert_eq!(h.camera.step(&shutdown), StepOutcome::Processed(Transition::Departed));
    assert_eq!(h.camera.presence().state(), PresenceState::Absent);
    assert!(matches!(h.camera.step(&shutdown), StepOutcome::Arrival { .. }));

    assert_eq!(h.notifier.sent().len(), 2);
    assert_eq!(h.camera.stats().arrivals, 2);
}

#[test]
fn frames_between_samples_are_skipped() {
    let detector = StubBackend::with_script([person()]);
    let mut h = harness(
        LoopSettings {
            frame_skip: 3,
            ..settings()
        },
        DETECTION_URL,
        Arc::new(RtspConnector::default()),
        detector,
        RecordingNotifier::default(),
    );
    let shutdown = Shutdown::new();

    assert_eq!(h.camera.step(&shutdown), StepOutcome::Connected);
    assert_eq!(h.camera.step(&shutdown), StepOutcome::Skipped);
    assert_eq!(h.camera.step(&shutdown), StepOutcome::Skipped);
    assert!(matches!(h.camera.step(&shutdown), StepOutcome::Arrival { .. }));

    let stats = h.camera.stats();
    assert_eq!(stats.frames_seen, 3);
    assert_eq!(stats.frames_skipped, 2);
    assert_eq!(stats.frames_processed, 1);
}

#[test]
fn stream_end_triggers_reconnect() {
    let mut h = harness(
        settings(),
        "stub://sub?width=320&height=180&frames=2",
        Arc::new(RtspConnector::default()),
        StubBackend::new(),
        RecordingNotifier::default(),
    );
    let shutdown = Shutdown::new();

    assert_eq!(h.camera.step(&shutdown), StepOutcome::Connected);
    assert_eq!(h.camera.step(&shutdown), StepOutcome::Processed(Transition::Idle));
    assert_eq!(h.camera.step(&shutdown), StepOutcome::Processed(Transition::Idle));
    assert_eq!(h.camera.step(&shutdown), StepOutcome::Reconnecting);
    assert_eq!(h.camera.health(), StreamHealth::Reconnecting);
    assert_eq!(h.camera.step(&shutdown), StepOutcome::Connected);
    assert_eq!(h.camera.step(&shutdown), StepOutcome::Processed(Transition::Idle));

    let stats = h.camera.stats();
    assert_eq!(stats.connects, 2);
    assert_eq!(stats.stream_failures, 1);
}

#[test]
fn unreachable_main_stream_falls_back_to_detection_frame() {
    let mut h = harness(
        settings(),
        DETECTION_URL,
        Arc::new(NoMainStream(RtspConnector::default())),
        StubBackend::with_script([person()]),
        RecordingNotifier::default(),
    );
    let shutdown = Shutdown::new();

    assert_eq!(h.camera.step(&shutdown), StepOutcome::Connected);
    assert_eq!(
        h.camera.step(&shutdown),
        StepOutcome::Arrival {
            snapshot: Some(SnapshotSource::LowResolutionFallback),
            dispatch: DispatchOutcome::Delivered,
        }
    );

    let sent = h.notifier.sent();
    let image = image::load_from_memory(&sent[0].0).expect("decode snapshot");
    // Padded (100,50)-(200,300) in the 640x360 detection frame itself.
    assert_eq!((image.width(), image.height()), (130, 324));
}

#[test]
fn failed_delivery_is_counted_and_leaves_no_file() {
    let mut h = harness(
        settings(),
        DETECTION_URL,
        Arc::new(RtspConnector::default()),
        StubBackend::with_script([person(), person()]),
        RecordingNotifier::failing(),
    );
    let shutdown = Shutdown::new();

    assert_eq!(h.camera.step(&shutdown), StepOutcome::Connected);
    match h.camera.step(&shutdown) {
        StepOutcome::Arrival {
            dispatch: DispatchOutcome::Failed { reason },
            ..
        } => assert!(reason.contains("429")),
        other => panic!("expected failed arrival, got {:?}", other),
    }
    // Not retried while the person stays.
    assert_eq!(h.camera.step(&shutdown), StepOutcome::Processed(Transition::Stayed));

    let stats = h.camera.stats();
    assert_eq!(stats.notifications_failed, 1);
    assert_eq!(stats.notifications_sent, 0);
    assert!(temp_dir_is_empty(h.temp_dir.path()));
}

#[test]
fn detector_failure_leaves_presence_untouched() {
    let mut detector = StubBackend::new();
    detector.push(person());
    detector.push_failure("model crashed");
    detector.push(Vec::new());
    let mut h = harness(
        LoopSettings {
            reset_window: Duration::from_millis(30),
            ..settings()
        },
        DETECTION_URL,
        Arc::new(RtspConnector::default()),
        detector,
        RecordingNotifier::default(),
    );
    let shutdown = Shutdown::new();

    assert_eq!(h.camera.step(&shutdown), StepOutcome::Connected);
    assert!(matches!(h.camera.step(&shutdown), StepOutcome::Arrival { .. }));
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(h.camera.step(&shutdown), StepOutcome::DetectorError);
    assert_eq!(h.camera.presence().state(), PresenceState::Present);
    assert_eq!(h.camera.step(&shutdown), StepOutcome::Processed(Transition::Departed));
    assert_eq!(h.camera.stats().detector_errors, 1);
}

#[test]
fn run_stops_on_shutdown_and_reports_stats() {
    let mut h = harness(
        LoopSettings {
            health_interval: Duration::from_millis(20),
            ..settings()
        },
        "stub://sub?width=64&height=36",
        Arc::new(RtspConnector::default()),
        StubBackend::new(),
        RecordingNotifier::default(),
    );
    let shutdown = Shutdown::new();
    let remote = shutdown.clone();
    let trigger = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(100));
        remote.trigger();
    });

    let stats = h.camera.run(&shutdown).expect("run");
    trigger.join().unwrap();

    assert_eq!(stats.connects, 1);
    assert!(stats.frames_processed > 0);
    assert_eq!(stats.arrivals, 0);
    assert_eq!(h.camera.step(&shutdown), StepOutcome::Stopped);
}

#[test]
fn shutdown_interrupts_reconnect_backoff() {
    let mut h = harness(
        LoopSettings {
            reconnect_backoff: Duration::from_secs(60),
            ..settings()
        },
        DETECTION_URL,
        Arc::new(Offline),
        StubBackend::new(),
        RecordingNotifier::default(),
    );
    let shutdown = Shutdown::new();
    let remote = shutdown.clone();
    let trigger = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        remote.trigger();
    });

    let started = Instant::now();
    let stats = h.camera.run(&shutdown).expect("run");
    trigger.join().unwrap();

    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(stats.connects, 0);
    assert_eq!(stats.stream_failures, 1);
}
