use crate::admission::{AdmissionGate, AdmissionPermit, AdmissionState};
use facelens_core::detector::DetectorError;
use facelens_core::{RecognitionEngine, RecognitionMetrics, RecognitionResult};
use facelens_geometry::{
    CameraConfig, ConfigChange, Frame, GeometryError, MirrorPolicy, TransformCache,
};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::{mpsc, watch};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("geometry error: {0}")]
    Geometry(#[from] GeometryError),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("failed to start frame worker: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Labels for the most recently completed frame, boxes in overlay space.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FrameOutput {
    /// Admission order of the frame; 0 before any frame completed.
    pub sequence: u64,
    pub metrics: Option<RecognitionMetrics>,
    pub results: Vec<RecognitionResult>,
}

/// Counters for frames offered to the pipeline.
#[derive(Debug, Default)]
struct Counters {
    admitted: AtomicU64,
    dropped: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub admitted: u64,
    pub dropped: u64,
    pub completed: u64,
    pub failed: u64,
}

/// An admitted frame on its way to the worker.
struct Job {
    sequence: u64,
    frame: Frame,
    permit: AdmissionPermit,
}

struct Shared {
    gate: Arc<AdmissionGate>,
    transforms: Mutex<TransformCache>,
    outputs: watch::Sender<FrameOutput>,
    counters: Counters,
    next_sequence: AtomicU64,
}

impl Shared {
    fn transforms(&self) -> MutexGuard<'_, TransformCache> {
        self.transforms.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Clone-safe handle to the frame worker.
#[derive(Clone)]
pub struct PipelineHandle {
    tx: mpsc::Sender<Job>,
    shared: Arc<Shared>,
}

impl PipelineHandle {
    /// Offer a sensor frame. Returns whether it was admitted.
    ///
    /// A frame that finds another one in flight is dropped on the spot.
    /// Dropping is the normal steady state under load, not an error.
    pub fn offer(&self, frame: Frame) -> bool {
        let Some(permit) = self.shared.gate.try_admit() else {
            self.shared.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        };

        let sequence = self.shared.next_sequence.fetch_add(1, Ordering::Relaxed) + 1;
        match self.tx.try_send(Job {
            sequence,
            frame,
            permit,
        }) {
            Ok(()) => {
                self.shared.counters.admitted.fetch_add(1, Ordering::Relaxed);
                true
            }
            // The rejected job, and with it the permit, is dropped here.
            Err(e) => {
                tracing::warn!(sequence, error = %e, "frame worker unavailable");
                false
            }
        }
    }

    /// The camera was (re)opened: new facing, rotation or resolution.
    pub fn reconfigure_camera(&self, camera: CameraConfig) {
        tracing::info!(
            rotation = camera.rotation_degrees,
            front = camera.is_front_facing,
            width = camera.sensor_width,
            height = camera.sensor_height,
            "camera reconfigured"
        );
        self.shared.transforms().apply(ConfigChange::Camera(camera));
    }

    /// The overlay was laid out or resized.
    pub fn resize_overlay(&self, width: u32, height: u32) {
        tracing::info!(width, height, "overlay resized");
        self.shared
            .transforms()
            .apply(ConfigChange::OverlayResized { width, height });
    }

    /// Watch the latest completed frame's labels.
    pub fn subscribe(&self) -> watch::Receiver<FrameOutput> {
        self.shared.outputs.subscribe()
    }

    pub fn latest(&self) -> FrameOutput {
        self.shared.outputs.borrow().clone()
    }

    pub fn state(&self) -> AdmissionState {
        self.shared.gate.state()
    }

    pub fn stats(&self) -> PipelineStats {
        let c = &self.shared.counters;
        PipelineStats {
            admitted: c.admitted.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            completed: c.completed.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
        }
    }

    /// How many times the transform pair has been built so far.
    pub fn transform_builds(&self) -> u64 {
        self.shared.transforms().builds()
    }
}

/// Spawn the frame worker on a dedicated OS thread.
///
/// The worker runs its own single-threaded runtime and handles one frame
/// start to finish before looking at the next. It exits once every
/// [`PipelineHandle`] is dropped.
pub fn spawn_pipeline(
    engine: Arc<RecognitionEngine>,
    mirror_policy: MirrorPolicy,
) -> Result<PipelineHandle, PipelineError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    // Capacity 1: the gate never lets a second job in before the first is taken.
    let (tx, mut rx) = mpsc::channel::<Job>(1);
    let (outputs, _) = watch::channel(FrameOutput::default());

    let shared = Arc::new(Shared {
        gate: AdmissionGate::new(),
        transforms: Mutex::new(TransformCache::new(mirror_policy)),
        outputs,
        counters: Counters::default(),
        next_sequence: AtomicU64::new(0),
    });

    let worker_shared = Arc::clone(&shared);
    std::thread::Builder::new()
        .name("facelens-frames".into())
        .spawn(move || {
            tracing::info!(?mirror_policy, "frame worker started");
            runtime.block_on(async move {
                while let Some(job) = rx.recv().await {
                    run_job(&engine, &worker_shared, job).await;
                }
            });
            tracing::info!("frame worker exiting");
        })?;

    Ok(PipelineHandle { tx, shared })
}

async fn run_job(engine: &RecognitionEngine, shared: &Shared, job: Job) {
    let Job {
        sequence,
        frame,
        permit,
    } = job;

    let result = process_frame(engine, shared, sequence, &frame).await;

    // Completion, successful or not, frees the pipeline.
    drop(permit);

    match result {
        Ok(output) => {
            shared.counters.completed.fetch_add(1, Ordering::Relaxed);
            if !publish_if_newer(&shared.outputs, output) {
                tracing::debug!(sequence, "stale frame output discarded");
            }
        }
        Err(PipelineError::Geometry(GeometryError::OverlayUnknown)) => {
            shared.counters.failed.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(sequence, "overlay not laid out yet; frame skipped");
        }
        Err(e) => {
            shared.counters.failed.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(sequence, error = %e, "frame processing failed");
        }
    }
}

/// Rotate the frame upright, recognize every face, and map the boxes
/// onto the overlay.
async fn process_frame(
    engine: &RecognitionEngine,
    shared: &Shared,
    sequence: u64,
    frame: &Frame,
) -> Result<FrameOutput, PipelineError> {
    // One Arc carries both matrices, so they always come from the same
    // configuration even if a change lands mid-frame.
    let state = shared
        .transforms()
        .get_or_build(frame.width(), frame.height())?;

    let upright = state.image.apply(&frame.image)?;
    let recognition = engine.recognize_frame(&upright).await?;

    let results = recognition
        .results
        .into_iter()
        .map(|r| RecognitionResult {
            bbox: state.map_box(&r.bbox),
            label: r.label,
        })
        .collect::<Vec<_>>();

    tracing::trace!(
        sequence,
        faces = results.len(),
        latency_ms = frame.timestamp.elapsed().as_secs_f64() * 1000.0,
        "frame processed"
    );

    Ok(FrameOutput {
        sequence,
        metrics: recognition.metrics,
        results,
    })
}

/// Publish `output` unless a newer frame's output is already visible.
fn publish_if_newer(outputs: &watch::Sender<FrameOutput>, output: FrameOutput) -> bool {
    outputs.send_if_modified(|current| {
        if output.sequence > current.sequence {
            *current = output;
            true
        } else {
            false
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use facelens_core::detector::{EmbedderError, Embedder, FaceDetector};
    use facelens_core::{
        BoundingBox, Detection, Embedding, EmbeddingStore, MatchConfig, MemoryStore,
        NOT_RECOGNIZED,
    };
    use image::{Rgba, RgbaImage};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::Semaphore;

    const WAIT: Duration = Duration::from_secs(5);

    /// Reports a fixed face per call. Optionally parks until the test
    /// hands out a permit, to hold a frame in flight.
    struct TestDetector {
        faces: Vec<(BoundingBox, [u8; 3])>,
        calls: AtomicUsize,
        release: Option<Arc<Semaphore>>,
    }

    impl TestDetector {
        fn new(faces: Vec<(BoundingBox, [u8; 3])>) -> Self {
            Self {
                faces,
                calls: AtomicUsize::new(0),
                release: None,
            }
        }
    }

    #[async_trait]
    impl FaceDetector for TestDetector {
        async fn detect(&self, _image: &RgbaImage) -> Result<Vec<Detection>, DetectorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(release) = &self.release {
                release
                    .acquire()
                    .await
                    .map_err(|e| DetectorError::Failed(e.to_string()))?
                    .forget();
            }
            Ok(self
                .faces
                .iter()
                .map(|&(bbox, [r, g, b])| Detection {
                    crop: RgbaImage::from_pixel(1, 1, Rgba([r, g, b, 255])),
                    bbox,
                    confidence: 0.9,
                })
                .collect())
        }
    }

    struct ColorEmbedder;

    #[async_trait]
    impl Embedder for ColorEmbedder {
        async fn embed(&self, crop: &RgbaImage) -> Result<Embedding, EmbedderError> {
            let Rgba([r, g, b, _]) = *crop.get_pixel(0, 0);
            Ok(Embedding::new(vec![r as f32, g as f32, b as f32]))
        }
    }

    async fn alice_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.insert(1, "Alice", Embedding::new(vec![1.0, 0.0, 0.0])).await.unwrap();
        store
    }

    fn pipeline(
        detector: Arc<TestDetector>,
        store: Arc<MemoryStore>,
        policy: MirrorPolicy,
    ) -> PipelineHandle {
        let engine = RecognitionEngine::new(
            detector,
            Arc::new(ColorEmbedder),
            store,
            MatchConfig::default(),
        );
        spawn_pipeline(Arc::new(engine), policy).unwrap()
    }

    fn camera(front: bool) -> CameraConfig {
        CameraConfig {
            rotation_degrees: 0,
            is_front_facing: front,
            sensor_width: 100,
            sensor_height: 50,
        }
    }

    fn frame() -> Frame {
        Frame::new(RgbaImage::new(100, 50))
    }

    async fn next_output(rx: &mut watch::Receiver<FrameOutput>) -> FrameOutput {
        tokio::time::timeout(WAIT, rx.changed())
            .await
            .expect("frame output in time")
            .expect("worker alive");
        rx.borrow_and_update().clone()
    }

    async fn wait_idle(handle: &PipelineHandle) {
        tokio::time::timeout(WAIT, async {
            while handle.state() != AdmissionState::Idle {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("pipeline returned to idle");
    }

    #[tokio::test]
    async fn test_boxes_mapped_to_overlay() {
        let face = BoundingBox::new(10.0, 10.0, 20.0, 20.0);
        let detector = Arc::new(TestDetector::new(vec![
            (face, [255, 0, 0]),
            (face, [0, 255, 0]),
        ]));
        let handle = pipeline(detector, alice_store().await, MirrorPolicy::Overlay);
        handle.reconfigure_camera(camera(false));
        handle.resize_overlay(200, 100);

        let mut rx = handle.subscribe();
        assert!(handle.offer(frame()));
        let output = next_output(&mut rx).await;

        assert_eq!(output.sequence, 1);
        assert!(output.metrics.is_some());
        assert_eq!(output.results.len(), 2);
        assert_eq!(output.results[0].label, "Alice 1.00");
        assert_eq!(output.results[1].label, NOT_RECOGNIZED);
        assert_eq!(output.results[0].bbox, BoundingBox::new(20.0, 20.0, 40.0, 40.0));
    }

    #[tokio::test]
    async fn test_front_camera_boxes_mirrored() {
        let face = BoundingBox::new(10.0, 10.0, 20.0, 20.0);
        let detector = Arc::new(TestDetector::new(vec![(face, [255, 0, 0])]));
        let handle = pipeline(detector, alice_store().await, MirrorPolicy::Overlay);
        handle.reconfigure_camera(camera(true));
        handle.resize_overlay(200, 100);

        let mut rx = handle.subscribe();
        assert!(handle.offer(frame()));
        let output = next_output(&mut rx).await;
        // x 20..60 mirrored inside a 200-wide overlay → 140..180
        assert_eq!(output.results[0].bbox, BoundingBox::new(140.0, 20.0, 40.0, 40.0));
    }

    #[tokio::test]
    async fn test_no_faces_yields_no_metrics() {
        let detector = Arc::new(TestDetector::new(vec![]));
        let handle = pipeline(detector, alice_store().await, MirrorPolicy::Overlay);
        handle.reconfigure_camera(camera(false));
        handle.resize_overlay(100, 50);

        let mut rx = handle.subscribe();
        assert!(handle.offer(frame()));
        let output = next_output(&mut rx).await;
        assert_eq!(output.sequence, 1);
        assert!(output.metrics.is_none());
        assert!(output.results.is_empty());
    }

    #[tokio::test]
    async fn test_frames_dropped_while_processing() {
        let release = Arc::new(Semaphore::new(0));
        let detector = Arc::new(TestDetector {
            release: Some(Arc::clone(&release)),
            ..TestDetector::new(vec![])
        });
        let handle = pipeline(Arc::clone(&detector), alice_store().await, MirrorPolicy::Overlay);
        handle.reconfigure_camera(camera(false));
        handle.resize_overlay(100, 50);
        let mut rx = handle.subscribe();

        let mut found_idle = 0;
        for round in 0..3 {
            assert!(handle.offer(frame()), "round {round}: idle pipeline admits");
            found_idle += 1;
            // Frames arriving while the first is held are dropped.
            for _ in 0..4 {
                assert!(!handle.offer(frame()));
            }
            release.add_permits(1);
            next_output(&mut rx).await;
            wait_idle(&handle).await;
        }

        assert_eq!(detector.calls.load(Ordering::SeqCst), found_idle);
        let stats = handle.stats();
        assert_eq!(stats.admitted, 3);
        assert_eq!(stats.dropped, 12);
        assert_eq!(stats.completed, 3);
    }

    #[tokio::test]
    async fn test_transforms_built_once_until_reconfigured() {
        let detector = Arc::new(TestDetector::new(vec![]));
        let handle = pipeline(detector, alice_store().await, MirrorPolicy::Overlay);
        handle.reconfigure_camera(camera(false));
        handle.resize_overlay(100, 50);
        let mut rx = handle.subscribe();

        for _ in 0..3 {
            assert!(handle.offer(frame()));
            next_output(&mut rx).await;
            wait_idle(&handle).await;
        }
        assert_eq!(handle.transform_builds(), 1);

        handle.reconfigure_camera(camera(true));
        assert!(handle.offer(frame()));
        next_output(&mut rx).await;
        assert_eq!(handle.transform_builds(), 2);
    }

    #[tokio::test]
    async fn test_frame_before_overlay_layout_frees_pipeline() {
        let detector = Arc::new(TestDetector::new(vec![]));
        let handle = pipeline(Arc::clone(&detector), alice_store().await, MirrorPolicy::Overlay);
        handle.reconfigure_camera(camera(false));

        assert!(handle.offer(frame()));
        wait_idle(&handle).await;
        tokio::time::timeout(WAIT, async {
            while handle.stats().failed == 0 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(detector.calls.load(Ordering::SeqCst), 0);
        assert_eq!(handle.latest().sequence, 0);
    }

    #[test]
    fn test_stale_output_never_overwrites_newer() {
        let (tx, rx) = watch::channel(FrameOutput::default());
        let newer = FrameOutput {
            sequence: 5,
            ..FrameOutput::default()
        };
        let older = FrameOutput {
            sequence: 4,
            results: vec![RecognitionResult {
                label: "stale".into(),
                bbox: BoundingBox::new(0.0, 0.0, 1.0, 1.0),
            }],
            ..FrameOutput::default()
        };

        assert!(publish_if_newer(&tx, newer));
        assert!(!publish_if_newer(&tx, older));
        assert_eq!(rx.borrow().sequence, 5);
        assert!(rx.borrow().results.is_empty());
    }
}
