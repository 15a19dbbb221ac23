use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use anyhow::Result;
use image::RgbImage;

use crate::board::{Board, Classification};
use crate::classifier::ClassifierEngine;
use crate::detect::{DetectParams, FaceDetector, FaceRect};
use crate::error::PipelineError;
use crate::labels::ClassNameTable;
use crate::preprocess::{self, InputTensor};
use crate::render::{Overlay, Renderer};
use crate::schedule::{StopHandle, Ticker};
use crate::scores;
use crate::select::select_largest;
use crate::source::FrameSource;

/// Lifecycle of a [`Driver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Uninitialized,
    Initializing,
    Ready,
    Running,
    Stopped,
    Error,
}

impl DriverState {
    fn status_text(self) -> &'static str {
        match self {
            DriverState::Uninitialized => "idle",
            DriverState::Initializing => "preparing system",
            DriverState::Ready => "ready",
            DriverState::Running => "running",
            DriverState::Stopped => "stopped",
            DriverState::Error => "error",
        }
    }
}

/// Everything loaded once before the driver becomes ready.
pub struct Engines {
    pub detector: Box<dyn FaceDetector>,
    pub classifier: Box<dyn ClassifierEngine>,
    pub classes: ClassNameTable,
}

#[derive(Debug, Clone, Default)]
pub struct DriverSettings {
    pub detect: DetectParams,
    /// Forget the latest result after this many consecutive frames without
    /// a face. `None` keeps it until a new result replaces it.
    pub clear_after_misses: Option<u32>,
}

/// Receives every rendered surface.
pub trait FrameSink {
    fn present(&mut self, surface: &RgbImage) -> Result<()>;
}

/// Discards surfaces.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl FrameSink for NullSink {
    fn present(&mut self, _surface: &RgbImage) -> Result<()> {
        Ok(())
    }
}

/// Outcome of one pass over one frame.
#[derive(Debug, Default)]
pub struct Iteration {
    /// Annotated frame, absent when no frame could be acquired.
    pub surface: Option<RgbImage>,
    pub faces: Vec<FaceRect>,
    pub selected: Option<FaceRect>,
    pub input: Option<InputTensor>,
    pub classification: Option<Classification>,
    /// The error that cut this iteration short, if any.
    pub error: Option<PipelineError>,
    /// The source has no more frames.
    pub end_of_stream: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub iterations: u64,
    pub classified: u64,
    pub failed: u64,
}

/// Runs frames through detection, classification and rendering, one at a
/// time and in order.
pub struct Driver {
    state: DriverState,
    settings: DriverSettings,
    engines: Option<Engines>,
    renderer: Renderer,
    board: Board,
    misses: u32,
    frame_index: u64,
}

impl Driver {
    pub fn new(
        settings: DriverSettings,
        renderer: Renderer,
        board: Board,
    ) -> Result<Self, PipelineError> {
        settings.detect.validate()?;
        board.set_status(DriverState::Uninitialized.status_text());
        Ok(Self {
            state: DriverState::Uninitialized,
            settings,
            engines: None,
            renderer,
            board,
            misses: 0,
            frame_index: 0,
        })
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    fn transition(&mut self, next: DriverState) {
        log::debug!("driver: {:?} -> {:?}", self.state, next);
        self.state = next;
        self.board.set_status(next.status_text());
    }

    /// Load detector, classifier and class table through `load`.
    ///
    /// Allowed from `Uninitialized`, or from `Error` as an explicit restart.
    /// A failure leaves the driver in `Error` with the reason on the board.
    pub fn initialize<F>(&mut self, load: F) -> Result<(), PipelineError>
    where
        F: FnOnce() -> Result<Engines>,
    {
        match self.state {
            DriverState::Uninitialized | DriverState::Error => {}
            other => {
                return Err(PipelineError::Initialization(format!(
                    "cannot initialize while {:?}",
                    other
                )))
            }
        }

        self.transition(DriverState::Initializing);
        match load() {
            Ok(engines) => {
                log::info!("assets loaded: {} classes", engines.classes.len());
                self.engines = Some(engines);
                self.transition(DriverState::Ready);
                Ok(())
            }
            Err(e) => {
                log::error!("failed to load assets: {:#}", e);
                self.engines = None;
                self.transition(DriverState::Error);
                self.board.set_status(format!("failed to load assets: {e:#}"));
                Err(PipelineError::initialization(&e))
            }
        }
    }

    /// Begin processing frames. Engines loaded earlier are reused after a
    /// stop.
    pub fn start(&mut self) -> Result<(), PipelineError> {
        match self.state {
            DriverState::Running => Ok(()),
            DriverState::Ready | DriverState::Stopped => {
                self.misses = 0;
                self.transition(DriverState::Running);
                Ok(())
            }
            other => Err(PipelineError::Initialization(format!(
                "cannot start while {:?}",
                other
            ))),
        }
    }

    pub fn stop(&mut self) {
        if self.state == DriverState::Running {
            self.misses = 0;
            self.transition(DriverState::Stopped);
        }
    }

    /// One pass: pull a frame, detect, select, classify the selection and
    /// render. Failures are recorded in the returned [`Iteration`] and
    /// never propagate; a panicking detector or classifier is reported as a
    /// `Detection` or `Inference` error. The frame, grayscale image and
    /// tensor are dropped with the iteration.
    pub fn iterate(&mut self, source: &mut dyn FrameSource) -> Iteration {
        let mut it = Iteration::default();

        let engines = match (self.state, self.engines.as_mut()) {
            (DriverState::Running, Some(engines)) => engines,
            (state, _) => {
                it.error = Some(PipelineError::Initialization(format!(
                    "driver is {:?}, not running",
                    state
                )));
                return it;
            }
        };

        self.frame_index += 1;
        let n = self.frame_index;

        let frame = match source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                log::info!("frame source exhausted after {} frames", n - 1);
                it.end_of_stream = true;
                return it;
            }
            Err(e) => {
                log::warn!("frame {}: {}", n, e);
                it.error = Some(e);
                return it;
            }
        };

        let detected = {
            let gray = frame.to_gray();
            let params = &self.settings.detect;
            panic::catch_unwind(AssertUnwindSafe(|| engines.detector.detect(&gray, params)))
                .unwrap_or_else(|payload| {
                    Err(PipelineError::Detection(format!(
                        "detector panicked: {}",
                        panic_message(&*payload)
                    )))
                })
        };

        match detected {
            Ok(faces) => {
                it.faces = faces;
                it.selected = select_largest(&it.faces);
                if it.selected.is_some() {
                    self.misses = 0;
                } else {
                    self.misses = self.misses.saturating_add(1);
                    if let Some(limit) = self.settings.clear_after_misses {
                        if self.misses >= limit && self.board.latest().is_some() {
                            log::debug!("no face for {} frames, clearing result", self.misses);
                            self.board.clear();
                        }
                    }
                }
            }
            Err(e) => {
                log::warn!("frame {}: {}", n, e);
                it.error = Some(e);
            }
        }

        if let Some(rect) = it.selected {
            match preprocess::prepare(&frame, rect) {
                Ok(input) => {
                    match classify(engines, &input) {
                        Ok(result) => {
                            log::trace!("frame {}: {}", n, result);
                            self.board.publish(result.clone());
                            it.classification = Some(result);
                        }
                        Err(e) => {
                            log::warn!("frame {}: {}", n, e);
                            it.error = Some(e);
                        }
                    }
                    it.input = Some(input);
                }
                Err(e) => {
                    log::debug!("frame {}: {}", n, e);
                    it.error = Some(e);
                }
            }
        }

        let surface = self.renderer.render(
            &frame,
            &Overlay {
                faces: &it.faces,
                selected: it.selected,
                classification: it.classification.as_ref(),
            },
        );
        it.surface = Some(surface);
        it
    }

    /// Iterate until `stop` is requested or the source runs dry, handing
    /// each surface to `sink`. Starts the driver if it is not running yet
    /// and leaves it `Stopped`.
    pub fn run(
        &mut self,
        source: &mut dyn FrameSource,
        sink: &mut dyn FrameSink,
        ticker: &mut dyn Ticker,
        stop: &StopHandle,
    ) -> Result<RunSummary, PipelineError> {
        self.start()?;
        let mut summary = RunSummary::default();

        while !stop.is_requested() {
            ticker.wait();
            let it = match panic::catch_unwind(AssertUnwindSafe(|| self.iterate(source))) {
                Ok(it) => it,
                Err(payload) => {
                    log::error!("iteration panicked: {}", panic_message(&*payload));
                    summary.iterations += 1;
                    summary.failed += 1;
                    continue;
                }
            };
            if it.end_of_stream {
                break;
            }
            summary.iterations += 1;
            if it.error.is_some() {
                summary.failed += 1;
            }
            if it.classification.is_some() {
                summary.classified += 1;
            }
            if let Some(surface) = &it.surface {
                if let Err(e) = sink.present(surface) {
                    log::warn!("presenting frame failed: {:#}", e);
                }
            }
        }

        self.stop();
        log::info!(
            "pipeline stopped: {} iterations, {} classified, {} failed",
            summary.iterations,
            summary.classified,
            summary.failed
        );
        Ok(summary)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown cause".to_string())
}

fn classify(engines: &mut Engines, input: &InputTensor) -> Result<Classification, PipelineError> {
    let logits = panic::catch_unwind(AssertUnwindSafe(|| engines.classifier.infer(input)))
        .unwrap_or_else(|payload| {
            Err(PipelineError::Inference(format!(
                "classifier panicked: {}",
                panic_message(&*payload)
            )))
        })?;
    let scores = scores::normalize(&logits).ok_or_else(|| {
        PipelineError::Inference(format!("unusable scores {:?}", logits))
    })?;
    let label = engines.classes.name(scores.class_index).ok_or_else(|| {
        PipelineError::Inference(format!(
            "class {} outside table of {}",
            scores.class_index,
            engines.classes.len()
        ))
    })?;
    Ok(Classification {
        label: label.to_string(),
        class_index: scores.class_index,
        confidence: scores.confidence,
    })
}
