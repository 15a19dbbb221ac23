use std::collections::VecDeque;

use anyhow::Result;
use emocam_vision::pipeline::{NullSink, RunSummary};
use emocam_vision::preprocess::{InputTensor, INPUT_SHAPE};
use emocam_vision::schedule::{StopHandle, Unpaced};
use emocam_vision::{
    Board, ClassNameTable, ClassifierEngine, DetectParams, Driver, DriverSettings, DriverState,
    Engines, FaceDetector, FaceRect, Frame, FrameSink, HaarCascade, PipelineError, Renderer,
};
use image::{GrayImage, Rgb, RgbImage};

/// Replays a fixed list of detection results, one per call, then finds
/// nothing.
struct ScriptedDetector(VecDeque<Vec<FaceRect>>);

impl ScriptedDetector {
    fn new(script: Vec<Vec<FaceRect>>) -> Self {
        Self(script.into())
    }
}

impl FaceDetector for ScriptedDetector {
    fn detect(
        &mut self,
        _gray: &GrayImage,
        _params: &DetectParams,
    ) -> Result<Vec<FaceRect>, PipelineError> {
        Ok(self.0.pop_front().unwrap_or_default())
    }
}

/// Favours a different class on every call.
struct StubClassifier {
    classes: usize,
    calls: usize,
}

impl ClassifierEngine for StubClassifier {
    fn infer(&mut self, input: &InputTensor) -> Result<Vec<f32>, PipelineError> {
        assert_eq!(input.shape(), &INPUT_SHAPE[..]);
        self.calls += 1;
        let mut logits = vec![0.0; self.classes];
        logits[self.calls % self.classes] = 4.0;
        Ok(logits)
    }
}

const CLASSES: [&str; 7] = [
    "angry", "disgust", "fear", "happy", "sad", "surprise", "neutral",
];

fn face_frame() -> Frame {
    let mut img = RgbImage::from_pixel(100, 100, Rgb([30, 30, 30]));
    for y in 10..50 {
        for x in 10..50 {
            img.put_pixel(x, y, Rgb([200, 170, 150]));
        }
    }
    Frame::from(img)
}

fn engines(script: Vec<Vec<FaceRect>>) -> Result<Engines> {
    Ok(Engines {
        detector: Box::new(ScriptedDetector::new(script)),
        classifier: Box::new(StubClassifier {
            classes: CLASSES.len(),
            calls: 0,
        }),
        classes: ClassNameTable::new(CLASSES.iter().map(|s| s.to_string()).collect())?,
    })
}

fn running_driver(settings: DriverSettings, script: Vec<Vec<FaceRect>>) -> Result<Driver> {
    let mut driver = Driver::new(settings, Renderer::new(None, true), Board::new())?;
    driver.initialize(|| engines(script))?;
    driver.start()?;
    Ok(driver)
}

type Frames = std::vec::IntoIter<Result<Frame, PipelineError>>;

fn frames(items: Vec<Result<Frame, PipelineError>>) -> Frames {
    items.into_iter()
}

fn dropped() -> Result<Frame, PipelineError> {
    Err(PipelineError::Acquisition("camera busy".into()))
}

#[test]
fn test_end_to_end_single_face() -> Result<()> {
    env_logger::try_init().ok();
    let face = FaceRect::new(10, 10, 40, 40);
    let mut driver = running_driver(DriverSettings::default(), vec![vec![face]])?;
    let mut source = frames(vec![Ok(face_frame())]);

    let it = driver.iterate(&mut source);

    assert!(it.error.is_none(), "unexpected error {:?}", it.error);
    assert_eq!(it.selected, Some(face));
    let input = it.input.as_ref().expect("tensor");
    assert_eq!(input.shape(), &INPUT_SHAPE[..]);
    assert!(input.array().iter().all(|v| (0.0..=1.0).contains(v)));

    let result = it.classification.as_ref().expect("classification");
    assert!((0.0..=1.0).contains(&result.confidence));
    assert!(CLASSES.contains(&result.label.as_str()));
    assert_eq!(CLASSES[result.class_index], result.label);
    assert_eq!(driver.board().latest().as_ref(), Some(result));

    let surface = it.surface.as_ref().expect("surface");
    assert_eq!(surface.dimensions(), (100, 100));
    Ok(())
}

#[test]
fn test_no_face_still_renders_and_keeps_result() -> Result<()> {
    let face = FaceRect::new(10, 10, 40, 40);
    let mut driver = running_driver(DriverSettings::default(), vec![vec![face], vec![]])?;
    let mut source = frames(vec![Ok(face_frame()), Ok(face_frame())]);

    let first = driver.iterate(&mut source).classification;
    let second = driver.iterate(&mut source);

    assert!(second.error.is_none());
    assert!(second.selected.is_none());
    assert!(second.classification.is_none());
    assert!(second.surface.is_some());
    assert_eq!(driver.board().latest(), first);
    Ok(())
}

#[test]
fn test_acquisition_failure_leaves_result_unchanged() -> Result<()> {
    let face = FaceRect::new(10, 10, 40, 40);
    let mut driver = running_driver(DriverSettings::default(), vec![vec![face]])?;
    let mut source = frames(vec![Ok(face_frame()), dropped()]);

    driver.iterate(&mut source);
    let before = driver.board().latest();
    assert!(before.is_some());

    let it = driver.iterate(&mut source);
    assert!(matches!(it.error, Some(PipelineError::Acquisition(_))));
    assert!(it.surface.is_none());
    assert_eq!(driver.board().latest(), before);
    Ok(())
}

#[test]
fn test_region_outside_frame_is_skipped() -> Result<()> {
    let outside = FaceRect::new(150, 150, 20, 20);
    let mut driver = running_driver(DriverSettings::default(), vec![vec![outside]])?;
    let mut source = frames(vec![Ok(face_frame())]);

    let it = driver.iterate(&mut source);
    assert!(matches!(
        it.error,
        Some(PipelineError::InvalidRegion { rect }) if rect == outside
    ));
    assert!(it.input.is_none());
    assert!(it.surface.is_some());
    assert!(driver.board().latest().is_none());
    Ok(())
}

#[test]
fn test_largest_face_is_classified() -> Result<()> {
    let small = FaceRect::new(60, 60, 20, 20);
    let large = FaceRect::new(10, 10, 40, 40);
    let mut driver = running_driver(DriverSettings::default(), vec![vec![small, large]])?;
    let mut source = frames(vec![Ok(face_frame())]);

    let it = driver.iterate(&mut source);
    assert_eq!(it.faces.len(), 2);
    assert_eq!(it.selected, Some(large));
    Ok(())
}

#[test]
fn test_clear_after_misses() -> Result<()> {
    let face = FaceRect::new(10, 10, 40, 40);
    let settings = DriverSettings {
        clear_after_misses: Some(2),
        ..Default::default()
    };
    let mut driver = running_driver(settings, vec![vec![face], vec![], vec![], vec![]])?;
    let mut source = frames(vec![
        Ok(face_frame()),
        Ok(face_frame()),
        dropped(),
        dropped(),
        Ok(face_frame()),
    ]);

    driver.iterate(&mut source);
    driver.iterate(&mut source);
    assert!(driver.board().latest().is_some());
    // dropped frames are not misses
    driver.iterate(&mut source);
    driver.iterate(&mut source);
    assert!(driver.board().latest().is_some());
    driver.iterate(&mut source);
    assert!(driver.board().latest().is_none());
    assert_eq!(driver.board().latest_text(), "- 0.0%");
    Ok(())
}

#[derive(Default)]
struct CountingSink {
    presented: usize,
}

impl FrameSink for CountingSink {
    fn present(&mut self, _surface: &RgbImage) -> Result<()> {
        self.presented += 1;
        anyhow::ensure!(self.presented != 2, "display went away");
        Ok(())
    }
}

#[test]
fn test_run_until_source_exhausted() -> Result<()> {
    let face = FaceRect::new(10, 10, 40, 40);
    let mut driver = running_driver(DriverSettings::default(), vec![vec![face]; 3])?;
    let mut source = frames(vec![
        Ok(face_frame()),
        dropped(),
        Ok(face_frame()),
        Ok(face_frame()),
    ]);
    let mut sink = CountingSink::default();

    let summary = driver.run(&mut source, &mut sink, &mut Unpaced, &StopHandle::new())?;

    assert_eq!(
        summary,
        RunSummary {
            iterations: 4,
            classified: 3,
            failed: 1,
        }
    );
    // the failing present did not end the loop
    assert_eq!(sink.presented, 3);
    assert_eq!(driver.state(), DriverState::Stopped);
    Ok(())
}

#[test]
fn test_run_checks_stop_before_each_iteration() -> Result<()> {
    let mut driver = running_driver(DriverSettings::default(), vec![])?;
    let mut source = frames(vec![Ok(face_frame())]);
    let stop = StopHandle::new();
    stop.request();

    let summary = driver.run(&mut source, &mut NullSink, &mut Unpaced, &stop)?;
    assert_eq!(summary.iterations, 0);
    assert_eq!(source.len(), 1);
    assert_eq!(driver.state(), DriverState::Stopped);

    // restart without reloading
    stop.reset();
    let summary = driver.run(&mut source, &mut NullSink, &mut Unpaced, &stop)?;
    assert_eq!(summary.iterations, 1);
    Ok(())
}

#[test]
fn test_run_before_initialize_fails() -> Result<()> {
    let mut driver = Driver::new(
        DriverSettings::default(),
        Renderer::new(None, true),
        Board::new(),
    )?;
    let mut source = frames(vec![Ok(face_frame())]);
    let err = driver
        .run(&mut source, &mut NullSink, &mut Unpaced, &StopHandle::new())
        .unwrap_err();
    assert!(matches!(err, PipelineError::Initialization(_)));
    assert_eq!(source.len(), 1);
    Ok(())
}

const EDGE_CASCADE: &str = r#"{
    "width": 8, "height": 8,
    "stages": [ { "threshold": 0.0, "stumps": [
        { "feature": 0, "threshold": 0.5, "left": -1.0, "right": 1.0 } ] } ],
    "features": [ { "rects": [[0, 0, 8, 8, -1.0], [0, 4, 8, 4, 2.0]] } ]
}"#;

#[test]
fn test_cascade_detector_in_driver() -> Result<()> {
    let settings = DriverSettings {
        detect: DetectParams {
            min_neighbors: 0,
            max_size: (8, 8),
            ..Default::default()
        },
        clear_after_misses: None,
    };
    let mut driver = Driver::new(settings, Renderer::new(None, false), Board::new())?;
    driver.initialize(|| {
        let mut e = engines(vec![])?;
        e.detector = Box::new(HaarCascade::from_json_str(EDGE_CASCADE)?);
        Ok(e)
    })?;
    driver.start()?;

    let edge = RgbImage::from_fn(32, 32, |_, y| {
        if y < 16 {
            Rgb([0, 0, 0])
        } else {
            Rgb([255, 255, 255])
        }
    });
    let mut source = frames(vec![Ok(Frame::from(edge))]);
    let it = driver.iterate(&mut source);

    assert!(it.error.is_none(), "unexpected error {:?}", it.error);
    assert!(!it.faces.is_empty());
    let selected = it.selected.expect("face on the edge");
    assert!((10..=14).contains(&selected.y));
    assert!(it.classification.is_some());
    Ok(())
}

const FACE_COLOR: Rgb<u8> = Rgb([200, 170, 150]);
const STROKE_COLOR: Rgb<u8> = Rgb([0x10, 0xb9, 0x81]);

/// Replays detection outcomes, errors included, then finds nothing.
struct FaultyDetector(VecDeque<Result<Vec<FaceRect>, PipelineError>>);

impl FaceDetector for FaultyDetector {
    fn detect(
        &mut self,
        _gray: &GrayImage,
        _params: &DetectParams,
    ) -> Result<Vec<FaceRect>, PipelineError> {
        self.0.pop_front().unwrap_or(Ok(vec![]))
    }
}

/// Replays classifier outputs, errors included.
struct FaultyClassifier(VecDeque<Result<Vec<f32>, PipelineError>>);

impl ClassifierEngine for FaultyClassifier {
    fn infer(&mut self, _input: &InputTensor) -> Result<Vec<f32>, PipelineError> {
        self.0
            .pop_front()
            .unwrap_or_else(|| Err(PipelineError::Inference("script exhausted".into())))
    }
}

fn faulty_driver(
    detections: Vec<Result<Vec<FaceRect>, PipelineError>>,
    outputs: Option<Vec<Result<Vec<f32>, PipelineError>>>,
) -> Result<Driver> {
    let mut driver = Driver::new(
        DriverSettings::default(),
        Renderer::new(None, true),
        Board::new(),
    )?;
    driver.initialize(|| {
        let mut e = engines(vec![])?;
        e.detector = Box::new(FaultyDetector(detections.into()));
        if let Some(outputs) = outputs {
            e.classifier = Box::new(FaultyClassifier(outputs.into()));
        }
        Ok(e)
    })?;
    driver.start()?;
    Ok(driver)
}

#[test]
fn test_detection_error_renders_without_rectangles() -> Result<()> {
    let face = FaceRect::new(10, 10, 40, 40);
    let mut driver = faulty_driver(
        vec![
            Ok(vec![face]),
            Err(PipelineError::Detection("cascade fault".into())),
        ],
        None,
    )?;
    let mut source = frames(vec![Ok(face_frame()), Ok(face_frame())]);

    driver.iterate(&mut source);
    let before = driver.board().latest();
    assert!(before.is_some());

    let it = driver.iterate(&mut source);
    assert!(matches!(it.error, Some(PipelineError::Detection(_))));
    assert!(it.faces.is_empty());
    assert!(it.selected.is_none());
    assert!(it.classification.is_none());
    let surface = it.surface.as_ref().expect("surface");
    assert_eq!(*surface.get_pixel(10, 10), FACE_COLOR);
    assert_eq!(driver.board().latest(), before);
    Ok(())
}

#[test]
fn test_inference_errors_render_rectangle_without_label() -> Result<()> {
    let face = FaceRect::new(10, 10, 40, 40);
    let mut happy = vec![0.0; CLASSES.len()];
    happy[3] = 4.0;
    // longer than the class table, with the maximum past its end
    let mut too_long = vec![0.0; CLASSES.len() + 2];
    too_long[CLASSES.len() + 1] = 4.0;
    let mut driver = faulty_driver(
        vec![Ok(vec![face]); 3],
        Some(vec![
            Ok(happy),
            Err(PipelineError::Inference("session failed".into())),
            Ok(too_long),
        ]),
    )?;
    let mut source = frames(vec![Ok(face_frame()), Ok(face_frame()), Ok(face_frame())]);

    let first = driver.iterate(&mut source);
    assert_eq!(first.classification.as_ref().map(|c| c.label.as_str()), Some("happy"));
    let before = driver.board().latest();

    for _ in 0..2 {
        let it = driver.iterate(&mut source);
        assert!(
            matches!(it.error, Some(PipelineError::Inference(_))),
            "unexpected {:?}",
            it.error
        );
        assert_eq!(it.selected, Some(face));
        assert!(it.classification.is_none());
        let surface = it.surface.as_ref().expect("surface");
        assert_eq!(*surface.get_pixel(10, 10), STROKE_COLOR);
        // the label box would cover this pixel
        assert_eq!(*surface.get_pixel(20, 15), FACE_COLOR);
        assert_eq!(driver.board().latest(), before);
    }
    Ok(())
}

/// Finds the face every time except the second call, where it panics.
struct PanicOnce {
    calls: usize,
}

impl FaceDetector for PanicOnce {
    fn detect(
        &mut self,
        _gray: &GrayImage,
        _params: &DetectParams,
    ) -> Result<Vec<FaceRect>, PipelineError> {
        self.calls += 1;
        if self.calls == 2 {
            panic!("corrupt stage table");
        }
        Ok(vec![FaceRect::new(10, 10, 40, 40)])
    }
}

#[test]
fn test_panicking_detector_is_a_detection_error() -> Result<()> {
    let mut driver = Driver::new(
        DriverSettings::default(),
        Renderer::new(None, true),
        Board::new(),
    )?;
    driver.initialize(|| {
        let mut e = engines(vec![])?;
        e.detector = Box::new(PanicOnce { calls: 0 });
        Ok(e)
    })?;
    driver.start()?;
    let mut source = frames(vec![Ok(face_frame()), Ok(face_frame())]);

    driver.iterate(&mut source);
    let it = driver.iterate(&mut source);
    assert!(matches!(
        &it.error,
        Some(PipelineError::Detection(msg)) if msg.contains("corrupt stage table")
    ));
    assert!(it.surface.is_some());
    assert_eq!(driver.state(), DriverState::Running);
    Ok(())
}

#[test]
fn test_run_survives_panicking_detector() -> Result<()> {
    let mut driver = Driver::new(
        DriverSettings::default(),
        Renderer::new(None, true),
        Board::new(),
    )?;
    driver.initialize(|| {
        let mut e = engines(vec![])?;
        e.detector = Box::new(PanicOnce { calls: 0 });
        Ok(e)
    })?;
    let mut source = frames(vec![Ok(face_frame()), Ok(face_frame()), Ok(face_frame())]);
    let mut sink = CountingSink::default();

    let summary = driver.run(&mut source, &mut sink, &mut Unpaced, &StopHandle::new())?;

    assert_eq!(
        summary,
        RunSummary {
            iterations: 3,
            classified: 2,
            failed: 1,
        }
    );
    assert_eq!(driver.state(), DriverState::Stopped);
    Ok(())
}

#[test]
fn test_run_survives_panicking_source() -> Result<()> {
    let face = FaceRect::new(10, 10, 40, 40);
    let mut driver = running_driver(DriverSettings::default(), vec![vec![face]; 3])?;
    let mut source = (0..3).map(|i| {
        if i == 1 {
            panic!("capture buffer unmapped");
        }
        Ok::<_, PipelineError>(face_frame())
    });

    let summary = driver.run(&mut source, &mut NullSink, &mut Unpaced, &StopHandle::new())?;

    assert_eq!(
        summary,
        RunSummary {
            iterations: 3,
            classified: 2,
            failed: 1,
        }
    );
    assert_eq!(driver.state(), DriverState::Stopped);
    Ok(())
}
