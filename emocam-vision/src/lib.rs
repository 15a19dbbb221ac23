pub mod board;
pub mod cascade;
pub mod classifier;
pub mod detect;
pub mod error;
pub mod frame;
pub mod labels;
pub mod model;
pub mod pipeline;
pub mod preprocess;
pub mod render;
pub mod schedule;
pub mod scores;
pub mod select;
pub mod source;
pub mod video;

// Re-export commonly used types
pub use board::{Board, Classification};
pub use cascade::HaarCascade;
pub use classifier::{ClassifierEngine, OnnxClassifier};
pub use detect::{DetectParams, FaceDetector, FaceRect};
pub use error::PipelineError;
pub use frame::Frame;
pub use labels::ClassNameTable;
pub use pipeline::{Driver, DriverSettings, DriverState, Engines, FrameSink, Iteration};
pub use render::Renderer;
pub use source::{FrameSource, ImageSource};
pub use video::Camera;
