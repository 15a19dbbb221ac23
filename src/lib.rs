pub mod assets;
pub mod config;
pub mod preview;

// Re-export vision types for convenience
pub use emocam_vision::{
    board, pipeline, video, Board, Classification, Driver, DriverSettings, DriverState, Engines,
    Frame, PipelineError,
};
