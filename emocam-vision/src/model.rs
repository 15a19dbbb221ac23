use std::path::Path;

use anyhow::{Context, Result};
#[cfg(any(feature = "openvino", feature = "cuda"))]
use ort::ep::{self, ExecutionProvider};
use ort::session::{
    builder::{GraphOptimizationLevel, SessionBuilder},
    Session,
};

/// ONNX Runtime session builder with full graph optimisation and any
/// accelerator enabled at build time.
pub fn session_builder() -> Result<SessionBuilder> {
    #[allow(unused_mut)]
    let mut builder =
        Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;

    #[cfg(feature = "openvino")]
    register(&mut builder, ep::OpenVINO::default(), "openvino")?;

    #[cfg(feature = "cuda")]
    register(&mut builder, ep::CUDA::default(), "cuda")?;

    Ok(builder)
}

#[cfg(any(feature = "openvino", feature = "cuda"))]
fn register(builder: &mut SessionBuilder, provider: impl ExecutionProvider, name: &str) -> Result<()> {
    if provider.is_available()? {
        provider.register(builder)?;
        log::debug!("{} execution provider registered", name);
    } else {
        log::warn!("{name} feature is enabled, onnx runtime not compiled with {name}");
    }
    Ok(())
}

/// Load the emotion classifier from disk.
pub fn classifier_session(path: &Path) -> Result<Session> {
    session_builder()?
        .commit_from_file(path)
        .with_context(|| format!("load classifier model {}", path.display()))
}
