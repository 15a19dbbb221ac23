use std::path::Path;

use anyhow::Result;
use ort::{
    session::Session,
    value::{Tensor, ValueType},
};

use crate::error::PipelineError;
use crate::model;
use crate::preprocess::{InputTensor, INPUT_SHAPE};

/// Maps a classifier input to one raw score per class.
///
/// Implementations may keep weights between calls but no per-call state;
/// a failed call must leave the engine usable for the next frame.
pub trait ClassifierEngine: Send {
    fn infer(&mut self, input: &InputTensor) -> Result<Vec<f32>, PipelineError>;
}

/// Emotion classifier backed by an ONNX Runtime session.
pub struct OnnxClassifier {
    session: Session,
    input_name: String,
    output_name: String,
    num_classes: usize,
}

impl OnnxClassifier {
    pub fn load(path: &Path, num_classes: usize) -> Result<Self> {
        let session = model::classifier_session(path)?;
        Ok(Self::from_session(session, num_classes)?)
    }

    /// Wrap a session whose first input takes `[1, 3, 64, 64]` and whose
    /// first output yields `num_classes` scores. Dynamic dimensions are
    /// accepted and checked on every call instead.
    pub fn from_session(session: Session, num_classes: usize) -> Result<Self, PipelineError> {
        let input = session
            .inputs()
            .first()
            .ok_or_else(|| PipelineError::Configuration("model declares no inputs".into()))?;
        let output = session
            .outputs()
            .first()
            .ok_or_else(|| PipelineError::Configuration("model declares no outputs".into()))?;

        if let ValueType::Tensor { ref shape, .. } = input.dtype() {
            let compatible = shape.len() == INPUT_SHAPE.len()
                && shape
                    .iter()
                    .zip(INPUT_SHAPE.iter())
                    .all(|(&declared, &expected)| declared < 0 || declared as usize == expected);
            if !compatible {
                return Err(PipelineError::Configuration(format!(
                    "model input {} has shape {:?}, expected {:?}",
                    input.name(),
                    shape.iter().collect::<Vec<_>>(),
                    INPUT_SHAPE
                )));
            }
        }

        if let ValueType::Tensor { ref shape, .. } = output.dtype() {
            if shape.iter().all(|&d| d > 0) {
                let len: i64 = shape.iter().product();
                if len as usize != num_classes {
                    return Err(PipelineError::Configuration(format!(
                        "model output {} yields {} scores, class table has {}",
                        output.name(),
                        len,
                        num_classes
                    )));
                }
            }
        }

        let input_name = input.name().to_string();
        let output_name = output.name().to_string();
        log::info!(
            "classifier ready: input={} output={} classes={}",
            input_name,
            output_name,
            num_classes
        );

        Ok(Self {
            session,
            input_name,
            output_name,
            num_classes,
        })
    }
}

impl ClassifierEngine for OnnxClassifier {
    fn infer(&mut self, input: &InputTensor) -> Result<Vec<f32>, PipelineError> {
        let fault = |e: ort::Error| PipelineError::Inference(e.to_string());

        let tensor = Tensor::from_array(input.array().clone()).map_err(fault)?;
        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => tensor])
            .map_err(fault)?;
        let (_shape, data) = outputs[self.output_name.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(fault)?;

        if data.len() != self.num_classes {
            return Err(PipelineError::Inference(format!(
                "expected {} scores, model produced {}",
                self.num_classes,
                data.len()
            )));
        }
        Ok(data.to_vec())
    }
}
