//! Shared ONNX Runtime plumbing for the batch models that consume
//! normalized face crops (embedding, demographics, deepfake).

use crate::types::NormalizedFace;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// One loaded session that maps an NCHW face batch to one row per face.
pub struct OnnxBatchModel {
    session: Session,
    name: String,
}

impl OnnxBatchModel {
    pub fn load(model_path: &Path, name: &str) -> Result<Self, ModelError> {
        if !model_path.exists() {
            return Err(ModelError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2).map_err(ort::Error::from)?
            .commit_from_file(model_path)?;

        tracing::info!(
            model = name,
            path = %model_path.display(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ONNX model"
        );

        Ok(Self {
            session,
            name: name.to_string(),
        })
    }

    /// Run the batch and split the first output into one row per face.
    pub fn run(&mut self, faces: &[NormalizedFace]) -> Result<Vec<Vec<f32>>, ModelError> {
        if faces.is_empty() {
            return Ok(Vec::new());
        }
        let input = NormalizedFace::batch_tensor(faces);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::InferenceFailed(format!("{}: {e}", self.name)))?;

        split_rows(data, faces.len())
            .map_err(|e| ModelError::InferenceFailed(format!("{}: {e}", self.name)))
    }
}

/// Split a flat `[batch, k]` buffer into rows.
pub(crate) fn split_rows(data: &[f32], batch: usize) -> Result<Vec<Vec<f32>>, String> {
    if batch == 0 || data.is_empty() || data.len() % batch != 0 {
        return Err(format!("output of {} values does not divide into {batch} rows", data.len()));
    }
    let k = data.len() / batch;
    Ok(data.chunks_exact(k).map(<[f32]>::to_vec).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_rows() {
        let rows = split_rows(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 2).unwrap();
        assert_eq!(rows, vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]);
    }

    #[test]
    fn test_split_rows_rejects_ragged() {
        assert!(split_rows(&[1.0, 2.0, 3.0], 2).is_err());
        assert!(split_rows(&[], 1).is_err());
    }

    #[test]
    fn test_load_missing_model() {
        let err = OnnxBatchModel::load(Path::new("/nonexistent/model.onnx"), "test").err().unwrap();
        assert!(matches!(err, ModelError::ModelNotFound(_)));
    }
}
