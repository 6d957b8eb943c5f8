//! ArcFace embedding model via ONNX Runtime.
//!
//! Produces one raw 512-dimensional vector per normalized 112×112 crop.
//! Normalization and flip augmentation happen in [`crate::embedding`].

use crate::onnx::{ModelError, OnnxBatchModel};
use crate::types::{NormalizedFace, EMBEDDING_DIM};
use std::path::Path;

/// Anything that maps a batch of normalized crops to one raw vector each.
pub trait EmbeddingModel: Send {
    fn infer(&mut self, batch: &[NormalizedFace]) -> Result<Vec<Vec<f32>>, ModelError>;
}

/// ArcFace-based embedding model (e.g. w600k_r50).
pub struct ArcFaceModel {
    model: OnnxBatchModel,
}

impl ArcFaceModel {
    pub fn load(model_path: &Path) -> Result<Self, ModelError> {
        Ok(Self {
            model: OnnxBatchModel::load(model_path, "arcface")?,
        })
    }
}

impl EmbeddingModel for ArcFaceModel {
    fn infer(&mut self, batch: &[NormalizedFace]) -> Result<Vec<Vec<f32>>, ModelError> {
        let rows = self.model.run(batch)?;
        if let Some(row) = rows.iter().find(|r| r.len() != EMBEDDING_DIM) {
            return Err(ModelError::InferenceFailed(format!(
                "expected {EMBEDDING_DIM}-dim embedding, got {}",
                row.len()
            )));
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_requires_model_file() {
        let err = ArcFaceModel::load(Path::new("/nonexistent/w600k_r50.onnx")).err().unwrap();
        assert!(matches!(err, ModelError::ModelNotFound(_)));
    }
}
