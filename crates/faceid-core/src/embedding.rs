//! Flip-augmented identity embeddings.
//!
//! `embedding = l2(model(crop)) + l2(model(mirror(crop)))`. The sum is not
//! renormalized; compare with cosine distance.

use crate::onnx::ModelError;
use crate::recognizer::EmbeddingModel;
use crate::types::{l2_normalize, Embedding, NormalizedFace, EMBEDDING_DIM};

pub struct EmbeddingSynthesizer {
    model: Box<dyn EmbeddingModel>,
}

impl EmbeddingSynthesizer {
    pub fn new(model: Box<dyn EmbeddingModel>) -> Self {
        Self { model }
    }

    /// One embedding per crop, in input order.
    pub fn embed(&mut self, crops: &[NormalizedFace]) -> Result<Vec<Embedding>, ModelError> {
        if crops.is_empty() {
            return Ok(Vec::new());
        }

        let mirrored: Vec<NormalizedFace> = crops.iter().map(NormalizedFace::mirrored).collect();
        let direct = self.model.infer(crops)?;
        let flipped = self.model.infer(&mirrored)?;

        if direct.len() != crops.len() || flipped.len() != crops.len() {
            return Err(ModelError::InferenceFailed(format!(
                "embedding model returned {} / {} rows for {} crops",
                direct.len(),
                flipped.len(),
                crops.len()
            )));
        }

        direct
            .iter()
            .zip(flipped.iter())
            .map(|(a, b)| {
                if a.len() != EMBEDDING_DIM || b.len() != EMBEDDING_DIM {
                    return Err(ModelError::InferenceFailed(format!(
                        "expected {EMBEDDING_DIM}-dim output, got {} and {}",
                        a.len(),
                        b.len()
                    )));
                }
                let values = l2_normalize(a)
                    .into_iter()
                    .zip(l2_normalize(b))
                    .map(|(x, y)| x + y)
                    .collect();
                Ok(Embedding::new(values))
            })
            .collect()
    }

    /// Embed a single crop.
    pub fn embed_one(&mut self, crop: &NormalizedFace) -> Result<Embedding, ModelError> {
        self.embed(std::slice::from_ref(crop))?
            .pop()
            .ok_or_else(|| ModelError::InferenceFailed("empty embedding batch".into()))
    }
}
