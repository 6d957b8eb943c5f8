//! Matching pipeline: normalizer → embedding synthesizer → identity store.
//!
//! Every operation runs the two-pass normalization first. Operations on a
//! single face use the designated face, the most confident detection of the
//! second pass.

use crate::artifacts::{self, ArtifactError};
use crate::classifier::{self, DeepfakeClassifier, DemographicClassifier};
use crate::detector::FaceDetector;
use crate::embedding::EmbeddingSynthesizer;
use crate::normalizer::{NormalizeError, NormalizedFrame, Normalizer, DEFAULT_DETECTION_THRESHOLD};
use crate::onnx::ModelError;
use crate::projection::ProjectionOutcome;
use crate::recognizer::EmbeddingModel;
use crate::store::{IdentityStore, StoreError};
use crate::types::{Demographics, Embedding, MatchResult, NormalizedFace};
use image::RgbImage;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Default cosine-distance threshold for a gallery match.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;
/// Stricter threshold used when identifying a single probe.
pub const DEFAULT_IDENTIFY_THRESHOLD: f32 = 0.5;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("no face detected")]
    NoFaceDetected,
    #[error("detector error: {0}")]
    Detector(#[from] crate::detector::DetectorError),
    #[error("model error: {0}")]
    Model(#[from] ModelError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("artifact error: {0}")]
    Artifact(#[from] ArtifactError),
}

impl From<NormalizeError> for PipelineError {
    fn from(e: NormalizeError) -> Self {
        match e {
            NormalizeError::Detector(e) => PipelineError::Detector(e),
            NormalizeError::NoFaceDetected(pass) => {
                tracing::debug!(%pass, "normalization found no face");
                PipelineError::NoFaceDetected
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineSettings {
    pub detection_threshold: f32,
    pub match_threshold: f32,
    pub identify_threshold: f32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            detection_threshold: DEFAULT_DETECTION_THRESHOLD,
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            identify_threshold: DEFAULT_IDENTIFY_THRESHOLD,
        }
    }
}

pub struct MatchingPipeline {
    normalizer: Normalizer,
    synthesizer: EmbeddingSynthesizer,
    demographics: Box<dyn DemographicClassifier>,
    deepfake: Box<dyn DeepfakeClassifier>,
    store: Arc<IdentityStore>,
    settings: PipelineSettings,
}

impl MatchingPipeline {
    pub fn new(
        detector: Box<dyn FaceDetector>,
        embedder: Box<dyn EmbeddingModel>,
        demographics: Box<dyn DemographicClassifier>,
        deepfake: Box<dyn DeepfakeClassifier>,
        store: Arc<IdentityStore>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            normalizer: Normalizer::new(detector, settings.detection_threshold),
            synthesizer: EmbeddingSynthesizer::new(embedder),
            demographics,
            deepfake,
            store,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<IdentityStore> {
        &self.store
    }

    pub fn settings(&self) -> PipelineSettings {
        self.settings
    }

    fn normalize(&mut self, image: &RgbImage) -> Result<NormalizedFrame, PipelineError> {
        Ok(self.normalizer.normalize(image)?)
    }

    fn classify_one(&mut self, face: &NormalizedFace) -> Result<Demographics, PipelineError> {
        let mut out = self.demographics.classify(std::slice::from_ref(face))?;
        out.pop()
            .ok_or_else(|| ModelError::InferenceFailed("demographic classifier returned no rows".into()).into())
    }

    /// Enroll the designated face under `name`. Returns the new identity id.
    pub fn enroll(&mut self, image: &RgbImage, name: &str) -> Result<u64, PipelineError> {
        let frame = self.normalize(image)?;
        if frame.faces().len() > 1 {
            tracing::info!(faces = frame.faces().len(), "several faces detected; enrolling the most confident");
        }
        let face = frame.designated();
        let embedding = self.synthesizer.embed_one(face)?;
        let demographics = self.classify_one(face)?;
        Ok(self.store.insert(embedding, name, &face.to_rgb_image(), demographics)?)
    }

    /// Identify the designated face with the strict threshold.
    pub fn identify(&mut self, image: &RgbImage) -> Result<MatchResult, PipelineError> {
        let embedding = self.features(image)?;
        Ok(self.store.find_match(&embedding, self.settings.identify_threshold)?)
    }

    /// Match every detected face with the default threshold.
    pub fn recognize_all(&mut self, image: &RgbImage) -> Result<Vec<MatchResult>, PipelineError> {
        let frame = self.normalize(image)?;
        let embeddings = self.synthesizer.embed(frame.faces())?;
        embeddings
            .iter()
            .map(|e| Ok(self.store.find_match(e, self.settings.match_threshold)?))
            .collect()
    }

    /// Cosine distance between the designated faces of two images.
    pub fn compare(&mut self, first: &RgbImage, second: &RgbImage) -> Result<f32, PipelineError> {
        let a = self.features(first)?;
        let b = self.features(second)?;
        let distance = a.cosine_distance(&b);
        tracing::info!(distance, "compared two images");
        Ok(distance)
    }

    /// Deepfake likelihood per detected face, as integer percentages.
    pub fn deepfake_scores(&mut self, image: &RgbImage) -> Result<Vec<i32>, PipelineError> {
        let frame = self.normalize(image)?;
        let scores = self.deepfake.predict(frame.faces())?;
        Ok(scores.into_iter().map(classifier::to_percentage).collect())
    }

    /// Recompute demographics from `image` and attach them to identity `id`.
    pub fn update_attributes(&mut self, image: &RgbImage, id: u64) -> Result<(), PipelineError> {
        let frame = self.normalize(image)?;
        let demographics = self.classify_one(frame.designated())?;
        Ok(self.store.backfill_attributes(id, demographics)?)
    }

    /// Embedding of the designated face.
    pub fn features(&mut self, image: &RgbImage) -> Result<Embedding, PipelineError> {
        let frame = self.normalize(image)?;
        Ok(self.synthesizer.embed_one(frame.designated())?)
    }

    /// Save the designated face's embedding as a numbered JSON export.
    pub fn export_features(&mut self, image: &RgbImage, source: &str, dir: &Path) -> Result<u64, PipelineError> {
        let embedding = self.features(image)?;
        Ok(artifacts::save_embedding_export(dir, source, &embedding)?)
    }

    /// Save the designated normalized face as a numbered JPEG.
    pub fn snapshot_face(&mut self, image: &RgbImage, dir: &Path) -> Result<u64, PipelineError> {
        let frame = self.normalize(image)?;
        Ok(artifacts::save_display_face(dir, frame.designated())?)
    }

    pub fn reset(&self) -> Result<(), PipelineError> {
        Ok(self.store.reset()?)
    }

    pub fn project(&self, output: &Path) -> ProjectionOutcome {
        self.store.project_2d(output)
    }
}
