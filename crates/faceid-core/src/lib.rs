//! faceid-core — Face identity matching engine.
//!
//! Two-pass geometric normalization (detect, align, redetect, crop),
//! flip-augmented ArcFace embeddings, and a JSON-backed identity gallery
//! with nearest-neighbor matching. Models run via ONNX Runtime.

pub mod alignment;
pub mod artifacts;
pub mod classifier;
pub mod detector;
pub mod embedding;
pub mod normalizer;
pub mod onnx;
pub mod pipeline;
pub mod projection;
pub mod recognizer;
pub mod store;
pub mod types;
pub mod wire;

pub use classifier::{DeepfakeClassifier, DemographicClassifier, OnnxDeepfake, OnnxDemographics};
pub use detector::{FaceDetector, ScrfdDetector};
pub use pipeline::{MatchingPipeline, PipelineError, PipelineSettings};
pub use projection::ProjectionOutcome;
pub use recognizer::{ArcFaceModel, EmbeddingModel};
pub use store::{IdentityRecord, IdentityStore, StoreError};
pub use types::{Demographics, Embedding, FaceCandidate, MatchResult, NormalizedFace};
