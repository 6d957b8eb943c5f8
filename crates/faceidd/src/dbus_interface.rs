use crate::engine::{EngineError, EngineHandle, EngineStatus};
use faceid_core::wire::{self, SENTINEL, SUCCESS};
use faceid_core::{MatchResult, ProjectionOutcome};
use std::path::PathBuf;
use zbus::interface;

/// D-Bus interface for the faceid gallery daemon.
///
/// Bus name: org.faceid.Gallery1
/// Object path: /org/faceid/Gallery1
///
/// Image arguments are file paths readable by the daemon. Results are
/// packed little-endian `f32` buffers (see [`faceid_core::wire`]).
pub struct FaceIdService {
    engine: EngineHandle,
}

impl FaceIdService {
    pub fn new(engine: EngineHandle) -> Self {
        Self { engine }
    }
}

#[interface(name = "org.faceid.Gallery1")]
impl FaceIdService {
    /// Enroll the most confident face in the image under `name`.
    async fn enroll(&self, path: &str, name: &str) -> zbus::fdo::Result<Vec<u8>> {
        tracing::info!(path, name, "enroll requested");
        let id = self
            .engine
            .enroll(PathBuf::from(path), name.to_string())
            .await
            .map_err(to_fdo)?;
        tracing::info!(id, name, "enroll complete");
        Ok(wire::encode_scalar(SUCCESS))
    }

    /// Identify the most confident face. Returns `[id]` or `[-1]`.
    async fn identify(&self, path: &str) -> zbus::fdo::Result<Vec<u8>> {
        tracing::info!(path, "identify requested");
        let result = self.engine.identify(PathBuf::from(path)).await.map_err(to_fdo)?;
        tracing::info!(
            matched = result.matched,
            distance = result.distance,
            id = ?result.id,
            name = ?result.name,
            "identify complete"
        );
        Ok(wire::encode_scalar(match_value(&result)))
    }

    /// One id (or `-1`) per detected face.
    async fn recognize_all(&self, path: &str) -> zbus::fdo::Result<Vec<u8>> {
        tracing::info!(path, "recognize_all requested");
        let results = self.engine.recognize_all(PathBuf::from(path)).await.map_err(to_fdo)?;
        let values: Vec<f32> = results.iter().map(match_value).collect();
        tracing::info!(faces = values.len(), "recognize_all complete");
        Ok(wire::encode(&values))
    }

    /// Cosine distance between the faces of two images.
    async fn compare(&self, first: &str, second: &str) -> zbus::fdo::Result<Vec<u8>> {
        tracing::info!(first, second, "compare requested");
        let distance = self
            .engine
            .compare(PathBuf::from(first), PathBuf::from(second))
            .await
            .map_err(to_fdo)?;
        Ok(wire::encode_scalar(distance))
    }

    /// Deepfake likelihood percentage per detected face.
    async fn deepfake(&self, path: &str) -> zbus::fdo::Result<Vec<u8>> {
        tracing::info!(path, "deepfake requested");
        let scores = self.engine.deepfake(PathBuf::from(path)).await.map_err(to_fdo)?;
        let values: Vec<f32> = scores.into_iter().map(|s| s as f32).collect();
        Ok(wire::encode(&values))
    }

    /// Recompute demographics for identity `id`. `[1]`, or `[-1]` for an unknown id.
    async fn update_attributes(&self, path: &str, id: u64) -> zbus::fdo::Result<Vec<u8>> {
        tracing::info!(path, id, "update_attributes requested");
        match self.engine.update_attributes(PathBuf::from(path), id).await {
            Ok(()) => Ok(wire::encode_scalar(SUCCESS)),
            Err(e) if e.is_unknown_identity() => {
                tracing::warn!(id, "update_attributes: no such identity");
                Ok(wire::encode_scalar(SENTINEL))
            }
            Err(e) => Err(to_fdo(e)),
        }
    }

    /// Delete every enrolled identity.
    async fn reset(&self) -> zbus::fdo::Result<Vec<u8>> {
        tracing::warn!("reset requested");
        self.engine.reset().await.map_err(to_fdo)?;
        Ok(wire::encode_scalar(SUCCESS))
    }

    /// Render the gallery scatter plot. `[1]`, or `[-1]` if it could not be drawn.
    async fn project(&self) -> zbus::fdo::Result<Vec<u8>> {
        let outcome = self.engine.project().await.map_err(to_fdo)?;
        Ok(wire::encode_scalar(projection_value(&outcome)))
    }

    /// Embedding of the most confident face.
    async fn features(&self, path: &str) -> zbus::fdo::Result<Vec<u8>> {
        tracing::info!(path, "features requested");
        let values = self.engine.features(PathBuf::from(path)).await.map_err(to_fdo)?;
        Ok(wire::encode(&values))
    }

    /// Save the embedding to `saved_outputs/<n>.json`. Returns `[n]`.
    async fn export(&self, path: &str) -> zbus::fdo::Result<Vec<u8>> {
        tracing::info!(path, "export requested");
        let n = self.engine.export(PathBuf::from(path)).await.map_err(to_fdo)?;
        Ok(wire::encode_scalar(n as f32))
    }

    /// Save the normalized face to `faces2display/<n>.jpg`. Returns `[n]`.
    async fn snapshot(&self, path: &str) -> zbus::fdo::Result<Vec<u8>> {
        tracing::info!(path, "snapshot requested");
        let n = self.engine.snapshot(PathBuf::from(path)).await.map_err(to_fdo)?;
        Ok(wire::encode_scalar(n as f32))
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let status = self.engine.status().await.map_err(to_fdo)?;
        Ok(status_json(&status).to_string())
    }
}

fn match_value(result: &MatchResult) -> f32 {
    match (result.matched, result.id) {
        (true, Some(id)) => id as f32,
        _ => SENTINEL,
    }
}

fn projection_value(outcome: &ProjectionOutcome) -> f32 {
    if outcome.is_rendered() {
        SUCCESS
    } else {
        SENTINEL
    }
}

fn status_json(status: &EngineStatus) -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "models_loaded": true,
        "identities": status.identities,
        "database": status.database.display().to_string(),
        "detection_threshold": status.detection_threshold,
        "match_threshold": status.match_threshold,
        "identify_threshold": status.identify_threshold,
    })
}

fn to_fdo(e: EngineError) -> zbus::fdo::Error {
    if e.is_no_face() {
        tracing::info!("request rejected: no face detected");
    } else {
        tracing::error!(error = %e, "request failed");
    }
    zbus::fdo::Error::Failed(e.to_string())
}
