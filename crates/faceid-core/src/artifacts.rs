//! Numbered side artifacts: exported embeddings (`<n>.json`) and display
//! snapshots of normalized faces (`<n>.jpg`). `n` is one past the largest
//! number already present in the directory.

use crate::types::{Embedding, NormalizedFace};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("artifact I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("encoding export: {0}")]
    Json(#[from] serde_json::Error),
    #[error("writing image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> ArtifactError + '_ {
    move |source| ArtifactError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Next free number for files named `<n>.<extension>` in `dir`.
pub fn next_artifact_id(dir: &Path, extension: &str) -> Result<u64, ArtifactError> {
    let mut max = 0;
    for entry in fs::read_dir(dir).map_err(io_error(dir))? {
        let path = entry.map_err(io_error(dir))?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(extension) {
            continue;
        }
        if let Some(n) = path.file_stem().and_then(|s| s.to_str()).and_then(|s| s.parse::<u64>().ok()) {
            max = max.max(n);
        }
    }
    Ok(max + 1)
}

/// Empty `dir`, creating it when missing.
pub fn reset_dir(dir: &Path) -> Result<(), ArtifactError> {
    if dir.exists() {
        fs::remove_dir_all(dir).map_err(io_error(dir))?;
    }
    fs::create_dir_all(dir).map_err(io_error(dir))
}

#[derive(Serialize)]
struct EmbeddingExport<'a> {
    path: &'a str,
    outputs: &'a Embedding,
}

/// Write `{ "path": source, "outputs": [...] }` as the next `<n>.json`.
pub fn save_embedding_export(dir: &Path, source: &str, embedding: &Embedding) -> Result<u64, ArtifactError> {
    fs::create_dir_all(dir).map_err(io_error(dir))?;
    let id = next_artifact_id(dir, "json")?;
    let path = dir.join(format!("{id}.json"));
    let body = serde_json::to_vec(&EmbeddingExport {
        path: source,
        outputs: embedding,
    })?;
    fs::write(&path, body).map_err(io_error(&path))?;
    tracing::debug!(id, path = %path.display(), "embedding exported");
    Ok(id)
}

/// Write the denormalized face as the next `<n>.jpg`.
pub fn save_display_face(dir: &Path, face: &NormalizedFace) -> Result<u64, ArtifactError> {
    fs::create_dir_all(dir).map_err(io_error(dir))?;
    let id = next_artifact_id(dir, "jpg")?;
    let path = dir.join(format!("{id}.jpg"));
    face.to_rgb_image()
        .save(&path)
        .map_err(|source| ArtifactError::Image { path: path.clone(), source })?;
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use tempfile::TempDir;

    #[test]
    fn test_next_artifact_id_ignores_other_files() {
        let dir = TempDir::new().unwrap();
        assert_eq!(next_artifact_id(dir.path(), "json").unwrap(), 1);
        fs::write(dir.path().join("3.json"), "{}").unwrap();
        fs::write(dir.path().join("9.jpg"), "").unwrap();
        fs::write(dir.path().join("notes.json"), "").unwrap();
        assert_eq!(next_artifact_id(dir.path(), "json").unwrap(), 4);
        assert_eq!(next_artifact_id(dir.path(), "jpg").unwrap(), 10);
    }

    #[test]
    fn test_save_embedding_export() {
        let dir = TempDir::new().unwrap();
        let e = Embedding::new(vec![0.5, -0.5]);
        assert_eq!(save_embedding_export(dir.path(), "a.jpg", &e).unwrap(), 1);
        assert_eq!(save_embedding_export(dir.path(), "b.jpg", &e).unwrap(), 2);
        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join("2.json")).unwrap()).unwrap();
        assert_eq!(raw["path"], "b.jpg");
        assert_eq!(raw["outputs"][1], -0.5);
    }

    #[test]
    fn test_save_display_face_and_reset() {
        let dir = TempDir::new().unwrap();
        let display = dir.path().join("faces2display");
        let face = NormalizedFace::from_rgb(&RgbImage::new(112, 112));
        assert_eq!(save_display_face(&display, &face).unwrap(), 1);
        assert_eq!(save_display_face(&display, &face).unwrap(), 2);
        reset_dir(&display).unwrap();
        assert_eq!(next_artifact_id(&display, "jpg").unwrap(), 1);
    }
}
