//! Identity gallery persisted as one JSON document.
//!
//! Layout: `{ "<id>": { "name", "output", "face", "sex", "age", "eth" } }`,
//! with each representative face stored as `<faces_dir>/<id>.jpg`.
//!
//! All mutations run inside one mutex: the next id (`max + 1`), the face
//! image write, the record change and the full-document rewrite form a
//! single critical section. A failed rewrite rolls the in-memory change back.

use crate::projection::{self, ProjectionOutcome};
use crate::types::{Demographics, Embedding, MatchResult};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

/// Distance reported for an empty gallery.
const NO_CANDIDATE_DISTANCE: f32 = 2.0;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("identity {0} not found")]
    NotFound(u64),
    #[error("store I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("store document is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("writing face image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("store lock poisoned")]
    Poisoned,
}

/// One gallery row, as stored on disk (the id is the document key).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub name: String,
    #[serde(rename = "output")]
    pub embedding: Embedding,
    #[serde(rename = "face")]
    pub face_reference: PathBuf,
    #[serde(flatten)]
    pub demographics: Demographics,
}

type Records = BTreeMap<u64, IdentityRecord>;

pub struct IdentityStore {
    path: PathBuf,
    faces_dir: PathBuf,
    records: Mutex<Records>,
}

impl IdentityStore {
    /// Load the document at `path`, creating an empty one if it does not exist.
    pub fn open(path: impl Into<PathBuf>, faces_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let faces_dir = faces_dir.into();

        fs::create_dir_all(&faces_dir).map_err(|source| StoreError::Io {
            path: faces_dir.clone(),
            source,
        })?;

        let records = if path.exists() {
            let raw = fs::read_to_string(&path).map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;
            serde_json::from_str::<Records>(&raw)?
        } else {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
            let empty = Records::new();
            write_document(&path, &empty)?;
            empty
        };

        tracing::info!(path = %path.display(), identities = records.len(), "identity store opened");

        Ok(Self {
            path,
            faces_dir,
            records: Mutex::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Records>, StoreError> {
        self.records.lock().map_err(|_| StoreError::Poisoned)
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.lock()?.is_empty())
    }

    pub fn get(&self, id: u64) -> Result<Option<IdentityRecord>, StoreError> {
        Ok(self.lock()?.get(&id).cloned())
    }

    /// Copy of every record, ordered by id.
    pub fn snapshot(&self) -> Result<Vec<(u64, IdentityRecord)>, StoreError> {
        Ok(self.lock()?.iter().map(|(id, r)| (*id, r.clone())).collect())
    }

    /// Nearest identity by cosine distance. Linear scan over the gallery.
    ///
    /// The best candidate counts as a match only when its distance is below
    /// `threshold`; the distance is reported either way.
    pub fn find_match(&self, embedding: &Embedding, threshold: f32) -> Result<MatchResult, StoreError> {
        let records = self.lock()?;

        let mut best: Option<(f32, u64, &IdentityRecord)> = None;
        for (id, record) in records.iter() {
            let distance = embedding.cosine_distance(&record.embedding);
            if best.map_or(true, |(d, _, _)| distance < d) {
                best = Some((distance, *id, record));
            }
        }

        let result = match best {
            Some((distance, id, record)) if distance < threshold => MatchResult {
                matched: true,
                distance,
                id: Some(id),
                name: Some(record.name.clone()),
            },
            Some((distance, _, _)) => MatchResult::no_match(distance),
            None => MatchResult::no_match(NO_CANDIDATE_DISTANCE),
        };
        tracing::debug!(
            matched = result.matched,
            distance = result.distance,
            id = ?result.id,
            gallery = records.len(),
            "gallery search"
        );
        Ok(result)
    }

    /// Add a new identity and return its id (`max existing + 1`).
    pub fn insert(
        &self,
        embedding: Embedding,
        name: &str,
        face: &RgbImage,
        demographics: Demographics,
    ) -> Result<u64, StoreError> {
        let mut records = self.lock()?;
        let id = records.keys().next_back().copied().unwrap_or(0) + 1;

        let face_path = self.faces_dir.join(format!("{id}.jpg"));
        face.save(&face_path).map_err(|source| StoreError::Image {
            path: face_path.clone(),
            source,
        })?;
        let face_reference = fs::canonicalize(&face_path).unwrap_or(face_path);

        records.insert(
            id,
            IdentityRecord {
                name: name.to_string(),
                embedding,
                face_reference,
                demographics,
            },
        );
        if let Err(e) = write_document(&self.path, &records) {
            records.remove(&id);
            return Err(e);
        }

        tracing::info!(id, name, "identity enrolled");
        Ok(id)
    }

    /// Overwrite the demographic attributes of an existing identity.
    pub fn backfill_attributes(&self, id: u64, demographics: Demographics) -> Result<(), StoreError> {
        let mut records = self.lock()?;
        let record = records.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        let previous = std::mem::replace(&mut record.demographics, demographics);

        if let Err(e) = write_document(&self.path, &records) {
            if let Some(record) = records.get_mut(&id) {
                record.demographics = previous;
            }
            return Err(e);
        }

        tracing::info!(id, "identity attributes updated");
        Ok(())
    }

    /// Drop every record. Id assignment restarts at 1.
    pub fn reset(&self) -> Result<(), StoreError> {
        let mut records = self.lock()?;
        write_document(&self.path, &Records::new())?;
        let dropped = records.len();
        records.clear();
        tracing::warn!(dropped, "identity store reset");
        Ok(())
    }

    /// Diagnostic 2-D scatter of all embeddings, written to `output`.
    pub fn project_2d(&self, output: &Path) -> ProjectionOutcome {
        let points = match self.lock() {
            Ok(records) => records
                .iter()
                .map(|(id, r)| (*id, r.embedding.values.clone()))
                .collect::<Vec<_>>(),
            Err(e) => return ProjectionOutcome::Failed { reason: e.to_string() },
        };
        projection::render(&points, output)
    }
}

/// Rewrite the whole document through a sibling temp file and rename.
fn write_document(path: &Path, records: &Records) -> Result<(), StoreError> {
    let json = serde_json::to_vec(records)?;
    let tmp = path.with_extension("json.tmp");
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };
    fs::write(&tmp, json).map_err(io_err)?;
    fs::rename(&tmp, path).map_err(io_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> IdentityStore {
        IdentityStore::open(dir.path().join("database.json"), dir.path().join("faces")).unwrap()
    }

    fn unit(axis: usize) -> Embedding {
        let mut v = vec![0.0; 8];
        v[axis] = 1.0;
        Embedding::new(v)
    }

    fn face() -> RgbImage {
        RgbImage::from_pixel(112, 112, Rgb([90, 60, 30]))
    }

    #[test]
    fn test_open_creates_empty_document() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        assert!(store.is_empty().unwrap());
        assert_eq!(fs::read_to_string(dir.path().join("database.json")).unwrap(), "{}");
    }

    #[test]
    fn test_find_match_empty_store_is_sentinel() {
        let dir = TempDir::new().unwrap();
        let result = open(&dir).find_match(&unit(0), 0.6).unwrap();
        assert!(!result.matched);
        assert_eq!(result.id, None);
        assert_eq!(result.distance, NO_CANDIDATE_DISTANCE);
    }

    #[test]
    fn test_find_match_picks_minimum() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        store.insert(unit(1), "decoy", &face(), Demographics::default()).unwrap();
        store.insert(unit(2), "other", &face(), Demographics::default()).unwrap();
        let mut close = vec![0.0; 8];
        close[0] = 1.0;
        close[1] = 0.2;
        let id = store.insert(Embedding::new(close), "target", &face(), Demographics::default()).unwrap();

        let result = store.find_match(&unit(0), 0.6).unwrap();
        assert!(result.matched);
        assert_eq!(result.id, Some(id));
        assert_eq!(result.name.as_deref(), Some("target"));
    }

    #[test]
    fn test_find_match_above_threshold_reports_distance() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        store.insert(unit(1), "orthogonal", &face(), Demographics::default()).unwrap();
        let result = store.find_match(&unit(0), 0.6).unwrap();
        assert!(!result.matched);
        assert!((result.distance - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_insert_then_match_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        let e = Embedding::new(vec![0.3, -1.2, 0.8, 0.0, 1.5, 0.1, 0.0, 0.4]);
        let id = store.insert(e.clone(), "alice", &face(), Demographics::default()).unwrap();
        let result = store.find_match(&e, 0.5).unwrap();
        assert_eq!(result.id, Some(id));
        assert!(result.distance.abs() < 1e-5);
    }

    #[test]
    fn test_insert_persists_layout_and_face() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        let demographics = Demographics {
            sex: Some(vec![0.1]),
            age: Some(vec![5.0]),
            ethnicity: Some(vec![0.0, 1.0, 0.0, 0.0, 0.0]),
        };
        let id = store.insert(unit(3), "bob", &face(), demographics.clone()).unwrap();
        assert_eq!(id, 1);

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
        let row = &raw["1"];
        assert_eq!(row["name"], "bob");
        assert_eq!(row["output"].as_array().unwrap().len(), 8);
        assert_eq!(row["eth"][1], 1.0);
        assert!(row["face"].as_str().unwrap().ends_with("1.jpg"));
        assert!(dir.path().join("faces/1.jpg").exists());

        let reopened = open(&dir);
        let record = reopened.get(1).unwrap().unwrap();
        assert_eq!(record.demographics, demographics);
        assert_eq!(record.embedding, unit(3));
    }

    #[test]
    fn test_ids_follow_max_plus_one() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        for expected in 1..=3 {
            let id = store.insert(unit(0), "x", &face(), Demographics::default()).unwrap();
            assert_eq!(id, expected);
        }
    }

    #[test]
    fn test_reset_restarts_ids() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        store.insert(unit(0), "a", &face(), Demographics::default()).unwrap();
        store.insert(unit(1), "b", &face(), Demographics::default()).unwrap();
        store.reset().unwrap();
        assert!(store.is_empty().unwrap());
        assert!(open(&dir).is_empty().unwrap());
        let id = store.insert(unit(2), "c", &face(), Demographics::default()).unwrap();
        assert_eq!(id, 1);
    }

    #[test]
    fn test_backfill_updates_and_persists() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        let id = store.insert(unit(0), "a", &face(), Demographics::default()).unwrap();
        let attrs = Demographics {
            sex: Some(vec![0.9]),
            ..Demographics::default()
        };
        store.backfill_attributes(id, attrs.clone()).unwrap();
        assert_eq!(open(&dir).get(id).unwrap().unwrap().demographics, attrs);
    }

    #[test]
    fn test_backfill_unknown_id_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        let err = store.backfill_attributes(42, Demographics::default()).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(42)));
    }

    #[test]
    fn test_concurrent_inserts_get_distinct_ids() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(open(&dir));
        let n = 16;

        let handles: Vec<_> = (0..n)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    store
                        .insert(unit(i % 8), &format!("p{i}"), &face(), Demographics::default())
                        .unwrap()
                })
            })
            .collect();

        let mut ids: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        ids.sort_unstable();
        assert_eq!(ids, (1..=n as u64).collect::<Vec<_>>());
        assert_eq!(open(&dir).len().unwrap(), n);
    }

    #[test]
    fn test_failed_persist_leaves_memory_unchanged() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        let id = store.insert(unit(0), "a", &face(), Demographics::default()).unwrap();

        // A directory squatting on the temp path makes the rewrite fail.
        fs::create_dir(store.path().with_extension("json.tmp")).unwrap();

        assert!(store.insert(unit(1), "b", &face(), Demographics::default()).is_err());
        assert_eq!(store.len().unwrap(), 1);

        let attrs = Demographics {
            age: Some(vec![1.0]),
            ..Demographics::default()
        };
        assert!(store.backfill_attributes(id, attrs).is_err());
        assert_eq!(store.get(id).unwrap().unwrap().demographics, Demographics::default());
    }

    #[test]
    fn test_corrupt_document_is_an_error() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("database.json"), "{not json").unwrap();
        let err = IdentityStore::open(dir.path().join("database.json"), dir.path().join("faces"))
            .err()
            .unwrap();
        assert!(matches!(err, StoreError::Json(_)));
    }
}
