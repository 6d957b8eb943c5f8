use image::{Rgb, RgbImage};
use ndarray::{Array3, Array4, Axis};
use serde::{Deserialize, Serialize};

/// Side length of a normalized face crop.
pub const FACE_SIZE: usize = 112;
/// Dimension of an identity embedding.
pub const EMBEDDING_DIM: usize = 512;

const PIXEL_MEAN: f32 = 127.5;
const PIXEL_SCALE: f32 = 128.0;

/// One detected face: corner box, landmarks and detector confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceCandidate {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: [(f32, f32); 5],
}

impl FaceCandidate {
    pub fn eyes(&self) -> ((f32, f32), (f32, f32)) {
        (self.landmarks[0], self.landmarks[1])
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }
}

/// A 112×112 channel-first RGB face crop with values in roughly [-1, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedFace {
    pub data: Array3<f32>,
}

impl NormalizedFace {
    /// Normalize an 8-bit RGB crop that is already `FACE_SIZE` square.
    pub fn from_rgb(crop: &RgbImage) -> Self {
        let mut data = Array3::<f32>::zeros((3, FACE_SIZE, FACE_SIZE));
        for (x, y, Rgb(px)) in crop.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            if x >= FACE_SIZE || y >= FACE_SIZE {
                continue;
            }
            for c in 0..3 {
                data[[c, y, x]] = (px[c] as f32 - PIXEL_MEAN) / PIXEL_SCALE;
            }
        }
        Self { data }
    }

    /// Horizontal mirror of this crop.
    pub fn mirrored(&self) -> Self {
        let mut data = self.data.clone();
        data.invert_axis(Axis(2));
        Self { data }
    }

    /// Map back to 8-bit RGB (`v * 128 + 127`) for persisting as an image.
    pub fn to_rgb_image(&self) -> RgbImage {
        RgbImage::from_fn(FACE_SIZE as u32, FACE_SIZE as u32, |x, y| {
            let (x, y) = (x as usize, y as usize);
            let px = |c: usize| (self.data[[c, y, x]] * PIXEL_SCALE + 127.0).clamp(0.0, 255.0) as u8;
            Rgb([px(0), px(1), px(2)])
        })
    }

    /// Stack a batch of faces into one NCHW tensor.
    pub fn batch_tensor(faces: &[NormalizedFace]) -> Array4<f32> {
        let mut tensor = Array4::<f32>::zeros((faces.len(), 3, FACE_SIZE, FACE_SIZE));
        for (i, face) in faces.iter().enumerate() {
            tensor.index_axis_mut(Axis(0), i).assign(&face.data);
        }
        tensor
    }
}

/// Face identity embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Compute cosine similarity between two embeddings.
    ///
    /// Returns a value in [-1, 1]. Higher = more similar.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }

    /// Cosine distance `1 - similarity`, in [0, 2]. Independent of vector scale.
    pub fn cosine_distance(&self, other: &Embedding) -> f32 {
        1.0 - self.similarity(other)
    }

    pub fn norm(&self) -> f32 {
        self.values.iter().map(|v| v * v).sum::<f32>().sqrt()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Return `values` scaled to unit L2 norm (zero vectors are returned unchanged).
pub fn l2_normalize(values: &[f32]) -> Vec<f32> {
    let norm: f32 = values.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        values.iter().map(|x| x / norm).collect()
    } else {
        values.to_vec()
    }
}

/// Raw demographic classifier outputs for one face.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Demographics {
    pub sex: Option<Vec<f32>>,
    pub age: Option<Vec<f32>>,
    #[serde(rename = "eth")]
    pub ethnicity: Option<Vec<f32>>,
}

const ETHNICITY_LABELS: [&str; 5] = ["white", "black", "asian", "indian", "others"];

impl Demographics {
    /// `man` / `woman` from the sex classifier's score (class 1 above 0.5, or argmax).
    pub fn sex_label(&self) -> Option<&'static str> {
        let scores = self.sex.as_deref()?;
        let woman = match scores {
            [p] => *p > 0.5,
            _ => argmax(scores)? == 1,
        };
        Some(if woman { "woman" } else { "man" })
    }

    /// Five-year age bucket, e.g. `"25-30"`, from the regressed `age / 5` value.
    pub fn age_range(&self) -> Option<String> {
        let x = *self.age.as_deref()?.first()?;
        let low = (x * 5.0) as i32;
        Some(format!("{}-{}", low, low + 5))
    }

    pub fn ethnicity_label(&self) -> Option<&'static str> {
        let idx = argmax(self.ethnicity.as_deref()?)?;
        ETHNICITY_LABELS.get(idx).copied()
    }
}

fn argmax(scores: &[f32]) -> Option<usize> {
    scores
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, _)| i)
}

/// Result of matching a probe embedding against the gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub matched: bool,
    /// Cosine distance of the best candidate (2.0 when the gallery is empty).
    pub distance: f32,
    /// ID of the matched identity (if any).
    pub id: Option<u64>,
    /// Name of the matched identity (if any).
    pub name: Option<String>,
}

impl MatchResult {
    pub fn no_match(distance: f32) -> Self {
        Self {
            matched: false,
            distance,
            id: None,
            name: None,
        }
    }
}
