//! Geometric normalization: two-pass detect → align → redetect → crop.
//!
//! Alignment rotates the frame, so box coordinates from the first pass are
//! stale afterwards. Crops always come from the second pass.

use crate::alignment;
use crate::detector::{DetectorError, FaceDetector};
use crate::types::{FaceCandidate, NormalizedFace, FACE_SIZE};
use image::imageops::{self, FilterType};
use image::RgbImage;
use thiserror::Error;

/// Default minimum detector confidence for a usable face.
pub const DEFAULT_DETECTION_THRESHOLD: f32 = 0.9;

#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("no face detected on the {0} detection pass")]
    NoFaceDetected(DetectionPass),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionPass {
    First,
    Second,
}

impl std::fmt::Display for DetectionPass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DetectionPass::First => f.write_str("first"),
            DetectionPass::Second => f.write_str("second"),
        }
    }
}

/// Padding (horizontal, vertical) applied around a detector box before cropping.
///
/// `diff = floor(112 / |h - w|) * 2`. Taller boxes get `2 * diff` sideways and
/// `diff` vertically, wider boxes the reverse. Square boxes are left as-is.
pub fn crop_padding(face: &FaceCandidate) -> (i64, i64) {
    let width = face.x2 as i64 - face.x1 as i64;
    let height = face.y2 as i64 - face.y1 as i64;
    let gap = (height - width).abs();
    if gap == 0 {
        return (0, 0);
    }
    let diff = (FACE_SIZE as i64 / gap) * 2;
    if height > width {
        (2 * diff, diff)
    } else {
        (diff, 2 * diff)
    }
}

/// Padded crop rectangle `(x, y, width, height)`, clamped to the image.
///
/// Returns `None` when nothing of the box lies inside the image.
pub fn crop_rect(face: &FaceCandidate, image_width: u32, image_height: u32) -> Option<(u32, u32, u32, u32)> {
    let (pad_x, pad_y) = crop_padding(face);
    let clamp_x = |v: i64| v.clamp(0, image_width as i64) as u32;
    let clamp_y = |v: i64| v.clamp(0, image_height as i64) as u32;

    let x1 = clamp_x(face.x1 as i64 - pad_x);
    let y1 = clamp_y(face.y1 as i64 - pad_y);
    let x2 = clamp_x(face.x2 as i64 + pad_x);
    let y2 = clamp_y(face.y2 as i64 + pad_y);

    if x2 <= x1 || y2 <= y1 {
        return None;
    }
    Some((x1, y1, x2 - x1, y2 - y1))
}

/// Padded region for one box, or `None` when it falls entirely outside.
pub fn crop_region(image: &RgbImage, face: &FaceCandidate) -> Option<RgbImage> {
    let (x, y, w, h) = crop_rect(face, image.width(), image.height())?;
    Some(imageops::crop_imm(image, x, y, w, h).to_image())
}

/// Cut padded regions for each box, keeping each region with its box.
/// Boxes that fall entirely outside are skipped.
pub fn crop(image: &RgbImage, faces: Vec<FaceCandidate>) -> Vec<(FaceCandidate, RgbImage)> {
    faces
        .into_iter()
        .filter_map(|face| {
            let region = crop_region(image, &face)?;
            Some((face, region))
        })
        .collect()
}

/// Nearest-neighbor resize to 112×112 followed by value normalization.
pub fn finalize(region: &RgbImage) -> NormalizedFace {
    let resized = imageops::resize(region, FACE_SIZE as u32, FACE_SIZE as u32, FilterType::Nearest);
    NormalizedFace::from_rgb(&resized)
}

/// Output of the two-pass protocol. Holds at least one face; `faces()[i]`
/// was cropped from `candidates()[i]`.
#[derive(Debug, Clone)]
pub struct NormalizedFrame {
    faces: Vec<NormalizedFace>,
    candidates: Vec<FaceCandidate>,
    aligned: RgbImage,
}

impl NormalizedFrame {
    /// Normalized crops, highest detector confidence first.
    pub fn faces(&self) -> &[NormalizedFace] {
        &self.faces
    }

    /// Second-pass candidates that produced a crop, in the aligned frame's coordinates.
    pub fn candidates(&self) -> &[FaceCandidate] {
        &self.candidates
    }

    pub fn aligned(&self) -> &RgbImage {
        &self.aligned
    }

    /// The face a single-face operation acts on.
    pub fn designated(&self) -> &NormalizedFace {
        &self.faces[0]
    }
}

/// Wraps a detector and turns raw frames into normalized face crops.
pub struct Normalizer {
    detector: Box<dyn FaceDetector>,
    min_confidence: f32,
}

impl Normalizer {
    pub fn new(detector: Box<dyn FaceDetector>, min_confidence: f32) -> Self {
        Self {
            detector,
            min_confidence,
        }
    }

    /// Candidates above the confidence threshold, most confident first.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<FaceCandidate>, NormalizeError> {
        let mut faces: Vec<FaceCandidate> = self
            .detector
            .detect(image)?
            .into_iter()
            .filter(|f| f.confidence > self.min_confidence)
            .collect();
        faces.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(faces)
    }

    /// Run the two-pass protocol on one frame.
    pub fn normalize(&mut self, image: &RgbImage) -> Result<NormalizedFrame, NormalizeError> {
        let first = self.detect(image)?;
        let Some(anchor) = first.first() else {
            return Err(NormalizeError::NoFaceDetected(DetectionPass::First));
        };

        let (left_eye, right_eye) = anchor.eyes();
        let aligned = alignment::align_image(image, left_eye, right_eye);
        tracing::debug!(
            faces = first.len(),
            angle = alignment::eye_angle(left_eye, right_eye).to_degrees(),
            "first pass aligned"
        );

        let detected = self.detect(&aligned)?;
        let detected_count = detected.len();
        let (candidates, faces): (Vec<FaceCandidate>, Vec<NormalizedFace>) = crop(&aligned, detected)
            .into_iter()
            .map(|(candidate, region)| (candidate, finalize(&region)))
            .unzip();
        if faces.is_empty() {
            return Err(NormalizeError::NoFaceDetected(DetectionPass::Second));
        }
        tracing::debug!(faces = faces.len(), dropped = detected_count - faces.len(), "second pass cropped");

        Ok(NormalizedFrame {
            faces,
            candidates,
            aligned,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use std::sync::{Arc, Mutex};

    fn face(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32) -> FaceCandidate {
        FaceCandidate {
            x1,
            y1,
            x2,
            y2,
            confidence,
            landmarks: [(x1 + 10.0, y1 + 10.0), (x2 - 10.0, y1 + 20.0), (0.0, 0.0), (0.0, 0.0), (0.0, 0.0)],
        }
    }

    #[test]
    fn test_padding_square_box_is_zero() {
        assert_eq!(crop_padding(&face(0.0, 0.0, 100.0, 100.0, 1.0)), (0, 0));
    }

    #[test]
    fn test_padding_tall_box_pads_horizontally_more() {
        // w = 50, h = 100: diff = floor(112 / 50) * 2 = 4
        let (px, py) = crop_padding(&face(0.0, 0.0, 50.0, 100.0, 1.0));
        assert_eq!((px, py), (8, 4));
        assert!(px > py);
    }

    #[test]
    fn test_padding_wide_box_pads_vertically_more() {
        // w = 100, h = 60: diff = floor(112 / 40) * 2 = 4
        let (px, py) = crop_padding(&face(0.0, 0.0, 100.0, 60.0, 1.0));
        assert_eq!((px, py), (4, 8));
    }

    #[test]
    fn test_padding_large_gap_is_zero() {
        // |h - w| > 112 → floor is zero
        assert_eq!(crop_padding(&face(0.0, 0.0, 10.0, 200.0, 1.0)), (0, 0));
    }

    #[test]
    fn test_crop_rect_clamps_to_image() {
        let r = crop_rect(&face(2.0, 1.0, 52.0, 101.0, 1.0), 60, 90).unwrap();
        // padding (8, 4) pushes past every edge
        assert_eq!(r, (0, 0, 60, 90));
        assert!(crop_rect(&face(200.0, 200.0, 250.0, 260.0, 1.0), 60, 90).is_none());
    }

    #[test]
    fn test_finalize_resizes_irregular_region() {
        let region = RgbImage::from_pixel(37, 90, Rgb([127, 128, 255]));
        let out = finalize(&region);
        assert_eq!(out.data.shape(), &[3, FACE_SIZE, FACE_SIZE]);
        assert!((out.data[[1, 100, 3]] - 0.5 / 128.0).abs() < 1e-6);
    }

    /// Returns fixed candidates and records every frame it is shown.
    struct RecordingDetector {
        passes: Vec<Vec<FaceCandidate>>,
        seen: Arc<Mutex<Vec<RgbImage>>>,
    }

    impl FaceDetector for RecordingDetector {
        fn detect(&mut self, image: &RgbImage) -> Result<Vec<FaceCandidate>, DetectorError> {
            let mut seen = self.seen.lock().unwrap();
            let pass = seen.len().min(self.passes.len() - 1);
            seen.push(image.clone());
            Ok(self.passes[pass].clone())
        }
    }

    fn gradient() -> RgbImage {
        RgbImage::from_fn(160, 160, |x, y| Rgb([x as u8, y as u8, (x + y) as u8]))
    }

    #[test]
    fn test_second_pass_sees_rotated_frame() {
        let mut tilted = face(40.0, 40.0, 80.0, 80.0, 0.99);
        tilted.landmarks[0] = (50.0, 50.0);
        tilted.landmarks[1] = (70.0, 60.0);
        let upright = face(90.0, 90.0, 150.0, 150.0, 0.98);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let detector = RecordingDetector {
            passes: vec![vec![tilted.clone()], vec![upright.clone()]],
            seen: seen.clone(),
        };
        let mut normalizer = Normalizer::new(Box::new(detector), 0.9);

        let image = gradient();
        let frame = normalizer.normalize(&image).unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], image);
        assert_ne!(seen[1], image, "second pass must run on the aligned frame");
        assert_eq!(&seen[1], frame.aligned());

        // the crop is cut from the second-pass box on the aligned frame
        assert_eq!(frame.faces().len(), 1);
        let expected = finalize(&crop_region(frame.aligned(), &upright).unwrap());
        assert_eq!(frame.faces()[0], expected);
        let stale = finalize(&crop_region(frame.aligned(), &tilted).unwrap());
        assert_ne!(frame.faces()[0], stale);

        let (width, height) = frame.aligned().dimensions();
        for c in frame.candidates() {
            assert!(c.x1 >= 0.0 && c.y1 >= 0.0);
            assert!(c.x2 <= width as f32 && c.y2 <= height as f32);
        }
    }

    #[test]
    fn test_out_of_frame_candidate_is_dropped_with_its_crop() {
        let outside = face(300.0, 300.0, 360.0, 360.0, 0.99);
        let inside = face(20.0, 20.0, 90.0, 100.0, 0.95);
        let detector = RecordingDetector {
            passes: vec![vec![inside.clone()], vec![outside, inside.clone()]],
            seen: Arc::new(Mutex::new(Vec::new())),
        };
        let mut normalizer = Normalizer::new(Box::new(detector), 0.9);
        let frame = normalizer.normalize(&gradient()).unwrap();

        assert_eq!(frame.faces().len(), 1);
        assert_eq!(frame.candidates(), &[inside.clone()]);
        let expected = finalize(&crop_region(frame.aligned(), &inside).unwrap());
        assert_eq!(frame.designated(), &expected);
    }

    #[test]
    fn test_low_confidence_is_no_face() {
        let detector = RecordingDetector {
            passes: vec![vec![face(0.0, 0.0, 50.0, 50.0, 0.5)]],
            seen: Arc::new(Mutex::new(Vec::new())),
        };
        let mut normalizer = Normalizer::new(Box::new(detector), 0.9);
        let err = normalizer.normalize(&gradient()).unwrap_err();
        assert!(matches!(err, NormalizeError::NoFaceDetected(DetectionPass::First)));
    }

    #[test]
    fn test_second_pass_empty_is_no_face() {
        let detector = RecordingDetector {
            passes: vec![vec![face(10.0, 10.0, 60.0, 60.0, 0.95)], vec![]],
            seen: Arc::new(Mutex::new(Vec::new())),
        };
        let mut normalizer = Normalizer::new(Box::new(detector), 0.9);
        let err = normalizer.normalize(&gradient()).unwrap_err();
        assert!(matches!(err, NormalizeError::NoFaceDetected(DetectionPass::Second)));
    }

    #[test]
    fn test_faces_ordered_by_confidence() {
        let detector = RecordingDetector {
            passes: vec![vec![face(0.0, 0.0, 40.0, 40.0, 0.92), face(80.0, 80.0, 140.0, 150.0, 0.99)]],
            seen: Arc::new(Mutex::new(Vec::new())),
        };
        let mut normalizer = Normalizer::new(Box::new(detector), 0.9);
        let faces = normalizer.detect(&gradient()).unwrap();
        assert!((faces[0].confidence - 0.99).abs() < 1e-6);
    }
}
