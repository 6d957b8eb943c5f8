//! Diagnostic 2-D view of the gallery: PCA of all embeddings, drawn as a
//! scatter plot with one color per identity.
//!
//! Never fails the caller. Every problem becomes [`ProjectionOutcome::Failed`].

use image::{Rgb, RgbImage};
use ndarray::{Array1, Array2, Axis};
use std::path::{Path, PathBuf};

const CANVAS_SIZE: u32 = 800;
const MARGIN: f32 = 40.0;
const MARKER_RADIUS: i32 = 5;
const POWER_ITERATIONS: usize = 200;

const PALETTE: [[u8; 3]; 10] = [
    [31, 119, 180],
    [255, 127, 14],
    [44, 160, 44],
    [214, 39, 40],
    [148, 103, 189],
    [140, 86, 75],
    [227, 119, 194],
    [127, 127, 127],
    [188, 189, 34],
    [23, 190, 207],
];

#[derive(Debug, Clone, PartialEq)]
pub enum ProjectionOutcome {
    Rendered {
        path: PathBuf,
        /// Projected coordinates per identity id.
        points: Vec<(u64, [f32; 2])>,
    },
    Failed {
        reason: String,
    },
}

impl ProjectionOutcome {
    pub fn is_rendered(&self) -> bool {
        matches!(self, ProjectionOutcome::Rendered { .. })
    }
}

/// Project `(id, embedding)` pairs to two dimensions and save a scatter plot.
pub fn render(embeddings: &[(u64, Vec<f32>)], output: &Path) -> ProjectionOutcome {
    let outcome = match project(embeddings) {
        Ok(points) => match draw(&points).save(output) {
            Ok(()) => ProjectionOutcome::Rendered {
                path: output.to_path_buf(),
                points,
            },
            Err(e) => ProjectionOutcome::Failed {
                reason: format!("saving {}: {e}", output.display()),
            },
        },
        Err(reason) => ProjectionOutcome::Failed { reason },
    };

    match &outcome {
        ProjectionOutcome::Rendered { path, points } => {
            tracing::info!(path = %path.display(), identities = points.len(), "gallery projection rendered")
        }
        ProjectionOutcome::Failed { reason } => tracing::warn!(%reason, "gallery projection failed"),
    }
    outcome
}

/// Principal-component projection onto the top two axes.
pub fn project(embeddings: &[(u64, Vec<f32>)]) -> Result<Vec<(u64, [f32; 2])>, String> {
    let n = embeddings.len();
    if n < 2 {
        return Err(format!("need at least two identities, gallery has {n}"));
    }
    let dim = embeddings[0].1.len();
    if dim == 0 || embeddings.iter().any(|(_, e)| e.len() != dim) {
        return Err("embeddings have inconsistent dimensions".into());
    }

    let flat: Vec<f32> = embeddings.iter().flat_map(|(_, e)| e.iter().copied()).collect();
    let data = Array2::from_shape_vec((n, dim), flat).map_err(|e| e.to_string())?;
    let mean = data.mean_axis(Axis(0)).ok_or("empty gallery")?;
    let centered = &data - &mean;
    let covariance = centered.t().dot(&centered) / (n - 1) as f32;

    let first = principal_axis(&covariance, None).ok_or("embeddings have no variance")?;
    // Second axis may be degenerate (e.g. two identities); project it as zero.
    let second = principal_axis(&covariance, Some(&first)).unwrap_or_else(|| Array1::zeros(dim));

    Ok(embeddings
        .iter()
        .zip(centered.outer_iter())
        .map(|((id, _), row)| (*id, [row.dot(&first), row.dot(&second)]))
        .collect())
}

/// Dominant eigenvector via power iteration, optionally orthogonal to `exclude`.
fn principal_axis(covariance: &Array2<f32>, exclude: Option<&Array1<f32>>) -> Option<Array1<f32>> {
    let dim = covariance.nrows();
    let mut v = Array1::from_shape_fn(dim, |i| 1.0 + (i % 7) as f32 * 0.1);

    let deflate = |v: &mut Array1<f32>| {
        if let Some(e) = exclude {
            let overlap = v.dot(e);
            v.scaled_add(-overlap, e);
        }
    };

    for _ in 0..POWER_ITERATIONS {
        deflate(&mut v);
        let next = covariance.dot(&v);
        let norm = next.dot(&next).sqrt();
        if !norm.is_finite() || norm < 1e-9 {
            return None;
        }
        v = next / norm;
    }
    deflate(&mut v);
    let norm = v.dot(&v).sqrt();
    (norm > 1e-6).then(|| v / norm)
}

fn draw(points: &[(u64, [f32; 2])]) -> RgbImage {
    let mut canvas = RgbImage::from_pixel(CANVAS_SIZE, CANVAS_SIZE, Rgb([255, 255, 255]));

    let (mut min, mut max) = ([f32::MAX; 2], [f32::MIN; 2]);
    for (_, p) in points {
        for k in 0..2 {
            min[k] = min[k].min(p[k]);
            max[k] = max[k].max(p[k]);
        }
    }
    let span = CANVAS_SIZE as f32 - 2.0 * MARGIN;
    let to_pixel = |v: f32, k: usize| {
        let range = max[k] - min[k];
        let t = if range > 0.0 { (v - min[k]) / range } else { 0.5 };
        MARGIN + t * span
    };

    for (id, p) in points {
        let color = Rgb(PALETTE[(*id as usize) % PALETTE.len()]);
        let cx = to_pixel(p[0], 0) as i32;
        // image rows grow downward
        let cy = CANVAS_SIZE as i32 - to_pixel(p[1], 1) as i32;
        for dy in -MARKER_RADIUS..=MARKER_RADIUS {
            for dx in -MARKER_RADIUS..=MARKER_RADIUS {
                let (x, y) = (cx + dx, cy + dy);
                if x >= 0 && y >= 0 && (x as u32) < CANVAS_SIZE && (y as u32) < CANVAS_SIZE {
                    canvas.put_pixel(x as u32, y as u32, color);
                }
            }
        }
    }
    canvas
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_project_separates_along_main_axis() {
        let embeddings = vec![
            (1, vec![10.0, 0.0, 0.1]),
            (2, vec![-10.0, 0.0, -0.1]),
            (3, vec![0.0, 1.0, 0.0]),
        ];
        let points = project(&embeddings).unwrap();
        assert_eq!(points.len(), 3);
        // ids 1 and 2 sit on opposite ends of the first component
        assert!(points[0].1[0] * points[1].1[0] < 0.0);
        assert!((points[0].1[0].abs() - points[1].1[0].abs()).abs() < 1e-2);
    }

    #[test]
    fn test_project_needs_two_identities() {
        assert!(project(&[(1, vec![1.0, 2.0])]).is_err());
        assert!(project(&[]).is_err());
    }

    #[test]
    fn test_project_without_variance_fails() {
        let same = vec![(1, vec![1.0, 1.0]), (2, vec![1.0, 1.0])];
        assert!(project(&same).is_err());
    }

    #[test]
    fn test_render_writes_image() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("2d_space.jpg");
        let embeddings = vec![(1, vec![1.0, 0.0, 0.0]), (2, vec![0.0, 1.0, 0.0]), (3, vec![0.0, 0.0, 1.0])];
        let outcome = render(&embeddings, &out);
        assert!(outcome.is_rendered(), "{outcome:?}");
        assert!(out.exists());
    }

    #[test]
    fn test_render_failure_is_a_status() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("missing-dir").join("2d_space.jpg");
        let embeddings = vec![(1, vec![1.0, 0.0]), (2, vec![0.0, 1.0])];
        assert!(matches!(render(&embeddings, &out), ProjectionOutcome::Failed { .. }));
        assert!(matches!(render(&[], &out), ProjectionOutcome::Failed { .. }));
    }
}
