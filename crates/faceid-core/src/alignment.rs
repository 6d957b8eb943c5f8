//! In-plane rotation that levels a face's eye line.
//!
//! The whole frame is rotated about the midpoint between the eyes, so the
//! face stays where it was and a second detection pass sees an upright face.
//! The output keeps the source dimensions; pixels mapped from outside the
//! source are filled with black.

use image::{Rgb, RgbImage};

/// Angle (radians) of the line from the left eye to the right eye.
pub fn eye_angle(left: (f32, f32), right: (f32, f32)) -> f32 {
    (right.1 - left.1).atan2(right.0 - left.0)
}

/// Rotation that maps source coordinates to aligned-frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EyeRotation {
    pub center: (f32, f32),
    /// Eye-line angle in the source frame; the frame is rotated by `-angle`.
    pub angle: f32,
}

impl EyeRotation {
    pub fn from_eyes(left: (f32, f32), right: (f32, f32)) -> Self {
        Self {
            center: ((left.0 + right.0) / 2.0, (left.1 + right.1) / 2.0),
            angle: eye_angle(left, right),
        }
    }

    /// Map a source point into the aligned frame.
    pub fn forward(&self, p: (f32, f32)) -> (f32, f32) {
        rotate_about(p, self.center, -self.angle)
    }

    /// Map an aligned-frame point back into the source.
    pub fn inverse(&self, p: (f32, f32)) -> (f32, f32) {
        rotate_about(p, self.center, self.angle)
    }
}

fn rotate_about(p: (f32, f32), c: (f32, f32), theta: f32) -> (f32, f32) {
    let (sin, cos) = theta.sin_cos();
    let (dx, dy) = (p.0 - c.0, p.1 - c.1);
    (c.0 + cos * dx - sin * dy, c.1 + sin * dx + cos * dy)
}

/// Rotate `image` so the given eyes lie on a horizontal line.
pub fn align_image(image: &RgbImage, left_eye: (f32, f32), right_eye: (f32, f32)) -> RgbImage {
    let rotation = EyeRotation::from_eyes(left_eye, right_eye);
    if rotation.angle == 0.0 {
        return image.clone();
    }
    warp_rotation(image, &rotation)
}

/// Backward-mapping warp with bilinear interpolation.
fn warp_rotation(image: &RgbImage, rotation: &EyeRotation) -> RgbImage {
    let (width, height) = image.dimensions();
    let (w, h) = (width as i32, height as i32);

    let sample = |x: i32, y: i32, c: usize| -> f32 {
        if x >= 0 && x < w && y >= 0 && y < h {
            image.get_pixel(x as u32, y as u32)[c] as f32
        } else {
            0.0
        }
    };

    RgbImage::from_fn(width, height, |ox, oy| {
        let (sx, sy) = rotation.inverse((ox as f32, oy as f32));

        let x0 = sx.floor() as i32;
        let y0 = sy.floor() as i32;
        let fx = sx - x0 as f32;
        let fy = sy - y0 as f32;

        let mut px = [0u8; 3];
        for (c, out) in px.iter_mut().enumerate() {
            let val = sample(x0, y0, c) * (1.0 - fx) * (1.0 - fy)
                + sample(x0 + 1, y0, c) * fx * (1.0 - fy)
                + sample(x0, y0 + 1, c) * (1.0 - fx) * fy
                + sample(x0 + 1, y0 + 1, c) * fx * fy;
            *out = val.round().clamp(0.0, 255.0) as u8;
        }
        Rgb(px)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eye_angle() {
        assert!(eye_angle((0.0, 0.0), (10.0, 0.0)).abs() < 1e-6);
        let a = eye_angle((0.0, 0.0), (10.0, 10.0));
        assert!((a - std::f32::consts::FRAC_PI_4).abs() < 1e-6);
    }

    #[test]
    fn test_forward_levels_the_eyes() {
        let left = (40.0, 50.0);
        let right = (80.0, 90.0);
        let rot = EyeRotation::from_eyes(left, right);
        let l = rot.forward(left);
        let r = rot.forward(right);
        assert!((l.1 - r.1).abs() < 1e-3, "eyes not level: {l:?} {r:?}");
        assert!(r.0 > l.0);
        // interocular distance preserved
        let d = (r.0 - l.0).abs();
        assert!((d - (40.0f32 * 2.0f32.sqrt())).abs() < 1e-3);
    }

    #[test]
    fn test_forward_inverse_roundtrip() {
        let rot = EyeRotation::from_eyes((10.0, 20.0), (30.0, 5.0));
        let p = (123.0, 45.0);
        let back = rot.inverse(rot.forward(p));
        assert!((back.0 - p.0).abs() < 1e-3 && (back.1 - p.1).abs() < 1e-3);
    }

    #[test]
    fn test_level_eyes_is_identity() {
        let image = RgbImage::from_fn(64, 48, |x, y| Rgb([x as u8, y as u8, 7]));
        let aligned = align_image(&image, (10.0, 20.0), (40.0, 20.0));
        assert_eq!(aligned, image);
    }

    #[test]
    fn test_align_moves_bright_patch_onto_eye_line() {
        let mut image = RgbImage::new(200, 200);
        let left = (80.0f32, 80.0f32);
        let right = (120.0f32, 120.0f32);
        for (ex, ey) in [left, right] {
            for dy in -2i32..=2 {
                for dx in -2i32..=2 {
                    image.put_pixel((ex as i32 + dx) as u32, (ey as i32 + dy) as u32, Rgb([255, 255, 255]));
                }
            }
        }

        let aligned = align_image(&image, left, right);
        assert_eq!(aligned.dimensions(), (200, 200));

        let rot = EyeRotation::from_eyes(left, right);
        for eye in [left, right] {
            let (x, y) = rot.forward(eye);
            let px = aligned.get_pixel(x.round() as u32, y.round() as u32);
            assert!(px[0] > 100, "eye patch not found at ({x}, {y})");
        }
        // both aligned eyes share a row
        let (_, ly) = rot.forward(left);
        let (_, ry) = rot.forward(right);
        assert_eq!(ly.round(), ry.round());
    }

    #[test]
    fn test_out_of_frame_pixels_are_black() {
        let image = RgbImage::from_pixel(100, 100, Rgb([200, 200, 200]));
        let aligned = align_image(&image, (20.0, 20.0), (80.0, 80.0));
        // a corner rotated by 45° about the centre maps outside the source
        assert_eq!(aligned.get_pixel(0, 0), &Rgb([0, 0, 0]));
        assert_eq!(aligned.get_pixel(50, 50), &Rgb([200, 200, 200]));
    }
}
