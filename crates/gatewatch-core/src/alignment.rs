//! Face alignment to a canonical 112×112 crop.
//!
//! With trusted eye landmarks the eye line fixes scale and rotation, so
//! alignment is a rigid transform about the eye midpoint rather than a
//! full least-squares landmark fit.

use crate::landmarks::FivePoints;
use image::GrayImage;

/// Side length of the aligned output crop.
pub const ALIGNED_SIZE: usize = 112;

// Canonical eye geometry of the 112×112 reference layout.
const REF_EYE_CENTER: (f32, f32) = (55.9132, 51.5989);
const REF_INTER_EYE: f32 = 35.2372;

/// Warp a face into the canonical 112×112 grayscale crop.
///
/// Scale and rotation come from the detected eye line; the eye midpoint
/// is mapped onto the reference eye midpoint. Out-of-frame samples are
/// filled black.
pub fn align_face(frame: &GrayImage, points: &FivePoints) -> Vec<u8> {
    let (lx, ly) = points[0];
    let (rx, ry) = points[1];

    let dx = rx - lx;
    let dy = ry - ly;
    let inter_eye = dx.hypot(dy);

    // Degenerate landmarks (coincident eyes): sample around the midpoint
    // unrotated rather than dividing by zero.
    let (cos_a, sin_a, scale) = if inter_eye > f32::EPSILON {
        (dx / inter_eye, dy / inter_eye, REF_INTER_EYE / inter_eye)
    } else {
        (1.0, 0.0, 1.0)
    };

    let mid_x = (lx + rx) / 2.0;
    let mid_y = (ly + ry) / 2.0;
    let inv_scale = 1.0 / scale;

    let mut output = vec![0u8; ALIGNED_SIZE * ALIGNED_SIZE];

    for oy in 0..ALIGNED_SIZE {
        for ox in 0..ALIGNED_SIZE {
            // Offset from the reference eye midpoint, rotated back into
            // frame orientation and rescaled to frame units.
            let rel_x = (ox as f32 - REF_EYE_CENTER.0) * inv_scale;
            let rel_y = (oy as f32 - REF_EYE_CENTER.1) * inv_scale;

            let src_x = mid_x + rel_x * cos_a - rel_y * sin_a;
            let src_y = mid_y + rel_x * sin_a + rel_y * cos_a;

            output[oy * ALIGNED_SIZE + ox] = sample_bilinear(frame, src_x, src_y);
        }
    }

    output
}

fn sample_bilinear(frame: &GrayImage, x: f32, y: f32) -> u8 {
    let w = frame.width() as i64;
    let h = frame.height() as i64;

    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let at = |px: i64, py: i64| -> f32 {
        if px >= 0 && px < w && py >= 0 && py < h {
            frame.get_pixel(px as u32, py as u32).0[0] as f32
        } else {
            0.0
        }
    };

    let val = at(x0, y0) * (1.0 - fx) * (1.0 - fy)
        + at(x0 + 1, y0) * fx * (1.0 - fy)
        + at(x0, y0 + 1) * (1.0 - fx) * fy
        + at(x0 + 1, y0 + 1) * fx * fy;

    val.round().clamp(0.0, 255.0) as u8
}
