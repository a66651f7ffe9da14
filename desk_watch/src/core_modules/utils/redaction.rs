// Face redaction: every region handed in is replaced by a strongly blurred copy
// of itself. Finding the faces is someone else's job (see `FaceLocator`).

use crate::core_modules::detection::Region;
use image::{imageops, RgbImage};
use imageproc::filter::gaussian_blur_f32;

/// Matches a 99x99 Gaussian kernel with sigma 30.
pub const FACE_BLUR_SIGMA: f32 = 30.0;

/// Blurs each region of `frame` in place. Zero regions is a no-op.
pub fn redact_regions(frame: &mut RgbImage, regions: &[Region]) {
    let (width, height) = frame.dimensions();
    for region in regions {
        let Some(r) = region.clamp_to(width, height) else {
            continue;
        };
        let patch = imageops::crop_imm(frame, r.x, r.y, r.width, r.height).to_image();
        let blurred = gaussian_blur_f32(&patch, FACE_BLUR_SIGMA);
        imageops::replace(frame, &blurred, i64::from(r.x), i64::from(r.y));
    }
}
