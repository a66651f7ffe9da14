use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder, RgbImage};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

const JPEG_QUALITY: u8 = 90;

/// `{label}_{timestamp}.jpg` under `dir`. Two events with the same label in the
/// same second share a path; the later snapshot overwrites the earlier one.
pub fn snapshot_path(dir: &Path, label: &str, timestamp: &str) -> PathBuf {
    dir.join(format!("{label}_{timestamp}.jpg"))
}

pub fn save_jpeg(path: &Path, image: &RgbImage) -> Result<(), image::ImageError> {
    let output = BufWriter::new(File::create(path)?);
    let encoder = JpegEncoder::new_with_quality(output, JPEG_QUALITY);
    encoder.write_image(
        image.as_raw(),
        image.width(),
        image.height(),
        ExtendedColorType::Rgb8,
    )?;
    Ok(())
}
