// OpenCV-backed frame source plus the Mat <-> RgbImage conversions the other
// OpenCV collaborators share.

use anyhow::{anyhow, bail, Context, Result};
use desk_watch::pipeline::{Frame, FrameSource};
use image::RgbImage;
use opencv::{
    core::{self, Mat, Scalar},
    imgproc,
    prelude::*,
    videoio::{self, VideoCapture},
};
use std::path::Path;
use std::time::Duration;

pub struct VideoFileSource {
    capture: VideoCapture,
    frame: Mat,
    rgb: Mat,
}

impl VideoFileSource {
    /// Opens a video file. Failure here is a setup error.
    pub fn open(path: &Path) -> Result<Self> {
        let source = path
            .to_str()
            .with_context(|| format!("video path is not valid UTF-8: {}", path.display()))?;
        let capture = VideoCapture::from_file(source, videoio::CAP_ANY)
            .with_context(|| format!("failed to open video file: {source}"))?;
        if !capture.is_opened()? {
            bail!("failed to open video file: {source}");
        }
        Ok(Self {
            capture,
            frame: Mat::default(),
            rgb: Mat::default(),
        })
    }

    pub fn dimensions(&self) -> Result<(u32, u32)> {
        let width = self.capture.get(videoio::CAP_PROP_FRAME_WIDTH)? as u32;
        let height = self.capture.get(videoio::CAP_PROP_FRAME_HEIGHT)? as u32;
        Ok((width, height))
    }
}

impl FrameSource for VideoFileSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if !self.capture.read(&mut self.frame)? || self.frame.empty() {
            return Ok(None);
        }
        let position_ms = self.capture.get(videoio::CAP_PROP_POS_MSEC)?;
        imgproc::cvt_color(&self.frame, &mut self.rgb, imgproc::COLOR_BGR2RGB, 0)?;
        let image = mat_to_rgb(&self.rgb)?;
        let media_time = (position_ms.is_finite() && position_ms >= 0.0)
            .then(|| Duration::from_secs_f64(position_ms / 1000.0));
        Ok(Some(Frame { image, media_time }))
    }
}

/// Copies a continuous 8-bit, 3-channel RGB Mat into an `RgbImage`.
pub fn mat_to_rgb(mat: &Mat) -> Result<RgbImage> {
    if mat.typ() != core::CV_8UC3 {
        bail!("expected an 8-bit 3-channel frame, got Mat type {}", mat.typ());
    }
    let width = mat.cols() as u32;
    let height = mat.rows() as u32;
    let data = if mat.is_continuous() {
        mat.data_bytes()?.to_vec()
    } else {
        mat.try_clone()?.data_bytes()?.to_vec()
    };
    RgbImage::from_raw(width, height, data)
        .ok_or_else(|| anyhow!("frame buffer does not match {width}x{height}"))
}

/// Builds an OpenCV Mat holding `image` converted with `code`
/// (e.g. `COLOR_RGB2BGR` or `COLOR_RGB2GRAY`).
pub fn rgb_to_mat(image: &RgbImage, code: i32) -> Result<Mat> {
    let mut rgb = Mat::new_rows_cols_with_default(
        image.height() as i32,
        image.width() as i32,
        core::CV_8UC3,
        Scalar::all(0.0),
    )?;
    rgb.data_bytes_mut()?.copy_from_slice(image.as_raw());
    let mut converted = Mat::default();
    imgproc::cvt_color(&rgb, &mut converted, code, 0)?;
    Ok(converted)
}
