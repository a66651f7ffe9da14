// Haar-cascade face finder used to redact snapshots before they are saved.

use crate::video::rgb_to_mat;
use anyhow::{bail, Context, Result};
use desk_watch::{FaceLocator, Region};
use image::RgbImage;
use opencv::{
    core::{self, Rect, Size},
    imgproc, objdetect,
    prelude::*,
};
use std::path::Path;

const SCALE_FACTOR: f64 = 1.3;
const MIN_NEIGHBORS: i32 = 5;

pub struct CascadeFaceLocator {
    cascade: objdetect::CascadeClassifier,
    faces: core::Vector<Rect>,
}

impl CascadeFaceLocator {
    /// Loads the cascade. Failure here is fatal to the run.
    pub fn load(path: &Path) -> Result<Self> {
        let file = path
            .to_str()
            .with_context(|| format!("cascade path is not valid UTF-8: {}", path.display()))?;
        let cascade = objdetect::CascadeClassifier::new(file)
            .with_context(|| format!("failed to load face cascade {file}"))?;
        if cascade.empty()? {
            bail!("face cascade {file} could not be loaded");
        }
        Ok(Self {
            cascade,
            faces: core::Vector::new(),
        })
    }
}

impl FaceLocator for CascadeFaceLocator {
    fn locate(&mut self, frame: &RgbImage) -> Result<Vec<Region>> {
        let gray = rgb_to_mat(frame, imgproc::COLOR_RGB2GRAY)?;
        self.faces.clear();
        self.cascade.detect_multi_scale(
            &gray,
            &mut self.faces,
            SCALE_FACTOR,
            MIN_NEIGHBORS,
            0,
            Size::default(),
            Size::default(),
        )?;
        Ok(self
            .faces
            .iter()
            .filter(|r| r.width > 0 && r.height > 0)
            .map(|r| Region::new(r.x.max(0) as u32, r.y.max(0) as u32, r.width as u32, r.height as u32))
            .collect())
    }
}
