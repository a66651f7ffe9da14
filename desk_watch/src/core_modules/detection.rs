// THEORY:
// The `detection` module defines the boundary between this crate and the external
// object detector. A `Detection` is one labeled box for one frame; it is produced
// fresh per frame and never retained past the frame that produced it.
//
// The detector itself is a collaborator behind the `ObjectDetector` trait. The
// crate never assumes a particular model, only that it reports a label and a
// confidence for every box. Label strings are compared verbatim downstream, so
// whatever vocabulary the detector uses is the vocabulary the classifier sees.

use image::RgbImage;

/// An axis-aligned box in pixel coordinates, `(x1, y1)` top-left and `(x2, y2)`
/// bottom-right.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    /// Converts to an integer pixel rectangle clipped to an image of the given
    /// size. Returns `None` when nothing of the box lies inside the image.
    pub fn to_region(&self, image_width: u32, image_height: u32) -> Option<Region> {
        let x1 = self.x1.max(0.0).floor() as u32;
        let y1 = self.y1.max(0.0).floor() as u32;
        let x2 = self.x2.max(0.0).ceil() as u32;
        let y2 = self.y2.max(0.0).ceil() as u32;
        Region::new(x1, y1, x2.saturating_sub(x1), y2.saturating_sub(y1))
            .clamp_to(image_width, image_height)
    }
}

/// One labeled bounding box returned by the external detector for a single frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// The class name as reported by the detector, e.g. `"person"` or `"cell phone"`.
    pub label: String,
    /// Confidence in `[0, 1]`.
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            label: label.into(),
            confidence: confidence.clamp(0.0, 1.0),
            bbox,
        }
    }
}

/// An integer pixel rectangle given as origin plus size. Used for face regions
/// and for the (inert) region of interest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Clips the region to an image of the given size.
    pub fn clamp_to(&self, image_width: u32, image_height: u32) -> Option<Region> {
        if self.x >= image_width || self.y >= image_height {
            return None;
        }
        let width = self.width.min(image_width - self.x);
        let height = self.height.min(image_height - self.y);
        let clipped = Region::new(self.x, self.y, width, height);
        (!clipped.is_empty()).then_some(clipped)
    }
}

/// The external object detector.
///
/// A failure while constructing an implementation is fatal to the run; a failure
/// returned from `detect` only costs that one frame.
pub trait ObjectDetector {
    fn detect(&mut self, frame: &RgbImage) -> anyhow::Result<Vec<Detection>>;
}
