// YOLOv8 object detector running an ONNX export through OpenCV DNN.
//
// Output layout of the export: one `[1, 4 + classes, anchors]` tensor, rows are
// `cx, cy, w, h` in network-input pixels followed by one score per class.

use crate::video::rgb_to_mat;
use anyhow::{bail, Context, Result};
use desk_watch::{BoundingBox, Detection, ObjectDetector};
use image::RgbImage;
use opencv::{
    core::{self, Mat, Scalar, Size},
    dnn, imgproc,
    prelude::*,
};
use std::cmp::Ordering;
use std::path::Path;

const INPUT_SIZE: i32 = 640;
const MAX_DETECTIONS: usize = 300;

pub const COCO_CLASSES: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich",
    "orange", "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch",
    "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote",
    "keyboard", "cell phone", "microwave", "oven", "toaster", "sink", "refrigerator", "book",
    "clock", "vase", "scissors", "teddy bear", "hair drier", "toothbrush",
];

/// A decoded, not yet suppressed candidate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub class_id: usize,
    pub score: f32,
    pub bbox: BoundingBox,
}

pub struct YoloDetector {
    net: dnn::Net,
    class_names: Vec<String>,
    min_confidence: f32,
    nms_iou: f32,
}

impl YoloDetector {
    /// Loads the model and runs one blank frame through it, so a missing file or
    /// an export with the wrong head fails here rather than on every frame.
    pub fn load(model: &Path, min_confidence: f32, nms_iou: f32) -> Result<Self> {
        let path = model
            .to_str()
            .with_context(|| format!("model path is not valid UTF-8: {}", model.display()))?;
        let net = dnn::read_net_from_onnx(path)
            .with_context(|| format!("failed to load detection model {path}"))?;
        if net.empty()? {
            bail!("detection model {path} is empty");
        }
        let mut detector = Self {
            net,
            class_names: COCO_CLASSES.iter().map(|s| s.to_string()).collect(),
            min_confidence,
            nms_iou,
        };
        let blank = RgbImage::new(INPUT_SIZE as u32, INPUT_SIZE as u32);
        detector
            .detect(&blank)
            .with_context(|| format!("detection model {path} does not produce a YOLOv8 COCO head"))?;
        Ok(detector)
    }
}

impl ObjectDetector for YoloDetector {
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<Detection>> {
        let bgr = rgb_to_mat(frame, imgproc::COLOR_RGB2BGR)?;
        let blob = dnn::blob_from_image(
            &bgr,
            1.0 / 255.0,
            Size::new(INPUT_SIZE, INPUT_SIZE),
            Scalar::default(),
            true,
            false,
            core::CV_32F,
        )?;
        self.net.set_input(&blob, "", 1.0, Scalar::default())?;

        let mut outputs = core::Vector::<Mat>::new();
        let names = self.net.get_unconnected_out_layers_names()?;
        self.net.forward(&mut outputs, &names)?;
        let output = outputs.get(0)?;
        let shape = output.mat_size().to_vec();
        let anchors = output_anchors(&shape, self.class_names.len())?;
        let raw = output.data_typed::<f32>()?;

        let scale_x = frame.width() as f32 / INPUT_SIZE as f32;
        let scale_y = frame.height() as f32 / INPUT_SIZE as f32;
        let candidates = decode_output(
            raw,
            self.class_names.len(),
            anchors,
            (scale_x, scale_y),
            self.min_confidence,
        )?;
        let kept = suppress(candidates, self.nms_iou, MAX_DETECTIONS);

        Ok(kept
            .into_iter()
            .map(|c| Detection::new(self.class_names[c.class_id].clone(), c.score, c.bbox))
            .collect())
    }
}

/// Number of anchors in an output tensor shaped `[1, 4 + num_classes, anchors]`.
pub fn output_anchors(shape: &[i32], num_classes: usize) -> Result<usize> {
    match shape {
        [1, rows, anchors] if *rows as usize == 4 + num_classes && *anchors > 0 => {
            Ok(*anchors as usize)
        }
        _ => bail!(
            "unexpected model output shape {shape:?}, expected [1, {}, N]",
            4 + num_classes
        ),
    }
}

/// Decodes the transposed YOLOv8 head into frame-space candidates at or above
/// `min_confidence`.
pub fn decode_output(
    raw: &[f32],
    num_classes: usize,
    anchors: usize,
    (scale_x, scale_y): (f32, f32),
    min_confidence: f32,
) -> Result<Vec<Candidate>> {
    let rows = 4 + num_classes;
    if anchors == 0 || raw.len() != rows * anchors {
        bail!(
            "model output holds {} values, expected {rows} x {anchors}",
            raw.len()
        );
    }
    let at = |row: usize, anchor: usize| raw[row * anchors + anchor];

    let mut out = Vec::new();
    for anchor in 0..anchors {
        let mut best_class = 0usize;
        let mut best_score = f32::MIN;
        for class_id in 0..num_classes {
            let score = at(4 + class_id, anchor);
            if score > best_score {
                best_score = score;
                best_class = class_id;
            }
        }
        if best_score < min_confidence {
            continue;
        }
        let (cx, cy, w, h) = (at(0, anchor), at(1, anchor), at(2, anchor), at(3, anchor));
        out.push(Candidate {
            class_id: best_class,
            score: best_score,
            bbox: BoundingBox::new(
                (cx - w / 2.0) * scale_x,
                (cy - h / 2.0) * scale_y,
                (cx + w / 2.0) * scale_x,
                (cy + h / 2.0) * scale_y,
            ),
        });
    }
    Ok(out)
}

/// Class-agnostic greedy non-maximum suppression.
pub fn suppress(mut candidates: Vec<Candidate>, iou_threshold: f32, max_detections: usize) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    let mut kept: Vec<Candidate> = Vec::new();
    'outer: for candidate in candidates {
        for k in &kept {
            if iou(&candidate.bbox, &k.bbox) >= iou_threshold {
                continue 'outer;
            }
        }
        kept.push(candidate);
        if kept.len() >= max_detections {
            break;
        }
    }
    kept
}

fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let ix = (a.x2.min(b.x2) - a.x1.max(b.x1)).max(0.0);
    let iy = (a.y2.min(b.y2) - a.y1.max(b.y1)).max(0.0);
    let inter = ix * iy;
    let union = a.width() * a.height() + b.width() * b.height() - inter;
    if union <= 0.0 { 0.0 } else { inter / union }
}
