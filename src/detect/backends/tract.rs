#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use tract_onnx::prelude::*;

use crate::detect::backend::Detector;
use crate::detect::result::{BoundingBox, DetectedObject};
use crate::frame::Frame;

/// COCO-80 labels in YOLOv8 output order.
const COCO_CLASSES: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat",
    "dog", "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack",
    "umbrella", "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball",
    "kite", "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket",
    "bottle", "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple",
    "sandwich", "orange", "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair",
    "couch", "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse",
    "remote", "keyboard", "cell phone", "microwave", "oven", "toaster", "sink",
    "refrigerator", "book", "clock", "vase", "scissors", "teddy bear", "hair drier",
    "toothbrush",
];

const MAX_DETECTIONS: usize = 100;

/// Tract-based YOLOv8 backend.
///
/// Loads a local ONNX export (`[1, 3, S, S]` input, `[1, 4 + classes, N]`
/// output), resizes each frame to the model input, and decodes boxes back to
/// frame coordinates with IoU non-maximum suppression.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    input_size: u32,
    min_confidence: f32,
    iou_threshold: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let size = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(0, f32::fact([1, 3, size, size]).into())
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_size,
            min_confidence: 0.25,
            iou_threshold: 0.45,
        })
    }

    pub fn with_iou_threshold(mut self, iou_threshold: f32) -> Self {
        self.iou_threshold = iou_threshold;
        self
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        let image = frame.to_rgb_image()?;
        let resized = imageops::resize(&image, self.input_size, self.input_size, FilterType::Triangle);
        let size = self.input_size as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
            resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        });
        Ok(input.into_tensor())
    }

    fn decode(&self, outputs: TVec<TValue>, frame: &Frame) -> Result<Vec<DetectedObject>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape().to_vec();
        if shape.len() != 3 || shape[1] <= 4 {
            return Err(anyhow!("unexpected YOLOv8 output shape {:?}", shape));
        }
        let num_classes = shape[1] - 4;
        let num_predictions = shape[2];

        let scale_x = frame.width as f32 / self.input_size as f32;
        let scale_y = frame.height as f32 / self.input_size as f32;
        let max_x = frame.width as f32;
        let max_y = frame.height as f32;

        let mut candidates = Vec::new();
        for i in 0..num_predictions {
            let mut best_score = 0.0f32;
            let mut best_class = 0usize;
            for class_idx in 0..num_classes {
                let score = view[[0, 4 + class_idx, i]];
                if score > best_score {
                    best_score = score;
                    best_class = class_idx;
                }
            }
            if best_score < self.min_confidence {
                continue;
            }

            let cx = view[[0, 0, i]];
            let cy = view[[0, 1, i]];
            let w = view[[0, 2, i]];
            let h = view[[0, 3, i]];
            let x1 = ((cx - w / 2.0) * scale_x).clamp(0.0, max_x);
            let y1 = ((cy - h / 2.0) * scale_y).clamp(0.0, max_y);
            let x2 = ((cx + w / 2.0) * scale_x).clamp(0.0, max_x);
            let y2 = ((cy + h / 2.0) * scale_y).clamp(0.0, max_y);
            candidates.push(([x1, y1, x2, y2], best_score.min(1.0), best_class));
        }

        let kept = nms(candidates, self.iou_threshold);
        let mut detections = Vec::with_capacity(kept.len());
        for ([x1, y1, x2, y2], confidence, class_idx) in kept.into_iter().take(MAX_DETECTIONS) {
            let Ok(bbox) = BoundingBox::new(x1 as i32, y1 as i32, x2 as i32, y2 as i32) else {
                continue;
            };
            let class = COCO_CLASSES
                .get(class_idx)
                .map(|c| c.to_string())
                .unwrap_or_else(|| format!("class_{}", class_idx));
            detections.push(DetectedObject::new(class, confidence, bbox));
        }
        Ok(detections)
    }
}

type Candidate = ([f32; 4], f32, usize);

/// Greedy per-class non-maximum suppression, highest score first.
fn nms(mut boxes: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    boxes.sort_by(|a, b| b.1.total_cmp(&a.1));
    let mut keep: Vec<Candidate> = Vec::new();
    for candidate in boxes {
        let suppressed = keep
            .iter()
            .any(|k| k.2 == candidate.2 && iou(&k.0, &candidate.0) >= iou_threshold);
        if !suppressed {
            keep.push(candidate);
        }
    }
    keep
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = a[2].min(b[2]);
    let y2 = a[3].min(b[3]);
    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let area_a = (a[2] - a[0]) * (a[3] - a[1]);
    let area_b = (b[2] - b[0]) * (b[3] - b[1]);
    let union = area_a + area_b - intersection;
    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

impl Detector for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&self, frame: &Frame) -> Result<Vec<DetectedObject>> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs, frame)
    }

    fn warm_up(&self) -> Result<()> {
        let frame = Frame::filled(self.input_size, self.input_size, [114, 114, 114])?;
        self.detect(&frame).map(|_| ())
    }
}
