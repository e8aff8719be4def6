/// Face location + ArcFace identity embedding using ONNX Runtime via `ort`.
///
/// A YOLO face model finds faces (letterbox preprocessing, confidence
/// filter, greedy NMS); each surviving box is cropped from the original
/// frame and run through an ArcFace model to get an L2-normalized vector.
use std::path::Path;

use crate::detection::domain::face_encoder::{Embedding, FaceEncoder, FaceObservation};
use crate::shared::frame::Frame;
use crate::shared::region::Region;

/// Fallback YOLO input resolution when the model doesn't specify dimensions.
const DEFAULT_INPUT_SIZE: u32 = 640;

pub const DEFAULT_CONFIDENCE: f64 = 0.4;

const NMS_IOU_THRESH: f64 = 0.45;

const EMBED_INPUT_SIZE: usize = 112;
const EMBED_NORM_MEAN: f32 = 127.5;
const EMBED_NORM_STD: f32 = 127.5;

/// Faces smaller than this (either side, in pixels) are not embedded.
const MIN_FACE_SIDE: i32 = 8;

pub struct OnnxFaceEncoder {
    detector: ort::session::Session,
    embedder: ort::session::Session,
    confidence: f64,
    input_size: u32,
}

impl OnnxFaceEncoder {
    pub fn new(
        detector_model: &Path,
        embedding_model: &Path,
        confidence: f64,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let detector = ort::session::Session::builder()?
            .with_execution_providers(preferred_execution_providers())?
            .commit_from_file(detector_model)?;

        let intra_threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let embedder = ort::session::Session::builder()?
            .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)?
            .with_inter_threads(1)?
            .with_intra_threads(intra_threads)?
            .with_execution_providers(preferred_execution_providers())?
            .commit_from_file(embedding_model)?;

        // NCHW: [1, 3, H, W]
        let input_size = detector
            .inputs()
            .first()
            .and_then(|input| match input.dtype() {
                ort::value::ValueType::Tensor { shape, .. } if shape.len() >= 4 && shape[2] > 0 => {
                    Some(shape[2] as u32)
                }
                _ => None,
            })
            .unwrap_or(DEFAULT_INPUT_SIZE);

        Ok(Self {
            detector,
            embedder,
            confidence,
            input_size,
        })
    }

    fn locate(&mut self, frame: &Frame) -> Result<Vec<Region>, Box<dyn std::error::Error>> {
        let (input_tensor, scale, pad_x, pad_y) = letterbox(frame, self.input_size);

        let input_value = ort::value::Tensor::from_array(input_tensor)?;
        let outputs = self.detector.run(ort::inputs![input_value])?;
        if outputs.len() == 0 {
            return Err("YOLO model produced no outputs".into());
        }
        let tensor = outputs[0].try_extract_array::<f32>()?;
        let shape = tensor.shape().to_vec();
        if shape.len() != 3 {
            return Err(format!("Unexpected YOLO output shape: {shape:?}").into());
        }
        // [1, features, detections] or [1, detections, features]
        let transposed = shape[1] < shape[2];
        let (num_dets, num_feats) = if transposed {
            (shape[2], shape[1])
        } else {
            (shape[1], shape[2])
        };
        if num_feats < 5 {
            return Ok(Vec::new());
        }
        let data = tensor.as_slice().ok_or("Cannot get tensor slice")?;
        let value = |det: usize, feat: usize| {
            if transposed {
                data[feat * num_dets + det]
            } else {
                data[det * num_feats + feat]
            }
        };

        let mut raw = Vec::new();
        for i in 0..num_dets {
            let conf = value(i, 4) as f64;
            if conf < self.confidence {
                continue;
            }
            let (cx, cy) = (value(i, 0) as f64, value(i, 1) as f64);
            let (w, h) = (value(i, 2) as f64, value(i, 3) as f64);
            raw.push(RawDetection {
                bbox: [
                    (cx - w / 2.0 - pad_x as f64) / scale,
                    (cy - h / 2.0 - pad_y as f64) / scale,
                    (cx + w / 2.0 - pad_x as f64) / scale,
                    (cy + h / 2.0 - pad_y as f64) / scale,
                ],
                confidence: conf,
            });
        }

        Ok(nms(&mut raw, NMS_IOU_THRESH)
            .into_iter()
            .filter_map(|d| {
                Region::from_corners(d.bbox[0], d.bbox[1], d.bbox[2], d.bbox[3])
                    .clamped(frame.width(), frame.height())
            })
            .collect())
    }

    fn embed(&mut self, face: &Frame) -> Result<Embedding, Box<dyn std::error::Error>> {
        let tensor = preprocess_face(face);
        let input_value = ort::value::Tensor::from_array(tensor)?;
        let outputs = self.embedder.run(ort::inputs![input_value])?;
        let embedding_array = outputs[0].try_extract_array::<f32>()?;
        let mut embedding = embedding_array
            .as_slice()
            .ok_or("Cannot get embedding slice")?
            .to_vec();
        l2_normalize(&mut embedding);
        Ok(embedding)
    }
}

impl FaceEncoder for OnnxFaceEncoder {
    fn encode(&mut self, frame: &Frame) -> Result<Vec<FaceObservation>, Box<dyn std::error::Error>> {
        if frame.channels() != 3 || frame.width() == 0 || frame.height() == 0 {
            return Err(format!(
                "Face encoding needs a non-empty RGB frame, got {}x{}x{}",
                frame.width(),
                frame.height(),
                frame.channels()
            )
            .into());
        }

        let mut observations = Vec::new();
        for region in self.locate(frame)? {
            if region.width < MIN_FACE_SIDE || region.height < MIN_FACE_SIDE {
                continue;
            }
            let Some(face) = frame.crop(&region) else {
                continue;
            };
            let embedding = self.embed(&face)?;
            observations.push(FaceObservation { region, embedding });
        }
        Ok(observations)
    }
}

fn preferred_execution_providers() -> Vec<ort::execution_providers::ExecutionProviderDispatch> {
    #[cfg(target_os = "macos")]
    {
        vec![ort::execution_providers::CoreMLExecutionProvider::default().build()]
    }
    #[cfg(target_os = "windows")]
    {
        vec![ort::execution_providers::DirectMLExecutionProvider::default().build()]
    }
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        vec![]
    }
}

/// Letterbox-resize a frame to `target_size` × `target_size`.
///
/// Returns `(NCHW float32 tensor, scale, pad_x, pad_y)`.
fn letterbox(frame: &Frame, target_size: u32) -> (ndarray::Array4<f32>, f64, u32, u32) {
    let fw = frame.width() as f64;
    let fh = frame.height() as f64;
    let target = target_size as f64;

    let scale = (target / fw).min(target / fh);
    let new_w = ((fw * scale).round() as u32).min(target_size);
    let new_h = ((fh * scale).round() as u32).min(target_size);
    let pad_x = (target_size - new_w) / 2;
    let pad_y = (target_size - new_h) / 2;

    // YOLO pads with 114 gray
    let gray = 114.0f32 / 255.0;
    let mut tensor =
        ndarray::Array4::<f32>::from_elem((1, 3, target_size as usize, target_size as usize), gray);

    let src = frame.as_ndarray();
    let src_h = frame.height() as usize;
    let src_w = frame.width() as usize;

    for y in 0..new_h as usize {
        let src_y = ((y as f64 / scale) as usize).min(src_h - 1);
        for x in 0..new_w as usize {
            let src_x = ((x as f64 / scale) as usize).min(src_w - 1);
            let ty = pad_y as usize + y;
            let tx = pad_x as usize + x;
            for c in 0..3 {
                tensor[[0, c, ty, tx]] = src[[src_y, src_x, c]] as f32 / 255.0;
            }
        }
    }

    (tensor, scale, pad_x, pad_y)
}

/// Resize a face crop to 112x112, normalize to [-1, 1], NCHW layout.
fn preprocess_face(face: &Frame) -> ndarray::Array4<f32> {
    let src = face.as_ndarray();
    let src_w = face.width() as usize;
    let src_h = face.height() as usize;
    let n = EMBED_INPUT_SIZE;

    let mut tensor = ndarray::Array4::<f32>::zeros((1, 3, n, n));
    for y in 0..n {
        let src_y = (((y as f64 + 0.5) * src_h as f64 / n as f64) as usize).min(src_h - 1);
        for x in 0..n {
            let src_x = (((x as f64 + 0.5) * src_w as f64 / n as f64) as usize).min(src_w - 1);
            for c in 0..3 {
                tensor[[0, c, y, x]] =
                    (src[[src_y, src_x, c]] as f32 - EMBED_NORM_MEAN) / EMBED_NORM_STD;
            }
        }
    }
    tensor
}

pub fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

#[derive(Clone, Debug)]
struct RawDetection {
    bbox: [f64; 4],
    confidence: f64,
}

/// Greedy NMS: sort by confidence descending, suppress overlapping boxes.
fn nms(dets: &mut [RawDetection], iou_thresh: f64) -> Vec<RawDetection> {
    dets.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<RawDetection> = Vec::new();
    for det in dets.iter() {
        if keep.iter().all(|k| bbox_iou(&k.bbox, &det.bbox) <= iou_thresh) {
            keep.push(det.clone());
        }
    }
    keep
}

fn bbox_iou(a: &[f64; 4], b: &[f64; 4]) -> f64 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = a[2].min(b[2]);
    let y2 = a[3].min(b[3]);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    if inter == 0.0 {
        return 0.0;
    }
    let area_a = (a[2] - a[0]) * (a[3] - a[1]);
    let area_b = (b[2] - b[0]) * (b[3] - b[1]);
    inter / (area_a + area_b - inter)
}
