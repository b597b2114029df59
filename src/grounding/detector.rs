//! ONNX YOLO inference producing the per-screenshot label table.
//!
//! Detections are numbered `~1`, `~2`, ... in confidence order; the same
//! labels are drawn onto the screenshot sent to label-grounded providers, so
//! the model can answer `{"operation":"click","label":"~3"}`.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use ndarray::Array4;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;

use crate::config::DetectorConfig;
use crate::errors::{PilotError, PilotResult};
use crate::grounding::types::{BoundingBox, Screenshot};
use crate::grounding::ElementDetector;

const INPUT_SIZE: u32 = 640;

#[derive(Debug, Clone)]
struct Candidate {
    bbox: BoundingBox,
    confidence: f32,
}

/// Holds the ONNX Runtime session and inference thresholds.
pub struct YoloLabelDetector {
    session: Mutex<Session>,
    conf_threshold: f32,
    iou_threshold: f32,
}

impl YoloLabelDetector {
    pub fn new(config: &DetectorConfig) -> PilotResult<Self> {
        if !Path::new(&config.model_path).exists() {
            return Err(PilotError::Config(format!(
                "detector model not found at {}",
                config.model_path
            )));
        }
        let session = Session::builder()
            .map_err(|e| PilotError::Grounding(format!("ort session builder: {e}")))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| PilotError::Grounding(format!("ort opt-level: {e}")))?
            .commit_from_file(&config.model_path)
            .map_err(|e| PilotError::Grounding(format!("ort load model: {e}")))?;
        tracing::info!(path = %config.model_path, "element detector loaded");
        Ok(Self {
            session: Mutex::new(session),
            conf_threshold: config.conf_threshold,
            iou_threshold: config.iou_threshold,
        })
    }

    fn detect(&self, shot: &Screenshot) -> PilotResult<HashMap<String, BoundingBox>> {
        let img = image::load_from_memory(&shot.png)
            .map_err(|e| PilotError::Grounding(format!("image load: {e}")))?;
        let (orig_w, orig_h) = (img.width() as f32, img.height() as f32);

        // Letterbox to the square model input.
        let scale = (INPUT_SIZE as f32 / orig_w).min(INPUT_SIZE as f32 / orig_h);
        let nw = (orig_w * scale).round() as u32;
        let nh = (orig_h * scale).round() as u32;
        let pad_x = (INPUT_SIZE - nw) as f32 / 2.0;
        let pad_y = (INPUT_SIZE - nh) as f32 / 2.0;

        let resized = img.resize_exact(nw, nh, image::imageops::FilterType::CatmullRom).to_rgb8();
        let mut canvas = image::RgbImage::from_pixel(INPUT_SIZE, INPUT_SIZE, image::Rgb([114, 114, 114]));
        image::imageops::overlay(&mut canvas, &resized, pad_x.round() as i64, pad_y.round() as i64);

        let mut input = Array4::<f32>::zeros((1, 3, INPUT_SIZE as usize, INPUT_SIZE as usize));
        for (x, y, p) in canvas.enumerate_pixels() {
            input[[0, 0, y as usize, x as usize]] = p[0] as f32 / 255.0;
            input[[0, 1, y as usize, x as usize]] = p[1] as f32 / 255.0;
            input[[0, 2, y as usize, x as usize]] = p[2] as f32 / 255.0;
        }

        let tensor = Tensor::from_array(input)
            .map_err(|e| PilotError::Grounding(format!("ort tensor: {e}")))?;

        let output = {
            let mut session = self
                .session
                .lock()
                .map_err(|_| PilotError::Grounding("detector session poisoned".into()))?;
            let outputs = session
                .run(ort::inputs![tensor])
                .map_err(|e| PilotError::Grounding(format!("ort run: {e}")))?;
            outputs[0]
                .try_extract_array::<f32>()
                .map_err(|e| PilotError::Grounding(format!("extract tensor: {e}")))?
                .to_owned()
        };

        // YOLOv8 layout: [1, 4 + num_classes, num_proposals]
        let view = output.view();
        let shape = view.shape();
        if shape.len() < 3 {
            return Err(PilotError::Grounding(format!("unexpected output shape {shape:?}")));
        }
        let num_classes = shape[1] - 4;
        let num_preds = shape[2];

        let mut candidates = Vec::new();
        for i in 0..num_preds {
            let mut score = 0.0f32;
            for c in 0..num_classes {
                score = score.max(view[[0, 4 + c, i]]);
            }
            if score < self.conf_threshold {
                continue;
            }
            let cx = view[[0, 0, i]];
            let cy = view[[0, 1, i]];
            let w = view[[0, 2, i]];
            let h = view[[0, 3, i]];

            // Undo the letterbox back into screenshot pixel space.
            let x1 = (((cx - w / 2.0) - pad_x) / scale).clamp(0.0, orig_w);
            let y1 = (((cy - h / 2.0) - pad_y) / scale).clamp(0.0, orig_h);
            let x2 = (((cx + w / 2.0) - pad_x) / scale).clamp(0.0, orig_w);
            let y2 = (((cy + h / 2.0) - pad_y) / scale).clamp(0.0, orig_h);

            candidates.push(Candidate {
                bbox: BoundingBox::new(x1, y1, x2, y2),
                confidence: score,
            });
        }

        let kept = nms(candidates, self.iou_threshold);
        Ok(assign_labels(kept))
    }
}

#[async_trait]
impl ElementDetector for YoloLabelDetector {
    async fn detect_labeled_elements(
        &self,
        shot: &Screenshot,
    ) -> PilotResult<HashMap<String, BoundingBox>> {
        let table = self.detect(shot)?;
        tracing::debug!(elements = table.len(), "label table built");
        Ok(table)
    }
}

/// Stand-in used when no configured provider grounds through labels; the
/// ONNX model is then never loaded.
pub struct DisabledDetector;

#[async_trait]
impl ElementDetector for DisabledDetector {
    async fn detect_labeled_elements(
        &self,
        _shot: &Screenshot,
    ) -> PilotResult<HashMap<String, BoundingBox>> {
        Err(PilotError::Grounding(
            "no element detector configured".into(),
        ))
    }
}

/// Greedy non-maximum suppression, highest confidence first.
fn nms(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut kept: Vec<Candidate> = Vec::new();
    for cand in candidates {
        if kept.iter().all(|k| iou(&k.bbox, &cand.bbox) <= iou_threshold) {
            kept.push(cand);
        }
    }
    kept
}

/// Number surviving detections `~1..~n` in confidence order.
fn assign_labels(kept: Vec<Candidate>) -> HashMap<String, BoundingBox> {
    kept.into_iter()
        .enumerate()
        .map(|(i, c)| (format!("~{}", i + 1), c.bbox))
        .collect()
}

fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let ix1 = a.x1.max(b.x1);
    let iy1 = a.y1.max(b.y1);
    let ix2 = a.x2.min(b.x2);
    let iy2 = a.y2.min(b.y2);

    let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
    let area_a = (a.x2 - a.x1) * (a.y2 - a.y1);
    let area_b = (b.x2 - b.x1) * (b.y2 - b.y1);
    let union = area_a + area_b - inter;

    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

// ── Screenshot annotation ───────────────────────────────────────────────────

/// Draw each labeled box onto the screenshot so a vision model can refer to
/// elements by label. Returns PNG bytes.
pub fn annotate_labels(
    shot: &Screenshot,
    table: &HashMap<String, BoundingBox>,
) -> PilotResult<Vec<u8>> {
    let img = image::load_from_memory(&shot.png)
        .map_err(|e| PilotError::Grounding(format!("annotate load: {e}")))?;
    let mut canvas = img.to_rgba8();
    let scale: u32 = if canvas.width() > 1600 { 2 } else { 1 };

    // Stable drawing order so overlapping labels stack deterministically.
    let mut entries: Vec<(&String, &BoundingBox)> = table.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));

    const BOX_COLOR: [u8; 4] = [255, 221, 51, 255];
    for (label, bbox) in entries {
        draw_box(&mut canvas, bbox, BOX_COLOR, scale as i32);
        draw_label(
            &mut canvas,
            label,
            bbox.x1 as i32,
            (bbox.y1 as i32 - (7 * scale) as i32).max(0),
            BOX_COLOR,
            scale,
        );
    }

    let mut out = Vec::new();
    image::DynamicImage::ImageRgba8(canvas)
        .write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
        .map_err(|e| PilotError::Grounding(format!("PNG encode: {e}")))?;
    Ok(out)
}

fn draw_box(canvas: &mut image::RgbaImage, bbox: &BoundingBox, col: [u8; 4], thickness: i32) {
    let (w, h) = canvas.dimensions();
    let (iw, ih) = (w as i32, h as i32);
    let (x1, y1, x2, y2) = (bbox.x1 as i32, bbox.y1 as i32, bbox.x2 as i32, bbox.y2 as i32);

    for t in 0..thickness {
        for x in x1..=x2 {
            for y in [y1 + t, y2 - t] {
                if x >= 0 && x < iw && y >= 0 && y < ih {
                    canvas.put_pixel(x as u32, y as u32, image::Rgba(col));
                }
            }
        }
        for y in y1..=y2 {
            for x in [x1 + t, x2 - t] {
                if x >= 0 && x < iw && y >= 0 && y < ih {
                    canvas.put_pixel(x as u32, y as u32, image::Rgba(col));
                }
            }
        }
    }
}

/// 3×5 digit glyphs plus the tilde prefix; enough for `~123`-style labels.
const DIGIT_FONT: [[u8; 5]; 10] = [
    [0b111, 0b101, 0b101, 0b101, 0b111], // 0
    [0b010, 0b110, 0b010, 0b010, 0b111], // 1
    [0b111, 0b001, 0b111, 0b100, 0b111], // 2
    [0b111, 0b001, 0b111, 0b001, 0b111], // 3
    [0b101, 0b101, 0b111, 0b001, 0b001], // 4
    [0b111, 0b100, 0b111, 0b001, 0b111], // 5
    [0b111, 0b100, 0b111, 0b101, 0b111], // 6
    [0b111, 0b001, 0b010, 0b010, 0b010], // 7
    [0b111, 0b101, 0b111, 0b101, 0b111], // 8
    [0b111, 0b101, 0b111, 0b001, 0b111], // 9
];
const TILDE: [u8; 5] = [0b000, 0b000, 0b011, 0b110, 0b000];

fn draw_label(canvas: &mut image::RgbaImage, text: &str, x: i32, y: i32, col: [u8; 4], scale: u32) {
    let (w, h) = canvas.dimensions();
    let step = 4 * scale;
    let label_w = text.len() as u32 * step + 2 * scale;
    let label_h = 5 * scale + 2 * scale;

    // Dark backplate for contrast.
    for dy in 0..label_h {
        for dx in 0..label_w {
            let px = x + dx as i32;
            let py = y + dy as i32;
            if px >= 0 && (px as u32) < w && py >= 0 && (py as u32) < h {
                canvas.put_pixel(px as u32, py as u32, image::Rgba([20, 20, 20, 255]));
            }
        }
    }

    for (i, c) in text.chars().enumerate() {
        let glyph = match c {
            '0'..='9' => DIGIT_FONT[(c as u8 - b'0') as usize],
            '~' => TILDE,
            _ => continue,
        };
        let gx = x + (scale + i as u32 * step) as i32;
        let gy = y + scale as i32;
        for (row, bits) in glyph.iter().enumerate() {
            for bit in 0..3u32 {
                if (bits >> (2 - bit)) & 1 == 0 {
                    continue;
                }
                for sy in 0..scale {
                    for sx in 0..scale {
                        let px = gx + (bit * scale + sx) as i32;
                        let py = gy + (row as u32 * scale + sy) as i32;
                        if px >= 0 && (px as u32) < w && py >= 0 && (py as u32) < h {
                            canvas.put_pixel(px as u32, py as u32, image::Rgba(col));
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32) -> Candidate {
        Candidate { bbox: BoundingBox::new(x1, y1, x2, y2), confidence }
    }

    #[test]
    fn nms_suppresses_heavy_overlap() {
        let kept = nms(
            vec![
                cand(0.0, 0.0, 100.0, 100.0, 0.9),
                cand(5.0, 5.0, 105.0, 105.0, 0.7), // mostly the same box
                cand(300.0, 300.0, 400.0, 400.0, 0.8),
            ],
            0.45,
        );
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].confidence, 0.8);
    }

    #[test]
    fn labels_are_numbered_by_confidence() {
        let table = assign_labels(vec![
            cand(0.0, 0.0, 10.0, 10.0, 0.9),
            cand(20.0, 20.0, 30.0, 30.0, 0.5),
        ]);
        assert_eq!(table["~1"], BoundingBox::new(0.0, 0.0, 10.0, 10.0));
        assert_eq!(table["~2"], BoundingBox::new(20.0, 20.0, 30.0, 30.0));
    }

    #[test]
    fn annotation_produces_png() {
        let mut png = Vec::new();
        image::DynamicImage::ImageRgba8(image::RgbaImage::from_pixel(
            64,
            64,
            image::Rgba([200, 200, 200, 255]),
        ))
        .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
        .unwrap();
        let shot = Screenshot { png, width: 64, height: 64 };

        let mut table = HashMap::new();
        table.insert("~1".to_string(), BoundingBox::new(8.0, 20.0, 40.0, 40.0));

        let out = annotate_labels(&shot, &table).unwrap();
        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!(decoded.width(), 64);
    }
}
