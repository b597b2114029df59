use base64::Engine as _;
use serde::{Deserialize, Serialize};

/// A captured screen image (PNG-encoded) with its pixel dimensions.
#[derive(Debug, Clone)]
pub struct Screenshot {
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Screenshot {
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.png)
    }
}

/// Axis-aligned box in pixel coordinates of the source screenshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
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

    /// Smallest box enclosing a detection quad (OCR engines report four
    /// corner points per text region).
    pub fn from_quad(points: &[[f32; 2]]) -> Self {
        let mut bb = BoundingBox::new(f32::MAX, f32::MAX, f32::MIN, f32::MIN);
        for p in points {
            bb.x1 = bb.x1.min(p[0]);
            bb.y1 = bb.y1.min(p[1]);
            bb.x2 = bb.x2.max(p[0]);
            bb.y2 = bb.y2.max(p[1]);
        }
        bb
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    /// Centroid as a fraction of the image dimensions.
    pub fn center_normalized(&self, img_w: u32, img_h: u32) -> (f64, f64) {
        let (cx, cy) = self.center();
        (cx as f64 / img_w as f64, cy as f64 / img_h as f64)
    }

    pub fn contains_point(&self, x: f32, y: f32) -> bool {
        x >= self.x1 && x <= self.x2 && y >= self.y1 && y <= self.y2
    }
}

/// One recognized text region.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextDetection {
    pub bbox: BoundingBox,
    pub text: String,
    pub confidence: f32,
}
