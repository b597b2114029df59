use async_trait::async_trait;
use serde::Deserialize;

use crate::config::OcrConfig;
use crate::errors::{PilotError, PilotResult};
use crate::grounding::types::{BoundingBox, Screenshot, TextDetection};
use crate::grounding::OcrEngine;

/// Client for an OCR sidecar service.
///
/// The service accepts a base64 PNG and answers with the recognized text
/// regions as corner quads, reading order preserved:
/// `[{"bbox": [[x,y],...4], "text": "...", "confidence": 0.97}, ...]`.
pub struct HttpOcrEngine {
    endpoint: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct WireDetection {
    bbox: Vec<[f32; 2]>,
    text: String,
    #[serde(default)]
    confidence: f32,
}

impl HttpOcrEngine {
    pub fn new(config: &OcrConfig) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl OcrEngine for HttpOcrEngine {
    async fn detect_text(&self, shot: &Screenshot) -> PilotResult<Vec<TextDetection>> {
        let body = serde_json::json!({ "image_base64": shot.to_base64() });

        // Every failure of the sidecar is a grounding failure, transport
        // errors included.
        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| PilotError::Grounding(format!("OCR service unreachable: {e}")))?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(PilotError::Grounding(format!("OCR service {status}: {text}")));
        }

        let wire: Vec<WireDetection> = response
            .json()
            .await
            .map_err(|e| PilotError::Grounding(format!("OCR reply unreadable: {e}")))?;
        let detections: Vec<TextDetection> = wire
            .into_iter()
            .filter(|d| !d.text.trim().is_empty())
            .map(|d| TextDetection {
                bbox: BoundingBox::from_quad(&d.bbox),
                text: d.text,
                confidence: d.confidence,
            })
            .collect();

        tracing::debug!(count = detections.len(), "OCR detections received");
        Ok(detections)
    }
}
