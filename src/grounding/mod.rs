pub mod detector;
pub mod ocr_http;
pub mod resolver;
pub mod types;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::errors::PilotResult;
use crate::grounding::types::{BoundingBox, Screenshot, TextDetection};

/// Text recognition collaborator. Engine internals are out of scope; the
/// agent only depends on this narrow interface.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Ordered text regions for the given screenshot.
    async fn detect_text(&self, shot: &Screenshot) -> PilotResult<Vec<TextDetection>>;
}

/// Object-detection collaborator producing the per-screenshot label table
/// used by label-grounded providers.
#[async_trait]
pub trait ElementDetector: Send + Sync {
    async fn detect_labeled_elements(
        &self,
        shot: &Screenshot,
    ) -> PilotResult<HashMap<String, BoundingBox>>;
}
