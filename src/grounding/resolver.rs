use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::{PilotError, PilotResult};
use crate::grounding::types::{BoundingBox, Screenshot, TextDetection};
use crate::grounding::{ElementDetector, OcrEngine};
use crate::operations::{Coord, Operation};

/// Minimum bigram similarity for a fuzzy text match.
pub const SIMILARITY_FLOOR: f64 = 0.6;
/// Input fields usually sit to the right of their label.
const WRITE_IN_X_OFFSET: f64 = 0.05;
/// Search window to the lower-right of a `read_text_from` anchor,
/// in normalized units.
const READ_WINDOW_W: f64 = 0.2;
const READ_WINDOW_H: f64 = 0.1;

/// How a provider's symbolic targets are turned into coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroundingMode {
    /// Model emits normalized coordinates directly; nothing to resolve.
    Coordinates,
    /// Model names on-screen text; resolved via the OCR collaborator.
    OcrText,
    /// Model references detector labels drawn onto the screenshot.
    LabelTable,
}

impl GroundingMode {
    pub fn from_config(s: &str) -> PilotResult<Self> {
        match s {
            "coordinates" => Ok(GroundingMode::Coordinates),
            "ocr" => Ok(GroundingMode::OcrText),
            "labels" => Ok(GroundingMode::LabelTable),
            other => Err(PilotError::Config(format!("unknown grounding mode '{other}'"))),
        }
    }
}

/// Result of grounding one operation batch.
///
/// A label-table miss is a signal rather than an error: the dispatcher
/// reacts by falling back to a non-grounded provider call instead of
/// aborting the iteration.
#[derive(Debug)]
pub enum GroundOutcome {
    Grounded {
        operations: Vec<Operation>,
        /// Text gathered by `read_text_from`, diagnostic only.
        read_texts: Vec<String>,
    },
    LabelMiss {
        label: String,
    },
}

pub struct GroundingResolver {
    ocr: Arc<dyn OcrEngine>,
    detector: Arc<dyn ElementDetector>,
}

impl GroundingResolver {
    pub fn new(ocr: Arc<dyn OcrEngine>, detector: Arc<dyn ElementDetector>) -> Self {
        Self { ocr, detector }
    }

    /// Ground every operation in the batch against the screenshot it was
    /// planned on. `write_in` expands into `click` + `write` here, since the
    /// expansion needs the resolved click position.
    pub async fn ground_batch(
        &self,
        mode: GroundingMode,
        operations: Vec<Operation>,
        shot: &Screenshot,
    ) -> PilotResult<GroundOutcome> {
        match mode {
            GroundingMode::Coordinates => Ok(GroundOutcome::Grounded {
                operations,
                read_texts: Vec::new(),
            }),
            GroundingMode::OcrText => self.ground_with_ocr(operations, shot).await,
            GroundingMode::LabelTable => self.ground_with_labels(operations, shot).await,
        }
    }

    /// Locate `target` text on a screenshot and return its normalized
    /// centroid. Used both for `click{text}` grounding and for clicking a
    /// quiz answer.
    pub async fn locate_text_on(
        &self,
        shot: &Screenshot,
        target: &str,
    ) -> PilotResult<(f64, f64)> {
        let detections = self.ocr.detect_text(shot).await?;
        let hit = best_text_match(&detections, target).ok_or_else(|| {
            PilotError::Grounding(format!("text '{target}' not found on screen"))
        })?;
        Ok(clamp_unit(hit.bbox.center_normalized(shot.width, shot.height)))
    }

    async fn ground_with_ocr(
        &self,
        operations: Vec<Operation>,
        shot: &Screenshot,
    ) -> PilotResult<GroundOutcome> {
        let needs_ocr = operations.iter().any(|op| {
            matches!(
                op,
                Operation::Click { text: Some(_), .. }
                    | Operation::WriteIn { .. }
                    | Operation::ReadTextFrom { .. }
            )
        });
        let detections = if needs_ocr {
            self.ocr.detect_text(shot).await?
        } else {
            Vec::new()
        };

        let mut grounded = Vec::with_capacity(operations.len());
        let mut read_texts = Vec::new();

        for op in operations {
            match op {
                Operation::Click { text: Some(target), label, .. } => {
                    let hit = best_text_match(&detections, &target).ok_or_else(|| {
                        PilotError::Grounding(format!("text '{target}' not found on screen"))
                    })?;
                    let (x, y) = clamp_unit(hit.bbox.center_normalized(shot.width, shot.height));
                    tracing::debug!(target = %target, x, y, "click target resolved via OCR");
                    grounded.push(Operation::Click {
                        text: Some(target),
                        label,
                        x: Some(Coord(x)),
                        y: Some(Coord(y)),
                    });
                }
                Operation::Click { text: None, x: Some(x), y: Some(y), label } => {
                    // Coordinates supplied directly; nothing to look up.
                    grounded.push(Operation::Click { text: None, label, x: Some(x), y: Some(y) });
                }
                Operation::Click { text: None, x, y, .. } if x.is_none() || y.is_none() => {
                    return Err(PilotError::Grounding(
                        "click without text target or coordinates".into(),
                    ));
                }
                Operation::WriteIn { label, content, .. } => {
                    let hit = best_text_match(&detections, &label).ok_or_else(|| {
                        PilotError::Grounding(format!("label '{label}' not found on screen"))
                    })?;
                    let (x, y) = clamp_unit(hit.bbox.center_normalized(shot.width, shot.height));
                    let x = (x + WRITE_IN_X_OFFSET).min(1.0);
                    tracing::debug!(label = %label, x, y, "write_in expanded to click + write");
                    grounded.push(Operation::Click {
                        text: None,
                        label: None,
                        x: Some(Coord(x)),
                        y: Some(Coord(y)),
                    });
                    grounded.push(Operation::Write { content });
                }
                Operation::ReadTextFrom { anchor } => {
                    let hit = best_text_match(&detections, &anchor).ok_or_else(|| {
                        PilotError::Grounding(format!("anchor '{anchor}' not found on screen"))
                    })?;
                    let (ax, ay) = hit.bbox.center_normalized(shot.width, shot.height);
                    let gathered = collect_window_text(&detections, shot, ax, ay);
                    tracing::info!(anchor = %anchor, text = %gathered, "read_text_from");
                    read_texts.push(gathered);
                    // Information gathering only; nothing reaches the actuator.
                }
                other => grounded.push(other),
            }
        }

        Ok(GroundOutcome::Grounded { operations: grounded, read_texts })
    }

    /// Build the label table for one screenshot. Called once per capture;
    /// the same table is reused for annotation and grounding.
    pub async fn build_label_table(
        &self,
        shot: &Screenshot,
    ) -> PilotResult<HashMap<String, BoundingBox>> {
        self.detector.detect_labeled_elements(shot).await
    }

    async fn ground_with_labels(
        &self,
        operations: Vec<Operation>,
        shot: &Screenshot,
    ) -> PilotResult<GroundOutcome> {
        let needs_table = operations.iter().any(|op| {
            matches!(
                op,
                Operation::Click { x: None, .. } | Operation::WriteIn { x: None, .. }
            )
        });
        let table: HashMap<String, BoundingBox> = if needs_table {
            self.build_label_table(shot).await?
        } else {
            HashMap::new()
        };
        Ok(self.ground_with_table(operations, shot, &table))
    }

    /// Ground a batch against a precomputed label table.
    pub fn ground_with_table(
        &self,
        operations: Vec<Operation>,
        shot: &Screenshot,
        table: &HashMap<String, BoundingBox>,
    ) -> GroundOutcome {
        let mut grounded = Vec::with_capacity(operations.len());
        for op in operations {
            match op {
                Operation::Click { label: Some(label), text, x: None, .. } => {
                    let Some(bbox) = table.get(&label) else {
                        tracing::warn!(label = %label, "label not in detector table");
                        return GroundOutcome::LabelMiss { label };
                    };
                    let (x, y) = clamp_unit(bbox.center_normalized(shot.width, shot.height));
                    tracing::debug!(label = %label, x, y, "click label resolved via detector");
                    grounded.push(Operation::Click {
                        text,
                        label: Some(label),
                        x: Some(Coord(x)),
                        y: Some(Coord(y)),
                    });
                }
                Operation::Click { label: None, x: None, .. } => {
                    return GroundOutcome::LabelMiss { label: String::new() };
                }
                Operation::WriteIn { label, content, x: None, .. } => {
                    let Some(bbox) = table.get(&label) else {
                        tracing::warn!(label = %label, "label not in detector table");
                        return GroundOutcome::LabelMiss { label };
                    };
                    let (x, y) = clamp_unit(bbox.center_normalized(shot.width, shot.height));
                    let x = (x + WRITE_IN_X_OFFSET).min(1.0);
                    grounded.push(Operation::Click {
                        text: None,
                        label: Some(label),
                        x: Some(Coord(x)),
                        y: Some(Coord(y)),
                    });
                    grounded.push(Operation::Write { content });
                }
                other => grounded.push(other),
            }
        }

        GroundOutcome::Grounded { operations: grounded, read_texts: Vec::new() }
    }
}

/// Pick the detection best matching `target`: exact containment on
/// case/whitespace-normalized text first (highest confidence wins), then the
/// highest bigram similarity at or above [`SIMILARITY_FLOOR`].
pub fn best_text_match<'a>(
    detections: &'a [TextDetection],
    target: &str,
) -> Option<&'a TextDetection> {
    let norm_target = normalize(target);
    if norm_target.is_empty() {
        return None;
    }

    let contained = detections
        .iter()
        .filter(|d| {
            let t = normalize(&d.text);
            !t.is_empty() && (t.contains(&norm_target) || norm_target.contains(&t))
        })
        .max_by(|a, b| {
            a.confidence
                .partial_cmp(&b.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    if contained.is_some() {
        return contained;
    }

    detections
        .iter()
        .map(|d| (d, similarity(&normalize(&d.text), &norm_target)))
        .filter(|(_, s)| *s >= SIMILARITY_FLOOR)
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(d, _)| d)
}

fn normalize(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Sørensen–Dice coefficient over character bigrams.
fn similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    let ba = bigrams(a);
    let bb = bigrams(b);
    if ba.is_empty() || bb.is_empty() {
        return 0.0;
    }
    let mut counts: HashMap<(char, char), usize> = HashMap::new();
    for g in &ba {
        *counts.entry(*g).or_default() += 1;
    }
    let mut overlap = 0usize;
    for g in &bb {
        if let Some(c) = counts.get_mut(g) {
            if *c > 0 {
                *c -= 1;
                overlap += 1;
            }
        }
    }
    2.0 * overlap as f64 / (ba.len() + bb.len()) as f64
}

fn bigrams(s: &str) -> Vec<(char, char)> {
    let chars: Vec<char> = s.chars().collect();
    chars.windows(2).map(|w| (w[0], w[1])).collect()
}

/// All detected text whose centroid lies in the fixed window to the
/// lower-right of the anchor, concatenated in detection order.
fn collect_window_text(
    detections: &[TextDetection],
    shot: &Screenshot,
    anchor_x: f64,
    anchor_y: f64,
) -> String {
    let mut parts = Vec::new();
    for d in detections {
        let (cx, cy) = d.bbox.center_normalized(shot.width, shot.height);
        if cx > anchor_x
            && cx < anchor_x + READ_WINDOW_W
            && cy > anchor_y
            && cy < anchor_y + READ_WINDOW_H
        {
            parts.push(d.text.as_str());
        }
    }
    parts.join(" ")
}

fn clamp_unit((x, y): (f64, f64)) -> (f64, f64) {
    (x.clamp(0.0, 1.0), y.clamp(0.0, 1.0))
}
