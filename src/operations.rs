use serde::{Deserialize, Deserializer, Serialize};

/// A normalized screen coordinate in `[0,1]`.
///
/// Model output is not consistent about types here: some providers emit
/// `"0.80"` strings (occasionally `"80%"`) where others emit plain numbers,
/// so deserialization accepts both. Values outside the unit square are
/// rejected so the actuator never sees an off-screen coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Coord(pub f64);

impl<'de> Deserialize<'de> for Coord {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Num(f64),
            Str(String),
        }
        let value = match Raw::deserialize(deserializer)? {
            Raw::Num(v) => v,
            Raw::Str(s) => {
                let trimmed = s.trim();
                match trimmed.strip_suffix('%') {
                    Some(digits) => {
                        digits.parse::<f64>().map_err(serde::de::Error::custom)? / 100.0
                    }
                    None => trimmed.parse::<f64>().map_err(serde::de::Error::custom)?,
                }
            }
        };
        if !value.is_finite() || !(0.0..=1.0).contains(&value) {
            return Err(serde::de::Error::custom(format!(
                "coordinate {value} outside [0,1]"
            )));
        }
        Ok(Coord(value))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    Up,
    Down,
}

impl std::fmt::Display for ScrollDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScrollDirection::Up => write!(f, "up"),
            ScrollDirection::Down => write!(f, "down"),
        }
    }
}

/// One action requested by the vision model.
///
/// The `operation` field is the discriminator; entries without it (or with an
/// unknown value) fail deserialization and surface as a response-validation
/// error. Click-class operations start out symbolic (`text` / `label`) and
/// carry resolved `x`/`y` only after grounding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum Operation {
    Click {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        x: Option<Coord>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        y: Option<Coord>,
    },
    Write {
        content: String,
    },
    WriteIn {
        label: String,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        x: Option<Coord>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        y: Option<Coord>,
    },
    Scroll {
        direction: ScrollDirection,
    },
    Press {
        keys: Vec<String>,
    },
    SolveQuiz {
        question: String,
        choices: Vec<String>,
    },
    Done {
        summary: String,
    },
    ReadTextFrom {
        anchor: String,
    },
}

impl Operation {
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::Click { .. } => "click",
            Operation::Write { .. } => "write",
            Operation::WriteIn { .. } => "write_in",
            Operation::Scroll { .. } => "scroll",
            Operation::Press { .. } => "press",
            Operation::SolveQuiz { .. } => "solve_quiz",
            Operation::Done { .. } => "done",
            Operation::ReadTextFrom { .. } => "read_text_from",
        }
    }

    /// Resolved coordinates, if this is a grounded click-class operation.
    pub fn point(&self) -> Option<(f64, f64)> {
        match self {
            Operation::Click { x: Some(x), y: Some(y), .. }
            | Operation::WriteIn { x: Some(x), y: Some(y), .. } => Some((x.0, y.0)),
            _ => None,
        }
    }

    /// Whether this operation still needs a grounding pass before actuation.
    pub fn needs_grounding(&self) -> bool {
        match self {
            Operation::Click { x, y, .. } => x.is_none() || y.is_none(),
            Operation::WriteIn { x, y, .. } => x.is_none() || y.is_none(),
            Operation::ReadTextFrom { .. } => true,
            _ => false,
        }
    }
}
