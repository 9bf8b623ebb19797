use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::AppError;

pub const FALLBACK_LETTER: &str = "F";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScaleBand {
    pub letter: String,
    pub min: f64,
    pub max: f64,
    pub gpa: f64,
}

impl ScaleBand {
    fn new(letter: &str, min: f64, max: f64, gpa: f64) -> Self {
        Self {
            letter: letter.to_string(),
            min,
            max,
            gpa,
        }
    }

    pub fn contains(&self, percentage: f64) -> bool {
        percentage >= self.min && percentage <= self.max
    }
}

/// A lesson's letter scale, kept in authoring order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GradingScale {
    bands: Vec<ScaleBand>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LetterMatch<'a> {
    pub letter: &'a str,
    pub gpa: f64,
}

impl Default for GradingScale {
    fn default() -> Self {
        Self {
            bands: vec![
                ScaleBand::new("A", 90.0, 100.0, 4.0),
                ScaleBand::new("B", 80.0, 89.99, 3.0),
                ScaleBand::new("C", 70.0, 79.99, 2.0),
                ScaleBand::new("D", 60.0, 69.99, 1.0),
                ScaleBand::new("F", 0.0, 59.99, 0.0),
            ],
        }
    }
}

#[derive(Debug, Deserialize)]
struct BandBody {
    min: f64,
    max: f64,
    #[serde(default)]
    gpa: f64,
}

impl GradingScale {
    pub fn new(bands: Vec<ScaleBand>) -> Result<Self, AppError> {
        if bands.is_empty() {
            return Err(AppError::validation("grading scale must have at least one band"));
        }
        let mut seen: Vec<String> = Vec::with_capacity(bands.len());
        for b in &bands {
            let letter = b.letter.trim();
            if letter.is_empty() {
                return Err(AppError::validation("grading scale letters must not be empty"));
            }
            if !b.min.is_finite() || !b.max.is_finite() || !b.gpa.is_finite() {
                return Err(AppError::validation_with(
                    "grading scale values must be finite numbers",
                    json!({ "letter": letter }),
                ));
            }
            if b.min < 0.0 || b.min > b.max {
                return Err(AppError::validation_with(
                    "grading scale band needs 0 <= min <= max",
                    json!({ "letter": letter, "min": b.min, "max": b.max }),
                ));
            }
            if b.gpa < 0.0 {
                return Err(AppError::validation_with(
                    "gpa must be >= 0",
                    json!({ "letter": letter, "gpa": b.gpa }),
                ));
            }
            if seen.iter().any(|s| s.eq_ignore_ascii_case(letter)) {
                return Err(AppError::validation_with(
                    "duplicate letter in grading scale",
                    json!({ "letter": letter }),
                ));
            }
            seen.push(letter.to_string());
        }
        Ok(Self {
            bands: bands
                .into_iter()
                .map(|b| ScaleBand {
                    letter: b.letter.trim().to_string(),
                    ..b
                })
                .collect(),
        })
    }

    /// Accepts `{"A": {"min":90,"max":100,"gpa":4.0}, ...}` (object order is kept)
    /// or `[{"letter":"A","min":90,"max":100,"gpa":4.0}, ...]`.
    pub fn from_json(raw: &serde_json::Value) -> Result<Self, AppError> {
        match raw {
            serde_json::Value::Object(map) => {
                let mut bands = Vec::with_capacity(map.len());
                for (letter, body) in map {
                    let body: BandBody = serde_json::from_value(body.clone()).map_err(|e| {
                        AppError::validation_with(
                            format!("invalid band for {letter}: {e}"),
                            json!({ "letter": letter }),
                        )
                    })?;
                    bands.push(ScaleBand::new(letter, body.min, body.max, body.gpa));
                }
                Self::new(bands)
            }
            serde_json::Value::Array(_) => {
                let bands: Vec<ScaleBand> = serde_json::from_value(raw.clone())
                    .map_err(|e| AppError::validation(format!("invalid gradingScale: {e}")))?;
                Self::new(bands)
            }
            _ => Err(AppError::validation(
                "gradingScale must be an object or an array",
            )),
        }
    }

    pub fn bands(&self) -> &[ScaleBand] {
        &self.bands
    }

    pub fn band(&self, letter: &str) -> Option<&ScaleBand> {
        self.bands
            .iter()
            .find(|b| b.letter.eq_ignore_ascii_case(letter.trim()))
    }

    /// First band (authoring order) whose inclusive range holds `percentage`.
    /// Unmatched percentages map to "F".
    pub fn letter_for(&self, percentage: f64) -> LetterMatch<'_> {
        if let Some(b) = self.bands.iter().find(|b| b.contains(percentage)) {
            return LetterMatch {
                letter: &b.letter,
                gpa: b.gpa,
            };
        }
        let gpa = self.band(FALLBACK_LETTER).map(|b| b.gpa).unwrap_or(0.0);
        LetterMatch {
            letter: FALLBACK_LETTER,
            gpa,
        }
    }

    /// Bands from the highest `min` threshold to the lowest.
    pub fn by_threshold_desc(&self) -> Vec<&ScaleBand> {
        let mut out: Vec<&ScaleBand> = self.bands.iter().collect();
        out.sort_by(|a, b| b.min.total_cmp(&a.min));
        out
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for b in &self.bands {
            map.insert(
                b.letter.clone(),
                json!({ "min": b.min, "max": b.max, "gpa": b.gpa }),
            );
        }
        serde_json::Value::Object(map)
    }
}
