use serde_json::{Map, Value};

use crate::error::{Error, Result};

pub const BEST_COLOR: &str = "#198754";
pub const MEDIUM_COLOR: &str = "#ffc107";
pub const WORST_COLOR: &str = "#6c757d";
pub const FAIL_COLOR: &str = "#dc3545";

/// Grading scale: mark -> minimal points, kept sorted by threshold, highest first.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Grading {
    thresholds: Vec<(String, i64)>,
}

impl Grading {
    pub fn new<I, M>(thresholds: I) -> Self
    where
        I: IntoIterator<Item = (M, i64)>,
        M: Into<String>,
    {
        let mut thresholds: Vec<(String, i64)> = thresholds
            .into_iter()
            .map(|(mark, limit)| (mark.into(), limit))
            .collect();
        thresholds.sort_by(|a, b| b.1.cmp(&a.1));
        Self { thresholds }
    }

    /// Reads `{ "<mark>": <min points> }`; limits may be numbers or numeric strings.
    pub fn from_json(value: &Value) -> Result<Self> {
        let Some(object) = value.as_object() else {
            return Err(Error::Validation(
                "grading must be an object of mark limits".to_string(),
            ));
        };
        let mut thresholds = Vec::with_capacity(object.len());
        for (mark, limit) in object {
            let limit = match limit {
                Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
                Value::String(s) => s
                    .trim()
                    .parse::<i64>()
                    .ok()
                    .or_else(|| s.trim().parse::<f64>().ok().map(|f| f as i64)),
                _ => None,
            };
            let Some(limit) = limit else {
                return Err(Error::Validation(format!(
                    "grading limit of mark '{mark}' must be numeric"
                )));
            };
            thresholds.push((mark.clone(), limit));
        }
        Ok(Self::new(thresholds))
    }

    pub fn to_json(&self) -> Value {
        let map: Map<String, Value> = self
            .thresholds
            .iter()
            .map(|(mark, limit)| (mark.clone(), Value::from(*limit)))
            .collect();
        Value::Object(map)
    }

    pub fn is_empty(&self) -> bool {
        self.thresholds.is_empty()
    }

    /// Marks from the best to the worst.
    pub fn marks(&self) -> impl Iterator<Item = &str> {
        self.thresholds.iter().map(|(mark, _)| mark.as_str())
    }

    /// The mark with the highest threshold not above `points`.
    pub fn get_grade(&self, points: i64) -> Option<&str> {
        self.thresholds
            .iter()
            .find(|(_, limit)| points >= *limit)
            .map(|(mark, _)| mark.as_str())
    }

    pub fn get_grade_color(&self, points: i64) -> &'static str {
        match self.get_grade(points) {
            Some("1") => BEST_COLOR,
            Some("2") => MEDIUM_COLOR,
            Some("3") => WORST_COLOR,
            _ => FAIL_COLOR,
        }
    }

    /// `(min, max)` points of a mark; `max` is `None` for the top mark.
    pub fn mark_range(&self, mark: &str) -> Option<(i64, Option<i64>)> {
        let mut upper = None;
        for (m, limit) in &self.thresholds {
            if m == mark {
                return Some((*limit, upper));
            }
            upper = Some(limit.saturating_sub(1));
        }
        None
    }
}
