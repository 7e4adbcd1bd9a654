//! Predicted grade probabilities from a fitted model.

use serde::{Deserialize, Serialize};

use super::ordinal::FittedModel;
use crate::model::ClassGrade;

/// Inclusive grid of calendar years, `start..=end` every `step` years.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct YearGrid {
    pub start_year: i32,
    pub end_year: i32,
    pub step: u32,
}

impl Default for YearGrid {
    fn default() -> Self {
        YearGrid {
            start_year: 2025,
            end_year: 2050,
            step: 5,
        }
    }
}

impl YearGrid {
    pub fn years(&self) -> Vec<i32> {
        if self.step == 0 || self.start_year > self.end_year {
            return Vec::new();
        }
        (self.start_year..=self.end_year)
            .step_by(self.step as usize)
            .collect()
    }
}

/// Model output for one station and year.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub station_id: String,
    pub year: i32,
    /// Probability of each grade, indexed like `ClassGrade::ALL`. Grades not
    /// observed at the station have probability zero.
    pub probabilities: [f64; 4],
    /// Most probable grade; ties go to the lower grade.
    pub predicted: ClassGrade,
    /// Probability of meeting the statutory class, when one is known.
    pub p_attaining: Option<f64>,
}

impl Prediction {
    pub fn probability_of(&self, grade: ClassGrade) -> f64 {
        self.probabilities[grade.index()]
    }
}

/// Full grade distribution over `ClassGrade::ALL` at calendar `year`.
pub fn grade_probabilities(model: &FittedModel, year: i32) -> [f64; 4] {
    let mut probabilities = [0.0; 4];
    for (level, p) in model
        .levels
        .iter()
        .zip(model.level_probabilities(f64::from(year)))
    {
        probabilities[level.index()] = p;
    }
    probabilities
}

/// Most probable grade. Strict comparison keeps the first, i.e. lowest,
/// grade on ties.
fn arg_max(probabilities: &[f64; 4]) -> ClassGrade {
    let mut best = ClassGrade::ALL[0];
    let mut best_p = f64::NEG_INFINITY;
    for grade in ClassGrade::ALL {
        let p = probabilities[grade.index()];
        if p > best_p {
            best = grade;
            best_p = p;
        }
    }
    best
}

/// Predicts grade probabilities for each year. `statutory_class` enables
/// the attainment probability `P(grade >= statutory_class)`.
pub fn predict(
    model: &FittedModel,
    years: &[i32],
    statutory_class: Option<ClassGrade>,
) -> Vec<Prediction> {
    years
        .iter()
        .map(|&year| {
            let probabilities = grade_probabilities(model, year);
            let p_attaining = statutory_class.map(|required| {
                ClassGrade::ALL
                    .iter()
                    .filter(|g| **g >= required)
                    .map(|g| probabilities[g.index()])
                    .sum::<f64>()
            });
            Prediction {
                station_id: model.station_id.clone(),
                year,
                probabilities,
                predicted: arg_max(&probabilities),
                p_attaining,
            }
        })
        .collect()
}
