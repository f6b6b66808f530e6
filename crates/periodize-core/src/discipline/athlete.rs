//! Athlete-data shapes, one per discipline.
//!
//! A plan row stores its discipline's shape as a JSON document. The
//! [`AthleteData`] union is the typed view the worker and the prompt builder
//! work from.

use serde::{Deserialize, Serialize};

use periodize_db::models::Discipline;

/// Attributes every discipline asks for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AthleteProfile {
    pub name: String,
    pub age: i32,
    pub weight_kg: f64,
    pub height_cm: i32,
    /// Self-reported level (beginner, intermediate, advanced).
    pub experience: String,
    pub goal: String,
}

/// One-rep maxes (kg) and benchmark workout times.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Benchmarks {
    pub back_squat: Option<f64>,
    pub deadlift: Option<f64>,
    pub clean: Option<f64>,
    pub snatch: Option<f64>,
    pub fran: Option<String>,
    pub grace: Option<String>,
}

/// General conditioning (CrossFit-style) athlete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneralAthlete {
    #[serde(flatten)]
    pub profile: AthleteProfile,
    pub availability_days: i32,
    pub detailed_goal: Option<String>,
    pub injuries: Option<String>,
    pub history: Option<String>,
    /// `true` when this is the athlete's main training, `false` when it
    /// complements classes at a gym.
    #[serde(default)]
    pub primary_training: bool,
    pub training_period: Option<String>,
    pub benchmarks: Option<Benchmarks>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrengthAthlete {
    #[serde(flatten)]
    pub profile: AthleteProfile,
    pub availability_days: i32,
    pub detailed_goal: Option<String>,
    pub injuries: Option<String>,
    pub history: Option<String>,
    pub training_period: Option<String>,
    pub training_focus: String,
    pub equipment_available: Option<String>,
    pub sessions_per_week: i32,
    pub session_minutes: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunningAthlete {
    #[serde(flatten)]
    pub profile: AthleteProfile,
    pub available_days: i32,
    pub weekly_km: i32,
    pub pace_5k: Option<String>,
    pub pace_10k: Option<String>,
    pub best_5k: Option<String>,
    pub best_10k: Option<String>,
    pub best_21k: Option<String>,
    pub best_42k: Option<String>,
    pub target_time: Option<String>,
    pub race_date: Option<String>,
    pub injury_history: Option<String>,
    pub prior_experience: Option<String>,
    pub training_preference: Option<String>,
    pub training_location: Option<String>,
    pub equipment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CyclingAthlete {
    #[serde(flatten)]
    pub profile: AthleteProfile,
    pub available_days: i32,
    pub weekly_hours: i32,
    pub bike_type: Option<String>,
    pub ftp_watts: Option<i32>,
    pub avg_power_watts: Option<i32>,
    pub best_40k: Option<String>,
    pub best_100k: Option<String>,
    pub best_160k: Option<String>,
    pub target_time: Option<String>,
    pub race_date: Option<String>,
    pub injury_history: Option<String>,
    pub prior_experience: Option<String>,
    pub training_preference: Option<String>,
    pub equipment: Option<String>,
    pub preferred_zone: Option<String>,
}

/// Typed athlete data for any discipline.
#[derive(Debug, Clone, PartialEq)]
pub enum AthleteData {
    General(GeneralAthlete),
    Strength(StrengthAthlete),
    Running(RunningAthlete),
    Cycling(CyclingAthlete),
}

/// Why a piece of athlete data was rejected.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AthleteDataError {
    #[error("malformed {discipline} athlete data: {message}")]
    Malformed {
        discipline: Discipline,
        message: String,
    },
    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        field: &'static str,
        min: f64,
        max: f64,
        value: f64,
    },
    #[error("{0} must not be blank")]
    Blank(&'static str),
}

impl AthleteData {
    /// Decode the stored JSON document for `discipline`.
    pub fn from_value(
        discipline: Discipline,
        value: &serde_json::Value,
    ) -> Result<Self, AthleteDataError> {
        let malformed = |e: serde_json::Error| AthleteDataError::Malformed {
            discipline,
            message: e.to_string(),
        };
        let data = match discipline {
            Discipline::General => {
                Self::General(serde_json::from_value(value.clone()).map_err(malformed)?)
            }
            Discipline::Strength => {
                Self::Strength(serde_json::from_value(value.clone()).map_err(malformed)?)
            }
            Discipline::Running => {
                Self::Running(serde_json::from_value(value.clone()).map_err(malformed)?)
            }
            Discipline::Cycling => {
                Self::Cycling(serde_json::from_value(value.clone()).map_err(malformed)?)
            }
        };
        Ok(data)
    }

    /// Encode as the JSON document stored on the plan row.
    pub fn to_value(&self) -> serde_json::Value {
        let encoded = match self {
            Self::General(a) => serde_json::to_value(a),
            Self::Strength(a) => serde_json::to_value(a),
            Self::Running(a) => serde_json::to_value(a),
            Self::Cycling(a) => serde_json::to_value(a),
        };
        // Plain structs of strings and numbers always encode.
        encoded.unwrap_or(serde_json::Value::Null)
    }

    pub fn discipline(&self) -> Discipline {
        match self {
            Self::General(_) => Discipline::General,
            Self::Strength(_) => Discipline::Strength,
            Self::Running(_) => Discipline::Running,
            Self::Cycling(_) => Discipline::Cycling,
        }
    }

    pub fn profile(&self) -> &AthleteProfile {
        match self {
            Self::General(a) => &a.profile,
            Self::Strength(a) => &a.profile,
            Self::Running(a) => &a.profile,
            Self::Cycling(a) => &a.profile,
        }
    }

    /// Check the ranges the request layer accepts.
    pub fn validate(&self) -> Result<(), AthleteDataError> {
        let p = self.profile();
        if p.name.trim().is_empty() {
            return Err(AthleteDataError::Blank("name"));
        }
        if p.experience.trim().is_empty() {
            return Err(AthleteDataError::Blank("experience"));
        }
        if p.goal.trim().is_empty() {
            return Err(AthleteDataError::Blank("goal"));
        }
        in_range("age", p.age as f64, 14.0, 80.0)?;
        in_range("weightKg", p.weight_kg, 30.0, 200.0)?;
        in_range("heightCm", p.height_cm as f64, 100.0, 220.0)?;

        match self {
            Self::General(a) => in_range("availabilityDays", a.availability_days as f64, 3.0, 7.0),
            Self::Strength(a) => {
                if a.training_focus.trim().is_empty() {
                    return Err(AthleteDataError::Blank("trainingFocus"));
                }
                in_range("availabilityDays", a.availability_days as f64, 1.0, 7.0)?;
                in_range("sessionsPerWeek", a.sessions_per_week as f64, 1.0, 7.0)?;
                in_range("sessionMinutes", a.session_minutes as f64, 15.0, 240.0)
            }
            Self::Running(a) => {
                in_range("availableDays", a.available_days as f64, 3.0, 7.0)?;
                in_range("weeklyKm", a.weekly_km as f64, 0.0, 200.0)
            }
            Self::Cycling(a) => {
                in_range("availableDays", a.available_days as f64, 3.0, 7.0)?;
                in_range("weeklyHours", a.weekly_hours as f64, 0.0, 30.0)
            }
        }
    }
}

fn in_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), AthleteDataError> {
    if value < min || value > max {
        return Err(AthleteDataError::OutOfRange {
            field,
            min,
            max,
            value,
        });
    }
    Ok(())
}
