//! TOML format types for plan authoring files.
//!
//! ```toml
//! [activity]
//! title = "Strength base"
//! coach_id = "5f0c..."
//! periods = 2
//!
//! [[exercises]]
//! key = "squat"
//! name = "Back squat"
//! type = "strength"
//! intensity = "RPE 8"
//!
//! [[exercises]]
//! key = "plank"
//! existing_id = 42        # share an exercise that already exists
//!
//! [[weeks]]
//! number = 1
//! [weeks.days.monday]
//! 1 = ["squat"]
//! 2 = ["plank"]
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::slots::Weekday;

/// Top-level structure of a plan file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanToml {
    pub activity: ActivityMeta,
    #[serde(default)]
    pub exercises: Vec<ExerciseToml>,
    #[serde(default)]
    pub weeks: Vec<WeekToml>,
}

/// Activity-level metadata in `[activity]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityMeta {
    /// Activity UUID. Absent in authored files, written by `plan show`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    pub title: String,
    pub coach_id: Uuid,
    /// How many times the weekly plan repeats.
    #[serde(default = "default_periods")]
    pub periods: i32,
}

/// One `[[exercises]]` entry. Either defines a new exercise (`name` and
/// `type` required) or shares an existing one through `existing_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExerciseToml {
    /// File-local name used to reference the exercise from weeks.
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// strength, cardio, mobility, nutrition or rest.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub exercise_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intensity: Option<String>,
}

/// One `[[weeks]]` entry: block number -> exercise keys, per day.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WeekToml {
    pub number: i32,
    #[serde(default)]
    pub days: BTreeMap<Weekday, BTreeMap<String, Vec<String>>>,
}

fn default_periods() -> i32 {
    1
}
