use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Value stored in `applied_intensity` for executions generated from a
/// rest-type exercise.
pub const REST_INTENSITY: &str = "rest";

/// Error returned when a text column or user input does not name a known
/// enum variant.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid {kind}: {value:?}")]
pub struct EnumParseError {
    pub kind: &'static str,
    pub value: String,
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Kind of exercise. `Rest` entries are scheduled like any other exercise but
/// carry the rest marker instead of an intensity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ExerciseType {
    Strength,
    Cardio,
    Mobility,
    Nutrition,
    Rest,
}

impl fmt::Display for ExerciseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Strength => "strength",
            Self::Cardio => "cardio",
            Self::Mobility => "mobility",
            Self::Nutrition => "nutrition",
            Self::Rest => "rest",
        };
        f.write_str(s)
    }
}

impl FromStr for ExerciseType {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "strength" => Ok(Self::Strength),
            "cardio" => Ok(Self::Cardio),
            "mobility" => Ok(Self::Mobility),
            "nutrition" => Ok(Self::Nutrition),
            "rest" => Ok(Self::Rest),
            other => Err(EnumParseError {
                kind: "exercise type",
                value: other.to_owned(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------

/// Status of a client's enrollment in an activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    Active,
    Cancelled,
    Completed,
}

impl fmt::Display for EnrollmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
        };
        f.write_str(s)
    }
}

impl FromStr for EnrollmentStatus {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "cancelled" => Ok(Self::Cancelled),
            "completed" => Ok(Self::Completed),
            other => Err(EnumParseError {
                kind: "enrollment status",
                value: other.to_owned(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// A coach-authored, purchasable plan.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Activity {
    pub id: Uuid,
    pub coach_id: Uuid,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

/// How many times an activity's weekly plan is replicated.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PeriodSpec {
    pub activity_id: Uuid,
    pub period_count: i32,
    pub updated_at: DateTime<Utc>,
}

/// One authored week of an activity. `days` is the raw day-slot JSON; the
/// engine decodes it through `regimen_core::plan::WeekPlan`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PlanWeek {
    pub activity_id: Uuid,
    pub week_number: i32,
    pub days: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

/// An exercise definition. Membership in activities lives in
/// `exercise_activities`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Exercise {
    pub id: i64,
    pub coach_id: Uuid,
    pub name: String,
    pub exercise_type: ExerciseType,
    pub base_intensity: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Exercise {
    /// The intensity value copied into an execution generated from this
    /// exercise right now.
    pub fn intensity_snapshot(&self) -> Option<String> {
        match self.exercise_type {
            ExerciseType::Rest => Some(REST_INTENSITY.to_owned()),
            _ => self.base_intensity.clone(),
        }
    }
}

/// Join row: exercise `exercise_id` is part of activity `activity_id`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ExerciseMembership {
    pub exercise_id: i64,
    pub activity_id: Uuid,
    pub metadata: serde_json::Value,
    pub added_at: DateTime<Utc>,
}

/// Membership map as exposed to API callers: `activity_id -> metadata`.
pub type MembershipMap = BTreeMap<Uuid, serde_json::Value>;

/// A client's enrollment in an activity.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Enrollment {
    pub id: Uuid,
    pub client_id: Uuid,
    pub activity_id: Uuid,
    pub status: EnrollmentStatus,
    pub created_at: DateTime<Utc>,
}

/// One scheduled exercise instance in a client's expanded plan.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ExecutionRecord {
    pub id: i64,
    pub client_id: Uuid,
    pub activity_id: Uuid,
    pub exercise_id: i64,
    pub exercise_name: String,
    pub period_index: i32,
    pub week_number: i32,
    /// ISO weekday, Monday = 1.
    pub day_of_week: i32,
    pub block: i32,
    pub order_in_block: i32,
    /// 1-based position in the expansion traversal.
    pub sequence: i32,
    pub applied_intensity: Option<String>,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(exercise_type: ExerciseType, base_intensity: Option<&str>) -> Exercise {
        Exercise {
            id: 1,
            coach_id: Uuid::new_v4(),
            name: "Back squat".to_string(),
            exercise_type,
            base_intensity: base_intensity.map(str::to_string),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn exercise_type_display_roundtrip() {
        let variants = [
            ExerciseType::Strength,
            ExerciseType::Cardio,
            ExerciseType::Mobility,
            ExerciseType::Nutrition,
            ExerciseType::Rest,
        ];
        for v in &variants {
            let parsed: ExerciseType = v.to_string().parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn exercise_type_invalid() {
        let err = "yoga".parse::<ExerciseType>().unwrap_err();
        assert_eq!(err.to_string(), "invalid exercise type: \"yoga\"");
    }

    #[test]
    fn enrollment_status_invalid() {
        assert!("paused".parse::<EnrollmentStatus>().is_err());
        assert_eq!(
            "cancelled".parse::<EnrollmentStatus>().unwrap(),
            EnrollmentStatus::Cancelled
        );
    }

    #[test]
    fn snapshot_uses_rest_marker_for_rest_exercises() {
        let rest = exercise(ExerciseType::Rest, Some("RPE 9"));
        assert_eq!(rest.intensity_snapshot().as_deref(), Some(REST_INTENSITY));
    }

    #[test]
    fn snapshot_copies_base_intensity() {
        let squat = exercise(ExerciseType::Strength, Some("75% 1RM"));
        assert_eq!(squat.intensity_snapshot().as_deref(), Some("75% 1RM"));

        let walk = exercise(ExerciseType::Cardio, None);
        assert_eq!(walk.intensity_snapshot(), None);
    }
}
