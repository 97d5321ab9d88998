//! Plan TOML parser with validation.
//!
//! Parses a plan file into a [`PlanToml`] and validates:
//! - The activity has a title and `periods >= 1`.
//! - Exercise keys are unique; new exercises have a name and a valid type.
//! - Weeks exist, are numbered densely from 1, and none is empty.
//! - Block keys are positive integers and every referenced key is defined.

use std::collections::HashSet;

use regimen_db::models::ExerciseType;
use thiserror::Error;

use super::toml_format::PlanToml;

/// Errors that can occur during plan parsing and validation.
#[derive(Debug, Error)]
pub enum PlanParseError {
    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("activity title must not be empty")]
    EmptyTitle,

    #[error("periods must be at least 1, got {0}")]
    InvalidPeriods(i32),

    #[error("plan must contain at least one week")]
    NoWeeks,

    #[error("week numbers must run 1..={expected_last} without gaps, found {found:?}")]
    WeeksNotDense { expected_last: usize, found: Vec<i32> },

    #[error("week {0} has no exercises")]
    EmptyWeek(i32),

    #[error("duplicate exercise key: {0:?}")]
    DuplicateExerciseKey(String),

    #[error("exercise {key:?} needs a {field} (or an existing_id)")]
    MissingExerciseField { key: String, field: &'static str },

    #[error("invalid type {value:?} on exercise {key:?} (expected strength, cardio, mobility, nutrition, or rest)")]
    InvalidExerciseType { key: String, value: String },

    #[error("week {week} {day} references unknown exercise {key:?}")]
    UnknownExercise { week: i32, day: String, key: String },

    #[error("week {week} {day} has invalid block {block:?} (expected a positive integer)")]
    InvalidBlock { week: i32, day: String, block: String },
}

/// Parse and validate a plan file.
pub fn parse_plan_toml(content: &str) -> Result<PlanToml, PlanParseError> {
    let plan: PlanToml = toml::from_str(content)?;
    validate(&plan)?;
    Ok(plan)
}

/// Parse a block key from a plan file.
pub fn parse_block_key(key: &str) -> Option<i32> {
    key.trim().parse().ok().filter(|n| *n >= 1)
}

fn validate(plan: &PlanToml) -> Result<(), PlanParseError> {
    if plan.activity.title.trim().is_empty() {
        return Err(PlanParseError::EmptyTitle);
    }
    if plan.activity.periods < 1 {
        return Err(PlanParseError::InvalidPeriods(plan.activity.periods));
    }

    let mut keys = HashSet::new();
    for exercise in &plan.exercises {
        if !keys.insert(exercise.key.as_str()) {
            return Err(PlanParseError::DuplicateExerciseKey(exercise.key.clone()));
        }
        if exercise.existing_id.is_some() {
            continue;
        }
        if exercise.name.as_deref().is_none_or(|n| n.trim().is_empty()) {
            return Err(PlanParseError::MissingExerciseField {
                key: exercise.key.clone(),
                field: "name",
            });
        }
        let Some(ty) = exercise.exercise_type.as_deref() else {
            return Err(PlanParseError::MissingExerciseField {
                key: exercise.key.clone(),
                field: "type",
            });
        };
        if ty.parse::<ExerciseType>().is_err() {
            return Err(PlanParseError::InvalidExerciseType {
                key: exercise.key.clone(),
                value: ty.to_string(),
            });
        }
    }

    if plan.weeks.is_empty() {
        return Err(PlanParseError::NoWeeks);
    }

    let mut numbers: Vec<i32> = plan.weeks.iter().map(|w| w.number).collect();
    numbers.sort_unstable();
    let dense = numbers
        .iter()
        .enumerate()
        .all(|(idx, n)| usize::try_from(*n).is_ok_and(|n| n == idx + 1));
    if !dense {
        return Err(PlanParseError::WeeksNotDense {
            expected_last: numbers.len(),
            found: numbers,
        });
    }

    for week in &plan.weeks {
        let mut entries = 0usize;
        for (day, blocks) in &week.days {
            for (block, refs) in blocks {
                if parse_block_key(block).is_none() {
                    return Err(PlanParseError::InvalidBlock {
                        week: week.number,
                        day: day.to_string(),
                        block: block.clone(),
                    });
                }
                for key in refs {
                    if !keys.contains(key.as_str()) {
                        return Err(PlanParseError::UnknownExercise {
                            week: week.number,
                            day: day.to_string(),
                            key: key.clone(),
                        });
                    }
                }
                entries += refs.len();
            }
        }
        if entries == 0 {
            return Err(PlanParseError::EmptyWeek(week.number));
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::slots::Weekday;

    const COACH: &str = "6b1f5b9e-4a43-4f5e-9d7e-3c0a8f2b1d11";

    fn plan_with(body: &str) -> String {
        format!(
            "[activity]\ntitle = \"Base\"\ncoach_id = \"{COACH}\"\nperiods = 2\n\n\
             [[exercises]]\nkey = \"squat\"\nname = \"Back squat\"\ntype = \"strength\"\n\n\
             [[exercises]]\nkey = \"plank\"\nexisting_id = 42\n\n{body}"
        )
    }

    #[test]
    fn parses_valid_plan() {
        let toml = plan_with(
            "[[weeks]]\nnumber = 1\n[weeks.days.monday]\n1 = [\"squat\", \"plank\"]\n\n\
             [[weeks]]\nnumber = 2\n[weeks.days.lunes]\n2 = [\"plank\"]\n",
        );
        let plan = parse_plan_toml(&toml).expect("should parse");
        assert_eq!(plan.activity.periods, 2);
        assert_eq!(plan.exercises.len(), 2);
        assert_eq!(plan.weeks.len(), 2);
        assert_eq!(
            plan.weeks[0].days[&Weekday::Monday]["1"],
            vec!["squat".to_string(), "plank".to_string()]
        );
        assert!(plan.weeks[1].days.contains_key(&Weekday::Monday));
    }

    #[test]
    fn periods_default_to_one() {
        let toml = format!(
            "[activity]\ntitle = \"Base\"\ncoach_id = \"{COACH}\"\n\n\
             [[exercises]]\nkey = \"a\"\nname = \"A\"\ntype = \"cardio\"\n\n\
             [[weeks]]\nnumber = 1\n[weeks.days.friday]\n1 = [\"a\"]\n"
        );
        let plan = parse_plan_toml(&toml).unwrap();
        assert_eq!(plan.activity.periods, 1);
    }

    #[test]
    fn rejects_missing_weeks() {
        let err = parse_plan_toml(&plan_with("")).unwrap_err();
        assert!(matches!(err, PlanParseError::NoWeeks), "{err}");
    }

    #[test]
    fn rejects_gaps_in_week_numbers() {
        let toml = plan_with(
            "[[weeks]]\nnumber = 1\n[weeks.days.monday]\n1 = [\"squat\"]\n\n\
             [[weeks]]\nnumber = 3\n[weeks.days.monday]\n1 = [\"squat\"]\n",
        );
        let err = parse_plan_toml(&toml).unwrap_err();
        assert!(matches!(err, PlanParseError::WeeksNotDense { .. }), "{err}");
    }

    #[test]
    fn rejects_unknown_exercise_reference() {
        let toml = plan_with("[[weeks]]\nnumber = 1\n[weeks.days.monday]\n1 = [\"deadlift\"]\n");
        let err = parse_plan_toml(&toml).unwrap_err();
        match err {
            PlanParseError::UnknownExercise { week, day, key } => {
                assert_eq!(week, 1);
                assert_eq!(day, "monday");
                assert_eq!(key, "deadlift");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rejects_invalid_block_key() {
        let toml = plan_with("[[weeks]]\nnumber = 1\n[weeks.days.monday]\n0 = [\"squat\"]\n");
        let err = parse_plan_toml(&toml).unwrap_err();
        assert!(matches!(err, PlanParseError::InvalidBlock { .. }), "{err}");
    }

    #[test]
    fn rejects_empty_week() {
        let toml = plan_with("[[weeks]]\nnumber = 1\n[weeks.days.monday]\n1 = []\n");
        let err = parse_plan_toml(&toml).unwrap_err();
        assert!(matches!(err, PlanParseError::EmptyWeek(1)), "{err}");
    }

    #[test]
    fn rejects_duplicate_exercise_keys() {
        let toml = format!(
            "[activity]\ntitle = \"Base\"\ncoach_id = \"{COACH}\"\n\n\
             [[exercises]]\nkey = \"a\"\nexisting_id = 1\n\n\
             [[exercises]]\nkey = \"a\"\nexisting_id = 2\n\n\
             [[weeks]]\nnumber = 1\n[weeks.days.monday]\n1 = [\"a\"]\n"
        );
        let err = parse_plan_toml(&toml).unwrap_err();
        assert!(matches!(err, PlanParseError::DuplicateExerciseKey(_)), "{err}");
    }

    #[test]
    fn rejects_new_exercise_without_type() {
        let toml = format!(
            "[activity]\ntitle = \"Base\"\ncoach_id = \"{COACH}\"\n\n\
             [[exercises]]\nkey = \"a\"\nname = \"A\"\n\n\
             [[weeks]]\nnumber = 1\n[weeks.days.monday]\n1 = [\"a\"]\n"
        );
        let err = parse_plan_toml(&toml).unwrap_err();
        assert!(
            matches!(err, PlanParseError::MissingExerciseField { field: "type", .. }),
            "{err}"
        );
    }

    #[test]
    fn rejects_invalid_exercise_type() {
        let toml = format!(
            "[activity]\ntitle = \"Base\"\ncoach_id = \"{COACH}\"\n\n\
             [[exercises]]\nkey = \"a\"\nname = \"A\"\ntype = \"yoga\"\n\n\
             [[weeks]]\nnumber = 1\n[weeks.days.monday]\n1 = [\"a\"]\n"
        );
        let err = parse_plan_toml(&toml).unwrap_err();
        assert!(matches!(err, PlanParseError::InvalidExerciseType { .. }), "{err}");
    }

    #[test]
    fn rejects_zero_periods() {
        let toml = format!(
            "[activity]\ntitle = \"Base\"\ncoach_id = \"{COACH}\"\nperiods = 0\n\n\
             [[exercises]]\nkey = \"a\"\nexisting_id = 3\n\n\
             [[weeks]]\nnumber = 1\n[weeks.days.monday]\n1 = [\"a\"]\n"
        );
        let err = parse_plan_toml(&toml).unwrap_err();
        assert!(matches!(err, PlanParseError::InvalidPeriods(0)), "{err}");
    }
}
