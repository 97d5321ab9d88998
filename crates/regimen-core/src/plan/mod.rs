//! Plan data: typed day slots, the TOML authoring format, and the service
//! layer that stores and loads plans.

pub mod parser;
pub mod service;
pub mod slots;
pub mod toml_format;

pub use parser::{PlanParseError, parse_plan_toml};
pub use service::{
    ActivityPlan, DEFAULT_PERIOD_COUNT, ImportedPlan, decode_weeks, import_plan,
    load_activity_plan, materialize_plan, put_plan_week,
};
pub use slots::{DaySlot, ExerciseRef, SlotError, WeekPlan, Weekday};
pub use toml_format::{ActivityMeta, ExerciseToml, PlanToml, WeekToml};
