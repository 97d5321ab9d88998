//! Query functions, one module per table family.

pub mod activities;
pub mod enrollments;
pub mod executions;
pub mod exercises;
pub mod plan_weeks;
