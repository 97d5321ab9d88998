//! Typed day-slot model for a plan week.
//!
//! Stored plan weeks carry a JSON document of the shape
//! `{day: {block: [entry, ...]}}`. Entries come in two flavours, bare
//! exercise ids (`[10, 11]`) and objects (`[{"id": 10, "order": 1}]`).
//! Both are decoded here into [`ExerciseRef`] and nothing past this module
//! ever sees the raw shape. Encoding always writes the object form.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// Day of the week, ordered Monday first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Weekday {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl Weekday {
    /// All days in calendar order.
    pub const ALL: [Weekday; 7] = [
        Self::Monday,
        Self::Tuesday,
        Self::Wednesday,
        Self::Thursday,
        Self::Friday,
        Self::Saturday,
        Self::Sunday,
    ];

    /// ISO-8601 day number, Monday = 1.
    pub fn iso_number(self) -> i32 {
        match self {
            Self::Monday => 1,
            Self::Tuesday => 2,
            Self::Wednesday => 3,
            Self::Thursday => 4,
            Self::Friday => 5,
            Self::Saturday => 6,
            Self::Sunday => 7,
        }
    }

    pub fn from_iso_number(n: i32) -> Option<Self> {
        Self::ALL.get(usize::try_from(n).ok()?.checked_sub(1)?).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Monday => "monday",
            Self::Tuesday => "tuesday",
            Self::Wednesday => "wednesday",
            Self::Thursday => "thursday",
            Self::Friday => "friday",
            Self::Saturday => "saturday",
            Self::Sunday => "sunday",
        }
    }
}

impl fmt::Display for Weekday {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Weekday {
    type Err = SlotError;

    /// Accepts English names and the Spanish names used by older plans, in
    /// any case, with or without accents.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_lowercase();
        let day = match key.as_str() {
            "monday" | "lunes" => Self::Monday,
            "tuesday" | "martes" => Self::Tuesday,
            "wednesday" | "miercoles" | "miércoles" => Self::Wednesday,
            "thursday" | "jueves" => Self::Thursday,
            "friday" | "viernes" => Self::Friday,
            "saturday" | "sabado" | "sábado" => Self::Saturday,
            "sunday" | "domingo" => Self::Sunday,
            _ => {
                return Err(SlotError::new(
                    format!("days.{s}"),
                    "not a day of the week",
                ));
            }
        };
        Ok(day)
    }
}

impl Serialize for Weekday {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Weekday {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------

/// Malformed day-slot data. `path` locates the offending value, e.g.
/// `days.monday.2[1].id`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{path}: {message}")]
pub struct SlotError {
    pub path: String,
    pub message: String,
}

impl SlotError {
    fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// One exercise reference inside a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExerciseRef {
    #[serde(rename = "id")]
    pub exercise_id: i64,
    pub order: i32,
}

/// The blocks of a single day, keyed by block number.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DaySlot {
    blocks: BTreeMap<i32, Vec<ExerciseRef>>,
}

impl DaySlot {
    /// Append an exercise to a block, creating the block if needed.
    pub fn push(&mut self, block: i32, entry: ExerciseRef) {
        self.blocks.entry(block).or_default().push(entry);
    }

    /// Whether no block of this day holds an exercise.
    pub fn is_empty(&self) -> bool {
        self.blocks.values().all(Vec::is_empty)
    }

    pub fn block_numbers(&self) -> impl Iterator<Item = i32> + '_ {
        self.blocks.keys().copied()
    }

    pub fn block(&self, block: i32) -> Option<&[ExerciseRef]> {
        self.blocks.get(&block).map(Vec::as_slice)
    }

    /// Entries in traversal order: block ascending, then `order` ascending.
    /// Entries sharing an `order` keep their stored position.
    pub fn ordered_entries(&self) -> Vec<(i32, ExerciseRef)> {
        let mut out = Vec::new();
        for (&block, entries) in &self.blocks {
            let mut sorted = entries.clone();
            sorted.sort_by_key(|e| e.order);
            out.extend(sorted.into_iter().map(|e| (block, e)));
        }
        out
    }

    /// Remove every entry whose exercise is in `removed`, dropping blocks
    /// left empty. Returns how many entries were removed.
    pub fn retain_exercises(&mut self, removed: &HashSet<i64>) -> usize {
        let mut count = 0;
        for entries in self.blocks.values_mut() {
            let before = entries.len();
            entries.retain(|e| !removed.contains(&e.exercise_id));
            count += before - entries.len();
        }
        self.blocks.retain(|_, entries| !entries.is_empty());
        count
    }

    fn entry_count(&self) -> usize {
        self.blocks.values().map(Vec::len).sum()
    }
}

/// A full week: one [`DaySlot`] per weekday.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WeekPlan {
    days: BTreeMap<Weekday, DaySlot>,
}

impl WeekPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn day(&self, day: Weekday) -> Option<&DaySlot> {
        self.days.get(&day)
    }

    /// Days present in the week, Monday first.
    pub fn days(&self) -> impl Iterator<Item = (Weekday, &DaySlot)> + '_ {
        self.days.iter().map(|(day, slot)| (*day, slot))
    }

    pub fn day_mut(&mut self, day: Weekday) -> &mut DaySlot {
        self.days.entry(day).or_default()
    }

    /// Whether all seven days are empty. Such a week is deleted rather than
    /// stored.
    pub fn is_empty(&self) -> bool {
        self.days.values().all(DaySlot::is_empty)
    }

    /// Number of `(day, block, exercise)` entries in the week.
    pub fn entry_count(&self) -> usize {
        self.days.values().map(DaySlot::entry_count).sum()
    }

    /// Every exercise referenced anywhere in the week.
    pub fn exercise_ids(&self) -> BTreeSet<i64> {
        self.days
            .values()
            .flat_map(|d| d.blocks.values().flatten().map(|e| e.exercise_id))
            .collect()
    }

    /// Entries in traversal order: day Monday..Sunday, then block, then order.
    pub fn ordered_entries(&self) -> Vec<(Weekday, i32, ExerciseRef)> {
        self.days
            .iter()
            .flat_map(|(&day, slot)| {
                slot.ordered_entries()
                    .into_iter()
                    .map(move |(block, e)| (day, block, e))
            })
            .collect()
    }

    /// Remove every entry whose exercise is in `removed`, across all days.
    /// Returns how many entries were removed.
    pub fn retain_exercises(&mut self, removed: &HashSet<i64>) -> usize {
        self.days
            .values_mut()
            .map(|slot| slot.retain_exercises(removed))
            .sum()
    }

    /// Decode stored day-slot JSON, accepting both entry representations.
    pub fn from_json(value: &Value) -> Result<Self, SlotError> {
        let days = match value {
            Value::Null => return Ok(Self::default()),
            Value::Object(map) => map,
            _ => return Err(SlotError::new("days", "expected an object keyed by day")),
        };

        let mut week = Self::default();
        for (day_key, day_value) in days {
            let day: Weekday = day_key.parse()?;
            if week.days.contains_key(&day) {
                return Err(SlotError::new(
                    format!("days.{day_key}"),
                    format!("{day} appears more than once"),
                ));
            }
            let slot = decode_day(day_key, day_value)?;
            week.days.insert(day, slot);
        }
        Ok(week)
    }

    /// Encode in canonical form: all seven days, object entries, no empty
    /// blocks.
    pub fn to_json(&self) -> Value {
        let mut days = Map::new();
        for day in Weekday::ALL {
            let mut blocks = Map::new();
            if let Some(slot) = self.days.get(&day) {
                for (block, entries) in &slot.blocks {
                    if entries.is_empty() {
                        continue;
                    }
                    let list = entries
                        .iter()
                        .map(|e| serde_json::json!({ "id": e.exercise_id, "order": e.order }))
                        .collect();
                    blocks.insert(block.to_string(), Value::Array(list));
                }
            }
            days.insert(day.as_str().to_string(), Value::Object(blocks));
        }
        Value::Object(days)
    }
}

fn decode_day(day_key: &str, value: &Value) -> Result<DaySlot, SlotError> {
    let blocks = match value {
        Value::Null => return Ok(DaySlot::default()),
        Value::Object(map) => map,
        _ => {
            return Err(SlotError::new(
                format!("days.{day_key}"),
                "expected an object keyed by block number",
            ));
        }
    };

    let mut slot = DaySlot::default();
    for (block_key, block_value) in blocks {
        let path = format!("days.{day_key}.{block_key}");
        let block: i32 = block_key
            .trim()
            .parse()
            .ok()
            .filter(|n| *n >= 1)
            .ok_or_else(|| SlotError::new(&path, "block key must be a positive integer"))?;

        let entries = match block_value {
            Value::Null => continue,
            Value::Array(entries) => entries,
            _ => return Err(SlotError::new(&path, "expected a list of exercises")),
        };

        for (idx, entry) in entries.iter().enumerate() {
            let position = i32::try_from(idx + 1)
                .map_err(|_| SlotError::new(&path, "too many entries in block"))?;
            let decoded = decode_entry(&format!("{path}[{idx}]"), entry, position)?;
            slot.push(block, decoded);
        }
    }
    Ok(slot)
}

fn decode_entry(path: &str, entry: &Value, position: i32) -> Result<ExerciseRef, SlotError> {
    match entry {
        Value::Object(fields) => {
            let id_value = ["id", "exercise_id", "exerciseId"]
                .iter()
                .find_map(|k| fields.get(*k))
                .ok_or_else(|| SlotError::new(path, "entry has no id"))?;
            let exercise_id = decode_id(&format!("{path}.id"), id_value)?;
            let order = match fields.get("order") {
                None | Some(Value::Null) => position,
                Some(v) => v
                    .as_i64()
                    .and_then(|n| i32::try_from(n).ok())
                    .ok_or_else(|| SlotError::new(format!("{path}.order"), "expected an integer"))?,
            };
            Ok(ExerciseRef { exercise_id, order })
        }
        other => Ok(ExerciseRef {
            exercise_id: decode_id(path, other)?,
            order: position,
        }),
    }
}

fn decode_id(path: &str, value: &Value) -> Result<i64, SlotError> {
    let id = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    id.filter(|id| *id > 0)
        .ok_or_else(|| SlotError::new(path, "exercise id must be a positive integer"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
