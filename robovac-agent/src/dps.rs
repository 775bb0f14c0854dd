//! Data points (DPS) of the S1 Pro and the vendor codes written to them
//!
//! This module handles:
//! - The [`DataPointSnapshot`] published by a device session
//! - Named data-point keys
//! - Opaque command/status blobs as named constants (base64 on the wire)
//! - Fan speed and cleaning mode vocabularies, including the vendor aliases
//!
//! Values the device emits outside the documented sets are vendor-unmodeled
//! state, never an error: lookups return `None` and callers fall back.

use crate::error::{Result, RobovacError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Data-point keys used by the S1 Pro (T2080).
pub mod keys {
    /// Power flag (bool).
    pub const POWER: &str = "2";
    /// Work mode string ("smart", "pause", "charge", ...).
    pub const MODE: &str = "5";
    /// Legacy status indicator; values >= 100 are error codes.
    pub const STATUS_INDICATOR: &str = "6";
    /// Second legacy status indicator.
    pub const STATUS_INDICATOR_AUX: &str = "7";
    /// Battery percentage.
    pub const BATTERY: &str = "8";
    /// Suction level (gentle/normal/strong/max).
    pub const FAN_SPEED: &str = "9";
    /// Mop water level (low/middle/high).
    pub const WATER_LEVEL: &str = "10";
    /// Command echo, opaque.
    pub const COMMAND: &str = "152";
    /// Primary status, opaque.
    pub const STATUS: &str = "153";
    /// Cleaning mode selector, opaque.
    pub const CLEANING_MODE: &str = "154";
    /// Auto-return-to-clean switch (bool).
    pub const AUTO_RETURN: &str = "156";
    /// Suction level as shown by the vendor app (Quiet/Standard/Turbo/Max).
    pub const FAN_SPEED_COMPANION: &str = "158";
    /// Battery percentage, secondary source.
    pub const BATTERY_FALLBACK: &str = "163";
    /// Lifetime statistics, opaque.
    pub const STATISTICS: &str = "167";
}

/// A single data-point value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DpsValue {
    Bool(bool),
    Int(i64),
    Str(String),
    /// Any shape the device sends that we do not model.
    Other(serde_json::Value),
}

impl DpsValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            DpsValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            DpsValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            DpsValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Integer value, also accepting decimal strings.
    pub fn to_int_lenient(&self) -> Option<i64> {
        match self {
            DpsValue::Int(i) => Some(*i),
            DpsValue::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Whether the value carries information (non-empty, non-zero, true).
    pub fn is_populated(&self) -> bool {
        match self {
            DpsValue::Bool(b) => *b,
            DpsValue::Int(i) => *i != 0,
            DpsValue::Str(s) => !s.is_empty(),
            DpsValue::Other(v) => !v.is_null(),
        }
    }
}

impl From<bool> for DpsValue {
    fn from(value: bool) -> Self {
        DpsValue::Bool(value)
    }
}

impl From<i64> for DpsValue {
    fn from(value: i64) -> Self {
        DpsValue::Int(value)
    }
}

impl From<&str> for DpsValue {
    fn from(value: &str) -> Self {
        DpsValue::Str(value.to_string())
    }
}

impl From<String> for DpsValue {
    fn from(value: String) -> Self {
        DpsValue::Str(value)
    }
}

impl fmt::Display for DpsValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DpsValue::Bool(b) => write!(f, "{b}"),
            DpsValue::Int(i) => write!(f, "{i}"),
            DpsValue::Str(s) => write!(f, "{s}"),
            DpsValue::Other(v) => write!(f, "{v}"),
        }
    }
}

/// One write: data-point key to value. Keys in a batch are independent.
pub type DpsBatch = BTreeMap<String, DpsValue>;

/// Full last-known device state.
///
/// Absent keys mean "unknown"; they are never filled with defaults. A
/// snapshot is immutable once published and replaced wholesale on each poll.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataPointSnapshot(BTreeMap<String, DpsValue>);

impl DataPointSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&DpsValue> {
        self.0.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(DpsValue::as_int)
    }

    pub fn bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(DpsValue::as_bool)
    }

    pub fn str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(DpsValue::as_str)
    }

    /// The key holds a populated value (see [`DpsValue::is_populated`]).
    pub fn is_populated(&self, key: &str) -> bool {
        self.get(key).is_some_and(DpsValue::is_populated)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &DpsValue)> {
        self.0.iter()
    }
}

impl From<BTreeMap<String, DpsValue>> for DataPointSnapshot {
    fn from(map: BTreeMap<String, DpsValue>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>, V: Into<DpsValue>> FromIterator<(K, V)> for DataPointSnapshot {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Codes written to [`keys::COMMAND`].
///
/// | code     | base64 | bytes      |
/// |----------|--------|------------|
/// | Start    | `AA==` | `00`       |
/// | Cleaning | `AggO` | `02 08 0e` |
/// | Pause    | `AggN` | `02 08 0d` |
/// | Return   | `AggG` | `02 08 06` |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandCode {
    Start,
    Cleaning,
    Pause,
    Return,
}

impl CommandCode {
    pub const ALL: [CommandCode; 4] = [
        CommandCode::Start,
        CommandCode::Cleaning,
        CommandCode::Pause,
        CommandCode::Return,
    ];

    pub fn encoded(self) -> &'static str {
        match self {
            CommandCode::Start => "AA==",
            CommandCode::Cleaning => "AggO",
            CommandCode::Pause => "AggN",
            CommandCode::Return => "AggG",
        }
    }

    pub fn from_encoded(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.encoded() == value)
    }

    /// Work mode the vendor app writes to [`keys::MODE`] alongside the code.
    pub fn companion_mode(self) -> Option<&'static str> {
        match self {
            CommandCode::Start => Some("smart"),
            CommandCode::Pause => Some("pause"),
            CommandCode::Return => Some("charge"),
            CommandCode::Cleaning => None,
        }
    }
}

/// Known values of [`keys::STATUS`]. Docked sub-states (charging, full,
/// water refill, ...) vary and are deliberately not listed.
///
/// | status    | base64         | bytes                        |
/// |-----------|----------------|------------------------------|
/// | Cleaning  | `BgoAEAUyAA==` | `06 0a 00 10 05 32 00`       |
/// | Paused    | `CAoAEAUyAggB` | `08 0a 00 10 05 32 02 08 01` |
/// | Returning | `BBAHQgA=`     | `04 10 07 42 00`             |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    Cleaning,
    Paused,
    Returning,
}

impl StatusCode {
    pub const ALL: [StatusCode; 3] = [
        StatusCode::Cleaning,
        StatusCode::Paused,
        StatusCode::Returning,
    ];

    pub fn encoded(self) -> &'static str {
        match self {
            StatusCode::Cleaning => "BgoAEAUyAA==",
            StatusCode::Paused => "CAoAEAUyAggB",
            StatusCode::Returning => "BBAHQgA=",
        }
    }

    pub fn from_encoded(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.encoded() == value)
    }
}

/// Suction levels offered to consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FanSpeed {
    Quiet,
    Standard,
    Turbo,
    Maximum,
}

impl FanSpeed {
    pub const ALL: [FanSpeed; 4] = [
        FanSpeed::Quiet,
        FanSpeed::Standard,
        FanSpeed::Turbo,
        FanSpeed::Maximum,
    ];

    pub fn label(self) -> &'static str {
        match self {
            FanSpeed::Quiet => "Quiet",
            FanSpeed::Standard => "Standard",
            FanSpeed::Turbo => "Turbo",
            FanSpeed::Maximum => "Maximum",
        }
    }

    /// Value for [`keys::FAN_SPEED`].
    pub fn primary_value(self) -> &'static str {
        match self {
            FanSpeed::Quiet => "gentle",
            FanSpeed::Standard => "normal",
            FanSpeed::Turbo => "strong",
            FanSpeed::Maximum => "max",
        }
    }

    /// Value for [`keys::FAN_SPEED_COMPANION`].
    pub fn companion_value(self) -> &'static str {
        match self {
            FanSpeed::Quiet => "Quiet",
            FanSpeed::Standard => "Standard",
            FanSpeed::Turbo => "Turbo",
            FanSpeed::Maximum => "Max",
        }
    }

    /// Map a value read back from either fan key.
    pub fn from_vendor(value: &str) -> Option<Self> {
        match value {
            "gentle" | "Quiet" => Some(FanSpeed::Quiet),
            "normal" | "Standard" | "middle" => Some(FanSpeed::Standard),
            "strong" | "Turbo" => Some(FanSpeed::Turbo),
            "max" | "Max" => Some(FanSpeed::Maximum),
            _ => None,
        }
    }
}

impl FromStr for FanSpeed {
    type Err = RobovacError;

    fn from_str(s: &str) -> Result<Self> {
        FanSpeed::ALL
            .into_iter()
            .find(|speed| speed.label().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| RobovacError::unrecognized("fan speed", s))
    }
}

impl fmt::Display for FanSpeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Cleaning modes: vacuum only, or vacuum and mop at a water level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleaningMode {
    Vacuum,
    MopLow,
    MopMiddle,
    MopHigh,
}

impl CleaningMode {
    pub const ALL: [CleaningMode; 4] = [
        CleaningMode::Vacuum,
        CleaningMode::MopLow,
        CleaningMode::MopMiddle,
        CleaningMode::MopHigh,
    ];

    pub fn key(self) -> &'static str {
        match self {
            CleaningMode::Vacuum => "vacuum",
            CleaningMode::MopLow => "mop_low",
            CleaningMode::MopMiddle => "mop_middle",
            CleaningMode::MopHigh => "mop_high",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            CleaningMode::Vacuum => "Vacuum Only",
            CleaningMode::MopLow => "Vacuum and Mop (Water Level: Low)",
            CleaningMode::MopMiddle => "Vacuum and Mop (Water Level: Medium)",
            CleaningMode::MopHigh => "Vacuum and Mop (Water Level: High)",
        }
    }

    /// Opaque selector written to [`keys::CLEANING_MODE`].
    pub fn selector(self) -> &'static str {
        match self {
            CleaningMode::Vacuum => "FAoKCgASABoAIgIIAhIGCAEQASAB",
            CleaningMode::MopLow => "FAoKCgIIAhIAGgAiABIGCAEQASAB",
            CleaningMode::MopMiddle => "FgoMCgIIAhIAGgAiAggBEgYIARABIAE=",
            CleaningMode::MopHigh => "FgoMCgIIAhIAGgAiAggCEgYIARABIAE=",
        }
    }

    /// Water level for [`keys::WATER_LEVEL`]; only mopping modes have one.
    pub fn water_level(self) -> Option<&'static str> {
        match self {
            CleaningMode::Vacuum => None,
            CleaningMode::MopLow => Some("low"),
            CleaningMode::MopMiddle => Some("middle"),
            CleaningMode::MopHigh => Some("high"),
        }
    }

    /// Resolve the current mode from the selector and water-level keys.
    pub fn from_dps(selector: &str, water_level: Option<&str>) -> Option<Self> {
        let water_level = water_level.filter(|w| matches!(*w, "low" | "middle" | "high"));
        CleaningMode::ALL
            .into_iter()
            .find(|mode| mode.selector() == selector && mode.water_level() == water_level)
            .or_else(|| {
                (selector == CleaningMode::Vacuum.selector()).then_some(CleaningMode::Vacuum)
            })
    }
}

impl FromStr for CleaningMode {
    type Err = RobovacError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        CleaningMode::ALL
            .into_iter()
            .find(|mode| mode.key() == s || mode.label() == s)
            .ok_or_else(|| RobovacError::unrecognized("cleaning mode", s))
    }
}

impl fmt::Display for CleaningMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
