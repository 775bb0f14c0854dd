//! Snapshots for the states the S1 Pro actually reports.

use robovac_agent::dps::{
    keys, CleaningMode, CommandCode, DataPointSnapshot, DpsValue, StatusCode,
};

/// Statistics value holding 100 sessions and 300 m².
pub const STATISTICS_SAMPLE: &str = "EAoECAEQAhIGCAEQAiCsAhhk";

/// On the dock, fully charged. The dock sub-status is one the classifier
/// does not list.
pub fn docked() -> DataPointSnapshot {
    [
        (keys::POWER, DpsValue::from(true)),
        (keys::MODE, "charge".into()),
        (keys::BATTERY, 100i64.into()),
        (keys::FAN_SPEED, "normal".into()),
        (keys::FAN_SPEED_COMPANION, "Standard".into()),
        (keys::AUTO_RETURN, true.into()),
        (keys::CLEANING_MODE, CleaningMode::Vacuum.selector().into()),
        (keys::STATISTICS, STATISTICS_SAMPLE.into()),
        (keys::STATUS, "BBoCCAE=".into()),
    ]
    .into_iter()
    .collect()
}

pub fn cleaning() -> DataPointSnapshot {
    [
        (keys::POWER, DpsValue::from(true)),
        (keys::MODE, "smart".into()),
        (keys::BATTERY, 83i64.into()),
        (keys::FAN_SPEED, "strong".into()),
        (keys::FAN_SPEED_COMPANION, "Turbo".into()),
        (keys::COMMAND, CommandCode::Cleaning.encoded().into()),
        (keys::STATUS, StatusCode::Cleaning.encoded().into()),
    ]
    .into_iter()
    .collect()
}

pub fn paused() -> DataPointSnapshot {
    [
        (keys::MODE, DpsValue::from("pause")),
        (keys::BATTERY, 70i64.into()),
        (keys::COMMAND, CommandCode::Pause.encoded().into()),
        (keys::STATUS, StatusCode::Paused.encoded().into()),
    ]
    .into_iter()
    .collect()
}

pub fn returning() -> DataPointSnapshot {
    [
        (keys::MODE, DpsValue::from("charge")),
        (keys::BATTERY, 40i64.into()),
        (keys::COMMAND, CommandCode::Return.encoded().into()),
        (keys::STATUS, StatusCode::Returning.encoded().into()),
    ]
    .into_iter()
    .collect()
}

/// Older firmware: only the legacy indicators, here reporting error 103.
pub fn legacy_error() -> DataPointSnapshot {
    [
        (keys::STATUS_INDICATOR, DpsValue::from(103i64)),
        (keys::STATUS_INDICATOR_AUX, 0i64.into()),
        (keys::BATTERY, 55i64.into()),
    ]
    .into_iter()
    .collect()
}

