//! Consumer-facing view of a device
//!
//! Everything a dashboard or the MQTT state topic shows, derived from the
//! latest snapshot. A missing snapshot (device unavailable) yields unknown
//! everywhere; a missing key yields unknown for that field only.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::activity::{self, ActivityState};
use crate::dps::{
    keys, CleaningMode, CommandCode, DataPointSnapshot, DpsValue, FanSpeed, StatusCode,
};
use crate::telemetry::TelemetryStats;

/// Work modes reported while the vacuum sits on its dock.
const CHARGING_MODES: [&str; 3] = ["charge", "docked", "Charging"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunningStatus {
    Running,
    Stopped,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceView {
    pub device_id: String,
    pub available: bool,
    pub activity: ActivityState,
    pub battery: Option<u8>,
    pub charging: bool,
    pub fan_speed: Option<FanSpeed>,
    pub cleaning_mode: Option<CleaningMode>,
    pub running_status: RunningStatus,
    pub error_code: Option<String>,
    pub auto_return: Option<bool>,
    pub telemetry: TelemetryStats,
    pub updated_at: DateTime<Utc>,
}

impl DeviceView {
    pub fn new(device_id: impl Into<String>, snapshot: Option<&DataPointSnapshot>) -> Self {
        let device_id = device_id.into();
        let Some(snapshot) = snapshot else {
            return Self::unavailable(device_id);
        };

        Self {
            device_id,
            available: true,
            activity: activity::classify(snapshot),
            battery: battery(snapshot),
            charging: snapshot
                .str(keys::MODE)
                .is_some_and(|mode| CHARGING_MODES.contains(&mode)),
            fan_speed: fan_speed(snapshot),
            cleaning_mode: snapshot
                .str(keys::CLEANING_MODE)
                .and_then(|selector| {
                    CleaningMode::from_dps(selector, snapshot.str(keys::WATER_LEVEL))
                }),
            running_status: running_status(snapshot),
            error_code: snapshot
                .int(keys::STATUS_INDICATOR)
                .filter(|code| *code >= activity::ERROR_CODE_THRESHOLD)
                .map(|code| code.to_string()),
            auto_return: snapshot.get(keys::AUTO_RETURN).and_then(switch_state),
            telemetry: TelemetryStats::from_snapshot(snapshot),
            updated_at: Utc::now(),
        }
    }

    pub fn unavailable(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            available: false,
            activity: ActivityState::Unknown,
            battery: None,
            charging: false,
            fan_speed: None,
            cleaning_mode: None,
            running_status: RunningStatus::Unknown,
            error_code: None,
            auto_return: None,
            telemetry: TelemetryStats::unknown(),
            updated_at: Utc::now(),
        }
    }
}

/// Battery from the primary key, else the secondary one. Out-of-range values are dropped.
pub fn battery(snapshot: &DataPointSnapshot) -> Option<u8> {
    [keys::BATTERY, keys::BATTERY_FALLBACK]
        .into_iter()
        .find_map(|key| {
            snapshot
                .get(key)
                .and_then(DpsValue::to_int_lenient)
                .filter(|level| (0..=100).contains(level))
        })
        .and_then(|level| u8::try_from(level).ok())
}

fn fan_speed(snapshot: &DataPointSnapshot) -> Option<FanSpeed> {
    [keys::FAN_SPEED, keys::FAN_SPEED_COMPANION]
        .into_iter()
        .find_map(|key| snapshot.str(key).and_then(FanSpeed::from_vendor))
}

fn running_status(snapshot: &DataPointSnapshot) -> RunningStatus {
    match snapshot.str(keys::STATUS).filter(|s| !s.is_empty()) {
        Some(status) if StatusCode::from_encoded(status).is_some() => RunningStatus::Running,
        Some(_) => RunningStatus::Stopped,
        None => match snapshot.bool(keys::POWER) {
            Some(true) => RunningStatus::Running,
            Some(false) => RunningStatus::Stopped,
            None => RunningStatus::Unknown,
        },
    }
}

fn switch_state(value: &DpsValue) -> Option<bool> {
    match value {
        DpsValue::Bool(b) => Some(*b),
        DpsValue::Int(1) => Some(true),
        DpsValue::Int(0) => Some(false),
        DpsValue::Str(s) => match s.to_ascii_lowercase().as_str() {
            "true" | "1" | "on" => Some(true),
            "false" | "0" | "off" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Whether the vacuum is actively cleaning, judged from the raw fields in
/// the same order of trust as the classifier.
pub fn is_running(snapshot: &DataPointSnapshot) -> bool {
    if let Some(status) = snapshot.str(keys::STATUS).filter(|s| !s.is_empty()) {
        return status == StatusCode::Cleaning.encoded();
    }
    if let Some(command) = snapshot.str(keys::COMMAND).filter(|s| !s.is_empty()) {
        return command == CommandCode::Cleaning.encoded();
    }
    snapshot.int(keys::STATUS_INDICATOR) == Some(2)
        && snapshot.int(keys::STATUS_INDICATOR_AUX) == Some(3)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(json: &str) -> DataPointSnapshot {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_cleaning_status_without_battery() {
        let view = DeviceView::new("dev", Some(&snapshot(r#"{"153": "BgoAEAUyAA=="}"#)));
        assert_eq!(view.activity, ActivityState::Cleaning);
        assert_eq!(view.battery, None);
        assert_eq!(view.running_status, RunningStatus::Running);
    }

    #[test]
    fn test_battery_fallback_and_range() {
        assert_eq!(battery(&snapshot(r#"{"163": 64}"#)), Some(64));
        assert_eq!(battery(&snapshot(r#"{"8": "88", "163": 10}"#)), Some(88));
        assert_eq!(battery(&snapshot(r#"{"8": 140, "163": 70}"#)), Some(70));
        assert_eq!(battery(&snapshot(r#"{"8": "full"}"#)), None);
    }

    #[test]
    fn test_fan_speed_and_charging() {
        let view = DeviceView::new(
            "dev",
            Some(&snapshot(r#"{"5": "charge", "9": "strong", "158": "Quiet"}"#)),
        );
        assert!(view.charging);
        assert_eq!(view.fan_speed, Some(FanSpeed::Turbo));

        let view = DeviceView::new("dev", Some(&snapshot(r#"{"158": "Max"}"#)));
        assert_eq!(view.fan_speed, Some(FanSpeed::Maximum));
        assert!(!view.charging);
    }

    #[test]
    fn test_error_code_and_auto_return() {
        let view = DeviceView::new("dev", Some(&snapshot(r#"{"6": 105, "156": "on"}"#)));
        assert_eq!(view.error_code.as_deref(), Some("105"));
        assert_eq!(view.activity, ActivityState::Error);
        assert_eq!(view.auto_return, Some(true));
    }

    #[test]
    fn test_running_status_from_power_or_unmodeled_status() {
        assert_eq!(
            running_status(&snapshot(r#"{"153": "CgoAEAkyAggCUgA=", "2": true}"#)),
            RunningStatus::Stopped
        );
        assert_eq!(
            running_status(&snapshot(r#"{"2": false}"#)),
            RunningStatus::Stopped
        );
        assert_eq!(running_status(&snapshot("{}")), RunningStatus::Unknown);
    }

    #[test]
    fn test_is_running_ladder() {
        assert!(is_running(&snapshot(r#"{"153": "BgoAEAUyAA==", "152": "AggN"}"#)));
        assert!(!is_running(&snapshot(r#"{"153": "BBAHQgA=", "6": 2, "7": 3}"#)));
        assert!(is_running(&snapshot(r#"{"152": "AggO"}"#)));
        assert!(is_running(&snapshot(r#"{"6": 2, "7": 3}"#)));
        assert!(!is_running(&snapshot("{}")));
    }

    #[test]
    fn test_unavailable_view() {
        let view = DeviceView::new("dev", None);
        assert!(!view.available);
        assert_eq!(view.activity, ActivityState::Unknown);
        assert_eq!(view.telemetry, TelemetryStats::unknown());
    }

    #[test]
    fn test_view_serializes_for_state_topic() {
        let s = snapshot(r#"{"8": 50, "154": "FAoKCgASABoAIgIIAhIGCAEQASAB"}"#);
        let view = DeviceView::new("dev", Some(&s));
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["battery"], 50);
        assert_eq!(json["cleaning_mode"], "vacuum");
        assert_eq!(json["activity"], "idle");
    }
}
