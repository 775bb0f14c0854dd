//! Activity classification
//!
//! The device does not populate its status fields consistently, so the
//! activity is derived from an ordered ladder of rules. Each rule pairs a
//! predicate with a resolver; the first rule whose predicate holds decides.
//! New firmware quirks get a new rung rather than another nested branch.
//!
//! Classification is pure. The "was paused" memory used by resume lives in
//! [`crate::sequencer::SequencerMemory`], which observes classifier output.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::dps::{keys, CommandCode, DataPointSnapshot, DpsValue, StatusCode};

/// Battery percentage at or above which an otherwise quiet vacuum is
/// assumed to be sitting on its dock.
pub const DOCKED_BATTERY_THRESHOLD: i64 = 95;

/// Values of the legacy indicator at or above this are error codes.
pub const ERROR_CODE_THRESHOLD: i64 = 100;

/// Rung for a populated status field holding a sub-status not listed in
/// [`StatusCode`]; the device only reports those while on the dock.
pub const UNMODELED_STATUS_RULE: &str = "unmodeled_status";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityState {
    Cleaning,
    Paused,
    Returning,
    Docked,
    Idle,
    Error,
    Unknown,
}

impl ActivityState {
    pub fn as_str(self) -> &'static str {
        match self {
            ActivityState::Cleaning => "cleaning",
            ActivityState::Paused => "paused",
            ActivityState::Returning => "returning",
            ActivityState::Docked => "docked",
            ActivityState::Idle => "idle",
            ActivityState::Error => "error",
            ActivityState::Unknown => "unknown",
        }
    }

    /// The vacuum is moving under its own power.
    pub fn is_running(self) -> bool {
        matches!(self, ActivityState::Cleaning | ActivityState::Returning)
    }
}

impl fmt::Display for ActivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<StatusCode> for ActivityState {
    fn from(status: StatusCode) -> Self {
        match status {
            StatusCode::Cleaning => ActivityState::Cleaning,
            StatusCode::Paused => ActivityState::Paused,
            StatusCode::Returning => ActivityState::Returning,
        }
    }
}

/// One rung of the ladder.
pub struct Rule {
    pub name: &'static str,
    pub predicate: fn(&DataPointSnapshot) -> bool,
    pub resolver: fn(&DataPointSnapshot) -> ActivityState,
}

/// The ladder, highest priority first.
pub const RULES: &[Rule] = &[
    Rule {
        name: "error_indicator",
        predicate: has_error_code,
        resolver: |_| ActivityState::Error,
    },
    Rule {
        name: "known_status",
        predicate: |s| known_status(s).is_some(),
        resolver: |s| known_status(s).map_or(ActivityState::Unknown, ActivityState::from),
    },
    Rule {
        name: UNMODELED_STATUS_RULE,
        predicate: |s| s.is_populated(keys::STATUS),
        resolver: |_| ActivityState::Docked,
    },
    Rule {
        name: "command_echo",
        predicate: |s| echoed_activity(s).is_some(),
        resolver: |s| echoed_activity(s).unwrap_or(ActivityState::Unknown),
    },
    Rule {
        name: "legacy_indicators",
        predicate: has_legacy_indicators,
        resolver: legacy_activity,
    },
];

/// Classify a snapshot. Never returns [`ActivityState::Unknown`]; the
/// terminal default is [`ActivityState::Idle`].
pub fn classify(snapshot: &DataPointSnapshot) -> ActivityState {
    explain(snapshot).1
}

/// Classify a possibly missing snapshot; no snapshot means unknown.
pub fn classify_optional(snapshot: Option<&DataPointSnapshot>) -> ActivityState {
    snapshot.map_or(ActivityState::Unknown, classify)
}

/// The deciding rule's name along with the classification.
pub fn explain(snapshot: &DataPointSnapshot) -> (&'static str, ActivityState) {
    RULES
        .iter()
        .find(|rule| (rule.predicate)(snapshot))
        .map(|rule| (rule.name, (rule.resolver)(snapshot)))
        .unwrap_or(("default", ActivityState::Idle))
}

fn has_error_code(snapshot: &DataPointSnapshot) -> bool {
    snapshot
        .int(keys::STATUS_INDICATOR)
        .is_some_and(|code| code >= ERROR_CODE_THRESHOLD)
}

fn known_status(snapshot: &DataPointSnapshot) -> Option<StatusCode> {
    snapshot.str(keys::STATUS).and_then(StatusCode::from_encoded)
}

fn echoed_activity(snapshot: &DataPointSnapshot) -> Option<ActivityState> {
    if snapshot.is_populated(keys::STATUS) {
        return None;
    }
    match snapshot.str(keys::COMMAND).and_then(CommandCode::from_encoded)? {
        CommandCode::Cleaning => Some(ActivityState::Cleaning),
        CommandCode::Pause => Some(ActivityState::Paused),
        CommandCode::Return => Some(ActivityState::Returning),
        CommandCode::Start => None,
    }
}

/// Neither status nor a recognised echo. Missing indicators still reach the
/// power and battery fallbacks.
fn has_legacy_indicators(snapshot: &DataPointSnapshot) -> bool {
    !snapshot.is_populated(keys::STATUS) && echoed_activity(snapshot).is_none()
}

fn legacy_activity(snapshot: &DataPointSnapshot) -> ActivityState {
    let pair = (
        snapshot.int(keys::STATUS_INDICATOR),
        snapshot.int(keys::STATUS_INDICATOR_AUX),
    );

    match pair {
        (Some(2), Some(3)) => ActivityState::Cleaning,
        (Some(3), Some(4)) => ActivityState::Paused,
        (Some(1), Some(2)) => ActivityState::Returning,
        (Some(0), Some(0)) => docked_by_battery(snapshot),
        _ if snapshot.bool(keys::POWER) == Some(true) => ActivityState::Idle,
        _ => docked_by_battery(snapshot),
    }
}

fn docked_by_battery(snapshot: &DataPointSnapshot) -> ActivityState {
    let battery = snapshot
        .get(keys::BATTERY)
        .and_then(DpsValue::to_int_lenient);

    match battery {
        Some(level) if level >= DOCKED_BATTERY_THRESHOLD => ActivityState::Docked,
        _ => ActivityState::Idle,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(json: &str) -> DataPointSnapshot {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_error_code_wins_over_everything() {
        let s = snapshot(r#"{"6": 104, "153": "BgoAEAUyAA=="}"#);
        assert_eq!(explain(&s), ("error_indicator", ActivityState::Error));
    }

    #[test]
    fn test_indicator_below_threshold_is_not_error() {
        let s = snapshot(r#"{"6": 99, "7": 0, "8": 50}"#);
        assert_eq!(classify(&s), ActivityState::Idle);
    }

    #[test]
    fn test_known_status_values() {
        for (status, expected) in [
            (StatusCode::Cleaning, ActivityState::Cleaning),
            (StatusCode::Paused, ActivityState::Paused),
            (StatusCode::Returning, ActivityState::Returning),
        ] {
            let s: DataPointSnapshot = [(keys::STATUS, status.encoded())].into_iter().collect();
            assert_eq!(explain(&s), ("known_status", expected));
        }
    }

    #[test]
    fn test_paused_status_ignores_legacy_indicators() {
        let s = snapshot(r#"{"153": "CAoAEAUyAggB", "6": 2, "7": 3, "152": "AggO"}"#);
        assert_eq!(classify(&s), ActivityState::Paused);
    }

    #[test]
    fn test_unmodeled_status_is_docked() {
        let s = snapshot(r#"{"153": "CgoAEAkyAggCUgA=", "6": 2, "7": 3}"#);
        assert_eq!(explain(&s), ("unmodeled_status", ActivityState::Docked));
    }

    #[test]
    fn test_command_echo_when_status_absent() {
        for (code, expected) in [
            (CommandCode::Cleaning, ActivityState::Cleaning),
            (CommandCode::Pause, ActivityState::Paused),
            (CommandCode::Return, ActivityState::Returning),
        ] {
            let s: DataPointSnapshot = [(keys::COMMAND, code.encoded())].into_iter().collect();
            assert_eq!(explain(&s), ("command_echo", expected));
        }
    }

    #[test]
    fn test_empty_status_falls_through_to_command_echo() {
        let s = snapshot(r#"{"153": "", "152": "AggG"}"#);
        assert_eq!(classify(&s), ActivityState::Returning);
    }

    #[test]
    fn test_legacy_pairs() {
        assert_eq!(
            explain(&snapshot(r#"{"6": 2, "7": 3}"#)),
            ("legacy_indicators", ActivityState::Cleaning)
        );
        assert_eq!(
            classify(&snapshot(r#"{"6": 3, "7": 4}"#)),
            ActivityState::Paused
        );
        assert_eq!(
            classify(&snapshot(r#"{"6": 1, "7": 2}"#)),
            ActivityState::Returning
        );
    }

    #[test]
    fn test_legacy_zero_pair_uses_battery_threshold() {
        assert_eq!(
            classify(&snapshot(r#"{"6": 0, "7": 0, "8": 95}"#)),
            ActivityState::Docked
        );
        assert_eq!(
            classify(&snapshot(r#"{"6": 0, "7": 0, "8": 94}"#)),
            ActivityState::Idle
        );
    }

    #[test]
    fn test_legacy_zero_pair_ignores_power() {
        let s = snapshot(r#"{"2": true, "6": 0, "7": 0, "8": 100}"#);
        assert_eq!(classify(&s), ActivityState::Docked);
    }

    #[test]
    fn test_legacy_other_pair_defers_to_power_then_battery() {
        assert_eq!(
            classify(&snapshot(r#"{"2": true, "6": 5, "7": 1, "8": 100}"#)),
            ActivityState::Idle
        );
        assert_eq!(
            classify(&snapshot(r#"{"2": false, "6": 5, "7": 1, "8": 100}"#)),
            ActivityState::Docked
        );
        assert_eq!(
            classify(&snapshot(r#"{"6": 5, "8": "97"}"#)),
            ActivityState::Docked
        );
    }

    #[test]
    fn test_unrecognized_command_echo_falls_to_legacy() {
        let s = snapshot(r#"{"152": "AA==", "6": 2, "7": 3}"#);
        assert_eq!(explain(&s), ("legacy_indicators", ActivityState::Cleaning));
    }

    #[test]
    fn test_legacy_rung_without_indicators() {
        assert_eq!(
            explain(&snapshot(r#"{"8": 100}"#)),
            ("legacy_indicators", ActivityState::Docked)
        );
        assert_eq!(
            classify(&snapshot(r#"{"2": false, "8": 95}"#)),
            ActivityState::Docked
        );
        assert_eq!(
            classify(&snapshot(r#"{"2": false, "8": 100}"#)),
            ActivityState::Docked
        );
        assert_eq!(
            classify(&snapshot(r#"{"8": "97"}"#)),
            ActivityState::Docked
        );
        assert_eq!(classify(&snapshot(r#"{"8": 94}"#)), ActivityState::Idle);
    }

    #[test]
    fn test_start_echo_falls_to_battery() {
        let s: DataPointSnapshot = [
            (keys::COMMAND, DpsValue::from(CommandCode::Start.encoded())),
            (keys::BATTERY, 100i64.into()),
        ]
        .into_iter()
        .collect();
        assert_eq!(explain(&s), ("legacy_indicators", ActivityState::Docked));
    }

    #[test]
    fn test_quiet_snapshot_is_idle() {
        assert_eq!(
            explain(&snapshot("{}")),
            ("legacy_indicators", ActivityState::Idle)
        );
        assert_eq!(
            classify(&snapshot(r#"{"2": true, "8": 100}"#)),
            ActivityState::Idle
        );
    }

    #[test]
    fn test_missing_snapshot_is_unknown() {
        assert_eq!(classify_optional(None), ActivityState::Unknown);
    }

    #[test]
    fn test_running_states() {
        assert!(ActivityState::Cleaning.is_running());
        assert!(ActivityState::Returning.is_running());
        assert!(!ActivityState::Paused.is_running());
        assert!(!ActivityState::Docked.is_running());
    }
}
