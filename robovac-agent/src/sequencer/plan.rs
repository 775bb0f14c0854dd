//! Command plans: ordered writes with settle delays
//!
//! Plans are plain data. Building one never touches the device, so every
//! intent's write sequence can be checked without a transport.

use serde::Serialize;
use std::time::Duration;

use crate::dps::{keys, CleaningMode, CommandCode, DpsBatch, DpsValue, FanSpeed};

/// Settle time after a write before the next interaction.
pub const SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Extra time for the device to leave the dock before the cleaning code confirms a start.
pub const START_STABILIZE_DELAY: Duration = Duration::from_secs(2);

/// One write and the delay that must elapse after it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanStep {
    pub batch: DpsBatch,
    #[serde(with = "millis")]
    pub delay: Duration,
}

impl PlanStep {
    pub fn single(key: &str, value: impl Into<DpsValue>, delay: Duration) -> Self {
        let mut batch = DpsBatch::new();
        batch.insert(key.to_string(), value.into());
        Self { batch, delay }
    }

    pub fn batch(batch: DpsBatch, delay: Duration) -> Self {
        Self { batch, delay }
    }
}

/// What a plan does to the session's "was paused" memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryEffect {
    Keep,
    Set,
    Clear,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandPlan {
    /// Intent actually carried out (a resume may resolve to a start).
    pub intent: &'static str,
    pub steps: Vec<PlanStep>,
    /// Request a state refresh once all steps are written.
    pub refresh: bool,
    /// After the refresh, warn if the vacuum is not running.
    pub verify_running: bool,
    pub memory_before: MemoryEffect,
    pub memory_on_success: MemoryEffect,
    pub memory_on_failure: MemoryEffect,
}

impl CommandPlan {
    fn new(intent: &'static str) -> Self {
        Self {
            intent,
            steps: Vec::new(),
            refresh: false,
            verify_running: false,
            memory_before: MemoryEffect::Keep,
            memory_on_success: MemoryEffect::Keep,
            memory_on_failure: MemoryEffect::Keep,
        }
    }

    fn step(mut self, step: PlanStep) -> Self {
        self.steps.push(step);
        self
    }

    fn command(self, code: CommandCode, delay: Duration) -> Self {
        self.step(PlanStep::single(keys::COMMAND, code.encoded(), delay))
    }

    fn companion_mode(self, code: CommandCode, delay: Duration) -> Self {
        match code.companion_mode() {
            Some(mode) => self.step(PlanStep::single(keys::MODE, mode, delay)),
            None => self,
        }
    }

    /// Accepted but does nothing on this device.
    pub fn no_op(intent: &'static str) -> Self {
        Self::new(intent)
    }

    pub fn start() -> Self {
        let mut plan = Self::new("start")
            .command(CommandCode::Start, SETTLE_DELAY)
            .companion_mode(CommandCode::Start, START_STABILIZE_DELAY)
            .command(CommandCode::Cleaning, SETTLE_DELAY);
        plan.refresh = true;
        plan.verify_running = true;
        plan.memory_before = MemoryEffect::Clear;
        plan
    }

    /// Continue a paused run. Only the cleaning code is sent so the device
    /// announces a resume rather than a new run.
    pub fn resume() -> Self {
        let mut plan = Self::new("resume").command(CommandCode::Cleaning, SETTLE_DELAY);
        plan.refresh = true;
        plan.memory_on_success = MemoryEffect::Clear;
        plan
    }

    pub fn pause() -> Self {
        let mut plan = Self::new("pause")
            .command(CommandCode::Pause, SETTLE_DELAY)
            .companion_mode(CommandCode::Pause, SETTLE_DELAY);
        plan.refresh = true;
        plan.memory_before = MemoryEffect::Set;
        plan.memory_on_failure = MemoryEffect::Clear;
        plan
    }

    pub fn return_home() -> Self {
        let mut plan = Self::new("return_home")
            .command(CommandCode::Return, SETTLE_DELAY)
            .companion_mode(CommandCode::Return, SETTLE_DELAY);
        plan.refresh = true;
        plan.memory_before = MemoryEffect::Clear;
        plan
    }

    /// Both fan keys in one batch; they are independent data points.
    pub fn fan_speed(speed: FanSpeed) -> Self {
        let mut batch = DpsBatch::new();
        batch.insert(keys::FAN_SPEED.to_string(), speed.primary_value().into());
        batch.insert(
            keys::FAN_SPEED_COMPANION.to_string(),
            speed.companion_value().into(),
        );
        Self::new("set_fan_speed").step(PlanStep::batch(batch, Duration::ZERO))
    }

    pub fn cleaning_mode(mode: CleaningMode) -> Self {
        let mut plan = Self::new("set_cleaning_mode");
        let selector = PlanStep::single(keys::CLEANING_MODE, mode.selector(), SETTLE_DELAY);

        plan = match mode.water_level() {
            Some(level) => plan
                .step(selector)
                .step(PlanStep::single(keys::WATER_LEVEL, level, SETTLE_DELAY)),
            // No water write, but the device still gets both settle periods.
            None => plan.step(PlanStep {
                delay: SETTLE_DELAY * 2,
                ..selector
            }),
        };
        plan.refresh = true;
        plan
    }

    pub fn auto_return(enabled: bool) -> Self {
        Self::new("set_auto_return").step(PlanStep::single(
            keys::AUTO_RETURN,
            enabled,
            Duration::ZERO,
        ))
    }

    pub fn write_count(&self) -> usize {
        self.steps.len()
    }

    /// Whether any step writes `code` to the command key.
    pub fn writes_command(&self, code: CommandCode) -> bool {
        self.steps.iter().any(|step| {
            step.batch
                .get(keys::COMMAND)
                .and_then(DpsValue::as_str)
                .is_some_and(|value| value == code.encoded())
        })
    }

    /// Sum of all settle delays.
    pub fn total_delay(&self) -> Duration {
        self.steps.iter().map(|step| step.delay).sum()
    }
}

mod millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(delay: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(delay.as_millis() as u64)
    }
}
