//! Command sequencing
//!
//! Translates user intents into [`CommandPlan`]s and runs them against a
//! [`CommandSink`], honouring settle delays between writes. The sequencer
//! never retries; a failed write is reported and the device is left in
//! whatever state the earlier writes produced.

pub mod plan;

pub use plan::{CommandPlan, MemoryEffect, PlanStep};

use serde::Serialize;
use std::fmt;
use std::future::Future;
use tracing::{debug, info, warn};

use crate::activity::{self, ActivityState};
use crate::dps::{
    keys, CleaningMode, CommandCode, DataPointSnapshot, DpsBatch, FanSpeed, StatusCode,
};
use crate::error::{Result, RobovacError};

/// High-level operations a consumer can request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Start,
    Pause,
    Resume,
    /// The device has no stop; this pauses.
    Stop,
    ReturnHome,
    /// Level label as given by the caller; validated when planned.
    SetFanSpeed(String),
    SetCleaningMode(String),
    SetAutoReturn(bool),
    CleanSpot,
    Locate,
}

impl Intent {
    pub fn name(&self) -> &'static str {
        match self {
            Intent::Start => "start",
            Intent::Pause => "pause",
            Intent::Resume => "resume",
            Intent::Stop => "stop",
            Intent::ReturnHome => "return_home",
            Intent::SetFanSpeed(_) => "set_fan_speed",
            Intent::SetCleaningMode(_) => "set_cleaning_mode",
            Intent::SetAutoReturn(_) => "set_auto_return",
            Intent::CleanSpot => "clean_spot",
            Intent::Locate => "locate",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Intent::SetFanSpeed(level) => write!(f, "set_fan_speed({level})"),
            Intent::SetCleaningMode(mode) => write!(f, "set_cleaning_mode({mode})"),
            Intent::SetAutoReturn(enabled) => write!(f, "set_auto_return({enabled})"),
            other => f.write_str(other.name()),
        }
    }
}

/// Session-scoped memory that a pause happened, so a later resume does not
/// restart the run. Owned by the device session and passed in explicitly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequencerMemory {
    was_paused: bool,
}

impl SequencerMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn paused() -> Self {
        Self { was_paused: true }
    }

    pub fn was_paused(&self) -> bool {
        self.was_paused
    }

    pub fn apply(&mut self, effect: MemoryEffect) {
        match effect {
            MemoryEffect::Keep => {}
            MemoryEffect::Set => self.was_paused = true,
            MemoryEffect::Clear => self.was_paused = false,
        }
    }

    /// Track a fresh classification, as returned by [`activity::explain`].
    /// Docked only clears the memory when a status field reported it; a dock
    /// guessed from battery level leaves it alone.
    pub fn observe(&mut self, rule: &str, state: ActivityState) {
        match state {
            ActivityState::Paused => self.was_paused = true,
            ActivityState::Cleaning | ActivityState::Returning => self.was_paused = false,
            ActivityState::Docked if rule == activity::UNMODELED_STATUS_RULE => {
                self.was_paused = false
            }
            _ => {}
        }
    }
}

/// Where plans are executed. Implemented by the device session over its transport.
pub trait CommandSink {
    fn write(&mut self, batch: DpsBatch) -> impl Future<Output = Result<()>> + Send;

    /// Re-read device state so [`CommandSink::current`] reflects the writes.
    fn refresh(&mut self) -> impl Future<Output = Result<()>> + Send;

    fn current(&self) -> Option<&DataPointSnapshot>;
}

/// Result of a completed plan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandOutcome {
    /// Intent actually carried out.
    pub intent: &'static str,
    pub writes: usize,
    /// Activity after the refresh, if one was requested and succeeded.
    pub activity: Option<ActivityState>,
    /// For starts: whether the vacuum was observed running afterwards.
    pub verified: Option<bool>,
}

/// Whether the current state calls for a resume rather than a fresh start.
pub fn is_resumable(memory: &SequencerMemory, current: Option<&DataPointSnapshot>) -> bool {
    if memory.was_paused() {
        return true;
    }
    let Some(snapshot) = current else {
        return false;
    };

    activity::classify(snapshot) == ActivityState::Paused
        || snapshot.str(keys::STATUS) == Some(StatusCode::Paused.encoded())
        || snapshot.str(keys::COMMAND) == Some(CommandCode::Pause.encoded())
}

/// Build the plan for an intent. Invalid arguments fail here, before any write.
pub fn plan(
    intent: &Intent,
    memory: &SequencerMemory,
    current: Option<&DataPointSnapshot>,
) -> Result<CommandPlan> {
    let plan = match intent {
        Intent::Start => CommandPlan::start(),
        Intent::Resume if is_resumable(memory, current) => CommandPlan::resume(),
        Intent::Resume => CommandPlan::start(),
        Intent::Pause | Intent::Stop => CommandPlan::pause(),
        Intent::ReturnHome => CommandPlan::return_home(),
        Intent::SetFanSpeed(level) => CommandPlan::fan_speed(level.parse::<FanSpeed>()?),
        Intent::SetCleaningMode(mode) => CommandPlan::cleaning_mode(mode.parse::<CleaningMode>()?),
        Intent::SetAutoReturn(enabled) => CommandPlan::auto_return(*enabled),
        Intent::CleanSpot | Intent::Locate => CommandPlan::no_op(intent.name()),
    };
    Ok(plan)
}

/// Plan and run an intent.
pub async fn execute<S>(
    sink: &mut S,
    intent: &Intent,
    memory: &mut SequencerMemory,
) -> Result<CommandOutcome>
where
    S: CommandSink + Send,
{
    let plan = plan(intent, memory, sink.current())?;
    if plan.steps.is_empty() {
        info!("{} is not supported by this device, ignoring", intent);
    }
    run(sink, &plan, memory).await
}

/// Run a plan step by step.
pub async fn run<S>(
    sink: &mut S,
    plan: &CommandPlan,
    memory: &mut SequencerMemory,
) -> Result<CommandOutcome>
where
    S: CommandSink + Send,
{
    memory.apply(plan.memory_before);
    let total = plan.steps.len();

    for (index, step) in plan.steps.iter().enumerate() {
        debug!("{} step {}/{}: {:?}", plan.intent, index + 1, total, step.batch);

        if let Err(e) = sink.write(step.batch.clone()).await {
            memory.apply(plan.memory_on_failure);
            if index == 0 {
                return Err(e);
            }
            warn!(
                "{} failed at step {} of {}, earlier writes stay applied",
                plan.intent,
                index + 1,
                total
            );
            return Err(RobovacError::PartialSequence {
                intent: plan.intent.to_string(),
                step: index + 1,
                total,
                source: Box::new(e),
            });
        }

        if !step.delay.is_zero() {
            tokio::time::sleep(step.delay).await;
        }
    }

    memory.apply(plan.memory_on_success);

    let mut activity = None;
    if plan.refresh {
        match sink.refresh().await {
            Ok(()) => activity = sink.current().map(activity::classify),
            Err(e) => warn!("State refresh after {} failed: {}", plan.intent, e),
        }
    }

    let verified = plan.verify_running.then(|| {
        let running = activity.is_some_and(ActivityState::is_running);
        if running {
            info!("Vacuum started");
        } else {
            warn!("Vacuum may not have started, activity is {:?}", activity);
        }
        running
    });

    Ok(CommandOutcome {
        intent: plan.intent,
        writes: total,
        activity,
        verified,
    })
}
