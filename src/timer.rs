//! Countdown semantics over a [`TimerSnapshot`].
//!
//! Every function here is pure: callers pass the current time and own the
//! persistence of whatever they get back.

use crate::models::{
    whole_seconds_since, PomodoroRecord, Settings, Task, TimerMode, TimerSnapshot, TimerStatus,
    Timestamp,
};

pub const MIN_ADJUSTED_SECONDS: u32 = 60;
pub const MAX_ADJUSTED_SECONDS: u32 = 60 * 60;

/// A command the user may not issue right now. Shown as a transient advisory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refusal {
    AlreadyRunning,
    NotRunning,
    NoTaskSelected,
    TimeExhausted,
    Running,
}

impl std::fmt::Display for Refusal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let message = match self {
            Refusal::AlreadyRunning => "timer is already running",
            Refusal::NotRunning => "timer is not running",
            Refusal::NoTaskSelected => "select a task before starting a pomodoro",
            Refusal::TimeExhausted => "time is up; reset the timer first",
            Refusal::Running => "pause or reset the timer first",
        };
        f.write_str(message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub mode: TimerMode,
    pub task_id: Option<String>,
    pub finished_at: Timestamp,
    /// Present for focus sessions only.
    pub record: Option<PomodoroRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    NotRunning,
    Running { remaining: u32, credited: u32 },
    Completed(Completion),
}

pub fn start(
    snapshot: &mut TimerSnapshot,
    task_id: Option<String>,
    now: Timestamp,
) -> Result<(), Refusal> {
    if snapshot.is_running() {
        return Err(Refusal::AlreadyRunning);
    }
    let task_id = task_id.or_else(|| snapshot.current_task_id.clone());
    if snapshot.mode.is_focus() && task_id.is_none() {
        return Err(Refusal::NoTaskSelected);
    }
    let remaining = match snapshot.status {
        TimerStatus::Paused => snapshot.paused_time,
        _ => snapshot.remaining_seconds,
    };
    if remaining == 0 {
        return Err(Refusal::TimeExhausted);
    }

    if snapshot.status == TimerStatus::Idle {
        snapshot.session_started_at = Some(now);
        snapshot.session_elapsed = 0;
    }
    snapshot.status = TimerStatus::Running;
    snapshot.remaining_seconds = remaining;
    snapshot.start_time = now;
    snapshot.current_task_id = task_id;
    Ok(())
}

/// Freezes the countdown. Seconds consumed since the last tick are credited to
/// the active task like a tick would.
pub fn pause(
    snapshot: &mut TimerSnapshot,
    tasks: &mut [Task],
    now: Timestamp,
) -> Result<u32, Refusal> {
    if !snapshot.is_running() {
        return Err(Refusal::NotRunning);
    }
    let remaining = snapshot.remaining_at(now);
    let consumed = snapshot.remaining_seconds - remaining;
    credit_active_task(snapshot, tasks, consumed);
    snapshot.session_elapsed = snapshot.session_elapsed.saturating_add(consumed);
    snapshot.status = TimerStatus::Paused;
    snapshot.remaining_seconds = remaining;
    snapshot.paused_time = remaining;
    snapshot.start_time = 0;
    Ok(remaining)
}

pub fn reset(snapshot: &mut TimerSnapshot, settings: &Settings) {
    *snapshot = TimerSnapshot::idle(snapshot.mode, settings);
}

pub fn switch_mode(
    snapshot: &mut TimerSnapshot,
    mode: TimerMode,
    settings: &Settings,
) -> Result<(), Refusal> {
    if snapshot.is_running() {
        return Err(Refusal::Running);
    }
    *snapshot = TimerSnapshot::idle(mode, settings);
    Ok(())
}

/// Adds `delta_seconds` to the remaining time of a stopped timer and makes the
/// result the mode's configured duration. Returns the new remaining seconds.
pub fn adjust_duration(
    snapshot: &mut TimerSnapshot,
    settings: &mut Settings,
    delta_seconds: i64,
) -> Result<u32, Refusal> {
    if snapshot.is_running() {
        return Err(Refusal::Running);
    }
    let current = match snapshot.status {
        TimerStatus::Paused => snapshot.paused_time,
        _ => snapshot.remaining_seconds,
    };
    let adjusted = (i64::from(current) + delta_seconds).clamp(
        i64::from(MIN_ADJUSTED_SECONDS),
        i64::from(MAX_ADJUSTED_SECONDS),
    ) as u32;

    snapshot.remaining_seconds = adjusted;
    if snapshot.status == TimerStatus::Paused {
        snapshot.paused_time = adjusted;
    }
    settings.set_duration_minutes(snapshot.mode, adjusted.div_ceil(60));
    Ok(adjusted)
}

/// The snapshot as it should be displayed after a process (re)start.
///
/// A running timer keeps running; its remaining time is re-derived from
/// `start_time` instead of trusting the stored seconds.
pub fn restore_on_resume(snapshot: &TimerSnapshot, now: Timestamp) -> u32 {
    snapshot.remaining_at(now)
}

/// Folds the whole seconds elapsed since `start_time` into the snapshot.
///
/// `start_time` advances by exactly the folded seconds, so repeated ticks within
/// the same second credit nothing. Focus time goes to the active task; reaching
/// zero completes the session.
pub fn tick(snapshot: &mut TimerSnapshot, tasks: &mut [Task], now: Timestamp) -> TickOutcome {
    if !snapshot.is_running() {
        return TickOutcome::NotRunning;
    }
    let elapsed = whole_seconds_since(snapshot.start_time, now);
    let consumed = elapsed.min(snapshot.remaining_seconds);

    let credited = credit_active_task(snapshot, tasks, consumed);

    snapshot.remaining_seconds -= consumed;
    snapshot.start_time += i64::from(elapsed) * 1000;
    snapshot.session_elapsed = snapshot.session_elapsed.saturating_add(consumed);

    if snapshot.remaining_seconds > 0 {
        return TickOutcome::Running {
            remaining: snapshot.remaining_seconds,
            credited,
        };
    }

    TickOutcome::Completed(complete(snapshot, tasks, now))
}

/// Adds focus seconds to the active task. Breaks credit nothing.
fn credit_active_task(snapshot: &TimerSnapshot, tasks: &mut [Task], seconds: u32) -> u32 {
    let active_task = match (&snapshot.current_task_id, snapshot.mode.is_focus()) {
        (Some(task_id), true) => tasks.iter_mut().find(|task| &task.id == task_id),
        _ => None,
    };
    match active_task {
        Some(task) => {
            task.total_time_spent += u64::from(seconds);
            seconds
        }
        None => 0,
    }
}

fn complete(snapshot: &mut TimerSnapshot, tasks: &mut [Task], now: Timestamp) -> Completion {
    let mode = snapshot.mode;
    let task_id = snapshot.current_task_id.take();
    let record = if mode.is_focus() {
        if let Some(task) = task_id
            .as_ref()
            .and_then(|id| tasks.iter_mut().find(|task| &task.id == id))
        {
            task.pomodoro_count += 1;
        }
        let duration = snapshot.session_elapsed;
        Some(PomodoroRecord {
            id: uuid::Uuid::new_v4().to_string(),
            task_id: task_id.clone(),
            start_time: snapshot
                .session_started_at
                .unwrap_or(now - i64::from(duration) * 1000),
            end_time: now,
            duration,
            completed: true,
        })
    } else {
        None
    };

    snapshot.status = TimerStatus::Idle;
    snapshot.remaining_seconds = 0;
    snapshot.start_time = 0;
    snapshot.paused_time = 0;
    snapshot.session_started_at = None;
    snapshot.session_elapsed = 0;

    Completion {
        mode,
        task_id,
        finished_at: now,
        record,
    }
}

/// `MM:SS`, minutes uncapped.
pub fn format_clock(seconds: u32) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}
