//! Daily rollover: archive the day that ended, reset working data, keep 90 days.
//!
//! Safe to run any number of times per day. `lastResetDate` moves forward only in
//! the same commit that archives and clears, so a failed run is retried in full
//! on the next wake-up.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::de::DeserializeOwned;

use crate::commands::CommandCtx;
use crate::dates::{date_key, days_before, parse_date_key};
use crate::events::CoreEvent;
use crate::models::{DailyHistory, PomodoroRecord, Task, TaskStatus};
use crate::storage::{
    load, StorageError, StoreOp, KEY_HISTORY, KEY_LAST_RESET_DATE, KEY_POMODORO_RECORDS,
    KEY_TASKS, KEY_TIMER_STATE,
};

pub const HISTORY_RETENTION_DAYS: i64 = 90;

/// Panel-side task selection; cleared together with the working data.
pub const KEY_CURRENT_TASK_ID: &str = "currentTaskId";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RolloverTrigger {
    /// Wake-up or daily alarm; archives the day that ended.
    Automatic,
    /// User closing out the day now; archives under today's date.
    Forced,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RolloverOutcome {
    pub performed: bool,
    pub today: String,
    pub archived_under: Option<String>,
    pub pruned: usize,
}

#[derive(Debug)]
pub enum RolloverError {
    Storage(StorageError),
    Corrupt {
        key: &'static str,
        source: serde_json::Error,
    },
}

impl std::fmt::Display for RolloverError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RolloverError::Storage(err) => write!(f, "rollover storage error: {err}"),
            RolloverError::Corrupt { key, source } => {
                write!(f, "rollover found corrupt data key={key}: {source}")
            }
        }
    }
}

impl std::error::Error for RolloverError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RolloverError::Storage(err) => Some(err),
            RolloverError::Corrupt { source, .. } => Some(source),
        }
    }
}

impl From<StorageError> for RolloverError {
    fn from(value: StorageError) -> Self {
        RolloverError::Storage(value)
    }
}

pub async fn check_and_archive_if_needed(
    ctx: &impl CommandCtx,
) -> Result<RolloverOutcome, RolloverError> {
    run_rollover(ctx, RolloverTrigger::Automatic).await
}

pub async fn force_archive(ctx: &impl CommandCtx) -> Result<RolloverOutcome, RolloverError> {
    run_rollover(ctx, RolloverTrigger::Forced).await
}

pub async fn run_rollover(
    ctx: &impl CommandCtx,
    trigger: RolloverTrigger,
) -> Result<RolloverOutcome, RolloverError> {
    let result = rollover_inner(ctx, trigger).await;
    if let Err(error) = &result {
        log::error!("rollover failed trigger={trigger:?} err={error}");
    }
    result
}

async fn rollover_inner(
    ctx: &impl CommandCtx,
    trigger: RolloverTrigger,
) -> Result<RolloverOutcome, RolloverError> {
    let today_date = ctx.local_now().date_naive();
    let today = date_key(today_date);
    let last_reset: Option<String> = read(ctx, KEY_LAST_RESET_DATE).await?;

    if trigger == RolloverTrigger::Automatic && last_reset.as_deref() == Some(today.as_str()) {
        log::info!("rollover not needed date={today}");
        return Ok(RolloverOutcome {
            performed: false,
            today,
            archived_under: None,
            pruned: 0,
        });
    }

    let tasks: Vec<Task> = read(ctx, KEY_TASKS).await?.unwrap_or_default();
    let records: Vec<PomodoroRecord> = read(ctx, KEY_POMODORO_RECORDS).await?.unwrap_or_default();
    let mut history: BTreeMap<String, DailyHistory> =
        read(ctx, KEY_HISTORY).await?.unwrap_or_default();

    let archived_under = if tasks.is_empty() && records.is_empty() {
        None
    } else {
        let key = match trigger {
            RolloverTrigger::Forced => today.clone(),
            RolloverTrigger::Automatic => last_reset.clone().unwrap_or_else(|| today.clone()),
        };
        let entry = build_daily_history(&key, tasks, records);
        let merged = merge_history(history.remove(&key), entry);
        history.insert(key.clone(), merged);
        Some(key)
    };
    let pruned = prune_history(&mut history, today_date);

    let mut ops = Vec::new();
    if archived_under.is_some() || pruned > 0 {
        ops.push(StoreOp::set(KEY_HISTORY, &history)?);
    }
    ops.push(StoreOp::set(KEY_TASKS, &Vec::<Task>::new())?);
    ops.push(StoreOp::set(KEY_POMODORO_RECORDS, &Vec::<PomodoroRecord>::new())?);
    ops.push(StoreOp::remove(KEY_CURRENT_TASK_ID));
    ops.push(StoreOp::remove(KEY_TIMER_STATE));
    ops.push(StoreOp::set(KEY_LAST_RESET_DATE, &today)?);
    ctx.store().commit(ops).await?;

    log::info!(
        "rollover done trigger={trigger:?} today={today} previous={last_reset:?} archived={archived_under:?} pruned={pruned}"
    );
    ctx.emit(CoreEvent::DailyReset {
        date: today.clone(),
    });
    Ok(RolloverOutcome {
        performed: true,
        today,
        archived_under,
        pruned,
    })
}

async fn read<T: DeserializeOwned>(
    ctx: &impl CommandCtx,
    key: &'static str,
) -> Result<Option<T>, RolloverError> {
    load(ctx.store(), key).await.map_err(|error| match error {
        StorageError::Json(source) => RolloverError::Corrupt { key, source },
        other => RolloverError::Storage(other),
    })
}

pub fn build_daily_history(
    date: &str,
    tasks: Vec<Task>,
    pomodoro_records: Vec<PomodoroRecord>,
) -> DailyHistory {
    let completed: Vec<&PomodoroRecord> =
        pomodoro_records.iter().filter(|record| record.completed).collect();
    let focus_seconds: u64 = completed
        .iter()
        .map(|record| u64::from(record.duration))
        .sum();
    let completed_pomodoros = completed.len() as u32;
    let completed_tasks = tasks
        .iter()
        .filter(|task| task.status == TaskStatus::Completed)
        .count() as u32;
    DailyHistory {
        date: date.to_string(),
        tasks,
        pomodoro_records,
        completed_pomodoros,
        total_focus_time: focus_seconds / 60,
        completed_tasks,
    }
}

/// Folds a new archive into an existing entry for the same date.
///
/// Items with an id already present are replaced; aggregates are recomputed from
/// the merged lists.
pub fn merge_history(existing: Option<DailyHistory>, incoming: DailyHistory) -> DailyHistory {
    let Some(existing) = existing else {
        return incoming;
    };
    let mut tasks = existing.tasks;
    for task in incoming.tasks {
        match tasks.iter_mut().find(|known| known.id == task.id) {
            Some(known) => *known = task,
            None => tasks.push(task),
        }
    }
    let mut records = existing.pomodoro_records;
    for record in incoming.pomodoro_records {
        match records.iter_mut().find(|known| known.id == record.id) {
            Some(known) => *known = record,
            None => records.push(record),
        }
    }
    build_daily_history(&incoming.date, tasks, records)
}

/// Drops entries dated more than [`HISTORY_RETENTION_DAYS`] before `today`;
/// an entry exactly that old is kept. Returns how many were removed.
pub fn prune_history(history: &mut BTreeMap<String, DailyHistory>, today: NaiveDate) -> usize {
    let cutoff = days_before(today, HISTORY_RETENTION_DAYS);
    let before = history.len();
    history.retain(|key, _| match parse_date_key(key) {
        Some(date) => date >= cutoff,
        None => {
            log::warn!("history key is not a date, keeping it key={key}");
            true
        }
    });
    before - history.len()
}
