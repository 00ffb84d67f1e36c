use std::sync::Arc;

use chrono::{DateTime, FixedOffset};
use tokio::sync::broadcast;

use crate::clock::Clock;
use crate::events::{CoreEvent, EventHub, NotificationRequest, TimerFinishedPayload};
use crate::models::{
    PomodoroRecord, Priority, Settings, Task, TaskStatus, TimerMode, TimerSnapshot, TimerStatus,
    Timestamp,
};
use crate::storage::{
    load, load_or_default, KvStore, StorageError, StoreOp, KEY_POMODORO_RECORDS, KEY_SETTINGS,
    KEY_TASKS, KEY_TIMER_STATE,
};
use crate::timer::{self, Completion, TickOutcome};

#[derive(Debug, serde::Serialize)]
pub struct CommandResult<T> {
    pub ok: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

/// Everything a command needs from its host process.
pub trait CommandCtx: Send + Sync {
    fn store(&self) -> &dyn KvStore;
    fn clock(&self) -> &dyn Clock;
    fn emit(&self, event: CoreEvent);
    fn notify(&self, request: NotificationRequest);
    fn subscribe_events(&self) -> broadcast::Receiver<CoreEvent>;

    fn now_ms(&self) -> Timestamp {
        self.clock().now_ms()
    }

    fn local_now(&self) -> DateTime<FixedOffset> {
        self.clock().now()
    }
}

/// Production context: a shared store, a clock and the process' event hub.
#[derive(Clone)]
pub struct CoreContext {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    hub: EventHub,
}

impl CoreContext {
    pub fn new(store: Arc<dyn KvStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            hub: EventHub::new(),
        }
    }

    pub fn hub(&self) -> &EventHub {
        &self.hub
    }
}

impl CommandCtx for CoreContext {
    fn store(&self) -> &dyn KvStore {
        self.store.as_ref()
    }

    fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    fn emit(&self, event: CoreEvent) {
        self.hub.publish(event);
    }

    fn notify(&self, request: NotificationRequest) {
        self.hub.notify(request);
    }

    fn subscribe_events(&self) -> broadcast::Receiver<CoreEvent> {
        self.hub.subscribe()
    }
}

pub(crate) fn ok<T>(data: T) -> CommandResult<T> {
    CommandResult {
        ok: true,
        data: Some(data),
        error: None,
    }
}

pub(crate) fn err<T>(message: &str) -> CommandResult<T> {
    CommandResult {
        ok: false,
        data: None,
        error: Some(message.to_string()),
    }
}

/// Full view used by a surface when it mounts.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatePayload {
    pub timer: TimerSnapshot,
    pub remaining_seconds: u32,
    pub tasks: Vec<Task>,
    pub settings: Settings,
}

pub(crate) async fn load_settings(ctx: &impl CommandCtx) -> Settings {
    load_or_default(ctx.store(), KEY_SETTINGS, Settings::default).await
}

pub(crate) async fn load_snapshot(ctx: &impl CommandCtx, settings: &Settings) -> TimerSnapshot {
    load_or_default(ctx.store(), KEY_TIMER_STATE, || {
        TimerSnapshot::idle(TimerMode::Pomodoro, settings)
    })
    .await
}

async fn load_tasks(ctx: &impl CommandCtx) -> Result<Vec<Task>, StorageError> {
    Ok(load(ctx.store(), KEY_TASKS).await?.unwrap_or_default())
}

async fn commit(ctx: &impl CommandCtx, ops: Result<Vec<StoreOp>, StorageError>) -> bool {
    let result = match ops {
        Ok(ops) => ctx.store().commit(ops).await,
        Err(error) => Err(error),
    };
    match result {
        Ok(()) => true,
        Err(error) => {
            log::error!("store write failed err={error}");
            false
        }
    }
}

/// Persists a snapshot; a failed write keeps the in-memory result.
async fn persist_snapshot(ctx: &impl CommandCtx, snapshot: &TimerSnapshot) {
    commit(ctx, StoreOp::set(KEY_TIMER_STATE, snapshot).map(|op| vec![op])).await;
}

pub async fn load_state_impl(ctx: &impl CommandCtx) -> CommandResult<StatePayload> {
    let settings = load_settings(ctx).await;
    let timer = load_snapshot(ctx, &settings).await;
    let tasks = match load_tasks(ctx).await {
        Ok(tasks) => tasks,
        Err(error) => {
            log::warn!("tasks unreadable err={error}; showing none");
            Vec::new()
        }
    };
    let remaining_seconds = timer::restore_on_resume(&timer, ctx.now_ms());
    ok(StatePayload {
        timer,
        remaining_seconds,
        tasks,
        settings,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoredTimer {
    pub snapshot: TimerSnapshot,
    pub remaining_seconds: u32,
}

/// Called once per process start: the wall clock, not a stale in-memory
/// countdown, decides how much time is left.
pub async fn restore_timer_impl(ctx: &impl CommandCtx) -> CommandResult<RestoredTimer> {
    let settings = load_settings(ctx).await;
    let snapshot = load_snapshot(ctx, &settings).await;
    let remaining_seconds = timer::restore_on_resume(&snapshot, ctx.now_ms());
    log::info!(
        "timer restored status={:?} mode={:?} remaining={remaining_seconds}",
        snapshot.status,
        snapshot.mode
    );
    ok(RestoredTimer {
        snapshot,
        remaining_seconds,
    })
}

pub async fn start_timer_impl(
    ctx: &impl CommandCtx,
    task_id: Option<String>,
) -> CommandResult<TimerSnapshot> {
    let settings = load_settings(ctx).await;
    let mut snapshot = load_snapshot(ctx, &settings).await;
    let now = ctx.now_ms();
    if let Err(refusal) = timer::start(&mut snapshot, task_id, now) {
        log::info!("start refused reason={refusal}");
        return err(&refusal.to_string());
    }

    let mut ops = vec![StoreOp::set(KEY_TIMER_STATE, &snapshot)];
    if snapshot.mode.is_focus() {
        if let Ok(mut tasks) = load_tasks(ctx).await {
            let picked = snapshot.current_task_id.as_deref();
            if let Some(task) = tasks.iter_mut().find(|task| Some(task.id.as_str()) == picked) {
                if task.status == TaskStatus::Todo {
                    task.status = TaskStatus::InProgress;
                    ops.push(StoreOp::set(KEY_TASKS, &tasks));
                }
            }
        }
    }
    commit(ctx, ops.into_iter().collect()).await;
    log::info!(
        "timer started mode={:?} remaining={} task={:?}",
        snapshot.mode,
        snapshot.remaining_seconds,
        snapshot.current_task_id
    );
    ok(snapshot)
}

pub async fn pause_timer_impl(ctx: &impl CommandCtx) -> CommandResult<TimerSnapshot> {
    let settings = load_settings(ctx).await;
    let mut snapshot = load_snapshot(ctx, &settings).await;
    let (mut tasks, tasks_readable) = match load_tasks(ctx).await {
        Ok(tasks) => (tasks, true),
        Err(error) => {
            log::warn!("tasks unreadable during pause err={error}; not crediting focus time");
            (Vec::new(), false)
        }
    };
    let before = tasks.clone();
    if let Err(refusal) = timer::pause(&mut snapshot, &mut tasks, ctx.now_ms()) {
        log::info!("pause refused reason={refusal}");
        return err(&refusal.to_string());
    }
    let mut ops = vec![StoreOp::set(KEY_TIMER_STATE, &snapshot)];
    if tasks_readable && tasks != before {
        ops.push(StoreOp::set(KEY_TASKS, &tasks));
    }
    commit(ctx, ops.into_iter().collect()).await;
    ok(snapshot)
}

pub async fn reset_timer_impl(ctx: &impl CommandCtx) -> CommandResult<TimerSnapshot> {
    let settings = load_settings(ctx).await;
    let mut snapshot = load_snapshot(ctx, &settings).await;
    timer::reset(&mut snapshot, &settings);
    persist_snapshot(ctx, &snapshot).await;
    ok(snapshot)
}

pub async fn switch_mode_impl(
    ctx: &impl CommandCtx,
    mode: TimerMode,
) -> CommandResult<TimerSnapshot> {
    let settings = load_settings(ctx).await;
    let mut snapshot = load_snapshot(ctx, &settings).await;
    if let Err(refusal) = timer::switch_mode(&mut snapshot, mode, &settings) {
        log::info!("mode switch refused reason={refusal}");
        return err(&refusal.to_string());
    }
    persist_snapshot(ctx, &snapshot).await;
    ok(snapshot)
}

pub async fn adjust_duration_impl(
    ctx: &impl CommandCtx,
    delta_seconds: i64,
) -> CommandResult<TimerSnapshot> {
    let mut settings = load_settings(ctx).await;
    let mut snapshot = load_snapshot(ctx, &settings).await;
    if let Err(refusal) = timer::adjust_duration(&mut snapshot, &mut settings, delta_seconds) {
        log::info!("adjust refused reason={refusal}");
        return err(&refusal.to_string());
    }
    let ops = vec![
        StoreOp::set(KEY_TIMER_STATE, &snapshot),
        StoreOp::set(KEY_SETTINGS, &settings),
    ];
    commit(ctx, ops.into_iter().collect()).await;
    ok(snapshot)
}

/// One step of the 1 second cadence. Any surface, or the coordinator's
/// completion alarm, may call it; completion side effects run once because
/// only the call that moves the stored snapshot to idle sees `Completed`.
pub async fn tick_impl(ctx: &impl CommandCtx) -> CommandResult<TickOutcome> {
    let settings = load_settings(ctx).await;
    let mut snapshot = load_snapshot(ctx, &settings).await;
    if !snapshot.is_running() {
        return ok(TickOutcome::NotRunning);
    }

    let now = ctx.now_ms();
    let (mut tasks, tasks_readable) = match load_tasks(ctx).await {
        Ok(tasks) => (tasks, true),
        Err(error) => {
            log::warn!("tasks unreadable during tick err={error}; not crediting focus time");
            (Vec::new(), false)
        }
    };
    let outcome = timer::tick(&mut snapshot, &mut tasks, now);

    let mut ops = vec![StoreOp::set(KEY_TIMER_STATE, &snapshot)];
    let tasks_changed = match &outcome {
        TickOutcome::Running { credited, .. } => *credited > 0,
        TickOutcome::Completed(_) => true,
        TickOutcome::NotRunning => false,
    };
    if tasks_readable && tasks_changed {
        ops.push(StoreOp::set(KEY_TASKS, &tasks));
    }

    let completion = match &outcome {
        TickOutcome::Completed(completion) => Some(completion.clone()),
        _ => None,
    };
    let Some(completion) = completion else {
        commit(ctx, ops.into_iter().collect()).await;
        return ok(outcome);
    };

    if let Some(record) = &completion.record {
        let loaded = load(ctx.store(), KEY_POMODORO_RECORDS).await;
        let mut records: Vec<PomodoroRecord> = match loaded {
            Ok(records) => records.unwrap_or_default(),
            // Corruption never heals by waiting, so it must not block completion.
            Err(StorageError::Json(error)) => {
                log::error!("pomodoro records corrupt err={error}; starting a new list");
                Vec::new()
            }
            Err(error) => {
                log::error!("pomodoro records unreadable err={error}; completion deferred");
                return err(&format!("storage error: {error}"));
            }
        };
        records.push(record.clone());
        ops.push(StoreOp::set(KEY_POMODORO_RECORDS, &records));
    }

    if !commit(ctx, ops.into_iter().collect()).await {
        // The stored snapshot is still running; the next tick retries.
        return err("storage error: completion not saved");
    }
    announce_completion(ctx, &completion, &settings);
    ok(outcome)
}

fn announce_completion(ctx: &impl CommandCtx, completion: &Completion, settings: &Settings) {
    log::info!(
        "timer finished mode={:?} task={:?}",
        completion.mode,
        completion.task_id
    );
    ctx.emit(CoreEvent::TimerFinished(TimerFinishedPayload {
        mode: completion.mode,
        task_id: completion.task_id.clone(),
        finished_at: completion.finished_at,
        play_sound: settings.sound_enabled,
    }));
    if settings.notifications_enabled {
        ctx.notify(NotificationRequest::for_completion(completion.mode));
    }
}

pub async fn create_task_impl(
    ctx: &impl CommandCtx,
    title: String,
    priority: Priority,
) -> CommandResult<Task> {
    let title = title.trim().to_string();
    if title.is_empty() {
        return err("task title is required");
    }
    let mut tasks = match load_tasks(ctx).await {
        Ok(tasks) => tasks,
        Err(error) => return err(&format!("storage error: {error}")),
    };
    let task = Task {
        id: uuid::Uuid::new_v4().to_string(),
        title,
        status: TaskStatus::Todo,
        priority,
        pomodoro_count: 0,
        total_time_spent: 0,
        created_at: ctx.now_ms(),
        completed_at: None,
    };
    tasks.push(task.clone());
    if let Err(error) = write(ctx, vec![StoreOp::set(KEY_TASKS, &tasks)]).await {
        return err(&format!("storage error: {error}"));
    }
    ok(task)
}

pub async fn set_task_status_impl(
    ctx: &impl CommandCtx,
    task_id: String,
    status: TaskStatus,
) -> CommandResult<Task> {
    let mut tasks = match load_tasks(ctx).await {
        Ok(tasks) => tasks,
        Err(error) => return err(&format!("storage error: {error}")),
    };
    let now = ctx.now_ms();
    let updated = match tasks.iter_mut().find(|task| task.id == task_id) {
        Some(task) => {
            task.status = status;
            task.completed_at = match status {
                TaskStatus::Completed => Some(task.completed_at.unwrap_or(now)),
                _ => None,
            };
            task.clone()
        }
        None => return err("task not found"),
    };
    if let Err(error) = write(ctx, vec![StoreOp::set(KEY_TASKS, &tasks)]).await {
        return err(&format!("storage error: {error}"));
    }
    ok(updated)
}

pub async fn delete_task_impl(ctx: &impl CommandCtx, task_id: String) -> CommandResult<bool> {
    let mut tasks = match load_tasks(ctx).await {
        Ok(tasks) => tasks,
        Err(error) => return err(&format!("storage error: {error}")),
    };
    let before = tasks.len();
    tasks.retain(|task| task.id != task_id);
    if tasks.len() == before {
        return err("task not found");
    }

    let settings = load_settings(ctx).await;
    let mut snapshot = load_snapshot(ctx, &settings).await;
    let mut ops = vec![StoreOp::set(KEY_TASKS, &tasks)];
    if snapshot.current_task_id.as_deref() == Some(task_id.as_str()) {
        if snapshot.mode.is_focus() && snapshot.status != TimerStatus::Idle {
            // A focus session cannot go on without its task.
            log::info!("active task deleted task={task_id}; resetting the focus session");
            timer::reset(&mut snapshot, &settings);
        } else {
            snapshot.current_task_id = None;
        }
        ops.push(StoreOp::set(KEY_TIMER_STATE, &snapshot));
    }
    if let Err(error) = write(ctx, ops).await {
        return err(&format!("storage error: {error}"));
    }
    ok(true)
}

pub async fn update_settings_impl(
    ctx: &impl CommandCtx,
    mut settings: Settings,
) -> CommandResult<Settings> {
    for mode in [TimerMode::Pomodoro, TimerMode::ShortBreak, TimerMode::LongBreak] {
        let minutes = settings.duration_minutes(mode).clamp(1, 60);
        settings.set_duration_minutes(mode, minutes);
    }

    let previous = load_settings(ctx).await;
    let mut snapshot = load_snapshot(ctx, &previous).await;
    let mut ops = vec![StoreOp::set(KEY_SETTINGS, &settings)];
    // An untouched idle timer follows the new duration.
    let untouched = snapshot.status == TimerStatus::Idle
        && snapshot.remaining_seconds == previous.duration_seconds(snapshot.mode);
    if untouched {
        snapshot.remaining_seconds = settings.duration_seconds(snapshot.mode);
        ops.push(StoreOp::set(KEY_TIMER_STATE, &snapshot));
    }
    if let Err(error) = write(ctx, ops).await {
        return err(&format!("storage error: {error}"));
    }
    ok(settings)
}

async fn write(
    ctx: &impl CommandCtx,
    ops: Vec<Result<StoreOp, StorageError>>,
) -> Result<(), StorageError> {
    let ops = ops.into_iter().collect::<Result<Vec<_>, _>>()?;
    ctx.store().commit(ops).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{make_task, TestCtx, T0};

    async fn seed_tasks(ctx: &TestCtx, tasks: &[Task]) {
        ctx.store
            .commit(vec![StoreOp::set(KEY_TASKS, &tasks).unwrap()])
            .await
            .unwrap();
    }

    async fn stored_snapshot(ctx: &TestCtx) -> TimerSnapshot {
        load(&ctx.store, KEY_TIMER_STATE).await.unwrap().unwrap()
    }

    async fn stored_tasks(ctx: &TestCtx) -> Vec<Task> {
        load(&ctx.store, KEY_TASKS).await.unwrap().unwrap_or_default()
    }

    #[test]
    fn ok_and_err_helpers_construct_expected_shape() {
        let r = ok(123);
        assert!(r.ok);
        assert_eq!(r.data, Some(123));
        assert_eq!(r.error, None);

        let r: CommandResult<i32> = err("nope");
        assert!(!r.ok);
        assert_eq!(r.data, None);
        assert_eq!(r.error, Some("nope".to_string()));
    }

    #[tokio::test]
    async fn start_without_task_is_an_advisory_not_a_failure() {
        let ctx = TestCtx::new();
        let res = start_timer_impl(&ctx, None).await;
        assert!(!res.ok);
        assert_eq!(
            res.error.as_deref(),
            Some("select a task before starting a pomodoro")
        );
        assert!(ctx.store.get(KEY_TIMER_STATE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn start_persists_absolute_start_time_and_marks_task_in_progress() {
        let ctx = TestCtx::new();
        let mut task = make_task("a");
        task.status = TaskStatus::Todo;
        seed_tasks(&ctx, &[task]).await;

        let res = start_timer_impl(&ctx, Some("a".into())).await;
        assert!(res.ok);
        let stored = stored_snapshot(&ctx).await;
        assert_eq!(stored.status, TimerStatus::Running);
        assert_eq!(stored.start_time, T0);
        assert_eq!(stored.remaining_seconds, 25 * 60);
        assert_eq!(stored.current_task_id.as_deref(), Some("a"));
        assert_eq!(stored_tasks(&ctx).await[0].status, TaskStatus::InProgress);
    }

    #[tokio::test]
    async fn restore_after_suspension_uses_wall_clock() {
        let ctx = TestCtx::new();
        seed_tasks(&ctx, &[make_task("a")]).await;
        start_timer_impl(&ctx, Some("a".into())).await;

        // Process suspended for ten minutes without any tick.
        ctx.clock.advance_secs(600);
        let restored = restore_timer_impl(&ctx).await.data.unwrap();
        assert_eq!(restored.remaining_seconds, 25 * 60 - 600);
        assert_eq!(restored.snapshot.status, TimerStatus::Running);

        ctx.clock.advance_secs(10_000);
        let restored = restore_timer_impl(&ctx).await.data.unwrap();
        assert_eq!(restored.remaining_seconds, 0);
    }

    #[tokio::test]
    async fn pause_and_reset_round_trip_through_the_store() {
        let ctx = TestCtx::new();
        seed_tasks(&ctx, &[make_task("a")]).await;

        let res = pause_timer_impl(&ctx).await;
        assert_eq!(res.error.as_deref(), Some("timer is not running"));

        start_timer_impl(&ctx, Some("a".into())).await;
        ctx.clock.advance_secs(90);
        let paused = pause_timer_impl(&ctx).await.data.unwrap();
        assert_eq!(paused.paused_time, 25 * 60 - 90);
        assert_eq!(stored_snapshot(&ctx).await, paused);

        // Paused time is authoritative no matter how long we wait.
        ctx.clock.advance_secs(3_600);
        let restored = restore_timer_impl(&ctx).await.data.unwrap();
        assert_eq!(restored.remaining_seconds, 25 * 60 - 90);

        let reset = reset_timer_impl(&ctx).await.data.unwrap();
        assert_eq!(reset.status, TimerStatus::Idle);
        assert_eq!(reset.remaining_seconds, 25 * 60);
        assert_eq!(reset.current_task_id, None);
        assert_eq!(reset.start_time, 0);
    }

    #[tokio::test]
    async fn tick_accumulates_focus_time_and_completes_once() {
        let ctx = TestCtx::new();
        seed_tasks(&ctx, &[make_task("a")]).await;
        start_timer_impl(&ctx, Some("a".into())).await;
        let mut snapshot = stored_snapshot(&ctx).await;
        snapshot.remaining_seconds = 2;
        ctx.store
            .commit(vec![StoreOp::set(KEY_TIMER_STATE, &snapshot).unwrap()])
            .await
            .unwrap();

        ctx.clock.advance_secs(1);
        let outcome = tick_impl(&ctx).await.data.unwrap();
        assert_eq!(
            outcome,
            TickOutcome::Running {
                remaining: 1,
                credited: 1
            }
        );
        assert_eq!(stored_tasks(&ctx).await[0].total_time_spent, 1);
        assert!(ctx.events().is_empty());

        ctx.clock.advance_secs(1);
        let outcome = tick_impl(&ctx).await.data.unwrap();
        assert!(matches!(outcome, TickOutcome::Completed(_)));

        // A redundant tick from a second surface sees an idle timer.
        let outcome = tick_impl(&ctx).await.data.unwrap();
        assert_eq!(outcome, TickOutcome::NotRunning);

        let tasks = stored_tasks(&ctx).await;
        assert_eq!(tasks[0].pomodoro_count, 1);
        assert_eq!(tasks[0].total_time_spent, 2);
        let events = ctx.events();
        assert_eq!(events.len(), 1);
        match &events[0] {
            CoreEvent::TimerFinished(payload) => {
                assert_eq!(payload.task_id.as_deref(), Some("a"));
                assert!(payload.play_sound);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(ctx.notifications().len(), 1);

        let records: Vec<PomodoroRecord> =
            load(&ctx.store, KEY_POMODORO_RECORDS).await.unwrap().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].duration, 2);
        let stored = stored_snapshot(&ctx).await;
        assert_eq!(stored.status, TimerStatus::Idle);
        assert_eq!(stored.current_task_id, None);
    }

    #[tokio::test]
    async fn completion_respects_notification_and_sound_settings() {
        let ctx = TestCtx::new();
        let settings = Settings {
            sound_enabled: false,
            notifications_enabled: false,
            ..Settings::default()
        };
        ctx.store
            .commit(vec![StoreOp::set(KEY_SETTINGS, &settings).unwrap()])
            .await
            .unwrap();
        switch_mode_impl(&ctx, TimerMode::ShortBreak).await;
        start_timer_impl(&ctx, None).await;
        ctx.clock.advance_secs(5 * 60);

        let outcome = tick_impl(&ctx).await.data.unwrap();
        assert!(matches!(outcome, TickOutcome::Completed(_)));
        assert!(ctx.notifications().is_empty());
        match &ctx.events()[0] {
            CoreEvent::TimerFinished(payload) => assert!(!payload.play_sound),
            other => panic!("unexpected event {other:?}"),
        }
        // Breaks do not produce pomodoro records.
        assert!(ctx.store.get(KEY_POMODORO_RECORDS).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_completion_write_defers_announcement_to_next_tick() {
        let ctx = TestCtx::new();
        seed_tasks(&ctx, &[make_task("a")]).await;
        start_timer_impl(&ctx, Some("a".into())).await;
        ctx.clock.advance_secs(25 * 60);

        ctx.store.fail_writes(true);
        let res = tick_impl(&ctx).await;
        assert!(!res.ok);
        assert!(ctx.events().is_empty());

        ctx.store.fail_writes(false);
        let res = tick_impl(&ctx).await;
        assert!(matches!(res.data, Some(TickOutcome::Completed(_))));
        assert_eq!(ctx.events().len(), 1);
        assert_eq!(stored_tasks(&ctx).await[0].pomodoro_count, 1);
    }

    #[tokio::test]
    async fn store_failures_fall_back_to_defaults() {
        let ctx = TestCtx::new();
        ctx.store.fail_reads(true);
        ctx.store.fail_writes(true);

        let state = load_state_impl(&ctx).await;
        assert!(state.ok);
        let state = state.data.unwrap();
        assert_eq!(state.timer, TimerSnapshot::default());
        assert!(state.tasks.is_empty());

        // Break mode needs no task; the command still succeeds in memory.
        let res = switch_mode_impl(&ctx, TimerMode::LongBreak).await;
        assert!(res.ok);
        assert_eq!(res.data.unwrap().remaining_seconds, 15 * 60);
        assert!(reset_timer_impl(&ctx).await.ok);

        let res = create_task_impl(&ctx, "write".into(), Priority::High).await;
        assert!(!res.ok);
    }

    #[tokio::test]
    async fn adjust_duration_is_noop_while_running_and_clamped_otherwise() {
        let ctx = TestCtx::new();
        seed_tasks(&ctx, &[make_task("a")]).await;
        let adjusted = adjust_duration_impl(&ctx, -(20 * 60)).await.data.unwrap();
        assert_eq!(adjusted.remaining_seconds, 300);

        let adjusted = adjust_duration_impl(&ctx, 10_000).await.data.unwrap();
        assert_eq!(adjusted.remaining_seconds, 3600);
        let settings: Settings = load(&ctx.store, KEY_SETTINGS).await.unwrap().unwrap();
        assert_eq!(settings.pomodoro_duration, 60);

        start_timer_impl(&ctx, Some("a".into())).await;
        let before = stored_snapshot(&ctx).await;
        let res = adjust_duration_impl(&ctx, 60).await;
        assert!(!res.ok);
        assert_eq!(stored_snapshot(&ctx).await, before);

        // Reset uses the adjusted duration.
        let reset = reset_timer_impl(&ctx).await.data.unwrap();
        assert_eq!(reset.remaining_seconds, 3600);
    }

    #[tokio::test]
    async fn task_commands_cover_found_not_found_and_active_task_deletion() {
        let ctx = TestCtx::new();
        assert!(!create_task_impl(&ctx, "   ".into(), Priority::Low).await.ok);

        let task = create_task_impl(&ctx, " Draft report ".into(), Priority::High)
            .await
            .data
            .unwrap();
        assert_eq!(task.title, "Draft report");
        assert_eq!(task.created_at, T0);

        let done = set_task_status_impl(&ctx, task.id.clone(), TaskStatus::Completed)
            .await
            .data
            .unwrap();
        assert_eq!(done.completed_at, Some(T0));
        let reopened = set_task_status_impl(&ctx, task.id.clone(), TaskStatus::Todo)
            .await
            .data
            .unwrap();
        assert_eq!(reopened.completed_at, None);
        let res = set_task_status_impl(&ctx, "missing".into(), TaskStatus::Todo).await;
        assert_eq!(res.error.as_deref(), Some("task not found"));

        start_timer_impl(&ctx, Some(task.id.clone())).await;
        ctx.clock.advance_secs(120);
        assert!(delete_task_impl(&ctx, task.id.clone()).await.ok);
        assert!(stored_tasks(&ctx).await.is_empty());
        let stored = stored_snapshot(&ctx).await;
        assert_eq!(stored.current_task_id, None);
        assert_eq!(stored.status, TimerStatus::Idle);
        assert_eq!(stored.remaining_seconds, 25 * 60);
        assert!(!delete_task_impl(&ctx, task.id).await.ok);

        // Nothing is left to complete, so no task-less record appears.
        ctx.clock.advance_secs(25 * 60);
        assert_eq!(tick_impl(&ctx).await.data, Some(TickOutcome::NotRunning));
        assert!(ctx.store.get(KEY_POMODORO_RECORDS).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn deleting_the_selected_task_of_a_break_only_deselects_it() {
        let ctx = TestCtx::new();
        seed_tasks(&ctx, &[make_task("a"), make_task("b")]).await;
        switch_mode_impl(&ctx, TimerMode::ShortBreak).await;
        start_timer_impl(&ctx, Some("a".into())).await;

        assert!(delete_task_impl(&ctx, "a".into()).await.ok);
        let stored = stored_snapshot(&ctx).await;
        assert_eq!(stored.current_task_id, None);
        assert_eq!(stored.status, TimerStatus::Running);
        assert_eq!(stored.mode, TimerMode::ShortBreak);
    }

    #[tokio::test]
    async fn pause_credits_focus_time_consumed_since_the_last_tick() {
        let ctx = TestCtx::new();
        seed_tasks(&ctx, &[make_task("a")]).await;
        start_timer_impl(&ctx, Some("a".into())).await;

        // Suspended with no surface ticking.
        ctx.clock.advance_secs(600);
        let paused = pause_timer_impl(&ctx).await.data.unwrap();
        assert_eq!(paused.session_elapsed, 600);
        assert_eq!(stored_tasks(&ctx).await[0].total_time_spent, 600);

        start_timer_impl(&ctx, None).await;
        ctx.clock.advance_secs(25 * 60);
        assert!(matches!(
            tick_impl(&ctx).await.data,
            Some(TickOutcome::Completed(_))
        ));
        let records: Vec<PomodoroRecord> =
            load(&ctx.store, KEY_POMODORO_RECORDS).await.unwrap().unwrap();
        let tasks = stored_tasks(&ctx).await;
        assert_eq!(records[0].duration, 25 * 60);
        assert_eq!(tasks[0].total_time_spent, u64::from(records[0].duration));
    }

    #[tokio::test]
    async fn corrupt_records_do_not_block_completion() {
        let ctx = TestCtx::new();
        seed_tasks(&ctx, &[make_task("a")]).await;
        ctx.store
            .commit(vec![StoreOp::set(KEY_POMODORO_RECORDS, &"garbage").unwrap()])
            .await
            .unwrap();
        start_timer_impl(&ctx, Some("a".into())).await;
        ctx.clock.advance_secs(25 * 60);

        let res = tick_impl(&ctx).await;
        assert!(matches!(res.data, Some(TickOutcome::Completed(_))));
        for _ in 0..3 {
            assert_eq!(tick_impl(&ctx).await.data, Some(TickOutcome::NotRunning));
        }
        assert_eq!(ctx.events().len(), 1);
        assert_eq!(stored_snapshot(&ctx).await.status, TimerStatus::Idle);
        let records: Vec<PomodoroRecord> =
            load(&ctx.store, KEY_POMODORO_RECORDS).await.unwrap().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].task_id.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn update_settings_moves_untouched_idle_timer() {
        let ctx = TestCtx::new();
        let next = Settings {
            pomodoro_duration: 90,
            short_break_duration: 0,
            ..Settings::default()
        };
        let saved = update_settings_impl(&ctx, next).await.data.unwrap();
        assert_eq!(saved.pomodoro_duration, 60);
        assert_eq!(saved.short_break_duration, 1);
        assert_eq!(stored_snapshot(&ctx).await.remaining_seconds, 3600);

        // A paused timer keeps its time.
        seed_tasks(&ctx, &[make_task("a")]).await;
        start_timer_impl(&ctx, Some("a".into())).await;
        ctx.clock.advance_secs(60);
        pause_timer_impl(&ctx).await;
        let next = Settings {
            pomodoro_duration: 30,
            ..saved
        };
        assert!(update_settings_impl(&ctx, next).await.ok);
        let stored = stored_snapshot(&ctx).await;
        assert_eq!(stored.paused_time, 3540);
        assert_eq!(stored.remaining_seconds, 3540);
    }
}
