//! Background coordinator: owns the wall-clock alarms and mediates between surfaces.
//!
//! The completion alarm is a backstop for the surfaces' own tick loops, so a
//! countdown finishes even when nothing is on screen. Everything it needs is
//! re-derived from the store on [`Coordinator::wake`], which makes the process
//! safe to kill and restart at any time.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::commands::{load_settings, tick_impl, CommandCtx};
use crate::dates::next_midnight;
use crate::events::{CoreEvent, WidgetCommand};
use crate::models::{TimerSnapshot, Timestamp};
use crate::rollover::{check_and_archive_if_needed, force_archive, RolloverOutcome};
use crate::scheduler::AlarmScheduler;
use crate::state::PresenceState;
use crate::storage::{load, StoreChange, KEY_TIMER_STATE};
use crate::timer::TickOutcome;

pub const ALARM_POMODORO: &str = "pomodoroTimer";
pub const ALARM_DAILY_RESET: &str = "dailyReset";

const DAY: Duration = Duration::from_secs(24 * 60 * 60);
const COMPLETION_RETRY: Duration = Duration::from_secs(1);
const REQUEST_QUEUE: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceMessage {
    PanelOpened,
    PanelClosed,
    ShouldShowWidget,
    ShowWidget,
    HideWidget,
    RemoveWidget,
    ForceArchive,
    NotificationClicked,
    IconClicked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SurfaceReply {
    Ack,
    ShowWidget { show: bool },
    Archived(RolloverOutcome),
    Failed { error: String },
}

pub struct SurfaceRequest {
    pub message: SurfaceMessage,
    pub reply: Option<oneshot::Sender<SurfaceReply>>,
}

/// Cheap sender side used by surfaces to reach the coordinator.
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<SurfaceRequest>,
}

pub fn channel() -> (CoordinatorHandle, mpsc::Receiver<SurfaceRequest>) {
    let (tx, rx) = mpsc::channel(REQUEST_QUEUE);
    (CoordinatorHandle { tx }, rx)
}

impl CoordinatorHandle {
    /// Sends a message and waits for the answer. `None` if the coordinator is gone.
    pub async fn request(&self, message: SurfaceMessage) -> Option<SurfaceReply> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SurfaceRequest {
                message,
                reply: Some(reply),
            })
            .await
            .ok()?;
        rx.await.ok()
    }

    pub async fn send(&self, message: SurfaceMessage) -> bool {
        self.tx
            .send(SurfaceRequest {
                message,
                reply: None,
            })
            .await
            .is_ok()
    }
}

pub struct Coordinator<C> {
    ctx: Arc<C>,
    alarms: AlarmScheduler,
    fired: mpsc::UnboundedReceiver<String>,
    changes: broadcast::Receiver<StoreChange>,
    presence: PresenceState,
    armed_deadline: Mutex<Option<Timestamp>>,
}

impl<C: CommandCtx + 'static> Coordinator<C> {
    /// Subscribes to store changes immediately, so nothing committed after
    /// construction is missed.
    pub fn new(ctx: Arc<C>) -> Self {
        let (alarms, fired) = AlarmScheduler::new();
        let changes = ctx.store().watch();
        Self {
            ctx,
            alarms,
            fired,
            changes,
            presence: PresenceState::new(),
            armed_deadline: Mutex::new(None),
        }
    }

    pub fn presence(&self) -> &PresenceState {
        &self.presence
    }

    pub fn alarms(&self) -> &AlarmScheduler {
        &self.alarms
    }

    pub fn armed_deadline(&self) -> Option<Timestamp> {
        *self.armed_deadline.lock().expect("state poisoned")
    }

    /// Process start: catch up on a missed rollover, then re-derive both alarms.
    pub async fn wake(&self) {
        if let Ok(outcome) = check_and_archive_if_needed(self.ctx.as_ref()).await {
            log::info!(
                "coordinator awake today={} rollover_performed={}",
                outcome.today,
                outcome.performed
            );
        }
        self.schedule_daily_reset();
        self.sync_completion_alarm().await;
    }

    pub fn schedule_daily_reset(&self) {
        let now = self.ctx.local_now();
        let midnight = next_midnight(&now);
        let delay = (midnight - now).to_std().unwrap_or(Duration::ZERO);
        log::info!("daily reset scheduled at={midnight} in_secs={}", delay.as_secs());
        self.alarms.create(ALARM_DAILY_RESET, delay, Some(DAY));
    }

    /// Re-arms the completion alarm from the stored snapshot.
    pub async fn sync_completion_alarm(&self) {
        match load::<TimerSnapshot>(self.ctx.store(), KEY_TIMER_STATE).await {
            Ok(Some(snapshot)) => self.arm_for(&snapshot),
            Ok(None) => self.disarm(),
            Err(error) => {
                log::warn!("timer state unreadable err={error}; keeping current alarm");
            }
        }
    }

    /// Ticks move `start_time` but keep the deadline, so they leave a
    /// pending alarm alone.
    fn arm_for(&self, snapshot: &TimerSnapshot) {
        let Some(deadline) = snapshot.deadline() else {
            self.disarm();
            return;
        };
        {
            let mut armed = self.armed_deadline.lock().expect("state poisoned");
            if *armed == Some(deadline) && self.alarms.is_scheduled(ALARM_POMODORO) {
                return;
            }
            *armed = Some(deadline);
        }
        let left_ms = (deadline - self.ctx.now_ms()).max(0);
        let delay = Duration::from_millis(u64::try_from(left_ms).unwrap_or(0));
        self.alarms.create(ALARM_POMODORO, delay, None);
    }

    fn disarm(&self) {
        *self.armed_deadline.lock().expect("state poisoned") = None;
        self.alarms.clear(ALARM_POMODORO);
    }

    pub async fn on_alarm(&self, name: &str) {
        match name {
            ALARM_POMODORO => {
                let result = tick_impl(self.ctx.as_ref()).await;
                match result.data {
                    Some(TickOutcome::Completed(_)) => {
                        log::info!("completion alarm finished the countdown");
                    }
                    Some(TickOutcome::Running { remaining, .. }) => {
                        log::debug!("completion alarm early remaining={remaining}; re-arming");
                        *self.armed_deadline.lock().expect("state poisoned") = None;
                        self.sync_completion_alarm().await;
                    }
                    Some(TickOutcome::NotRunning) => {}
                    None => {
                        log::warn!(
                            "completion alarm tick failed err={:?}; retrying",
                            result.error
                        );
                        self.alarms.create(ALARM_POMODORO, COMPLETION_RETRY, None);
                    }
                }
            }
            ALARM_DAILY_RESET => {
                // Errors are logged by the rollover; the next wake-up retries.
                let _ = check_and_archive_if_needed(self.ctx.as_ref()).await;
                self.schedule_daily_reset();
            }
            other => log::warn!("unknown alarm name={other}"),
        }
    }

    pub async fn on_store_change(&self, change: StoreChange) {
        if change.key != KEY_TIMER_STATE {
            return;
        }
        match change.new_value {
            None => self.disarm(),
            Some(value) => match serde_json::from_value::<TimerSnapshot>(value) {
                Ok(snapshot) => self.arm_for(&snapshot),
                Err(error) => log::warn!("timer state change unreadable err={error}"),
            },
        }
    }

    pub async fn handle(&self, message: SurfaceMessage) -> SurfaceReply {
        log::debug!("surface message {message:?}");
        match message {
            SurfaceMessage::PanelOpened => {
                let open_panels = self.presence.panel_opened();
                self.ctx.emit(CoreEvent::PresenceChanged { open_panels });
                SurfaceReply::Ack
            }
            SurfaceMessage::PanelClosed => {
                let open_panels = self.presence.panel_closed();
                self.ctx.emit(CoreEvent::PresenceChanged { open_panels });
                SurfaceReply::Ack
            }
            SurfaceMessage::ShouldShowWidget => {
                let settings = load_settings(self.ctx.as_ref()).await;
                SurfaceReply::ShowWidget {
                    show: self
                        .presence
                        .should_show_widget(settings.floating_widget_enabled),
                }
            }
            SurfaceMessage::ShowWidget => self.widget(WidgetCommand::Show),
            SurfaceMessage::HideWidget => self.widget(WidgetCommand::Hide),
            SurfaceMessage::RemoveWidget => self.widget(WidgetCommand::Remove),
            SurfaceMessage::ForceArchive => match force_archive(self.ctx.as_ref()).await {
                Ok(outcome) => SurfaceReply::Archived(outcome),
                Err(error) => SurfaceReply::Failed {
                    error: error.to_string(),
                },
            },
            SurfaceMessage::NotificationClicked | SurfaceMessage::IconClicked => {
                self.ctx.emit(CoreEvent::OpenPanel);
                SurfaceReply::Ack
            }
        }
    }

    fn widget(&self, command: WidgetCommand) -> SurfaceReply {
        self.presence.apply_widget_command(command);
        self.ctx.emit(CoreEvent::Widget { command });
        SurfaceReply::Ack
    }

    /// Serves alarms, store changes and surface requests until every
    /// [`CoordinatorHandle`] is dropped.
    pub async fn run(mut self, mut requests: mpsc::Receiver<SurfaceRequest>) {
        loop {
            tokio::select! {
                Some(name) = self.fired.recv() => self.on_alarm(&name).await,
                change = self.changes.recv() => match change {
                    Ok(change) => self.on_store_change(change).await,
                    Err(RecvError::Lagged(skipped)) => {
                        log::warn!("store change feed lagged skipped={skipped}; resyncing");
                        self.sync_completion_alarm().await;
                    }
                    Err(RecvError::Closed) => {
                        log::warn!("store change feed closed; coordinator stopping");
                        break;
                    }
                },
                request = requests.recv() => match request {
                    Some(SurfaceRequest { message, reply }) => {
                        let answer = self.handle(message).await;
                        if let Some(reply) = reply {
                            let _ = reply.send(answer);
                        }
                    }
                    None => {
                        log::info!("no surfaces left; coordinator stopping");
                        break;
                    }
                },
            }
        }
    }
}
