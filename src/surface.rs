//! Surface sync: how a panel or widget keeps its view consistent with the store.
//!
//! A surface never trusts another surface's memory. It restores from the store
//! on mount, overwrites its local snapshot with every change the store
//! publishes, and runs its own 1 second tick while the timer is running.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::commands::{load_settings, restore_timer_impl, tick_impl, CommandCtx};
use crate::coordinator::{CoordinatorHandle, SurfaceMessage, SurfaceReply};
use crate::events::{CoreEvent, WidgetCommand};
use crate::models::{Settings, TimerMode, TimerSnapshot, TimerStatus, Timestamp};
use crate::storage::{StoreChange, KEY_SETTINGS, KEY_TIMER_STATE};
use crate::timer::format_clock;

const TICK_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SurfaceKind {
    Panel,
    Widget,
}

/// What a surface renders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerView {
    pub status: TimerStatus,
    pub mode: TimerMode,
    pub remaining_seconds: u32,
    pub display: String,
    pub current_task_id: Option<String>,
    pub visible: bool,
}

pub struct SurfaceState {
    kind: SurfaceKind,
    snapshot: TimerSnapshot,
    settings: Settings,
    visible: bool,
}

impl SurfaceState {
    pub async fn mount(kind: SurfaceKind, ctx: &impl CommandCtx) -> Self {
        let settings = load_settings(ctx).await;
        let snapshot = match restore_timer_impl(ctx).await.data {
            Some(restored) => restored.snapshot,
            None => TimerSnapshot::idle(TimerMode::Pomodoro, &settings),
        };
        Self {
            kind,
            snapshot,
            settings,
            visible: kind == SurfaceKind::Panel,
        }
    }

    pub fn kind(&self) -> SurfaceKind {
        self.kind
    }

    pub fn snapshot(&self) -> &TimerSnapshot {
        &self.snapshot
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    /// Panels are always visible; only a widget follows widget commands.
    pub fn apply_widget_command(&mut self, command: WidgetCommand) {
        if self.kind == SurfaceKind::Widget {
            self.visible = command == WidgetCommand::Show;
        }
    }

    /// Last write wins: a published snapshot replaces the local one outright.
    /// Returns whether the change concerned this surface.
    pub fn apply_change(&mut self, change: &StoreChange) -> bool {
        match change.key.as_str() {
            KEY_TIMER_STATE => {
                self.snapshot = match &change.new_value {
                    None => TimerSnapshot::idle(self.snapshot.mode, &self.settings),
                    Some(value) => match serde_json::from_value(value.clone()) {
                        Ok(snapshot) => snapshot,
                        Err(error) => {
                            log::warn!("surface ignored unreadable timer state err={error}");
                            return false;
                        }
                    },
                };
                true
            }
            KEY_SETTINGS => {
                self.settings = match &change.new_value {
                    None => Settings::default(),
                    Some(value) => serde_json::from_value(value.clone()).unwrap_or_else(|error| {
                        log::warn!("surface ignored unreadable settings err={error}");
                        self.settings.clone()
                    }),
                };
                true
            }
            _ => false,
        }
    }

    pub async fn resync(&mut self, ctx: &impl CommandCtx) {
        let kind = self.kind;
        let visible = self.visible;
        *self = Self::mount(kind, ctx).await;
        self.visible = visible;
    }

    pub fn view(&self, now: Timestamp) -> TimerView {
        let remaining_seconds = self.snapshot.remaining_at(now);
        TimerView {
            status: self.snapshot.status,
            mode: self.snapshot.mode,
            remaining_seconds,
            display: format_clock(remaining_seconds),
            current_task_id: self.snapshot.current_task_id.clone(),
            visible: self.visible,
        }
    }
}

/// Drives one surface until every receiver of `views` is dropped.
pub async fn run_surface<C: CommandCtx + 'static>(
    kind: SurfaceKind,
    ctx: Arc<C>,
    views: watch::Sender<TimerView>,
    coordinator: Option<CoordinatorHandle>,
) {
    let mut changes = ctx.store().watch();
    let mut events = ctx.subscribe_events();
    let mut listening = kind == SurfaceKind::Widget;
    let mut state = SurfaceState::mount(kind, ctx.as_ref()).await;
    match kind {
        SurfaceKind::Panel => {
            if let Some(coordinator) = &coordinator {
                coordinator.send(SurfaceMessage::PanelOpened).await;
            }
        }
        SurfaceKind::Widget => ask_widget_visibility(&mut state, coordinator.as_ref()).await,
    }
    log::info!("surface mounted kind={kind:?}");
    publish(&views, state.view(ctx.now_ms()));

    let mut interval = tokio::time::interval(TICK_INTERVAL);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = views.closed() => break,
            _ = interval.tick() => {
                if state.snapshot().is_running() {
                    let result = tick_impl(ctx.as_ref()).await;
                    if !result.ok {
                        log::warn!("surface tick failed kind={kind:?} err={:?}", result.error);
                    }
                }
            }
            change = changes.recv() => match change {
                Ok(change) => {
                    state.apply_change(&change);
                }
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!("surface lagged kind={kind:?} skipped={skipped}; resyncing");
                    state.resync(ctx.as_ref()).await;
                }
                Err(RecvError::Closed) => break,
            },
            event = events.recv(), if listening => match event {
                Ok(CoreEvent::Widget { command }) => state.apply_widget_command(command),
                Ok(CoreEvent::PresenceChanged { .. }) | Err(RecvError::Lagged(_)) => {
                    ask_widget_visibility(&mut state, coordinator.as_ref()).await;
                }
                Ok(_) => {}
                Err(RecvError::Closed) => listening = false,
            },
        }
        publish(&views, state.view(ctx.now_ms()));
    }

    if let (SurfaceKind::Panel, Some(coordinator)) = (kind, &coordinator) {
        coordinator.send(SurfaceMessage::PanelClosed).await;
    }
    log::info!("surface closed kind={kind:?}");
}

/// Without a coordinator the widget keeps its current visibility.
async fn ask_widget_visibility(
    state: &mut SurfaceState,
    coordinator: Option<&CoordinatorHandle>,
) {
    let Some(coordinator) = coordinator else {
        return;
    };
    match coordinator.request(SurfaceMessage::ShouldShowWidget).await {
        Some(SurfaceReply::ShowWidget { show }) => state.set_visible(show),
        other => log::warn!("widget visibility unanswered reply={other:?}"),
    }
}

fn publish(views: &watch::Sender<TimerView>, next: TimerView) {
    views.send_if_modified(|current| {
        if *current == next {
            return false;
        }
        *current = next;
        true
    });
}
