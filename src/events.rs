use serde::Serialize;
use tokio::sync::broadcast;

use crate::models::{TimerMode, Timestamp};

pub const EVENT_TIMER_FINISHED: &str = "timer_finished";
pub const EVENT_DAILY_RESET: &str = "daily_reset";
pub const EVENT_WIDGET: &str = "widget_command";
pub const EVENT_OPEN_PANEL: &str = "open_panel";
pub const EVENT_PRESENCE: &str = "presence_changed";

const EVENT_HUB_CAPACITY: usize = 64;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TimerFinishedPayload {
    pub mode: TimerMode,
    pub task_id: Option<String>,
    pub finished_at: Timestamp,
    /// Surfaces play the completion cue when set.
    pub play_sound: bool,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WidgetCommand {
    Show,
    Hide,
    Remove,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoreEvent {
    TimerFinished(TimerFinishedPayload),
    DailyReset { date: String },
    Widget { command: WidgetCommand },
    OpenPanel,
    /// A panel opened or closed; widgets re-ask whether to show themselves.
    PresenceChanged { open_panels: usize },
}

impl CoreEvent {
    pub fn name(&self) -> &'static str {
        match self {
            CoreEvent::TimerFinished(_) => EVENT_TIMER_FINISHED,
            CoreEvent::DailyReset { .. } => EVENT_DAILY_RESET,
            CoreEvent::Widget { .. } => EVENT_WIDGET,
            CoreEvent::OpenPanel => EVENT_OPEN_PANEL,
            CoreEvent::PresenceChanged { .. } => EVENT_PRESENCE,
        }
    }
}

/// Request for the notification collaborator.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRequest {
    pub title: String,
    pub body: String,
}

impl NotificationRequest {
    pub fn for_completion(mode: TimerMode) -> Self {
        let (title, body) = if mode.is_focus() {
            ("Pomodoro complete!", "Work done! Time for a break.")
        } else {
            ("Break over!", "Time to work.")
        };
        Self {
            title: title.to_string(),
            body: body.to_string(),
        }
    }
}

/// Fan-out to whatever surfaces are currently listening.
#[derive(Debug, Clone)]
pub struct EventHub {
    events: broadcast::Sender<CoreEvent>,
    notifications: broadcast::Sender<NotificationRequest>,
}

impl EventHub {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_HUB_CAPACITY);
        let (notifications, _) = broadcast::channel(EVENT_HUB_CAPACITY);
        Self {
            events,
            notifications,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.events.subscribe()
    }

    pub fn subscribe_notifications(&self) -> broadcast::Receiver<NotificationRequest> {
        self.notifications.subscribe()
    }

    pub fn publish(&self, event: CoreEvent) {
        let name = event.name();
        if self.events.send(event).is_err() {
            log::debug!("event dropped, no listeners event={name}");
        }
    }

    pub fn notify(&self, request: NotificationRequest) {
        if self.notifications.send(request).is_err() {
            log::debug!("notification dropped, no listeners");
        }
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}
