use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::events::WidgetCommand;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WidgetVisibility {
    #[default]
    Hidden,
    Shown,
    /// Dismissed by the user; stays gone until explicitly shown again.
    Removed,
}

/// What the coordinator knows about open surfaces. Lives only as long as the
/// coordinator process; surfaces re-announce themselves after a restart.
#[derive(Clone, Default)]
pub struct PresenceState {
    inner: Arc<Mutex<Presence>>,
}

#[derive(Debug, Default)]
struct Presence {
    open_panels: usize,
    widget: WidgetVisibility,
}

impl PresenceState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn panel_opened(&self) -> usize {
        let mut guard = self.inner.lock().expect("state poisoned");
        guard.open_panels += 1;
        guard.open_panels
    }

    pub fn panel_closed(&self) -> usize {
        let mut guard = self.inner.lock().expect("state poisoned");
        guard.open_panels = guard.open_panels.saturating_sub(1);
        guard.open_panels
    }

    pub fn panel_open(&self) -> bool {
        let guard = self.inner.lock().expect("state poisoned");
        guard.open_panels > 0
    }

    /// The floating widget stands in for the panel while the panel is closed.
    pub fn should_show_widget(&self, widget_enabled: bool) -> bool {
        let guard = self.inner.lock().expect("state poisoned");
        widget_enabled && guard.open_panels == 0 && guard.widget != WidgetVisibility::Removed
    }

    pub fn apply_widget_command(&self, command: WidgetCommand) -> WidgetVisibility {
        let mut guard = self.inner.lock().expect("state poisoned");
        guard.widget = match command {
            WidgetCommand::Show => WidgetVisibility::Shown,
            WidgetCommand::Hide => WidgetVisibility::Hidden,
            WidgetCommand::Remove => WidgetVisibility::Removed,
        };
        guard.widget
    }

    pub fn widget(&self) -> WidgetVisibility {
        let guard = self.inner.lock().expect("state poisoned");
        guard.widget
    }
}
