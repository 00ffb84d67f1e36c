use serde::{Deserialize, Serialize};

/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TimerStatus {
    #[default]
    Idle,
    Running,
    Paused,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum TimerMode {
    #[default]
    Pomodoro,
    ShortBreak,
    LongBreak,
}

impl TimerMode {
    pub fn label(&self) -> &'static str {
        match self {
            TimerMode::Pomodoro => "Pomodoro",
            TimerMode::ShortBreak => "Short Break",
            TimerMode::LongBreak => "Long Break",
        }
    }

    /// Only focus sessions accumulate task time and produce pomodoro records.
    pub fn is_focus(&self) -> bool {
        matches!(self, TimerMode::Pomodoro)
    }
}

impl std::str::FromStr for TimerMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "pomodoro" => Ok(TimerMode::Pomodoro),
            "shortBreak" => Ok(TimerMode::ShortBreak),
            "longBreak" => Ok(TimerMode::LongBreak),
            other => Err(format!("unknown timer mode: {other}")),
        }
    }
}

/// The single persisted timer record shared by every surface.
///
/// While `status` is `Running`, `remaining_seconds` is the remaining time as of
/// `start_time`; the true remaining time is derived from the wall clock. In any
/// other status the stored seconds are authoritative.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TimerSnapshot {
    pub status: TimerStatus,
    pub mode: TimerMode,
    pub remaining_seconds: u32,
    pub start_time: Timestamp,
    pub paused_time: u32,
    pub current_task_id: Option<String>,
    #[serde(default)]
    pub session_started_at: Option<Timestamp>,
    #[serde(default)]
    pub session_elapsed: u32,
}

impl TimerSnapshot {
    pub fn idle(mode: TimerMode, settings: &Settings) -> Self {
        Self {
            status: TimerStatus::Idle,
            mode,
            remaining_seconds: settings.duration_seconds(mode),
            start_time: 0,
            paused_time: 0,
            current_task_id: None,
            session_started_at: None,
            session_elapsed: 0,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == TimerStatus::Running
    }

    /// Remaining seconds at `now`, never negative.
    pub fn remaining_at(&self, now: Timestamp) -> u32 {
        match self.status {
            TimerStatus::Running => self
                .remaining_seconds
                .saturating_sub(whole_seconds_since(self.start_time, now)),
            TimerStatus::Paused => self.paused_time,
            TimerStatus::Idle => self.remaining_seconds,
        }
    }

    /// Wall-clock deadline of a running countdown.
    pub fn deadline(&self) -> Option<Timestamp> {
        if !self.is_running() {
            return None;
        }
        Some(self.start_time + i64::from(self.remaining_seconds) * 1000)
    }
}

impl Default for TimerSnapshot {
    fn default() -> Self {
        Self::idle(TimerMode::Pomodoro, &Settings::default())
    }
}

/// Whole seconds elapsed between two millisecond timestamps; a clock that went
/// backwards counts as zero.
pub fn whole_seconds_since(start: Timestamp, now: Timestamp) -> u32 {
    let elapsed_ms = now.saturating_sub(start).max(0);
    u32::try_from(elapsed_ms / 1000).unwrap_or(u32::MAX)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub pomodoro_count: u32,
    /// Seconds of focus time spent on this task.
    #[serde(default)]
    pub total_time_spent: u64,
    pub created_at: Timestamp,
    #[serde(default)]
    pub completed_at: Option<Timestamp>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PomodoroRecord {
    pub id: String,
    pub task_id: Option<String>,
    pub start_time: Timestamp,
    pub end_time: Timestamp,
    /// Seconds of countdown consumed by the session.
    pub duration: u32,
    pub completed: bool,
}

/// Archived working data of one calendar day.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DailyHistory {
    pub date: String,
    pub tasks: Vec<Task>,
    pub pomodoro_records: Vec<PomodoroRecord>,
    pub completed_pomodoros: u32,
    /// Minutes.
    pub total_focus_time: u64,
    pub completed_tasks: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AiProvider {
    #[default]
    Builtin,
    Cloud,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Minutes.
    #[serde(default = "default_pomodoro_minutes")]
    pub pomodoro_duration: u32,
    #[serde(default = "default_short_break_minutes")]
    pub short_break_duration: u32,
    #[serde(default = "default_long_break_minutes")]
    pub long_break_duration: u32,
    #[serde(default = "default_true")]
    pub sound_enabled: bool,
    #[serde(default = "default_true")]
    pub notifications_enabled: bool,
    #[serde(default = "default_true")]
    pub floating_widget_enabled: bool,
    #[serde(default)]
    pub ai_provider: AiProvider,
}

impl Settings {
    pub fn duration_minutes(&self, mode: TimerMode) -> u32 {
        match mode {
            TimerMode::Pomodoro => self.pomodoro_duration,
            TimerMode::ShortBreak => self.short_break_duration,
            TimerMode::LongBreak => self.long_break_duration,
        }
    }

    pub fn duration_seconds(&self, mode: TimerMode) -> u32 {
        self.duration_minutes(mode).saturating_mul(60)
    }

    pub fn set_duration_minutes(&mut self, mode: TimerMode, minutes: u32) {
        match mode {
            TimerMode::Pomodoro => self.pomodoro_duration = minutes,
            TimerMode::ShortBreak => self.short_break_duration = minutes,
            TimerMode::LongBreak => self.long_break_duration = minutes,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            pomodoro_duration: default_pomodoro_minutes(),
            short_break_duration: default_short_break_minutes(),
            long_break_duration: default_long_break_minutes(),
            sound_enabled: true,
            notifications_enabled: true,
            floating_widget_enabled: true,
            ai_provider: AiProvider::Builtin,
        }
    }
}

fn default_pomodoro_minutes() -> u32 {
    25
}

fn default_short_break_minutes() -> u32 {
    5
}

fn default_long_break_minutes() -> u32 {
    15
}

fn default_true() -> bool {
    true
}
