//! Line commands for the headless binary.

use serde::Serialize;

use crate::commands::{
    adjust_duration_impl, create_task_impl, load_state_impl, pause_timer_impl, reset_timer_impl,
    set_task_status_impl, start_timer_impl, switch_mode_impl, CommandCtx,
};
use crate::coordinator::{CoordinatorHandle, SurfaceMessage};
use crate::models::{Priority, TaskStatus, TimerMode};

pub const HELP: &str = "commands: start [taskId] | pause | reset | adjust <seconds> | \
mode <pomodoro|shortBreak|longBreak> | task <title> | done <taskId> | archive | status | quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    Start(Option<String>),
    Pause,
    Reset,
    Adjust(i64),
    Mode(TimerMode),
    Task(String),
    Done(String),
    Archive,
    Status,
    Help,
    Quit,
}

/// `Ok(None)` for a blank line.
pub fn parse_line(line: &str) -> Result<Option<ShellCommand>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    };
    let command = match verb {
        "start" => ShellCommand::Start((!rest.is_empty()).then(|| rest.to_string())),
        "pause" => ShellCommand::Pause,
        "reset" => ShellCommand::Reset,
        "adjust" => ShellCommand::Adjust(
            rest.parse()
                .map_err(|_| format!("adjust needs a number of seconds, got {rest:?}"))?,
        ),
        "mode" => ShellCommand::Mode(rest.parse()?),
        "task" if !rest.is_empty() => ShellCommand::Task(rest.to_string()),
        "done" if !rest.is_empty() => ShellCommand::Done(rest.to_string()),
        "archive" => ShellCommand::Archive,
        "status" => ShellCommand::Status,
        "help" => ShellCommand::Help,
        "quit" | "exit" => ShellCommand::Quit,
        other => return Err(format!("unknown command {other:?}; try help")),
    };
    Ok(Some(command))
}

pub async fn execute(
    ctx: &impl CommandCtx,
    coordinator: &CoordinatorHandle,
    command: ShellCommand,
) -> String {
    match command {
        ShellCommand::Start(task_id) => render(&start_timer_impl(ctx, task_id).await),
        ShellCommand::Pause => render(&pause_timer_impl(ctx).await),
        ShellCommand::Reset => render(&reset_timer_impl(ctx).await),
        ShellCommand::Adjust(delta) => render(&adjust_duration_impl(ctx, delta).await),
        ShellCommand::Mode(mode) => render(&switch_mode_impl(ctx, mode).await),
        ShellCommand::Task(title) => render(&create_task_impl(ctx, title, Priority::Medium).await),
        ShellCommand::Done(task_id) => {
            render(&set_task_status_impl(ctx, task_id, TaskStatus::Completed).await)
        }
        ShellCommand::Archive => match coordinator.request(SurfaceMessage::ForceArchive).await {
            Some(reply) => render(&reply),
            None => "coordinator is not running".to_string(),
        },
        ShellCommand::Status => render(&load_state_impl(ctx).await),
        ShellCommand::Help | ShellCommand::Quit => HELP.to_string(),
    }
}

fn render<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|error| format!("unprintable result: {error}"))
}
