pub mod clock;
pub mod commands;
pub mod config;
pub mod coordinator;
pub mod dates;
pub mod events;
pub mod logging;
pub mod models;
pub mod rollover;
pub mod scheduler;
pub mod shell;
pub mod state;
pub mod storage;
pub mod surface;
pub mod timer;

#[cfg(test)]
mod testing;

#[cfg(all(feature = "app", not(test)))]
use std::sync::Arc;

#[cfg(all(feature = "app", not(test)))]
use crate::clock::SystemClock;
#[cfg(all(feature = "app", not(test)))]
use crate::commands::{restore_timer_impl, CommandCtx, CoreContext};
#[cfg(all(feature = "app", not(test)))]
use crate::config::RuntimeConfig;
#[cfg(all(feature = "app", not(test)))]
use crate::coordinator::Coordinator;
#[cfg(all(feature = "app", not(test)))]
use crate::shell::{execute, parse_line, ShellCommand, HELP};
#[cfg(all(feature = "app", not(test)))]
use crate::storage::{FileStore, KvStore};
#[cfg(all(feature = "app", not(test)))]
use crate::surface::{run_surface, SurfaceKind, SurfaceState};

/// Headless host: one coordinator plus a panel surface driven from stdin.
#[cfg(all(feature = "app", not(test)))]
pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = RuntimeConfig::from_env();
    logging::init_logging(&config.data_dir, &config.log_spec)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(serve(config))
}

#[cfg(all(feature = "app", not(test)))]
async fn serve(config: RuntimeConfig) -> Result<(), Box<dyn std::error::Error>> {
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::sync::broadcast::error::RecvError;
    use tokio::sync::watch;

    let store: Arc<dyn KvStore> = Arc::new(FileStore::open(config.data_dir.clone())?);
    let ctx = Arc::new(CoreContext::new(store, Arc::new(SystemClock)));
    let mut events = ctx.hub().subscribe();
    let mut notifications = ctx.hub().subscribe_notifications();

    let coordinator = Coordinator::new(ctx.clone());
    coordinator.wake().await;
    if let Some(restored) = restore_timer_impl(ctx.as_ref()).await.data {
        println!(
            "timer {:?} {:?} {}",
            restored.snapshot.status,
            restored.snapshot.mode,
            timer::format_clock(restored.remaining_seconds)
        );
    }
    let (handle, requests) = coordinator::channel();
    let coordinator_task = tokio::spawn(coordinator.run(requests));

    let initial = SurfaceState::mount(SurfaceKind::Panel, ctx.as_ref())
        .await
        .view(ctx.now_ms());
    let (view_tx, view_rx) = watch::channel(initial);
    let panel_task = tokio::spawn(run_surface(
        SurfaceKind::Panel,
        ctx.clone(),
        view_tx,
        Some(handle.clone()),
    ));

    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(error) => {
                        log::error!("stdin read failed err={error}");
                        break;
                    }
                };
                match parse_line(&line) {
                    Ok(None) => {}
                    Ok(Some(ShellCommand::Quit)) => break,
                    Ok(Some(ShellCommand::Status)) => {
                        let view = view_rx.borrow().clone();
                        println!("{} {:?} {:?}", view.display, view.status, view.mode);
                        println!("{}", execute(ctx.as_ref(), &handle, ShellCommand::Status).await);
                    }
                    Ok(Some(command)) => {
                        println!("{}", execute(ctx.as_ref(), &handle, command).await);
                    }
                    Err(message) => println!("{message}"),
                }
            }
            event = events.recv() => match event {
                Ok(event) => println!("event {}", serde_json::to_string(&event)?),
                Err(RecvError::Lagged(skipped)) => log::warn!("event feed lagged skipped={skipped}"),
                Err(RecvError::Closed) => break,
            },
            notification = notifications.recv() => {
                if let Ok(notification) = notification {
                    println!("notification {}: {}", notification.title, notification.body);
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    log::info!("shutting down");
    drop(view_rx);
    drop(handle);
    panel_task.await?;
    coordinator_task.await?;
    Ok(())
}
