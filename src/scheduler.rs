use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Named alarms on tokio timers. Creating an alarm under an existing name
/// replaces it; every firing is delivered as the alarm's name.
pub struct AlarmScheduler {
    alarms: Mutex<HashMap<String, JoinHandle<()>>>,
    fired: mpsc::UnboundedSender<String>,
}

impl AlarmScheduler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (fired, rx) = mpsc::unbounded_channel();
        (
            Self {
                alarms: Mutex::new(HashMap::new()),
                fired,
            },
            rx,
        )
    }

    /// Must be called from within a tokio runtime.
    pub fn create(&self, name: &str, delay: Duration, period: Option<Duration>) {
        let tx = self.fired.clone();
        let alarm = name.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            log::debug!("alarm fired name={alarm}");
            if tx.send(alarm.clone()).is_err() {
                return;
            }
            let Some(period) = period else {
                return;
            };
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                log::debug!("alarm fired name={alarm}");
                if tx.send(alarm.clone()).is_err() {
                    return;
                }
            }
        });

        let mut guard = self.alarms.lock().expect("state poisoned");
        if let Some(previous) = guard.insert(name.to_string(), handle) {
            previous.abort();
        }
        log::debug!(
            "alarm created name={name} delay_ms={} period_ms={:?}",
            delay.as_millis(),
            period.map(|p| p.as_millis())
        );
    }

    pub fn clear(&self, name: &str) -> bool {
        let mut guard = self.alarms.lock().expect("state poisoned");
        match guard.remove(name) {
            Some(handle) => {
                let pending = !handle.is_finished();
                handle.abort();
                log::debug!("alarm cleared name={name} pending={pending}");
                pending
            }
            None => false,
        }
    }

    pub fn is_scheduled(&self, name: &str) -> bool {
        let guard = self.alarms.lock().expect("state poisoned");
        guard.get(name).is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for AlarmScheduler {
    fn drop(&mut self) {
        if let Ok(guard) = self.alarms.lock() {
            for handle in guard.values() {
                handle.abort();
            }
        }
    }
}
