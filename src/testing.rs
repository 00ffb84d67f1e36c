//! Fakes shared by the unit tests of every module.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, TimeZone};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::clock::{Clock, ManualClock};
use crate::commands::CommandCtx;
use crate::events::{CoreEvent, EventHub, NotificationRequest};
use crate::models::{Priority, Task, TaskStatus, Timestamp};
use crate::storage::{KvStore, MemoryStore, StorageError, StoreChange, StoreOp};

/// 2025-06-01 09:00:00 +02:00
pub const T0: Timestamp = 1_748_761_200_000;

pub fn local(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<FixedOffset> {
    FixedOffset::east_opt(2 * 3600)
        .unwrap()
        .with_ymd_and_hms(y, m, d, h, min, s)
        .single()
        .unwrap()
}

pub fn make_task(id: &str) -> Task {
    Task {
        id: id.to_string(),
        title: format!("task-{id}"),
        status: TaskStatus::Todo,
        priority: Priority::Medium,
        pomodoro_count: 0,
        total_time_spent: 0,
        created_at: 1,
        completed_at: None,
    }
}

/// A `MemoryStore` whose reads and writes can be switched to fail.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl FlakyStore {
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl KvStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable(format!("read {key}")));
        }
        self.inner.get(key).await
    }

    async fn commit(&self, ops: Vec<StoreOp>) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("write".to_string()));
        }
        self.inner.commit(ops).await
    }

    fn watch(&self) -> broadcast::Receiver<StoreChange> {
        self.inner.watch()
    }
}

pub struct TestCtx {
    pub store: FlakyStore,
    pub clock: ManualClock,
    hub: EventHub,
    emitted: Mutex<Vec<CoreEvent>>,
    notified: Mutex<Vec<NotificationRequest>>,
}

impl TestCtx {
    pub fn new() -> Self {
        Self::at(local(2025, 6, 1, 9, 0, 0))
    }

    pub fn at(now: DateTime<FixedOffset>) -> Self {
        Self {
            store: FlakyStore::default(),
            clock: ManualClock::new(now),
            hub: EventHub::new(),
            emitted: Mutex::new(Vec::new()),
            notified: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<CoreEvent> {
        self.emitted.lock().unwrap().clone()
    }

    pub fn notifications(&self) -> Vec<NotificationRequest> {
        self.notified.lock().unwrap().clone()
    }
}

impl CommandCtx for TestCtx {
    fn store(&self) -> &dyn KvStore {
        &self.store
    }

    fn clock(&self) -> &dyn Clock {
        &self.clock
    }

    fn emit(&self, event: CoreEvent) {
        self.emitted.lock().unwrap().push(event.clone());
        self.hub.publish(event);
    }

    fn notify(&self, request: NotificationRequest) {
        self.notified.lock().unwrap().push(request);
    }

    fn subscribe_events(&self) -> broadcast::Receiver<CoreEvent> {
        self.hub.subscribe()
    }
}

#[test]
fn t0_matches_the_default_test_clock() {
    assert_eq!(TestCtx::new().clock.now_ms(), T0);
}
