//! In-memory collaborators shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use homebot_scheduler::{
    CancelTask, ContentError, ContentProvider, DispatchError, Homework, Lesson, ManualClock,
    Notifier, NotifyConfig, OwnerId, RepositoryError, SchedulerDriver, Subscriber,
    SubscriberRepository, TaskCallback, TaskHandle, TaskScheduler,
};

pub const OWNER: OwnerId = OwnerId(42);

pub fn zone() -> FixedOffset {
    NotifyConfig::default().zone
}

pub fn hm(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

/// 2026-03-02 is a Monday.
pub fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
}

/// Instant of local wall time `h:m` on `day(d)`.
pub fn local(d: u32, h: u32, m: u32) -> DateTime<Utc> {
    zone()
        .with_ymd_and_hms(2026, 3, d, h, m, 0)
        .unwrap()
        .with_timezone(&Utc)
}

pub fn homework(id: i64, subject: &str, due: NaiveDate, completed: bool) -> Homework {
    Homework {
        id,
        subject: subject.to_string(),
        description: format!("task {id}"),
        due,
        completed,
    }
}

// === Content ===

#[derive(Default)]
pub struct FakeContent {
    lessons: Mutex<HashMap<(OwnerId, NaiveDate), Vec<Lesson>>>,
    homework: Mutex<Vec<(OwnerId, Homework)>>,
    purged: Mutex<Vec<NaiveDate>>,
    broken_timetables: Mutex<HashSet<OwnerId>>,
    broken_homework: AtomicBool,
}

impl FakeContent {
    pub fn set_lessons(&self, owner: OwnerId, date: NaiveDate, lessons: Vec<Lesson>) {
        self.lessons.lock().unwrap().insert((owner, date), lessons);
    }

    pub fn add_homework(&self, owner: OwnerId, item: Homework) {
        self.homework.lock().unwrap().push((owner, item));
    }

    pub fn break_timetable(&self, owner: OwnerId) {
        self.broken_timetables.lock().unwrap().insert(owner);
    }

    pub fn break_homework(&self) {
        self.broken_homework.store(true, Ordering::SeqCst);
    }

    pub fn purged(&self) -> Vec<NaiveDate> {
        self.purged.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContentProvider for FakeContent {
    async fn lessons_for_date(
        &self,
        owner: OwnerId,
        date: NaiveDate,
    ) -> Result<Vec<Lesson>, ContentError> {
        if self.broken_timetables.lock().unwrap().contains(&owner) {
            return Err(ContentError::Store("timetable unavailable".to_string()));
        }
        Ok(self
            .lessons
            .lock()
            .unwrap()
            .get(&(owner, date))
            .cloned()
            .unwrap_or_default())
    }

    async fn active_homework_for_subjects(
        &self,
        owner: OwnerId,
        subjects: &[String],
    ) -> Result<Vec<Homework>, ContentError> {
        if self.broken_homework.load(Ordering::SeqCst) {
            return Err(ContentError::Store("homework unavailable".to_string()));
        }
        Ok(self
            .homework
            .lock()
            .unwrap()
            .iter()
            .filter(|(o, item)| *o == owner && !item.completed && subjects.contains(&item.subject))
            .map(|(_, item)| item.clone())
            .collect())
    }

    async fn homework_for_date(
        &self,
        owner: OwnerId,
        date: NaiveDate,
        excluded_subjects: &[String],
    ) -> Result<Vec<Homework>, ContentError> {
        if self.broken_homework.load(Ordering::SeqCst) {
            return Err(ContentError::Store("homework unavailable".to_string()));
        }
        Ok(self
            .homework
            .lock()
            .unwrap()
            .iter()
            .filter(|(o, item)| {
                *o == owner && item.due == date && !excluded_subjects.contains(&item.subject)
            })
            .map(|(_, item)| item.clone())
            .collect())
    }

    async fn purge_expired(&self, before: NaiveDate) -> Result<(), ContentError> {
        self.purged.lock().unwrap().push(before);
        self.homework
            .lock()
            .unwrap()
            .retain(|(_, item)| item.due >= before);
        Ok(())
    }
}

// === Subscribers ===

#[derive(Default)]
pub struct FakeSubscribers {
    records: Mutex<HashMap<OwnerId, Subscriber>>,
    failing_lookups: AtomicUsize,
}

impl FakeSubscribers {
    pub fn add(&self, owner: OwnerId, name: &str) {
        self.records.lock().unwrap().insert(
            owner,
            Subscriber {
                id: owner,
                display_name: Some(name.to_string()),
                enabled: true,
            },
        );
    }

    pub fn set_enabled(&self, owner: OwnerId, enabled: bool) {
        if let Some(record) = self.records.lock().unwrap().get_mut(&owner) {
            record.enabled = enabled;
        }
    }

    /// Make the next `n` lookups fail.
    pub fn fail_next_lookups(&self, n: usize) {
        self.failing_lookups.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl SubscriberRepository for FakeSubscribers {
    async fn subscriber(&self, owner: OwnerId) -> Result<Option<Subscriber>, RepositoryError> {
        let failing = self
            .failing_lookups
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(RepositoryError::Store("database locked".to_string()));
        }
        Ok(self.records.lock().unwrap().get(&owner).cloned())
    }

    async fn enabled_subscribers(&self) -> Result<Vec<OwnerId>, RepositoryError> {
        let mut owners: Vec<OwnerId> = self
            .records
            .lock()
            .unwrap()
            .values()
            .filter(|record| record.enabled)
            .map(|record| record.id)
            .collect();
        owners.sort();
        Ok(owners)
    }
}

// === Notifier ===

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(OwnerId, String)>>,
    calls: AtomicUsize,
    failures_left: AtomicUsize,
    latency: Mutex<Option<Duration>>,
}

impl RecordingNotifier {
    /// Make the next `n` sends fail.
    pub fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// Hold every send for `latency`.
    pub fn slow(&self, latency: Duration) {
        *self.latency.lock().unwrap() = Some(latency);
    }

    pub fn sent(&self) -> Vec<(OwnerId, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, owner: OwnerId, text: &str) -> Result<(), DispatchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let latency = *self.latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(DispatchError::Rejected {
                status: 502,
                message: "bad gateway".to_string(),
            });
        }

        self.sent.lock().unwrap().push((owner, text.to_string()));
        Ok(())
    }
}

// === Task scheduler ===

struct Flag(Arc<AtomicBool>);

impl CancelTask for Flag {
    fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    fn is_done(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

struct Held {
    delay: Duration,
    done: Arc<AtomicBool>,
    callback: Option<TaskCallback>,
}

/// Keeps scheduled callbacks until a test fires them.
#[derive(Default)]
pub struct HeldScheduler {
    held: Mutex<Vec<Held>>,
}

impl HeldScheduler {
    pub fn len(&self) -> usize {
        self.held.lock().unwrap().len()
    }

    pub fn delay(&self, index: usize) -> Duration {
        self.held.lock().unwrap()[index].delay
    }

    /// Cancelled or already fired.
    pub fn is_done(&self, index: usize) -> bool {
        self.held.lock().unwrap()[index].done.load(Ordering::SeqCst)
    }

    /// Run the callback at `index`, even if it was cancelled.
    pub async fn fire(&self, index: usize) {
        let (done, callback) = {
            let mut held = self.held.lock().unwrap();
            let entry = &mut held[index];
            (Arc::clone(&entry.done), entry.callback.take())
        };
        done.store(true, Ordering::SeqCst);
        if let Some(callback) = callback {
            callback().await;
        }
    }
}

impl TaskScheduler for HeldScheduler {
    fn schedule(&self, delay: Duration, callback: TaskCallback) -> TaskHandle {
        let done = Arc::new(AtomicBool::new(false));
        self.held.lock().unwrap().push(Held {
            delay,
            done: Arc::clone(&done),
            callback: Some(callback),
        });
        TaskHandle::new(Flag(done))
    }
}

// === Harness ===

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub content: Arc<FakeContent>,
    pub subscribers: Arc<FakeSubscribers>,
    pub notifier: Arc<RecordingNotifier>,
    pub scheduler: Arc<HeldScheduler>,
    pub driver: SchedulerDriver,
}

impl Harness {
    /// Starts on Monday 2026-03-02 at 09:00 local time.
    pub fn new() -> Self {
        Self::with_scheduler(Arc::new(HeldScheduler::default()))
    }

    pub fn with_scheduler(scheduler: Arc<HeldScheduler>) -> Self {
        let clock = Arc::new(ManualClock::new(local(2, 9, 0)));
        Self::build(clock, Arc::clone(&scheduler) as Arc<dyn TaskScheduler>, scheduler)
    }

    /// Uses `task_scheduler` for timers; the held scheduler stays empty.
    pub fn with_task_scheduler(task_scheduler: Arc<dyn TaskScheduler>) -> Self {
        let clock = Arc::new(ManualClock::new(local(2, 9, 0)));
        Self::build(clock, task_scheduler, Arc::new(HeldScheduler::default()))
    }

    fn build(
        clock: Arc<ManualClock>,
        task_scheduler: Arc<dyn TaskScheduler>,
        scheduler: Arc<HeldScheduler>,
    ) -> Self {
        let content = Arc::new(FakeContent::default());
        let subscribers = Arc::new(FakeSubscribers::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let driver = SchedulerDriver::new(
            Arc::clone(&subscribers) as Arc<dyn SubscriberRepository>,
            Arc::clone(&content) as Arc<dyn ContentProvider>,
            Arc::clone(&notifier) as Arc<dyn Notifier>,
            task_scheduler,
            Arc::clone(&clock) as Arc<dyn homebot_scheduler::Clock>,
            NotifyConfig::default(),
        );

        Self {
            clock,
            content,
            subscribers,
            notifier,
            scheduler,
            driver,
        }
    }
}
