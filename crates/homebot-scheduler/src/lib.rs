//! Per-subscriber daily digest scheduler for homebot.
//!
//! Each enabled subscriber gets one message a day, an hour after their last
//! lesson (or at a fixed fallback time), describing tomorrow's lessons and
//! homework. This crate provides:
//! - A policy that derives fire instants from timetable data
//! - A registry holding at most one pending task per subscriber
//! - A ledger that allows at most one delivery per subscriber and day
//! - A runner that assembles, renders and dispatches the message, then re-arms
//!
//! Storage and transport are injected through the traits in [`content`].

pub mod clock;
pub mod content;
mod driver;
mod error;
mod ledger;
mod policy;
mod registry;
pub mod render;
mod runner;
mod task;
mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use content::{ContentProvider, Notifier, SubscriberRepository};
pub use driver::{BootstrapReport, SchedulerDriver};
pub use error::{ContentError, DispatchError, RepositoryError, SchedulerError};
pub use ledger::{DeliveryLedger, SendRecord};
pub use policy::{NotificationPolicy, fire_instant_for};
pub use registry::{ScheduledTask, TaskRegistry};
pub use render::render_digest;
pub use runner::{NotificationRunner, RunOutcome, RunTrigger};
pub use task::{CancelTask, TaskCallback, TaskHandle, TaskScheduler, TokioTaskScheduler};
pub use types::{
    DEFAULT_ZONE_OFFSET_SECS, DailyDigest, Homework, Lesson, NotifyConfig, OwnerId, Subscriber,
};
