//! Collaborators the scheduler reads from and delivers through.
//!
//! Storage and transport live outside this crate; the scheduler only sees
//! these traits.

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::{ContentError, DispatchError, Homework, Lesson, OwnerId, RepositoryError, Subscriber};

/// Timetable and homework lookups.
#[async_trait]
pub trait ContentProvider: Send + Sync {
    /// Lessons for `date`, in timetable order.
    async fn lessons_for_date(
        &self,
        owner: OwnerId,
        date: NaiveDate,
    ) -> Result<Vec<Lesson>, ContentError>;

    /// Incomplete homework for any of `subjects`.
    async fn active_homework_for_subjects(
        &self,
        owner: OwnerId,
        subjects: &[String],
    ) -> Result<Vec<Homework>, ContentError>;

    /// Homework whose deadline is exactly `date`, skipping `excluded_subjects`.
    async fn homework_for_date(
        &self,
        owner: OwnerId,
        date: NaiveDate,
        excluded_subjects: &[String],
    ) -> Result<Vec<Homework>, ContentError>;

    /// Drop homework whose deadline is before `before`.
    async fn purge_expired(&self, before: NaiveDate) -> Result<(), ContentError>;
}

/// Subscriber records.
#[async_trait]
pub trait SubscriberRepository: Send + Sync {
    /// Look up one subscriber; `None` if the owner is unknown.
    async fn subscriber(&self, owner: OwnerId) -> Result<Option<Subscriber>, RepositoryError>;

    /// Every owner with notifications turned on.
    async fn enabled_subscribers(&self) -> Result<Vec<OwnerId>, RepositoryError>;
}

/// Chat transport sink.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, owner: OwnerId, text: &str) -> Result<(), DispatchError>;
}
