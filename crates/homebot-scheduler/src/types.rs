//! Scheduler types.

use std::fmt;

use chrono::{Duration, FixedOffset, NaiveDate, NaiveTime, Offset, Utc};
use serde::{Deserialize, Serialize};

/// Chat identifier of a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(pub i64);

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for OwnerId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// A single class in an owner's timetable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lesson {
    /// Subject name as shown in the timetable.
    pub subject: String,
    /// When the class starts, if known.
    #[serde(default)]
    pub start: Option<NaiveTime>,
    /// When the class ends, if known.
    #[serde(default)]
    pub end: Option<NaiveTime>,
    /// Room or classroom label.
    #[serde(default)]
    pub room: Option<String>,
}

impl Lesson {
    /// Create a lesson with a known time range.
    pub fn new(subject: impl Into<String>, start: NaiveTime, end: NaiveTime) -> Self {
        Self {
            subject: subject.into(),
            start: Some(start),
            end: Some(end),
            room: None,
        }
    }

    /// Set the room label.
    pub fn in_room(mut self, room: impl Into<String>) -> Self {
        self.room = Some(room.into());
        self
    }
}

/// A homework assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Homework {
    /// Store identifier.
    pub id: i64,
    /// Subject the assignment belongs to.
    pub subject: String,
    /// What has to be done.
    pub description: String,
    /// Deadline.
    pub due: NaiveDate,
    /// Whether the owner marked it done.
    #[serde(default)]
    pub completed: bool,
}

/// Profile of a notification subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscriber {
    pub id: OwnerId,
    /// Name used in the greeting.
    pub display_name: Option<String>,
    /// Whether daily notifications are turned on.
    pub enabled: bool,
}

/// Everything that goes into one daily message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyDigest {
    pub display_name: Option<String>,
    /// The day the digest is about (tomorrow, relative to delivery).
    pub date: NaiveDate,
    pub lessons: Vec<Lesson>,
    /// Active homework for the subjects taught on `date`.
    pub homework_due: Vec<Homework>,
    /// Homework with an explicit deadline on `date` for other subjects.
    pub custom_deadlines: Vec<Homework>,
}

/// Timing parameters for the daily notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotifyConfig {
    /// Zone in which "today" and lesson times are interpreted.
    pub zone: FixedOffset,
    /// Delay after the last lesson ends.
    pub lesson_offset: Duration,
    /// Delivery time on days without timed lessons.
    pub fallback_time: NaiveTime,
    /// Maximum distance between a scheduled fire and its recomputed instant.
    pub window_tolerance: Duration,
    /// Delay before retrying a failed run.
    pub retry_delay: Duration,
}

/// Default zone offset in seconds (UTC+5, no DST).
pub const DEFAULT_ZONE_OFFSET_SECS: i32 = 5 * 3600;

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            zone: FixedOffset::east_opt(DEFAULT_ZONE_OFFSET_SECS).unwrap_or_else(|| Utc.fix()),
            lesson_offset: Duration::minutes(60),
            fallback_time: NaiveTime::from_hms_opt(15, 0, 0).unwrap_or_default(),
            window_tolerance: Duration::minutes(10),
            retry_delay: Duration::seconds(60),
        }
    }
}
