//! When to deliver an owner's daily message.
//!
//! The target is one `lesson_offset` after the latest lesson end on the
//! reference day, or `fallback_time` on days without timed lessons. A target
//! that is not strictly in the future is recomputed from the next day's
//! lessons rather than shifted by 24 hours.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use tracing::debug;

use crate::{Clock, ContentError, ContentProvider, Lesson, NotifyConfig, OwnerId};

/// Computes fire instants from timetable data.
pub struct NotificationPolicy {
    content: Arc<dyn ContentProvider>,
    clock: Arc<dyn Clock>,
    config: NotifyConfig,
}

impl NotificationPolicy {
    pub fn new(
        content: Arc<dyn ContentProvider>,
        clock: Arc<dyn Clock>,
        config: NotifyConfig,
    ) -> Self {
        Self {
            content,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &NotifyConfig {
        &self.config
    }

    /// Current calendar date in the configured zone.
    pub fn today(&self) -> NaiveDate {
        self.clock
            .now()
            .with_timezone(&self.config.zone)
            .date_naive()
    }

    /// Target instant for `date`, without the "must be in the future" rule.
    pub async fn target_for(
        &self,
        owner: OwnerId,
        date: NaiveDate,
    ) -> Result<DateTime<Utc>, ContentError> {
        let lessons = self.content.lessons_for_date(owner, date).await?;
        Ok(fire_instant_for(&lessons, date, &self.config))
    }

    /// Next instant strictly after now, starting from `reference`.
    #[tracing::instrument(skip(self), fields(owner = %owner))]
    pub async fn next_fire_instant(
        &self,
        owner: OwnerId,
        reference: NaiveDate,
    ) -> Result<DateTime<Utc>, ContentError> {
        let now = self.clock.now();
        let mut date = reference;
        loop {
            let target = self.target_for(owner, date).await?;
            if target > now {
                debug!(%date, %target, "computed next fire instant");
                return Ok(target);
            }
            debug!(%date, %target, "target already passed, recomputing for next day");
            date = next_day(date)?;
        }
    }

    /// Like [`next_fire_instant`](Self::next_fire_instant) but assumes no
    /// timed lessons. Used when timetable data cannot be read.
    pub fn next_fallback_instant(&self, reference: NaiveDate) -> DateTime<Utc> {
        let now = self.clock.now();
        let mut date = reference;
        loop {
            let target = fire_instant_for(&[], date, &self.config);
            if target > now {
                return target;
            }
            match date.succ_opt() {
                Some(next) => date = next,
                // Only reachable at the end of the calendar.
                None => return now + self.config.retry_delay,
            }
        }
    }
}

/// Target instant for `date` given that day's lessons.
pub fn fire_instant_for(lessons: &[Lesson], date: NaiveDate, config: &NotifyConfig) -> DateTime<Utc> {
    let local = match lessons.iter().filter_map(|lesson| lesson.end).max() {
        Some(last_end) => date.and_time(last_end) + config.lesson_offset,
        None => date.and_time(config.fallback_time),
    };
    local_to_utc(local, config)
}

fn local_to_utc(local: NaiveDateTime, config: &NotifyConfig) -> DateTime<Utc> {
    let offset = Duration::seconds(i64::from(config.zone.local_minus_utc()));
    Utc.from_utc_datetime(&(local - offset))
}

fn next_day(date: NaiveDate) -> Result<NaiveDate, ContentError> {
    date.succ_opt()
        .ok_or_else(|| ContentError::Invalid(format!("no day after {date}")))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use chrono::NaiveTime;
    use proptest::prelude::*;
    use test_case::test_case;

    use super::*;
    use crate::{Homework, ManualClock};

    /// Timetable keyed by date; optionally failing every lookup.
    #[derive(Default)]
    struct Timetable {
        days: HashMap<NaiveDate, Vec<Lesson>>,
        broken: bool,
    }

    #[async_trait]
    impl ContentProvider for Timetable {
        async fn lessons_for_date(
            &self,
            _owner: OwnerId,
            date: NaiveDate,
        ) -> Result<Vec<Lesson>, ContentError> {
            if self.broken {
                return Err(ContentError::Store("disk on fire".to_string()));
            }
            Ok(self.days.get(&date).cloned().unwrap_or_default())
        }

        async fn active_homework_for_subjects(
            &self,
            _owner: OwnerId,
            _subjects: &[String],
        ) -> Result<Vec<Homework>, ContentError> {
            Ok(Vec::new())
        }

        async fn homework_for_date(
            &self,
            _owner: OwnerId,
            _date: NaiveDate,
            _excluded: &[String],
        ) -> Result<Vec<Homework>, ContentError> {
            Ok(Vec::new())
        }

        async fn purge_expired(&self, _before: NaiveDate) -> Result<(), ContentError> {
            Ok(())
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    /// Instant for a local wall-clock time in the default zone.
    fn local(day: NaiveDate, h: u32, m: u32) -> DateTime<Utc> {
        let config = NotifyConfig::default();
        config
            .zone
            .from_local_datetime(&day.and_time(hm(h, m)))
            .unwrap()
            .with_timezone(&Utc)
    }

    fn policy(timetable: Timetable, now: DateTime<Utc>) -> NotificationPolicy {
        NotificationPolicy::new(
            Arc::new(timetable),
            Arc::new(ManualClock::new(now)),
            NotifyConfig::default(),
        )
    }

    #[test]
    fn test_fallback_when_no_lessons() {
        let day = date(2026, 3, 2);
        let target = fire_instant_for(&[], day, &NotifyConfig::default());
        assert_eq!(target, local(day, 15, 0));
    }

    #[test]
    fn test_fallback_when_no_lesson_has_end_time() {
        let day = date(2026, 3, 2);
        let untimed = Lesson {
            subject: "Seminar".to_string(),
            start: Some(hm(9, 0)),
            end: None,
            room: None,
        };
        let target = fire_instant_for(&[untimed], day, &NotifyConfig::default());
        assert_eq!(target, local(day, 15, 0));
    }

    #[test_case(&[(8, 30, 10, 0)], 11, 0 ; "single lesson")]
    #[test_case(&[(12, 0, 13, 30), (8, 30, 10, 0)], 14, 30 ; "latest end wins regardless of order")]
    #[test_case(&[(18, 0, 19, 40)], 20, 40 ; "evening lesson")]
    fn test_offset_after_last_lesson(slots: &[(u32, u32, u32, u32)], h: u32, m: u32) {
        let day = date(2026, 3, 2);
        let lessons: Vec<Lesson> = slots
            .iter()
            .map(|&(sh, sm, eh, em)| Lesson::new("Maths", hm(sh, sm), hm(eh, em)))
            .collect();
        let target = fire_instant_for(&lessons, day, &NotifyConfig::default());
        assert_eq!(target, local(day, h, m));
    }

    #[test]
    fn test_offset_can_cross_midnight() {
        let day = date(2026, 3, 2);
        let late = Lesson::new("Astronomy", hm(22, 0), hm(23, 30));
        let target = fire_instant_for(&[late], day, &NotifyConfig::default());
        assert_eq!(target, local(date(2026, 3, 3), 0, 30));
    }

    #[tokio::test]
    async fn test_next_fire_instant_today_when_in_future() {
        let today = date(2026, 3, 2);
        let mut timetable = Timetable::default();
        timetable
            .days
            .insert(today, vec![Lesson::new("Maths", hm(12, 0), hm(14, 0))]);

        let policy = policy(timetable, local(today, 9, 0));
        let next = policy.next_fire_instant(OwnerId(1), today).await.unwrap();
        assert_eq!(next, local(today, 15, 0));
    }

    #[tokio::test]
    async fn test_passed_target_is_recomputed_from_next_day_lessons() {
        let today = date(2026, 3, 2);
        let tomorrow = date(2026, 3, 3);
        let mut timetable = Timetable::default();
        timetable
            .days
            .insert(today, vec![Lesson::new("Maths", hm(8, 0), hm(10, 0))]);
        timetable
            .days
            .insert(tomorrow, vec![Lesson::new("History", hm(14, 0), hm(17, 20))]);

        // Today's target (11:00) has passed; tomorrow's must come from tomorrow's
        // lessons (17:20 + 1h), not from today's time shifted by a day.
        let policy = policy(timetable, local(today, 12, 0));
        let next = policy.next_fire_instant(OwnerId(1), today).await.unwrap();
        assert_eq!(next, local(tomorrow, 18, 20));
    }

    #[tokio::test]
    async fn test_target_equal_to_now_is_not_in_future() {
        let today = date(2026, 3, 2);
        let policy = policy(Timetable::default(), local(today, 15, 0));
        let next = policy.next_fire_instant(OwnerId(1), today).await.unwrap();
        assert_eq!(next, local(date(2026, 3, 3), 15, 0));
    }

    #[tokio::test]
    async fn test_content_error_propagates() {
        let today = date(2026, 3, 2);
        let timetable = Timetable {
            broken: true,
            ..Default::default()
        };
        let policy = policy(timetable, local(today, 9, 0));
        let result = policy.next_fire_instant(OwnerId(1), today).await;
        assert!(matches!(result, Err(ContentError::Store(_))));
    }

    #[test]
    fn test_next_fallback_instant_skips_passed_day() {
        let today = date(2026, 3, 2);
        let policy = policy(Timetable::default(), local(today, 16, 0));
        assert_eq!(
            policy.next_fallback_instant(today),
            local(date(2026, 3, 3), 15, 0)
        );
    }

    #[test]
    fn test_today_uses_configured_zone() {
        // 20:30 UTC on the 2nd is already 01:30 on the 3rd at UTC+5.
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 20, 30, 0).unwrap();
        let policy = policy(Timetable::default(), now);
        assert_eq!(policy.today(), date(2026, 3, 3));
    }

    // === Property Tests ===

    fn lesson_strategy() -> impl Strategy<Value = Lesson> {
        (0u32..24, 0u32..60, proptest::option::of((0u32..24, 0u32..60))).prop_map(
            |(sh, sm, end)| Lesson {
                subject: "Any".to_string(),
                start: Some(hm(sh, sm)),
                end: end.map(|(eh, em)| hm(eh, em)),
                room: None,
            },
        )
    }

    proptest! {
        #[test]
        fn next_fire_instant_is_strictly_after_now(
            today_lessons in prop::collection::vec(lesson_strategy(), 0..6),
            tomorrow_lessons in prop::collection::vec(lesson_strategy(), 0..6),
            now_offset_mins in -1440i64..2880,
            reference_shift in -2i64..3,
        ) {
            let today = date(2026, 3, 2);
            let mut timetable = Timetable::default();
            timetable.days.insert(today, today_lessons);
            timetable.days.insert(date(2026, 3, 3), tomorrow_lessons);

            let now = local(today, 0, 0) + Duration::minutes(now_offset_mins);
            let reference = today + Duration::days(reference_shift);
            let policy = policy(timetable, now);

            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let next = rt.block_on(policy.next_fire_instant(OwnerId(1), reference)).unwrap();
            prop_assert!(next > now);
        }

        #[test]
        fn fire_instant_is_max_end_plus_offset(
            lessons in prop::collection::vec(lesson_strategy(), 1..8),
        ) {
            let day = date(2026, 3, 2);
            let config = NotifyConfig::default();
            let target = fire_instant_for(&lessons, day, &config);
            match lessons.iter().filter_map(|l| l.end).max() {
                Some(end) => {
                    let expected = local(day, 0, 0)
                        + (end - hm(0, 0))
                        + config.lesson_offset;
                    prop_assert_eq!(target, expected);
                }
                None => prop_assert_eq!(target, local(day, 15, 0)),
            }
        }
    }
}
