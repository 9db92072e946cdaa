//! The unit of work executed when an owner's task fires.
//!
//! One run walks a fixed sequence, any step of which may end the run early:
//!
//! 1. subscription check (absent or disabled owners lose their pending task)
//! 2. maintenance (purge expired homework, best effort)
//! 3. window check (scheduled fires only), which also resolves the cycle day
//! 4. content assembly for the day after the cycle day (lookup failures
//!    degrade to empty lists)
//! 5. idempotency check against the [`DeliveryLedger`]
//! 6. rendering
//! 7. dispatch, then re-arm for the next cycle or retry after `retry_delay`
//!
//! The cycle day is the day whose target the fire belongs to. It is today,
//! except for a target pushed past midnight, which still belongs to yesterday.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use tracing::{debug, info, warn};

use crate::render::render_digest;
use crate::{
    Clock, ContentProvider, DailyDigest, DeliveryLedger, Homework, NotificationPolicy,
    NotifyConfig, Notifier, OwnerId, SchedulerError, Subscriber, SubscriberRepository,
    TaskRegistry,
};

/// Why a run was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunTrigger {
    /// A regular daily fire.
    Scheduled,
    /// A re-run after a failed attempt; `attempt` counts from 1.
    ///
    /// `cycle` is the day being retried, when the failed run got that far.
    Retry {
        attempt: u32,
        cycle: Option<NaiveDate>,
    },
}

impl RunTrigger {
    fn next_attempt(self) -> u32 {
        match self {
            RunTrigger::Scheduled => 1,
            RunTrigger::Retry { attempt, .. } => attempt.saturating_add(1),
        }
    }

    fn cycle(self) -> Option<NaiveDate> {
        match self {
            RunTrigger::Scheduled => None,
            RunTrigger::Retry { cycle, .. } => cycle,
        }
    }
}

/// What a run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Owner unknown or notifications disabled; pending task cancelled.
    Unsubscribed,
    /// Fired too far from the recomputed instant; nothing sent.
    OutsideWindow { expected: DateTime<Utc> },
    /// Another run already delivered this cycle.
    AlreadySent { date: NaiveDate },
    /// Message delivered for the cycle of `date`.
    Delivered { date: NaiveDate },
    /// Delivery failed; the mark was rolled back.
    DispatchFailed { date: NaiveDate, attempt: u32 },
    /// The subscriber record could not be read.
    LookupFailed { attempt: u32 },
}

/// Executes daily runs and keeps each owner's task chain armed.
pub struct NotificationRunner {
    subscribers: Arc<dyn SubscriberRepository>,
    content: Arc<dyn ContentProvider>,
    notifier: Arc<dyn Notifier>,
    policy: Arc<NotificationPolicy>,
    registry: Arc<TaskRegistry>,
    ledger: Arc<DeliveryLedger>,
    clock: Arc<dyn Clock>,
}

impl NotificationRunner {
    pub fn new(
        subscribers: Arc<dyn SubscriberRepository>,
        content: Arc<dyn ContentProvider>,
        notifier: Arc<dyn Notifier>,
        policy: Arc<NotificationPolicy>,
        registry: Arc<TaskRegistry>,
        ledger: Arc<DeliveryLedger>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            subscribers,
            content,
            notifier,
            policy,
            registry,
            ledger,
            clock,
        }
    }

    fn config(&self) -> &NotifyConfig {
        self.policy.config()
    }

    /// Register a run for `owner` at `fire_at`, replacing any pending one.
    pub fn arm(self: Arc<Self>, owner: OwnerId, fire_at: DateTime<Utc>, trigger: RunTrigger) {
        let runner = Arc::clone(&self);
        self.registry.schedule_or_replace(
            owner,
            fire_at,
            Box::new(move || {
                Box::pin(async move {
                    runner.run(owner, trigger).await;
                })
            }),
        );
        debug!(%owner, %fire_at, ?trigger, "armed notification run");
    }

    /// Execute one run and schedule whatever comes next.
    #[tracing::instrument(skip(self), fields(owner = %owner))]
    pub async fn run(self: Arc<Self>, owner: OwnerId, trigger: RunTrigger) -> RunOutcome {
        let outcome = self.execute(owner, trigger).await;
        self.follow_up(owner, trigger, &outcome).await;
        outcome
    }

    /// Steps 1 through 7, without scheduling anything afterwards.
    pub async fn execute(&self, owner: OwnerId, trigger: RunTrigger) -> RunOutcome {
        let subscriber = match self.subscribers.subscriber(owner).await {
            Ok(Some(subscriber)) if subscriber.enabled => subscriber,
            Ok(found) => {
                let reason = if found.is_some() { "disabled" } else { "not found" };
                let cancelled = self.registry.cancel(owner);
                info!(%owner, reason, cancelled, "subscriber inactive, stopping notifications");
                return RunOutcome::Unsubscribed;
            }
            Err(e) => {
                let attempt = trigger.next_attempt();
                warn!(%owner, attempt, error = %e, "subscriber lookup failed");
                return RunOutcome::LookupFailed { attempt };
            }
        };

        let now = self.clock.now();
        let today = now.with_timezone(&self.config().zone).date_naive();

        if let Err(e) = self.content.purge_expired(today).await {
            warn!(error = %e, "failed to purge expired homework");
        }

        let cycle = match trigger {
            RunTrigger::Scheduled => match self.window_match(owner, now, today).await {
                Ok(cycle) => cycle,
                Err(expected) => {
                    warn!(
                        %owner,
                        %now,
                        %expected,
                        "fired outside the delivery window, discarding run"
                    );
                    return RunOutcome::OutsideWindow { expected };
                }
            },
            // Anything older than yesterday is stale; deliver today's cycle instead.
            RunTrigger::Retry {
                cycle: Some(cycle), ..
            } if today.pred_opt().is_none_or(|yesterday| cycle >= yesterday) => cycle,
            RunTrigger::Retry { .. } => today,
        };

        let next_day = cycle.succ_opt().unwrap_or(cycle);
        let digest = self.assemble(&subscriber, next_day).await;

        if !self.ledger.try_mark_sent(owner, cycle) {
            info!(%owner, date = %cycle, "already notified for this cycle");
            return RunOutcome::AlreadySent { date: cycle };
        }

        let text = render_digest(&digest);

        match self.notifier.send(owner, &text).await {
            Ok(()) => {
                info!(
                    %owner,
                    date = %cycle,
                    lessons = digest.lessons.len(),
                    homework = digest.homework_due.len() + digest.custom_deadlines.len(),
                    "sent daily notification"
                );
                RunOutcome::Delivered { date: cycle }
            }
            Err(e) => {
                self.ledger.rollback(owner, cycle);
                let attempt = trigger.next_attempt();
                warn!(%owner, attempt, error = %e, "failed to send daily notification");
                RunOutcome::DispatchFailed {
                    date: cycle,
                    attempt,
                }
            }
        }
    }

    /// Re-arm the owner according to `outcome`.
    async fn follow_up(
        self: &Arc<Self>,
        owner: OwnerId,
        trigger: RunTrigger,
        outcome: &RunOutcome,
    ) {
        let now = self.clock.now();
        let today = self.policy.today();
        match outcome {
            RunOutcome::Unsubscribed => {}
            RunOutcome::Delivered { date } => {
                let reference = date.succ_opt().unwrap_or(*date);
                let next = self.next_fire_instant(owner, reference).await;
                info!(%owner, next_fire = %next, "scheduled next notification");
                Arc::clone(self).arm(owner, next, RunTrigger::Scheduled);
            }
            RunOutcome::DispatchFailed { date, attempt } => {
                self.arm_retry(owner, now, *attempt, Some(*date));
            }
            RunOutcome::LookupFailed { attempt } => {
                self.arm_retry(owner, now, *attempt, trigger.cycle());
            }
            RunOutcome::OutsideWindow { .. } | RunOutcome::AlreadySent { .. } => {
                // Another task normally owns the next cycle. If none is
                // pending, this run was the last link of the chain.
                if self.registry.pending(owner).is_none() {
                    let reference = match outcome {
                        RunOutcome::AlreadySent { date } => date.succ_opt().unwrap_or(*date),
                        _ => today,
                    };
                    let next = self.next_fire_instant(owner, reference).await;
                    info!(%owner, next_fire = %next, "no pending task, re-arming");
                    Arc::clone(self).arm(owner, next, RunTrigger::Scheduled);
                }
            }
        }
    }

    fn arm_retry(
        self: &Arc<Self>,
        owner: OwnerId,
        now: DateTime<Utc>,
        attempt: u32,
        cycle: Option<NaiveDate>,
    ) {
        let retry_at = now + self.config().retry_delay;
        info!(%owner, attempt, %retry_at, "scheduled retry");
        Arc::clone(self).arm(owner, retry_at, RunTrigger::Retry { attempt, cycle });
    }

    /// Next fire instant, falling back to the fixed time if lessons are unreadable.
    async fn next_fire_instant(&self, owner: OwnerId, reference: NaiveDate) -> DateTime<Utc> {
        match self.policy.next_fire_instant(owner, reference).await {
            Ok(next) => next,
            Err(e) => {
                warn!(%owner, error = %e, "failed to compute fire instant, using fallback time");
                self.policy.next_fallback_instant(reference)
            }
        }
    }

    /// Collect lessons and homework for `date`. Never fails.
    pub async fn assemble(&self, subscriber: &Subscriber, date: NaiveDate) -> DailyDigest {
        let owner = subscriber.id;

        let lessons = self
            .content
            .lessons_for_date(owner, date)
            .await
            .unwrap_or_else(|e| {
                warn!(%owner, %date, error = %e, "failed to load lessons");
                Vec::new()
            });

        let mut subjects: Vec<String> = Vec::new();
        for lesson in &lessons {
            let subject = lesson.subject.trim();
            if !subject.is_empty() && !subjects.iter().any(|s| s == subject) {
                subjects.push(subject.to_string());
            }
        }

        let homework_due = if subjects.is_empty() {
            Vec::new()
        } else {
            self.content
                .active_homework_for_subjects(owner, &subjects)
                .await
                .unwrap_or_else(|e| {
                    warn!(%owner, error = %e, "failed to load homework for tomorrow's subjects");
                    Vec::new()
                })
        };

        let custom_deadlines: Vec<Homework> = self
            .content
            .homework_for_date(owner, date, &subjects)
            .await
            .unwrap_or_else(|e| {
                warn!(%owner, %date, error = %e, "failed to load homework due on date");
                Vec::new()
            })
            .into_iter()
            .filter(|item| !homework_due.iter().any(|due| due.id == item.id))
            .collect();

        DailyDigest {
            display_name: subscriber.display_name.clone(),
            date,
            lessons,
            homework_due,
            custom_deadlines,
        }
    }

    /// The cycle day `now` belongs to, or the closest expected instant if
    /// `now` is outside the tolerance window.
    ///
    /// Today's target is tried first, then yesterday's (targets pushed past
    /// midnight). If lessons cannot be read the run is let through as today's
    /// cycle; the ledger still prevents duplicates.
    async fn window_match(
        &self,
        owner: OwnerId,
        now: DateTime<Utc>,
        today: NaiveDate,
    ) -> Result<NaiveDate, DateTime<Utc>> {
        let tolerance = self.config().window_tolerance;
        let mut closest: Option<DateTime<Utc>> = None;

        for date in [Some(today), today.pred_opt()].into_iter().flatten() {
            let expected = match self.policy.target_for(owner, date).await {
                Ok(expected) => expected,
                Err(e) => {
                    warn!(%owner, %date, error = %e, "cannot verify delivery window, proceeding");
                    return Ok(today);
                }
            };
            if within(now, expected, tolerance) {
                return Ok(date);
            }
            if closest.is_none_or(|best| distance(now, expected) < distance(now, best)) {
                closest = Some(expected);
            }
        }

        Err(closest.unwrap_or(now))
    }

    /// Assemble and render tomorrow's message without side effects.
    pub async fn preview(&self, owner: OwnerId) -> Result<String, SchedulerError> {
        let subscriber = self
            .subscribers
            .subscriber(owner)
            .await?
            .ok_or(SchedulerError::SubscriberNotFound(owner))?;
        let today = self.policy.today();
        let tomorrow = today.succ_opt().unwrap_or(today);
        let digest = self.assemble(&subscriber, tomorrow).await;
        Ok(render_digest(&digest))
    }
}

fn distance(a: DateTime<Utc>, b: DateTime<Utc>) -> Duration {
    (a - b).abs()
}

fn within(now: DateTime<Utc>, expected: DateTime<Utc>, tolerance: Duration) -> bool {
    distance(now, expected) <= tolerance
}
