//! Wires the components together and arms every enabled subscriber.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::{
    Clock, ContentProvider, DeliveryLedger, NotificationPolicy, NotificationRunner, Notifier,
    NotifyConfig, OwnerId, RunTrigger, SchedulerError, SubscriberRepository, TaskRegistry,
    TaskScheduler,
};

/// Result of [`SchedulerDriver::bootstrap`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    /// Owners armed, with their first fire instant.
    pub scheduled: Vec<(OwnerId, DateTime<Utc>)>,
    /// Owners skipped because their fire instant could not be computed.
    pub failed: Vec<OwnerId>,
}

/// Owns the scheduler's shared state.
pub struct SchedulerDriver {
    subscribers: Arc<dyn SubscriberRepository>,
    policy: Arc<NotificationPolicy>,
    registry: Arc<TaskRegistry>,
    ledger: Arc<DeliveryLedger>,
    runner: Arc<NotificationRunner>,
}

impl SchedulerDriver {
    pub fn new(
        subscribers: Arc<dyn SubscriberRepository>,
        content: Arc<dyn ContentProvider>,
        notifier: Arc<dyn Notifier>,
        task_scheduler: Arc<dyn TaskScheduler>,
        clock: Arc<dyn Clock>,
        config: NotifyConfig,
    ) -> Self {
        let policy = Arc::new(NotificationPolicy::new(
            Arc::clone(&content),
            Arc::clone(&clock),
            config,
        ));
        let registry = Arc::new(TaskRegistry::new(task_scheduler, Arc::clone(&clock)));
        let ledger = Arc::new(DeliveryLedger::new());
        let runner = Arc::new(NotificationRunner::new(
            Arc::clone(&subscribers),
            content,
            notifier,
            Arc::clone(&policy),
            Arc::clone(&registry),
            Arc::clone(&ledger),
            clock,
        ));

        Self {
            subscribers,
            policy,
            registry,
            ledger,
            runner,
        }
    }

    /// Arm the first run of every enabled subscriber.
    ///
    /// A failure for one owner is logged and recorded in the report; only a
    /// failure to list subscribers aborts.
    #[tracing::instrument(skip(self))]
    pub async fn bootstrap(&self) -> Result<BootstrapReport, SchedulerError> {
        let owners = self.subscribers.enabled_subscribers().await?;
        info!(count = owners.len(), "bootstrapping daily notifications");

        let mut report = BootstrapReport::default();
        for owner in owners {
            match self.schedule_owner(owner).await {
                Ok(fire_at) => report.scheduled.push((owner, fire_at)),
                Err(e) => {
                    warn!(%owner, error = %e, "failed to schedule owner, skipping");
                    report.failed.push(owner);
                }
            }
        }

        info!(
            scheduled = report.scheduled.len(),
            failed = report.failed.len(),
            "bootstrap complete"
        );
        Ok(report)
    }

    /// Arm `owner` from today's timetable, replacing any pending task.
    pub async fn schedule_owner(&self, owner: OwnerId) -> Result<DateTime<Utc>, SchedulerError> {
        match self.subscribers.subscriber(owner).await? {
            Some(subscriber) if subscriber.enabled => {}
            Some(_) => return Err(SchedulerError::SubscriberDisabled(owner)),
            None => return Err(SchedulerError::SubscriberNotFound(owner)),
        }

        let fire_at = self.next_run(owner).await?;
        Arc::clone(&self.runner).arm(owner, fire_at, RunTrigger::Scheduled);
        info!(%owner, %fire_at, "scheduled daily notification");
        Ok(fire_at)
    }

    /// React to an owner turning notifications on or off.
    ///
    /// Returns the new fire instant, or `None` if the owner's task was cancelled.
    pub async fn subscription_changed(
        &self,
        owner: OwnerId,
    ) -> Result<Option<DateTime<Utc>>, SchedulerError> {
        match self.schedule_owner(owner).await {
            Ok(fire_at) => Ok(Some(fire_at)),
            Err(SchedulerError::SubscriberDisabled(_) | SchedulerError::SubscriberNotFound(_)) => {
                if self.registry.cancel(owner) {
                    info!(%owner, "notifications turned off");
                }
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Arm every enabled subscriber that has no pending task.
    ///
    /// Picks up owners enabled after bootstrap. Owners disabled since are
    /// dropped by their next run. Returns the owners armed.
    #[tracing::instrument(skip(self))]
    pub async fn reconcile(&self) -> Result<Vec<OwnerId>, SchedulerError> {
        let mut armed = Vec::new();
        for owner in self.subscribers.enabled_subscribers().await? {
            if self.registry.pending(owner).is_some() {
                continue;
            }
            match self.subscription_changed(owner).await {
                Ok(Some(fire_at)) => {
                    info!(%owner, %fire_at, "armed newly enabled owner");
                    armed.push(owner);
                }
                Ok(None) => {}
                Err(e) => warn!(%owner, error = %e, "failed to schedule owner"),
            }
        }
        Ok(armed)
    }

    /// Next fire instant for `owner`, without arming anything.
    pub async fn next_run(&self, owner: OwnerId) -> Result<DateTime<Utc>, SchedulerError> {
        let today = self.policy.today();
        Ok(self.policy.next_fire_instant(owner, today).await?)
    }

    /// Render tomorrow's message for `owner` without sending it.
    pub async fn preview(&self, owner: OwnerId) -> Result<String, SchedulerError> {
        self.runner.preview(owner).await
    }

    /// Cancel every pending task. Runs already in progress finish.
    pub fn shutdown(&self) -> usize {
        let cancelled = self.registry.cancel_all();
        info!(cancelled, "scheduler stopped");
        cancelled
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn ledger(&self) -> &Arc<DeliveryLedger> {
        &self.ledger
    }

    pub fn runner(&self) -> &Arc<NotificationRunner> {
        &self.runner
    }
}
