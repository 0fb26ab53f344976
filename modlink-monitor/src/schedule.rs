//! Periodic execution of monitoring sweeps.

use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Local};
use cron::Schedule;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("Invalid cron expression '{expr}': {reason}")]
    InvalidCron { expr: String, reason: String },
}

/// When the next job fires.
#[derive(Debug, Clone)]
pub enum Trigger {
    /// Fixed spacing between jobs
    Interval(Duration),
    /// Cron schedule evaluated in local time
    Cron(Schedule),
}

impl Trigger {
    pub fn interval(every: Duration) -> Self {
        Self::Interval(every)
    }

    /// Parse a full cron expression (`sec min hour day month weekday [year]`).
    pub fn cron(expr: &str) -> Result<Self, ScheduleError> {
        Schedule::from_str(expr)
            .map(Self::Cron)
            .map_err(|e| ScheduleError::InvalidCron {
                expr: expr.to_string(),
                reason: e.to_string(),
            })
    }

    /// Fire on matching hour/minute/second, every day.
    pub fn cron_fields(hour: &str, minute: &str, second: &str) -> Result<Self, ScheduleError> {
        Self::cron(&format!("{} {} {} * * *", second.trim(), minute.trim(), hour.trim()))
    }

    /// Delay from `now` until the next firing; `None` if it never fires again.
    pub fn next_delay(&self, now: DateTime<Local>) -> Option<Duration> {
        match self {
            Trigger::Interval(every) => Some(*every),
            Trigger::Cron(schedule) => {
                let next = schedule.after(&now).next()?;
                (next - now).to_std().ok()
            }
        }
    }
}

/// How a job relates to the next trigger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulePolicy {
    /// Run the job to completion, then wait for the next trigger
    #[default]
    Blocking,
    /// Spawn the job and keep ticking; jobs may overlap
    Background,
}

/// Fires a job on a trigger under a policy.
#[derive(Debug, Clone)]
pub struct Scheduler {
    trigger: Trigger,
    policy: SchedulePolicy,
}

impl Scheduler {
    pub fn new(trigger: Trigger, policy: SchedulePolicy) -> Self {
        Self { trigger, policy }
    }

    pub fn policy(&self) -> SchedulePolicy {
        self.policy
    }

    /// Fire `job` on every trigger until the trigger is exhausted.
    pub async fn run<F, Fut>(&self, job: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.run_ticks(None, job).await;
    }

    /// Fire `job` at most `ticks` times.
    ///
    /// With [`SchedulePolicy::Background`] this returns once the last job is
    /// spawned, not when it finishes.
    pub async fn run_for<F, Fut>(&self, ticks: u64, job: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.run_ticks(Some(ticks), job).await;
    }

    async fn run_ticks<F, Fut>(&self, ticks: Option<u64>, mut job: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut fired = 0u64;

        while ticks.is_none_or(|limit| fired < limit) {
            let Some(delay) = self.trigger.next_delay(Local::now()) else {
                warn!("Trigger has no upcoming fire time, scheduler stopped");
                return;
            };

            debug!(?delay, policy = ?self.policy, "Waiting for next trigger");
            tokio::time::sleep(delay).await;
            fired += 1;

            match self.policy {
                SchedulePolicy::Blocking => job().await,
                SchedulePolicy::Background => {
                    tokio::spawn(job());
                }
            }
        }
    }
}
