use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

use crate::config::{parse_schedule, FanOutConfig};
use crate::correlation::InvocationId;
use crate::error::{Error, Result};
use crate::scheduler::{FanOutScheduler, InvocationResult};

use super::shutdown::ShutdownToken;

/// Fires one fan-out invocation per cron tick until shut down.
pub struct CronTrigger {
    scheduler: Arc<FanOutScheduler>,
    schedule: cron::Schedule,
    invocation_attempts: u16,
    shutdown: ShutdownToken,
}

impl fmt::Debug for CronTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CronTrigger")
            .field("schedule", &self.schedule.to_string())
            .field("invocation_attempts", &self.invocation_attempts)
            .field("shutdown_cancelled", &self.shutdown.is_cancelled())
            .finish()
    }
}

impl CronTrigger {
    /// Trigger for `scheduler` on the schedule and attempt budget in `config`.
    pub fn new(
        scheduler: Arc<FanOutScheduler>,
        config: &FanOutConfig,
        shutdown: ShutdownToken,
    ) -> Result<Self> {
        if config.invocation_attempts == 0 {
            return Err(Error::Config("invocation_attempts must be at least 1".into()));
        }
        Ok(Self {
            scheduler,
            schedule: parse_schedule(&config.schedule)?,
            invocation_attempts: config.invocation_attempts,
            shutdown,
        })
    }

    pub fn shutdown_token(&self) -> ShutdownToken {
        self.shutdown.clone()
    }

    /// First firing strictly after `after`.
    pub fn next_fire_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    /// Run one logical invocation now.
    ///
    /// A failed attempt is re-attempted under the same invocation id, so
    /// completed steps are replayed rather than repeated.
    pub async fn fire_once(&self) -> Result<InvocationResult> {
        let invocation = InvocationId::new();
        let mut attempt: u16 = 0;
        loop {
            attempt += 1;
            match self.scheduler.invoke(&invocation).await {
                Ok(result) => {
                    tracing::info!(
                        invocation_id = %invocation,
                        attempt,
                        message = %result.message,
                        "scheduled invocation finished"
                    );
                    return Ok(result);
                }
                Err(err) if attempt < self.invocation_attempts && !self.shutdown.is_cancelled() => {
                    tracing::warn!(
                        invocation_id = %invocation,
                        attempt,
                        error = %err,
                        "invocation attempt failed; re-attempting"
                    );
                }
                Err(err) => {
                    tracing::error!(
                        invocation_id = %invocation,
                        attempt,
                        events_sent = err.events_sent(),
                        error = %err,
                        "invocation failed"
                    );
                    return Err(err);
                }
            }
        }
    }

    /// Loop until the shutdown token is cancelled.
    ///
    /// An invocation in flight when shutdown is requested finishes its
    /// current attempt before the loop exits.
    pub async fn run(self) {
        let mut last_fire: Option<DateTime<Utc>> = None;
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            let now = Utc::now();
            let from = last_fire.map_or(now, |last| last.max(now));
            let Some(next) = self.next_fire_after(from) else {
                tracing::warn!("cron schedule has no further firings; trigger stopping");
                break;
            };
            let delay = (next - now).to_std().unwrap_or_default();
            tracing::debug!(next_fire = %next, delay_ms = delay.as_millis() as u64, "trigger sleeping");

            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    break;
                }
                _ = tokio::time::sleep(delay) => {
                    last_fire = Some(next);
                    if let Err(err) = self.fire_once().await {
                        // Already logged by fire_once; the next firing is a new invocation.
                        tracing::debug!(events_sent = err.events_sent(), "waiting for next firing");
                    }
                }
            }
        }
        tracing::info!("Cron trigger shutting down");
    }

    /// Spawn [`CronTrigger::run`] on the tokio runtime.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}
