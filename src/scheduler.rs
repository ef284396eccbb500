//! Session scheduler: repeats full sessions on a fixed cadence.
//!
//! The first session starts immediately; afterwards a new one starts
//! every `period`, regardless of how the previous one ended. A session
//! that overruns its slot delays the next tick rather than stacking
//! concurrent sessions.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{error, info};

use crate::coordinator::{CrawlCoordinator, SessionParams};
use crate::enrich::Enricher;

pub struct SessionScheduler {
    coordinator: Arc<CrawlCoordinator>,
    period: Duration,
}

impl SessionScheduler {
    pub fn new(coordinator: Arc<CrawlCoordinator>, period: Duration) -> Self {
        Self {
            coordinator,
            period,
        }
    }

    /// Run sessions forever. Never returns; callers wanting a single
    /// session use the coordinator directly.
    pub async fn run(&self, params: &SessionParams, enricher: &dyn Enricher) {
        info!(period_secs = self.period.as_secs(), "Scheduler running");
        let mut timer = interval(self.period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            timer.tick().await;
            self.tick(params, enricher).await;
        }
    }

    /// One scheduled session. Failures are logged and swallowed so the
    /// cadence survives them.
    async fn tick(&self, params: &SessionParams, enricher: &dyn Enricher) {
        match self.coordinator.run_session(params, enricher).await {
            Ok(summary) => info!(
                session_id = summary.session_id,
                persisted = summary.persisted,
                polished = summary.polished,
                "Scheduled session finished"
            ),
            Err(e) => error!(error = %e, "Scheduled session failed; next run unaffected"),
        }
    }
}
