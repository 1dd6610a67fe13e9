//! Time and bucket triggers for the long-running `watch` mode.

use crate::bucket::ReportBucket;
use crate::model::MonthKey;
use crate::orchestrator::{UploadEvent, UploadHandler, UploadOutcome};
use crate::store::MetricsStore;
use chrono::{DateTime, Duration, NaiveTime, Utc};
use std::collections::HashSet;
use std::time::Duration as StdDuration;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Every day at `hour`:00 UTC.
    Daily { hour: u32 },
    /// The first of every month at `hour`:00 UTC.
    Monthly { hour: u32 },
}

pub const DAILY_INSIGHTS: Schedule = Schedule::Daily { hour: 1 };
pub const MONTHLY_HISTORY: Schedule = Schedule::Monthly { hour: 2 };

impl Schedule {
    fn at_hour(hour: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour.min(23), 0, 0).unwrap_or(NaiveTime::MIN)
    }

    /// First fire time strictly after `t`.
    pub fn next_after(&self, t: DateTime<Utc>) -> DateTime<Utc> {
        match *self {
            Schedule::Daily { hour } => {
                let today = t.date_naive().and_time(Self::at_hour(hour)).and_utc();
                if today > t {
                    today
                } else {
                    today + Duration::days(1)
                }
            }
            Schedule::Monthly { hour } => {
                let this_month = MonthKey::of(t)
                    .first_day()
                    .and_time(Self::at_hour(hour))
                    .and_utc();
                if this_month > t {
                    this_month
                } else {
                    MonthKey::of(t)
                        .next()
                        .first_day()
                        .and_time(Self::at_hour(hour))
                        .and_utc()
                }
            }
        }
    }
}

/// What one watcher tick did.
#[derive(Debug, Default)]
pub struct TickReport {
    pub uploads: Vec<UploadOutcome>,
    pub insights_ran: bool,
    pub monthly_ran: bool,
}

/// Polls the incoming namespace and fires the two schedules.
pub struct Watcher<S: ?Sized, B> {
    handler: UploadHandler<S, B>,
    next_daily: DateTime<Utc>,
    next_monthly: DateTime<Utc>,
    /// Incoming paths that could not be filed away. Skipped until restart.
    stuck: HashSet<String>,
}

impl<S, B> Watcher<S, B>
where
    S: MetricsStore + ?Sized,
    B: ReportBucket,
{
    pub fn new(handler: UploadHandler<S, B>, now: DateTime<Utc>) -> Self {
        Self {
            handler,
            next_daily: DAILY_INSIGHTS.next_after(now),
            next_monthly: MONTHLY_HISTORY.next_after(now),
            stuck: HashSet::new(),
        }
    }

    pub fn handler(&self) -> &UploadHandler<S, B> {
        &self.handler
    }

    pub fn stuck(&self) -> &HashSet<String> {
        &self.stuck
    }

    pub fn next_daily(&self) -> DateTime<Utc> {
        self.next_daily
    }

    pub fn next_monthly(&self) -> DateTime<Utc> {
        self.next_monthly
    }

    pub async fn tick(&mut self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();

        match self.handler.bucket().list(&self.handler.layout().incoming).await {
            Ok(paths) => {
                // A stuck file removed by hand may come back under the same name.
                self.stuck.retain(|p| paths.contains(p));
                for path in paths {
                    if self.stuck.contains(&path) {
                        continue;
                    }
                    match self.handler.handle(&UploadEvent::new(path.clone()), now).await {
                        Ok(outcome) => report.uploads.push(outcome),
                        Err(e) => {
                            error!(%path, error = %e, "could not file report, skipping it from now on");
                            self.stuck.insert(path);
                        }
                    }
                }
            }
            Err(e) => warn!(error = %e, "listing incoming reports failed"),
        }

        if now >= self.next_daily {
            report.insights_ran = true;
            if let Err(e) = self.handler.pipeline().regenerate_insights(now).await {
                error!(error = %e, "daily insight regeneration failed");
            }
            self.next_daily = DAILY_INSIGHTS.next_after(now);
        }

        if now >= self.next_monthly {
            report.monthly_ran = true;
            let month = MonthKey::previous(now);
            if let Err(e) = self.handler.pipeline().aggregate_month(month).await {
                error!(%month, error = %e, "monthly historical aggregation failed");
            }
            self.next_monthly = MONTHLY_HISTORY.next_after(now);
        }

        report
    }
}

/// Tick forever at `interval` until ctrl-c.
pub async fn watch<S, B>(mut watcher: Watcher<S, B>, interval: StdDuration)
where
    S: MetricsStore + ?Sized,
    B: ReportBucket,
{
    info!(
        interval_secs = interval.as_secs(),
        next_daily = %watcher.next_daily(),
        next_monthly = %watcher.next_monthly(),
        "watching for reports"
    );
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let report = watcher.tick(Utc::now()).await;
                if !report.uploads.is_empty() {
                    info!(files = report.uploads.len(), "incoming reports handled");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
