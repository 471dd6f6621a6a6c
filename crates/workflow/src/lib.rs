//! Maintenance scheduling — cron expressions that trigger sweeper jobs.
//!
//! Includes a zero-dependency cron expression parser supporting standard
//! 5-field expressions: `minute hour day-of-month month day-of-week`.
//! The scheduler only decides *when*; the caller runs the job.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use threadsage_config::ScheduleConfig;

/// A bulk housekeeping operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaintenanceJob {
    /// Delete threads past their expiry, messages included.
    SweepExpired,
    /// Zero every user's monthly points.
    ResetMonthly,
    /// Clear per-user daily token counters.
    ResetDailyTokens,
}

impl MaintenanceJob {
    pub const ALL: [MaintenanceJob; 3] = [
        MaintenanceJob::SweepExpired,
        MaintenanceJob::ResetMonthly,
        MaintenanceJob::ResetDailyTokens,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MaintenanceJob::SweepExpired => "sweep",
            MaintenanceJob::ResetMonthly => "reset-monthly",
            MaintenanceJob::ResetDailyTokens => "reset-daily-tokens",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|job| job.as_str() == s)
    }
}

impl std::fmt::Display for MaintenanceJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Cron expression parser ──────────────────────────────────────────────────

/// A parsed 5-field cron expression: minute hour dom month dow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    minutes: Vec<u32>,
    hours: Vec<u32>,
    days_of_month: Vec<u32>,
    months: Vec<u32>,
    days_of_week: Vec<u32>, // 0=Sun, 6=Sat
}

impl CronExpr {
    /// Parse a standard 5-field cron expression.
    ///
    /// Supports: `*`, `*/N` (step), `N` (literal), `N-M` (range), `N,M` (list).
    pub fn parse(expr: &str) -> Result<Self, String> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(format!(
                "Expected 5 fields (minute hour dom month dow), got {}",
                fields.len()
            ));
        }

        Ok(CronExpr {
            minutes: Self::parse_field(fields[0], 0, 59)?,
            hours: Self::parse_field(fields[1], 0, 23)?,
            days_of_month: Self::parse_field(fields[2], 1, 31)?,
            months: Self::parse_field(fields[3], 1, 12)?,
            days_of_week: Self::parse_field(fields[4], 0, 6)?,
        })
    }

    fn parse_field(field: &str, min: u32, max: u32) -> Result<Vec<u32>, String> {
        let mut values = Vec::new();

        for part in field.split(',') {
            let part = part.trim();

            if let Some((base, step)) = part.split_once('/') {
                let step: u32 = step
                    .parse()
                    .map_err(|_| format!("Invalid step: {step}"))?;
                if step == 0 {
                    return Err("Step cannot be zero".into());
                }
                let (start, end) = if base == "*" {
                    (min, max)
                } else if base.contains('-') {
                    Self::parse_range(base, min, max)?
                } else {
                    (Self::parse_value(base, min, max)?, max)
                };
                values.extend((start..=end).step_by(step as usize));
            } else if part.contains('-') {
                let (start, end) = Self::parse_range(part, min, max)?;
                values.extend(start..=end);
            } else if part == "*" {
                values.extend(min..=max);
            } else {
                values.push(Self::parse_value(part, min, max)?);
            }
        }

        values.sort_unstable();
        values.dedup();
        if values.is_empty() {
            return Err("Field produced no values".into());
        }
        Ok(values)
    }

    fn parse_value(s: &str, min: u32, max: u32) -> Result<u32, String> {
        let v: u32 = s.parse().map_err(|_| format!("Invalid number: {s}"))?;
        if v < min || v > max {
            return Err(format!("{v} out of range {min}-{max}"));
        }
        Ok(v)
    }

    fn parse_range(s: &str, min: u32, max: u32) -> Result<(u32, u32), String> {
        let (start, end) = s
            .split_once('-')
            .ok_or_else(|| format!("Invalid range: {s}"))?;
        let start: u32 = start
            .parse()
            .map_err(|_| format!("Invalid range start: {start}"))?;
        let end: u32 = end
            .parse()
            .map_err(|_| format!("Invalid range end: {end}"))?;
        if start < min || end > max || start > end {
            return Err(format!("Range {start}-{end} invalid for {min}-{max}"));
        }
        Ok((start, end))
    }

    /// Check if the given datetime matches this cron expression.
    pub fn matches(&self, dt: &DateTime<Utc>) -> bool {
        let dow = dt.weekday().num_days_from_sunday(); // 0=Sun

        self.minutes.contains(&dt.minute())
            && self.hours.contains(&dt.hour())
            && self.days_of_month.contains(&dt.day())
            && self.months.contains(&dt.month())
            && self.days_of_week.contains(&dow)
    }
}

// ── Scheduler ───────────────────────────────────────────────────────────────

/// A job whose schedule matched, ready for the caller to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggeredJob {
    pub job: MaintenanceJob,
    pub fired_at: DateTime<Utc>,
}

/// How far back a late check looks for missed minutes.
const MAX_CATCH_UP_MINUTES: i64 = 24 * 60;

#[derive(Debug, Clone)]
struct ScheduledJob {
    job: MaintenanceJob,
    expr: CronExpr,
}

fn minute_floor(t: DateTime<Utc>) -> DateTime<Utc> {
    t.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(t)
}

/// Fires maintenance jobs on their cron schedules.
#[derive(Debug, Clone)]
pub struct MaintenanceScheduler {
    jobs: Vec<ScheduledJob>,
    /// Last minute already evaluated.
    checked_through: Option<DateTime<Utc>>,
}

impl MaintenanceScheduler {
    /// Build from the `[schedule]` section. Fails on the first bad expression.
    pub fn from_config(config: &ScheduleConfig) -> Result<Self, String> {
        let entries = [
            (MaintenanceJob::SweepExpired, &config.sweep),
            (MaintenanceJob::ResetMonthly, &config.reset_monthly),
            (MaintenanceJob::ResetDailyTokens, &config.reset_daily_tokens),
        ];
        let mut jobs = Vec::with_capacity(entries.len());
        for (job, schedule) in entries {
            let expr = CronExpr::parse(schedule).map_err(|e| format!("schedule.{job}: {e}"))?;
            info!(job = %job, schedule = %schedule, "Scheduling maintenance job");
            jobs.push(ScheduledJob { job, expr });
        }
        Ok(Self {
            jobs,
            checked_through: None,
        })
    }

    /// Jobs due since the previous call, up to and including `now`'s minute.
    ///
    /// Minutes skipped by a late call are checked too (at most a day back),
    /// and each job is returned at most once per call. The first call only
    /// checks the current minute.
    pub fn due(&mut self, now: DateTime<Utc>) -> Vec<MaintenanceJob> {
        let current = minute_floor(now);
        let start = match self.checked_through {
            Some(last) if last >= current => return Vec::new(),
            Some(last) => (last + Duration::minutes(1))
                .max(current - Duration::minutes(MAX_CATCH_UP_MINUTES - 1)),
            None => current,
        };
        self.checked_through = Some(current);

        let mut fired = Vec::new();
        for scheduled in &self.jobs {
            let mut minute = start;
            while minute <= current {
                if scheduled.expr.matches(&minute) {
                    fired.push(scheduled.job);
                    break;
                }
                minute += Duration::minutes(1);
            }
        }
        fired
    }

    /// Start the background loop.
    ///
    /// Returns a receiver that emits triggered jobs (the caller runs them
    /// against the sweeper) and a join handle. The loop stops when the
    /// receiver is dropped.
    pub fn start(mut self) -> (mpsc::Receiver<TriggeredJob>, tokio::task::JoinHandle<()>) {
        let (tx, rx) = mpsc::channel::<TriggeredJob>(16);

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(60));
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                interval.tick().await;
                let now = Utc::now();

                for job in self.due(now) {
                    info!(job = %job, "Maintenance job triggered");
                    if tx.send(TriggeredJob { job, fired_at: now }).await.is_err() {
                        debug!("Triggered job receiver dropped, stopping scheduler");
                        return;
                    }
                }
            }
        });

        (rx, handle)
    }
}
