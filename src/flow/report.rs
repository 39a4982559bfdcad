//! Scheduled daily flow report

use chrono::{DateTime, Days, NaiveDate, Timelike, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::DailyFlow;

/// Daily report settings
#[derive(Debug, Clone, Deserialize)]
pub struct ReportConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// UTC hour after which the report goes out
    #[serde(default)]
    pub hour_utc: u32,

    /// Report the day that just ended instead of the running day
    #[serde(default = "default_previous_day")]
    pub previous_day: bool,

    /// How often the report task checks the clock
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
}

fn default_enabled() -> bool { true }
fn default_previous_day() -> bool { true }
fn default_check_interval_secs() -> u64 { 60 }

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            hour_utc: 0,
            previous_day: default_previous_day(),
            check_interval_secs: default_check_interval_secs(),
        }
    }
}

/// One ticker's flow for one day
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyReport {
    pub ticker: String,
    pub date: NaiveDate,
    pub flow: DailyFlow,
    /// Held addresses at report time
    pub holders: usize,
}

impl DailyReport {
    pub fn net_btc(&self) -> Decimal {
        self.flow.net_btc()
    }
}

/// Decides when the next report is due
#[derive(Debug, Clone)]
pub struct ReportSchedule {
    hour_utc: u32,
    previous_day: bool,
    last_reported: Option<NaiveDate>,
}

impl ReportSchedule {
    /// A report already due at `now` counts as sent, so restarts do not repeat it
    pub fn new(config: &ReportConfig, now: DateTime<Utc>) -> Self {
        let mut schedule = Self {
            hour_utc: config.hour_utc.min(23),
            previous_day: config.previous_day,
            last_reported: None,
        };
        schedule.last_reported = schedule.pending(now);
        schedule
    }

    fn pending(&self, now: DateTime<Utc>) -> Option<NaiveDate> {
        if now.hour() < self.hour_utc {
            return None;
        }
        let today = now.date_naive();
        if self.previous_day {
            today.checked_sub_days(Days::new(1))
        } else {
            Some(today)
        }
    }

    /// The date to report now, if a report is due; marks it as reported
    pub fn due(&mut self, now: DateTime<Utc>) -> Option<NaiveDate> {
        let date = self.pending(now)?;
        if self.last_reported == Some(date) {
            return None;
        }
        self.last_reported = Some(date);
        Some(date)
    }
}
