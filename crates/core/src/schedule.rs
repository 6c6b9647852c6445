use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeZone};
use cron::Schedule;
use serde::{Deserialize, Serialize};

use crate::error::{BackupError, Result};
use crate::retention::RetentionPolicy;

const WEEKDAYS: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
        })
    }
}

/// Unattended backup timing plus the retention applied after each run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub enabled: bool,
    pub frequency: Frequency,
    /// Local time, `HH:MM`.
    pub time_of_day: String,
    /// Weekday 0-6 (Sunday first) for weekly, day of month 1-28 for monthly.
    pub day_selector: u32,
    pub retention_enabled: bool,
    pub retention_days: u32,
    pub retention_min_count: usize,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            frequency: Frequency::Daily,
            time_of_day: "02:00".to_owned(),
            day_selector: 0,
            retention_enabled: true,
            retention_days: 30,
            retention_min_count: 5,
        }
    }
}

impl ScheduleConfig {
    /// Six-field cron expression (`sec min hour dom month dow`).
    pub fn cron_expression(&self) -> Result<String> {
        let (hour, minute) = parse_time_of_day(&self.time_of_day)?;
        let expr = match self.frequency {
            Frequency::Daily => format!("0 {minute} {hour} * * *"),
            Frequency::Weekly => {
                let day = WEEKDAYS.get(self.day_selector as usize).ok_or_else(|| {
                    BackupError::InvalidSchedule(format!(
                        "weekday must be 0-6, got {}",
                        self.day_selector
                    ))
                })?;
                format!("0 {minute} {hour} * * {day}")
            }
            Frequency::Monthly => {
                if !(1..=28).contains(&self.day_selector) {
                    return Err(BackupError::InvalidSchedule(format!(
                        "day of month must be 1-28, got {}",
                        self.day_selector
                    )));
                }
                format!("0 {minute} {hour} {} * *", self.day_selector)
            }
        };
        Ok(expr)
    }

    pub fn schedule(&self) -> Result<Schedule> {
        let expr = self.cron_expression()?;
        Schedule::from_str(&expr)
            .map_err(|e| BackupError::InvalidSchedule(format!("{expr}: {e}")))
    }

    pub fn retention(&self) -> Option<RetentionPolicy> {
        self.retention_enabled
            .then(|| RetentionPolicy::new(self.retention_days, self.retention_min_count))
    }
}

/// Next firing strictly after `after`.
pub fn next_fire<Tz: TimeZone>(schedule: &Schedule, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
    schedule.after(after).next()
}

fn parse_time_of_day(raw: &str) -> Result<(u32, u32)> {
    let invalid = || BackupError::InvalidSchedule(format!("time of day must be HH:MM, got {raw:?}"));
    let (h, m) = raw.trim().split_once(':').ok_or_else(invalid)?;
    let hour: u32 = h.parse().map_err(|_| invalid())?;
    let minute: u32 = m.parse().map_err(|_| invalid())?;
    if hour > 23 || minute > 59 {
        return Err(invalid());
    }
    Ok((hour, minute))
}
