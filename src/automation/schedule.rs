use crate::utils::error::{MumuError, Result};
use chrono::{Duration as ChronoDuration, Local, NaiveDateTime, NaiveTime, Timelike};

pub const DEFAULT_AUTO_START_TIME: &str = "04:38";

/// Daily wall-clock start time for unattended runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoStartSchedule {
    pub enabled: bool,
    pub time: NaiveTime,
}

impl AutoStartSchedule {
    pub fn parse(enabled: bool, time: &str) -> Result<Self> {
        let time = NaiveTime::parse_from_str(time.trim(), "%H:%M").map_err(|e| {
            MumuError::InvalidConfigValueError {
                field: "auto_start_time".to_string(),
                value: time.to_string(),
                reason: format!("Expected HH:MM ({})", e),
            }
        })?;
        Ok(Self { enabled, time })
    }

    pub fn time_string(&self) -> String {
        self.time.format("%H:%M").to_string()
    }

    /// True during the matching minute.
    pub fn is_due(&self, now: NaiveDateTime) -> bool {
        self.enabled && now.hour() == self.time.hour() && now.minute() == self.time.minute()
    }

    pub fn next_run_after(&self, now: NaiveDateTime) -> Option<NaiveDateTime> {
        if !self.enabled {
            return None;
        }
        let today = now.date().and_time(self.time);
        if today > now {
            Some(today)
        } else {
            Some(today + ChronoDuration::days(1))
        }
    }

    /// Sleeps until the next start time in local time. Returns `None` when disabled.
    pub async fn wait_until_due(&self) -> Option<NaiveDateTime> {
        let now = Local::now().naive_local();
        let next = self.next_run_after(now)?;
        let wait = (next - now).to_std().unwrap_or_default();
        tracing::info!("⏰ Auto start scheduled at {} (in {:?})", next, wait);
        tokio::time::sleep(wait).await;
        Some(next)
    }
}

impl Default for AutoStartSchedule {
    fn default() -> Self {
        Self {
            enabled: false,
            time: NaiveTime::from_hms_opt(4, 38, 0).unwrap_or_default(),
        }
    }
}
