use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use chrono::TimeZone;
use chrono_tz::Tz;
use cron::Schedule;
use serde::{Deserialize, Serialize};

pub const DEFAULT_BUSINESS_HOURS_CRON: &str = "0 * 9-17 * * Mon-Fri";
pub const DEFAULT_OFF_HOURS_CRON: &str = "0 0 0-8,18-23 * * Mon-Fri";
pub const DEFAULT_WEEKEND_CRON: &str = "0 0 */4 * * Sat,Sun";
pub const DEFAULT_POLICY_TIMEZONE: &str = "UTC";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Raw cron expressions (with seconds field) and the timezone they run in.
pub struct PublishPolicyConfig {
    pub business_hours_cron: String,
    pub off_hours_cron: String,
    pub weekend_cron: String,
    pub timezone: String,
}

impl Default for PublishPolicyConfig {
    fn default() -> Self {
        Self {
            business_hours_cron: DEFAULT_BUSINESS_HOURS_CRON.to_string(),
            off_hours_cron: DEFAULT_OFF_HOURS_CRON.to_string(),
            weekend_cron: DEFAULT_WEEKEND_CRON.to_string(),
            timezone: DEFAULT_POLICY_TIMEZONE.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
/// Parsed publish cadence: a cycle is due whenever any schedule fires.
pub struct PublishPolicy {
    timezone: Tz,
    schedules: Vec<(String, Schedule)>,
}

impl PublishPolicy {
    pub fn from_config(config: &PublishPolicyConfig) -> Result<Self> {
        let timezone: Tz = config
            .timezone
            .trim()
            .parse()
            .map_err(|error| anyhow!("invalid timezone '{}': {error}", config.timezone))?;
        let schedules = [
            &config.business_hours_cron,
            &config.off_hours_cron,
            &config.weekend_cron,
        ]
        .into_iter()
        .map(|raw| raw.trim())
        .filter(|raw| !raw.is_empty())
        .map(|raw| {
            Schedule::from_str(raw)
                .map(|schedule| (raw.to_string(), schedule))
                .with_context(|| format!("invalid cron expression '{raw}'"))
        })
        .collect::<Result<Vec<_>>>()?;
        if schedules.is_empty() {
            anyhow::bail!("publish policy requires at least one cron schedule");
        }
        Ok(Self {
            timezone,
            schedules,
        })
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn cron_expressions(&self) -> Vec<&str> {
        self.schedules.iter().map(|(raw, _)| raw.as_str()).collect()
    }

    /// Earliest occurrence strictly after `from_unix_ms` across all schedules.
    pub fn next_due_unix_ms(&self, from_unix_ms: u64) -> Option<u64> {
        let from = self
            .timezone
            .timestamp_millis_opt(i64::try_from(from_unix_ms).unwrap_or(i64::MAX))
            .single()?;
        self.schedules
            .iter()
            .filter_map(|(_, schedule)| schedule.after(&from).next())
            .filter_map(|next| u64::try_from(next.timestamp_millis()).ok())
            .min()
    }

    /// True when some schedule has an occurrence in `(last_run, now]`.
    pub fn is_due(&self, last_run_unix_ms: u64, now_unix_ms: u64) -> bool {
        if now_unix_ms <= last_run_unix_ms {
            return false;
        }
        self.next_due_unix_ms(last_run_unix_ms)
            .is_some_and(|next| next <= now_unix_ms)
    }
}
