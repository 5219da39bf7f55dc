use std::time::Duration;

use anyhow::anyhow;

use crate::BotError;

const DEFAULT_TIME_UNIT_SECS: u64 = 3600;
const DEFAULT_POLL_SECS: u64 = 60;
const DEFAULT_MIN_TICK_SECS: u64 = 5;

/// Runtime settings for the War engine and its ticker.
#[derive(Debug, Clone)]
pub struct WarConfig {
    /// Length of one voting-window time unit. A window spans one to three units.
    pub time_unit: Duration,
    /// How often the ticker looks for tournaments it is not tracking yet.
    pub poll_interval: Duration,
    /// Shortest delay between two ticks of the same tournament.
    pub min_tick: Duration,
}

impl Default for WarConfig {
    fn default() -> Self {
        Self {
            time_unit: Duration::from_secs(DEFAULT_TIME_UNIT_SECS),
            poll_interval: Duration::from_secs(DEFAULT_POLL_SECS),
            min_tick: Duration::from_secs(DEFAULT_MIN_TICK_SECS),
        }
    }
}

impl WarConfig {
    /// Reads the settings from the environment, falling back to defaults for unset values.
    pub fn from_env() -> Result<Self, BotError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, BotError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let seconds = |key: &str, default: u64| -> Result<Duration, BotError> {
            match lookup(key) {
                None => Ok(Duration::from_secs(default)),
                Some(raw) => {
                    let secs: u64 = raw
                        .trim()
                        .parse()
                        .map_err(|e| anyhow!("{} must be a whole number of seconds: {}", key, e))?;
                    if secs == 0 {
                        return Err(anyhow!("{} must be greater than zero", key));
                    }
                    Ok(Duration::from_secs(secs))
                }
            }
        };

        Ok(Self {
            time_unit: seconds("WAR_TIME_UNIT_SECS", DEFAULT_TIME_UNIT_SECS)?,
            poll_interval: seconds("WAR_POLL_SECS", DEFAULT_POLL_SECS)?,
            min_tick: seconds("WAR_MIN_TICK_SECS", DEFAULT_MIN_TICK_SECS)?,
        })
    }

    pub fn time_unit_secs(&self) -> i64 {
        self.time_unit.as_secs() as i64
    }

    pub fn min_tick_secs(&self) -> i64 {
        self.min_tick.as_secs() as i64
    }
}
