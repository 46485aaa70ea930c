use crate::constants::{DEFAULT_MAINTENANCE_WINDOW, DEFAULT_MARKET_TIMEZONE};
use crate::error::{AppError, Result};
use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use std::time::Duration;

/// Daily window during which the upstream is known to be unreliable (its own rollover)
/// and polling pauses.
///
/// The window is half-open `[start, end)` in the market timezone. When `start > end`
/// it wraps past midnight, e.g. `23:50-00:10`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaintenanceWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub timezone: Tz,
}

impl Default for MaintenanceWindow {
    fn default() -> Self {
        // Both constants are well-formed; fall back to an empty window rather than panic
        Self::parse(DEFAULT_MAINTENANCE_WINDOW, DEFAULT_MARKET_TIMEZONE).unwrap_or(Self {
            start: NaiveTime::MIN,
            end: NaiveTime::MIN,
            timezone: chrono_tz::Asia::Kolkata,
        })
    }
}

impl MaintenanceWindow {
    /// Parse `HH:MM-HH:MM` in the named timezone
    pub fn parse(window: &str, timezone: &str) -> Result<Self> {
        let tz: Tz = timezone
            .parse()
            .map_err(|e| AppError::Config(format!("Invalid timezone '{}': {}", timezone, e)))?;

        let (start, end) = window
            .split_once('-')
            .ok_or_else(|| AppError::Config(format!("Invalid maintenance window '{}': expected HH:MM-HH:MM", window)))?;

        let parse_time = |s: &str| {
            NaiveTime::parse_from_str(s.trim(), "%H:%M")
                .map_err(|e| AppError::Config(format!("Invalid time '{}' in maintenance window: {}", s.trim(), e)))
        };

        Ok(Self {
            start: parse_time(start)?,
            end: parse_time(end)?,
            timezone: tz,
        })
    }

    /// Window that never matches
    pub fn disabled() -> Self {
        Self {
            start: NaiveTime::MIN,
            end: NaiveTime::MIN,
            timezone: chrono_tz::UTC,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Check if the instant falls inside the window
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        if self.is_empty() {
            return false;
        }

        let local = now.with_timezone(&self.timezone).time();
        if self.start < self.end {
            local >= self.start && local < self.end
        } else {
            // Wraps past midnight
            local >= self.start || local < self.end
        }
    }

    /// Time left until the window closes, or zero when outside it
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        if !self.contains(now) {
            return Duration::ZERO;
        }
        let local = now.with_timezone(&self.timezone).time();
        // Negative only when the window wraps midnight and `now` is before it
        let millis = (self.end - local).num_milliseconds();
        let millis = if millis < 0 { millis + 86_400_000 } else { millis };
        Duration::from_millis(millis as u64)
    }
}

impl std::fmt::Display for MaintenanceWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}-{} {}",
            self.start.format("%H:%M"),
            self.end.format("%H:%M"),
            self.timezone.name()
        )
    }
}

/// Sleep to use while paused: the regular check interval, shortened if the window closes sooner
pub fn get_pause_interval(window: &MaintenanceWindow, now: DateTime<Utc>, check_interval: Duration) -> Duration {
    let remaining = window.remaining(now);
    if remaining.is_zero() {
        check_interval
    } else {
        check_interval.min(remaining)
    }
}
