use std::path::PathBuf;
use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};
use tracing::warn;

use crate::template::SeriesKeyResolver;
use crate::value::DEFAULT_SERIES_SUFFIX;

/// Runtime configuration for the series service.
#[derive(Debug, Clone)]
pub struct SeriesConfig {
    /// Path to the redb database file. In-memory store when unset.
    pub db_path: Option<PathBuf>,

    /// How long an allocation waits for a busy series before giving up.
    pub lock_timeout: Duration,

    /// Offset at which suffix templates read the wall clock.
    pub utc_offset: FixedOffset,

    /// Template used by `SeriesService::field` when none is given.
    pub default_series_suffix: String,
}

impl Default for SeriesConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            lock_timeout: Duration::from_secs(2),
            utc_offset: Utc.fix(),
            default_series_suffix: DEFAULT_SERIES_SUFFIX.to_string(),
        }
    }
}

impl SeriesConfig {
    /// Parse configuration from command-line arguments.
    ///
    /// Supported flags:
    /// - `--db=PATH`
    /// - `--lock-timeout-ms=N`
    /// - `--utc-offset=+HH:MM`
    /// - `--series-suffix=TEMPLATE`
    ///
    /// Unknown flags are ignored; malformed values keep the default.
    pub fn from_args(args: &[String]) -> Self {
        let mut config = SeriesConfig::default();

        for arg in args {
            if let Some(val) = arg.strip_prefix("--db=") {
                config.db_path = Some(PathBuf::from(val));
            } else if let Some(val) = arg.strip_prefix("--lock-timeout-ms=") {
                match val.parse::<u64>() {
                    Ok(ms) => config.lock_timeout = Duration::from_millis(ms),
                    Err(_) => warn!("SeriesConfig: ignoring --lock-timeout-ms={}", val),
                }
            } else if let Some(val) = arg.strip_prefix("--utc-offset=") {
                match parse_offset(val) {
                    Some(offset) => config.utc_offset = offset,
                    None => warn!("SeriesConfig: ignoring --utc-offset={}", val),
                }
            } else if let Some(val) = arg.strip_prefix("--series-suffix=") {
                config.default_series_suffix = val.to_string();
            }
        }

        config
    }

    pub fn resolver(&self) -> SeriesKeyResolver {
        SeriesKeyResolver::new(self.utc_offset)
    }
}

/// Accepts `Z`, `UTC`, `+HH`, `+HH:MM` and `+HHMM` (or `-`).
fn parse_offset(raw: &str) -> Option<FixedOffset> {
    if raw.eq_ignore_ascii_case("z") || raw.eq_ignore_ascii_case("utc") {
        return Some(Utc.fix());
    }

    let (sign, rest) = match raw.as_bytes().first().copied()? {
        b'+' => (1, &raw[1..]),
        b'-' => (-1, &raw[1..]),
        _ => return None,
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let (hours, minutes) = match digits.len() {
        2 => (digits.parse::<i32>().ok()?, 0),
        4 => (digits[..2].parse::<i32>().ok()?, digits[2..].parse::<i32>().ok()?),
        _ => return None,
    };
    if minutes >= 60 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}
