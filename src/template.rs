//! Series suffix templates.
//!
//! A template is a date format string using the single-letter placeholders
//! of PHP's `date()`: `-Y-m` renders as `-2024-03`. A backslash makes the
//! next character literal, so words can sit next to tokens:
//! `-Y-\s\t\o\r\e` renders as `-2024-store`. Characters that are not
//! placeholders are copied as they are.

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Offset, Timelike, Utc};

use crate::error::SeriesError;

/// Turns a suffix template and a point in time into a resolved suffix.
///
/// Resolution is pure: the same template, time and offset always give the
/// same suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeriesKeyResolver {
    offset: FixedOffset,
}

impl Default for SeriesKeyResolver {
    fn default() -> Self {
        Self::new(Utc.fix())
    }
}

impl SeriesKeyResolver {
    /// A resolver rendering wall-clock fields at the given UTC offset.
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub fn resolve(&self, template: &str, at: DateTime<Utc>) -> Result<String, SeriesError> {
        let local = at.with_timezone(&self.offset);
        let mut out = String::with_capacity(template.len() * 2);
        let mut chars = template.chars();

        while let Some(c) = chars.next() {
            if c == '\\' {
                match chars.next() {
                    Some(literal) => out.push(literal),
                    None => return Err(invalid(template, "trailing escape character")),
                }
                continue;
            }

            match render_token(c, &local) {
                Ok(Some(rendered)) => out.push_str(&rendered),
                Ok(None) => out.push(c),
                Err(reason) => return Err(invalid(template, reason)),
            }
        }

        Ok(out)
    }
}

fn invalid(template: &str, reason: impl Into<String>) -> SeriesError {
    SeriesError::InvalidTemplate {
        template: template.to_string(),
        reason: reason.into(),
    }
}

/// Render one placeholder. `Ok(None)` means the character is not a
/// placeholder and is copied literally.
fn render_token(token: char, dt: &DateTime<FixedOffset>) -> Result<Option<String>, String> {
    let rendered = match token {
        // Day
        'd' => format!("{:02}", dt.day()),
        'D' => dt.format("%a").to_string(),
        'j' => dt.day().to_string(),
        'l' => dt.format("%A").to_string(),
        'N' => dt.weekday().number_from_monday().to_string(),
        'S' => ordinal_suffix(dt.day()).to_string(),
        'w' => dt.weekday().num_days_from_sunday().to_string(),
        'z' => dt.ordinal0().to_string(),

        // Week
        'W' => format!("{:02}", dt.iso_week().week()),

        // Month
        'F' => dt.format("%B").to_string(),
        'm' => format!("{:02}", dt.month()),
        'M' => dt.format("%b").to_string(),
        'n' => dt.month().to_string(),
        't' => days_in_month(dt.year(), dt.month()).to_string(),

        // Year
        'L' => u8::from(is_leap_year(dt.year())).to_string(),
        'o' => dt.iso_week().year().to_string(),
        'Y' => full_year(dt.year()),
        'y' => format!("{:02}", dt.year().rem_euclid(100)),

        // Time
        'a' => (if dt.hour() < 12 { "am" } else { "pm" }).to_string(),
        'A' => (if dt.hour() < 12 { "AM" } else { "PM" }).to_string(),
        'B' => format!("{:03}", swatch_beat(dt)),
        'g' => dt.hour12().1.to_string(),
        'G' => dt.hour().to_string(),
        'h' => format!("{:02}", dt.hour12().1),
        'H' => format!("{:02}", dt.hour()),
        'i' => format!("{:02}", dt.minute()),
        's' => format!("{:02}", dt.second()),
        'u' => format!("{:06}", dt.timestamp_subsec_micros()),
        'v' => format!("{:03}", dt.timestamp_subsec_millis()),

        // Offset
        'O' => dt.format("%z").to_string(),
        'P' => dt.format("%:z").to_string(),
        'p' => {
            if dt.offset().local_minus_utc() == 0 {
                "Z".to_string()
            } else {
                dt.format("%:z").to_string()
            }
        }
        'Z' => dt.offset().local_minus_utc().to_string(),

        // Full date/time
        'c' => format!("{}{}", full_year(dt.year()), dt.format("-%m-%dT%H:%M:%S%:z")),
        'r' => dt.format("%a, %d %b %Y %H:%M:%S %z").to_string(),
        'U' => dt.timestamp().to_string(),

        'e' | 'T' | 'I' => {
            return Err(format!(
                "placeholder '{}' needs a named time zone, only fixed offsets are supported",
                token
            ));
        }
        'X' | 'x' => return Err(format!("placeholder '{}' is not supported", token)),

        _ => return Ok(None),
    };
    Ok(Some(rendered))
}

/// At least four digits, with a leading minus for years before year zero.
fn full_year(year: i32) -> String {
    if year < 0 {
        format!("-{:04}", year.unsigned_abs())
    } else {
        format!("{:04}", year)
    }
}

fn ordinal_suffix(day: u32) -> &'static str {
    match day {
        1 | 21 | 31 => "st",
        2 | 22 => "nd",
        3 | 23 => "rd",
        _ => "th",
    }
}

fn is_leap_year(year: i32) -> bool {
    NaiveDate::from_ymd_opt(year, 2, 29).is_some()
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first| first.pred_opt())
        .map(|last| last.day())
        .unwrap_or(31)
}

/// Swatch Internet Time: thousandths of a day, measured at UTC+1.
fn swatch_beat(dt: &DateTime<FixedOffset>) -> u32 {
    let utc = dt.with_timezone(&Utc);
    let seconds = (utc.num_seconds_from_midnight() + 3600) % 86_400;
    seconds * 10 / 864
}
