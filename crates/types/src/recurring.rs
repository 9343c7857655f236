use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;
const WEEK: u64 = 7 * DAY;

/// Shortest supported interval
pub const MIN_INTERVAL_SECS: u64 = 5 * MINUTE;

/// Longest supported interval (a calendar month at most)
pub const MAX_INTERVAL_SECS: u64 = 31 * DAY;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CadenceError {
    #[error("invalid cadence code: {0}")]
    InvalidCode(String),

    #[error("interval of {0}s is outside the supported range")]
    IntervalOutOfRange(u64),

    #[error("invalid monthly schedule: day {day} {hour:02}:{minute:02}")]
    InvalidMonthly { day: u32, hour: u32, minute: u32 },
}

/// Rule deciding when a recurring definition next becomes due
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Cadence {
    /// Fires a single time, then the definition disables itself
    Once,

    /// Fixed interval anchored on the previous due time
    Every { interval_secs: u64 },

    /// Calendar schedule in UTC; `day` is clamped to the length of the month
    Monthly { day: u32, hour: u32, minute: u32 },
}

impl Cadence {
    pub fn every(interval_secs: u64) -> Self {
        Cadence::Every { interval_secs }
    }

    /// First of every month at midnight UTC
    pub fn first_of_month() -> Self {
        Cadence::Monthly {
            day: 1,
            hour: 0,
            minute: 0,
        }
    }

    pub fn validate(&self) -> Result<(), CadenceError> {
        match *self {
            Cadence::Once => Ok(()),
            Cadence::Every { interval_secs } => {
                if (MIN_INTERVAL_SECS..=MAX_INTERVAL_SECS).contains(&interval_secs) {
                    Ok(())
                } else {
                    Err(CadenceError::IntervalOutOfRange(interval_secs))
                }
            }
            Cadence::Monthly { day, hour, minute } => {
                if (1..=31).contains(&day) && hour < 24 && minute < 60 {
                    Ok(())
                } else {
                    Err(CadenceError::InvalidMonthly { day, hour, minute })
                }
            }
        }
    }

    /// Next boundary strictly after both `due_at` and `now`.
    ///
    /// Boundaries between `due_at` and `now` are skipped, not replayed.
    pub fn next_after(&self, due_at: u64, now: u64) -> Option<u64> {
        match *self {
            Cadence::Once => None,
            Cadence::Every { interval_secs } => {
                if interval_secs == 0 {
                    return None;
                }
                let elapsed = now.saturating_sub(due_at);
                let steps = elapsed / interval_secs + 1;
                due_at.checked_add(steps.checked_mul(interval_secs)?)
            }
            Cadence::Monthly { day, hour, minute } => {
                next_monthly(now.max(due_at), day, hour, minute)
            }
        }
    }

    /// The boundary immediately following `due_at`
    pub fn following(&self, due_at: u64) -> Option<u64> {
        self.next_after(due_at, due_at)
    }

    /// Number of boundaries in `(due_at, now]` that a skip-ahead passes over
    pub fn missed_between(&self, due_at: u64, now: u64) -> u64 {
        if now <= due_at {
            return 0;
        }
        match *self {
            Cadence::Once => 0,
            Cadence::Every { interval_secs } => {
                if interval_secs == 0 {
                    0
                } else {
                    (now - due_at) / interval_secs
                }
            }
            Cadence::Monthly { .. } => {
                let mut missed = 0;
                let mut cursor = due_at;
                while let Some(next) = self.following(cursor) {
                    if next > now {
                        break;
                    }
                    missed += 1;
                    cursor = next;
                }
                missed
            }
        }
    }
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
        .unwrap_or(28)
}

fn monthly_instant(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> Option<i64> {
    let day = day.min(days_in_month(year, month));
    let naive = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, 0)?;
    Some(Utc.from_utc_datetime(&naive).timestamp())
}

fn next_monthly(after: u64, day: u32, hour: u32, minute: u32) -> Option<u64> {
    let after = i64::try_from(after).ok()?;
    let current = DateTime::<Utc>::from_timestamp(after, 0)?;
    let (mut year, mut month) = (current.year(), current.month());

    // The target is either in this month or the next one
    for _ in 0..2 {
        if let Some(ts) = monthly_instant(year, month, day, hour, minute) {
            if ts > after {
                return u64::try_from(ts).ok();
            }
        }
        if month == 12 {
            year += 1;
            month = 1;
        } else {
            month += 1;
        }
    }
    None
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Cadence::Once => f.write_str("once"),
            Cadence::Every { interval_secs } => {
                if interval_secs % WEEK == 0 {
                    write!(f, "{}w", interval_secs / WEEK)
                } else if interval_secs % DAY == 0 {
                    write!(f, "{}d", interval_secs / DAY)
                } else if interval_secs % HOUR == 0 {
                    write!(f, "{}h", interval_secs / HOUR)
                } else if interval_secs % MINUTE == 0 {
                    write!(f, "{}m", interval_secs / MINUTE)
                } else {
                    write!(f, "{interval_secs}s")
                }
            }
            Cadence::Monthly { day, hour, minute } => {
                write!(f, "monthly:{day}@{hour:02}:{minute:02}")
            }
        }
    }
}

/// Parses the short codes used by the chat surfaces: `once`, `5m`, `3h`,
/// `1d`, `2w`, `monthly`, `monthly:15` and `monthly:15@09:30`.
impl FromStr for Cadence {
    type Err = CadenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim().to_ascii_lowercase();
        let invalid = || CadenceError::InvalidCode(s.to_string());

        if code == "once" {
            return Ok(Cadence::Once);
        }

        if let Some(rest) = code.strip_prefix("monthly") {
            let cadence = if rest.is_empty() {
                Cadence::first_of_month()
            } else {
                let rest = rest.strip_prefix(':').ok_or_else(invalid)?;
                let (day, time) = match rest.split_once('@') {
                    Some((day, time)) => (day, Some(time)),
                    None => (rest, None),
                };
                let day = day.parse::<u32>().map_err(|_| invalid())?;
                let (hour, minute) = match time {
                    Some(time) => {
                        let (h, m) = time.split_once(':').ok_or_else(invalid)?;
                        (
                            h.parse::<u32>().map_err(|_| invalid())?,
                            m.parse::<u32>().map_err(|_| invalid())?,
                        )
                    }
                    None => (0, 0),
                };
                Cadence::Monthly { day, hour, minute }
            };
            cadence.validate()?;
            return Ok(cadence);
        }

        let split = code
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(invalid)?;
        let (count, unit) = code.split_at(split);
        let count = count.parse::<u64>().map_err(|_| invalid())?;
        let unit_secs = match unit {
            "m" | "min" => MINUTE,
            "h" => HOUR,
            "d" => DAY,
            "w" => WEEK,
            _ => return Err(invalid()),
        };

        let cadence = Cadence::every(count.checked_mul(unit_secs).ok_or_else(invalid)?);
        cadence.validate()?;
        Ok(cadence)
    }
}

/// How much a recurring definition transfers per run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AmountSpec {
    Fixed { amount: Decimal },
    /// Resolved at fire time by an external formula (e.g. a usage fee)
    Formula { reference: String },
}

/// What the definition was created for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DefinitionKind {
    Payment,
    /// A scheduled prompt whose runs settle a usage fee
    Prompt { prompt: String },
}

/// A recurring payment or scheduled prompt owned by the scheduler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurringDefinition {
    pub id: String,
    pub origin: String,
    pub kind: DefinitionKind,
    pub source_account: String,
    pub destination_account: String,
    pub token: String,
    pub amount_spec: AmountSpec,
    pub cadence: Cadence,
    pub next_due_at: u64,
    pub enabled: bool,

    pub last_run_at: Option<u64>,
    pub run_count: u64,
    pub last_intent_id: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl RecurringDefinition {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: impl Into<String>,
        origin: impl Into<String>,
        source_account: impl Into<String>,
        destination_account: impl Into<String>,
        token: impl Into<String>,
        amount_spec: AmountSpec,
        cadence: Cadence,
        first_due_at: u64,
        created_at: u64,
    ) -> Self {
        Self {
            id: id.into(),
            origin: origin.into(),
            kind: DefinitionKind::Payment,
            source_account: source_account.into(),
            destination_account: destination_account.into(),
            token: token.into(),
            amount_spec,
            cadence,
            next_due_at: first_due_at,
            enabled: true,
            last_run_at: None,
            run_count: 0,
            last_intent_id: None,
            created_at,
            updated_at: created_at,
        }
    }

    pub fn with_kind(mut self, kind: DefinitionKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn is_due(&self, now: u64) -> bool {
        self.enabled && self.next_due_at <= now
    }

    /// Idempotency key of the intent produced for the cycle due at `due_at`
    pub fn idempotency_key(&self, due_at: u64) -> String {
        format!("recurring:{}:{}", self.id, due_at)
    }
}
