//! Vaccination validity: how long a shot protects and where it stands today.
//!
//! Durations come from a fixed table of name fragments (German and English
//! product names both occur on vaccination cards). Matching is a
//! case-insensitive substring search; the first matching entry wins, so more
//! specific fragments are listed before broader ones. Unknown vaccines get
//! [`DEFAULT_VALIDITY_YEARS`].
//!
//! Everything here is pure: no store access, and "now" is always passed in.

use chrono::{DateTime, Months, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_VALIDITY_YEARS: u32 = 10;

const MS_PER_DAY: i64 = 86_400_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Validity {
    Years(u32),
    Lifelong,
}

const KNOWN_VACCINES: &[(&str, Validity)] = &[
    // Lifelong after the full series
    ("masern", Validity::Lifelong),
    ("measles", Validity::Lifelong),
    ("mumps", Validity::Lifelong),
    ("röteln", Validity::Lifelong),
    ("rubella", Validity::Lifelong),
    ("mmr", Validity::Lifelong),
    ("varizellen", Validity::Lifelong),
    ("varicella", Validity::Lifelong),
    ("windpocken", Validity::Lifelong),
    ("gelbfieber", Validity::Lifelong),
    ("yellow fever", Validity::Lifelong),
    ("hpv", Validity::Lifelong),
    // Boosters
    ("tetanus", Validity::Years(5)),
    ("diphtherie", Validity::Years(5)),
    ("diphtheria", Validity::Years(5)),
    ("pertussis", Validity::Years(10)),
    ("keuchhusten", Validity::Years(10)),
    ("polio", Validity::Years(10)),
    ("hepatitis a", Validity::Years(25)),
    ("hepatitis b", Validity::Years(20)),
    ("fsme", Validity::Years(3)),
    ("tick-borne", Validity::Years(3)),
    ("tollwut", Validity::Years(5)),
    ("rabies", Validity::Years(5)),
    ("meningokokken", Validity::Years(5)),
    ("meningococcal", Validity::Years(5)),
    ("pneumokokken", Validity::Years(6)),
    ("pneumococcal", Validity::Years(6)),
    ("typhus", Validity::Years(3)),
    ("typhoid", Validity::Years(3)),
    ("cholera", Validity::Years(2)),
    ("influenza", Validity::Years(1)),
    ("grippe", Validity::Years(1)),
    ("flu", Validity::Years(1)),
    ("covid", Validity::Years(1)),
    ("corona", Validity::Years(1)),
];

/// Where a vaccination stands relative to a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ValidityStatus {
    Lifelong,
    Valid { days_remaining: i64 },
    Overdue { days_overdue: i64 },
}

impl ValidityStatus {
    pub fn is_overdue(&self) -> bool {
        matches!(self, Self::Overdue { .. })
    }

    /// Overdue, or expiring within `window_days`.
    pub fn due_within(&self, window_days: i64) -> bool {
        match self {
            Self::Lifelong => false,
            Self::Valid { days_remaining } => *days_remaining <= window_days,
            Self::Overdue { .. } => true,
        }
    }

    pub fn text(&self) -> String {
        match self {
            Self::Lifelong => "Lifelong protection".to_string(),
            Self::Valid { days_remaining: 0 } => "Expires today".to_string(),
            Self::Valid { days_remaining } => format!("Valid for {}", span(*days_remaining)),
            Self::Overdue { days_overdue } => format!("Overdue by {}", span(*days_overdue)),
        }
    }
}

pub fn validity_years(vaccine_name: &str) -> Validity {
    let name = vaccine_name.to_lowercase();
    KNOWN_VACCINES
        .iter()
        .find(|(fragment, _)| name.contains(fragment))
        .map(|(_, validity)| *validity)
        .unwrap_or(Validity::Years(DEFAULT_VALIDITY_YEARS))
}

/// Date the protection runs out; `None` for lifelong vaccines.
pub fn expiry_date(vaccine_name: &str, administered: NaiveDate) -> Option<NaiveDate> {
    match validity_years(vaccine_name) {
        Validity::Lifelong => None,
        Validity::Years(years) => Some(
            administered
                .checked_add_months(Months::new(years * 12))
                .unwrap_or(NaiveDate::MAX),
        ),
    }
}

/// Whole days between `now` and the expiry date (midnight UTC), floored.
pub fn status(vaccine_name: &str, administered: NaiveDate, now: DateTime<Utc>) -> ValidityStatus {
    let Some(expiry) = expiry_date(vaccine_name, administered) else {
        return ValidityStatus::Lifelong;
    };

    let expires_at = expiry.and_time(NaiveTime::MIN).and_utc();
    let days = (expires_at - now).num_milliseconds().div_euclid(MS_PER_DAY);
    if days < 0 {
        ValidityStatus::Overdue { days_overdue: -days }
    } else {
        ValidityStatus::Valid { days_remaining: days }
    }
}

pub fn status_text(vaccine_name: &str, administered: NaiveDate, now: DateTime<Utc>) -> String {
    status(vaccine_name, administered, now).text()
}

/// Under 30 days in days, under a year in 30-day months, otherwise years
/// plus remaining months.
fn span(days: i64) -> String {
    if days < 30 {
        return plural(days, "day");
    }
    if days < 365 {
        return plural(days / 30, "month");
    }
    let years = days / 365;
    let months = (days % 365) / 30;
    if months == 0 {
        plural(years, "year")
    } else {
        format!("{} and {}", plural(years, "year"), plural(months, "month"))
    }
}

fn plural(n: i64, unit: &str) -> String {
    if n == 1 {
        format!("1 {unit}")
    } else {
        format!("{n} {unit}s")
    }
}
