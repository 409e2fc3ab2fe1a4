//! Datetime unit literals as users write them (`"hrs"`, `"M"`, `"qtrs"`)
//! normalized to a canonical unit and a scale factor.

use strum_macros::EnumIter;

#[derive(EnumIter, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatetimeUnit {
    Millisecond,
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl DatetimeUnit {
    /// Length of the unit in milliseconds, for the units that have a fixed
    /// length.
    pub fn fixed_millis(self) -> Option<i64> {
        match self {
            Self::Millisecond => Some(1),
            Self::Second => Some(1_000),
            Self::Minute => Some(60_000),
            Self::Hour => Some(3_600_000),
            Self::Day => Some(86_400_000),
            Self::Week => Some(7 * 86_400_000),
            Self::Month | Self::Quarter | Self::Year => None,
        }
    }

    /// The field name `date_trunc` accepts.
    pub fn postgres_field(self) -> &'static str {
        match self {
            Self::Millisecond => "milliseconds",
            other => other.name(),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Millisecond => "millisecond",
            Self::Second => "second",
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
            Self::Quarter => "quarter",
            Self::Year => "year",
        }
    }
}

/// A canonical unit and how many of it one user-facing unit stands for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaledUnit {
    pub unit: DatetimeUnit,
    pub factor: f64,
}

impl ScaledUnit {
    const fn new(unit: DatetimeUnit, factor: f64) -> Self {
        Self { unit, factor }
    }
}

/// Parses a unit literal. Single letters are case-sensitive (`M` is month,
/// `m` is minute); longer aliases are not. Unrecognized input yields `None`.
pub fn parse_unit(literal: &str) -> Option<DatetimeUnit> {
    use DatetimeUnit as U;
    let trimmed = literal.trim().trim_end_matches('.');
    let unit = match trimmed {
        "ms" | "MS" => U::Millisecond,
        "s" | "S" => U::Second,
        "m" => U::Minute,
        "h" | "H" => U::Hour,
        "d" | "D" => U::Day,
        "w" | "W" => U::Week,
        "M" => U::Month,
        "q" | "Q" => U::Quarter,
        "y" | "Y" => U::Year,
        _ => match trimmed.to_ascii_lowercase().as_str() {
            "millisecond" | "milliseconds" | "msec" | "msecs" | "millis" => U::Millisecond,
            "sec" | "secs" | "second" | "seconds" => U::Second,
            "min" | "mins" | "minute" | "minutes" => U::Minute,
            "hr" | "hrs" | "hour" | "hours" => U::Hour,
            "day" | "days" => U::Day,
            "wk" | "wks" | "week" | "weeks" => U::Week,
            "mo" | "mos" | "mon" | "mons" | "month" | "months" => U::Month,
            "qtr" | "qtrs" | "quarter" | "quarters" => U::Quarter,
            "yr" | "yrs" | "year" | "years" => U::Year,
            _ => return None,
        },
    };
    Some(unit)
}

fn parse_or_day(literal: &str) -> DatetimeUnit {
    parse_unit(literal).unwrap_or_else(|| {
        tracing::debug!(unit = literal, "unrecognized unit, using day");
        DatetimeUnit::Day
    })
}

/// Unit for interval arithmetic (DATE_ADD). Quarters become 3 months,
/// weeks 7 days and milliseconds a thousandth of a second.
pub fn normalize_interval_unit(literal: &str) -> ScaledUnit {
    use DatetimeUnit as U;
    match parse_or_day(literal) {
        U::Millisecond => ScaledUnit::new(U::Second, 0.001),
        U::Week => ScaledUnit::new(U::Day, 7.0),
        U::Quarter => ScaledUnit::new(U::Month, 3.0),
        unit => ScaledUnit::new(unit, 1.0),
    }
}

/// Unit for differences (DATETIME_DIFF). Calendar units are measured in
/// months and fixed units in their own length.
pub fn normalize_diff_unit(literal: &str) -> ScaledUnit {
    use DatetimeUnit as U;
    match parse_or_day(literal) {
        U::Week => ScaledUnit::new(U::Day, 7.0),
        U::Quarter => ScaledUnit::new(U::Month, 3.0),
        U::Year => ScaledUnit::new(U::Month, 12.0),
        unit => ScaledUnit::new(unit, 1.0),
    }
}

/// Unit for truncation (IS_SAME and friends); quarter stays quarter.
pub fn normalize_truncate_unit(literal: &str) -> ScaledUnit {
    ScaledUnit::new(parse_or_day(literal), 1.0)
}
