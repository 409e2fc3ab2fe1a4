use std::str::FromStr;

use strum_macros::{Display, EnumIter, EnumString};

/// Every function, operator and cast the emitters can render.
///
/// Names parse case-insensitively, either in their canonical form
/// (`DATETIME_DIFF`) or in the camel case the parser uses (`datetimeDiff`).
/// Operators additionally accept their symbol.
#[derive(Display, EnumString, EnumIter, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum FormulaFunction {
    // numeric
    Sum,
    Average,
    Max,
    Min,
    Round,
    Roundup,
    Rounddown,
    Ceiling,
    Floor,
    Even,
    Odd,
    Int,
    Abs,
    Sqrt,
    Power,
    Exp,
    Log,
    Mod,
    Value,

    // text
    Concatenate,
    Find,
    Search,
    Mid,
    Left,
    Right,
    Replace,
    RegexpReplace,
    Substitute,
    Lower,
    Upper,
    Rept,
    Trim,
    Len,
    T,
    EncodeUrlComponent,

    // logical
    If,
    Switch,
    And,
    Or,
    Xor,
    Not,
    Blank,
    Error,
    IsError,

    // datetime
    Today,
    Now,
    Year,
    Month,
    WeekNum,
    Weekday,
    Day,
    Hour,
    Minute,
    Second,
    FromNow,
    ToNow,
    DatetimeDiff,
    Workday,
    WorkdayDiff,
    IsSame,
    IsAfter,
    IsBefore,
    DateAdd,
    Datestr,
    Timestr,
    DatetimeFormat,
    DatetimeParse,
    CreatedTime,
    LastModifiedTime,

    // array
    Countall,
    Counta,
    Count,
    ArrayJoin,
    ArrayUnique,
    ArrayFlatten,
    ArrayCompact,

    // system
    RecordId,
    AutoNumber,
    TextAll,

    // operators
    #[strum(to_string = "ADD", serialize = "+")]
    Add,
    #[strum(to_string = "SUBTRACT", serialize = "-")]
    Subtract,
    #[strum(to_string = "MULTIPLY", serialize = "*")]
    Multiply,
    #[strum(to_string = "DIVIDE", serialize = "/")]
    Divide,
    #[strum(to_string = "MODULO", serialize = "%")]
    Modulo,
    #[strum(to_string = "CONCAT", serialize = "&")]
    Concat,
    #[strum(to_string = "EQUAL", serialize = "=")]
    Equal,
    #[strum(to_string = "NOT_EQUAL", serialize = "!=", serialize = "<>")]
    NotEqual,
    #[strum(to_string = "GREATER_THAN", serialize = ">")]
    GreaterThan,
    #[strum(to_string = "GREATER_THAN_OR_EQUAL", serialize = ">=")]
    GreaterThanOrEqual,
    #[strum(to_string = "LESS_THAN", serialize = "<")]
    LessThan,
    #[strum(to_string = "LESS_THAN_OR_EQUAL", serialize = "<=")]
    LessThanOrEqual,
    #[strum(to_string = "LOGICAL_AND", serialize = "&&")]
    LogicalAnd,
    #[strum(to_string = "LOGICAL_OR", serialize = "||")]
    LogicalOr,
    UnaryMinus,

    // casts
    CastToNumber,
    CastToString,
    CastToBoolean,
    CastToDate,
}

/// Inclusive argument-count bounds; `max == None` means variadic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arity {
    pub min: usize,
    pub max: Option<usize>,
}

impl Arity {
    const fn exactly(n: usize) -> Self {
        Self {
            min: n,
            max: Some(n),
        }
    }
    const fn between(min: usize, max: usize) -> Self {
        Self {
            min,
            max: Some(max),
        }
    }
    const fn at_least(min: usize) -> Self {
        Self { min, max: None }
    }

    pub fn accepts(&self, count: usize) -> bool {
        count >= self.min && self.max.is_none_or(|max| count <= max)
    }
}

impl std::fmt::Display for Arity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.max {
            Some(max) if max == self.min => write!(f, "{max}"),
            Some(max) => write!(f, "{}..={max}", self.min),
            None => write!(f, "at least {}", self.min),
        }
    }
}

impl FormulaFunction {
    /// Looks a function up by any of the names the parser may use for it.
    pub fn lookup(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::from_str(name)
            .or_else(|_| Self::from_str(&camel_to_snake(name)))
            .ok()
    }

    pub fn arity(&self) -> Arity {
        use FormulaFunction as F;
        match self {
            F::Sum | F::Average | F::Max | F::Min => Arity::at_least(1),
            F::Round | F::Roundup | F::Rounddown | F::Ceiling | F::Floor => Arity::between(1, 2),
            F::Even | F::Odd | F::Int | F::Abs | F::Sqrt | F::Exp | F::Value => Arity::exactly(1),
            F::Power | F::Mod => Arity::exactly(2),
            F::Log => Arity::between(1, 2),

            F::Concatenate => Arity::at_least(1),
            F::Find | F::Search => Arity::between(2, 3),
            F::Mid => Arity::exactly(3),
            F::Left | F::Right => Arity::between(1, 2),
            F::Replace => Arity::exactly(4),
            F::RegexpReplace => Arity::exactly(3),
            F::Substitute => Arity::between(3, 4),
            F::Lower | F::Upper | F::Trim | F::Len | F::T | F::EncodeUrlComponent => {
                Arity::exactly(1)
            }
            F::Rept => Arity::exactly(2),

            F::If => Arity::between(2, 3),
            F::Switch => Arity::at_least(3),
            F::And | F::Or | F::Xor => Arity::at_least(1),
            F::Not => Arity::exactly(1),
            F::Blank => Arity::exactly(0),
            F::Error => Arity::between(0, 1),
            F::IsError => Arity::exactly(1),

            F::Today | F::Now | F::CreatedTime | F::LastModifiedTime => Arity::exactly(0),
            F::Year | F::Month | F::WeekNum | F::Day | F::Hour | F::Minute | F::Second => {
                Arity::exactly(1)
            }
            F::Weekday => Arity::between(1, 2),
            F::FromNow | F::ToNow => Arity::between(1, 2),
            F::DatetimeDiff => Arity::between(2, 3),
            F::Workday => Arity::between(2, 3),
            F::WorkdayDiff => Arity::exactly(2),
            F::IsSame | F::IsAfter | F::IsBefore => Arity::between(2, 3),
            F::DateAdd => Arity::exactly(3),
            F::Datestr | F::Timestr => Arity::exactly(1),
            F::DatetimeFormat | F::DatetimeParse => Arity::between(1, 2),

            F::Countall => Arity::exactly(1),
            F::Counta | F::Count => Arity::at_least(1),
            F::ArrayJoin => Arity::between(1, 2),
            F::ArrayUnique | F::ArrayFlatten | F::ArrayCompact => Arity::at_least(1),

            F::RecordId | F::AutoNumber => Arity::exactly(0),
            F::TextAll => Arity::exactly(1),

            F::Add
            | F::Subtract
            | F::Multiply
            | F::Divide
            | F::Modulo
            | F::Concat
            | F::Equal
            | F::NotEqual
            | F::GreaterThan
            | F::GreaterThanOrEqual
            | F::LessThan
            | F::LessThanOrEqual
            | F::LogicalAnd
            | F::LogicalOr => Arity::exactly(2),
            F::UnaryMinus => Arity::exactly(1),

            F::CastToNumber | F::CastToString | F::CastToBoolean | F::CastToDate => {
                Arity::exactly(1)
            }
        }
    }
}

fn camel_to_snake(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in name.char_indices() {
        if c.is_ascii_uppercase() && i > 0 {
            out.push('_');
        }
        out.push(c.to_ascii_uppercase());
    }
    out
}
