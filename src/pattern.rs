//! Datetime format handling.
//!
//! Parse formats use the `to_timestamp` template syntax (`YYYY-MM-DD HH24:MI`).
//! Native parse functions abort on malformed input, so before one is called
//! the raw text must pass a guard built here: a regular expression for
//! Postgres, a fixed-width GLOB layout for SQLite.
//!
//! Display formats (`DATETIME_FORMAT`) use day.js tokens and are translated
//! to a token list each dialect renders its own way.

use crate::emit::Error;

/// Default guard: `YYYY-M-D` through `YYYY-MM-DD`, optionally followed by
/// `[ T]H:MM[:SS[.ffffff]]` and a `Z` or `±HH[:MM]` offset.
///
/// Capture groups: 1 year, 2 month, 3 day, 4 hour, 5 minute, 6 second,
/// 7 fraction (with dot), 8 zone, 9 offset sign, 10 offset hours,
/// 11 offset minutes.
pub const ISO_GUARD: &str = concat!(
    r"^\s*(\d{4})-(0?[1-9]|1[0-2])-(0?[1-9]|[12]\d|3[01])",
    r"(?:[ T]([01]?\d|2[0-3]):([0-5]\d)(?::([0-5]\d)(\.\d{1,6})?)?",
    r"\s*(Z|([+-])(\d{2}):?(\d{2})?)?)?\s*$"
);

pub mod iso_group {
    pub const YEAR: usize = 1;
    pub const MONTH: usize = 2;
    pub const DAY: usize = 3;
    pub const HOUR: usize = 4;
    pub const MINUTE: usize = 5;
    pub const SECOND: usize = 6;
    pub const FRACTION: usize = 7;
    pub const ZONE: usize = 8;
    pub const OFFSET_SIGN: usize = 9;
    pub const OFFSET_HOURS: usize = 10;
    pub const OFFSET_MINUTES: usize = 11;
}

/// A compiled parse-format guard, with the capture group of every field it
/// can hand back. Month names are captured as the month field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Guard {
    pub pattern: String,
    pub groups: Vec<GuardGroup>,
    /// The format reads its own offset.
    pub zoned: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardGroup {
    pub field: LayoutField,
    pub index: usize,
    /// The group holds an English month name, not a number.
    pub named: bool,
}

impl Guard {
    pub fn group(&self, field: LayoutField) -> Option<GuardGroup> {
        self.groups.iter().find(|g| g.field == field).copied()
    }
}

/// What a template token matches.
#[derive(Debug, Clone, Copy)]
enum Matcher {
    Regex(&'static str),
    /// One of the names, in any letter case, optionally blank-padded.
    Names(&'static [&'static str], bool),
}

const MONTH_NAMES: &[&str] = &[
    "January", "February", "March", "April", "May", "June", "July", "August", "September",
    "October", "November", "December",
];
const MONTH_ABBREVIATIONS: &[&str] = &[
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];
const DAY_NAMES: &[&str] = &[
    "Sunday", "Monday", "Tuesday", "Wednesday", "Thursday", "Friday", "Saturday",
];
const DAY_ABBREVIATIONS: &[&str] = &["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

// Longest first: `MONTH` must win over `MON` and `MM`, `HH24` over `HH`.
const PARSE_TOKENS: &[(&str, Matcher, Option<LayoutField>)] = &[
    ("SSSSS", Matcher::Regex(r"[0-7]?\d{1,4}|8[0-5]\d{3}|86[0-3]\d\d"), None),
    ("Y,YYY", Matcher::Regex(r"\d,\d{3}"), None),
    ("MONTH", Matcher::Names(MONTH_NAMES, true), Some(LayoutField::Month)),
    ("A.M.", Matcher::Regex(r"[AaPp]\.[Mm]\."), None),
    ("P.M.", Matcher::Regex(r"[AaPp]\.[Mm]\."), None),
    ("HH24", Matcher::Regex(r"[01]?\d|2[0-3]"), Some(LayoutField::Hour)),
    ("HH12", Matcher::Regex(r"0?[1-9]|1[0-2]"), None),
    ("SSSS", Matcher::Regex(r"[0-7]?\d{1,4}|8[0-5]\d{3}|86[0-3]\d\d"), None),
    ("YYYY", Matcher::Regex(r"\d{4}"), Some(LayoutField::Year)),
    ("DDD", Matcher::Regex(r"0{0,2}[1-9]|0?[1-9]\d|[12]\d\d|3[0-5]\d|36[0-5]"), None),
    ("DAY", Matcher::Names(DAY_NAMES, true), None),
    ("FF1", Matcher::Regex(r"\d"), None),
    ("FF2", Matcher::Regex(r"\d{1,2}"), None),
    ("FF3", Matcher::Regex(r"\d{1,3}"), None),
    ("FF4", Matcher::Regex(r"\d{1,4}"), None),
    ("FF5", Matcher::Regex(r"\d{1,5}"), None),
    ("FF6", Matcher::Regex(r"\d{1,6}"), None),
    ("MON", Matcher::Names(MONTH_ABBREVIATIONS, false), Some(LayoutField::Month)),
    ("TZH", Matcher::Regex(r"[+-]\d{2}"), None),
    ("TZM", Matcher::Regex(r"\d{2}"), None),
    ("YYY", Matcher::Regex(r"\d{3}"), None),
    ("AM", Matcher::Regex(r"[AaPp][Mm]"), None),
    ("PM", Matcher::Regex(r"[AaPp][Mm]"), None),
    ("CC", Matcher::Regex(r"\d{1,2}"), None),
    ("DD", Matcher::Regex(r"0?[1-9]|[12]\d|3[01]"), Some(LayoutField::Day)),
    ("DY", Matcher::Names(DAY_ABBREVIATIONS, false), None),
    ("HH", Matcher::Regex(r"0?[1-9]|1[0-2]"), None),
    ("MI", Matcher::Regex(r"[0-5]?\d"), Some(LayoutField::Minute)),
    ("MM", Matcher::Regex(r"0?[1-9]|1[0-2]"), Some(LayoutField::Month)),
    ("MS", Matcher::Regex(r"\d{1,3}"), Some(LayoutField::Millisecond)),
    ("OF", Matcher::Regex(r"[+-]\d{2}(?::?\d{2})?"), None),
    ("SS", Matcher::Regex(r"[0-5]?\d"), Some(LayoutField::Second)),
    ("US", Matcher::Regex(r"\d{1,6}"), None),
    ("WW", Matcher::Regex(r"0?[1-9]|[1-4]\d|5[0-3]"), None),
    ("YY", Matcher::Regex(r"\d{2}"), None),
    ("D", Matcher::Regex(r"[1-7]"), None),
    ("J", Matcher::Regex(r"\d{1,7}"), None),
    ("Q", Matcher::Regex(r"[1-4]"), None),
    ("W", Matcher::Regex(r"[1-5]"), None),
    ("Y", Matcher::Regex(r"\d"), None),
];

// Modifiers that change how a field is read but match nothing themselves.
const SKIPPED: &[&str] = &["FM", "FX", "TM", "TH"];

fn starts_with_ignore_case(s: &str, prefix: &str) -> bool {
    s.len() >= prefix.len() && s.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}

fn escape_into(out: &mut String, c: char) {
    if ".^$|?*+()[]{}\\".contains(c) {
        out.push('\\');
    }
    out.push(c);
}

/// `May|June` as `[Mm][Aa][Yy]|[Jj][Uu][Nn][Ee]`. Both regex engines take
/// letter classes, while an inline case-insensitive flag is Rust-only.
fn any_case(out: &mut String, names: &[&str]) {
    for (i, name) in names.iter().enumerate() {
        if i > 0 {
            out.push('|');
        }
        for c in name.chars() {
            out.push('[');
            out.push(c.to_ascii_uppercase());
            out.push(c.to_ascii_lowercase());
            out.push(']');
        }
    }
}

/// The date field a parse token sets, for tokens that may appear once.
fn slot(token: &str) -> Option<&'static str> {
    Some(match token {
        "YYYY" | "Y,YYY" | "YYY" | "YY" | "Y" => "year",
        "MONTH" | "MON" | "MM" => "month",
        "DD" | "DDD" => "day",
        "DAY" | "DY" | "D" => "weekday",
        "HH24" | "HH12" | "HH" => "hour",
        "MI" => "minute",
        "SS" => "second",
        "SSSS" | "SSSSS" => "seconds of day",
        "AM" | "PM" | "A.M." | "P.M." => "meridiem",
        "TZH" | "OF" => "offset",
        _ => return None,
    })
}

/// Template fields `to_timestamp` either cannot read or rejects in
/// combination with calendar dates.
fn unparseable(rest: &str) -> Option<&'static str> {
    if ["TZH", "TZM"].iter().any(|t| starts_with_ignore_case(rest, t)) {
        return None;
    }
    if starts_with_ignore_case(rest, "TZ") {
        return Some("zone names cannot be parsed, use TZH:TZM or OF");
    }
    ["IYYY", "IDDD", "IYY", "IW", "IY", "ID"]
        .iter()
        .any(|t| starts_with_ignore_case(rest, t))
        .then_some("ISO week fields cannot be parsed")
}

fn invalid(format: &str, reason: impl Into<String>) -> Error {
    Error::InvalidFormat {
        format: format.to_string(),
        reason: reason.into(),
    }
}

/// Reads a double-quoted literal starting at the opening quote. Returns the
/// unescaped text and the number of bytes consumed.
fn quoted_literal(format: &str, rest: &str) -> Result<(String, usize), Error> {
    let mut text = String::new();
    let mut chars = rest.char_indices().skip(1);
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => {
                if let Some((_, escaped)) = chars.next() {
                    text.push(escaped);
                }
            }
            '"' => return Ok((text, i + 1)),
            c => text.push(c),
        }
    }
    Err(invalid(format, "unterminated quoted literal"))
}

/// Compiles a `to_timestamp` template into an anchored guard regex. Every
/// string the guard accepts is one `to_timestamp` reads without raising,
/// up to day-of-month validity, which the caller checks from the groups.
pub fn compile_guard(format: &str) -> Result<Guard, Error> {
    if format.trim().is_empty() {
        return Err(invalid(format, "empty format"));
    }

    let mut guard = Guard {
        pattern: String::from("^"),
        groups: Vec::new(),
        zoned: false,
    };
    let mut slots: Vec<&str> = Vec::new();
    let mut groups = 0;
    let mut rest = format;
    'outer: while let Some(c) = rest.chars().next() {
        if c == '"' {
            let (text, consumed) = quoted_literal(format, rest)?;
            for c in text.chars() {
                escape_into(&mut guard.pattern, c);
            }
            rest = &rest[consumed..];
            continue;
        }
        if let Some(skip) = SKIPPED.iter().find(|s| starts_with_ignore_case(rest, s)) {
            rest = &rest[skip.len()..];
            continue;
        }
        if let Some(reason) = unparseable(rest) {
            return Err(invalid(format, reason));
        }
        for (token, matcher, field) in PARSE_TOKENS {
            if starts_with_ignore_case(rest, token) {
                if matches!(*token, "TZH" | "TZM" | "OF") {
                    guard.zoned = true;
                }
                // to_timestamp raises on two values for one field
                if let Some(slot) = slot(token) {
                    if slots.contains(&slot) {
                        return Err(invalid(format, format!("{slot} appears twice")));
                    }
                    slots.push(slot);
                }
                match field {
                    Some(field) => {
                        groups += 1;
                        guard.groups.push(GuardGroup {
                            field: *field,
                            index: groups,
                            named: matches!(matcher, Matcher::Names(..)),
                        });
                        guard.pattern.push('(');
                    }
                    None => guard.pattern.push_str("(?:"),
                }
                match matcher {
                    Matcher::Regex(regex) => {
                        guard.pattern.push_str(regex);
                        guard.pattern.push(')');
                    }
                    Matcher::Names(names, padded) => {
                        any_case(&mut guard.pattern, names);
                        guard.pattern.push(')');
                        if *padded {
                            guard.pattern.push_str(r"\s*");
                        }
                    }
                }
                rest = &rest[token.len()..];
                continue 'outer;
            }
        }
        if c.is_whitespace() {
            guard.pattern.push_str(r"\s");
        } else {
            escape_into(&mut guard.pattern, c);
        }
        rest = &rest[c.len_utf8()..];
    }
    guard.pattern.push('$');

    regex::Regex::new(&guard.pattern).map_err(|e| invalid(format, e.to_string()))?;
    Ok(guard)
}

/// Fields a fixed-width layout can extract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutField {
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
    Millisecond,
}

impl LayoutField {
    pub fn width(self) -> usize {
        match self {
            LayoutField::Year => 4,
            LayoutField::Millisecond => 3,
            _ => 2,
        }
    }
}

/// A fixed-width reading of a parse format: the input must match `glob`
/// exactly, and each field sits at a known 1-based offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedLayout {
    pub glob: String,
    pub fields: Vec<(LayoutField, usize)>,
}

impl FixedLayout {
    pub fn offset_of(&self, field: LayoutField) -> Option<usize> {
        self.fields
            .iter()
            .find(|(f, _)| *f == field)
            .map(|(_, offset)| *offset)
    }
}

const LAYOUT_TOKENS: &[(&str, LayoutField)] = &[
    ("HH24", LayoutField::Hour),
    ("YYYY", LayoutField::Year),
    ("MM", LayoutField::Month),
    ("DD", LayoutField::Day),
    ("MI", LayoutField::Minute),
    ("SS", LayoutField::Second),
    ("MS", LayoutField::Millisecond),
];

fn glob_literal(out: &mut String, c: char) {
    match c {
        '*' | '?' | '[' | ']' => {
            out.push('[');
            out.push(c);
            out.push(']');
        }
        c => out.push(c),
    }
}

/// Reads a parse format as a fixed-width layout. Only zero-padded numeric
/// fields (`YYYY MM DD HH24 MI SS MS`) and literal separators are allowed;
/// year, month and day are required.
pub fn fixed_layout(format: &str) -> Result<FixedLayout, Error> {
    let mut layout = FixedLayout {
        glob: String::new(),
        fields: Vec::new(),
    };
    let mut position = 1;
    let mut rest = format;
    'outer: while let Some(c) = rest.chars().next() {
        if c == '"' {
            let (text, consumed) = quoted_literal(format, rest)?;
            for c in text.chars() {
                glob_literal(&mut layout.glob, c);
                position += 1;
            }
            rest = &rest[consumed..];
            continue;
        }
        for (token, field) in LAYOUT_TOKENS {
            if starts_with_ignore_case(rest, token) {
                if layout.offset_of(*field).is_some() {
                    return Err(invalid(format, format!("{token} appears twice")));
                }
                layout.fields.push((*field, position));
                for _ in 0..field.width() {
                    layout.glob.push_str("[0-9]");
                }
                position += field.width();
                rest = &rest[token.len()..];
                continue 'outer;
            }
        }
        if c.is_ascii_alphanumeric() {
            return Err(invalid(format, "only YYYY MM DD HH24 MI SS MS are supported by SQLite"));
        }
        if !c.is_ascii() {
            return Err(invalid(format, "non-ASCII separator"));
        }
        glob_literal(&mut layout.glob, c);
        position += 1;
        rest = &rest[c.len_utf8()..];
    }
    for required in [LayoutField::Year, LayoutField::Month, LayoutField::Day] {
        if layout.offset_of(required).is_none() {
            return Err(invalid(format, "year, month and day are required"));
        }
    }
    Ok(layout)
}

/// One element of a day.js display format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayToken {
    Literal(String),
    Year4,
    Year2,
    MonthName,
    MonthAbbr,
    Month2,
    Month,
    Day2,
    Day,
    WeekdayName,
    WeekdayAbbr,
    Hour24Padded,
    Hour24,
    Hour12Padded,
    Hour12,
    Minute2,
    Minute,
    Second2,
    Second,
    Millisecond,
    MeridiemUpper,
    MeridiemLower,
}

// Case-sensitive, longest first.
const DISPLAY_TOKENS: &[(&str, DisplayToken)] = &[
    ("YYYY", DisplayToken::Year4),
    ("MMMM", DisplayToken::MonthName),
    ("dddd", DisplayToken::WeekdayName),
    ("MMM", DisplayToken::MonthAbbr),
    ("ddd", DisplayToken::WeekdayAbbr),
    ("SSS", DisplayToken::Millisecond),
    ("YY", DisplayToken::Year2),
    ("MM", DisplayToken::Month2),
    ("DD", DisplayToken::Day2),
    ("HH", DisplayToken::Hour24Padded),
    ("hh", DisplayToken::Hour12Padded),
    ("mm", DisplayToken::Minute2),
    ("ss", DisplayToken::Second2),
    ("M", DisplayToken::Month),
    ("D", DisplayToken::Day),
    ("H", DisplayToken::Hour24),
    ("h", DisplayToken::Hour12),
    ("m", DisplayToken::Minute),
    ("s", DisplayToken::Second),
    ("A", DisplayToken::MeridiemUpper),
    ("a", DisplayToken::MeridiemLower),
];

fn push_literal(tokens: &mut Vec<DisplayToken>, c: char) {
    if let Some(DisplayToken::Literal(text)) = tokens.last_mut() {
        text.push(c);
    } else {
        tokens.push(DisplayToken::Literal(c.to_string()));
    }
}

/// Splits a day.js display format into tokens; `[...]` escapes literal
/// text and anything unrecognized is literal.
pub fn display_tokens(format: &str) -> Vec<DisplayToken> {
    let mut tokens = Vec::new();
    let mut rest = format;
    'outer: while let Some(c) = rest.chars().next() {
        if c == '[' {
            if let Some(end) = rest.find(']') {
                for c in rest[1..end].chars() {
                    push_literal(&mut tokens, c);
                }
                rest = &rest[end + 1..];
                continue;
            }
        }
        for (token, kind) in DISPLAY_TOKENS {
            if rest.starts_with(token) {
                tokens.push(kind.clone());
                rest = &rest[token.len()..];
                continue 'outer;
            }
        }
        push_literal(&mut tokens, c);
        rest = &rest[c.len_utf8()..];
    }
    tokens
}

/// Renders display tokens as a Postgres `to_char` template.
pub fn to_char_template(tokens: &[DisplayToken]) -> String {
    let mut out = String::new();
    for token in tokens {
        let piece = match token {
            DisplayToken::Literal(text) => {
                // quote everything so letters never read as template patterns
                out.push('"');
                for c in text.chars() {
                    if c == '"' || c == '\\' {
                        out.push('\\');
                    }
                    out.push(c);
                }
                out.push('"');
                continue;
            }
            DisplayToken::Year4 => "YYYY",
            DisplayToken::Year2 => "YY",
            DisplayToken::MonthName => "FMMonth",
            DisplayToken::MonthAbbr => "Mon",
            DisplayToken::Month2 => "MM",
            DisplayToken::Month => "FMMM",
            DisplayToken::Day2 => "DD",
            DisplayToken::Day => "FMDD",
            DisplayToken::WeekdayName => "FMDay",
            DisplayToken::WeekdayAbbr => "Dy",
            DisplayToken::Hour24Padded => "HH24",
            DisplayToken::Hour24 => "FMHH24",
            DisplayToken::Hour12Padded => "HH12",
            DisplayToken::Hour12 => "FMHH12",
            DisplayToken::Minute2 => "MI",
            DisplayToken::Minute => "FMMI",
            DisplayToken::Second2 => "SS",
            DisplayToken::Second => "FMSS",
            DisplayToken::Millisecond => "MS",
            DisplayToken::MeridiemUpper => "AM",
            DisplayToken::MeridiemLower => "am",
        };
        out.push_str(piece);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;

    fn matches(guard: &Guard, input: &str) -> bool {
        Regex::new(&guard.pattern).unwrap().is_match(input)
    }

    #[test]
    fn iso_guard() {
        let re = Regex::new(ISO_GUARD).unwrap();
        for ok in [
            "2024-03-05",
            "2024-3-5",
            "2024-03-05 10:00",
            "2024-03-05T10:00:59.123456Z",
            " 2024-12-31T23:59:00+05:30 ",
            "2024-03-05T10:00-0800",
        ] {
            assert!(re.is_match(ok), "{ok}");
        }
        for bad in ["", "   ", "not-a-date", "2024-13-01", "2024-03-05T24:00", "24-03-05"] {
            assert!(!re.is_match(bad), "{bad}");
        }
        let caps = re.captures("2024-03-05T10:07:08.5+02:30").unwrap();
        assert_eq!(&caps[iso_group::YEAR], "2024");
        assert_eq!(&caps[iso_group::MINUTE], "07");
        assert_eq!(&caps[iso_group::FRACTION], ".5");
        assert_eq!(&caps[iso_group::OFFSET_SIGN], "+");
        assert_eq!(&caps[iso_group::OFFSET_MINUTES], "30");
    }

    fn index(guard: &Guard, field: LayoutField) -> Option<usize> {
        guard.group(field).map(|g| g.index)
    }

    #[test]
    fn compiles_common_formats() {
        let guard = compile_guard("YYYY-MM-DD HH24:MI").unwrap();
        assert!(matches(&guard, "2024-03-05 10:00"));
        assert!(matches(&guard, "2024-3-5 10:00"));
        assert!(!matches(&guard, "2024-03-05"));
        assert!(!matches(&guard, "not-a-date"));
        assert_eq!(index(&guard, LayoutField::Year), Some(1));
        assert_eq!(index(&guard, LayoutField::Month), Some(2));
        assert_eq!(index(&guard, LayoutField::Day), Some(3));
        assert_eq!(index(&guard, LayoutField::Hour), Some(4));
        assert_eq!(index(&guard, LayoutField::Minute), Some(5));
        assert_eq!(index(&guard, LayoutField::Second), None);
        assert!(!guard.zoned);
        assert!(compile_guard("YYYY-MM-DD HH24:MI TZH:TZM").unwrap().zoned);

        let guard = compile_guard("DD/MM/YYYY").unwrap();
        assert!(matches(&guard, "05/03/2024"));
        assert!(!matches(&guard, "05-03-2024"));
        assert_eq!(index(&guard, LayoutField::Day), Some(1));
    }

    #[test]
    fn tokens_are_case_insensitive_and_longest_first() {
        let guard = compile_guard("yyyy Month dd").unwrap();
        assert!(matches(&guard, "2024 March 05"));
        assert!(matches(&guard, "2024 MAY      05"));
        let month = guard.group(LayoutField::Month).unwrap();
        assert!(month.named);
        assert_eq!(month.index, 2);
    }

    #[test]
    fn only_english_names_pass() {
        let guard = compile_guard("DD Mon YYYY").unwrap();
        assert!(matches(&guard, "05 Mar 2024"));
        assert!(matches(&guard, "05 sep 2024"));
        assert!(!matches(&guard, "05 Foo 2024"));
        assert!(!matches(&guard, "05 March 2024"));

        let guard = compile_guard("DD Month YYYY").unwrap();
        assert!(matches(&guard, "05 september 2024"));
        assert!(!matches(&guard, "05 Xyzzy 2024"));
        assert!(!matches(&guard, "05 Sept 2024"));

        let guard = compile_guard("Dy, DD MM YYYY").unwrap();
        assert!(matches(&guard, "Tue, 05 03 2024"));
        assert!(!matches(&guard, "Tus, 05 03 2024"));
        let guard = compile_guard("Day DD MM YYYY").unwrap();
        assert!(matches(&guard, "Wednesday 06 03 2024"));
        assert!(!matches(&guard, "Caturday 06 03 2024"));
    }

    #[test]
    fn formats_that_cannot_parse_safely_are_rejected() {
        for format in [
            "YYYY-MM-DD HH24:MI TZ",
            "IYYY-IW",
            "YYYY MM Mon",
            "DD Dy Day",
            "HH24 HH12",
            "YYYY-MM-DD YY",
        ] {
            assert!(
                matches!(compile_guard(format), Err(Error::InvalidFormat { .. })),
                "{format}"
            );
        }
        assert!(compile_guard("YYYY-MM-DD TZH:TZM").is_ok());
    }

    #[test]
    fn modifiers_are_skipped_and_literals_escaped() {
        let guard = compile_guard("FMDDth \"of\" FMMonth, YYYY (Q)").unwrap();
        assert!(matches(&guard, "5 of March, 2024 (1)"));
        assert!(!matches(&guard, "5 of March, 2024 Q1"));

        let guard = compile_guard("YYYY.MM.DD").unwrap();
        assert!(matches(&guard, "2024.03.05"));
        assert!(!matches(&guard, "2024x03x05"));
    }

    #[derive(Debug)]
    struct Reading {
        year: u32,
        month: u32,
        day: u32,
        hour: u32,
        minute: u32,
        second: u32,
    }

    /// The fields a guarded string hands to the parser, read back from the
    /// capture groups.
    fn read(guard: &Guard, input: &str) -> Option<Reading> {
        let caps = Regex::new(&guard.pattern).unwrap().captures(input)?;
        let field = |field: LayoutField, default: u32| match guard.group(field) {
            Some(g) if g.named => {
                let prefix = caps[g.index][..3].to_ascii_lowercase();
                MONTH_ABBREVIATIONS
                    .iter()
                    .position(|m| m.to_ascii_lowercase() == prefix)
                    .map_or(0, |i| i as u32 + 1)
            }
            Some(g) => caps[g.index].parse().unwrap(),
            None => default,
        };
        Some(Reading {
            year: field(LayoutField::Year, 1),
            month: field(LayoutField::Month, 1),
            day: field(LayoutField::Day, 1),
            hour: field(LayoutField::Hour, 0),
            minute: field(LayoutField::Minute, 0),
            second: field(LayoutField::Second, 0),
        })
    }

    proptest::proptest! {
        #[test]
        fn guarded_strings_hold_real_date_parts(
            year in 0u32..10_000,
            month in 0u32..14,
            day in 0u32..34,
            hour in 0u32..26,
            minute in 0u32..62,
            second in 0u32..62,
            padded: bool,
            name in proptest::sample::select(vec![
                "Mar", "mar", "MARCH", "February", "Foo", "Sept", "Xyzzy", "Marc",
            ]),
        ) {
            let two = |n: u32| if padded { format!("{n:02}") } else { n.to_string() };
            let cases = [
                (
                    "YYYY-MM-DD HH24:MI:SS",
                    format!(
                        "{year:04}-{}-{} {}:{}:{}",
                        two(month), two(day), two(hour), two(minute), two(second)
                    ),
                ),
                ("DD Mon YYYY", format!("{} {name} {year:04}", two(day))),
                (
                    "DD Month YYYY HH24:MI",
                    format!("{} {name} {year:04} {}:{}", two(day), two(hour), two(minute)),
                ),
                ("DD/MM/YYYY", format!("{}/{}/{year:04}", two(day), two(month))),
            ];
            for (format, input) in cases {
                let guard = compile_guard(format).unwrap();
                let Some(r) = read(&guard, &input) else { continue };
                proptest::prop_assert!((1..=12).contains(&r.month), "{}: {} {:?}", format, input, r);
                proptest::prop_assert!((1..=31).contains(&r.day), "{}: {} {:?}", format, input, r);
                proptest::prop_assert!(r.hour < 24 && r.minute < 60 && r.second < 60, "{}: {}", format, input);
                proptest::prop_assert!(r.year < 10_000);
            }
        }
    }

    #[test]
    fn rejects_broken_formats() {
        assert!(compile_guard("").is_err());
        assert!(compile_guard("YYYY \"unterminated").is_err());
    }

    #[test]
    fn layouts() {
        let layout = fixed_layout("YYYY-MM-DD HH24:MI").unwrap();
        assert_eq!(
            layout.glob,
            "[0-9][0-9][0-9][0-9]-[0-9][0-9]-[0-9][0-9] [0-9][0-9]:[0-9][0-9]"
        );
        assert_eq!(layout.offset_of(LayoutField::Month), Some(6));
        assert_eq!(layout.offset_of(LayoutField::Minute), Some(15));
        assert_eq!(layout.offset_of(LayoutField::Second), None);

        let layout = fixed_layout("DD/MM/YYYY").unwrap();
        assert_eq!(layout.offset_of(LayoutField::Year), Some(7));

        assert!(fixed_layout("Month DD, YYYY").is_err());
        assert!(fixed_layout("HH24:MI").is_err());
        assert!(fixed_layout("YYYY-MM-DD-DD").is_err());
    }

    #[test]
    fn display_formats() {
        use DisplayToken as T;
        assert_eq!(
            display_tokens("YYYY-MM-DD"),
            vec![T::Year4, T::Literal("-".into()), T::Month2, T::Literal("-".into()), T::Day2]
        );
        assert_eq!(
            display_tokens("[at] h:mm A"),
            vec![
                T::Literal("at ".into()),
                T::Hour12,
                T::Literal(":".into()),
                T::Minute2,
                T::Literal(" ".into()),
                T::MeridiemUpper
            ]
        );
        assert_eq!(
            to_char_template(&display_tokens("dddd, MMMM D YYYY HH:mm:ss.SSS")),
            "FMDay\", \"FMMonth\" \"FMDD\" \"YYYY\" \"HH24\":\"MI\":\"SS\".\"MS"
        );
    }
}
