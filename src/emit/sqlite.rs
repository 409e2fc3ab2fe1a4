//! SQLite spellings. Datetimes are ISO-8601 UTC text; wall-clock work goes
//! through `strftime` with the zone's fixed offset as a modifier.
//!
//! Some numeric functions (`POWER`, `CEIL`, `mod`) need SQLite built with
//! its math functions.

use super::{
    Call, Error, FormulaEmitter,
    common::{self, ArrayOp, MAX_REPEAT_LENGTH, collapsed, datetime, number, text_or_empty},
};
use crate::{
    coercion::{
        Coercer, Operand, OperandKind, Zone,
        sqlite::{ISO_OUTPUT, column, each, glob},
    },
    functions::FormulaFunction as F,
    pattern::{DisplayToken, LayoutField, display_tokens, fixed_layout},
    sql::{
        BinaryOp, Cte, ExprRef, FromItem, Select, SqlType, binop, call as func, case, case_on,
        cast, coalesce, ident, iif, in_list, is_not_null, is_null, neg, null, nullif, num, seq,
        text, when, window,
    },
    units::{DatetimeUnit, normalize_diff_unit, normalize_interval_unit, normalize_truncate_unit},
};

const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

const WEEKDAY_NAMES: [&str; 7] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

pub fn emit_fn_call(call: &Call) -> Result<ExprRef, Error> {
    match call.function {
        F::Max => extremum(call, "max", "MAX"),
        F::Min => extremum(call, "min", "MIN"),
        F::Round => round(call),
        F::Roundup => round_away(call, "CEIL"),
        F::Rounddown => round_away(call, "FLOOR"),
        F::Mod | F::Modulo => Ok(func(
            "mod",
            vec![collapsed(call, 0)?, common::nonzero(collapsed(call, 1)?)],
        )),

        F::Right => right(call),
        F::Substitute if call.has(3) => substitute_nth(call),
        F::Rept => rept(call),

        F::Now if call.target.is_select() => Ok(live_now()),
        F::Today if call.target.is_select() => {
            let zone = call.coercer().zone(None);
            Ok(func(
                "strftime",
                vec![
                    text(ISO_OUTPUT),
                    text("now"),
                    shift(zone),
                    text("start of day"),
                    text(minutes(-zone.offset_minutes)),
                ],
            ))
        }
        F::Year => Ok(part(call, "%Y")),
        F::Month => Ok(part(call, "%m")),
        F::Day => Ok(part(call, "%d")),
        F::Hour => Ok(part(call, "%H")),
        F::Minute => Ok(part(call, "%M")),
        F::Second => Ok(part(call, "%S")),
        F::WeekNum => Ok(week_num(call)),
        F::Weekday => {
            let w = part(call, "%w");
            Ok(if common::weekday_from_monday(call)? {
                binop(binop(w, BinaryOp::Add, num(6)), BinaryOp::Mod, num(7))
            } else {
                w
            })
        }

        F::DatetimeDiff => Ok(difference(
            (datetime(call, 0), call.zone(0)),
            (datetime(call, 1), call.zone(1)),
            &common::unit_arg(call, 2)?,
        )),
        F::FromNow | F::ToNow => Ok(func(
            "ABS",
            vec![difference(
                (now(call), call.coercer().zone(None)),
                (datetime(call, 0), call.zone(0)),
                &common::unit_arg(call, 1)?,
            )],
        )),
        F::Workday => workday(call),
        F::WorkdayDiff => Ok(workday_diff(call)),
        F::IsSame => relation(call, BinaryOp::Eq),
        F::IsAfter => relation(call, BinaryOp::Gt),
        F::IsBefore => relation(call, BinaryOp::Lt),
        F::DateAdd => date_add(call),
        F::Datestr => Ok(format(call, "YYYY-MM-DD")),
        F::Timestr => Ok(format(call, "HH:mm:ss")),
        F::DatetimeFormat => {
            let format_text = if call.has(1) {
                call.literal_text(1)?
            } else {
                "YYYY-MM-DD".into()
            };
            Ok(format(call, &format_text))
        }
        F::DatetimeParse => parse(call),

        F::ArrayUnique => array_op(call, ArrayOp::Unique),
        F::ArrayFlatten => array_op(call, ArrayOp::Flatten),
        F::ArrayCompact => array_op(call, ArrayOp::Compact),

        _ => common::emit_fn_call(call),
    }
}

fn minutes(offset: i32) -> String {
    format!("{offset:+} minutes")
}

/// Modifier that moves a UTC timestamp onto the zone's wall clock.
fn shift(zone: Zone) -> ExprRef {
    text(minutes(zone.offset_minutes))
}

fn strftime(format: &str, ts: ExprRef, zone: Zone) -> ExprRef {
    func("strftime", vec![text(format), ts, shift(zone)])
}

fn local(call: &Call, index: usize, format: &str) -> ExprRef {
    strftime(format, datetime(call, index), call.zone(index))
}

fn part(call: &Call, format: &str) -> ExprRef {
    cast(local(call, 0, format), SqlType::Integer)
}

/// ISO weekday (1 = Monday) from `%w` text.
fn iso_weekday(w: ExprRef) -> ExprRef {
    binop(
        binop(
            binop(cast(w, SqlType::Integer), BinaryOp::Add, num(6)),
            BinaryOp::Mod,
            num(7),
        ),
        BinaryOp::Add,
        num(1),
    )
}

fn live_now() -> ExprRef {
    func("strftime", vec![text(ISO_OUTPUT), text("now")])
}

fn now(call: &Call) -> ExprRef {
    if call.target.is_select() {
        live_now()
    } else {
        FormulaEmitter::frozen_literal(call.cx.now())
    }
}

// --- numeric -------------------------------------------------------------

/// Scalar `max`/`min` return NULL if any argument is NULL, so each NULL is
/// replaced by some other value first.
fn extremum(call: &Call, pick: &str, aggregate: &str) -> Result<ExprRef, Error> {
    let values = common::numeric_values(call, aggregate)?;
    Ok(match values.as_slice() {
        [] => null(),
        // a one-argument max() is the aggregate
        [only] => only.clone(),
        _ => func(
            pick,
            values
                .iter()
                .map(|v| {
                    let mut fallbacks = vec![v.clone()];
                    fallbacks.extend(values.iter().cloned());
                    coalesce(fallbacks)
                })
                .collect(),
        ),
    })
}

fn round(call: &Call) -> Result<ExprRef, Error> {
    let x = number(call, 0)?;
    let d = common::digits(call)?;
    let scale = func("POWER", vec![num("10.0"), neg(d.clone())]);
    Ok(case(
        vec![when(
            binop(d.clone(), BinaryOp::Ge, num(0)),
            func("ROUND", vec![x.clone(), d]),
        )],
        Some(binop(
            func("ROUND", vec![binop(x, BinaryOp::Div, scale.clone())]),
            BinaryOp::Mul,
            scale,
        )),
    ))
}

fn round_away(call: &Call, rounding: &str) -> Result<ExprRef, Error> {
    let x = number(call, 0)?;
    let scale = func("POWER", vec![num("10.0"), common::digits(call)?]);
    let magnitude = func(
        rounding,
        vec![binop(func("ABS", vec![x.clone()]), BinaryOp::Mul, scale.clone())],
    );
    Ok(binop(
        binop(func("SIGN", vec![x]), BinaryOp::Mul, magnitude),
        BinaryOp::Div,
        scale,
    ))
}

// --- text ----------------------------------------------------------------

fn right(call: &Call) -> Result<ExprRef, Error> {
    let t = common::text_arg(call, 0)?;
    let count = if call.has(1) { common::length(call, 1)? } else { num(1) };
    // SUBSTR(t, -0) would be the whole text
    Ok(iif(
        binop(count.clone(), BinaryOp::Eq, num(0)),
        func("SUBSTR", vec![t.clone(), num(1), num(0)]),
        func("SUBSTR", vec![t, neg(count)]),
    ))
}

/// Walks the occurrences of the old text with a recursive CTE of
/// `(occurrence, position)` rows and splices at the requested one.
fn substitute_nth(call: &Call) -> Result<ExprRef, Error> {
    let nth = common::occurrence(call, 3)?;
    call.coercer().require_subquery()?;
    let t = text_or_empty(call, 0)?;
    let old = text_or_empty(call, 1)?;
    let (k, p) = (ident(None, "__k"), ident(None, "__p"));

    let after = binop(p.clone(), BinaryOp::Add, func("LENGTH", vec![old.clone()]));
    let next = func(
        "INSTR",
        vec![func("SUBSTR", vec![t.clone(), after.clone()]), old.clone()],
    );
    let occurrences = Cte {
        name: "__occ".into(),
        columns: vec!["__k".into(), "__p".into()],
        anchor: Select::columns(vec![
            (num(1), None),
            (func("INSTR", vec![t.clone(), old.clone()]), None),
        ]),
        step: Select::columns(vec![
            (binop(k.clone(), BinaryOp::Add, num(1)), None),
            (
                iif(
                    binop(next.clone(), BinaryOp::Eq, num(0)),
                    num(0),
                    binop(binop(after.clone(), BinaryOp::Add, next), BinaryOp::Sub, num(1)),
                ),
                None,
            ),
        ])
        .from(FromItem::Table("__occ".into()))
        .filter(binop(
            binop(p.clone(), BinaryOp::Gt, num(0)),
            BinaryOp::And,
            binop(k.clone(), BinaryOp::Lt, num(nth)),
        )),
    };
    let spliced = Select::new(seq(
        BinaryOp::Concat,
        vec![
            func(
                "SUBSTR",
                vec![t.clone(), num(1), binop(p.clone(), BinaryOp::Sub, num(1))],
            ),
            text_or_empty(call, 2)?,
            func("SUBSTR", vec![t.clone(), after]),
        ],
    ))
    .with_recursive(occurrences)
    .from(FromItem::Table("__occ".into()))
    .filter(binop(
        binop(k, BinaryOp::Eq, num(nth)),
        BinaryOp::And,
        binop(p, BinaryOp::Gt, num(0)),
    ))
    .into_expr();
    Ok(iif(
        binop(old, BinaryOp::Eq, text("")),
        t.clone(),
        coalesce(vec![spliced, t]),
    ))
}

/// A run of `n` zeros from a zeroblob's hex quote, each replaced by the text.
fn rept(call: &Call) -> Result<ExprRef, Error> {
    let t = text_or_empty(call, 0)?;
    let cap = binop(
        num(MAX_REPEAT_LENGTH),
        BinaryOp::Div,
        call.target.greatest(vec![func("LENGTH", vec![t.clone()]), num(1)]),
    );
    let n = call.target.least(vec![common::length(call, 1)?, cap]);
    let zeros = func(
        "SUBSTR",
        vec![
            func(
                "QUOTE",
                vec![func(
                    "ZEROBLOB",
                    vec![binop(binop(n.clone(), BinaryOp::Add, num(1)), BinaryOp::Div, num(2))],
                )],
            ),
            num(3),
            n,
        ],
    );
    Ok(func("REPLACE", vec![zeros, text("0"), t]))
}

// --- datetime ------------------------------------------------------------

/// ISO week number: the week's Thursday decides the year, and its day of
/// year the week.
fn week_num(call: &Call) -> ExprRef {
    let thursday = func(
        "date",
        vec![
            datetime(call, 0),
            shift(call.zone(0)),
            text("-3 days"),
            text("weekday 4"),
        ],
    );
    let day_of_year = cast(func("strftime", vec![text("%j"), thursday]), SqlType::Integer);
    binop(
        binop(binop(day_of_year, BinaryOp::Sub, num(1)), BinaryOp::Div, num(7)),
        BinaryOp::Add,
        num(1),
    )
}

/// `start - end` in whole units, truncated toward zero.
fn difference(start: (ExprRef, Zone), end: (ExprRef, Zone), unit: &str) -> ExprRef {
    let unit = normalize_diff_unit(unit);
    let factor = unit.factor as i64;
    if let Some(millis) = unit.unit.fixed_millis() {
        let elapsed = binop(
            binop(
                func("julianday", vec![start.0]),
                BinaryOp::Sub,
                func("julianday", vec![end.0]),
            ),
            BinaryOp::Mul,
            num(86_400_000),
        );
        return cast(
            binop(
                cast(func("ROUND", vec![elapsed]), SqlType::Integer),
                BinaryOp::Div,
                num(millis * factor),
            ),
            SqlType::Double,
        );
    }

    let field = |side: &(ExprRef, Zone), format: &str| {
        cast(strftime(format, side.0.clone(), side.1), SqlType::Integer)
    };
    let months = binop(
        binop(
            binop(field(&start, "%Y"), BinaryOp::Sub, field(&end, "%Y")),
            BinaryOp::Mul,
            num(12),
        ),
        BinaryOp::Add,
        binop(field(&start, "%m"), BinaryOp::Sub, field(&end, "%m")),
    );
    // fixed-width text, so it orders like the instant within the month
    let into_month = |side: &(ExprRef, Zone)| strftime("%d%H%M%f", side.0.clone(), side.1);
    let whole = case(
        vec![
            when(
                binop(
                    binop(months.clone(), BinaryOp::Gt, num(0)),
                    BinaryOp::And,
                    binop(into_month(&start), BinaryOp::Lt, into_month(&end)),
                ),
                binop(months.clone(), BinaryOp::Sub, num(1)),
            ),
            when(
                binop(
                    binop(months.clone(), BinaryOp::Lt, num(0)),
                    BinaryOp::And,
                    binop(into_month(&start), BinaryOp::Gt, into_month(&end)),
                ),
                binop(months.clone(), BinaryOp::Add, num(1)),
            ),
        ],
        Some(months),
    );
    let scaled = if factor > 1 {
        binop(whole, BinaryOp::Div, num(factor))
    } else {
        whole
    };
    cast(scaled, SqlType::Double)
}

fn workday(call: &Call) -> Result<ExprRef, Error> {
    if call.has(2) {
        return Err(call.wrong_type(2, "holidays are not supported"));
    }
    let ts = datetime(call, 0);
    let dow = iso_weekday(strftime("%w", ts.clone(), call.zone(0)));
    let days = common::workday_shift(dow, common::workdays(call, 1)?);
    Ok(func(
        "strftime",
        vec![
            text(ISO_OUTPUT),
            ts,
            binop(cast(days, SqlType::Text), BinaryOp::Concat, text(" days")),
        ],
    ))
}

fn workday_diff(call: &Call) -> ExprRef {
    let day = |i: usize| func("date", vec![datetime(call, i), shift(call.zone(i))]);
    let (start, end) = (day(0), day(1));
    let lo = func("min", vec![start.clone(), end.clone()]);
    let hi = func("max", vec![start.clone(), end.clone()]);
    let span = binop(
        func("julianday", vec![hi]),
        BinaryOp::Sub,
        func("julianday", vec![lo.clone()]),
    );
    let days = binop(cast(span, SqlType::Integer), BinaryOp::Add, num(1));
    let dow = iso_weekday(func("strftime", vec![text("%w"), lo]));
    let count = common::business_days(call, dow, days);
    case(
        vec![when(
            binop(is_null(start.clone()), BinaryOp::Or, is_null(end.clone())),
            null(),
        )],
        Some(cast(
            common::signed(binop(end, BinaryOp::Lt, start), count),
            SqlType::Double,
        )),
    )
}

/// Text that orders and compares like the local timestamp truncated to
/// `unit`.
fn truncation_key(ts: ExprRef, zone: Zone, unit: DatetimeUnit) -> ExprRef {
    use DatetimeUnit as U;
    let f = |format: &str| strftime(format, ts.clone(), zone);
    match unit {
        U::Year => f("%Y"),
        U::Quarter => seq(
            BinaryOp::Concat,
            vec![
                f("%Y"),
                text("-"),
                binop(
                    binop(cast(f("%m"), SqlType::Integer), BinaryOp::Add, num(2)),
                    BinaryOp::Div,
                    num(3),
                ),
            ],
        ),
        U::Month => f("%Y-%m"),
        // Monday on or before the day
        U::Week => func(
            "date",
            vec![ts.clone(), shift(zone), text("-6 days"), text("weekday 1")],
        ),
        U::Day => f("%Y-%m-%d"),
        U::Hour => f("%Y-%m-%dT%H"),
        U::Minute => f("%Y-%m-%dT%H:%M"),
        U::Second => f("%Y-%m-%dT%H:%M:%S"),
        U::Millisecond => f("%Y-%m-%dT%H:%M:%f"),
    }
}

fn relation(call: &Call, op: BinaryOp) -> Result<ExprRef, Error> {
    if !call.has(2) {
        return Ok(binop(datetime(call, 0), op, datetime(call, 1)));
    }
    let unit = normalize_truncate_unit(&call.literal_text(2)?).unit;
    let key = |i: usize| truncation_key(datetime(call, i), call.zone(i), unit);
    Ok(binop(key(0), op, key(1)))
}

fn date_add(call: &Call) -> Result<ExprRef, Error> {
    let unit = normalize_interval_unit(&call.literal_text(2)?);
    let mut amount = collapsed(call, 1)?;
    if unit.factor != 1.0 {
        amount = binop(amount, BinaryOp::Mul, num(unit.factor));
    }
    let ts = datetime(call, 0);
    let zone = call.zone(0);
    Ok(match unit.unit.fixed_millis() {
        Some(millis) => {
            let seconds = binop(amount, BinaryOp::Mul, num(millis as f64 / 1000.0));
            iif(
                binop(
                    func("ABS", vec![seconds.clone()]),
                    BinaryOp::Gt,
                    num(common::MAX_SHIFT_SECONDS),
                ),
                null(),
                func(
                    "strftime",
                    vec![
                        text(ISO_OUTPUT),
                        ts,
                        func("printf", vec![text("%.3f seconds"), seconds]),
                    ],
                ),
            )
        }
        None => {
            let months = match unit.unit {
                DatetimeUnit::Year => binop(amount, BinaryOp::Mul, num(12)),
                _ => amount,
            };
            // months are added on the wall clock; day overflow rolls into
            // the next month
            iif(
                binop(
                    func("ABS", vec![months.clone()]),
                    BinaryOp::Gt,
                    num(common::MAX_SHIFT_MONTHS),
                ),
                null(),
                func(
                    "strftime",
                    vec![
                        text(ISO_OUTPUT),
                        ts,
                        shift(zone),
                        func(
                            "printf",
                            vec![text("%d months"), cast(months, SqlType::Integer)],
                        ),
                        text(minutes(-zone.offset_minutes)),
                    ],
                ),
            )
        }
    })
}

/// Assembles the display format token by token from `strftime` pieces.
fn format(call: &Call, format: &str) -> ExprRef {
    let ts = datetime(call, 0);
    let zone = call.zone(0);
    let f = |spec: &str| strftime(spec, ts.clone(), zone);
    let unpadded = |spec: &str| cast(cast(f(spec), SqlType::Integer), SqlType::Text);
    let hour = || cast(f("%H"), SqlType::Integer);
    let hour12 = || {
        binop(
            binop(binop(hour(), BinaryOp::Add, num(11)), BinaryOp::Mod, num(12)),
            BinaryOp::Add,
            num(1),
        )
    };
    let month_name = |abbreviated: bool| {
        let branches = MONTH_NAMES
            .iter()
            .enumerate()
            .map(|(i, &name)| {
                let name = if abbreviated { &name[..3] } else { name };
                when(text(format!("{:02}", i + 1)), text(name))
            })
            .collect();
        case_on(f("%m"), branches, None)
    };
    let weekday_name = |abbreviated: bool| {
        let branches = WEEKDAY_NAMES
            .iter()
            .enumerate()
            .map(|(i, &name)| {
                let name = if abbreviated { &name[..3] } else { name };
                when(text(i.to_string()), text(name))
            })
            .collect();
        case_on(f("%w"), branches, None)
    };
    let meridiem = |am: &str, pm: &str| iif(binop(hour(), BinaryOp::Lt, num(12)), text(am), text(pm));

    let pieces: Vec<ExprRef> = display_tokens(format)
        .iter()
        .map(|token| match token {
            DisplayToken::Literal(s) => text(s.as_str()),
            DisplayToken::Year4 => f("%Y"),
            DisplayToken::Year2 => func("substr", vec![f("%Y"), num(3), num(2)]),
            DisplayToken::MonthName => month_name(false),
            DisplayToken::MonthAbbr => month_name(true),
            DisplayToken::Month2 => f("%m"),
            DisplayToken::Month => unpadded("%m"),
            DisplayToken::Day2 => f("%d"),
            DisplayToken::Day => unpadded("%d"),
            DisplayToken::WeekdayName => weekday_name(false),
            DisplayToken::WeekdayAbbr => weekday_name(true),
            DisplayToken::Hour24Padded => f("%H"),
            DisplayToken::Hour24 => unpadded("%H"),
            DisplayToken::Hour12Padded => func("printf", vec![text("%02d"), hour12()]),
            DisplayToken::Hour12 => cast(hour12(), SqlType::Text),
            DisplayToken::Minute2 => f("%M"),
            DisplayToken::Minute => unpadded("%M"),
            DisplayToken::Second2 => f("%S"),
            DisplayToken::Second => unpadded("%S"),
            DisplayToken::Millisecond => func("substr", vec![f("%f"), num(4), num(3)]),
            DisplayToken::MeridiemUpper => meridiem("AM", "PM"),
            DisplayToken::MeridiemLower => meridiem("am", "pm"),
        })
        .collect();
    let formatted = if pieces.is_empty() {
        text("")
    } else {
        seq(BinaryOp::Concat, pieces)
    };
    // printf and the name tables would turn NULL into text
    iif(is_null(ts), null(), formatted)
}

/// Only fixed-width numeric formats can be parsed: the text is checked
/// against the layout's GLOB, rebuilt as ISO text and parsed as such.
fn parse(call: &Call) -> Result<ExprRef, Error> {
    if !call.has(1) {
        return Ok(datetime(call, 0));
    }
    let layout = fixed_layout(&call.literal_text(1)?)?;
    let t = common::text_arg(call, 0)?;
    let mut checks = vec![glob(t.clone(), &layout.glob)];
    if let Some(offset) = layout.offset_of(LayoutField::Year) {
        checks.push(binop(
            func("SUBSTR", vec![t.clone(), num(offset), num(4)]),
            BinaryOp::Ne,
            text("0000"),
        ));
    }
    let iso = common::reassemble_iso(t, &layout);
    Ok(case(
        vec![when(
            seq(BinaryOp::And, checks),
            call.coercer().primitives().parse_iso(iso, call.zone(0)),
        )],
        None,
    ))
}

// --- arrays --------------------------------------------------------------

const ELEMENT_COLUMNS: [&str; 4] = ["__s", "__n", "__m", "__j"];

/// JSON text of one `json_each` row's value.
fn element_json(source: &str) -> ExprRef {
    let value = ident(Some(source), "value");
    case_on(
        ident(Some(source), "type"),
        vec![
            when(text("true"), text("true")),
            when(text("false"), text("false")),
            when(text("null"), text("null")),
            when(text("object"), value.clone()),
            when(text("array"), value.clone()),
        ],
        Some(func("json_quote", vec![value])),
    )
}

fn as_json_array(c: &Coercer, op: &Operand) -> Result<ExprRef, Error> {
    Ok(match op.kind {
        OperandKind::Json => op.expr(),
        OperandKind::Number => func("json_array", vec![c.to_number(op)?]),
        OperandKind::Boolean => func(
            "json_array",
            vec![func(
                "json",
                vec![iif(c.to_bool(op)?, text("true"), text("false"))],
            )],
        ),
        _ => func("json_array", vec![c.to_text(op)?]),
    })
}

/// Element rows of every argument tagged with argument index, position and
/// nested position, collected back into a JSON array in that order.
fn array_op(call: &Call, op: ArrayOp) -> Result<ExprRef, Error> {
    let c = call.coercer();
    c.require_subquery()?;
    let col = |name: &str| ident(None, name);
    let alias = |name: &str| Some(name.to_string());

    let mut members = Vec::new();
    for (i, operand) in call.operands().iter().enumerate() {
        if operand.is_blank() {
            continue;
        }
        let present = is_not_null(operand.expr());
        let source = each(as_json_array(&c, operand)?);
        let member = match op {
            ArrayOp::Flatten => {
                let nested = iif(
                    binop(column("type"), BinaryOp::Eq, text("array")),
                    column("value"),
                    func("json_array", vec![func("json", vec![element_json("__el")])]),
                );
                Select::columns(vec![
                    (num(i), alias("__s")),
                    (column("key"), alias("__n")),
                    (ident(Some("__in"), "key"), alias("__m")),
                    (element_json("__in"), alias("__j")),
                ])
                .from(source)
                .left_join(FromItem::table_function(
                    func("json_each", vec![nested]),
                    "__in",
                    &[],
                ))
                .filter(binop(
                    present,
                    BinaryOp::And,
                    is_not_null(ident(Some("__in"), "key")),
                ))
            }
            ArrayOp::Unique | ArrayOp::Compact => Select::columns(vec![
                (num(i), alias("__s")),
                (column("key"), alias("__n")),
                (num(0), alias("__m")),
                (element_json("__el"), alias("__j")),
            ])
            .from(source)
            .filter(present),
        };
        members.push(member);
    }
    if members.is_empty() {
        return Ok(null());
    }

    let all = FromItem::union_all(members, "__all", &ELEMENT_COLUMNS);
    let order = vec![col("__s"), col("__n"), col("__m")];
    let values = Select::columns(vec![(col("__j"), alias("__j"))]);
    let ordered = match op {
        ArrayOp::Unique => {
            let mut columns: Vec<_> = ELEMENT_COLUMNS
                .iter()
                .map(|name| (col(name), alias(name)))
                .collect();
            columns.push((
                window("row_number", vec![], vec![col("__j")], order.clone()),
                alias("__r"),
            ));
            values
                .from(FromItem::union_all(
                    vec![Select::columns(columns).from(all)],
                    "__ranked",
                    &["__s", "__n", "__m", "__j", "__r"],
                ))
                .filter(binop(col("__r"), BinaryOp::Eq, num(1)))
        }
        ArrayOp::Compact => values.from(all).filter(in_list(
            col("__j"),
            vec![text("null"), text("\"\"")],
            true,
        )),
        ArrayOp::Flatten => values.from(all),
    }
    .order_by(order);

    let collected = func("json_group_array", vec![func("json", vec![col("__j")])]);
    Ok(Select::new(nullif(collected, text("[]")))
        .from(FromItem::union_all(vec![ordered], "__ord", &["__j"]))
        .into_expr())
}

#[cfg(test)]
mod tests {
    use crate::{
        context::{ConversionContext, FieldCatalog},
        emit::{Dialect, EmitContext, Error, FormulaEmitter},
        metadata::{FieldDescriptor, StorageType},
    };
    use chrono::{TimeZone, Utc};
    use rusqlite::{Connection, types::Value};

    fn cx() -> ConversionContext {
        ConversionContext::new(FieldCatalog::new(vec![
            FieldDescriptor::new("fldN", "n", StorageType::Real),
            FieldDescriptor::new("fldT", "t", StorageType::Text),
            FieldDescriptor::new("fldD", "d", StorageType::DateTime),
            FieldDescriptor::new("fldJ", "tags", StorageType::Json).multiple(),
        ]))
        .with_timezone("Asia/Tokyo")
        .unwrap()
        .with_now(Utc.with_ymd_and_hms(2024, 3, 5, 10, 30, 0).unwrap())
    }

    fn render(context: EmitContext, name: &str, args: &[&str]) -> Result<String, Error> {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        FormulaEmitter::new(Dialect::Sqlite, context).render(&cx(), name, &args, &[])
    }

    /// One record: `n` is NULL, `d` is 2024-03-05 23:07:09.045 in Tokyo.
    fn record() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            r#"CREATE TABLE rec ("n" REAL, "t" TEXT, "d" TEXT, "tags" TEXT);
               INSERT INTO rec VALUES (NULL, 'hello', '2024-03-05T14:07:09.045Z',
                 '["b","a","b",["c","a"],null,""]');"#,
        )
        .unwrap();
        conn
    }

    fn eval(conn: &Connection, name: &str, args: &[&str]) -> Value {
        let sql = render(EmitContext::Select, name, args).unwrap();
        conn.query_row(&format!("SELECT {sql} FROM rec"), [], |row| row.get(0))
            .unwrap_or_else(|e| panic!("{e}: {sql}"))
    }

    fn text(s: &str) -> Value {
        Value::Text(s.into())
    }

    #[test]
    fn date_parts_use_the_local_wall_clock() {
        let conn = record();
        assert_eq!(eval(&conn, "YEAR", &["\"d\""]), Value::Integer(2024));
        assert_eq!(eval(&conn, "DAY", &["\"d\""]), Value::Integer(5));
        assert_eq!(eval(&conn, "HOUR", &["\"d\""]), Value::Integer(23));
        assert_eq!(eval(&conn, "SECOND", &["\"d\""]), Value::Integer(9));
        assert_eq!(eval(&conn, "WEEKDAY", &["\"d\""]), Value::Integer(2));
        assert_eq!(eval(&conn, "WEEKDAY", &["\"d\"", "'Monday'"]), Value::Integer(1));
        assert_eq!(eval(&conn, "WEEK_NUM", &["\"d\""]), Value::Integer(10));
        assert_eq!(eval(&conn, "YEAR", &["''"]), Value::Null);
    }

    #[test]
    fn differences_truncate_to_whole_units() {
        let conn = record();
        let diff = |unit: &str| {
            eval(
                &conn,
                "DATETIME_DIFF",
                &["'2024-03-05T00:00:00Z'", "'2024-01-31T00:00:00Z'", unit],
            )
        };
        assert_eq!(diff("'hours'"), Value::Real(816.0));
        assert_eq!(diff("'weeks'"), Value::Real(4.0));
        // Jan 31 to Mar 5 is one whole month, not two
        assert_eq!(diff("'month'"), Value::Real(1.0));
        assert_eq!(diff("'quarter'"), Value::Real(0.0));
        assert_eq!(
            eval(
                &conn,
                "DATETIME_DIFF",
                &["'2024-01-31T00:00:00Z'", "'2024-03-05T00:00:00Z'", "'M'"],
            ),
            Value::Real(-1.0)
        );
    }

    #[test]
    fn from_now_and_to_now_match() {
        let from = render(EmitContext::Select, "FROM_NOW", &["\"d\"", "'days'"]).unwrap();
        let to = render(EmitContext::Select, "TO_NOW", &["\"d\"", "'days'"]).unwrap();
        assert_eq!(from, to);
        let conn = record();
        for date in ["'2030-01-01T00:00:00Z'", "'2001-01-01T00:00:00Z'"] {
            match eval(&conn, "FROM_NOW", &[date, "'days'"]) {
                Value::Real(days) => assert!(days > 365.0, "{date}: {days}"),
                Value::Integer(days) => assert!(days > 365, "{date}: {days}"),
                other => panic!("{date}: {other:?}"),
            }
        }
        let frozen = render(EmitContext::GeneratedColumn, "FROM_NOW", &["\"d\""]).unwrap();
        assert!(frozen.contains("julianday('2024-03-05T10:30:00.000Z')"), "{frozen}");
    }

    #[test]
    fn workdays_skip_weekends() {
        let conn = record();
        // Friday noon in Tokyo
        assert_eq!(
            eval(&conn, "WORKDAY", &["'2024-03-08T03:00:00Z'", "1"]),
            text("2024-03-11T03:00:00.000Z")
        );
        assert_eq!(
            eval(&conn, "WORKDAY_DIFF", &["'2024-03-04'", "'2024-03-15'"]),
            Value::Real(10.0)
        );
        assert_eq!(
            eval(&conn, "WORKDAY_DIFF", &["'2024-03-15'", "'2024-03-04'"]),
            Value::Real(-10.0)
        );
        assert_eq!(eval(&conn, "WORKDAY_DIFF", &["''", "'2024-03-04'"]), Value::Null);
    }

    #[test]
    fn same_period_in_the_local_zone() {
        let conn = record();
        // 16:00Z on the 4th is already the 5th in Tokyo
        let same = |unit: &str| {
            eval(
                &conn,
                "IS_SAME",
                &["'2024-03-04T16:00:00Z'", "'2024-03-05T10:00:00Z'", unit],
            )
        };
        assert_eq!(same("'day'"), Value::Integer(1));
        assert_eq!(same("'week'"), Value::Integer(1));
        assert_eq!(same("'hour'"), Value::Integer(0));
        assert_eq!(
            eval(
                &conn,
                "IS_SAME",
                &["'2024-03-03T16:00:00Z'", "'2024-03-03T14:00:00Z'", "'week'"],
            ),
            Value::Integer(0)
        );
        assert_eq!(
            eval(
                &conn,
                "IS_BEFORE",
                &["'2024-03-04T16:00:00Z'", "'2024-03-05T10:00:00Z'"],
            ),
            Value::Integer(1)
        );
    }

    #[test]
    fn date_add_by_calendar_and_fixed_units() {
        let conn = record();
        let add = |amount: &str, unit: &str| {
            eval(&conn, "DATE_ADD", &["'2024-01-15T00:00:00Z'", amount, unit])
        };
        assert_eq!(add("1", "'month'"), text("2024-02-15T00:00:00.000Z"));
        assert_eq!(add("1", "'quarter'"), text("2024-04-15T00:00:00.000Z"));
        assert_eq!(add("2", "'hours'"), text("2024-01-15T02:00:00.000Z"));
        assert_eq!(add("-1", "'weeks'"), text("2024-01-08T00:00:00.000Z"));
        assert_eq!(add("1000000000000", "'days'"), Value::Null);
    }

    #[test]
    fn display_formats() {
        let conn = record();
        assert_eq!(eval(&conn, "DATESTR", &["\"d\""]), text("2024-03-05"));
        assert_eq!(eval(&conn, "TIMESTR", &["\"d\""]), text("23:07:09"));
        assert_eq!(
            eval(&conn, "DATETIME_FORMAT", &["\"d\"", "'dddd, MMMM D YYYY h:mm A'"]),
            text("Tuesday, March 5 2024 11:07 PM")
        );
        assert_eq!(
            eval(&conn, "DATETIME_FORMAT", &["\"d\"", "'YY-MM-DD [at] HH:mm:ss.SSS ddd MMM'"]),
            text("24-03-05 at 23:07:09.045 Tue Mar")
        );
        assert_eq!(eval(&conn, "DATESTR", &["\"t\""]), Value::Null);
    }

    #[test]
    fn parses_fixed_width_formats_only() {
        let conn = record();
        assert_eq!(
            eval(&conn, "DATETIME_PARSE", &["'05/03/2024 10:30'", "'DD/MM/YYYY HH24:MI'"]),
            text("2024-03-05T01:30:00.000Z")
        );
        assert_eq!(
            eval(&conn, "DATETIME_PARSE", &["'31/02/2024 10:30'", "'DD/MM/YYYY HH24:MI'"]),
            Value::Null
        );
        assert_eq!(
            eval(&conn, "DATETIME_PARSE", &["'5/3/2024 10:30'", "'DD/MM/YYYY HH24:MI'"]),
            Value::Null
        );
        assert!(matches!(
            render(EmitContext::Select, "DATETIME_PARSE", &["\"t\"", "'DD Mon YYYY'"]),
            Err(Error::InvalidFormat { .. })
        ));
    }

    #[test]
    fn extremes_skip_blanks() {
        let conn = record();
        assert_eq!(eval(&conn, "MAX", &["\"n\"", "3"]), Value::Real(3.0));
        assert_eq!(eval(&conn, "MIN", &["\"n\"", "3", "1"]), Value::Real(1.0));
        assert_eq!(eval(&conn, "MAX", &["\"n\""]), Value::Null);
        assert_eq!(eval(&conn, "MAX", &["''"]), Value::Null);
    }

    #[test]
    fn text_helpers() {
        let conn = record();
        assert_eq!(eval(&conn, "RIGHT", &["\"t\"", "2"]), text("lo"));
        assert_eq!(eval(&conn, "RIGHT", &["\"t\"", "0"]), text(""));
        assert_eq!(eval(&conn, "REPT", &["'ab'", "3"]), text("ababab"));
        assert_eq!(eval(&conn, "REPT", &["'ab'", "0"]), text(""));
        assert_eq!(
            eval(&conn, "SUBSTITUTE", &["'a-b-c'", "'-'", "'+'", "2"]),
            text("a-b+c")
        );
        assert_eq!(
            eval(&conn, "SUBSTITUTE", &["'a-b-c'", "'-'", "'+'", "5"]),
            text("a-b-c")
        );
        assert_eq!(
            render(EmitContext::GeneratedColumn, "SUBSTITUTE", &["\"t\"", "'l'", "'L'", "1"]),
            Err(Error::RequiresSubquery {
                function: "SUBSTITUTE".into()
            })
        );
    }

    #[test]
    fn array_functions() {
        let conn = record();
        assert_eq!(
            eval(&conn, "ARRAY_UNIQUE", &["\"tags\""]),
            text(r#"["b","a",["c","a"],null,""]"#)
        );
        assert_eq!(
            eval(&conn, "ARRAY_FLATTEN", &["\"tags\"", "'z'"]),
            text(r#"["b","a","b","c","a",null,"","z"]"#)
        );
        assert_eq!(
            eval(&conn, "ARRAY_COMPACT", &["\"tags\""]),
            text(r#"["b","a","b",["c","a"]]"#)
        );
    }

    #[test]
    fn live_clock_and_missing_functions() {
        assert_eq!(
            render(EmitContext::Select, "NOW", &[]).unwrap(),
            "strftime('%Y-%m-%dT%H:%M:%fZ', 'now')"
        );
        let today = render(EmitContext::Select, "TODAY", &[]).unwrap();
        assert!(today.contains("'+540 minutes', 'start of day', '-540 minutes'"), "{today}");
        assert!(matches!(
            render(EmitContext::Select, "REGEXP_REPLACE", &["\"t\"", "'a'", "'b'"]),
            Err(Error::UnsupportedFunction(_))
        ));
        assert!(matches!(
            render(EmitContext::Select, "ENCODE_URL_COMPONENT", &["\"t\""]),
            Err(Error::UnsupportedFunction(_))
        ));
    }
}
