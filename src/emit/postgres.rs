//! Postgres spellings. Datetimes are `TIMESTAMPTZ`; calendar work is done on
//! the `timestamp` a value reads as `AT TIME ZONE` its zone, which keeps
//! every expression immutable.

use super::{
    Call, Error,
    common::{self, ArrayOp, MAX_REPEAT_LENGTH, collapsed, datetime, number, text_or_empty},
};
use crate::{
    coercion::{
        Coercer, Operand, OperandKind, Zone,
        postgres::{as_array, jsonb_typeof, last_day, regex_match},
    },
    functions::FormulaFunction as F,
    pattern::{LayoutField, compile_guard, display_tokens, fixed_layout, to_char_template},
    sql::{
        BinaryOp, ExprRef, Expression, FromItem, Select, SqlType, aggregate, at_time_zone, binop,
        call as func, case, cast, coalesce, expr_ref, extract, ident, iif, in_list, is_not_null,
        is_null, null, num, seq, subscript, text, when, window,
    },
    units::{DatetimeUnit, normalize_diff_unit, normalize_interval_unit, normalize_truncate_unit},
};

// encodeURIComponent leaves these alone
const URL_UNRESERVED: &str = r"^[A-Za-z0-9_.!~*'()-]$";

pub fn emit_fn_call(call: &Call) -> Result<ExprRef, Error> {
    match call.function {
        F::Max => extremum(call, "GREATEST", "MAX"),
        F::Min => extremum(call, "LEAST", "MIN"),
        F::Round => Ok(cast(
            func("ROUND", vec![cast(number(call, 0)?, SqlType::Numeric), common::digits(call)?]),
            SqlType::Double,
        )),
        F::Roundup => round_away(call, "CEIL"),
        F::Rounddown => round_away(call, "FLOOR"),
        F::Mod | F::Modulo => Ok(cast(
            func(
                "MOD",
                vec![
                    cast(collapsed(call, 0)?, SqlType::Numeric),
                    common::nonzero(cast(collapsed(call, 1)?, SqlType::Numeric)),
                ],
            ),
            SqlType::Double,
        )),

        F::Right => {
            let count = if call.has(1) { common::length(call, 1)? } else { num(1) };
            Ok(func("RIGHT", vec![common::text_arg(call, 0)?, count]))
        }
        F::RegexpReplace => regexp_replace(call),
        F::Substitute if call.has(3) => substitute_nth(call),
        F::Rept => rept(call),
        F::EncodeUrlComponent => encode_url_component(call),

        F::Error if call.target.is_select() => raise(call),

        F::Now if call.target.is_select() => Ok(live_now()),
        F::Today if call.target.is_select() => {
            let zone = text(call.cx.zone_for(None).name());
            Ok(at_time_zone(
                func("date_trunc", vec![text("day"), at_time_zone(live_now(), zone.clone())]),
                zone,
            ))
        }
        F::Year => Ok(part(call, "YEAR")),
        F::Month => Ok(part(call, "MONTH")),
        F::Day => Ok(part(call, "DAY")),
        F::Hour => Ok(part(call, "HOUR")),
        F::Minute => Ok(part(call, "MINUTE")),
        F::Second => Ok(cast(
            func("FLOOR", vec![extract("SECOND", local(call, 0))]),
            SqlType::Integer,
        )),
        F::WeekNum => Ok(part(call, "WEEK")),
        F::Weekday => Ok(if common::weekday_from_monday(call)? {
            binop(part(call, "ISODOW"), BinaryOp::Sub, num(1))
        } else {
            part(call, "DOW")
        }),

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

fn live_now() -> ExprRef {
    func("NOW", vec![])
}

fn now(call: &Call) -> ExprRef {
    if call.target.is_select() {
        live_now()
    } else {
        super::FormulaEmitter::frozen_literal(call.cx.now())
    }
}

/// Wall-clock `timestamp` of a datetime argument in its zone.
fn local(call: &Call, index: usize) -> ExprRef {
    at_time_zone(datetime(call, index), text(call.zone(index).name()))
}

fn part(call: &Call, field: &'static str) -> ExprRef {
    cast(extract(field, local(call, 0)), SqlType::Integer)
}

// --- numeric -------------------------------------------------------------

/// GREATEST and LEAST skip NULLs, so blanks drop out on their own.
fn extremum(call: &Call, pick: &str, aggregate: &str) -> Result<ExprRef, Error> {
    let values = common::numeric_values(call, aggregate)?;
    if values.is_empty() {
        return Ok(null());
    }
    Ok(func(pick, values))
}

fn round_away(call: &Call, rounding: &str) -> Result<ExprRef, Error> {
    let n = cast(number(call, 0)?, SqlType::Numeric);
    let scale = func(
        "POWER",
        vec![cast(num(10), SqlType::Numeric), common::digits(call)?],
    );
    let magnitude = func(
        rounding,
        vec![binop(func("ABS", vec![n.clone()]), BinaryOp::Mul, scale.clone())],
    );
    Ok(cast(
        binop(
            binop(func("SIGN", vec![n]), BinaryOp::Mul, magnitude),
            BinaryOp::Div,
            scale,
        ),
        SqlType::Double,
    ))
}

// --- text ----------------------------------------------------------------

fn regexp_replace(call: &Call) -> Result<ExprRef, Error> {
    let pattern = call.literal_text(1)?;
    regex::Regex::new(&pattern).map_err(|e| Error::InvalidFormat {
        format: pattern.clone(),
        reason: e.to_string(),
    })?;
    Ok(func(
        "REGEXP_REPLACE",
        vec![
            text_or_empty(call, 0)?,
            text(pattern),
            text_or_empty(call, 2)?,
            text("g"),
        ],
    ))
}

/// SUBSTITUTE with an occurrence index: split on the old text and rejoin
/// around the chosen gap.
fn substitute_nth(call: &Call) -> Result<ExprRef, Error> {
    let nth = common::occurrence(call, 3)?;
    let t = text_or_empty(call, 0)?;
    let old = text_or_empty(call, 1)?;
    let parts = func("string_to_array", vec![t.clone(), old.clone()]);
    let count = coalesce(vec![func("array_length", vec![parts.clone(), num(1)]), num(0)]);
    let slice = |lower: Option<ExprRef>, upper: Option<ExprRef>| {
        expr_ref(Expression::Slice {
            array: parts.clone(),
            lower,
            upper,
        })
    };
    Ok(case(
        vec![when(
            seq(
                BinaryOp::Or,
                vec![
                    binop(old.clone(), BinaryOp::Eq, text("")),
                    binop(count, BinaryOp::Le, num(nth)),
                ],
            ),
            t,
        )],
        Some(seq(
            BinaryOp::Concat,
            vec![
                func("array_to_string", vec![slice(Some(num(1)), Some(num(nth))), old.clone()]),
                text_or_empty(call, 2)?,
                func("array_to_string", vec![slice(Some(num(nth + 1)), None), old]),
            ],
        )),
    ))
}

fn rept(call: &Call) -> Result<ExprRef, Error> {
    let t = text_or_empty(call, 0)?;
    let count = common::length(call, 1)?;
    let cap = binop(
        num(MAX_REPEAT_LENGTH),
        BinaryOp::Div,
        func("GREATEST", vec![func("LENGTH", vec![t.clone()]), num(1)]),
    );
    Ok(func("REPEAT", vec![t, func("LEAST", vec![count, cap])]))
}

fn encode_url_component(call: &Call) -> Result<ExprRef, Error> {
    call.coercer().require_subquery()?;
    let c = ident(None, "__c");
    let hex = func(
        "encode",
        vec![func("convert_to", vec![c.clone(), text("UTF8")]), text("hex")],
    );
    let escaped = func(
        "upper",
        vec![func(
            "regexp_replace",
            vec![hex, text("(..)"), text(r"%\1"), text("g")],
        )],
    );
    let piece = iif(regex_match(c.clone(), URL_UNRESERVED), c, escaped);
    let joined = Select::new(aggregate(
        "string_agg",
        vec![piece, text("")],
        vec![ident(None, "__n")],
    ))
    .from(FromItem::with_ordinality(
        func("regexp_split_to_table", vec![text_or_empty(call, 0)?, text("")]),
        "__el",
        &["__c", "__n"],
    ))
    .into_expr();
    Ok(coalesce(vec![joined, text("")]))
}

// --- logical -------------------------------------------------------------

/// Fails the row's evaluation with the message. `concat` is only stable, so
/// the planner never folds the cast.
fn raise(call: &Call) -> Result<ExprRef, Error> {
    let message = if call.has(0) { text_or_empty(call, 0)? } else { text("") };
    Ok(cast(
        cast(
            func("concat", vec![text("#ERROR: "), message]),
            SqlType::Numeric,
        ),
        SqlType::Text,
    ))
}

// --- datetime ------------------------------------------------------------

/// `start - end` in whole units. Calendar units count whole months elapsed,
/// so Jan 31 to Feb 28 is not yet a month.
fn difference(start: (ExprRef, Zone), end: (ExprRef, Zone), unit: &str) -> ExprRef {
    let unit = normalize_diff_unit(unit);
    let factor = unit.factor as i64;
    if let Some(millis) = unit.unit.fixed_millis() {
        let elapsed = extract("EPOCH", binop(start.0, BinaryOp::Sub, end.0));
        return cast(
            func(
                "TRUNC",
                vec![binop(
                    binop(elapsed, BinaryOp::Mul, num(1000)),
                    BinaryOp::Div,
                    num(millis * factor),
                )],
            ),
            SqlType::Double,
        );
    }

    let ls = at_time_zone(start.0, text(start.1.name()));
    let le = at_time_zone(end.0, text(end.1.name()));
    let field_diff = |field: &'static str| {
        binop(extract(field, ls.clone()), BinaryOp::Sub, extract(field, le.clone()))
    };
    let months = cast(
        binop(
            binop(field_diff("YEAR"), BinaryOp::Mul, num(12)),
            BinaryOp::Add,
            field_diff("MONTH"),
        ),
        SqlType::Integer,
    );
    let into_month = |l: ExprRef| {
        extract(
            "EPOCH",
            binop(l.clone(), BinaryOp::Sub, func("date_trunc", vec![text("month"), l])),
        )
    };
    let whole = case(
        vec![
            when(
                binop(
                    binop(months.clone(), BinaryOp::Gt, num(0)),
                    BinaryOp::And,
                    binop(into_month(ls.clone()), BinaryOp::Lt, into_month(le.clone())),
                ),
                binop(months.clone(), BinaryOp::Sub, num(1)),
            ),
            when(
                binop(
                    binop(months.clone(), BinaryOp::Lt, num(0)),
                    BinaryOp::And,
                    binop(into_month(ls), BinaryOp::Gt, into_month(le)),
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
    let zone = text(call.zone(0).name());
    let l = local(call, 0);
    let dow = cast(extract("ISODOW", l.clone()), SqlType::Integer);
    let shift = common::workday_shift(dow, common::workdays(call, 1)?);
    Ok(at_time_zone(
        binop(
            l,
            BinaryOp::Add,
            func("make_interval", vec![num(0), num(0), num(0), shift]),
        ),
        zone,
    ))
}

fn workday_diff(call: &Call) -> ExprRef {
    let day = |i: usize| cast(local(call, i), SqlType::Date);
    let (start, end) = (day(0), day(1));
    let lo = func("LEAST", vec![start.clone(), end.clone()]);
    let hi = func("GREATEST", vec![start.clone(), end.clone()]);
    let days = binop(binop(hi, BinaryOp::Sub, lo.clone()), BinaryOp::Add, num(1));
    let dow = cast(extract("ISODOW", lo), SqlType::Integer);
    let count = common::business_days(call, dow, days);
    // LEAST and GREATEST would skip a NULL side
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

fn relation(call: &Call, op: BinaryOp) -> Result<ExprRef, Error> {
    if !call.has(2) {
        return Ok(binop(datetime(call, 0), op, datetime(call, 1)));
    }
    let unit = normalize_truncate_unit(&call.literal_text(2)?);
    let truncated = |i: usize| {
        func(
            "date_trunc",
            vec![text(unit.unit.postgres_field()), local(call, i)],
        )
    };
    Ok(binop(truncated(0), op, truncated(1)))
}

fn date_add(call: &Call) -> Result<ExprRef, Error> {
    let unit = normalize_interval_unit(&call.literal_text(2)?);
    let mut amount = collapsed(call, 1)?;
    if unit.factor != 1.0 {
        amount = binop(amount, BinaryOp::Mul, num(unit.factor));
    }
    let interval = match unit.unit.fixed_millis() {
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
                    "make_interval",
                    vec![num(0), num(0), num(0), num(0), num(0), num(0), seconds],
                ),
            )
        }
        None => {
            let months = match unit.unit {
                DatetimeUnit::Year => binop(amount, BinaryOp::Mul, num(12)),
                _ => amount,
            };
            iif(
                binop(
                    func("ABS", vec![months.clone()]),
                    BinaryOp::Gt,
                    num(common::MAX_SHIFT_MONTHS),
                ),
                null(),
                func(
                    "make_interval",
                    vec![
                        num(0),
                        cast(func("TRUNC", vec![months]), SqlType::Integer),
                    ],
                ),
            )
        }
    };
    Ok(at_time_zone(
        binop(local(call, 0), BinaryOp::Add, interval),
        text(call.zone(0).name()),
    ))
}

fn format(call: &Call, format: &str) -> ExprRef {
    let template = to_char_template(&display_tokens(format));
    func("to_char", vec![local(call, 0), text(template)])
}

/// Month number of an English month name held in a capture group.
fn month_of_name(name: ExprRef) -> ExprRef {
    let prefix = func("LOWER", vec![func("SUBSTR", vec![name, num(1), num(3)])]);
    binop(
        binop(
            func("strpos", vec![text("janfebmaraprmayjunjulaugsepoctnovdec"), prefix]),
            BinaryOp::Add,
            num(2),
        ),
        BinaryOp::Div,
        num(3),
    )
}

fn parse(call: &Call) -> Result<ExprRef, Error> {
    if !call.has(1) {
        return Ok(datetime(call, 0));
    }
    let format = call.literal_text(1)?;
    let guard = compile_guard(&format)?;
    let t = common::text_arg(call, 0)?;
    let zone = call.zone(0);
    let matches = regex_match(t.clone(), &guard.pattern);
    let captures = func("regexp_match", vec![t.clone(), text(guard.pattern.as_str())]);
    let group = |index: usize| subscript(captures.clone(), index);

    // fixed-width formats are rebuilt as ISO text from the captured fields
    // and parsed immutably
    if fixed_layout(&format).is_ok() {
        use LayoutField as L;
        let piece = |field: L, default: &str| match guard.group(field) {
            Some(g) => func("LPAD", vec![group(g.index), num(field.width()), text("0")]),
            None => text(default),
        };
        let mut parts = vec![
            piece(L::Year, "0000"),
            text("-"),
            piece(L::Month, "01"),
            text("-"),
            piece(L::Day, "01"),
            text(" "),
            piece(L::Hour, "00"),
            text(":"),
            piece(L::Minute, "00"),
            text(":"),
            piece(L::Second, "00"),
        ];
        // to_timestamp reads MS as a fraction of a second: `.3` is 300 ms
        if let Some(ms) = guard.group(L::Millisecond) {
            parts.push(text("."));
            parts.push(group(ms.index));
        }
        let iso = seq(BinaryOp::Concat, parts);
        return Ok(case(
            vec![when(matches, call.coercer().primitives().parse_iso(iso, zone))],
            None,
        ));
    }
    if !call.target.is_select() {
        return Err(Error::InvalidFormat {
            format,
            reason: "only fixed-width formats can be parsed in a generated column".into(),
        });
    }

    let stamped = func("to_timestamp", vec![t, text(format.as_str())]);
    let parsed = if guard.zoned {
        stamped
    } else {
        at_time_zone(cast(stamped, SqlType::Timestamp), text(zone.name()))
    };
    let int = |index: usize| cast(group(index), SqlType::Integer);
    // to_timestamp raises on day 31 of a 30-day month, so the day is
    // checked first; without a year the month is read in a common year
    let checked = match (guard.group(LayoutField::Month), guard.group(LayoutField::Day)) {
        (Some(month), Some(day)) => {
            let m = if month.named {
                month_of_name(group(month.index))
            } else {
                int(month.index)
            };
            let y = guard.group(LayoutField::Year).map(|y| int(y.index));
            let mut branches = Vec::new();
            if let Some(y) = &y {
                branches.push(when(binop(y.clone(), BinaryOp::Eq, num(0)), null()));
            }
            branches.push(when(
                binop(int(day.index), BinaryOp::Le, last_day(y.unwrap_or_else(|| num(1)), m)),
                parsed,
            ));
            case(branches, None)
        }
        _ => match guard.group(LayoutField::Year) {
            Some(y) => case(
                vec![when(binop(int(y.index), BinaryOp::Ne, num(0)), parsed)],
                None,
            ),
            None => parsed,
        },
    };
    Ok(case(vec![when(matches, checked)], None))
}

// --- arrays --------------------------------------------------------------

fn as_jsonb(c: &Coercer, op: &Operand) -> Result<ExprRef, Error> {
    Ok(match op.kind {
        OperandKind::Json => cast(op.expr(), SqlType::Jsonb),
        OperandKind::Number => func("to_jsonb", vec![c.to_number(op)?]),
        OperandKind::Boolean => func("to_jsonb", vec![op.expr()]),
        _ => func("to_jsonb", vec![c.to_text(op)?]),
    })
}

const ELEMENT_COLUMNS: [&str; 4] = ["__s", "__n", "__m", "__x"];

/// All elements of all arguments tagged with argument index, position and
/// (for flatten) nested position, as a jsonb array in that order.
fn array_op(call: &Call, op: ArrayOp) -> Result<ExprRef, Error> {
    let c = call.coercer();
    c.require_subquery()?;
    let col = |name: &str| ident(None, name);

    let mut members = Vec::new();
    for (i, operand) in call.operands().iter().enumerate() {
        if operand.is_blank() {
            continue;
        }
        let json = as_jsonb(&c, operand)?;
        let source = FromItem::with_ordinality(
            func("jsonb_array_elements", vec![as_array(json.clone())]),
            "__el",
            &["__x", "__n"],
        );
        let member = match op {
            ArrayOp::Flatten => {
                let x = col("__x");
                let nested = iif(
                    binop(jsonb_typeof(x.clone()), BinaryOp::Eq, text("array")),
                    x.clone(),
                    func("jsonb_build_array", vec![x]),
                );
                Select::columns(vec![
                    (num(i), Some("__s".into())),
                    (col("__n"), Some("__n".into())),
                    (col("__m"), Some("__m".into())),
                    (col("__y"), Some("__x".into())),
                ])
                .from(source)
                .left_join(FromItem::with_ordinality(
                    func("jsonb_array_elements", vec![nested]),
                    "__in",
                    &["__y", "__m"],
                ))
                .filter(binop(is_not_null(json), BinaryOp::And, is_not_null(col("__m"))))
            }
            ArrayOp::Unique | ArrayOp::Compact => Select::columns(vec![
                (num(i), Some("__s".into())),
                (col("__n"), Some("__n".into())),
                (num(0), Some("__m".into())),
                (col("__x"), Some("__x".into())),
            ])
            .from(source)
            .filter(is_not_null(json)),
        };
        members.push(member);
    }
    if members.is_empty() {
        return Ok(null());
    }

    let all = FromItem::union_all(members, "__all", &ELEMENT_COLUMNS);
    let order = vec![col("__s"), col("__n"), col("__m")];
    let collected = aggregate("jsonb_agg", vec![col("__x")], order.clone());
    Ok(match op {
        ArrayOp::Unique => {
            let mut columns: Vec<_> = ELEMENT_COLUMNS
                .iter()
                .map(|name| (col(name), Some(name.to_string())))
                .collect();
            columns.push((
                window("row_number", vec![], vec![col("__x")], order),
                Some("__r".into()),
            ));
            let ranked = Select::columns(columns).from(all);
            Select::new(collected)
                .from(FromItem::union_all(
                    vec![ranked],
                    "__ranked",
                    &["__s", "__n", "__m", "__x", "__r"],
                ))
                .filter(binop(col("__r"), BinaryOp::Eq, num(1)))
                .into_expr()
        }
        ArrayOp::Compact => Select::new(collected)
            .from(all)
            .filter(in_list(
                cast(col("__x"), SqlType::Text),
                vec![text("null"), text("\"\"")],
                true,
            ))
            .into_expr(),
        ArrayOp::Flatten => Select::new(collected).from(all).into_expr(),
    })
}
