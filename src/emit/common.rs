//! Dialect-neutral emitters. Everything here is expressed through the
//! [`Coercer`](crate::coercion::Coercer) and the `Target` helpers, so both
//! dialects share one policy.

use chrono::{DateTime, TimeZone, Utc};

use super::{Call, EmitContext, Error, FormulaEmitter, MAX_POSITION};
use crate::{
    coercion::{Operand, OperandKind},
    functions::FormulaFunction as F,
    pattern::{FixedLayout, LayoutField},
    sql::{
        BinaryOp, ExprRef, binop, call as func, case, coalesce, iif, is_null, neg, not, null,
        nullif, num, seq, text, when,
    },
};

pub fn emit_fn_call(call: &Call) -> Result<ExprRef, Error> {
    match call.function {
        F::Sum => sum(call),
        F::Average => average(call),
        F::Ceiling => rounded_to_multiple(call, "CEIL"),
        F::Floor => rounded_to_multiple(call, "FLOOR"),
        F::Even => even_odd(call, false),
        F::Odd => even_odd(call, true),
        F::Int => Ok(func("FLOOR", vec![number(call, 0)?])),
        F::Abs => Ok(func("ABS", vec![number(call, 0)?])),
        F::Sqrt => sqrt(call),
        F::Power => power(call),
        F::Exp => exp(call),
        F::Log => log(call),
        F::Value => number(call, 0),

        F::Concatenate | F::Concat => concatenate(call),
        F::Find => find(call, false),
        F::Search => find(call, true),
        F::Mid => mid(call),
        F::Left => left(call),
        F::Replace => replace(call),
        F::Substitute if !call.has(3) => Ok(func(
            "REPLACE",
            vec![
                text_arg(call, 0)?,
                text_or_empty(call, 1)?,
                text_or_empty(call, 2)?,
            ],
        )),
        F::Lower => Ok(func("LOWER", vec![text_arg(call, 0)?])),
        F::Upper => Ok(func("UPPER", vec![text_arg(call, 0)?])),
        F::Trim => Ok(func("TRIM", vec![text_arg(call, 0)?])),
        F::Len => Ok(func("LENGTH", vec![text_or_empty(call, 0)?])),
        F::T => t(call),

        F::If => if_(call),
        F::Switch => switch(call),
        F::And | F::LogicalAnd => logical(call, BinaryOp::And),
        F::Or | F::LogicalOr => logical(call, BinaryOp::Or),
        F::Xor => xor(call),
        F::Not => Ok(not(call.coercer().to_bool(&call.operand(0))?)),
        F::Blank => Ok(null()),
        F::Error => Ok(null()),
        F::IsError => Ok(is_null(call.arg(0))),

        F::Now if call.target.context == EmitContext::GeneratedColumn => {
            Ok(FormulaEmitter::frozen_literal(call.cx.now()))
        }
        F::Today if call.target.context == EmitContext::GeneratedColumn => {
            Ok(FormulaEmitter::frozen_literal(frozen_midnight(call)))
        }
        F::CreatedTime => Ok(call.system_column("__created_time")),
        F::LastModifiedTime => Ok(call.system_column("__last_modified_time")),

        F::Countall => countall(call),
        F::Counta => counta(call),
        F::Count => count(call),
        F::ArrayJoin => array_join(call),

        F::RecordId => Ok(call.system_column("__id")),
        F::AutoNumber => Ok(call.system_column("__auto_number")),
        F::TextAll => text_arg(call, 0),

        F::Add => add(call),
        F::Subtract => arithmetic(call, BinaryOp::Sub),
        F::Multiply => arithmetic(call, BinaryOp::Mul),
        F::Divide => divide(call),
        F::Equal => call.coercer().equal(&call.operand(0), &call.operand(1), false),
        F::NotEqual => call.coercer().equal(&call.operand(0), &call.operand(1), true),
        F::GreaterThan => compare(call, BinaryOp::Gt),
        F::GreaterThanOrEqual => compare(call, BinaryOp::Ge),
        F::LessThan => compare(call, BinaryOp::Lt),
        F::LessThanOrEqual => compare(call, BinaryOp::Le),
        F::UnaryMinus => Ok(neg(collapsed(call, 0)?)),

        F::CastToNumber => number(call, 0),
        F::CastToString => text_arg(call, 0),
        F::CastToBoolean => call.coercer().to_bool(&call.operand(0)),
        F::CastToDate => Ok(datetime(call, 0)),

        _ => Err(call.unsupported()),
    }
}

// --- operand shortcuts -----------------------------------------------------

pub(crate) fn number(call: &Call, index: usize) -> Result<ExprRef, Error> {
    call.coercer().to_number(&call.operand(index))
}

pub(crate) fn collapsed(call: &Call, index: usize) -> Result<ExprRef, Error> {
    call.coercer().collapse_number(&call.operand(index))
}

pub(crate) fn text_arg(call: &Call, index: usize) -> Result<ExprRef, Error> {
    call.coercer().to_text(&call.operand(index))
}

pub(crate) fn text_or_empty(call: &Call, index: usize) -> Result<ExprRef, Error> {
    call.coercer().to_text_or_empty(&call.operand(index))
}

pub(crate) fn datetime(call: &Call, index: usize) -> ExprRef {
    call.coercer().to_datetime(&call.operand(index))
}

/// An optional numeric argument, `default` when absent.
pub(crate) fn number_or(call: &Call, index: usize, default: i64) -> Result<ExprRef, Error> {
    if call.has(index) {
        number(call, index)
    } else {
        Ok(num(default))
    }
}

/// A 1-based string position argument.
pub(crate) fn position(call: &Call, index: usize) -> Result<ExprRef, Error> {
    Ok(call.target.bounded_int(number(call, index)?, 1, MAX_POSITION))
}

/// A character count argument.
pub(crate) fn length(call: &Call, index: usize) -> Result<ExprRef, Error> {
    Ok(call.target.bounded_int(number(call, index)?, 0, MAX_POSITION))
}

/// An optional unit literal; `day` when absent.
pub(crate) fn unit_arg(call: &Call, index: usize) -> Result<String, Error> {
    if call.has(index) {
        call.literal_text(index)
    } else {
        Ok("day".into())
    }
}

/// Business days to move by; blank is 0.
pub(crate) fn workdays(call: &Call, index: usize) -> Result<ExprRef, Error> {
    Ok(call
        .target
        .bounded_int(collapsed(call, index)?, -MAX_WORKDAYS, MAX_WORKDAYS))
}

const MAX_WORKDAYS: i64 = 100_000;

/// Longest text REPT builds.
pub(crate) const MAX_REPEAT_LENGTH: i64 = 10_000_000;

/// DATE_ADD beyond these magnitudes yields NULL instead of an out-of-range
/// timestamp.
pub(crate) const MAX_SHIFT_SECONDS: f64 = 3e11;
pub(crate) const MAX_SHIFT_MONTHS: i64 = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ArrayOp {
    Unique,
    Flatten,
    Compact,
}

/// ROUND-family precision, clamped to what a double can carry.
pub(crate) fn digits(call: &Call) -> Result<ExprRef, Error> {
    if call.has(1) {
        Ok(call.target.bounded_int(collapsed(call, 1)?, -15, 15))
    } else {
        Ok(num(0))
    }
}

pub(crate) fn nonzero(e: ExprRef) -> ExprRef {
    nullif(e, num(0))
}

/// Every non-blank argument as a number. Multi-value arguments fold through
/// `aggregate` in a subquery.
pub(crate) fn numeric_values(call: &Call, aggregate: &str) -> Result<Vec<ExprRef>, Error> {
    let c = call.coercer();
    call.operands()
        .iter()
        .filter(|op| !op.is_blank())
        .map(|op| match op.kind {
            OperandKind::Json => {
                c.require_subquery()?;
                Ok(c.primitives().json_numeric(op.expr(), aggregate))
            }
            _ => c.to_number(op),
        })
        .collect()
}

/// A literal 1-based occurrence index.
pub(crate) fn occurrence(call: &Call, index: usize) -> Result<i64, Error> {
    let n = call.literal_number(index)?;
    if n < 1.0 || n.fract() != 0.0 || n > MAX_POSITION as f64 {
        return Err(call.wrong_type(index, "must be a positive whole number"));
    }
    Ok(n as i64)
}

/// WEEKDAY counts from Sunday unless its start day says Monday.
pub(crate) fn weekday_from_monday(call: &Call) -> Result<bool, Error> {
    if !call.has(1) {
        return Ok(false);
    }
    match call.literal_text(1)?.trim().to_ascii_lowercase().as_str() {
        "sunday" => Ok(false),
        "monday" => Ok(true),
        _ => Err(call.wrong_type(1, "must be \"Sunday\" or \"Monday\"")),
    }
}

/// `YYYY-MM-DD HH:MM:SS[.mmm]` cut out of fixed-width text. Missing time
/// fields read as zero.
pub(crate) fn reassemble_iso(t: ExprRef, layout: &FixedLayout) -> ExprRef {
    use LayoutField as L;
    let piece = |field: L, default: &str| match layout.offset_of(field) {
        Some(offset) => func("SUBSTR", vec![t.clone(), num(offset), num(field.width())]),
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
    if layout.offset_of(L::Millisecond).is_some() {
        parts.push(text("."));
        parts.push(piece(L::Millisecond, "000"));
    }
    seq(BinaryOp::Concat, parts)
}

fn zero_if_null(e: ExprRef) -> ExprRef {
    iif(is_null(e), num(0), num(1))
}

// --- numeric ---------------------------------------------------------------

fn sum(call: &Call) -> Result<ExprRef, Error> {
    let c = call.coercer();
    let terms = call
        .operands()
        .iter()
        .map(|op| c.collapse_number(op))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(seq(BinaryOp::Add, terms))
}

/// How many numeric values an operand contributes to an average or COUNT.
fn numeric_count(call: &Call, op: &Operand) -> Result<ExprRef, Error> {
    let c = call.coercer();
    Ok(match op.kind {
        OperandKind::Blank => num(0),
        OperandKind::Json => {
            c.require_subquery()?;
            c.primitives().json_numeric(op.expr(), "COUNT")
        }
        _ => zero_if_null(c.to_number(op)?),
    })
}

fn average(call: &Call) -> Result<ExprRef, Error> {
    let operands = call.operands();
    let counts = operands
        .iter()
        .map(|op| numeric_count(call, op))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(binop(
        sum(call)?,
        BinaryOp::Div,
        nullif(seq(BinaryOp::Add, counts), num(0)),
    ))
}

/// CEILING/FLOOR to a multiple of the optional significance.
fn rounded_to_multiple(call: &Call, rounding: &str) -> Result<ExprRef, Error> {
    let x = number(call, 0)?;
    let significance = number_or(call, 1, 1)?;
    Ok(binop(
        func(
            rounding,
            vec![binop(
                x,
                BinaryOp::Div,
                nullif(significance.clone(), num(0)),
            )],
        ),
        BinaryOp::Mul,
        significance,
    ))
}

/// Rounds away from zero to the next even (or odd) integer; ODD(0) is 1.
fn even_odd(call: &Call, odd: bool) -> Result<ExprRef, Error> {
    let x = number(call, 0)?;
    let sign = iif(binop(x.clone(), BinaryOp::Lt, num(0)), num(-1), num(1));
    let magnitude = func("ABS", vec![x]);
    let rounded = if odd {
        binop(
            binop(
                func(
                    "CEIL",
                    vec![binop(
                        binop(magnitude, BinaryOp::Add, num(1)),
                        BinaryOp::Div,
                        num(2.0),
                    )],
                ),
                BinaryOp::Mul,
                num(2),
            ),
            BinaryOp::Sub,
            num(1),
        )
    } else {
        binop(
            func("CEIL", vec![binop(magnitude, BinaryOp::Div, num(2.0))]),
            BinaryOp::Mul,
            num(2),
        )
    };
    Ok(binop(sign, BinaryOp::Mul, rounded))
}

fn sqrt(call: &Call) -> Result<ExprRef, Error> {
    let x = number(call, 0)?;
    Ok(case(
        vec![when(binop(x.clone(), BinaryOp::Lt, num(0)), null())],
        Some(func("SQRT", vec![x])),
    ))
}

// ln(f64::MAX) is about 709.78
const EXP_OVERFLOW: f64 = 709.0;
const EXP_UNDERFLOW: f64 = -700.0;

fn power(call: &Call) -> Result<ExprRef, Error> {
    let base = number(call, 0)?;
    let exponent = number(call, 1)?;
    let power = func("POWER", vec![base.clone(), exponent.clone()]);
    let magnitude = binop(
        exponent.clone(),
        BinaryOp::Mul,
        func("LN", vec![func("ABS", vec![base.clone()])]),
    );
    // branches run in order, so LN never sees a zero base
    Ok(case(
        vec![
            when(
                binop(base.clone(), BinaryOp::Eq, num(0)),
                iif(
                    binop(exponent.clone(), BinaryOp::Lt, num(0)),
                    null(),
                    power.clone(),
                ),
            ),
            when(
                binop(
                    binop(base, BinaryOp::Lt, num(0)),
                    BinaryOp::And,
                    binop(
                        exponent.clone(),
                        BinaryOp::Ne,
                        func("FLOOR", vec![exponent]),
                    ),
                ),
                null(),
            ),
            when(
                binop(magnitude.clone(), BinaryOp::Gt, num(EXP_OVERFLOW)),
                null(),
            ),
            when(binop(magnitude, BinaryOp::Lt, num(EXP_UNDERFLOW)), num(0)),
        ],
        Some(power),
    ))
}

fn exp(call: &Call) -> Result<ExprRef, Error> {
    let x = number(call, 0)?;
    Ok(case(
        vec![
            when(binop(x.clone(), BinaryOp::Gt, num(EXP_OVERFLOW)), null()),
            when(binop(x.clone(), BinaryOp::Lt, num(EXP_UNDERFLOW)), num(0)),
        ],
        Some(func("EXP", vec![x])),
    ))
}

fn log(call: &Call) -> Result<ExprRef, Error> {
    let x = number(call, 0)?;
    let base = number_or(call, 1, 10)?;
    Ok(case(
        vec![when(
            seq(
                BinaryOp::Or,
                vec![
                    binop(x.clone(), BinaryOp::Le, num(0)),
                    binop(base.clone(), BinaryOp::Le, num(0)),
                    binop(base.clone(), BinaryOp::Eq, num(1)),
                ],
            ),
            null(),
        )],
        Some(binop(
            func("LN", vec![x]),
            BinaryOp::Div,
            func("LN", vec![base]),
        )),
    ))
}

// --- text --------------------------------------------------------------

fn concatenate(call: &Call) -> Result<ExprRef, Error> {
    let c = call.coercer();
    let parts = call
        .operands()
        .iter()
        .map(|op| c.to_text_or_empty(op))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(seq(BinaryOp::Concat, parts))
}

/// FIND returns 0 when the needle is absent, SEARCH (case-insensitive)
/// returns NULL.
fn find(call: &Call, search: bool) -> Result<ExprRef, Error> {
    let fold = |e: ExprRef| if search { func("LOWER", vec![e]) } else { e };
    let needle = fold(text_or_empty(call, 0)?);
    let haystack = fold(text_or_empty(call, 1)?);

    let found = if call.has(2) {
        let start = position(call, 2)?;
        let within = call
            .target
            .strpos(func("SUBSTR", vec![haystack, start.clone()]), needle);
        iif(
            binop(within.clone(), BinaryOp::Eq, num(0)),
            num(0),
            seq(BinaryOp::Sub, vec![seq(BinaryOp::Add, vec![within, start]), num(1)]),
        )
    } else {
        call.target.strpos(haystack, needle)
    };
    Ok(if search { nullif(found, num(0)) } else { found })
}

fn mid(call: &Call) -> Result<ExprRef, Error> {
    Ok(func(
        "SUBSTR",
        vec![text_arg(call, 0)?, position(call, 1)?, length(call, 2)?],
    ))
}

fn left(call: &Call) -> Result<ExprRef, Error> {
    let count = if call.has(1) { length(call, 1)? } else { num(1) };
    Ok(func("SUBSTR", vec![text_arg(call, 0)?, num(1), count]))
}

/// REPLACE(text, start, count, new): positional splice.
fn replace(call: &Call) -> Result<ExprRef, Error> {
    let t = text_or_empty(call, 0)?;
    let start = position(call, 1)?;
    let count = length(call, 2)?;
    Ok(seq(
        BinaryOp::Concat,
        vec![
            func(
                "SUBSTR",
                vec![t.clone(), num(1), binop(start.clone(), BinaryOp::Sub, num(1))],
            ),
            text_or_empty(call, 3)?,
            func("SUBSTR", vec![t, binop(start, BinaryOp::Add, count)]),
        ],
    ))
}

/// T(x): the value if it is text, else empty.
fn t(call: &Call) -> Result<ExprRef, Error> {
    let op = call.operand(0);
    match op.kind {
        OperandKind::Text | OperandKind::Unknown => call.coercer().to_text(&op),
        OperandKind::Json if op.is_text_like() => call.coercer().to_text(&op),
        _ => Ok(text("")),
    }
}

// --- logical -----------------------------------------------------------

fn if_(call: &Call) -> Result<ExprRef, Error> {
    let c = call.coercer();
    let cond = c.to_bool(&call.operand(0))?;
    let then = call.operand(1);
    let otherwise = call.has(2).then(|| call.operand(2));

    let mut branches = vec![&then];
    branches.extend(otherwise.as_ref());
    let mode = c.unify(&branches);
    tracing::trace!(?mode, "if branches unified");

    let r#else = otherwise
        .as_ref()
        .map(|op| c.branch_value(op, mode))
        .transpose()?;
    Ok(case(vec![when(cond, c.branch_value(&then, mode)?)], r#else))
}

/// SWITCH(expr, pattern1, result1, ..., [default])
fn switch(call: &Call) -> Result<ExprRef, Error> {
    let c = call.coercer();
    let operands = call.operands();
    let (subject, rest) = operands
        .split_first()
        .ok_or_else(|| call.wrong_type(0, "is missing"))?;
    let pairs = rest.chunks_exact(2);
    let default = pairs.remainder().first();

    let mut values: Vec<&Operand> = pairs.clone().map(|pair| &pair[1]).collect();
    values.extend(default);
    let mode = c.unify(&values);

    let branches = pairs
        .map(|pair| Ok(when(c.equal(subject, &pair[0], false)?, c.branch_value(&pair[1], mode)?)))
        .collect::<Result<Vec<_>, Error>>()?;
    let r#else = default.map(|op| c.branch_value(op, mode)).transpose()?;
    Ok(case(branches, r#else))
}

fn logical(call: &Call, op: BinaryOp) -> Result<ExprRef, Error> {
    let c = call.coercer();
    let terms = call
        .operands()
        .iter()
        .map(|o| c.to_bool(o))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(seq(op, terms))
}

/// True when an odd number of arguments are truthy.
fn xor(call: &Call) -> Result<ExprRef, Error> {
    let c = call.coercer();
    let ones = call
        .operands()
        .iter()
        .map(|o| Ok(iif(c.to_bool(o)?, num(1), num(0))))
        .collect::<Result<Vec<_>, Error>>()?;
    Ok(binop(
        binop(seq(BinaryOp::Add, ones), BinaryOp::Mod, num(2)),
        BinaryOp::Eq,
        num(1),
    ))
}

// --- datetime ----------------------------------------------------------

/// Midnight of the frozen clock's day in the context timezone, as UTC.
fn frozen_midnight(call: &Call) -> DateTime<Utc> {
    let tz = call.cx.zone_for(None);
    let now = call.cx.now();
    let day = now.with_timezone(&tz).date_naive();
    // midnight can fall into a DST gap; the first hour that exists wins
    (0..=2)
        .filter_map(|h| day.and_hms_opt(h, 0, 0))
        .find_map(|local| tz.from_local_datetime(&local).earliest())
        .map(|local| local.with_timezone(&Utc))
        .unwrap_or(now)
}

/// Calendar days that move a date with ISO weekday `dow` (1 = Monday) by
/// `n` business days. A weekend start first steps to Friday (moving
/// forward) or Monday (moving back).
pub(crate) fn workday_shift(dow: ExprRef, n: ExprRef) -> ExprRef {
    let forward = binop(n.clone(), BinaryOp::Ge, num(0));
    let weekend = binop(dow.clone(), BinaryOp::Gt, num(5));
    let to_weekday = iif(
        weekend.clone(),
        iif(
            forward.clone(),
            binop(num(5), BinaryOp::Sub, dow.clone()),
            binop(num(8), BinaryOp::Sub, dow.clone()),
        ),
        num(0),
    );
    let start = iif(
        weekend,
        iif(forward.clone(), num(5), num(1)),
        dow,
    );
    // whole weeks crossed, each adding a weekend
    let ahead = seq(
        BinaryOp::Add,
        vec![
            n.clone(),
            binop(
                num(2),
                BinaryOp::Mul,
                binop(
                    seq(BinaryOp::Add, vec![binop(start.clone(), BinaryOp::Sub, num(1)), n.clone()]),
                    BinaryOp::Div,
                    num(5),
                ),
            ),
        ],
    );
    let behind = binop(
        n.clone(),
        BinaryOp::Sub,
        binop(
            num(2),
            BinaryOp::Mul,
            binop(
                seq(BinaryOp::Sub, vec![num(5), start, n]),
                BinaryOp::Div,
                num(5),
            ),
        ),
    );
    binop(to_weekday, BinaryOp::Add, iif(forward, ahead, behind))
}

/// Business days in the inclusive span of `days` days starting on ISO
/// weekday `dow`.
pub(crate) fn business_days(call: &Call, dow: ExprRef, days: ExprRef) -> ExprRef {
    let target = call.target;
    let weeks = binop(days.clone(), BinaryOp::Div, num(7));
    let rem = binop(days, BinaryOp::Mod, num(7));
    seq(
        BinaryOp::Add,
        vec![
            binop(weeks, BinaryOp::Mul, num(5)),
            target.least(vec![
                rem.clone(),
                target.greatest(vec![num(0), binop(num(6), BinaryOp::Sub, dow.clone())]),
            ]),
            target.greatest(vec![
                num(0),
                binop(rem, BinaryOp::Sub, binop(num(8), BinaryOp::Sub, dow)),
            ]),
        ],
    )
}

/// Business-day count that is negative when `end` precedes `start`.
pub(crate) fn signed(reversed: ExprRef, count: ExprRef) -> ExprRef {
    iif(reversed, neg(count.clone()), count)
}

// --- arrays and counts -------------------------------------------------

fn countall(call: &Call) -> Result<ExprRef, Error> {
    let op = call.operand(0);
    Ok(match op.kind {
        OperandKind::Json => call.coercer().primitives().json_length(op.expr()),
        OperandKind::Blank => num(0),
        _ => zero_if_null(op.expr()),
    })
}

fn counta(call: &Call) -> Result<ExprRef, Error> {
    let c = call.coercer();
    let terms = call
        .operands()
        .iter()
        .map(|op| {
            Ok(match op.kind {
                OperandKind::Blank => num(0),
                OperandKind::Json => {
                    c.require_subquery()?;
                    c.primitives().json_count_nonblank(op.expr())
                }
                OperandKind::Text => iif(
                    binop(coalesce(vec![op.expr(), text("")]), BinaryOp::Eq, text("")),
                    num(0),
                    num(1),
                ),
                _ => zero_if_null(op.expr()),
            })
        })
        .collect::<Result<Vec<_>, Error>>()?;
    Ok(seq(BinaryOp::Add, terms))
}

fn count(call: &Call) -> Result<ExprRef, Error> {
    let terms = call
        .operands()
        .iter()
        .map(|op| match op.kind {
            OperandKind::Text | OperandKind::Boolean | OperandKind::Datetime => Ok(num(0)),
            _ => numeric_count(call, op),
        })
        .collect::<Result<Vec<_>, Error>>()?;
    Ok(seq(BinaryOp::Add, terms))
}

fn array_join(call: &Call) -> Result<ExprRef, Error> {
    let c = call.coercer();
    let op = call.operand(0);
    let separator = if call.has(1) { text_or_empty(call, 1)? } else { text(", ") };
    match op.kind {
        OperandKind::Json => {
            c.require_subquery()?;
            Ok(c.primitives().json_join(op.expr(), separator))
        }
        _ => c.to_text(&op),
    }
}

// --- operators ---------------------------------------------------------

fn add(call: &Call) -> Result<ExprRef, Error> {
    let (a, b) = (call.operand(0), call.operand(1));
    if a.is_text_like() || b.is_text_like() {
        let c = call.coercer();
        return Ok(seq(
            BinaryOp::Concat,
            vec![c.to_text_or_empty(&a)?, c.to_text_or_empty(&b)?],
        ));
    }
    arithmetic(call, BinaryOp::Add)
}

fn arithmetic(call: &Call, op: BinaryOp) -> Result<ExprRef, Error> {
    Ok(binop(collapsed(call, 0)?, op, collapsed(call, 1)?))
}

fn divide(call: &Call) -> Result<ExprRef, Error> {
    Ok(binop(
        collapsed(call, 0)?,
        BinaryOp::Div,
        nullif(collapsed(call, 1)?, num(0)),
    ))
}

fn compare(call: &Call, op: BinaryOp) -> Result<ExprRef, Error> {
    call.coercer().compare(&call.operand(0), op, &call.operand(1))
}
