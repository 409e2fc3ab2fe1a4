use super::{Primitives, Zone};
use crate::{
    emit::EmitContext,
    pattern::{ISO_GUARD, iso_group},
    sql::{
        BinaryOp, ExprRef, FromItem, Select, SqlType, aggregate, at_time_zone, binop, bool_lit,
        call, case, case_on, cast, coalesce, extract, ident, in_list, is_null, not, null, num,
        seq, subscript, text, when,
    },
};

const ISO_DATE_PREFIX: &str = r"^\s*\d{4}-\d{1,2}-\d{1,2}";
// Digit counts are bounded so the cast can never overflow a double.
const NUMERIC_TEXT: &str = r"^\s*[+-]?(\d{1,200}(\.\d{0,200})?|\.\d{1,200})([eE][+-]?\d{1,2})?\s*$";
const PLAIN_NUMBER: &str = r"^[+-]?(\d{1,200}(\.\d{0,200})?|\.\d{1,200})$";
pub(crate) const ISO_OUTPUT: &str = r#"YYYY-MM-DD"T"HH24:MI:SS.MS"Z""#;

pub struct Postgres;

pub(crate) fn jsonb_typeof(e: ExprRef) -> ExprRef {
    call("jsonb_typeof", vec![e])
}

pub(crate) fn regex_match(e: ExprRef, pattern: &str) -> ExprRef {
    binop(e, BinaryOp::RegexMatch, text(pattern))
}

/// The value as JSONB, with a scalar wrapped into a one-element array.
pub(crate) fn as_array(e: ExprRef) -> ExprRef {
    let j = cast(e, SqlType::Jsonb);
    case(
        vec![when(
            binop(jsonb_typeof(j.clone()), BinaryOp::Eq, text("array")),
            j.clone(),
        )],
        Some(call("jsonb_build_array", vec![j])),
    )
}

/// Display text of one JSON element: linked records show their title.
fn element_text(x: ExprRef) -> ExprRef {
    case(
        vec![when(
            binop(jsonb_typeof(x.clone()), BinaryOp::Eq, text("object")),
            coalesce(vec![
                binop(x.clone(), BinaryOp::JsonGetText, text("title")),
                binop(x.clone(), BinaryOp::JsonGetText, text("name")),
                cast(x.clone(), SqlType::Text),
            ]),
        )],
        Some(binop(x, BinaryOp::JsonPathText, text("{}"))),
    )
}

/// Number of days in the month, from integer year and month expressions.
pub(crate) fn last_day(year: ExprRef, month: ExprRef) -> ExprRef {
    extract(
        "DAY",
        seq(
            BinaryOp::Sub,
            vec![
                seq(
                    BinaryOp::Add,
                    vec![
                        call("make_date", vec![year, month, num(1)]),
                        call("make_interval", vec![num(0), num(1)]),
                    ],
                ),
                call("make_interval", vec![num(0), num(0), num(0), num(1)]),
            ],
        ),
    )
}

impl Primitives for Postgres {
    fn loose_numeric(&self, e: ExprRef) -> ExprRef {
        let t = cast(e, SqlType::Text);
        let stripped = call(
            "REGEXP_REPLACE",
            vec![t.clone(), text("[^0-9.+-]"), text(""), text("g")],
        );
        case(
            vec![
                when(regex_match(t.clone(), ISO_DATE_PREFIX), null()),
                when(
                    regex_match(t.clone(), NUMERIC_TEXT),
                    cast(t, SqlType::Double),
                ),
                when(
                    regex_match(stripped.clone(), PLAIN_NUMBER),
                    cast(stripped, SqlType::Double),
                ),
            ],
            None,
        )
    }

    fn json_numeric(&self, e: ExprRef, aggregate: &str) -> ExprRef {
        let v = ident(None, "__v");
        Select::new(call(aggregate, vec![cast(v.clone(), SqlType::Double)]))
            .from(FromItem::table_function(
                call("jsonb_array_elements_text", vec![as_array(e)]),
                "__el",
                &["__v"],
            ))
            .filter(regex_match(v, NUMERIC_TEXT))
            .into_expr()
    }

    fn json_count_nonblank(&self, e: ExprRef) -> ExprRef {
        let x = ident(None, "__x");
        Select::new(call("COUNT", vec![x.clone()]))
            .from(FromItem::table_function(
                call("jsonb_array_elements", vec![as_array(e)]),
                "__el",
                &["__x"],
            ))
            .filter(in_list(
                cast(x, SqlType::Text),
                vec![text("null"), text("\"\"")],
                true,
            ))
            .into_expr()
    }

    fn json_join(&self, e: ExprRef, separator: ExprRef) -> ExprRef {
        let x = ident(None, "__x");
        let n = ident(None, "__n");
        Select::new(aggregate(
            "string_agg",
            vec![element_text(x.clone()), cast(separator, SqlType::Text)],
            vec![n],
        ))
        .from(FromItem::with_ordinality(
            call("jsonb_array_elements", vec![as_array(e)]),
            "__el",
            &["__x", "__n"],
        ))
        .filter(binop(jsonb_typeof(x), BinaryOp::Ne, text("null")))
        .into_expr()
    }

    fn json_scalar_text(&self, e: ExprRef) -> ExprRef {
        let j = cast(e, SqlType::Jsonb);
        let plain = binop(j.clone(), BinaryOp::JsonPathText, text("{}"));
        case_on(
            jsonb_typeof(j.clone()),
            vec![
                when(
                    text("object"),
                    coalesce(vec![
                        binop(j.clone(), BinaryOp::JsonGetText, text("title")),
                        binop(j, BinaryOp::JsonGetText, text("name")),
                        plain.clone(),
                    ]),
                ),
                when(text("null"), null()),
            ],
            Some(plain),
        )
    }

    fn json_length(&self, e: ExprRef) -> ExprRef {
        let j = cast(e, SqlType::Jsonb);
        case(
            vec![
                when(is_null(j.clone()), num(0)),
                when(
                    binop(jsonb_typeof(j.clone()), BinaryOp::Eq, text("array")),
                    call("jsonb_array_length", vec![j.clone()]),
                ),
                when(binop(jsonb_typeof(j), BinaryOp::Eq, text("null")), num(0)),
            ],
            Some(num(1)),
        )
    }

    fn number_to_text(&self, e: ExprRef) -> ExprRef {
        cast(e, SqlType::Text)
    }

    fn datetime_to_text(&self, e: ExprRef) -> ExprRef {
        call(
            "to_char",
            vec![at_time_zone(e, text("UTC")), text(ISO_OUTPUT)],
        )
    }

    fn bool_truthy(&self, e: ExprRef) -> ExprRef {
        coalesce(vec![e, bool_lit(false)])
    }

    fn unknown_truthy(&self, e: ExprRef, context: EmitContext) -> ExprRef {
        let t = call("LOWER", vec![coalesce(vec![cast(e.clone(), SqlType::Text), text("")])]);
        match context {
            EmitContext::GeneratedColumn => in_list(
                t,
                ["", "null", "false", "0", "[]", "{}"].map(text).to_vec(),
                true,
            ),
            EmitContext::Select => {
                let ty = cast(call("pg_typeof", vec![e.clone()]), SqlType::Text);
                case(
                    vec![
                        when(is_null(e), bool_lit(false)),
                        when(
                            binop(ty.clone(), BinaryOp::Eq, text("boolean")),
                            binop(t.clone(), BinaryOp::Eq, text("true")),
                        ),
                        when(
                            in_list(
                                ty,
                                ["integer", "bigint", "smallint", "numeric", "real", "double precision"]
                                    .map(text)
                                    .to_vec(),
                                false,
                            ),
                            // zero in any spelling (0, -0.00, 0e5)
                            not(regex_match(t.clone(), r"^\s*[+-]?0*\.?0*([eE].*)?\s*$")),
                        ),
                    ],
                    Some(in_list(t, vec![text(""), text("null")], true)),
                )
            }
        }
    }

    fn normalize_datetime(&self, e: ExprRef) -> ExprRef {
        e
    }

    fn parse_iso(&self, e: ExprRef, zone: Zone) -> ExprRef {
        let t = cast(e, SqlType::Text);
        let captures = call("regexp_match", vec![t.clone(), text(ISO_GUARD)]);
        let group = |i: usize| subscript(captures.clone(), i);
        let int = |i: usize| cast(group(i), SqlType::Integer);
        let int_or_zero = |i: usize| coalesce(vec![int(i), num(0)]);

        let year = int(iso_group::YEAR);
        let month = int(iso_group::MONTH);
        let day = int(iso_group::DAY);

        let seconds = seq(
            BinaryOp::Add,
            vec![
                coalesce(vec![cast(group(iso_group::SECOND), SqlType::Double), num(0)]),
                coalesce(vec![cast(group(iso_group::FRACTION), SqlType::Double), num(0)]),
            ],
        );
        let wall = call(
            "make_timestamp",
            vec![
                year.clone(),
                month.clone(),
                day.clone(),
                int_or_zero(iso_group::HOUR),
                int_or_zero(iso_group::MINUTE),
                seconds,
            ],
        );
        let sign = case(
            vec![when(
                binop(group(iso_group::OFFSET_SIGN), BinaryOp::Eq, text("-")),
                num(-1),
            )],
            Some(num(1)),
        );
        let offset = seq(
            BinaryOp::Mul,
            vec![
                sign,
                seq(
                    BinaryOp::Add,
                    vec![
                        seq(BinaryOp::Mul, vec![int_or_zero(iso_group::OFFSET_HOURS), num(60)]),
                        int_or_zero(iso_group::OFFSET_MINUTES),
                    ],
                ),
            ],
        );
        let utc_or_local = binop(
            wall,
            BinaryOp::Sub,
            call("make_interval", vec![num(0), num(0), num(0), num(0), num(0), offset]),
        );
        // text without a zone is wall-clock time in the operand's zone
        let reading_zone = case(
            vec![when(is_null(group(iso_group::ZONE)), text(zone.name()))],
            Some(text("UTC")),
        );
        let instant = at_time_zone(utc_or_local, reading_zone);

        case(
            vec![when(
                regex_match(t, ISO_GUARD),
                case(
                    vec![
                        when(binop(year.clone(), BinaryOp::Eq, num(0)), null()),
                        when(binop(day, BinaryOp::Le, last_day(year, month)), instant),
                    ],
                    None,
                ),
            )],
            None,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        sql::fragment,
        to_sql::{Printer, PrinterConfig},
    };

    fn pg(e: ExprRef) -> String {
        Printer::new(e, PrinterConfig::postgres()).to_string()
    }

    #[test]
    fn loose_numeric_guards_every_cast() {
        let sql = pg(Postgres.loose_numeric(fragment("\"t\"")));
        assert!(sql.starts_with("CASE WHEN (CAST(\"t\" AS TEXT) ~ '^\\s*\\d{4}"), "{sql}");
        assert_eq!(sql.matches("AS DOUBLE PRECISION)").count(), 2);
        assert!(sql.contains("REGEXP_REPLACE(CAST(\"t\" AS TEXT), '[^0-9.+-]', '', 'g')"));
    }

    #[test]
    fn json_join_keeps_array_order() {
        let sql = pg(Postgres.json_join(fragment("\"tags\""), text(", ")));
        assert!(sql.contains("string_agg("), "{sql}");
        assert!(sql.contains(" ORDER BY \"__n\")"));
        assert!(sql.contains("WITH ORDINALITY AS \"__el\"(\"__x\", \"__n\")"));
        assert!(sql.contains("(\"__x\" ->> 'title')"));
    }

    #[test]
    fn parse_iso_uses_only_immutable_functions() {
        let zone = Zone {
            tz: chrono_tz::Tz::Asia__Tokyo,
            offset_minutes: 540,
        };
        let sql = pg(Postgres.parse_iso(fragment("\"d\""), zone));
        for forbidden in ["to_timestamp", "::timestamptz", "NOW()", "CAST(CAST(\"d\" AS TEXT) AS TIMESTAMP"] {
            assert!(!sql.contains(forbidden), "{forbidden} in {sql}");
        }
        assert!(sql.contains("make_timestamp("));
        assert!(sql.contains("'Asia/Tokyo'"));
    }
}
