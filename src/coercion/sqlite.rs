use super::{Primitives, Zone};
use crate::{
    emit::EmitContext,
    sql::{
        BinaryOp, ExprRef, FromItem, Select, SqlType, binop, bool_lit, call, case, case_on, cast,
        coalesce, ident, in_list, is_not_null, is_null, not, null, num, seq, text, when,
    },
};

/// Strings and symbols that may decorate a number typed as text.
const NUMBER_DECORATIONS: &[&str] = &[",", "_", " ", "$", "€", "£", "¥", "%"];
pub(crate) const ISO_OUTPUT: &str = "%Y-%m-%dT%H:%M:%fZ";

pub struct Sqlite;

pub(crate) fn glob(e: ExprRef, pattern: &str) -> ExprRef {
    binop(e, BinaryOp::Glob, text(pattern))
}

fn json_valid(e: ExprRef) -> ExprRef {
    call("json_valid", vec![e])
}

fn json_type(e: ExprRef) -> ExprRef {
    call("json_type", vec![e])
}

/// Valid JSON is used as is; any other value becomes a one-element array.
pub(crate) fn as_json(e: ExprRef) -> ExprRef {
    case(
        vec![when(json_valid(e.clone()), e.clone())],
        Some(call("json_array", vec![e])),
    )
}

pub(crate) fn column(name: &str) -> ExprRef {
    ident(Some("__el"), name)
}

pub(crate) fn each(e: ExprRef) -> FromItem {
    FromItem::table_function(call("json_each", vec![as_json(e)]), "__el", &[])
}

/// Text that reads as a plain decimal once signs are trimmed off.
fn decimal_text(v: ExprRef) -> ExprRef {
    let digits = call("ltrim", vec![call("trim", vec![v]), text("+-")]);
    seq(
        BinaryOp::And,
        vec![
            binop(digits.clone(), BinaryOp::Ne, text("")),
            not(glob(digits.clone(), "*[^0-9.]*")),
            glob(digits.clone(), "*[0-9]*"),
            not(glob(digits, "*.*.*")),
        ],
    )
}

impl Primitives for Sqlite {
    fn loose_numeric(&self, e: ExprRef) -> ExprRef {
        let t = call("TRIM", vec![cast(e.clone(), SqlType::Text)]);
        let s = NUMBER_DECORATIONS.iter().fold(t.clone(), |acc, decoration| {
            call("REPLACE", vec![acc, text(*decoration), text("")])
        });
        case(
            vec![
                when(
                    in_list(
                        call("typeof", vec![e.clone()]),
                        vec![text("integer"), text("real")],
                        false,
                    ),
                    e,
                ),
                when(glob(t, "[0-9][0-9][0-9][0-9]-[0-9]*-[0-9]*"), null()),
                when(binop(s.clone(), BinaryOp::Eq, text("")), null()),
                when(glob(s.clone(), "*[^0-9.+-]*"), null()),
                when(not(glob(s.clone(), "*[0-9]*")), null()),
                // a sign is only allowed in front
                when(
                    glob(call("substr", vec![s.clone(), num(2)]), "*[+-]*"),
                    null(),
                ),
                when(glob(s.clone(), "*.*.*"), null()),
            ],
            Some(cast(s, SqlType::Double)),
        )
    }

    fn json_numeric(&self, e: ExprRef, aggregate: &str) -> ExprRef {
        let ty = column("type");
        let value = column("value");
        Select::new(call(aggregate, vec![cast(value.clone(), SqlType::Double)]))
            .from(each(e))
            .filter(binop(
                in_list(ty.clone(), vec![text("integer"), text("real")], false),
                BinaryOp::Or,
                binop(
                    binop(ty, BinaryOp::Eq, text("text")),
                    BinaryOp::And,
                    decimal_text(value),
                ),
            ))
            .into_expr()
    }

    fn json_count_nonblank(&self, e: ExprRef) -> ExprRef {
        let ty = column("type");
        Select::new(call("COUNT", vec![ty.clone()]))
            .from(each(e))
            .filter(binop(
                binop(ty.clone(), BinaryOp::Ne, text("null")),
                BinaryOp::And,
                not(binop(
                    binop(ty, BinaryOp::Eq, text("text")),
                    BinaryOp::And,
                    binop(column("value"), BinaryOp::Eq, text("")),
                )),
            ))
            .into_expr()
    }

    fn json_join(&self, e: ExprRef, separator: ExprRef) -> ExprRef {
        let ty = column("type");
        let value = column("value");
        let element = case_on(
            ty.clone(),
            vec![
                when(
                    text("object"),
                    coalesce(vec![
                        call("json_extract", vec![value.clone(), text("$.title")]),
                        call("json_extract", vec![value.clone(), text("$.name")]),
                        value.clone(),
                    ]),
                ),
                when(text("true"), text("true")),
                when(text("false"), text("false")),
            ],
            Some(value),
        );
        Select::new(call("group_concat", vec![element, separator]))
            .from(each(e))
            .filter(binop(ty, BinaryOp::Ne, text("null")))
            .into_expr()
    }

    fn json_scalar_text(&self, e: ExprRef) -> ExprRef {
        let ty = json_type(e.clone());
        case(
            vec![
                when(is_null(e.clone()), null()),
                when(not(json_valid(e.clone())), cast(e.clone(), SqlType::Text)),
                when(
                    binop(ty.clone(), BinaryOp::Eq, text("object")),
                    coalesce(vec![
                        call("json_extract", vec![e.clone(), text("$.title")]),
                        call("json_extract", vec![e.clone(), text("$.name")]),
                        e.clone(),
                    ]),
                ),
                when(
                    in_list(ty.clone(), vec![text("true"), text("false")], false),
                    ty.clone(),
                ),
                when(binop(ty, BinaryOp::Eq, text("null")), null()),
            ],
            Some(call("json_extract", vec![e, text("$")])),
        )
    }

    fn json_length(&self, e: ExprRef) -> ExprRef {
        let ty = json_type(e.clone());
        case(
            vec![
                when(is_null(e.clone()), num(0)),
                when(not(json_valid(e.clone())), num(1)),
                when(
                    binop(ty.clone(), BinaryOp::Eq, text("array")),
                    call("json_array_length", vec![e]),
                ),
                when(binop(ty, BinaryOp::Eq, text("null")), num(0)),
            ],
            Some(num(1)),
        )
    }

    fn number_to_text(&self, e: ExprRef) -> ExprRef {
        let int = cast(e.clone(), SqlType::Integer);
        case(
            vec![when(
                binop(e.clone(), BinaryOp::Eq, int.clone()),
                cast(int, SqlType::Text),
            )],
            Some(cast(e, SqlType::Text)),
        )
    }

    fn datetime_to_text(&self, e: ExprRef) -> ExprRef {
        self.normalize_datetime(e)
    }

    fn bool_truthy(&self, e: ExprRef) -> ExprRef {
        binop(coalesce(vec![e, num(0)]), BinaryOp::Ne, num(0))
    }

    fn unknown_truthy(&self, e: ExprRef, _: EmitContext) -> ExprRef {
        case_on(
            call("typeof", vec![e.clone()]),
            vec![
                when(text("null"), bool_lit(false)),
                when(text("integer"), binop(e.clone(), BinaryOp::Ne, num(0))),
                when(text("real"), binop(e.clone(), BinaryOp::Ne, num(0))),
            ],
            Some(in_list(
                call("LOWER", vec![cast(e, SqlType::Text)]),
                vec![text(""), text("null")],
                true,
            )),
        )
    }

    fn normalize_datetime(&self, e: ExprRef) -> ExprRef {
        call("strftime", vec![text(ISO_OUTPUT), e])
    }

    fn parse_iso(&self, e: ExprRef, zone: Zone) -> ExprRef {
        let t = call("TRIM", vec![cast(e, SqlType::Text)]);
        let explicit_zone = binop(
            glob(t.clone(), "*[Zz]"),
            BinaryOp::Or,
            glob(t.clone(), "*[+-][0-9][0-9]:[0-9][0-9]"),
        );
        // wall-clock text is shifted back to UTC by the zone's offset
        let shift = case(
            vec![when(explicit_zone, text("+0 minutes"))],
            Some(text(format!("{:+} minutes", -zone.offset_minutes))),
        );
        let valid = seq(
            BinaryOp::And,
            vec![
                glob(t.clone(), "[0-9][0-9][0-9][0-9]-[0-9][0-9]-[0-9][0-9]*"),
                // date() rolls Feb 30 over to March, so a mismatch is an invalid day
                binop(
                    call("date", vec![call("substr", vec![t.clone(), num(1), num(10)])]),
                    BinaryOp::Eq,
                    call("substr", vec![t.clone(), num(1), num(10)]),
                ),
                is_not_null(call("datetime", vec![t.clone()])),
            ],
        );
        case(
            vec![when(
                valid,
                call("strftime", vec![text(ISO_OUTPUT), t, shift]),
            )],
            None,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::fragment;
    use crate::to_sql::{Printer, PrinterConfig};
    use rusqlite::Connection;

    fn lite(e: ExprRef) -> String {
        Printer::new(e, PrinterConfig::sqlite()).to_string()
    }

    fn eval(conn: &Connection, sql: &str) -> rusqlite::types::Value {
        conn.query_row(&format!("SELECT {sql}"), [], |row| row.get(0))
            .unwrap()
    }

    fn utc() -> Zone {
        Zone {
            tz: chrono_tz::Tz::UTC,
            offset_minutes: 0,
        }
    }

    #[test]
    fn loose_numeric_strips_decorations() {
        use rusqlite::types::Value;
        let conn = Connection::open_in_memory().unwrap();
        for (input, expected) in [
            ("'$1,234.50'", Value::Real(1234.5)),
            ("'  -7 '", Value::Real(-7.0)),
            ("'12%'", Value::Real(12.0)),
            ("42", Value::Integer(42)),
            ("'2024-01-05'", Value::Null),
            ("'abc'", Value::Null),
            ("'1-2'", Value::Null),
            ("'1.2.3'", Value::Null),
            ("''", Value::Null),
        ] {
            let sql = lite(Sqlite.loose_numeric(fragment(input)));
            assert_eq!(eval(&conn, &sql), expected, "{input}");
        }
    }

    #[test]
    fn parse_iso_rejects_impossible_days() {
        use rusqlite::types::Value;
        let conn = Connection::open_in_memory().unwrap();
        let parse = |input: &str, zone: Zone| {
            let sql = lite(Sqlite.parse_iso(fragment(input), zone));
            eval(&conn, &sql)
        };
        assert_eq!(
            parse("'2024-02-29'", utc()),
            Value::Text("2024-02-29T00:00:00.000Z".into())
        );
        assert_eq!(parse("'2023-02-29'", utc()), Value::Null);
        assert_eq!(parse("'not a date'", utc()), Value::Null);
        assert_eq!(parse("NULL", utc()), Value::Null);

        let tokyo = Zone {
            tz: chrono_tz::Tz::Asia__Tokyo,
            offset_minutes: 540,
        };
        assert_eq!(
            parse("'2024-03-05 09:00'", tokyo),
            Value::Text("2024-03-05T00:00:00.000Z".into())
        );
        assert_eq!(
            parse("'2024-03-05T09:00:00Z'", tokyo),
            Value::Text("2024-03-05T09:00:00.000Z".into())
        );
        assert_eq!(
            parse("'2024-03-05T23:00:00-05:00'", utc()),
            Value::Text("2024-03-06T04:00:00.000Z".into())
        );
    }

    #[test]
    fn json_helpers() {
        use rusqlite::types::Value;
        let conn = Connection::open_in_memory().unwrap();
        let tags = fragment("'[\"a\",{\"title\":\"b\"},null,true]'");
        assert_eq!(
            eval(&conn, &lite(Sqlite.json_join(tags.clone(), text(", ")))),
            Value::Text("a, b, true".into())
        );
        assert_eq!(eval(&conn, &lite(Sqlite.json_length(tags))), Value::Integer(4));
        assert_eq!(
            eval(&conn, &lite(Sqlite.json_numeric(fragment("'[1, \"2\", \"x\", 3.5]'"), "SUM"))),
            Value::Real(6.5)
        );
        assert_eq!(
            eval(&conn, &lite(Sqlite.json_length(fragment("NULL")))),
            Value::Integer(0)
        );
    }
}
