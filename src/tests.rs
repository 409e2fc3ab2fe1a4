use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use rusqlite::{Connection, types::Value};
use strum::IntoEnumIterator;

use crate::{
    CellValueType, ConversionContext, Dialect, EmitContext, Error, FieldCatalog, FieldDescriptor,
    FormulaEmitter, FormulaFunction, ParamMetadata, StorageType,
};

fn amount() -> FieldDescriptor {
    FieldDescriptor::new("fldA", "a", StorageType::Real)
}

fn linked_amounts() -> FieldDescriptor {
    FieldDescriptor::new("fldB", "b", StorageType::Json)
        .lookup()
        .with_cell_value_type(CellValueType::Number)
}

fn cx() -> ConversionContext {
    ConversionContext::new(FieldCatalog::new(vec![
        amount(),
        linked_amounts(),
        FieldDescriptor::new("fldT", "t", StorageType::Text),
        FieldDescriptor::new("fldJ", "j", StorageType::Json),
        FieldDescriptor::new("fldD", "d", StorageType::DateTime),
        FieldDescriptor::new("fldN", "n", StorageType::Real),
    ]))
    .with_now(Utc.with_ymd_and_hms(2024, 3, 5, 10, 30, 0).unwrap())
}

fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn sqlite(context: EmitContext) -> FormulaEmitter {
    FormulaEmitter::new(Dialect::Sqlite, context)
}

fn postgres(context: EmitContext) -> FormulaEmitter {
    FormulaEmitter::new(Dialect::Postgres, context)
}

fn render(emitter: FormulaEmitter, name: &str, list: &[&str]) -> String {
    emitter
        .render(&cx(), name, &args(list), &[])
        .unwrap_or_else(|e| panic!("{name}: {e}"))
}

fn table(rows: &[&str]) -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch(
        r#"CREATE TABLE rec ("id" INTEGER, "a" REAL, "b" TEXT, "t" TEXT, "j" TEXT, "d" TEXT, "n" REAL);"#,
    )
    .unwrap();
    for row in rows {
        conn.execute_batch(&format!("INSERT INTO rec VALUES ({row});"))
            .unwrap();
    }
    conn
}

fn column(conn: &Connection, sql: &str) -> Vec<Value> {
    let mut stmt = conn
        .prepare(&format!("SELECT {sql} FROM rec ORDER BY \"id\""))
        .unwrap_or_else(|e| panic!("{e}: {sql}"));
    stmt.query_map([], |row| row.get(0))
        .unwrap()
        .collect::<Result<Vec<Value>, _>>()
        .unwrap()
}

/// Parentheses balance outside string literals and quoted identifiers, and
/// every quote is closed.
fn balanced(sql: &str) -> bool {
    let mut depth = 0i64;
    let mut quote = None;
    for c in sql.chars() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '(') => depth += 1,
            (None, ')') => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0 && quote.is_none()
}

#[test]
fn sum_of_a_number_and_a_linked_array() {
    let conn = table(&[r#"1, 3, '[1, 2, "x"]', NULL, NULL, NULL, NULL"#]);
    let sql = sqlite(EmitContext::Select)
        .render(
            &cx(),
            "SUM",
            &args(&["\"a\"", "\"b\""]),
            &[
                ParamMetadata::field(amount()),
                ParamMetadata::field(linked_amounts()),
            ],
        )
        .unwrap();
    assert_eq!(column(&conn, &sql), vec![Value::Real(6.0)]);

    // the array needs a subquery, which a generated column cannot hold
    let generated = sqlite(EmitContext::GeneratedColumn).render(
        &cx(),
        "SUM",
        &args(&["\"a\"", "\"b\""]),
        &[],
    );
    assert_eq!(
        generated,
        Err(Error::RequiresSubquery {
            function: "SUM".into()
        })
    );
}

#[test]
fn count_all_counts_values_not_elements() {
    let conn = table(&[
        "1, NULL, NULL, NULL, '[]', NULL, NULL",
        "2, NULL, NULL, 'v', NULL, NULL, NULL",
        "3, NULL, NULL, NULL, '5', NULL, NULL",
        "4, NULL, NULL, NULL, '[1,2,3]', NULL, NULL",
    ]);
    for context in [EmitContext::Select, EmitContext::GeneratedColumn] {
        let json = render(sqlite(context), "COUNTALL", &["\"j\""]);
        assert_eq!(
            column(&conn, &json),
            vec![
                Value::Integer(0),
                Value::Integer(0),
                Value::Integer(1),
                Value::Integer(3)
            ]
        );
        let scalar = render(sqlite(context), "COUNTALL", &["\"t\""]);
        assert_eq!(
            column(&conn, &scalar),
            vec![
                Value::Integer(0),
                Value::Integer(1),
                Value::Integer(0),
                Value::Integer(0)
            ]
        );
    }
}

#[test]
fn blank_text_equals_empty_and_null() {
    let conn = table(&[
        "1, NULL, NULL, NULL, NULL, NULL, NULL",
        "2, NULL, NULL, '', NULL, NULL, NULL",
        "3, NULL, NULL, 'x', NULL, NULL, NULL",
    ]);
    let emitter = sqlite(EmitContext::Select);
    let blank = vec![Value::Integer(1), Value::Integer(1), Value::Integer(0)];
    assert_eq!(column(&conn, &render(emitter, "=", &["\"t\"", "''"])), blank);
    assert_eq!(column(&conn, &render(emitter, "=", &["\"t\"", "NULL"])), blank);
    assert_eq!(column(&conn, &render(emitter, "=", &["NULL", "\"t\""])), blank);
    assert_eq!(
        column(&conn, &render(emitter, "=", &["''", "NULL"])),
        vec![Value::Integer(1); 3]
    );
    // text wins the tie-break, so '' is not 0
    let conn = table(&[
        "1, NULL, NULL, NULL, NULL, NULL, NULL",
        "2, 0, NULL, NULL, NULL, NULL, NULL",
    ]);
    assert_eq!(
        column(&conn, &render(emitter, "=", &["\"a\"", "''"])),
        vec![Value::Integer(1), Value::Integer(0)]
    );
}

#[test]
fn if_with_a_blank_numeric_branch_is_null() {
    let conn = table(&["1, NULL, NULL, NULL, NULL, NULL, NULL"]);
    let sql = render(sqlite(EmitContext::Select), "IF", &["1", "''", "5"]);
    assert_eq!(column(&conn, &sql), vec![Value::Null]);
    let sql = render(sqlite(EmitContext::Select), "IF", &["0", "''", "5"]);
    assert_eq!(column(&conn, &sql), vec![Value::Real(5.0)]);
    // arithmetic reads the same blank as 0
    let sql = render(sqlite(EmitContext::Select), "+", &["''", "5"]);
    assert_eq!(column(&conn, &sql), vec![Value::Real(5.0)]);
}

#[test]
fn text_reads_blank_and_the_null_word_as_false() {
    let conn = table(&[
        "1, NULL, NULL, 'null', NULL, NULL, NULL",
        "2, NULL, NULL, 'NULL', NULL, NULL, NULL",
        "3, NULL, NULL, '', NULL, NULL, NULL",
        "4, NULL, NULL, NULL, NULL, NULL, NULL",
        "5, NULL, NULL, 'x', NULL, NULL, NULL",
        "6, NULL, NULL, 'nullish', NULL, NULL, NULL",
    ]);
    let sql = render(sqlite(EmitContext::Select), "IF", &["\"t\"", "1", "2"]);
    assert_eq!(
        column(&conn, &sql),
        [2.0, 2.0, 2.0, 2.0, 1.0, 1.0].map(Value::Real).to_vec()
    );
}

#[test]
fn unparseable_dates_become_null() {
    let conn = table(&["1, NULL, NULL, NULL, NULL, NULL, NULL"]);
    let emitter = sqlite(EmitContext::Select);
    let sql = render(emitter, "DATETIME_PARSE", &["'not-a-date'"]);
    assert_eq!(column(&conn, &sql), vec![Value::Null]);
    let sql = render(
        emitter,
        "DATETIME_PARSE",
        &["'2024-03-05 10:00'", "'YYYY-MM-DD HH24:MI'"],
    );
    assert_eq!(
        column(&conn, &sql),
        vec![Value::Text("2024-03-05T10:00:00.000Z".into())]
    );
    let sql = render(
        emitter,
        "DATETIME_PARSE",
        &["'2024-13-05 10:00'", "'YYYY-MM-DD HH24:MI'"],
    );
    assert_eq!(column(&conn, &sql), vec![Value::Null]);

    let pg = render(postgres(EmitContext::Select), "DATETIME_PARSE", &["\"t\""]);
    assert!(pg.contains(" ~ '"), "guarded by a regex: {pg}");
}

#[test]
fn unit_aliases_render_identically() {
    for (canonical, aliases) in [
        ("'hours'", ["'hrs'", "'H'", "'hour'"]),
        ("'months'", ["'M'", "'mo'", "'month'"]),
        ("'quarters'", ["'q'", "'qtr'", "'QTRS'"]),
    ] {
        for emitter in [sqlite(EmitContext::Select), postgres(EmitContext::Select)] {
            let expected = render(emitter, "DATETIME_DIFF", &["\"d\"", "'2024-01-01'", canonical]);
            for alias in aliases {
                assert_eq!(
                    render(emitter, "DATETIME_DIFF", &["\"d\"", "'2024-01-01'", alias]),
                    expected,
                    "{alias}"
                );
            }
        }
    }
}

#[test]
fn generated_columns_freeze_the_clock() {
    for emitter in [
        postgres(EmitContext::GeneratedColumn),
        sqlite(EmitContext::GeneratedColumn),
    ] {
        for name in ["NOW", "TODAY"] {
            let first = render(emitter, name, &[]);
            assert_eq!(first, render(emitter, name, &[]));
            assert!(!first.contains("now"), "{first}");
            assert!(!first.contains("NOW"), "{first}");
        }
    }
    assert_eq!(render(postgres(EmitContext::Select), "NOW", &[]), "NOW()");
    assert_eq!(
        render(postgres(EmitContext::GeneratedColumn), "NOW", &[]),
        "TIMESTAMPTZ '2024-03-05T10:30:00.000Z'"
    );
}

#[test]
fn sqlite_accepts_generated_column_output() {
    let emitter = sqlite(EmitContext::GeneratedColumn);
    let columns = [
        ("total", render(emitter, "+", &["\"a\"", "1"])),
        ("shout", render(emitter, "UPPER", &["\"t\""])),
        ("today", render(emitter, "TODAY", &[])),
        ("label", render(emitter, "IF", &["\"a\"", "'yes'", "'no'"])),
    ];
    let definitions: Vec<String> = columns
        .iter()
        .map(|(name, sql)| format!("\"{name}\" GENERATED ALWAYS AS ({sql}) STORED"))
        .collect();
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch(&format!(
        "CREATE TABLE g (\"a\" REAL, \"t\" TEXT, {});\nINSERT INTO g (\"a\", \"t\") VALUES (2, 'hi');",
        definitions.join(", ")
    ))
    .unwrap();
    let row: (f64, String, String, String) = conn
        .query_row("SELECT total, shout, today, label FROM g", [], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })
        .unwrap();
    assert_eq!(
        row,
        (
            3.0,
            "HI".to_string(),
            "2024-03-05T00:00:00.000Z".to_string(),
            "yes".to_string()
        )
    );
}

#[test]
fn postgres_output_shapes() {
    let emitter = postgres(EmitContext::Select);
    let joined = render(emitter, "CONCATENATE", &["\"t\"", "1", "NULL"]);
    assert!(joined.contains(" || "), "{joined}");
    assert!(joined.contains("COALESCE(\"t\", '')"), "{joined}");
    let avg = render(emitter, "AVERAGE", &["\"a\"", "\"b\""]);
    assert!(avg.contains("jsonb_array_elements"), "{avg}");
    assert!(balanced(&avg), "{avg}");
}

fn placeholder_args(function: FormulaFunction) -> Vec<String> {
    vec!["'1'".to_string(); function.arity().min]
}

/// Every function renders for every target, except the ones a dialect
/// cannot express and the subquery-backed ones in generated columns.
#[test]
fn coverage_matrix() {
    let cx = cx();
    for function in FormulaFunction::iter() {
        let list = placeholder_args(function);
        for dialect in [Dialect::Postgres, Dialect::Sqlite] {
            for context in [EmitContext::Select, EmitContext::GeneratedColumn] {
                let emitter = FormulaEmitter::new(dialect, context);
                let result = emitter.render_function(&cx, function, &list, &[]);
                let missing = dialect == Dialect::Sqlite
                    && matches!(
                        function,
                        FormulaFunction::RegexpReplace | FormulaFunction::EncodeUrlComponent
                    );
                match result {
                    Ok(sql) => {
                        assert!(!missing, "{function} should be unsupported");
                        assert!(balanced(&sql), "{function} {dialect:?} {context:?}: {sql}");
                    }
                    Err(Error::UnsupportedFunction(_)) => {
                        assert!(missing, "{function} missing for {dialect:?}")
                    }
                    Err(Error::RequiresSubquery { .. }) => {
                        assert_eq!(context, EmitContext::GeneratedColumn, "{function}")
                    }
                    Err(e) => panic!("{function} {dialect:?} {context:?}: {e}"),
                }
            }
        }
    }
}

const ARG_SHAPES: &[&str] = &[
    "NULL",
    "''",
    "'x'",
    "'it''s'",
    "'2024-03-05'",
    "1",
    "-2.5",
    "TRUE",
    "\"a\"",
    "\"b\"",
    "\"t\"",
    "\"j\"",
    "\"d\"",
    "\"unknown\"",
    "(\"a\" + 1)",
    "f(x)",
];

proptest! {
    #[test]
    fn rendering_never_panics_and_stays_balanced(
        function in prop::sample::select(FormulaFunction::iter().collect::<Vec<_>>()),
        shapes in prop::collection::vec(prop::sample::select(ARG_SHAPES), 0..5),
        sqlite_dialect: bool,
        select: bool,
    ) {
        let dialect = if sqlite_dialect { Dialect::Sqlite } else { Dialect::Postgres };
        let context = if select { EmitContext::Select } else { EmitContext::GeneratedColumn };
        let list: Vec<String> = shapes.iter().map(|s| s.to_string()).collect();
        if let Ok(sql) = FormulaEmitter::new(dialect, context).render_function(&cx(), function, &list, &[]) {
            prop_assert!(balanced(&sql), "{}", sql);
        }
    }
}

/// Runs rendered Postgres output against a live server. Set `DATABASE_URL`
/// (for example `postgres://postgres@localhost/postgres`) to enable.
mod live_postgres {
    use ::postgres::{Client, NoTls};

    use super::*;

    fn connect() -> Option<Client> {
        let url = std::env::var("DATABASE_URL").ok()?;
        let mut client = Client::connect(&url, NoTls).unwrap_or_else(|e| panic!("{url}: {e}"));
        client.batch_execute("SET TIME ZONE 'UTC'").unwrap();
        Some(client)
    }

    /// Evaluates `sql` as text against a one-row relation whose `"t"` is
    /// `value`.
    fn eval(client: &mut Client, sql: &str, value: Option<&str>) -> Option<String> {
        let query = format!("SELECT CAST(({sql}) AS TEXT) FROM (VALUES ($1::text)) AS rec(\"t\")");
        client
            .query_one(query.as_str(), &[&value])
            .unwrap_or_else(|e| panic!("{e}: {query}"))
            .get(0)
    }

    fn parse(format: &str) -> String {
        render(postgres(EmitContext::Select), "DATETIME_PARSE", &["\"t\"", format])
    }

    #[test]
    fn parsing_with_names_and_unpadded_fields() {
        let Some(mut client) = connect() else { return };
        for (input, format, expected) in [
            ("05 Foo 2024", "'DD Mon YYYY'", None),
            ("05 Xyzzy 2024", "'DD Month YYYY'", None),
            ("31 February 2024", "'DD Month YYYY'", None),
            ("29 February 2024", "'DD Month YYYY'", Some("2024-02-29 00:00:00+00")),
            ("05 Mar 2024", "'DD Mon YYYY'", Some("2024-03-05 00:00:00+00")),
            ("05 mar 2024", "'DD Mon YYYY'", Some("2024-03-05 00:00:00+00")),
            ("2024-3-5 10:00", "'YYYY-MM-DD HH24:MI'", Some("2024-03-05 10:00:00+00")),
            ("2024-03-05 10:00", "'YYYY-MM-DD HH24:MI'", Some("2024-03-05 10:00:00+00")),
            ("2024-02-30 10:00", "'YYYY-MM-DD HH24:MI'", None),
        ] {
            assert_eq!(
                eval(&mut client, &parse(format), Some(input)).as_deref(),
                expected,
                "{input} / {format}"
            );
        }
    }

    #[test]
    fn guarded_parses_never_raise() {
        let Some(mut client) = connect() else { return };
        let inputs = [
            "",
            "x",
            "0000-00-00 00:00",
            "2024-13-05 10:00",
            "2024-02-30 25:61",
            "31/02/2024",
            "99 Xyz 0000",
            "05 Foo 2024",
            "Feb 30 2024 13:00 PM",
            "2024-3-5 10:00",
            "12:99",
            "9999999-01-01",
        ];
        let formats = [
            "'DD Mon YYYY'",
            "'DD Month YYYY'",
            "'YYYY-MM-DD HH24:MI'",
            "'YYYY-MM-DD'",
            "'MM/DD/YYYY'",
            "'Mon DD YYYY HH12:MI AM'",
            "'DDD YYYY'",
        ];
        for format in formats {
            let Ok(sql) = postgres(EmitContext::Select).render(
                &cx(),
                "DATETIME_PARSE",
                &args(&["\"t\"", format]),
                &[],
            ) else {
                continue;
            };
            for input in inputs {
                eval(&mut client, &sql, Some(input));
            }
        }
        eval(&mut client, &parse("'YYYY-MM-DD'"), None);
    }

    #[test]
    fn text_truthiness() {
        let Some(mut client) = connect() else { return };
        let sql = render(postgres(EmitContext::Select), "IF", &["\"t\"", "1", "2"]);
        for (value, expected) in [
            (Some("null"), "2"),
            (Some("NULL"), "2"),
            (Some(""), "2"),
            (None, "2"),
            (Some("x"), "1"),
        ] {
            assert_eq!(
                eval(&mut client, &sql, value).as_deref(),
                Some(expected),
                "{value:?}"
            );
        }
    }

    #[test]
    fn distance_from_now_is_never_negative() {
        let Some(mut client) = connect() else { return };
        for date in ["'2030-01-01'", "'2001-01-01'"] {
            let sql = render(postgres(EmitContext::Select), "FROM_NOW", &[date, "'day'"]);
            let days: f64 = eval(&mut client, &sql, None)
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(|| panic!("{sql}"));
            assert!(days > 365.0, "{date}: {days}");
        }
    }
}
