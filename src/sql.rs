//! The SQL side of translation: a small expression tree that every emitter
//! builds instead of concatenating strings. The printer in `to_sql` is the
//! only place that turns it into text, and it owns parenthesization and
//! quoting.

use std::rc::Rc;

pub type ExprRef = Rc<Expression>;

pub fn expr_ref(expr: Expression) -> ExprRef {
    Rc::new(expr)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Concat,
    /// POSIX regex match (`~`), Postgres only
    RegexMatch,
    Glob,
    /// `->>`, Postgres only
    JsonGetText,
    /// `#>>`, Postgres only
    JsonPathText,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostfixOp {
    IsNull,
    IsNotNull,
}

/// Target types for `CAST`; each dialect prints its own spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Double,
    Numeric,
    Integer,
    Text,
    Timestamp,
    TimestampTz,
    Date,
    Jsonb,
}

/// A WHEN branch for CASE
#[derive(Debug, Clone, PartialEq)]
pub struct When {
    pub cond: ExprRef,
    pub then: ExprRef,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Null,
    BoolLiteral(bool),
    NumberLiteral(String),
    /// Unescaped content; the printer quotes it.
    StringLiteral(String),
    /// `TIMESTAMPTZ '...'`: a constant the engine resolves at parse time.
    TypedLiteral(SqlType, String),
    Identifier {
        qualifier: Option<String>,
        name: String,
    },
    /// SQL that was rendered before it reached us (a child node). Printed
    /// verbatim, parenthesized unless it is atomic.
    Fragment(String),
    FunctionCall {
        name: String,
        args: Vec<ExprRef>,
    },
    /// Aggregate with an ordered input: `jsonb_agg(v ORDER BY s, n)`
    AggregateCall {
        name: String,
        args: Vec<ExprRef>,
        order_by: Vec<ExprRef>,
    },
    WindowCall {
        name: String,
        args: Vec<ExprRef>,
        partition_by: Vec<ExprRef>,
        order_by: Vec<ExprRef>,
    },
    BinaryOperator(ExprRef, BinaryOp, ExprRef),
    // This is an optimization of BinaryOperator for things like:
    //   a + b + c + d
    // OR
    //   a || b || c
    BinaryOperatorSequence(BinaryOp, Vec<ExprRef>),
    UnaryOperator(UnaryOp, ExprRef),
    Postfix(ExprRef, PostfixOp),
    InList {
        expr: ExprRef,
        list: Vec<ExprRef>,
        negated: bool,
    },
    Cast(ExprRef, SqlType),
    Case {
        operand: Option<ExprRef>,
        branches: Vec<When>,
        r#else: Option<ExprRef>,
    },
    AtTimeZone(ExprRef, ExprRef),
    Extract(&'static str, ExprRef),
    /// `(array)[index]`
    Subscript(ExprRef, ExprRef),
    /// `(array)[lower:upper]`, either bound optional
    Slice {
        array: ExprRef,
        lower: Option<ExprRef>,
        upper: Option<ExprRef>,
    },
    Subquery(Box<Select>),
}

/// A scalar subquery body.
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub with_recursive: Option<Box<Cte>>,
    pub projection: Vec<(ExprRef, Option<String>)>,
    pub from: Option<FromItem>,
    pub left_join: Option<FromItem>,
    pub filter: Option<ExprRef>,
    pub order_by: Vec<ExprRef>,
}

/// `WITH RECURSIVE name(columns) AS (anchor UNION ALL step)`
#[derive(Debug, Clone, PartialEq)]
pub struct Cte {
    pub name: String,
    pub columns: Vec<String>,
    pub anchor: Select,
    pub step: Select,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FromItem {
    /// A named relation, such as a CTE.
    Table(String),
    /// `json_each(x) AS e` / `jsonb_array_elements(x) WITH ORDINALITY AS e(v, n)`
    TableFunction {
        call: ExprRef,
        ordinality: bool,
        alias: String,
        columns: Vec<String>,
    },
    /// `(q1 UNION ALL q2 ...) AS alias(columns)`
    Derived {
        queries: Vec<Select>,
        alias: String,
        columns: Vec<String>,
    },
}

impl Select {
    pub fn new(projection: ExprRef) -> Self {
        Self {
            with_recursive: None,
            projection: vec![(projection, None)],
            from: None,
            left_join: None,
            filter: None,
            order_by: Vec::new(),
        }
    }

    pub fn columns(projection: Vec<(ExprRef, Option<String>)>) -> Self {
        Self {
            projection,
            ..Self::new(null())
        }
    }

    pub fn with_recursive(mut self, cte: Cte) -> Self {
        self.with_recursive = Some(Box::new(cte));
        self
    }

    pub fn from(mut self, item: FromItem) -> Self {
        self.from = Some(item);
        self
    }

    pub fn left_join(mut self, item: FromItem) -> Self {
        self.left_join = Some(item);
        self
    }

    pub fn filter(mut self, cond: ExprRef) -> Self {
        self.filter = Some(cond);
        self
    }

    pub fn order_by(mut self, keys: Vec<ExprRef>) -> Self {
        self.order_by = keys;
        self
    }

    pub fn into_expr(self) -> ExprRef {
        expr_ref(Expression::Subquery(Box::new(self)))
    }
}

impl FromItem {
    pub fn table_function(call: ExprRef, alias: &str, columns: &[&str]) -> Self {
        FromItem::TableFunction {
            call,
            ordinality: false,
            alias: alias.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
        }
    }

    pub fn with_ordinality(call: ExprRef, alias: &str, columns: &[&str]) -> Self {
        FromItem::TableFunction {
            call,
            ordinality: true,
            alias: alias.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
        }
    }

    pub fn union_all(queries: Vec<Select>, alias: &str, columns: &[&str]) -> Self {
        FromItem::Derived {
            queries,
            alias: alias.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
        }
    }
}

// Node constructors, one per expression variant.

pub fn null() -> ExprRef {
    expr_ref(Expression::Null)
}

pub fn bool_lit(v: bool) -> ExprRef {
    expr_ref(Expression::BoolLiteral(v))
}

pub fn num(v: impl ToString) -> ExprRef {
    expr_ref(Expression::NumberLiteral(v.to_string()))
}

pub fn text(v: impl Into<String>) -> ExprRef {
    expr_ref(Expression::StringLiteral(v.into()))
}

pub fn fragment(sql: impl Into<String>) -> ExprRef {
    expr_ref(Expression::Fragment(sql.into()))
}

pub fn ident(qualifier: Option<&str>, name: &str) -> ExprRef {
    expr_ref(Expression::Identifier {
        qualifier: qualifier.map(str::to_string),
        name: name.to_string(),
    })
}

pub fn call(name: &str, args: Vec<ExprRef>) -> ExprRef {
    expr_ref(Expression::FunctionCall {
        name: name.to_string(),
        args,
    })
}

pub fn aggregate(name: &str, args: Vec<ExprRef>, order_by: Vec<ExprRef>) -> ExprRef {
    expr_ref(Expression::AggregateCall {
        name: name.to_string(),
        args,
        order_by,
    })
}

pub fn window(
    name: &str,
    args: Vec<ExprRef>,
    partition_by: Vec<ExprRef>,
    order_by: Vec<ExprRef>,
) -> ExprRef {
    expr_ref(Expression::WindowCall {
        name: name.to_string(),
        args,
        partition_by,
        order_by,
    })
}

pub fn binop(l: ExprRef, op: BinaryOp, r: ExprRef) -> ExprRef {
    expr_ref(Expression::BinaryOperator(l, op, r))
}

pub fn seq(op: BinaryOp, items: Vec<ExprRef>) -> ExprRef {
    match items.len() {
        1 => items.into_iter().next().unwrap_or_else(null),
        _ => expr_ref(Expression::BinaryOperatorSequence(op, items)),
    }
}

pub fn not(e: ExprRef) -> ExprRef {
    expr_ref(Expression::UnaryOperator(UnaryOp::Not, e))
}

pub fn neg(e: ExprRef) -> ExprRef {
    expr_ref(Expression::UnaryOperator(UnaryOp::Neg, e))
}

pub fn is_null(e: ExprRef) -> ExprRef {
    expr_ref(Expression::Postfix(e, PostfixOp::IsNull))
}

pub fn is_not_null(e: ExprRef) -> ExprRef {
    expr_ref(Expression::Postfix(e, PostfixOp::IsNotNull))
}

pub fn cast(e: ExprRef, ty: SqlType) -> ExprRef {
    expr_ref(Expression::Cast(e, ty))
}

pub fn coalesce(args: Vec<ExprRef>) -> ExprRef {
    call("COALESCE", args)
}

pub fn nullif(e: ExprRef, v: ExprRef) -> ExprRef {
    call("NULLIF", vec![e, v])
}

pub fn in_list(e: ExprRef, list: Vec<ExprRef>, negated: bool) -> ExprRef {
    expr_ref(Expression::InList {
        expr: e,
        list,
        negated,
    })
}

pub fn when(cond: ExprRef, then: ExprRef) -> When {
    When { cond, then }
}

pub fn case(branches: Vec<When>, r#else: Option<ExprRef>) -> ExprRef {
    expr_ref(Expression::Case {
        operand: None,
        branches,
        r#else,
    })
}

pub fn case_on(operand: ExprRef, branches: Vec<When>, r#else: Option<ExprRef>) -> ExprRef {
    expr_ref(Expression::Case {
        operand: Some(operand),
        branches,
        r#else,
    })
}

/// `CASE WHEN cond THEN a ELSE b END`
pub fn iif(cond: ExprRef, a: ExprRef, b: ExprRef) -> ExprRef {
    case(vec![when(cond, a)], Some(b))
}

pub fn at_time_zone(e: ExprRef, zone: ExprRef) -> ExprRef {
    expr_ref(Expression::AtTimeZone(e, zone))
}

pub fn extract(field: &'static str, e: ExprRef) -> ExprRef {
    expr_ref(Expression::Extract(field, e))
}

pub fn subscript(array: ExprRef, index: usize) -> ExprRef {
    expr_ref(Expression::Subscript(array, num(index)))
}

// --- classification of rendered fragments ---------------------------------
//
// Child SQL reaches the emitters as text. When no metadata describes an
//  argument we fall back to reading its literal shape.

/// Position of the bracket that closes the one opened at `open`, skipping
/// quoted sections.
fn matching_close(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut i = open;
    while i < bytes.len() {
        match bytes[i] {
            q @ (b'\'' | b'"' | b'`') => {
                i += 1;
                loop {
                    if i >= bytes.len() {
                        return None;
                    }
                    if bytes[i] == q {
                        // a doubled quote is an escaped quote
                        if bytes.get(i + 1) == Some(&q) {
                            i += 2;
                            continue;
                        }
                        break;
                    }
                    i += 1;
                }
            }
            b'(' => depth += 1,
            b')' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// Length of the quoted token starting at byte 0 (including both quotes).
fn quoted_len(bytes: &[u8]) -> Option<usize> {
    let q = *bytes.first()?;
    if !matches!(q, b'\'' | b'"' | b'`') {
        return None;
    }
    let mut i = 1;
    while i < bytes.len() {
        if bytes[i] == q {
            if bytes.get(i + 1) == Some(&q) {
                i += 2;
                continue;
            }
            return Some(i + 1);
        }
        i += 1;
    }
    None
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Strips one pair of outer parentheses when they enclose the whole text.
pub fn strip_parens(sql: &str) -> &str {
    let mut s = sql.trim();
    while s.starts_with('(') && matching_close(s.as_bytes(), 0) == Some(s.len() - 1) {
        s = s[1..s.len() - 1].trim();
    }
    s
}

/// True when the fragment can be embedded as an operand without extra
/// parentheses: literals, (qualified) identifiers, function calls and fully
/// parenthesized text. Negative numbers are not atomic: `a - -1` would
/// start a comment.
pub fn is_atomic(sql: &str) -> bool {
    let s = sql.trim();
    let bytes = s.as_bytes();
    if bytes.is_empty() {
        return false;
    }
    if bytes[0] == b'(' {
        return matching_close(bytes, 0) == Some(bytes.len() - 1);
    }
    if numeric_literal(s).is_some() && !s.starts_with('-') && !s.starts_with('+') {
        return true;
    }

    // a chain of quoted/bare identifiers, optionally followed by a call
    let mut i = 0;
    loop {
        if let Some(len) = quoted_len(&bytes[i..]) {
            i += len;
        } else {
            let start = i;
            while i < bytes.len() && is_word_byte(bytes[i]) {
                i += 1;
            }
            if i == start {
                return false;
            }
        }
        if i == bytes.len() {
            // a lone string literal or identifier chain
            return true;
        }
        match bytes[i] {
            b'.' => i += 1,
            b'(' => return matching_close(bytes, i) == Some(bytes.len() - 1),
            _ => return false,
        }
    }
}

/// Parses a bare numeric literal (optionally signed, optionally in one pair
/// of parentheses).
pub fn numeric_literal(sql: &str) -> Option<f64> {
    let s = strip_parens(sql);
    let body = s.strip_prefix(['-', '+']).unwrap_or(s);
    let mut digits = 0;
    let mut dots = 0;
    let mut exponent = false;
    for (i, c) in body.char_indices() {
        match c {
            '0'..='9' => digits += 1,
            '.' if !exponent => dots += 1,
            'e' | 'E' if digits > 0 && !exponent => {
                exponent = true;
                let rest = &body[i + 1..];
                let rest = rest.strip_prefix(['-', '+']).unwrap_or(rest);
                if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                break;
            }
            _ => return None,
        }
    }
    if digits == 0 || dots > 1 {
        return None;
    }
    s.parse().ok()
}

/// Parses a single-quoted string literal, undoing `''` escapes.
pub fn string_literal(sql: &str) -> Option<String> {
    let s = strip_parens(sql);
    let bytes = s.as_bytes();
    if bytes.first() != Some(&b'\'') || quoted_len(bytes) != Some(bytes.len()) {
        return None;
    }
    Some(s[1..s.len() - 1].replace("''", "'"))
}

pub fn is_null_literal(sql: &str) -> bool {
    strip_parens(sql).eq_ignore_ascii_case("NULL")
}

pub fn bool_literal(sql: &str) -> Option<bool> {
    let s = strip_parens(sql);
    if s.eq_ignore_ascii_case("TRUE") {
        Some(true)
    } else if s.eq_ignore_ascii_case("FALSE") {
        Some(false)
    } else {
        None
    }
}

/// Reads a double-quoted or backtick-quoted column reference, optionally
/// qualified by a table alias: `"a"`, `"t"."a"`, `` `a` ``.
pub fn column_reference(sql: &str) -> Option<(Option<String>, String)> {
    let s = strip_parens(sql);
    let bytes = s.as_bytes();
    let unquote = |tok: &str| -> Option<String> {
        let q = tok.chars().next()?;
        if !matches!(q, '"' | '`') {
            return None;
        }
        let doubled: String = [q, q].iter().collect();
        Some(tok[1..tok.len() - 1].replace(&doubled, &q.to_string()))
    };

    let first = quoted_len(bytes)?;
    let head = unquote(&s[..first])?;
    if first == bytes.len() {
        return Some((None, head));
    }
    if bytes[first] != b'.' {
        return None;
    }
    let rest = &s[first + 1..];
    let second = quoted_len(rest.as_bytes())?;
    if second != rest.len() {
        return None;
    }
    Some((Some(head), unquote(rest)?))
}

/// Quotes an identifier with double quotes, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quotes a string literal with single quotes, doubling embedded quotes.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
