use crate::sql::{
    BinaryOp, Expression, FromItem, PostfixOp, Select, SqlType, UnaryOp, When, is_atomic,
    quote_ident, quote_literal,
};
use std::{
    fmt::{Display, Formatter, Result},
    rc::Rc,
};

/// What differs between dialects at print time.
pub trait PrinterContext: std::fmt::Debug {
    fn type_name(&self, ty: SqlType) -> &'static str;
    fn write_bool(&self, out: &mut Formatter<'_>, v: bool) -> Result;
    fn write_typed_literal(&self, out: &mut Formatter<'_>, ty: SqlType, v: &str) -> Result;
    /// Whether `AS alias(col, ...)` column lists are accepted on FROM items.
    fn column_aliases(&self) -> bool;
    fn box_clone(&self) -> Box<dyn PrinterContext>;
}

impl Clone for Box<dyn PrinterContext> {
    fn clone(&self) -> Box<dyn PrinterContext> {
        self.box_clone()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PostgresPrinterContext;

impl PrinterContext for PostgresPrinterContext {
    fn type_name(&self, ty: SqlType) -> &'static str {
        match ty {
            SqlType::Double => "DOUBLE PRECISION",
            SqlType::Numeric => "NUMERIC",
            SqlType::Integer => "INTEGER",
            SqlType::Text => "TEXT",
            SqlType::Timestamp => "TIMESTAMP",
            SqlType::TimestampTz => "TIMESTAMPTZ",
            SqlType::Date => "DATE",
            SqlType::Jsonb => "JSONB",
        }
    }
    fn write_bool(&self, out: &mut Formatter<'_>, v: bool) -> Result {
        out.write_str(if v { "TRUE" } else { "FALSE" })
    }
    fn write_typed_literal(&self, out: &mut Formatter<'_>, ty: SqlType, v: &str) -> Result {
        write!(out, "{} {}", self.type_name(ty), quote_literal(v))
    }
    fn column_aliases(&self) -> bool {
        true
    }
    fn box_clone(&self) -> Box<dyn PrinterContext> {
        Box::new(*self)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SqlitePrinterContext;

impl PrinterContext for SqlitePrinterContext {
    fn type_name(&self, ty: SqlType) -> &'static str {
        match ty {
            SqlType::Double => "REAL",
            SqlType::Numeric => "NUMERIC",
            SqlType::Integer => "INTEGER",
            SqlType::Text
            | SqlType::Timestamp
            | SqlType::TimestampTz
            | SqlType::Date
            | SqlType::Jsonb => "TEXT",
        }
    }
    fn write_bool(&self, out: &mut Formatter<'_>, v: bool) -> Result {
        out.write_str(if v { "1" } else { "0" })
    }
    // datetimes are ISO text already
    fn write_typed_literal(&self, out: &mut Formatter<'_>, _: SqlType, v: &str) -> Result {
        out.write_str(&quote_literal(v))
    }
    fn column_aliases(&self) -> bool {
        false
    }
    fn box_clone(&self) -> Box<dyn PrinterContext> {
        Box::new(*self)
    }
}

#[derive(Debug, Clone)]
pub struct PrinterConfig {
    pub context: Box<dyn PrinterContext>,
}

impl PrinterConfig {
    pub fn postgres() -> Self {
        Self {
            context: Box::new(PostgresPrinterContext),
        }
    }

    pub fn sqlite() -> Self {
        Self {
            context: Box::new(SqlitePrinterContext),
        }
    }
}

impl Default for PrinterConfig {
    fn default() -> Self {
        Self::postgres()
    }
}

pub struct Printer<T> {
    tree: T,
    config: PrinterConfig,
}

impl<T> Printer<T> {
    pub fn new(tree: T, config: PrinterConfig) -> Self {
        Self { tree, config }
    }
}

pub trait ToSQL {
    fn to_sql(&self, out: &mut Formatter, conf: &PrinterConfig) -> Result;
}

impl<T> ToSQL for Box<T>
where
    T: ToSQL,
{
    fn to_sql(&self, out: &mut Formatter, conf: &PrinterConfig) -> Result {
        self.as_ref().to_sql(out, conf)
    }
}

impl<T> ToSQL for Rc<T>
where
    T: ToSQL,
{
    fn to_sql(&self, out: &mut Formatter, conf: &PrinterConfig) -> Result {
        self.as_ref().to_sql(out, conf)
    }
}

impl<T> Display for Printer<T>
where
    T: ToSQL,
{
    fn fmt(&self, f: &mut Formatter) -> Result {
        self.tree.to_sql(f, &self.config)
    }
}

impl ToSQL for BinaryOp {
    fn to_sql(&self, out: &mut Formatter, _: &PrinterConfig) -> Result {
        match self {
            BinaryOp::Add => write!(out, " + "),
            BinaryOp::Sub => write!(out, " - "),
            BinaryOp::Mul => write!(out, " * "),
            BinaryOp::Div => write!(out, " / "),
            BinaryOp::Mod => write!(out, " % "),

            BinaryOp::Eq => write!(out, " = "),
            BinaryOp::Ne => write!(out, " <> "),
            BinaryOp::Lt => write!(out, " < "),
            BinaryOp::Le => write!(out, " <= "),
            BinaryOp::Gt => write!(out, " > "),
            BinaryOp::Ge => write!(out, " >= "),
            BinaryOp::And => write!(out, " AND "),
            BinaryOp::Or => write!(out, " OR "),
            BinaryOp::Concat => write!(out, " || "),
            BinaryOp::RegexMatch => write!(out, " ~ "),
            BinaryOp::Glob => write!(out, " GLOB "),
            BinaryOp::JsonGetText => write!(out, " ->> "),
            BinaryOp::JsonPathText => write!(out, " #>> "),
        }
    }
}

fn write_list<T: ToSQL>(out: &mut Formatter, conf: &PrinterConfig, items: &[T]) -> Result {
    let mut is_first = true;
    for item in items {
        if is_first {
            is_first = false;
        } else {
            write!(out, ", ")?;
        }
        item.to_sql(out, conf)?;
    }
    Ok(())
}

impl ToSQL for Expression {
    fn to_sql(&self, out: &mut Formatter, conf: &PrinterConfig) -> Result {
        match self {
            Expression::Null => write!(out, "NULL"),
            Expression::BoolLiteral(v) => conf.context.write_bool(out, *v),
            // a leading minus would merge with a preceding one into a comment
            Expression::NumberLiteral(v) if v.starts_with('-') => write!(out, "({v})"),
            Expression::NumberLiteral(v) => write!(out, "{v}"),
            Expression::StringLiteral(v) => out.write_str(&quote_literal(v)),
            Expression::TypedLiteral(ty, v) => conf.context.write_typed_literal(out, *ty, v),
            Expression::Identifier { qualifier, name } => {
                if let Some(qualifier) = qualifier {
                    write!(out, "{}.", quote_ident(qualifier))?;
                }
                out.write_str(&quote_ident(name))
            }
            Expression::Fragment(sql) => {
                if is_atomic(sql) {
                    out.write_str(sql.trim())
                } else {
                    write!(out, "({})", sql.trim())
                }
            }
            Expression::FunctionCall { name, args } => {
                write!(out, "{name}(")?;
                write_list(out, conf, args)?;
                write!(out, ")")
            }
            Expression::AggregateCall {
                name,
                args,
                order_by,
            } => {
                write!(out, "{name}(")?;
                write_list(out, conf, args)?;
                if !order_by.is_empty() {
                    write!(out, " ORDER BY ")?;
                    write_list(out, conf, order_by)?;
                }
                write!(out, ")")
            }
            Expression::WindowCall {
                name,
                args,
                partition_by,
                order_by,
            } => {
                write!(out, "{name}(")?;
                write_list(out, conf, args)?;
                write!(out, ") OVER (")?;
                if !partition_by.is_empty() {
                    write!(out, "PARTITION BY ")?;
                    write_list(out, conf, partition_by)?;
                }
                if !order_by.is_empty() {
                    if !partition_by.is_empty() {
                        write!(out, " ")?;
                    }
                    write!(out, "ORDER BY ")?;
                    write_list(out, conf, order_by)?;
                }
                write!(out, ")")
            }
            Expression::BinaryOperator(l, op, r) => {
                // every binary operator is parenthesized, so precedence never
                //  depends on the surrounding expression
                write!(out, "(")?;
                l.to_sql(out, conf)?;
                op.to_sql(out, conf)?;
                r.to_sql(out, conf)?;
                write!(out, ")")
            }
            Expression::BinaryOperatorSequence(op, operands) => {
                write!(out, "(")?;
                let mut is_first = true;
                for operand in operands {
                    if is_first {
                        is_first = false;
                    } else {
                        op.to_sql(out, conf)?;
                    }
                    operand.to_sql(out, conf)?;
                }
                write!(out, ")")
            }
            Expression::UnaryOperator(op, exp) => {
                write!(out, "(")?;
                match op {
                    UnaryOp::Not => write!(out, "NOT "),
                    UnaryOp::Neg => write!(out, "-"),
                }?;
                exp.to_sql(out, conf)?;
                write!(out, ")")
            }
            Expression::Postfix(exp, op) => {
                write!(out, "(")?;
                exp.to_sql(out, conf)?;
                match op {
                    PostfixOp::IsNull => write!(out, " IS NULL)"),
                    PostfixOp::IsNotNull => write!(out, " IS NOT NULL)"),
                }
            }
            Expression::InList {
                expr,
                list,
                negated,
            } => {
                write!(out, "(")?;
                expr.to_sql(out, conf)?;
                write!(out, "{} (", if *negated { " NOT IN" } else { " IN" })?;
                write_list(out, conf, list)?;
                write!(out, "))")
            }
            Expression::Cast(expr, to) => {
                write!(out, "CAST(")?;
                expr.to_sql(out, conf)?;
                write!(out, " AS {})", conf.context.type_name(*to))
            }
            Expression::Case {
                operand,
                branches,
                r#else,
            } => {
                write!(out, "CASE")?;
                if let Some(operand) = operand {
                    write!(out, " ")?;
                    operand.to_sql(out, conf)?;
                }
                for When { cond, then } in branches {
                    write!(out, " WHEN ")?;
                    cond.to_sql(out, conf)?;
                    write!(out, " THEN ")?;
                    then.to_sql(out, conf)?;
                }
                if let Some(r#else) = r#else {
                    write!(out, " ELSE ")?;
                    r#else.to_sql(out, conf)?;
                }
                write!(out, " END")
            }
            Expression::AtTimeZone(expr, zone) => {
                write!(out, "(")?;
                expr.to_sql(out, conf)?;
                write!(out, " AT TIME ZONE ")?;
                zone.to_sql(out, conf)?;
                write!(out, ")")
            }
            Expression::Extract(field, expr) => {
                write!(out, "EXTRACT({field} FROM ")?;
                expr.to_sql(out, conf)?;
                write!(out, ")")
            }
            Expression::Subscript(array, index) => {
                write!(out, "(")?;
                array.to_sql(out, conf)?;
                write!(out, ")[")?;
                index.to_sql(out, conf)?;
                write!(out, "]")
            }
            Expression::Slice {
                array,
                lower,
                upper,
            } => {
                write!(out, "(")?;
                array.to_sql(out, conf)?;
                write!(out, ")[")?;
                if let Some(lower) = lower {
                    lower.to_sql(out, conf)?;
                }
                write!(out, ":")?;
                if let Some(upper) = upper {
                    upper.to_sql(out, conf)?;
                }
                write!(out, "]")
            }
            Expression::Subquery(select) => {
                write!(out, "(")?;
                select.to_sql(out, conf)?;
                write!(out, ")")
            }
        }
    }
}

impl ToSQL for Select {
    fn to_sql(&self, out: &mut Formatter, conf: &PrinterConfig) -> Result {
        if let Some(cte) = &self.with_recursive {
            write!(out, "WITH RECURSIVE {}", quote_ident(&cte.name))?;
            let quoted: Vec<String> = cte.columns.iter().map(|c| quote_ident(c)).collect();
            write!(out, "({}) AS (", quoted.join(", "))?;
            cte.anchor.to_sql(out, conf)?;
            write!(out, " UNION ALL ")?;
            cte.step.to_sql(out, conf)?;
            write!(out, ") ")?;
        }
        write!(out, "SELECT ")?;
        let mut is_first = true;
        for (expr, alias) in &self.projection {
            if is_first {
                is_first = false;
            } else {
                write!(out, ", ")?;
            }
            expr.to_sql(out, conf)?;
            if let Some(alias) = alias {
                write!(out, " AS {}", quote_ident(alias))?;
            }
        }
        if let Some(from) = &self.from {
            write!(out, " FROM ")?;
            from.to_sql(out, conf)?;
        }
        if let Some(join) = &self.left_join {
            write!(out, " LEFT JOIN ")?;
            join.to_sql(out, conf)?;
            write!(out, " ON TRUE")?;
        }
        if let Some(filter) = &self.filter {
            write!(out, " WHERE ")?;
            filter.to_sql(out, conf)?;
        }
        if !self.order_by.is_empty() {
            write!(out, " ORDER BY ")?;
            write_list(out, conf, &self.order_by)?;
        }
        Ok(())
    }
}

fn write_alias(out: &mut Formatter, conf: &PrinterConfig, alias: &str, columns: &[String]) -> Result {
    write!(out, " AS {}", quote_ident(alias))?;
    if !columns.is_empty() && conf.context.column_aliases() {
        let quoted: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
        write!(out, "({})", quoted.join(", "))?;
    }
    Ok(())
}

impl ToSQL for FromItem {
    fn to_sql(&self, out: &mut Formatter, conf: &PrinterConfig) -> Result {
        match self {
            FromItem::Table(name) => out.write_str(&quote_ident(name)),
            FromItem::TableFunction {
                call,
                ordinality,
                alias,
                columns,
            } => {
                call.to_sql(out, conf)?;
                if *ordinality {
                    write!(out, " WITH ORDINALITY")?;
                }
                write_alias(out, conf, alias, columns)
            }
            FromItem::Derived {
                queries,
                alias,
                columns,
            } => {
                write!(out, "(")?;
                let mut is_first = true;
                for query in queries {
                    if is_first {
                        is_first = false;
                    } else {
                        write!(out, " UNION ALL ")?;
                    }
                    query.to_sql(out, conf)?;
                }
                write!(out, ")")?;
                write_alias(out, conf, alias, columns)
            }
        }
    }
}
