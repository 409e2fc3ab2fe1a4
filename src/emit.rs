//! Rendering of one formula call into SQL for a (dialect, context) target.
//!
//! The parser walks its tree bottom-up and hands each call's already
//! rendered arguments to [`FormulaEmitter::render`]. The dialect modules
//! intercept what they spell differently and fall through to
//! [`common::emit_fn_call`] for everything else.

use std::fmt;

use chrono::SecondsFormat;
use thiserror::Error;

use crate::{
    coercion::{Coercer, Operand, Zone, classify},
    context::ConversionContext,
    functions::FormulaFunction,
    metadata::ParamMetadata,
    sql::{self, ExprRef, fragment},
    to_sql::{Printer, PrinterConfig},
};

pub mod common;
pub mod postgres;
pub mod sqlite;

/// Compile-time failures. Bad row data never ends up here; it is turned
/// into NULL by the emitted SQL.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("unsupported function: {0}")]
    UnsupportedFunction(String),
    #[error("{function} expects {expected} argument(s), got {got}")]
    IncorrectArgCount {
        function: String,
        expected: String,
        got: usize,
    },
    #[error("argument {index} of {function} {reason}")]
    ArgWrongType {
        function: String,
        index: usize,
        reason: String,
    },
    #[error("{function} was given {args} argument(s) but {metadata} metadata record(s)")]
    MetadataMismatch {
        function: String,
        args: usize,
        metadata: usize,
    },
    #[error("{function} needs a subquery, which is not allowed in a generated column")]
    RequiresSubquery { function: String },
    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),
    #[error("unknown field: {0}")]
    UnknownField(String),
    #[error("invalid format {format:?}: {reason}")]
    InvalidFormat { format: String, reason: String },
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    Postgres,
    Sqlite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EmitContext {
    /// Stored computed column: deterministic, no subqueries.
    GeneratedColumn,
    /// Evaluated per query.
    Select,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Target {
    pub dialect: Dialect,
    pub context: EmitContext,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dialect = match self.dialect {
            Dialect::Postgres => "postgres",
            Dialect::Sqlite => "sqlite",
        };
        let context = match self.context {
            EmitContext::GeneratedColumn => "generated column",
            EmitContext::Select => "select",
        };
        write!(f, "{dialect} {context}")
    }
}

impl Target {
    pub fn printer_config(&self) -> PrinterConfig {
        match self.dialect {
            Dialect::Postgres => PrinterConfig::postgres(),
            Dialect::Sqlite => PrinterConfig::sqlite(),
        }
    }

    pub fn is_select(&self) -> bool {
        self.context == EmitContext::Select
    }

    /// 1-based position of `needle` in `haystack`, 0 when absent.
    pub fn strpos(&self, haystack: ExprRef, needle: ExprRef) -> ExprRef {
        match self.dialect {
            Dialect::Postgres => sql::call("STRPOS", vec![haystack, needle]),
            Dialect::Sqlite => sql::call("INSTR", vec![haystack, needle]),
        }
    }

    pub fn greatest(&self, args: Vec<ExprRef>) -> ExprRef {
        match self.dialect {
            Dialect::Postgres => sql::call("GREATEST", args),
            Dialect::Sqlite => sql::call("max", args),
        }
    }

    pub fn least(&self, args: Vec<ExprRef>) -> ExprRef {
        match self.dialect {
            Dialect::Postgres => sql::call("LEAST", args),
            Dialect::Sqlite => sql::call("min", args),
        }
    }

    /// A numeric argument truncated to an integer within `[min, max]`;
    /// blank reads as `min`. Keeps integer casts and position arithmetic
    /// from overflowing.
    pub fn bounded_int(&self, e: ExprRef, min: i64, max: i64) -> ExprRef {
        let bounded = self.greatest(vec![
            self.least(vec![sql::coalesce(vec![e, sql::num(min)]), sql::num(max)]),
            sql::num(min),
        ]);
        match self.dialect {
            // a plain cast would round
            Dialect::Postgres => sql::cast(sql::call("TRUNC", vec![bounded]), sql::SqlType::Integer),
            Dialect::Sqlite => sql::cast(bounded, sql::SqlType::Integer),
        }
    }
}

/// Upper bound for string positions and lengths; twice this still fits an
/// `INTEGER`.
pub const MAX_POSITION: i64 = 1_073_741_823;

/// One call being rendered: the function, its rendered arguments and their
/// metadata, and the job's context.
pub struct Call<'a> {
    pub function: FormulaFunction,
    pub target: Target,
    pub cx: &'a ConversionContext,
    pub args: &'a [String],
    pub metadata: &'a [ParamMetadata],
}

impl<'a> Call<'a> {
    pub fn has(&self, index: usize) -> bool {
        index < self.args.len()
    }

    fn raw(&self, index: usize) -> &'a str {
        self.args.get(index).map(String::as_str).unwrap_or("NULL")
    }

    pub fn arg(&self, index: usize) -> ExprRef {
        fragment(self.raw(index))
    }

    pub fn operand(&self, index: usize) -> Operand<'a> {
        classify(self.cx, self.raw(index), self.metadata.get(index))
    }

    pub fn operands(&self) -> Vec<Operand<'a>> {
        (0..self.args.len()).map(|i| self.operand(i)).collect()
    }

    pub fn coercer(&self) -> Coercer<'a> {
        Coercer::new(self.cx, self.target, self.function)
    }

    pub fn zone(&self, index: usize) -> Zone {
        self.coercer().zone(Some(&self.operand(index)))
    }

    pub fn wrong_type(&self, index: usize, reason: impl Into<String>) -> Error {
        Error::ArgWrongType {
            function: self.function.to_string(),
            index,
            reason: reason.into(),
        }
    }

    pub fn unsupported(&self) -> Error {
        Error::UnsupportedFunction(format!("{} is not available for {}", self.function, self.target))
    }

    /// The argument's value when it is a string literal.
    pub fn literal_text(&self, index: usize) -> Result<String, Error> {
        sql::string_literal(self.raw(index))
            .ok_or_else(|| self.wrong_type(index, "must be a string literal"))
    }

    /// The argument's value when it is a numeric literal.
    pub fn literal_number(&self, index: usize) -> Result<f64, Error> {
        sql::numeric_literal(self.raw(index))
            .ok_or_else(|| self.wrong_type(index, "must be a numeric literal"))
    }

    /// A system column, qualified with the table alias at select time.
    pub fn system_column(&self, name: &str) -> ExprRef {
        let qualifier = match self.target.context {
            EmitContext::Select => self.cx.table_alias(),
            EmitContext::GeneratedColumn => None,
        };
        sql::ident(qualifier, name)
    }
}

/// Renders formula calls for one target. Holds no per-job state; every
/// render gets the job's [`ConversionContext`] by reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormulaEmitter {
    target: Target,
}

impl FormulaEmitter {
    pub fn new(dialect: Dialect, context: EmitContext) -> Self {
        Self {
            target: Target { dialect, context },
        }
    }

    pub fn target(&self) -> Target {
        self.target
    }

    /// Renders one call by the name the parser uses for it.
    pub fn render(
        &self,
        cx: &ConversionContext,
        function: &str,
        args: &[String],
        metadata: &[ParamMetadata],
    ) -> Result<String, Error> {
        let function = FormulaFunction::lookup(function).ok_or_else(|| {
            Error::UnsupportedFunction(format!("{function} is not available for {}", self.target))
        })?;
        self.render_function(cx, function, args, metadata)
    }

    pub fn render_function(
        &self,
        cx: &ConversionContext,
        function: FormulaFunction,
        args: &[String],
        metadata: &[ParamMetadata],
    ) -> Result<String, Error> {
        let arity = function.arity();
        if !arity.accepts(args.len()) {
            return Err(Error::IncorrectArgCount {
                function: function.to_string(),
                expected: arity.to_string(),
                got: args.len(),
            });
        }
        if !metadata.is_empty() && metadata.len() != args.len() {
            return Err(Error::MetadataMismatch {
                function: function.to_string(),
                args: args.len(),
                metadata: metadata.len(),
            });
        }
        if let Some(index) = args.iter().position(|a| a.trim().is_empty()) {
            return Err(Error::ArgWrongType {
                function: function.to_string(),
                index,
                reason: "is empty".into(),
            });
        }

        tracing::trace!(%function, target = %self.target, args = args.len(), "rendering call");
        let call = Call {
            function,
            target: self.target,
            cx,
            args,
            metadata,
        };
        let expr = match self.target.dialect {
            Dialect::Postgres => postgres::emit_fn_call(&call)?,
            Dialect::Sqlite => sqlite::emit_fn_call(&call)?,
        };
        Ok(self.print(expr))
    }

    fn print(&self, expr: ExprRef) -> String {
        Printer::new(expr, self.target.printer_config()).to_string()
    }

    pub fn string_literal(&self, value: &str) -> String {
        sql::quote_literal(value)
    }

    /// Non-finite numbers have no SQL literal and render as NULL.
    pub fn number_literal(&self, value: f64) -> String {
        if !value.is_finite() {
            return self.null_literal();
        }
        self.print(sql::num(value))
    }

    pub fn boolean_literal(&self, value: bool) -> String {
        self.print(sql::bool_lit(value))
    }

    pub fn null_literal(&self) -> String {
        "NULL".to_string()
    }

    pub fn field_reference(&self, cx: &ConversionContext, field_id: &str) -> Result<String, Error> {
        let field = cx
            .catalog()
            .by_id(field_id)
            .ok_or_else(|| Error::UnknownField(field_id.to_string()))?;
        let qualifier = match self.target.context {
            EmitContext::Select => cx.table_alias(),
            EmitContext::GeneratedColumn => None,
        };
        Ok(self.print(sql::ident(qualifier, &field.db_field_name)))
    }

    /// The frozen clock as a literal of the target's datetime type.
    pub(crate) fn frozen_literal(instant: chrono::DateTime<chrono::Utc>) -> ExprRef {
        sql::expr_ref(sql::Expression::TypedLiteral(
            sql::SqlType::TimestampTz,
            instant.to_rfc3339_opts(SecondsFormat::Millis, true),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        context::FieldCatalog,
        metadata::{FieldDescriptor, StorageType},
    };

    fn cx() -> ConversionContext {
        ConversionContext::new(FieldCatalog::new(vec![FieldDescriptor::new(
            "fldA",
            "amount",
            StorageType::Real,
        )]))
        .with_table_alias("t")
    }

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn literals() {
        let pg = FormulaEmitter::new(Dialect::Postgres, EmitContext::Select);
        let lite = FormulaEmitter::new(Dialect::Sqlite, EmitContext::GeneratedColumn);
        assert_eq!(pg.string_literal("it's"), "'it''s'");
        assert_eq!(pg.number_literal(-1.5), "(-1.5)");
        assert_eq!(pg.number_literal(f64::NAN), "NULL");
        assert_eq!(pg.number_literal(f64::INFINITY), "NULL");
        assert_eq!(pg.boolean_literal(true), "TRUE");
        assert_eq!(lite.boolean_literal(true), "1");
        assert_eq!(lite.null_literal(), "NULL");
    }

    #[test]
    fn field_references_are_qualified_at_select_time() {
        let cx = cx();
        let select = FormulaEmitter::new(Dialect::Postgres, EmitContext::Select);
        let generated = FormulaEmitter::new(Dialect::Postgres, EmitContext::GeneratedColumn);
        assert_eq!(select.field_reference(&cx, "fldA").unwrap(), "\"t\".\"amount\"");
        assert_eq!(generated.field_reference(&cx, "fldA").unwrap(), "\"amount\"");
        assert_eq!(
            select.field_reference(&cx, "fldZ"),
            Err(Error::UnknownField("fldZ".into()))
        );
    }

    #[test]
    fn compile_time_errors() {
        let cx = cx();
        let emitter = FormulaEmitter::new(Dialect::Sqlite, EmitContext::Select);
        assert!(matches!(
            emitter.render(&cx, "NO_SUCH_FN", &[], &[]),
            Err(Error::UnsupportedFunction(_))
        ));
        assert_eq!(
            emitter.render(&cx, "ABS", &args(&["1", "2"]), &[]),
            Err(Error::IncorrectArgCount {
                function: "ABS".into(),
                expected: "1".into(),
                got: 2
            })
        );
        assert_eq!(
            emitter.render(&cx, "ABS", &args(&["1"]), &[ParamMetadata::default(), ParamMetadata::default()]),
            Err(Error::MetadataMismatch {
                function: "ABS".into(),
                args: 1,
                metadata: 2
            })
        );
        assert!(matches!(
            emitter.render(&cx, "ABS", &args(&["  "]), &[]),
            Err(Error::ArgWrongType { index: 0, .. })
        ));
    }

    #[test]
    fn unsupported_names_the_target() {
        let cx = cx();
        let emitter = FormulaEmitter::new(Dialect::Sqlite, EmitContext::Select);
        let err = emitter
            .render(&cx, "REGEXP_REPLACE", &args(&["'a'", "'b'", "'c'"]), &[])
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "unsupported function: REGEXP_REPLACE is not available for sqlite select"
        );
    }
}
