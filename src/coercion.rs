//! The coercion and normalization engine.
//!
//! Every emitter turns its operands into safe numeric, text, boolean or
//! timestamp expressions through a [`Coercer`]. The policy (which coercion
//! applies to which operand) lives here and is shared by both dialects; the
//! SQL that implements each coercion is supplied per dialect through
//! [`Primitives`].

use chrono_tz::Tz;

use crate::{
    context::ConversionContext,
    emit::{Dialect, EmitContext, Error, Target},
    functions::FormulaFunction,
    metadata::{
        CellValueType, FieldDescriptor, ParamMetadata, ResolvedParamInfo, StorageType, resolve_one,
    },
    sql::{
        self, BinaryOp, ExprRef, SqlType, binop, bool_lit, case, cast, coalesce, fragment,
        in_list, is_not_null, null, text, when,
    },
};

pub mod postgres;
pub mod sqlite;

/// What an operand is known to be, from metadata or, failing that, from its
/// literal shape or the column it names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    /// `''` or `NULL` written literally
    Blank,
    Number,
    Text,
    Boolean,
    Datetime,
    /// JSON storage or a multi-value field
    Json,
    Unknown,
}

/// One rendered argument together with everything known about it.
#[derive(Debug, Clone)]
pub struct Operand<'a> {
    pub sql: &'a str,
    pub kind: OperandKind,
    pub literal: bool,
    pub info: ResolvedParamInfo,
    pub field: Option<&'a FieldDescriptor>,
}

impl<'a> Operand<'a> {
    pub fn expr(&self) -> ExprRef {
        fragment(self.sql)
    }

    pub fn is_blank(&self) -> bool {
        self.kind == OperandKind::Blank
    }

    pub fn is_text_like(&self) -> bool {
        match self.kind {
            OperandKind::Text => true,
            OperandKind::Json => self.info.is_text_like(),
            _ => false,
        }
    }

    pub fn is_numeric_like(&self) -> bool {
        match self.kind {
            OperandKind::Number => true,
            OperandKind::Json => self.info.inferred_type == Some(CellValueType::Number),
            _ => false,
        }
    }

    pub fn is_datetime_like(&self) -> bool {
        match self.kind {
            OperandKind::Datetime => true,
            OperandKind::Json => self.info.is_datetime_like() && !self.info.is_multi_value_field,
            _ => false,
        }
    }

    pub fn is_multi_value(&self) -> bool {
        self.kind == OperandKind::Json && self.info.is_multi_value_field
    }
}

fn kind_from_info(info: &ResolvedParamInfo) -> OperandKind {
    if info.is_json_like() {
        OperandKind::Json
    } else if info.is_boolean_like() {
        OperandKind::Boolean
    } else if info.is_trusted_numeric() {
        OperandKind::Number
    } else if info.is_datetime_like() {
        OperandKind::Datetime
    } else if info.is_text_like() {
        OperandKind::Text
    } else {
        OperandKind::Unknown
    }
}

/// Classifies a rendered argument. Literal shape wins, then metadata, then
/// a column lookup in the catalog.
pub fn classify<'a>(
    cx: &'a ConversionContext,
    sql: &'a str,
    meta: Option<&'a ParamMetadata>,
) -> Operand<'a> {
    let literal = |kind| Operand {
        sql,
        kind,
        literal: true,
        info: ResolvedParamInfo::default(),
        field: None,
    };
    if sql::is_null_literal(sql) || sql::string_literal(sql).is_some_and(|s| s.is_empty()) {
        return literal(OperandKind::Blank);
    }
    if sql::numeric_literal(sql).is_some() {
        return literal(OperandKind::Number);
    }
    if sql::string_literal(sql).is_some() {
        return literal(OperandKind::Text);
    }
    if sql::bool_literal(sql).is_some() {
        return literal(OperandKind::Boolean);
    }

    if let Some(meta) = meta {
        let info = resolve_one(meta);
        let kind = kind_from_info(&info);
        if kind != OperandKind::Unknown {
            return Operand {
                sql,
                kind,
                literal: false,
                info,
                field: meta.field.as_ref(),
            };
        }
    }

    if let Some((_, column)) = sql::column_reference(sql) {
        if let Some(field) = cx.catalog().by_column(&column) {
            tracing::debug!(column, field = field.id, "operand typed from the field catalog");
            let info = resolve_one(&ParamMetadata::field(field.clone()));
            return Operand {
                sql,
                kind: kind_from_info(&info),
                literal: false,
                info,
                field: Some(field),
            };
        }
    }

    tracing::debug!(sql, "operand type unknown");
    Operand {
        sql,
        kind: OperandKind::Unknown,
        literal: false,
        info: meta.map(resolve_one).unwrap_or_default(),
        field: meta.and_then(|m| m.field.as_ref()),
    }
}

/// A timezone as both dialects need it: Postgres by name, SQLite as the
/// fixed offset in force at the context clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Zone {
    pub tz: Tz,
    pub offset_minutes: i32,
}

impl Zone {
    pub fn name(&self) -> &'static str {
        self.tz.name()
    }
}

/// The SQL behind each coercion, per dialect.
pub trait Primitives: Sync {
    /// Strips formatting and reads what is left as a number; NULL when it
    /// is not one, or when the text looks like an ISO date.
    fn loose_numeric(&self, e: ExprRef) -> ExprRef;

    /// Applies `aggregate` (SUM, COUNT, MAX, MIN) to the numeric elements
    /// of a JSON array, or to a JSON scalar as a one-element array.
    fn json_numeric(&self, e: ExprRef, aggregate: &str) -> ExprRef;

    /// Number of non-blank elements of a JSON array.
    fn json_count_nonblank(&self, e: ExprRef) -> ExprRef;

    /// Element text joined with `separator`, in array order.
    fn json_join(&self, e: ExprRef, separator: ExprRef) -> ExprRef;

    /// Text of a single JSON value without expanding arrays.
    fn json_scalar_text(&self, e: ExprRef) -> ExprRef;

    /// Array length; NULL and JSON `null` count 0, a scalar counts 1.
    fn json_length(&self, e: ExprRef) -> ExprRef;

    fn json_truthy(&self, e: ExprRef) -> ExprRef {
        binop(
            is_not_null(e.clone()),
            BinaryOp::And,
            in_list(
                cast(e, SqlType::Text),
                ["null", "[]", "{}", "", "\"\""].map(text).to_vec(),
                true,
            ),
        )
    }

    fn number_to_text(&self, e: ExprRef) -> ExprRef;

    /// ISO-8601 in UTC with milliseconds.
    fn datetime_to_text(&self, e: ExprRef) -> ExprRef;

    fn bool_truthy(&self, e: ExprRef) -> ExprRef;

    /// Truthiness of a value whose type is only known at run time.
    fn unknown_truthy(&self, e: ExprRef, context: EmitContext) -> ExprRef;

    fn normalize_datetime(&self, e: ExprRef) -> ExprRef;

    /// Parses ISO-ish text without ever raising; text without an explicit
    /// offset is read in `zone`.
    fn parse_iso(&self, e: ExprRef, zone: Zone) -> ExprRef;
}

fn primitives(dialect: Dialect) -> &'static dyn Primitives {
    match dialect {
        Dialect::Postgres => &postgres::Postgres,
        Dialect::Sqlite => &sqlite::Sqlite,
    }
}

/// The result type an IF or SWITCH settles on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchMode {
    Datetime,
    Number,
    Boolean,
    Text,
}

/// Applies the shared coercion policy for one call.
#[derive(Clone, Copy)]
pub struct Coercer<'a> {
    cx: &'a ConversionContext,
    target: Target,
    function: FormulaFunction,
    prims: &'static dyn Primitives,
}

impl<'a> Coercer<'a> {
    pub fn new(cx: &'a ConversionContext, target: Target, function: FormulaFunction) -> Self {
        Self {
            cx,
            target,
            function,
            prims: primitives(target.dialect),
        }
    }

    pub fn primitives(&self) -> &'static dyn Primitives {
        self.prims
    }

    /// The zone an operand is read in: its field's zone, else the context's.
    pub fn zone(&self, op: Option<&Operand>) -> Zone {
        let tz = self.cx.zone_for(op.and_then(|o| o.field));
        Zone {
            tz,
            offset_minutes: self.cx.utc_offset_minutes(tz),
        }
    }

    /// Table-valued JSON expansion is only possible at select time.
    pub fn require_subquery(&self) -> Result<(), Error> {
        match self.target.context {
            EmitContext::Select => Ok(()),
            EmitContext::GeneratedColumn => Err(Error::RequiresSubquery {
                function: self.function.to_string(),
            }),
        }
    }

    /// toNumericSafe: a double or NULL.
    pub fn to_number(&self, op: &Operand) -> Result<ExprRef, Error> {
        let e = op.expr();
        Ok(match op.kind {
            OperandKind::Blank => null(),
            OperandKind::Number => cast(e, SqlType::Double),
            OperandKind::Boolean => case(
                vec![
                    when(e.clone(), sql::num("1.0")),
                    when(sql::not(e), sql::num("0.0")),
                ],
                None,
            ),
            OperandKind::Json => {
                self.require_subquery()?;
                self.prims.json_numeric(e, "SUM")
            }
            OperandKind::Text | OperandKind::Datetime | OperandKind::Unknown => {
                self.prims.loose_numeric(e)
            }
        })
    }

    /// collapseNumeric: like [`Coercer::to_number`] but blank is zero.
    pub fn collapse_number(&self, op: &Operand) -> Result<ExprRef, Error> {
        Ok(coalesce(vec![self.to_number(op)?, sql::num(0)]))
    }

    /// coerceToTextComparable
    pub fn to_text(&self, op: &Operand) -> Result<ExprRef, Error> {
        let e = op.expr();
        Ok(match op.kind {
            OperandKind::Blank | OperandKind::Text => e,
            OperandKind::Json if op.is_multi_value() => {
                self.require_subquery()?;
                self.prims.json_join(e, text(", "))
            }
            OperandKind::Json => match self.target.context {
                EmitContext::Select => self.prims.json_join(e, text(", ")),
                EmitContext::GeneratedColumn => self.prims.json_scalar_text(e),
            },
            OperandKind::Boolean => case(
                vec![
                    when(e.clone(), text("true")),
                    when(sql::not(e), text("false")),
                ],
                None,
            ),
            OperandKind::Number if op.literal => text(sql::strip_parens(op.sql)),
            OperandKind::Number => self.prims.number_to_text(e),
            OperandKind::Datetime => self.prims.datetime_to_text(e),
            OperandKind::Unknown => cast(e, SqlType::Text),
        })
    }

    /// Text with blank collapsed to `''`.
    pub fn to_text_or_empty(&self, op: &Operand) -> Result<ExprRef, Error> {
        if op.is_blank() {
            return Ok(text(""));
        }
        Ok(coalesce(vec![self.to_text(op)?, text("")]))
    }

    /// Truthiness score: a boolean that is never NULL.
    pub fn to_bool(&self, op: &Operand) -> Result<ExprRef, Error> {
        let e = op.expr();
        Ok(match op.kind {
            OperandKind::Blank => bool_lit(false),
            OperandKind::Boolean => self.prims.bool_truthy(e),
            OperandKind::Json => self.prims.json_truthy(e),
            OperandKind::Number => binop(self.collapse_number(op)?, BinaryOp::Ne, sql::num(0)),
            OperandKind::Text => in_list(
                sql::call("LOWER", vec![coalesce(vec![e, text("")])]),
                vec![text(""), text("null")],
                true,
            ),
            OperandKind::Datetime => is_not_null(e),
            OperandKind::Unknown => {
                tracing::debug!(sql = op.sql, "truthiness decided at run time");
                self.prims.unknown_truthy(e, self.target.context)
            }
        })
    }

    /// A timestamp (Postgres `TIMESTAMPTZ`, SQLite ISO text) or NULL.
    pub fn to_datetime(&self, op: &Operand) -> ExprRef {
        let zone = self.zone(Some(op));
        match op.kind {
            OperandKind::Blank | OperandKind::Number | OperandKind::Boolean => null(),
            OperandKind::Datetime => self.prims.normalize_datetime(op.expr()),
            OperandKind::Json => self
                .prims
                .parse_iso(self.prims.json_scalar_text(op.expr()), zone),
            OperandKind::Text | OperandKind::Unknown => self.prims.parse_iso(op.expr(), zone),
        }
    }

    /// Blank-aware `=` / `<>`.
    pub fn equal(&self, a: &Operand, b: &Operand, negated: bool) -> Result<ExprRef, Error> {
        let op = if negated { BinaryOp::Ne } else { BinaryOp::Eq };
        let textual = |o: &Operand| o.is_text_like() || o.is_blank();

        // an explicit '' never equals a numeric 0, so text wins over numbers
        if textual(a) || textual(b) {
            return Ok(binop(
                self.to_text_or_empty(a)?,
                op,
                self.to_text_or_empty(b)?,
            ));
        }
        if a.is_datetime_like() || b.is_datetime_like() {
            return Ok(binop(self.to_datetime(a), op, self.to_datetime(b)));
        }
        if a.kind == OperandKind::Boolean && b.kind == OperandKind::Boolean {
            return Ok(binop(self.to_bool(a)?, op, self.to_bool(b)?));
        }
        if a.is_numeric_like() && b.is_numeric_like() {
            return Ok(binop(
                self.collapse_number(a)?,
                op,
                self.collapse_number(b)?,
            ));
        }
        Ok(binop(
            self.to_text_or_empty(a)?,
            op,
            self.to_text_or_empty(b)?,
        ))
    }

    /// `<`, `<=`, `>`, `>=`.
    pub fn compare(&self, a: &Operand, op: BinaryOp, b: &Operand) -> Result<ExprRef, Error> {
        if a.is_datetime_like() || b.is_datetime_like() {
            return Ok(binop(self.to_datetime(a), op, self.to_datetime(b)));
        }
        if (a.is_numeric_like() || b.is_numeric_like()) && !a.is_text_like() && !b.is_text_like()
        {
            return Ok(binop(
                self.collapse_number(a)?,
                op,
                self.collapse_number(b)?,
            ));
        }
        Ok(binop(
            self.to_text_or_empty(a)?,
            op,
            self.to_text_or_empty(b)?,
        ))
    }

    /// Decides the result type of IF/SWITCH from its value branches.
    pub fn unify(&self, branches: &[&Operand]) -> BranchMode {
        let typed: Vec<&&Operand> = branches
            .iter()
            .filter(|o| !o.is_blank() && o.kind != OperandKind::Unknown)
            .collect();
        if typed.iter().any(|o| o.is_datetime_like()) {
            return BranchMode::Datetime;
        }
        if typed.iter().any(|o| o.is_numeric_like()) && !typed.iter().any(|o| o.is_text_like()) {
            return BranchMode::Number;
        }
        if !typed.is_empty() && typed.iter().all(|o| o.kind == OperandKind::Boolean) {
            return BranchMode::Boolean;
        }
        if typed.is_empty() {
            return match self.cx.target_storage() {
                Some(StorageType::Integer | StorageType::Real) => BranchMode::Number,
                Some(StorageType::DateTime) => BranchMode::Datetime,
                Some(StorageType::Boolean) => BranchMode::Boolean,
                Some(StorageType::Text | StorageType::Json) | None => BranchMode::Text,
            };
        }
        BranchMode::Text
    }

    /// One IF/SWITCH branch coerced to the unified type. Blank becomes NULL
    /// outside text mode, unlike arithmetic where it becomes 0.
    pub fn branch_value(&self, op: &Operand, mode: BranchMode) -> Result<ExprRef, Error> {
        if op.is_blank() && mode != BranchMode::Text {
            return Ok(null());
        }
        match mode {
            BranchMode::Datetime => Ok(self.to_datetime(op)),
            BranchMode::Number => self.to_number(op),
            BranchMode::Boolean if op.kind == OperandKind::Boolean => Ok(op.expr()),
            BranchMode::Boolean => self.to_bool(op),
            BranchMode::Text => self.to_text(op),
        }
    }
}
