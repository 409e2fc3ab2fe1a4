//! Compiles spreadsheet-style formula calls into SQL expressions for
//! PostgreSQL and SQLite, either for stored generated columns or for
//! select-time evaluation.
//!
//! A formula parser walks its tree bottom-up and asks a [`FormulaEmitter`]
//! to render each node from the already rendered SQL of its children:
//!
//! ```
//! use formula_sql::{ConversionContext, Dialect, EmitContext, FieldCatalog, FormulaEmitter};
//!
//! let cx = ConversionContext::new(FieldCatalog::default());
//! let emitter = FormulaEmitter::new(Dialect::Sqlite, EmitContext::Select);
//! let sql = emitter
//!     .render(&cx, "UPPER", &["'abc'".to_string()], &[])
//!     .unwrap();
//! assert_eq!(sql, "UPPER('abc')");
//! ```

pub mod coercion;
pub mod context;
pub mod emit;
pub mod functions;
pub mod fuzz_helper;
pub mod metadata;
pub mod pattern;
pub mod sql;
pub mod to_sql;
pub mod units;

#[cfg(test)]
mod tests;

pub use context::{ConversionContext, FieldCatalog};
pub use emit::{Dialect, EmitContext, Error, FormulaEmitter, Target};
pub use functions::FormulaFunction;
pub use metadata::{
    CellValueType, FieldDescriptor, Formatting, ParamMetadata, ResolvedParamInfo, StorageType,
    resolve,
};
