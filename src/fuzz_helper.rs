use crate::{
    CellValueType, ConversionContext, Dialect, EmitContext, FieldCatalog, FieldDescriptor,
    FormulaEmitter, FormulaFunction, StorageType,
};

const TARGETS: [(Dialect, EmitContext); 4] = [
    (Dialect::Postgres, EmitContext::Select),
    (Dialect::Postgres, EmitContext::GeneratedColumn),
    (Dialect::Sqlite, EmitContext::Select),
    (Dialect::Sqlite, EmitContext::GeneratedColumn),
];

// One field of each storage kind
fn context() -> ConversionContext {
    ConversionContext::new(FieldCatalog::new(vec![
        FieldDescriptor::new("fldA", "a", StorageType::Real),
        FieldDescriptor::new("fldI", "i", StorageType::Integer),
        FieldDescriptor::new("fldT", "t", StorageType::Text),
        FieldDescriptor::new("fldB", "b", StorageType::Boolean),
        FieldDescriptor::new("fldD", "d", StorageType::DateTime),
        FieldDescriptor::new("fldJ", "j", StorageType::Json)
            .lookup()
            .with_cell_value_type(CellValueType::Number),
        FieldDescriptor::new("fldM", "m", StorageType::Json).multiple(),
    ]))
}

/// Renders a call by name for every target, ignoring errors.
pub fn render_all(name: &str, args: &[String]) {
    let cx = context();
    for (dialect, emit_context) in TARGETS {
        _ = FormulaEmitter::new(dialect, emit_context).render(&cx, name, args, &[]);
    }
}

/// Renders the `index`-th function (wrapping around) for every target,
/// ignoring errors.
pub fn render_nth(index: usize, args: &[String]) {
    use strum::IntoEnumIterator;

    let functions: Vec<FormulaFunction> = FormulaFunction::iter().collect();
    let function = functions[index % functions.len()];
    let cx = context();
    for (dialect, emit_context) in TARGETS {
        _ = FormulaEmitter::new(dialect, emit_context).render_function(&cx, function, args, &[]);
    }
}
