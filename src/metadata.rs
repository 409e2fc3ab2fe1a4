//! Per-argument metadata handed over by the formula parser, and the resolver
//! that turns it into the semantic verdicts every emitter consults.

/// The value type a formula expression (or a field's cell) produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "camelCase")
)]
pub enum CellValueType {
    Number,
    String,
    Boolean,
    Datetime,
}

/// How a field is physically stored in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StorageType {
    Integer,
    Real,
    Text,
    Boolean,
    DateTime,
    Json,
}

impl StorageType {
    fn natural_value_type(self) -> Option<CellValueType> {
        match self {
            StorageType::Integer | StorageType::Real => Some(CellValueType::Number),
            StorageType::Text => Some(CellValueType::String),
            StorageType::Boolean => Some(CellValueType::Boolean),
            StorageType::DateTime => Some(CellValueType::Datetime),
            StorageType::Json => None,
        }
    }
}

/// Display formatting attached to a field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "camelCase", default)
)]
pub struct Formatting {
    pub date: Option<String>,
    pub time: Option<String>,
    pub time_zone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "camelCase")
)]
pub struct FieldDescriptor {
    pub id: String,
    /// Name of the backing column in the table.
    pub db_field_name: String,
    #[cfg_attr(feature = "serde", serde(default))]
    pub is_multiple: bool,
    #[cfg_attr(feature = "serde", serde(default))]
    pub is_lookup: bool,
    pub storage_type: StorageType,
    #[cfg_attr(feature = "serde", serde(default))]
    pub cell_value_type: Option<CellValueType>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub formatting: Option<Formatting>,
}

impl FieldDescriptor {
    pub fn new(id: impl Into<String>, db_field_name: impl Into<String>, storage: StorageType) -> Self {
        Self {
            id: id.into(),
            db_field_name: db_field_name.into(),
            is_multiple: false,
            is_lookup: false,
            storage_type: storage,
            cell_value_type: storage.natural_value_type(),
            formatting: None,
        }
    }

    pub fn multiple(mut self) -> Self {
        self.is_multiple = true;
        self
    }

    pub fn lookup(mut self) -> Self {
        self.is_lookup = true;
        self
    }

    pub fn with_cell_value_type(mut self, ty: CellValueType) -> Self {
        self.cell_value_type = Some(ty);
        self
    }

    pub fn with_formatting(mut self, formatting: Formatting) -> Self {
        self.formatting = Some(formatting);
        self
    }
}

/// Metadata for one argument of a call, as produced by the parser.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "camelCase", default)
)]
pub struct ParamMetadata {
    pub declared_type: Option<CellValueType>,
    pub is_field_reference: bool,
    pub field: Option<FieldDescriptor>,
}

impl ParamMetadata {
    /// Metadata for a literal (or any non-field expression) of a known type.
    pub fn typed(ty: CellValueType) -> Self {
        Self {
            declared_type: Some(ty),
            is_field_reference: false,
            field: None,
        }
    }

    /// Metadata for a direct field reference.
    pub fn field(field: FieldDescriptor) -> Self {
        Self {
            declared_type: None,
            is_field_reference: true,
            field: Some(field),
        }
    }
}

/// Semantic facts about one argument. Derived on demand, never stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolvedParamInfo {
    pub has_metadata: bool,
    pub inferred_type: Option<CellValueType>,
    pub is_field_reference: bool,
    pub is_multi_value_field: bool,
    pub is_json_field: bool,
    pub field_storage_type: Option<StorageType>,
    pub field_cell_value_type: Option<CellValueType>,
}

/// Resolves the argument at `index`. Out-of-range indices yield the empty
/// info (`has_metadata == false`), which is not an error.
pub fn resolve(metadata: &[ParamMetadata], index: usize) -> ResolvedParamInfo {
    metadata
        .get(index)
        .map(resolve_one)
        .unwrap_or_default()
}

pub fn resolve_one(meta: &ParamMetadata) -> ResolvedParamInfo {
    let Some(field) = &meta.field else {
        return ResolvedParamInfo {
            has_metadata: true,
            inferred_type: meta.declared_type,
            is_field_reference: meta.is_field_reference,
            ..Default::default()
        };
    };

    let is_json = field.storage_type == StorageType::Json;
    // a JSON-backed lookup always aggregates linked values into an array
    let is_multi = field.is_multiple || (field.is_lookup && is_json);

    let mut inferred = meta
        .declared_type
        .or(field.cell_value_type)
        .or(field.storage_type.natural_value_type());
    if inferred.is_none() && is_json {
        inferred = Some(CellValueType::String);
    }

    ResolvedParamInfo {
        has_metadata: true,
        inferred_type: inferred,
        is_field_reference: meta.is_field_reference,
        is_multi_value_field: is_multi,
        is_json_field: is_json,
        field_storage_type: Some(field.storage_type),
        field_cell_value_type: field.cell_value_type,
    }
}

impl ResolvedParamInfo {
    pub fn is_trusted_numeric(&self) -> bool {
        self.inferred_type == Some(CellValueType::Number) && !self.is_json_like()
    }

    pub fn is_text_like(&self) -> bool {
        if self.inferred_type != Some(CellValueType::String) {
            return false;
        }
        if self.is_json_field {
            return !self.is_multi_value_field
                && matches!(self.field_cell_value_type, None | Some(CellValueType::String));
        }
        true
    }

    /// JSON cells holding a datetime count too; callers pull the scalar out
    /// before comparing.
    pub fn is_datetime_like(&self) -> bool {
        self.inferred_type == Some(CellValueType::Datetime)
    }

    pub fn is_boolean_like(&self) -> bool {
        self.inferred_type == Some(CellValueType::Boolean) && !self.is_json_field
    }

    pub fn is_json_like(&self) -> bool {
        self.is_json_field || self.is_multi_value_field
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_numbers() -> FieldDescriptor {
        FieldDescriptor::new("fldB", "b", StorageType::Json)
            .lookup()
            .with_cell_value_type(CellValueType::Number)
    }

    #[test]
    fn out_of_range_is_empty() {
        let info = resolve(&[], 3);
        assert!(!info.has_metadata);
        assert!(!info.is_trusted_numeric());
        assert!(!info.is_text_like());
        assert!(!info.is_json_like());
    }

    #[test]
    fn json_lookup_is_always_multi_value() {
        let info = resolve(&[ParamMetadata::field(lookup_numbers())], 0);
        assert!(info.is_multi_value_field);
        assert!(info.is_json_like());
        assert!(!info.is_trusted_numeric());
        assert_eq!(info.inferred_type, Some(CellValueType::Number));
    }

    #[test]
    fn plain_numeric_field_is_trusted() {
        let field = FieldDescriptor::new("fldA", "a", StorageType::Real);
        let info = resolve(&[ParamMetadata::field(field)], 0);
        assert!(info.is_trusted_numeric());
        assert!(!info.is_text_like());
    }

    #[test]
    fn json_without_types_defaults_to_string() {
        let mut field = FieldDescriptor::new("fldJ", "j", StorageType::Json);
        field.cell_value_type = None;
        let info = resolve(&[ParamMetadata::field(field)], 0);
        assert_eq!(info.inferred_type, Some(CellValueType::String));
        assert!(info.is_text_like());
        assert!(!info.is_boolean_like());
    }

    #[test]
    fn multi_value_json_text_is_not_text_like() {
        let field = FieldDescriptor::new("fldT", "t", StorageType::Json)
            .multiple()
            .with_cell_value_type(CellValueType::String);
        let info = resolve(&[ParamMetadata::field(field)], 0);
        assert!(!info.is_text_like());
        assert!(info.is_json_like());
    }

    #[test]
    fn declared_type_wins_over_storage() {
        let mut meta = ParamMetadata::field(FieldDescriptor::new("fldX", "x", StorageType::Text));
        meta.declared_type = Some(CellValueType::Number);
        assert!(resolve(&[meta], 0).is_trusted_numeric());
    }

    #[test]
    fn boolean_json_is_not_boolean_like() {
        let field = FieldDescriptor::new("fldB", "flag", StorageType::Json)
            .with_cell_value_type(CellValueType::Boolean);
        let info = resolve(&[ParamMetadata::field(field)], 0);
        assert!(!info.is_boolean_like());
    }

    #[test]
    fn json_datetime_is_datetime_like() {
        let field = FieldDescriptor::new("fldW", "when", StorageType::Json)
            .with_cell_value_type(CellValueType::Datetime);
        let info = resolve(&[ParamMetadata::field(field)], 0);
        assert!(info.is_json_like());
        assert!(info.is_datetime_like());
        assert!(!info.is_text_like());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn metadata_from_parser_json() {
        let json = r#"{
            "declaredType": null,
            "isFieldReference": true,
            "field": {
                "id": "fldB",
                "dbFieldName": "b",
                "isLookup": true,
                "storageType": "Json",
                "cellValueType": "number"
            }
        }"#;
        let meta: ParamMetadata = serde_json::from_str(json).unwrap();
        let info = resolve_one(&meta);
        assert!(info.is_multi_value_field);
        assert!(info.is_json_like());
    }
}
