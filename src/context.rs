use std::collections::HashMap;

use chrono::{DateTime, Offset, TimeZone, Utc};
use chrono_tz::Tz;

use crate::{
    emit::Error,
    metadata::{FieldDescriptor, StorageType},
};

/// The fields of the table a formula is compiled against.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FieldCatalog {
    fields: Vec<FieldDescriptor>,
    /// projected column alias (lookup/rollup output) → field id
    #[cfg_attr(feature = "serde", serde(default))]
    aliases: HashMap<String, String>,
}

impl FieldCatalog {
    pub fn new(fields: Vec<FieldDescriptor>) -> Self {
        Self {
            fields,
            aliases: HashMap::new(),
        }
    }

    /// Registers a projected column name that stands for an existing field.
    pub fn with_alias(mut self, column: impl Into<String>, field_id: impl Into<String>) -> Self {
        self.aliases.insert(column.into(), field_id.into());
        self
    }

    pub fn by_id(&self, id: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.id == id)
    }

    /// Resolves a storage column name (or a registered alias) to its field.
    pub fn by_column(&self, column: &str) -> Option<&FieldDescriptor> {
        self.fields
            .iter()
            .find(|f| f.db_field_name == column)
            .or_else(|| self.aliases.get(column).and_then(|id| self.by_id(id)))
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }
}

/// Everything one compilation job needs to know about its surroundings.
///
/// Built once per top-level compilation and only read while rendering, so
/// a job can run on any thread with its own value.
#[derive(Debug, Clone)]
pub struct ConversionContext {
    catalog: FieldCatalog,
    time_zone: Tz,
    table_alias: Option<String>,
    target_storage: Option<StorageType>,
    now: DateTime<Utc>,
}

impl ConversionContext {
    pub fn new(catalog: FieldCatalog) -> Self {
        Self {
            catalog,
            time_zone: Tz::UTC,
            table_alias: None,
            target_storage: None,
            now: Utc::now(),
        }
    }

    pub fn with_timezone(mut self, name: &str) -> Result<Self, Error> {
        self.time_zone = parse_zone(name)?;
        Ok(self)
    }

    pub fn with_table_alias(mut self, alias: impl Into<String>) -> Self {
        self.table_alias = Some(alias.into());
        self
    }

    pub fn with_target_storage(mut self, storage: StorageType) -> Self {
        self.target_storage = Some(storage);
        self
    }

    /// Pins the clock used to freeze `NOW()`/`TODAY()` in generated columns.
    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    pub fn catalog(&self) -> &FieldCatalog {
        &self.catalog
    }

    pub fn time_zone(&self) -> &str {
        self.time_zone.name()
    }

    pub fn table_alias(&self) -> Option<&str> {
        self.table_alias.as_deref()
    }

    pub fn target_storage(&self) -> Option<StorageType> {
        self.target_storage
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// The zone a datetime operand is interpreted in: the field's own
    /// formatting zone when it has a valid one, else the context zone.
    pub fn zone_for(&self, field: Option<&FieldDescriptor>) -> Tz {
        field
            .and_then(|f| f.formatting.as_ref())
            .and_then(|f| f.time_zone.as_deref())
            .and_then(|name| match parse_zone(name) {
                Ok(tz) => Some(tz),
                Err(_) => {
                    tracing::debug!(zone = name, "ignoring invalid field timezone");
                    None
                }
            })
            .unwrap_or(self.time_zone)
    }

    /// Minutes east of UTC for `zone` at the context clock instant.
    pub fn utc_offset_minutes(&self, zone: Tz) -> i32 {
        zone.offset_from_utc_datetime(&self.now.naive_utc())
            .fix()
            .local_minus_utc()
            / 60
    }
}

fn parse_zone(name: &str) -> Result<Tz, Error> {
    name.parse::<Tz>()
        .map_err(|_| Error::InvalidTimezone(name.to_string()))
}
