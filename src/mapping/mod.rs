//! Column to target-field mappings.
//!
//! Mappings are proposed from a [`TableSchema`](crate::models::TableSchema)
//! by [`generate_mappings`], optionally reviewed, and persisted as versioned
//! JSON so later runs can reuse them with `--config`.

mod heuristics;
mod review;
mod transform;

pub use heuristics::{
    default_mappings, generate_mappings, target_collection_for, TargetCollection, TargetField,
    FieldKind, TARGET_COLLECTIONS,
};
pub use review::{AcceptAll, ConsoleReviewer, MappingReviewer, ReviewDecision};
pub use transform::Transform;

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::models::{Record, SourceRow};

/// Current mapping file format version.
pub const MAPPING_VERSION: u32 = 1;

/// Target field that receives the record's own binary attachment rather
/// than a document field.
pub const ATTACHMENT_FIELD: &str = "_file";

#[derive(Debug, Error)]
pub enum MappingError {
    #[error("Failed to access mapping file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid mapping file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Unsupported mapping version {0}")]
    Version(u32),
}

/// One source column feeding one target field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldMapping {
    pub source_column: String,
    pub target_field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<Transform>,
    #[serde(default)]
    pub is_relationship: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation_to: Option<String>,
}

impl FieldMapping {
    pub fn new(source_column: &str, target_field: &str) -> Self {
        Self {
            source_column: source_column.to_string(),
            target_field: target_field.to_string(),
            transform: None,
            is_relationship: false,
            relation_to: None,
        }
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = Some(transform);
        self
    }

    pub fn relation(mut self, collection: &str) -> Self {
        self.is_relationship = true;
        self.relation_to = Some(collection.to_string());
        self
    }

    /// Value for this mapping with its transform applied.
    pub fn extract(&self, row: &SourceRow) -> Value {
        let raw = row
            .get(&self.source_column)
            .map(|v| v.to_json())
            .unwrap_or(Value::Null);
        match self.transform {
            Some(transform) => transform.apply(raw, row),
            None => raw,
        }
    }
}

/// Reference to another collection extracted from a row, still keyed by
/// source values.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationRef {
    pub field: String,
    pub collection: String,
    pub keys: Vec<String>,
    /// Whether the source value was list-shaped.
    pub many: bool,
}

/// Output of applying a collection's mappings to a row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappedRow {
    /// Scalar target fields.
    pub fields: Record,
    /// Unresolved relationships.
    pub relations: Vec<RelationRef>,
    /// Storage key of the record's own attachment.
    pub attachment: Option<String>,
}

impl MappedRow {
    pub fn relation(&self, field: &str) -> Option<&RelationRef> {
        self.relations.iter().find(|r| r.field == field)
    }
}

/// Ordered mappings for one target collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionMapping {
    pub source_table: String,
    pub mappings: Vec<FieldMapping>,
}

impl CollectionMapping {
    pub fn new(source_table: &str, mappings: Vec<FieldMapping>) -> Self {
        Self {
            source_table: source_table.to_string(),
            mappings,
        }
    }

    pub fn for_field(&self, target_field: &str) -> Option<&FieldMapping> {
        self.mappings.iter().find(|m| m.target_field == target_field)
    }

    /// Split a row into scalar fields, relationships and attachment key.
    pub fn apply(&self, row: &SourceRow) -> MappedRow {
        let mut mapped = MappedRow::default();
        for mapping in &self.mappings {
            let value = mapping.extract(row);

            if mapping.target_field == ATTACHMENT_FIELD {
                mapped.attachment = value.as_str().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);
                continue;
            }

            match (&mapping.relation_to, mapping.is_relationship) {
                (Some(collection), true) => {
                    let (keys, many) = relation_keys(&value);
                    mapped.relations.push(RelationRef {
                        field: mapping.target_field.clone(),
                        collection: collection.clone(),
                        keys,
                        many,
                    });
                }
                _ => {
                    mapped.fields.insert(mapping.target_field.clone(), value);
                }
            }
        }
        mapped
    }
}

fn relation_keys(value: &Value) -> (Vec<String>, bool) {
    fn key(v: &Value) -> Option<String> {
        match v {
            Value::Null => None,
            Value::String(s) if s.trim().is_empty() => None,
            Value::String(s) => Some(s.trim().to_string()),
            Value::Number(n) => Some(match n.as_f64() {
                Some(f) if f.fract() == 0.0 => format!("{}", f as i64),
                _ => n.to_string(),
            }),
            other => Some(other.to_string()),
        }
    }
    match value {
        Value::Array(items) => (items.iter().filter_map(key).collect(), true),
        other => (key(other).into_iter().collect(), false),
    }
}

/// Mappings for every target collection, as persisted on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionMappings {
    pub version: u32,
    pub generated_at: DateTime<Utc>,
    pub collections: BTreeMap<String, CollectionMapping>,
}

impl Default for CollectionMappings {
    fn default() -> Self {
        Self {
            version: MAPPING_VERSION,
            generated_at: Utc::now(),
            collections: BTreeMap::new(),
        }
    }
}

impl CollectionMappings {
    pub fn get(&self, collection: &str) -> Option<&CollectionMapping> {
        self.collections.get(collection)
    }

    pub fn insert(&mut self, collection: &str, mapping: CollectionMapping) {
        self.collections.insert(collection.to_string(), mapping);
    }

    /// Mapping for `collection`, falling back to the built-in defaults.
    pub fn resolve(&self, collection: &str) -> CollectionMapping {
        self.get(collection)
            .cloned()
            .or_else(|| default_mappings(collection))
            .unwrap_or_else(|| CollectionMapping::new(collection, Vec::new()))
    }

    /// Built-in mappings for every known target collection.
    pub fn defaults() -> Self {
        let mut mappings = Self::default();
        for target in TARGET_COLLECTIONS {
            if let Some(mapping) = default_mappings(target.name) {
                mappings.insert(target.name, mapping);
            }
        }
        mappings
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), MappingError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load_from_file(path: &Path) -> Result<Self, MappingError> {
        let contents = std::fs::read_to_string(path)?;
        let mappings: Self = serde_json::from_str(&contents)?;
        if mappings.version > MAPPING_VERSION {
            return Err(MappingError::Version(mappings.version));
        }
        Ok(mappings)
    }
}
