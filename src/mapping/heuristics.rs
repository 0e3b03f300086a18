//! Heuristic mapping proposals and the target collection registry.

use std::collections::BTreeSet;

use super::{CollectionMapping, CollectionMappings, FieldMapping, Transform, ATTACHMENT_FIELD};
use crate::models::TableSchema;

/// Shape of a target field, used to choose transforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Number,
    Boolean,
    /// Array of plain strings.
    TextList,
    /// Reference into another collection.
    Relation {
        collection: &'static str,
        many: bool,
    },
    /// The document's own uploaded file.
    Attachment,
}

#[derive(Debug, Clone, Copy)]
pub struct TargetField {
    pub name: &'static str,
    pub kind: FieldKind,
    /// Alternative source column names, compared after normalization.
    pub synonyms: &'static [&'static str],
}

/// A known target collection and the legacy tables that feed it.
#[derive(Debug, Clone, Copy)]
pub struct TargetCollection {
    pub name: &'static str,
    pub source_tables: &'static [&'static str],
    pub fields: &'static [TargetField],
}

const fn field(
    name: &'static str,
    kind: FieldKind,
    synonyms: &'static [&'static str],
) -> TargetField {
    TargetField {
        name,
        kind,
        synonyms,
    }
}

pub const TARGET_COLLECTIONS: &[TargetCollection] = &[
    TargetCollection {
        name: "music",
        source_tables: &["musics", "music", "tracks"],
        fields: &[
            field("title", FieldKind::Text, &["name", "track_name"]),
            field("duration", FieldKind::Number, &["length", "seconds", "duration_secs"]),
            field("credit", FieldKind::Text, &["author", "artist", "attribution"]),
            field(
                "tags",
                FieldKind::Relation {
                    collection: "music-tags",
                    many: true,
                },
                &["categories", "keywords"],
            ),
            field(
                ATTACHMENT_FIELD,
                FieldKind::Attachment,
                &["audio_file", "audio", "file", "audio_url", "mp3"],
            ),
        ],
    },
    TargetCollection {
        name: "frames",
        source_tables: &["frames", "poses"],
        fields: &[
            field("name", FieldKind::Text, &["title", "label"]),
            field("category", FieldKind::Text, &["type", "kind", "group"]),
            field("tags", FieldKind::TextList, &["keywords"]),
            field(
                "maleImage",
                FieldKind::Relation {
                    collection: "media",
                    many: false,
                },
                &["male_image", "image_male", "male"],
            ),
            field(
                "femaleImage",
                FieldKind::Relation {
                    collection: "media",
                    many: false,
                },
                &["female_image", "image_female", "female"],
            ),
        ],
    },
    TargetCollection {
        name: "meditations",
        source_tables: &["meditations", "sessions"],
        fields: &[
            field("title", FieldKind::Text, &["name"]),
            field("description", FieldKind::Text, &["desc", "summary", "body"]),
            field("duration", FieldKind::Number, &["length", "seconds"]),
            field(
                "narrator",
                FieldKind::Relation {
                    collection: "narrators",
                    many: false,
                },
                &["narrator_id", "voice", "narrator_index"],
            ),
            field(
                "tags",
                FieldKind::Relation {
                    collection: "meditation-tags",
                    many: true,
                },
                &["categories", "keywords"],
            ),
            field(
                "thumbnail",
                FieldKind::Relation {
                    collection: "media",
                    many: false,
                },
                &["image", "cover", "thumbnail_url", "picture"],
            ),
            field(
                "music",
                FieldKind::Relation {
                    collection: "music",
                    many: false,
                },
                &["music_id", "background_music", "track_id"],
            ),
            field("published", FieldKind::Boolean, &["is_published", "active", "visible"]),
            field(
                ATTACHMENT_FIELD,
                FieldKind::Attachment,
                &["audio_file", "audio", "file", "audio_url", "mp3"],
            ),
        ],
    },
];

/// Target collection fed by a legacy table, if any.
pub fn target_collection_for(table: &str) -> Option<&'static TargetCollection> {
    let table = table.to_lowercase();
    TARGET_COLLECTIONS
        .iter()
        .find(|c| c.name == table || c.source_tables.contains(&table.as_str()))
}

fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn is_tag_like(column: &str) -> bool {
    let n = normalize(column);
    n.contains("tag") || n == "categories" || n == "keywords"
}

fn is_text_type(data_type: &str) -> bool {
    let t = data_type.to_uppercase();
    t.is_empty() || t.contains("CHAR") || t.contains("TEXT") || t.contains("CLOB")
}

fn mapping_for(column: &str, data_type: &str, target: &TargetField) -> FieldMapping {
    let mapping = FieldMapping::new(column, target.name);
    match target.kind {
        FieldKind::Number if is_text_type(data_type) => {
            mapping.with_transform(Transform::ToNumber)
        }
        FieldKind::Boolean => mapping.with_transform(Transform::ToBoolean),
        FieldKind::TextList => mapping.with_transform(Transform::CommaSeparatedToArray),
        FieldKind::Relation { collection, many } => {
            let mapping = mapping.relation(collection);
            if many {
                mapping.with_transform(Transform::CommaSeparatedToArray)
            } else {
                mapping
            }
        }
        _ => mapping,
    }
}

/// Propose a mapping for one table, or `None` if no target collection
/// matches it.
pub fn propose(schema: &TableSchema) -> Option<(&'static str, CollectionMapping)> {
    let target = target_collection_for(&schema.table_name)?;
    let mut used: BTreeSet<&'static str> = BTreeSet::new();
    let mut mappings = Vec::new();

    for column in &schema.columns {
        if schema.primary_key.contains(&column.name) {
            continue;
        }
        let normalized = normalize(&column.name);

        let exact = target
            .fields
            .iter()
            .find(|f| normalize(f.name) == normalized);
        let synonym = || {
            target
                .fields
                .iter()
                .find(|f| f.synonyms.iter().any(|s| normalize(s) == normalized))
        };
        let foreign = || {
            let fk = schema.foreign_key(&column.name)?;
            let referenced = target_collection_for(&fk.referenced_table)?;
            target.fields.iter().find(|f| {
                matches!(f.kind, FieldKind::Relation { collection, .. } if collection == referenced.name)
            })
        };
        let tag_like = || {
            if !is_tag_like(&column.name) {
                return None;
            }
            target.fields.iter().find(|f| {
                matches!(
                    f.kind,
                    FieldKind::TextList | FieldKind::Relation { many: true, .. }
                )
            })
        };

        let Some(field) = exact.or_else(synonym).or_else(foreign).or_else(tag_like) else {
            tracing::debug!(
                "No target field for {}.{}",
                schema.table_name,
                column.name
            );
            continue;
        };
        if !used.insert(field.name) {
            continue;
        }
        mappings.push(mapping_for(&column.name, &column.data_type, field));
    }

    Some((target.name, CollectionMapping::new(&schema.table_name, mappings)))
}

/// Propose mappings for every schema that belongs to a known collection.
/// Tables without a matching collection are skipped.
pub fn generate_mappings(schemas: &[TableSchema]) -> CollectionMappings {
    let mut mappings = CollectionMappings::default();
    for schema in schemas {
        if let Some((collection, mapping)) = propose(schema) {
            if mappings.get(collection).is_none() {
                mappings.insert(collection, mapping);
            }
        }
    }
    mappings
}

/// Mappings matching the legacy table layout.
pub fn default_mappings(collection: &str) -> Option<CollectionMapping> {
    let mapping = match collection {
        "music" => CollectionMapping::new(
            "musics",
            vec![
                FieldMapping::new("title", "title").with_transform(Transform::Trim),
                FieldMapping::new("duration", "duration").with_transform(Transform::ToNumber),
                FieldMapping::new("credit", "credit").with_transform(Transform::Trim),
                FieldMapping::new("tags", "tags")
                    .with_transform(Transform::CommaSeparatedToArray)
                    .relation("music-tags"),
                FieldMapping::new("audio_file", ATTACHMENT_FIELD),
            ],
        ),
        "frames" => CollectionMapping::new(
            "frames",
            vec![
                FieldMapping::new("name", "name").with_transform(Transform::Trim),
                FieldMapping::new("category", "category"),
                FieldMapping::new("tags", "tags").with_transform(Transform::CommaSeparatedToArray),
                FieldMapping::new("male_image", "maleImage").relation("media"),
                FieldMapping::new("female_image", "femaleImage").relation("media"),
            ],
        ),
        "meditations" => CollectionMapping::new(
            "meditations",
            vec![
                FieldMapping::new("title", "title").with_transform(Transform::Trim),
                FieldMapping::new("description", "description").with_transform(Transform::Trim),
                FieldMapping::new("duration", "duration").with_transform(Transform::ToNumber),
                FieldMapping::new("narrator", "narrator").relation("narrators"),
                FieldMapping::new("tags", "tags")
                    .with_transform(Transform::CommaSeparatedToArray)
                    .relation("meditation-tags"),
                FieldMapping::new("thumbnail", "thumbnail").relation("media"),
                FieldMapping::new("music_id", "music").relation("music"),
                FieldMapping::new("published", "published").with_transform(Transform::ToBoolean),
                FieldMapping::new("audio_file", ATTACHMENT_FIELD),
            ],
        ),
        _ => return None,
    };
    Some(mapping)
}
