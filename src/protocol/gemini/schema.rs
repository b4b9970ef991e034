//! Tool-parameter schema translation between JSON Schema and Gemini's
//! function-declaration dialect.

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};

const NULL_TYPE: &str = "null";

/// A `type` keyword: one type name or a list of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SchemaType {
    Single(String),
    Union(Vec<String>),
}

impl SchemaType {
    fn contains(&self, name: &str) -> bool {
        match self {
            SchemaType::Single(t) => t == name,
            SchemaType::Union(types) => types.iter().any(|t| t == name),
        }
    }
}

/// Canonical JSON-Schema-like tool parameter description.
///
/// Property order is insertion order and is carried through translation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSchema {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub schema_type: Option<SchemaType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<IndexMap<String, ToolSchema>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<ToolSchema>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    #[serde(rename = "enum", default, skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub any_of: Vec<ToolSchema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient_u64")]
    pub min_length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient_u64")]
    pub max_length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient_u64")]
    pub min_items: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient_u64")]
    pub max_items: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nullable: Option<bool>,
}

/// Gemini function-declaration schema.
///
/// Integer bounds are int64 in the API and may arrive as JSON strings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiSchema {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub schema_type: Option<SchemaType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nullable: Option<bool>,
    #[serde(rename = "enum", default, skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<IndexMap<String, GeminiSchema>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub property_ordering: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<GeminiSchema>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub any_of: Vec<GeminiSchema>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient_u64")]
    pub min_length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient_u64")]
    pub max_length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient_u64")]
    pub min_items: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient_u64")]
    pub max_items: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
}

pub(crate) fn lenient_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumOrText {
        Num(u64),
        Text(String),
    }

    Ok(match Option::<NumOrText>::deserialize(deserializer)? {
        Some(NumOrText::Num(n)) => Some(n),
        Some(NumOrText::Text(text)) => text.trim().parse().ok(),
        None => None,
    })
}

fn single(type_name: &str) -> Option<SchemaType> {
    Some(SchemaType::Single(type_name.to_string()))
}

// ---------------------------------------------------------------------------
// Canonical -> vendor
// ---------------------------------------------------------------------------

/// Translate a canonical tool schema into Gemini's dialect.
///
/// Unions of two or more non-null types become `anyOf`; a single type plus
/// `null` stays a type array. Arrays always carry `items`.
#[must_use]
pub fn to_vendor_schema(schema: &ToolSchema) -> GeminiSchema {
    let mut out = GeminiSchema {
        schema_type: None,
        title: schema.title.clone(),
        description: schema.description.clone(),
        nullable: schema.nullable,
        enum_values: schema.enum_values.clone(),
        format: schema.format.clone(),
        pattern: schema.pattern.clone(),
        min_length: schema.min_length,
        max_length: schema.max_length,
        minimum: schema.minimum,
        maximum: schema.maximum,
        min_items: schema.min_items,
        max_items: schema.max_items,
        default: schema.default.clone(),
        ..GeminiSchema::default()
    };

    let mut structural_moved = false;
    match &schema.schema_type {
        Some(SchemaType::Union(types)) => {
            let non_null: Vec<&String> = types.iter().filter(|t| *t != NULL_TYPE).collect();
            if non_null.len() >= 2 {
                if non_null.len() < types.len() {
                    out.nullable = Some(true);
                }
                out.any_of = non_null
                    .into_iter()
                    .map(|type_name| union_branch(type_name, schema))
                    .collect();
                structural_moved = true;
            } else {
                out.schema_type = Some(SchemaType::Union(types.clone()));
            }
        }
        Some(SchemaType::Single(type_name)) => out.schema_type = single(type_name),
        None => {}
    }

    if !structural_moved {
        apply_object_keywords(schema, &mut out);
        let is_array = schema
            .schema_type
            .as_ref()
            .is_some_and(|t| t.contains("array"));
        if is_array || schema.items.is_some() {
            out.items = Some(Box::new(vendor_items(schema)));
        }
    }

    out.any_of
        .extend(schema.any_of.iter().map(to_vendor_schema));
    out
}

/// One `anyOf` branch of a split type union: the type alone, plus the
/// structural keywords that only make sense for that type.
fn union_branch(type_name: &str, schema: &ToolSchema) -> GeminiSchema {
    let mut branch = GeminiSchema {
        schema_type: single(type_name),
        ..GeminiSchema::default()
    };
    match type_name {
        "array" => branch.items = Some(Box::new(vendor_items(schema))),
        "object" => apply_object_keywords(schema, &mut branch),
        _ => {}
    }
    branch
}

fn vendor_items(schema: &ToolSchema) -> GeminiSchema {
    schema
        .items
        .as_deref()
        .map(to_vendor_schema)
        .unwrap_or_default()
}

fn apply_object_keywords(schema: &ToolSchema, out: &mut GeminiSchema) {
    if let Some(properties) = &schema.properties {
        out.property_ordering = properties.keys().cloned().collect();
        out.properties = Some(
            properties
                .iter()
                .map(|(name, prop)| (name.clone(), to_vendor_schema(prop)))
                .collect(),
        );
    }
    out.required.clone_from(&schema.required);
}

// ---------------------------------------------------------------------------
// Vendor -> canonical
// ---------------------------------------------------------------------------

/// Translate a Gemini schema back into the canonical form.
///
/// Upper-case vendor type names are lower-cased and `propertyOrdering`, when
/// present, decides property order.
#[must_use]
pub fn to_canonical_schema(schema: &GeminiSchema) -> ToolSchema {
    ToolSchema {
        schema_type: schema.schema_type.as_ref().and_then(canonical_type),
        title: schema.title.clone(),
        description: schema.description.clone(),
        properties: schema
            .properties
            .as_ref()
            .map(|props| ordered_canonical_properties(props, &schema.property_ordering)),
        items: schema
            .items
            .as_deref()
            .map(|items| Box::new(to_canonical_schema(items))),
        required: schema.required.clone(),
        enum_values: schema.enum_values.clone(),
        any_of: schema.any_of.iter().map(to_canonical_schema).collect(),
        format: schema.format.clone(),
        pattern: schema.pattern.clone(),
        min_length: schema.min_length,
        max_length: schema.max_length,
        minimum: schema.minimum,
        maximum: schema.maximum,
        min_items: schema.min_items,
        max_items: schema.max_items,
        default: schema.default.clone(),
        nullable: schema.nullable,
    }
}

fn ordered_canonical_properties(
    props: &IndexMap<String, GeminiSchema>,
    ordering: &[String],
) -> IndexMap<String, ToolSchema> {
    let mut out = IndexMap::with_capacity(props.len());
    for name in ordering {
        if let Some(prop) = props.get(name) {
            out.insert(name.clone(), to_canonical_schema(prop));
        }
    }
    for (name, prop) in props {
        if !out.contains_key(name) {
            out.insert(name.clone(), to_canonical_schema(prop));
        }
    }
    out
}

fn canonical_type(schema_type: &SchemaType) -> Option<SchemaType> {
    match schema_type {
        SchemaType::Single(name) => canonical_type_name(name).map(SchemaType::Single),
        SchemaType::Union(names) => {
            let names: Vec<String> = names.iter().filter_map(|n| canonical_type_name(n)).collect();
            (!names.is_empty()).then_some(SchemaType::Union(names))
        }
    }
}

fn canonical_type_name(name: &str) -> Option<String> {
    match name {
        "" | "TYPE_UNSPECIFIED" => None,
        other => Some(other.to_ascii_lowercase()),
    }
}
