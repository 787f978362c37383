use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Failed to read tag catalog: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse tag catalog: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Tag catalog contains no tags")]
    Empty,
    #[error("Duplicate tag id in catalog: {0}")]
    DuplicateId(u32),
}

/// Device-side data type of a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagKind {
    Boolean,
    Integer,
    Float,
    DWord,
    #[serde(rename = "string")]
    Str,
}

impl TagKind {
    /// OMF value type this kind maps to. Floats and dwords share "number".
    pub fn omf_type(self) -> &'static str {
        match self {
            TagKind::Boolean => "boolean",
            TagKind::Integer => "integer",
            TagKind::Float | TagKind::DWord => "number",
            TagKind::Str => "string",
        }
    }

    /// PI point type for legacy point creation. Strings have no legacy
    /// mapping and return `None`.
    pub fn legacy_point_type(self) -> Option<&'static str> {
        match self {
            TagKind::Boolean => Some("Digital"),
            TagKind::Float | TagKind::DWord => Some("Float64"),
            TagKind::Integer => Some("Int32"),
            TagKind::Str => None,
        }
    }
}

/// A typed scalar read from a device tag.
#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    DWord(u32),
    Str(String),
}

impl TagValue {
    /// JSON rendering for the OMF data message: native boolean tokens,
    /// quoted strings, raw numbers.
    pub fn to_omf_json(&self) -> serde_json::Value {
        match self {
            TagValue::Bool(b) => serde_json::Value::from(*b),
            TagValue::Int(i) => serde_json::Value::from(*i),
            TagValue::Float(f) => serde_json::Value::from(*f),
            TagValue::DWord(d) => serde_json::Value::from(*d),
            TagValue::Str(s) => serde_json::Value::from(s.clone()),
        }
    }

    /// JSON rendering for the legacy stream body: the raw tag value,
    /// booleans as 0/1 exactly as the device reports them.
    pub fn to_legacy_json(&self) -> serde_json::Value {
        match self {
            TagValue::Bool(b) => serde_json::Value::from(u8::from(*b)),
            other => other.to_omf_json(),
        }
    }
}

/// One time-series sample produced by the device. Immutable once created.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub tag_id: u32,
    pub tag_name: String,
    pub kind: TagKind,
    pub value: TagValue,
    /// Epoch seconds, device clock, UTC.
    pub timestamp: i64,
}

/// Static description of one tag, as listed in the catalog file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagMeta {
    pub id: u32,
    pub name: String,
    pub kind: TagKind,
}

/// The set of tags known at startup, plus the id range used to size the
/// per-batch and per-webid arenas (`index = tag_id - lowest_id`).
#[derive(Debug, Clone)]
pub struct TagCatalog {
    tags: Vec<TagMeta>,
    lowest_id: u32,
    highest_id: u32,
}

impl TagCatalog {
    pub fn new(tags: Vec<TagMeta>) -> Result<Self, CatalogError> {
        let lowest_id = tags.iter().map(|t| t.id).min().ok_or(CatalogError::Empty)?;
        let highest_id = tags.iter().map(|t| t.id).max().ok_or(CatalogError::Empty)?;

        let mut seen = vec![false; (highest_id - lowest_id + 1) as usize];
        for tag in &tags {
            let index = (tag.id - lowest_id) as usize;
            if seen[index] {
                return Err(CatalogError::DuplicateId(tag.id));
            }
            seen[index] = true;
        }

        Ok(Self {
            tags,
            lowest_id,
            highest_id,
        })
    }

    /// Load a catalog from a JSON file of `[{id, name, kind}]` records.
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let raw = std::fs::read_to_string(path)?;
        let tags: Vec<TagMeta> = serde_json::from_str(&raw)?;
        Self::new(tags)
    }

    pub fn tags(&self) -> &[TagMeta] {
        &self.tags
    }

    pub fn lowest_id(&self) -> u32 {
        self.lowest_id
    }

    pub fn highest_id(&self) -> u32 {
        self.highest_id
    }

    /// Number of arena slots covering the id range.
    pub fn arena_size(&self) -> usize {
        (self.highest_id - self.lowest_id + 1) as usize
    }

    pub fn get(&self, tag_id: u32) -> Option<&TagMeta> {
        self.tags.iter().find(|tag| tag.id == tag_id)
    }

    /// Arena slot for a tag id, or `None` when the id falls outside the
    /// range seen at startup.
    pub fn index_of(&self, tag_id: u32) -> Option<usize> {
        if tag_id < self.lowest_id || tag_id > self.highest_id {
            return None;
        }
        Some((tag_id - self.lowest_id) as usize)
    }
}

/// Legacy per-tag server-generated identifiers, stored in the same
/// `tag_id - lowest_id` arena as the batch fragments. Filled during
/// provisioning; a `None` slot means the tag never resolved and is excluded
/// from delivery.
#[derive(Debug, Clone)]
pub struct WebIdMap {
    ids: Vec<Option<String>>,
    lowest_id: u32,
}

impl WebIdMap {
    pub fn new(catalog: &TagCatalog) -> Self {
        Self {
            ids: vec![None; catalog.arena_size()],
            lowest_id: catalog.lowest_id(),
        }
    }

    pub fn set(&mut self, tag_id: u32, web_id: String) {
        if let Some(slot) = self
            .ids
            .get_mut(tag_id.wrapping_sub(self.lowest_id) as usize)
        {
            *slot = Some(web_id);
        }
    }

    pub fn get(&self, tag_id: u32) -> Option<&str> {
        self.ids
            .get(tag_id.wrapping_sub(self.lowest_id) as usize)?
            .as_deref()
    }

    pub fn resolved_count(&self) -> usize {
        self.ids.iter().filter(|id| id.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(id: u32, name: &str, kind: TagKind) -> TagMeta {
        TagMeta {
            id,
            name: name.to_string(),
            kind,
        }
    }

    #[test]
    fn catalog_index_offsets_from_lowest_id() {
        let catalog = TagCatalog::new(vec![
            meta(5, "a", TagKind::Float),
            meta(9, "b", TagKind::Boolean),
        ])
        .unwrap();

        assert_eq!(catalog.arena_size(), 5);
        assert_eq!(catalog.index_of(5), Some(0));
        assert_eq!(catalog.index_of(9), Some(4));
        assert_eq!(catalog.index_of(4), None);
        assert_eq!(catalog.index_of(10), None);
    }

    #[test]
    fn empty_catalog_is_rejected() {
        assert!(matches!(TagCatalog::new(vec![]), Err(CatalogError::Empty)));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let result = TagCatalog::new(vec![
            meta(3, "a", TagKind::Integer),
            meta(3, "b", TagKind::Integer),
        ]);
        assert!(matches!(result, Err(CatalogError::DuplicateId(3))));
    }

    #[test]
    fn boolean_renders_per_protocol() {
        let value = TagValue::Bool(true);
        assert_eq!(value.to_omf_json(), serde_json::json!(true));
        assert_eq!(value.to_legacy_json(), serde_json::json!(1));
    }

    #[test]
    fn kind_serde_names_match_catalog_file_format() {
        let kind: TagKind = serde_json::from_str("\"dword\"").unwrap();
        assert_eq!(kind, TagKind::DWord);
        let kind: TagKind = serde_json::from_str("\"string\"").unwrap();
        assert_eq!(kind, TagKind::Str);
    }
}
