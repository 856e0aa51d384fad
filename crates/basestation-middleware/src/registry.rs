//! Ordered tag → schema resolution.

use std::sync::Arc;

use basestation_types::{MessageSchema, SchemaError, TagMatch};

/// Stable handle of a registered schema.  Used as the dispatch key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SchemaId(usize);

impl SchemaId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Every schema known to the gateway, in registration order.
///
/// Built once at start-up and shared by `Arc`; read-only afterwards.
#[derive(Debug, Default, Clone)]
pub struct SchemaRegistry {
    schemas: Vec<Arc<MessageSchema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `schema` at the end of the resolution order.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::DuplicateSchema`] when an exact schema with the
    /// same tag is already registered.  Prefix schemas never conflict.
    pub fn register(&mut self, schema: Arc<MessageSchema>) -> Result<SchemaId, SchemaError> {
        if schema.tag_match() == TagMatch::Exact
            && self
                .schemas
                .iter()
                .any(|s| s.tag_match() == TagMatch::Exact && s.tag() == schema.tag())
        {
            return Err(SchemaError::DuplicateSchema {
                tag: schema.tag().to_string(),
            });
        }
        self.schemas.push(schema);
        Ok(SchemaId(self.schemas.len() - 1))
    }

    /// First registered schema that claims `tag`.
    ///
    /// Schemas are scanned in registration order, so when two prefix families
    /// overlap the one registered first wins.
    pub fn resolve(&self, tag: &str) -> Option<&Arc<MessageSchema>> {
        self.resolve_id(tag).map(|id| &self.schemas[id.0])
    }

    pub fn resolve_id(&self, tag: &str) -> Option<SchemaId> {
        self.schemas
            .iter()
            .position(|s| s.matches(tag))
            .map(SchemaId)
    }

    /// Id of a registered schema, by identity.
    pub fn id_of(&self, schema: &Arc<MessageSchema>) -> Option<SchemaId> {
        self.schemas
            .iter()
            .position(|s| Arc::ptr_eq(s, schema))
            .map(SchemaId)
    }

    pub fn get(&self, id: SchemaId) -> Option<&Arc<MessageSchema>> {
        self.schemas.get(id.0)
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SchemaId, &Arc<MessageSchema>)> {
        self.schemas.iter().enumerate().map(|(i, s)| (SchemaId(i), s))
    }
}
