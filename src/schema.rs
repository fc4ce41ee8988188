//! Space and index metadata cache.
//!
//! Spaces and indexes are looked up lazily in the `_space` and `_index`
//! system spaces and cached for the lifetime of the connection, or until
//! [`Connection::flush_schema`] is called. Every descriptor is registered
//! under both its numeric id and its name, so either form hits the cache
//! after the first lookup.
//!
//! Misses are resolved under the connection's exclusion lock. Concurrent
//! misses for the same key therefore cost a single round-trip: the second
//! caller re-checks the cache after acquiring the lock.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::{self, DeserializeOwned, IgnoredAny, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::connection::Connection;
use crate::error::{IprotoError, Result, SchemaError};
use crate::protocol::{system, IteratorType, Request, Response};

/// A space or index, named either way.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identifier {
    Name(String),
    Id(u32),
}

impl From<&str> for Identifier {
    fn from(name: &str) -> Self {
        Identifier::Name(name.to_string())
    }
}

impl From<String> for Identifier {
    fn from(name: String) -> Self {
        Identifier::Name(name)
    }
}

impl From<&String> for Identifier {
    fn from(name: &String) -> Self {
        Identifier::Name(name.clone())
    }
}

impl From<u32> for Identifier {
    fn from(id: u32) -> Self {
        Identifier::Id(id)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Name(name) => write!(f, "name '{}'", name),
            Identifier::Id(id) => write!(f, "id '{}'", id),
        }
    }
}

impl Serialize for Identifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Identifier::Name(name) => serializer.serialize_str(name),
            Identifier::Id(id) => serializer.serialize_u32(*id),
        }
    }
}

/// Cached descriptor of a space.
#[derive(Debug)]
pub struct SchemaSpace {
    id: u32,
    name: String,
    indexes: Mutex<HashMap<Identifier, Arc<SchemaIndex>>>,
}

impl SchemaSpace {
    fn new(id: u32, name: String) -> Self {
        Self {
            id,
            name,
            indexes: Mutex::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cached index by id or name.
    pub fn index(&self, index: &Identifier) -> Option<Arc<SchemaIndex>> {
        self.indexes.lock().get(index).cloned()
    }

    /// Number of distinct indexes cached so far.
    pub fn cached_indexes(&self) -> usize {
        self.indexes
            .lock()
            .keys()
            .filter(|key| matches!(key, Identifier::Id(_)))
            .count()
    }

    fn insert_index(&self, id: u32, name: String) -> Arc<SchemaIndex> {
        let index = Arc::new(SchemaIndex {
            id,
            name: name.clone(),
            space_id: self.id,
            space_name: self.name.clone(),
        });

        let mut indexes = self.indexes.lock();
        indexes.insert(Identifier::Id(id), Arc::clone(&index));
        indexes.insert(Identifier::Name(name), Arc::clone(&index));
        index
    }
}

/// Cached descriptor of an index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaIndex {
    id: u32,
    name: String,
    space_id: u32,
    space_name: String,
}

impl SchemaIndex {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn space_id(&self) -> u32 {
        self.space_id
    }

    pub fn space_name(&self) -> &str {
        &self.space_name
    }
}

/// Per-connection space registry.
pub(crate) struct SchemaCache {
    spaces: Mutex<HashMap<Identifier, Arc<SchemaSpace>>>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self {
            spaces: Mutex::new(HashMap::new()),
        }
    }

    pub fn space(&self, space: &Identifier) -> Option<Arc<SchemaSpace>> {
        self.spaces.lock().get(space).cloned()
    }

    fn insert_space(&self, id: u32, name: String) -> Arc<SchemaSpace> {
        let space = Arc::new(SchemaSpace::new(id, name.clone()));

        let mut spaces = self.spaces.lock();
        spaces.insert(Identifier::Id(id), Arc::clone(&space));
        spaces.insert(Identifier::Name(name), Arc::clone(&space));
        space
    }

    pub fn flush(&self) {
        self.spaces.lock().clear();
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.spaces.lock().is_empty()
    }
}

/// Leading fields shared by `_space` and `_index` tuples: two unsigned
/// ids followed by a name. Trailing fields are skipped.
///
/// `_space` is `[id, owner, name, ...]`, `_index` is
/// `[space_id, iid, name, ...]`.
struct MetaRow(u32, u32, String);

impl<'de> Deserialize<'de> for MetaRow {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct RowVisitor;

        impl<'de> Visitor<'de> for RowVisitor {
            type Value = MetaRow;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a system space tuple")
            }

            fn visit_seq<A: SeqAccess<'de>>(
                self,
                mut seq: A,
            ) -> std::result::Result<MetaRow, A::Error> {
                let first = seq
                    .next_element::<u32>()?
                    .ok_or_else(|| de::Error::invalid_length(0, &self))?;
                let second = seq
                    .next_element::<u32>()?
                    .ok_or_else(|| de::Error::invalid_length(1, &self))?;
                let name = seq
                    .next_element::<String>()?
                    .ok_or_else(|| de::Error::invalid_length(2, &self))?;
                while seq.next_element::<IgnoredAny>()?.is_some() {}
                Ok(MetaRow(first, second, name))
            }
        }

        deserializer.deserialize_seq(RowVisitor)
    }
}

/// Decode the single row of a unique-key metadata lookup.
///
/// No rows, or one empty row, is a miss.
fn single_row<T: DeserializeOwned>(response: &Response, what: &str) -> Result<Option<T>> {
    let shapes: Vec<Vec<IgnoredAny>> = response.rows()?;
    if shapes.len() > 1 {
        return Err(SchemaError::Inconsistent(format!(
            "{} rows returned for {}",
            shapes.len(),
            what
        ))
        .into());
    }
    if shapes.first().map_or(true, |row| row.is_empty()) {
        return Ok(None);
    }

    let mut rows: Vec<T> = response.rows()?;
    Ok(rows.pop())
}

impl Connection {
    /// Resolve a space by id or name.
    ///
    /// Cache hits never touch the network.
    pub async fn resolve_space(&self, space: impl Into<Identifier>) -> Result<Arc<SchemaSpace>> {
        let space = space.into();
        if let Some(found) = self.inner.schema.space(&space) {
            return Ok(found);
        }

        self.connect().await?;
        let _lock = self.inner.session.lock().await;
        if let Some(found) = self.inner.schema.space(&space) {
            return Ok(found);
        }

        let index = match space {
            Identifier::Name(_) => system::INDEX_SPACE_NAME,
            Identifier::Id(_) => system::INDEX_SPACE_PRIMARY,
        };
        let request = Request::select(
            system::SPACE_SPACE,
            index,
            &[&space],
            0,
            u32::MAX,
            IteratorType::Eq,
        )?;

        tracing::debug!("Looking up space with {}", space);
        let response = self.inner.dispatch_connected(&request).await?;

        match single_row::<MetaRow>(&response, &format!("space with {}", space))? {
            Some(MetaRow(id, _owner, name)) => {
                tracing::debug!("Cached space '{}' ({})", name, id);
                Ok(self.inner.schema.insert_space(id, name))
            }
            None => Err(SchemaError::SpaceNotFound(space.to_string()).into()),
        }
    }

    /// Resolve an index of a space, both by id or name.
    pub async fn resolve_index(
        &self,
        space: impl Into<Identifier>,
        index: impl Into<Identifier>,
    ) -> Result<Arc<SchemaIndex>> {
        let space = self.resolve_space(space).await?;
        let index = index.into();
        if let Some(found) = space.index(&index) {
            return Ok(found);
        }

        self.connect().await?;
        let _lock = self.inner.session.lock().await;
        if let Some(found) = space.index(&index) {
            return Ok(found);
        }

        let system_index = match index {
            Identifier::Name(_) => system::INDEX_INDEX_NAME,
            Identifier::Id(_) => system::INDEX_INDEX_PRIMARY,
        };
        let request = Request::select(
            system::SPACE_INDEX,
            system_index,
            &(space.id(), &index),
            0,
            u32::MAX,
            IteratorType::Eq,
        )?;

        tracing::debug!("Looking up index with {} in space '{}'", index, space.name());
        let response = self.inner.dispatch_connected(&request).await?;

        let what = format!("index with {} in space '{}'", index, space.name());
        match single_row::<MetaRow>(&response, &what)? {
            Some(MetaRow(_space_id, id, name)) => {
                tracing::debug!("Cached index '{}' ({}) of space '{}'", name, id, space.name());
                Ok(space.insert_index(id, name))
            }
            None => Err(IprotoError::from(SchemaError::IndexNotFound {
                space: space.name().to_string(),
                index: index.to_string(),
            })),
        }
    }

    /// Drop every cached space and index.
    pub fn flush_schema(&self) {
        tracing::debug!("Flushing schema cache");
        self.inner.schema.flush();
    }
}
