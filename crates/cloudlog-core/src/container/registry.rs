//! Schema and channel registry
//!
//! Assigns stable ids for the life of one container. Entries are write-once:
//! there is no removal.

use std::collections::BTreeMap;

use super::{Channel, ChannelId, ContainerError, Schema, SchemaId};

/// Schemas and channels known to one container
#[derive(Debug, Clone, Default)]
pub struct Registry {
    schemas: BTreeMap<SchemaId, Schema>,
    channels: BTreeMap<ChannelId, Channel>,
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a schema and return its id (ids start at 1).
    ///
    /// Registering identical name, encoding and data again returns the
    /// existing id. The same name and encoding with different data fails.
    pub fn register_schema(
        &mut self,
        name: &str,
        encoding: &str,
        data: &[u8],
    ) -> Result<SchemaId, ContainerError> {
        if let Some(existing) = self
            .schemas
            .values()
            .find(|s| s.name == name && s.encoding == encoding)
        {
            return if existing.data == data {
                Ok(existing.id)
            } else {
                Err(ContainerError::DuplicateSchema {
                    name: name.to_string(),
                    encoding: encoding.to_string(),
                })
            };
        }

        let id = match self.schemas.keys().next_back() {
            None => 1,
            Some(&last) => last
                .checked_add(1)
                .ok_or(ContainerError::RegistryFull("schema"))?,
        };
        self.schemas.insert(
            id,
            Schema {
                id,
                name: name.to_string(),
                encoding: encoding.to_string(),
                data: data.to_vec(),
            },
        );
        Ok(id)
    }

    /// Register a channel and return its id (ids start at 0).
    ///
    /// `schema_id` must be 0 or a registered schema. An identical channel
    /// registered again keeps its id.
    pub fn register_channel(
        &mut self,
        topic: &str,
        message_encoding: &str,
        schema_id: SchemaId,
        metadata: &BTreeMap<String, String>,
    ) -> Result<ChannelId, ContainerError> {
        if schema_id != 0 && !self.schemas.contains_key(&schema_id) {
            return Err(ContainerError::UnknownSchema(schema_id));
        }

        if let Some(existing) = self.channels.values().find(|c| {
            c.topic == topic
                && c.message_encoding == message_encoding
                && c.schema_id == schema_id
                && &c.metadata == metadata
        }) {
            return Ok(existing.id);
        }

        let id = match self.channels.keys().next_back() {
            None => 0,
            Some(&last) => last
                .checked_add(1)
                .ok_or(ContainerError::RegistryFull("channel"))?,
        };
        self.channels.insert(
            id,
            Channel {
                id,
                schema_id,
                topic: topic.to_string(),
                message_encoding: message_encoding.to_string(),
                metadata: metadata.clone(),
            },
        );
        Ok(id)
    }

    /// Insert a schema read back from a file, keeping its id
    pub(crate) fn restore_schema(&mut self, schema: Schema) {
        self.schemas.insert(schema.id, schema);
    }

    /// Insert a channel read back from a file, keeping its id
    pub(crate) fn restore_channel(&mut self, channel: Channel) {
        self.channels.insert(channel.id, channel);
    }

    /// Look up a schema
    pub fn schema(&self, id: SchemaId) -> Option<&Schema> {
        self.schemas.get(&id)
    }

    /// Look up a channel
    pub fn channel(&self, id: ChannelId) -> Option<&Channel> {
        self.channels.get(&id)
    }

    /// Find the first channel with a topic
    pub fn channel_by_topic(&self, topic: &str) -> Option<&Channel> {
        self.channels.values().find(|c| c.topic == topic)
    }

    /// Schemas in id order
    pub fn schemas(&self) -> impl Iterator<Item = &Schema> {
        self.schemas.values()
    }

    /// Channels in id order
    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }

    /// Number of registered schemas
    pub fn schema_count(&self) -> usize {
        self.schemas.len()
    }

    /// Number of registered channels
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_metadata() -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    #[test]
    fn test_schema_ids_start_at_one() {
        let mut registry = Registry::new();
        assert_eq!(registry.register_schema("a", "flatbuffer", b"1").unwrap(), 1);
        assert_eq!(registry.register_schema("b", "flatbuffer", b"2").unwrap(), 2);
        assert_eq!(registry.schema_count(), 2);
    }

    #[test]
    fn test_schema_registration_idempotent() {
        let mut registry = Registry::new();
        let first = registry.register_schema("PointCloud", "flatbuffer", b"desc").unwrap();
        let again = registry.register_schema("PointCloud", "flatbuffer", b"desc").unwrap();
        assert_eq!(first, again);
        assert_eq!(registry.schema_count(), 1);
    }

    #[test]
    fn test_duplicate_schema_with_different_bytes() {
        let mut registry = Registry::new();
        registry.register_schema("PointCloud", "flatbuffer", b"v1").unwrap();
        let err = registry
            .register_schema("PointCloud", "flatbuffer", b"v2")
            .unwrap_err();
        assert!(matches!(err, ContainerError::DuplicateSchema { .. }));

        // Same name under a different encoding is a different schema
        assert!(registry.register_schema("PointCloud", "protobuf", b"v2").is_ok());
    }

    #[test]
    fn test_channel_requires_schema() {
        let mut registry = Registry::new();
        let err = registry
            .register_channel("pointcloud", "flatbuffer", 4, &no_metadata())
            .unwrap_err();
        assert!(matches!(err, ContainerError::UnknownSchema(4)));

        // Schemaless channels are allowed
        assert_eq!(
            registry
                .register_channel("raw", "bytes", 0, &no_metadata())
                .unwrap(),
            0
        );
    }

    #[test]
    fn test_channel_ids_and_lookup() {
        let mut registry = Registry::new();
        let schema = registry.register_schema("PointCloud", "flatbuffer", b"x").unwrap();
        let a = registry
            .register_channel("front", "flatbuffer", schema, &no_metadata())
            .unwrap();
        let b = registry
            .register_channel("rear", "flatbuffer", schema, &no_metadata())
            .unwrap();
        let a_again = registry
            .register_channel("front", "flatbuffer", schema, &no_metadata())
            .unwrap();

        assert_eq!((a, b, a_again), (0, 1, 0));
        assert_eq!(registry.channel_by_topic("rear").unwrap().id, 1);
        assert_eq!(registry.channel(0).unwrap().schema_id, schema);
    }
}
