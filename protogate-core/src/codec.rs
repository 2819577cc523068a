//! # JSON Codec
//!
//! Converts between JSON payloads and [`SchemaMessage`]s of one schema generation.
//!
//! * **Unmarshal**: unknown JSON fields are ignored so older schemas keep accepting
//!   newer clients. Structural mismatches surface as [`CodecError::Unmarshal`], the
//!   only signal the gateway has that a client request is malformed.
//! * **Marshal**: fields holding their default value are emitted, so consumers see
//!   the same JSON shape whatever the upstream populated.
//!
//! `google.protobuf.Any` payloads are resolved against the pool of the message being
//! decoded. A codec refuses messages from another pool, so two tenants' schemas never
//! resolve each other's `Any` types.
use crate::{config::EngineConfig, message::SchemaMessage};
use prost_reflect::{DeserializeOptions, DescriptorPool, DynamicMessage, SerializeOptions};
use std::io::{Read, Write};

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("JSON payload does not match message '{message}': {source}")]
    Unmarshal {
        message: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode message '{message}' as JSON: {source}")]
    Marshal {
        message: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Message '{0}' belongs to a different schema generation")]
    ForeignSchema(String),

    #[error("No message has been attached to the result")]
    EmptyResult,
}

#[derive(Debug, Clone)]
pub struct JsonCodec {
    pool: DescriptorPool,
    serialize: SerializeOptions,
    deserialize: DeserializeOptions,
}

impl JsonCodec {
    pub fn new(pool: DescriptorPool, config: &EngineConfig) -> Self {
        let serialize = SerializeOptions::new()
            .skip_default_fields(!config.emit_default_fields)
            .use_proto_field_name(config.use_proto_field_names);
        let deserialize = DeserializeOptions::new().deny_unknown_fields(false);

        Self {
            pool,
            serialize,
            deserialize,
        }
    }

    /// Decodes JSON from `reader` into `shell`, replacing its previous contents.
    pub fn unmarshal<R: Read>(&self, reader: R, shell: &mut SchemaMessage) -> Result<(), CodecError> {
        let descriptor = self.owned_descriptor(shell)?;

        let mut deserializer = serde_json::Deserializer::from_reader(reader);
        let decoded = DynamicMessage::deserialize_with_options(
            descriptor.clone(),
            &mut deserializer,
            &self.deserialize,
        )
        .and_then(|message| deserializer.end().map(|_| message))
        .map_err(|source| CodecError::Unmarshal {
            message: descriptor.full_name().to_string(),
            source,
        })?;

        *shell.as_dynamic_mut() = decoded;
        Ok(())
    }

    /// Encodes `message` as JSON into `writer`.
    pub fn marshal<W: Write>(&self, writer: W, message: &SchemaMessage) -> Result<(), CodecError> {
        let descriptor = self.owned_descriptor(message)?;

        let mut serializer = serde_json::Serializer::new(writer);
        message
            .as_dynamic()
            .serialize_with_options(&mut serializer, &self.serialize)
            .map_err(|source| CodecError::Marshal {
                message: descriptor.full_name().to_string(),
                source,
            })
    }

    pub fn to_vec(&self, message: &SchemaMessage) -> Result<Vec<u8>, CodecError> {
        let mut buf = Vec::with_capacity(message.encoded_len() * 2);
        self.marshal(&mut buf, message)?;
        Ok(buf)
    }

    pub fn pool(&self) -> &DescriptorPool {
        &self.pool
    }

    fn owned_descriptor(
        &self,
        message: &SchemaMessage,
    ) -> Result<prost_reflect::MessageDescriptor, CodecError> {
        let descriptor = message.descriptor();
        if descriptor.parent_pool() != &self.pool {
            return Err(CodecError::ForeignSchema(descriptor.full_name().to_string()));
        }
        Ok(descriptor)
    }
}
