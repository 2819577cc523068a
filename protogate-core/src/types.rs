use crate::{
    codec::{CodecError, JsonCodec},
    message::SchemaMessage,
};
use bytes::Bytes;
use std::fmt::Debug;
use std::time::Duration;
use tonic::metadata::MetadataMap;

/// A request routed to the engine by the dispatch layer.
#[derive(Debug, Clone, Default)]
pub struct DynamicRequest {
    /// The tenant whose schema generation serves this call.
    pub namespace: String,
    /// The fully qualified name of the service (e.g., `my.package.Service`).
    pub service: String,
    /// The name of the method to call (e.g., `SayHello`).
    pub method: String,
    /// The JSON body. Empty or whitespace-only bodies decode to the default message.
    pub body: Bytes,
    /// Custom gRPC metadata (headers) to attach to the request.
    pub headers: Vec<(String, String)>,
    /// Deadline forwarded to the upstream as `grpc-timeout`.
    pub timeout: Option<Duration>,
}

impl DynamicRequest {
    pub fn new(
        namespace: impl Into<String>,
        service: impl Into<String>,
        method: impl Into<String>,
        body: impl Into<Bytes>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            service: service.into(),
            method: method.into(),
            body: body.into(),
            ..Default::default()
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub(crate) fn has_empty_body(&self) -> bool {
        self.body.iter().all(u8::is_ascii_whitespace)
    }
}

/// Where a controller leaves the outcome of a call.
///
/// The response stays a [`SchemaMessage`] until someone asks for bytes, so
/// callers that discard results never pay for JSON encoding.
pub trait ResultSink: Send {
    fn set_metadata(&mut self, metadata: MetadataMap);

    fn set_message(&mut self, message: SchemaMessage, codec: &JsonCodec);

    /// Serializes the attached message to JSON.
    fn marshal(&self) -> Result<Vec<u8>, CodecError>;
}

/// The default [`ResultSink`].
#[derive(Debug, Clone, Default)]
pub struct DynamicResponse {
    metadata: MetadataMap,
    message: Option<(SchemaMessage, JsonCodec)>,
}

impl DynamicResponse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Response headers merged with trailers.
    pub fn metadata(&self) -> &MetadataMap {
        &self.metadata
    }

    pub fn message(&self) -> Option<&SchemaMessage> {
        self.message.as_ref().map(|(message, _)| message)
    }

    pub fn into_message(self) -> Option<SchemaMessage> {
        self.message.map(|(message, _)| message)
    }

    /// Marshals and parses the response, mostly useful for tooling and tests.
    pub fn to_json(&self) -> Result<serde_json::Value, CodecError> {
        let bytes = self.marshal()?;
        let message = self
            .message()
            .map(|m| m.descriptor().full_name().to_string())
            .unwrap_or_default();
        serde_json::from_slice(&bytes).map_err(|source| CodecError::Marshal { message, source })
    }
}

impl ResultSink for DynamicResponse {
    fn set_metadata(&mut self, metadata: MetadataMap) {
        self.metadata = metadata;
    }

    fn set_message(&mut self, message: SchemaMessage, codec: &JsonCodec) {
        self.message = Some((message, codec.clone()));
    }

    fn marshal(&self) -> Result<Vec<u8>, CodecError> {
        let (message, codec) = self.message.as_ref().ok_or(CodecError::EmptyResult)?;
        codec.to_vec(message)
    }
}
