//! # Protocol Controller
//!
//! One controller is one schema generation of one namespace: a
//! [`DescriptorSource`], the [`JsonCodec`] bound to it and a [`TypeCache`] of
//! resolved methods. Controllers are built whole from raw bytes and never
//! mutated afterwards; a schema change produces a new controller.
//!
//! A unary call goes through these steps:
//!
//! 1. Resolve the [`MethodHandle`] (cache first, then the descriptor graph).
//! 2. Build a request shell bound to the method's extension registry.
//! 3. Decode the JSON payload into it. A payload that does not fit the schema is
//!    never sent upstream.
//! 4. Execute the call on the injected [`RpcChannel`].
//! 5. Attach the response message and its metadata to the [`ResultSink`]. JSON
//!    encoding happens later, only if the caller asks for it.
use crate::{
    codec::{CodecError, JsonCodec},
    config::EngineConfig,
    descriptor::{DescriptorSource, SourceError, SourceKind},
    grpc::client::RpcChannel,
    message::{ExtensionRegistry, MessageFactory, SchemaMessage},
    type_cache::TypeCache,
    types::{DynamicRequest, ResultSink},
};
use prost_reflect::{MethodDescriptor, ServiceDescriptor};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tonic::metadata::{
    MetadataKey, MetadataValue,
    errors::{InvalidMetadataKey, InvalidMetadataValue},
};

#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    #[error("Namespace '{0}' has no registered schema")]
    NamespaceNotRegistered(String),

    #[error("Method '{service}/{method}' not found")]
    MethodNotFound { service: String, method: String },

    #[error("Method '{0}' is streaming, only unary calls are supported")]
    NotUnary(String),

    #[error("Invalid request payload: {0}")]
    PayloadUnmarshal(#[source] CodecError),

    #[error("Invalid metadata (header) key '{key}': '{source}'")]
    InvalidMetadataKey {
        key: String,
        source: InvalidMetadataKey,
    },

    #[error("Invalid metadata (header) value for key '{key}': '{source}'")]
    InvalidMetadataValue {
        key: String,
        source: InvalidMetadataValue,
    },

    #[error(transparent)]
    Status(#[from] tonic::Status),
}

/// A method resolved within one generation.
#[derive(Debug)]
pub struct MethodHandle {
    pub service: ServiceDescriptor,
    pub method: MethodDescriptor,
    pub extensions: Arc<ExtensionRegistry>,
}

#[derive(Debug)]
pub struct ProtocolController {
    source: DescriptorSource,
    codec: JsonCodec,
    cache: TypeCache,
    factory: MessageFactory,
    resolutions: AtomicU64,
}

impl ProtocolController {
    /// Parses `bytes` and builds a controller, or fails without side effects.
    pub fn build(bytes: &[u8], config: &EngineConfig) -> Result<Self, SourceError> {
        let source = DescriptorSource::load(bytes)?;
        Ok(Self::from_source(source, config))
    }

    pub fn from_source(source: DescriptorSource, config: &EngineConfig) -> Self {
        let codec = JsonCodec::new(source.pool().clone(), config);
        Self {
            source,
            codec,
            cache: TypeCache::new(config.type_cache_capacity),
            factory: MessageFactory,
            resolutions: AtomicU64::new(0),
        }
    }

    /// Where this generation's schema came from.
    pub fn mode(&self) -> SourceKind {
        self.source.kind()
    }

    pub fn source(&self) -> &DescriptorSource {
        &self.source
    }

    pub fn codec(&self) -> &JsonCodec {
        &self.codec
    }

    pub fn type_cache(&self) -> &TypeCache {
        &self.cache
    }

    /// How many times a method handle had to be built from the descriptor graph.
    pub fn resolution_count(&self) -> u64 {
        self.resolutions.load(Ordering::Relaxed)
    }

    pub fn resolve(&self, service: &str, method: &str) -> Result<Arc<MethodHandle>, InvokeError> {
        if let Some(handle) = self.cache.get(service, method) {
            return Ok(handle);
        }

        let not_found = || InvokeError::MethodNotFound {
            service: service.to_string(),
            method: method.to_string(),
        };

        let service_descriptor = self
            .source
            .pool()
            .get_service_by_name(service)
            .ok_or_else(not_found)?;
        let method_descriptor = service_descriptor
            .methods()
            .find(|m| m.name() == method)
            .ok_or_else(not_found)?;

        let extensions = Arc::new(ExtensionRegistry::for_method(
            &self.source,
            &method_descriptor,
        ));
        self.resolutions.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(
            service,
            method,
            extensions = extensions.len(),
            "resolved method handle"
        );

        let handle = Arc::new(MethodHandle {
            service: service_descriptor,
            method: method_descriptor,
            extensions,
        });
        self.cache.put(service, method, handle.clone());

        Ok(handle)
    }

    /// Executes one unary call and leaves the outcome in `sink`.
    ///
    /// Transport failures come back as [`InvokeError::Status`] with the upstream
    /// status untouched.
    pub async fn invoke_unary<C, R>(
        &self,
        channel: &C,
        request: &DynamicRequest,
        sink: &mut R,
    ) -> Result<(), InvokeError>
    where
        C: RpcChannel + ?Sized,
        R: ResultSink + ?Sized,
    {
        let handle = self.resolve(&request.service, &request.method)?;

        if handle.method.is_client_streaming() || handle.method.is_server_streaming() {
            return Err(InvokeError::NotUnary(handle.method.full_name().to_string()));
        }

        let mut message = self
            .factory
            .new_instance(&handle.method.input(), handle.extensions.clone());

        if !request.has_empty_body() {
            self.codec
                .unmarshal(request.body.as_ref(), &mut message)
                .map_err(InvokeError::PayloadUnmarshal)?;
        }

        let grpc_request = build_request(message.into_dynamic(), &request.headers, request.timeout)?;

        let response = channel.unary(&handle.method, grpc_request).await?;
        let (metadata, message, _) = response.into_parts();

        sink.set_metadata(metadata);
        sink.set_message(
            SchemaMessage::from_dynamic(message, handle.extensions.clone()),
            &self.codec,
        );

        Ok(())
    }
}

fn build_request<T>(
    payload: T,
    headers: &[(String, String)],
    timeout: Option<Duration>,
) -> Result<tonic::Request<T>, InvokeError> {
    let mut request = tonic::Request::new(payload);

    for (k, v) in headers {
        let key = MetadataKey::from_str(k).map_err(|source| InvokeError::InvalidMetadataKey {
            key: k.clone(),
            source,
        })?;
        let val = MetadataValue::from_str(v).map_err(|source| InvokeError::InvalidMetadataValue {
            key: k.clone(),
            source,
        })?;
        // Repeated headers are kept, not overwritten.
        request.metadata_mut().append(key, val);
    }

    if let Some(timeout) = timeout {
        request.set_timeout(timeout);
    }

    Ok(request)
}
