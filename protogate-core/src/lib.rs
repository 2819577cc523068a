//! # Protogate Core
//!
//! `protogate-core` is a dynamic gRPC invocation engine for multi-tenant gateways.
//! Each tenant (a *namespace*) pushes a serialized schema blob, and the engine
//! turns JSON requests into typed unary calls against that schema, without any
//! generated code.
//!
//! ## Key Components
//!
//! * **[`Engine`]:** Namespace-keyed registry of schema generations. `update` hot-swaps
//!   a namespace atomically and keeps the previous generation when a push is broken;
//!   `invoke` dispatches one call to the generation serving the request's namespace.
//! * **[`ProtocolController`]:** One immutable generation: a [`DescriptorSource`], its
//!   [`JsonCodec`] and a bounded [`TypeCache`] of resolved methods.
//! * **[`DescriptorLifecycle`]:** Reacts to version-change events, validates the local
//!   disk cache by checksum, downloads fresh blobs and feeds them to the engine.
//! * **[`DynamicRequest`] & [`DynamicResponse`]:** The I/O types. Requests carry JSON,
//!   responses stay typed until someone asks for JSON.
//!
//! ## Transport
//!
//! The engine never opens connections. Calls go through an [`RpcChannel`] supplied by
//! the caller; [`GrpcChannel`] implements it on top of `tonic`.
//!
//! ## Re-exports
//!
//! This crate re-exports `prost`, `prost-reflect`, and `tonic` to ensure that consumers
//! use compatible versions of these underlying dependencies.
pub mod checksum;
pub mod codec;
pub mod config;
pub mod controller;
pub mod descriptor;
pub mod engine;
pub mod grpc;
pub mod lifecycle;
pub mod message;
pub mod reflection;
pub mod type_cache;
mod types;

pub use checksum::Checksum;
pub use codec::JsonCodec;
pub use config::{EngineConfig, GatewayConfig, LifecycleConfig};
pub use controller::{InvokeError, MethodHandle, ProtocolController};
pub use descriptor::{Descriptor, DescriptorSource, SourceError, SourceKind};
pub use engine::{Engine, UpdateError};
pub use grpc::client::{GrpcChannel, RpcChannel};
pub use lifecycle::{DescriptorLifecycle, VersionChange};
pub use message::{ExtensionRegistry, MessageFactory, SchemaMessage};
pub use reflection::client::ReflectionClient;
pub use type_cache::TypeCache;
pub use types::{DynamicRequest, DynamicResponse, ResultSink};

// Re-exports
pub use prost;
pub use prost_reflect;
pub use tonic;

/// Type alias for the standard boxed error used in generic bounds.
type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
