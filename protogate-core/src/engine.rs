//! # Invocation Engine
//!
//! Namespace-keyed registry of [`ProtocolController`] generations.
//!
//! A namespace moves from absent to `Active(1)`, `Active(2)`, ... and never to a
//! failed state: a push that does not build leaves the serving generation alone.
//!
//! Schema parsing and controller construction run before the write lock is taken,
//! which is only held to swap one map entry. [`Engine::invoke`] holds the read
//! lock just long enough to clone the generation's `Arc`, so long calls never
//! block updates and each call sees exactly one generation from start to end.
use crate::{
    checksum::Checksum,
    config::EngineConfig,
    controller::{InvokeError, ProtocolController},
    descriptor::{DescriptorSource, SourceError},
    grpc::client::RpcChannel,
    types::{DynamicRequest, ResultSink},
};
use parking_lot::RwLock;
use prost::Message;
use prost_types::FileDescriptorSet;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    #[error("Schema for namespace '{namespace}' rejected, previous generation kept: {source}")]
    SchemaParse {
        namespace: String,
        #[source]
        source: SourceError,
    },
}

/// One published schema generation.
#[derive(Debug)]
pub struct Generation {
    /// Starts at 1 and grows by one on every successful update of the namespace.
    pub version: u64,
    pub checksum: Checksum,
    pub controller: ProtocolController,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationInfo {
    pub version: u64,
    pub checksum: Checksum,
}

#[derive(Debug, Default)]
pub struct Engine {
    config: EngineConfig,
    registry: RwLock<HashMap<String, Arc<Generation>>>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            registry: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Publishes the schema in `bytes` for `namespace`.
    ///
    /// Returns `Ok(true)` when the content matches the serving generation and
    /// nothing was rebuilt.
    pub fn update(&self, namespace: &str, bytes: &[u8]) -> Result<bool, UpdateError> {
        let checksum = Checksum::of(bytes);
        self.publish(namespace, checksum, || {
            ProtocolController::build(bytes, &self.config)
        })
    }

    /// Publishes an already resolved source, e.g. one fetched through reflection.
    pub fn update_from_source(
        &self,
        namespace: &str,
        source: DescriptorSource,
    ) -> Result<bool, UpdateError> {
        let set = FileDescriptorSet {
            file: source.pool().file_descriptor_protos().cloned().collect(),
        };
        let checksum = Checksum::of(&set.encode_to_vec());
        self.publish(namespace, checksum, || {
            Ok(ProtocolController::from_source(source, &self.config))
        })
    }

    fn publish<F>(&self, namespace: &str, checksum: Checksum, build: F) -> Result<bool, UpdateError>
    where
        F: FnOnce() -> Result<ProtocolController, SourceError>,
    {
        if self.generation(namespace).map(|g| g.checksum).as_ref() == Some(&checksum) {
            tracing::debug!(namespace, %checksum, "schema unchanged, skipping rebuild");
            return Ok(true);
        }

        let controller = build().map_err(|source| {
            tracing::warn!(
                namespace,
                %checksum,
                error = %source,
                "schema rejected, keeping previous generation"
            );
            UpdateError::SchemaParse {
                namespace: namespace.to_string(),
                source,
            }
        })?;
        let services = controller.source().list_services().len();

        let version = {
            let mut registry = self.registry.write();
            let version = match registry.get(namespace) {
                // Published by a concurrent update while this one was building.
                Some(current) if current.checksum == checksum => return Ok(true),
                Some(current) => current.version + 1,
                None => 1,
            };
            registry.insert(
                namespace.to_string(),
                Arc::new(Generation {
                    version,
                    checksum: checksum.clone(),
                    controller,
                }),
            );
            version
        };

        tracing::info!(namespace, version, %checksum, services, "published schema generation");

        Ok(false)
    }

    /// Runs one unary call against the generation serving `request.namespace`.
    pub async fn invoke<C, R>(
        &self,
        channel: &C,
        request: &DynamicRequest,
        sink: &mut R,
    ) -> Result<(), InvokeError>
    where
        C: RpcChannel + ?Sized,
        R: ResultSink + ?Sized,
    {
        let generation = self
            .current(&request.namespace)
            .ok_or_else(|| InvokeError::NamespaceNotRegistered(request.namespace.clone()))?;

        generation
            .controller
            .invoke_unary(channel, request, sink)
            .await
    }

    /// The generation serving `namespace`, kept alive for as long as the caller holds it.
    pub fn current(&self, namespace: &str) -> Option<Arc<Generation>> {
        self.registry.read().get(namespace).cloned()
    }

    pub fn generation(&self, namespace: &str) -> Option<GenerationInfo> {
        self.current(namespace).map(|g| GenerationInfo {
            version: g.version,
            checksum: g.checksum.clone(),
        })
    }

    pub fn namespaces(&self) -> Vec<String> {
        let mut namespaces: Vec<String> = self.registry.read().keys().cloned().collect();
        namespaces.sort();
        namespaces
    }

    /// Drops a namespace. In-flight calls finish on the generation they hold.
    pub fn evict(&self, namespace: &str) -> bool {
        let removed = self.registry.write().remove(namespace).is_some();
        if removed {
            tracing::info!(namespace, "evicted namespace");
        }
        removed
    }

    /// Services known to any namespace, sorted and deduplicated.
    pub fn list_services(&self) -> Vec<String> {
        let services: BTreeSet<String> = self
            .snapshot()
            .iter()
            .flat_map(|g| g.controller.source().list_services())
            .collect();
        services.into_iter().collect()
    }

    /// Methods of `service` across every namespace that defines it.
    pub fn list_methods(&self, service: &str) -> Vec<String> {
        let methods: BTreeSet<String> = self
            .snapshot()
            .iter()
            .filter_map(|g| g.controller.source().list_methods(service))
            .flatten()
            .collect();
        methods.into_iter().collect()
    }

    fn snapshot(&self) -> Vec<Arc<Generation>> {
        self.registry.read().values().cloned().collect()
    }
}
