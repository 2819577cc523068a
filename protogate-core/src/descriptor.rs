//! # Descriptor Source
//!
//! The resolved, queryable form of one schema blob.
//!
//! A blob is a serialized `FileDescriptorSet`. Files inside it may appear in any
//! order, so they are resolved depth-first: every file's imports are resolved
//! before the file itself, and each file name is resolved exactly once no matter
//! how many other files import it. The resulting order is what gets registered
//! into a fresh [`DescriptorPool`], so every generation owns an isolated pool and
//! nothing leaks between tenants.
//!
//! A source is immutable once built. Superseding it means building a new one.
use crate::{
    BoxError,
    reflection::client::{ReflectionClient, ReflectionError},
};
use http_body::Body as HttpBody;
use prost::Message;
use prost_reflect::{
    DescriptorError, DescriptorPool, EnumDescriptor, ExtensionDescriptor, MessageDescriptor,
    MethodDescriptor, ServiceDescriptor,
};
use prost_types::{FileDescriptorProto, FileDescriptorSet};
use std::collections::{BTreeSet, HashMap, HashSet};

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Failed to decode file descriptor set: '{0}'")]
    Decode(#[from] prost::DecodeError),

    #[error("Invalid schema: '{0}'")]
    Descriptor(#[from] DescriptorError),

    #[error("File descriptor at position {0} has no name")]
    UnnamedFile(usize),

    #[error("File '{0}' is declared twice with different contents")]
    ConflictingFile(String),

    #[error("Dependency cycle detected while resolving '{0}'")]
    DependencyCycle(String),

    #[error("Symbol '{0}' not found")]
    SymbolNotFound(String),

    #[error("The peer does not support server reflection: '{0}'")]
    ReflectionUnsupported(#[source] tonic::Status),

    #[error("Reflection resolution failed: '{0}'")]
    Reflection(#[source] ReflectionError),
}

impl From<ReflectionError> for SourceError {
    fn from(err: ReflectionError) -> Self {
        match err {
            ReflectionError::Unsupported(status) => SourceError::ReflectionUnsupported(status),
            err => SourceError::Reflection(err),
        }
    }
}

/// Where a [`DescriptorSource`] got its schema from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// A serialized `FileDescriptorSet` pushed by the lifecycle manager or an operator.
    FileDescriptorSet,
    /// A live peer answering `grpc.reflection.v1`.
    Reflection,
}

/// A generic wrapper for the different descriptors a symbol can resolve to.
#[derive(Debug, Clone)]
pub enum Descriptor {
    MessageDescriptor(MessageDescriptor),
    ServiceDescriptor(ServiceDescriptor),
    EnumDescriptor(EnumDescriptor),
    ExtensionDescriptor(ExtensionDescriptor),
    MethodDescriptor(MethodDescriptor),
}

impl Descriptor {
    /// Returns the name (e.g.,`MyMessage`) of the inner descriptor
    pub fn name(&self) -> &str {
        match self {
            Descriptor::MessageDescriptor(v) => v.name(),
            Descriptor::ServiceDescriptor(v) => v.name(),
            Descriptor::EnumDescriptor(v) => v.name(),
            Descriptor::ExtensionDescriptor(v) => v.name(),
            Descriptor::MethodDescriptor(v) => v.name(),
        }
    }

    /// Returns the full_name (e.g.,`my.package.v1.MyMessage`) of the inner descriptor
    pub fn full_name(&self) -> &str {
        match self {
            Descriptor::MessageDescriptor(v) => v.full_name(),
            Descriptor::ServiceDescriptor(v) => v.full_name(),
            Descriptor::EnumDescriptor(v) => v.full_name(),
            Descriptor::ExtensionDescriptor(v) => v.full_name(),
            Descriptor::MethodDescriptor(v) => v.full_name(),
        }
    }

    pub fn message_descriptor(&self) -> Option<&MessageDescriptor> {
        match self {
            Descriptor::MessageDescriptor(d) => Some(d),
            _ => None,
        }
    }

    pub fn service_descriptor(&self) -> Option<&ServiceDescriptor> {
        match self {
            Descriptor::ServiceDescriptor(d) => Some(d),
            _ => None,
        }
    }

    pub fn method_descriptor(&self) -> Option<&MethodDescriptor> {
        match self {
            Descriptor::MethodDescriptor(d) => Some(d),
            _ => None,
        }
    }
}

/// One schema universe: the pool built from a single blob, plus lookup helpers.
#[derive(Debug, Clone)]
pub struct DescriptorSource {
    pool: DescriptorPool,
    kind: SourceKind,
    file_names: Vec<String>,
}

impl DescriptorSource {
    /// Parses a serialized `FileDescriptorSet` and resolves its files in dependency order.
    pub fn load(bytes: &[u8]) -> Result<Self, SourceError> {
        let set = FileDescriptorSet::decode(bytes)?;
        Self::from_file_descriptor_set(set)
    }

    pub fn from_file_descriptor_set(set: FileDescriptorSet) -> Result<Self, SourceError> {
        Self::resolve(set.file, SourceKind::FileDescriptorSet)
    }

    /// Builds a source by asking a live peer for every service it exposes.
    ///
    /// A peer without the reflection service yields [`SourceError::ReflectionUnsupported`].
    pub async fn from_reflection<S>(client: &mut ReflectionClient<S>) -> Result<Self, SourceError>
    where
        S: tonic::client::GrpcService<tonic::body::Body>,
        S::Error: Into<BoxError>,
        S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
        <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
    {
        let files = client.fetch_schema().await?;
        Self::resolve(files, SourceKind::Reflection)
    }

    fn resolve(files: Vec<FileDescriptorProto>, kind: SourceKind) -> Result<Self, SourceError> {
        let mut declared: HashMap<String, FileDescriptorProto> = HashMap::new();
        let mut declaration_order = Vec::with_capacity(files.len());

        for (position, file) in files.into_iter().enumerate() {
            let name = file
                .name
                .clone()
                .ok_or(SourceError::UnnamedFile(position))?;

            match declared.get(&name) {
                Some(existing) if *existing != file => {
                    return Err(SourceError::ConflictingFile(name));
                }
                Some(_) => continue,
                None => {
                    declaration_order.push(name.clone());
                    declared.insert(name, file);
                }
            }
        }

        let mut resolver = Resolver::new(&declared);
        for name in &declaration_order {
            resolver.resolve(name)?;
        }

        let file_names = resolver.ordered.iter().filter_map(|f| f.name.clone()).collect();

        let mut pool = DescriptorPool::new();
        pool.add_file_descriptor_protos(resolver.ordered)?;

        Ok(Self {
            pool,
            kind,
            file_names,
        })
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn pool(&self) -> &DescriptorPool {
        &self.pool
    }

    /// File names in the order they were registered, dependencies first.
    pub fn file_names(&self) -> &[String] {
        &self.file_names
    }

    /// Fully qualified names of every service in the schema.
    pub fn list_services(&self) -> Vec<String> {
        self.pool
            .services()
            .map(|s| s.full_name().to_string())
            .collect()
    }

    /// Method names of `service`, or `None` if the service is not part of this schema.
    pub fn list_methods(&self, service: &str) -> Option<Vec<String>> {
        self.pool
            .get_service_by_name(service)
            .map(|s| s.methods().map(|m| m.name().to_string()).collect())
    }

    /// Every fully qualified symbol this schema can resolve.
    pub fn symbols(&self) -> BTreeSet<String> {
        let services = self.pool.services().flat_map(|s| {
            let methods: Vec<String> = s.methods().map(|m| m.full_name().to_string()).collect();
            std::iter::once(s.full_name().to_string()).chain(methods)
        });

        services
            .chain(self.pool.all_messages().map(|m| m.full_name().to_string()))
            .chain(self.pool.all_enums().map(|e| e.full_name().to_string()))
            .chain(self.pool.all_extensions().map(|e| e.full_name().to_string()))
            .collect()
    }

    /// Looks up a service, message, enum, extension or method (`pkg.Service.Method`).
    pub fn find_symbol(&self, symbol: &str) -> Result<Descriptor, SourceError> {
        let pool = &self.pool;

        if let Some(descriptor) = pool.get_service_by_name(symbol) {
            return Ok(Descriptor::ServiceDescriptor(descriptor));
        }
        if let Some(descriptor) = pool.get_message_by_name(symbol) {
            return Ok(Descriptor::MessageDescriptor(descriptor));
        }
        if let Some(descriptor) = pool.get_enum_by_name(symbol) {
            return Ok(Descriptor::EnumDescriptor(descriptor));
        }
        if let Some(descriptor) = pool.get_extension_by_name(symbol) {
            return Ok(Descriptor::ExtensionDescriptor(descriptor));
        }
        if let Some((service, method)) = symbol.rsplit_once('.')
            && let Some(descriptor) = self.find_method(service, method)
        {
            return Ok(Descriptor::MethodDescriptor(descriptor));
        }

        Err(SourceError::SymbolNotFound(symbol.to_string()))
    }

    pub fn find_method(&self, service: &str, method: &str) -> Option<MethodDescriptor> {
        self.pool
            .get_service_by_name(service)?
            .methods()
            .find(|m| m.name() == method)
    }

    /// All extensions declared anywhere in the schema that extend `type_name`.
    pub fn all_extensions_for_type(
        &self,
        type_name: &str,
    ) -> Result<Vec<ExtensionDescriptor>, SourceError> {
        let message = self
            .pool
            .get_message_by_name(type_name)
            .ok_or_else(|| SourceError::SymbolNotFound(type_name.to_string()))?;

        Ok(message.extensions().collect())
    }
}

/// Depth-first resolution of the file dependency graph.
struct Resolver<'a> {
    declared: &'a HashMap<String, FileDescriptorProto>,
    resolved: HashSet<String>,
    in_progress: HashSet<String>,
    ordered: Vec<FileDescriptorProto>,
}

impl<'a> Resolver<'a> {
    fn new(declared: &'a HashMap<String, FileDescriptorProto>) -> Self {
        Self {
            declared,
            resolved: HashSet::new(),
            in_progress: HashSet::new(),
            ordered: Vec::with_capacity(declared.len()),
        }
    }

    fn resolve(&mut self, name: &str) -> Result<(), SourceError> {
        if self.resolved.contains(name) {
            return Ok(());
        }
        if !self.in_progress.insert(name.to_string()) {
            return Err(SourceError::DependencyCycle(name.to_string()));
        }

        if let Some(file) = self.declared.get(name) {
            for dep in &file.dependency {
                self.resolve(dep)?;
            }
            self.ordered.push(file.clone());
        } else if let Some(file) = DescriptorPool::global().get_file_by_name(name) {
            // Imports left out of the blob, typically the well-known types.
            for dep in file.dependencies() {
                self.resolve(dep.name())?;
            }
            self.ordered.push(file.file_descriptor_proto().clone());
        } else {
            // Let the pool report the missing import with its own diagnostics.
            tracing::debug!(file = name, "import not present in descriptor set");
        }

        self.in_progress.remove(name);
        self.resolved.insert(name.to_string());
        Ok(())
    }
}
