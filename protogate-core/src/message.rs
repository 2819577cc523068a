//! # Schema-typed messages
//!
//! Downstream code never sees generated types. A request or response is a
//! [`SchemaMessage`]: a [`DynamicMessage`] paired with the [`ExtensionRegistry`] of
//! the method it belongs to, manipulated only through field and extension
//! descriptors.
use crate::descriptor::DescriptorSource;
use prost_reflect::{
    DynamicMessage, ExtensionDescriptor, FieldDescriptor, Kind, MessageDescriptor,
    MethodDescriptor, ReflectMessage, Value,
};
use std::borrow::Cow;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum FieldError {
    #[error("Field '{field}' not found on message '{message}'")]
    UnknownField { message: String, field: String },

    #[error("Value does not match the type of field '{0}'")]
    TypeMismatch(String),

    #[error("Extension '{0}' is not registered for this method")]
    UnregisteredExtension(String),

    #[error("Extension '{extension}' does not extend message '{message}'")]
    WrongExtendee { extension: String, message: String },
}

/// Extensions reachable from one method's input and output message graphs.
///
/// Keyed by fully qualified extension name, so an extension reachable through
/// several paths is registered once.
#[derive(Debug, Clone, Default)]
pub struct ExtensionRegistry {
    extensions: BTreeMap<String, ExtensionDescriptor>,
}

impl ExtensionRegistry {
    /// Walks the message graph of `method`, collecting every extension of every
    /// message type it can reach.
    ///
    /// Message graphs may be self or mutually referential, so each type name is
    /// visited at most once. The visited set lives only for this call.
    pub fn for_method(source: &DescriptorSource, method: &MethodDescriptor) -> Self {
        let mut registry = ExtensionRegistry::default();
        let mut visited = HashSet::new();
        let mut pending = vec![method.input(), method.output()];

        while let Some(message) = pending.pop() {
            if !visited.insert(message.full_name().to_string()) {
                continue;
            }

            for field in message.fields() {
                if let Kind::Message(child) = field.kind() {
                    pending.push(child);
                }
            }

            // The type exists in this pool, the lookup cannot miss.
            let extensions = source
                .all_extensions_for_type(message.full_name())
                .unwrap_or_default();

            for extension in extensions {
                if let Kind::Message(child) = extension.kind() {
                    pending.push(child);
                }
                registry
                    .extensions
                    .entry(extension.full_name().to_string())
                    .or_insert(extension);
            }
        }

        registry
    }

    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    pub fn get(&self, full_name: &str) -> Option<&ExtensionDescriptor> {
        self.extensions.get(full_name)
    }

    /// Registered extensions whose extendee is `type_name`.
    pub fn for_extendee<'a>(
        &'a self,
        type_name: &'a str,
    ) -> impl Iterator<Item = &'a ExtensionDescriptor> + 'a {
        self.extensions
            .values()
            .filter(move |e| e.containing_message().full_name() == type_name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExtensionDescriptor> {
        self.extensions.values()
    }
}

impl PartialEq for ExtensionRegistry {
    fn eq(&self, other: &Self) -> bool {
        self.extensions.keys().eq(other.extensions.keys())
    }
}

/// Builds [`SchemaMessage`] shells from descriptors resolved at runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageFactory;

impl MessageFactory {
    pub fn new_instance(
        &self,
        descriptor: &MessageDescriptor,
        extensions: Arc<ExtensionRegistry>,
    ) -> SchemaMessage {
        SchemaMessage {
            message: DynamicMessage::new(descriptor.clone()),
            extensions,
        }
    }
}

/// A message whose type is only known through its descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaMessage {
    message: DynamicMessage,
    extensions: Arc<ExtensionRegistry>,
}

impl SchemaMessage {
    pub fn from_dynamic(message: DynamicMessage, extensions: Arc<ExtensionRegistry>) -> Self {
        Self {
            message,
            extensions,
        }
    }

    pub fn descriptor(&self) -> MessageDescriptor {
        self.message.descriptor()
    }

    pub fn extension_registry(&self) -> &ExtensionRegistry {
        &self.extensions
    }

    pub fn get_field(&self, field: &FieldDescriptor) -> Cow<'_, Value> {
        self.message.get_field(field)
    }

    pub fn get_field_by_name(&self, name: &str) -> Option<Cow<'_, Value>> {
        self.message.get_field_by_name(name)
    }

    pub fn has_field(&self, field: &FieldDescriptor) -> bool {
        self.message.has_field(field)
    }

    pub fn set_field(&mut self, field: &FieldDescriptor, value: Value) -> Result<(), FieldError> {
        if !value.is_valid_for_field(field) {
            return Err(FieldError::TypeMismatch(field.full_name().to_string()));
        }
        self.message.set_field(field, value);
        Ok(())
    }

    pub fn set_field_by_name(&mut self, name: &str, value: Value) -> Result<(), FieldError> {
        let field = self
            .message
            .descriptor()
            .get_field_by_name(name)
            .ok_or_else(|| FieldError::UnknownField {
                message: self.message.descriptor().full_name().to_string(),
                field: name.to_string(),
            })?;
        self.set_field(&field, value)
    }

    /// Reads an extension by full name, `None` when it is not set on this message.
    pub fn get_extension(&self, full_name: &str) -> Result<Option<Cow<'_, Value>>, FieldError> {
        let extension = self.registered_extension(full_name)?;
        if self.message.has_extension(&extension) {
            Ok(Some(self.message.get_extension(&extension)))
        } else {
            Ok(None)
        }
    }

    pub fn set_extension(&mut self, full_name: &str, value: Value) -> Result<(), FieldError> {
        let extension = self.registered_extension(full_name)?;
        if !value.is_valid_for_extension(&extension) {
            return Err(FieldError::TypeMismatch(full_name.to_string()));
        }
        self.message.set_extension(&extension, value);
        Ok(())
    }

    fn registered_extension(&self, full_name: &str) -> Result<ExtensionDescriptor, FieldError> {
        let extension = self
            .extensions
            .get(full_name)
            .cloned()
            .ok_or_else(|| FieldError::UnregisteredExtension(full_name.to_string()))?;

        let descriptor = self.message.descriptor();
        if extension.containing_message() != descriptor {
            return Err(FieldError::WrongExtendee {
                extension: full_name.to_string(),
                message: descriptor.full_name().to_string(),
            });
        }
        Ok(extension)
    }

    pub fn encoded_len(&self) -> usize {
        prost::Message::encoded_len(&self.message)
    }

    pub fn as_dynamic(&self) -> &DynamicMessage {
        &self.message
    }

    pub(crate) fn as_dynamic_mut(&mut self) -> &mut DynamicMessage {
        &mut self.message
    }

    pub fn into_dynamic(self) -> DynamicMessage {
        self.message
    }
}
