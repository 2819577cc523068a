//! Terminal rendering of schemas, responses and errors.
use colored::*;
use protogate_core::{
    Descriptor,
    prost_reflect::{
        EnumDescriptor, ExtensionDescriptor, FieldDescriptor, Kind, MessageDescriptor,
        MethodDescriptor, ServiceDescriptor,
    },
    tonic::Status,
};
use std::fmt::Write as _;

/// A formatted, colored block of text ready to be printed.
pub struct FormattedString(pub String);

pub struct ServiceList(pub Vec<String>);

impl std::fmt::Display for FormattedString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f)?;
        writeln!(f, "{}", self.0)
    }
}

impl From<serde_json::Value> for FormattedString {
    fn from(value: serde_json::Value) -> Self {
        FormattedString(serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string()))
    }
}

impl From<Status> for FormattedString {
    fn from(status: Status) -> Self {
        FormattedString(format!(
            "{} code={:?} message={:?}",
            "gRPC Failed:".red().bold(),
            status.code(),
            status.message()
        ))
    }
}

impl From<anyhow::Error> for FormattedString {
    fn from(err: anyhow::Error) -> Self {
        FormattedString(format!("{}\n\n{err:#}", "Error:".red().bold()))
    }
}

impl From<ServiceList> for FormattedString {
    fn from(ServiceList(services): ServiceList) -> Self {
        if services.is_empty() {
            return FormattedString("No services found.".yellow().to_string());
        }

        let mut out = String::from("Available Services:");
        for service in services {
            let _ = write!(out, "\n  - {}", service.green());
        }
        FormattedString(out)
    }
}

impl From<Descriptor> for FormattedString {
    fn from(descriptor: Descriptor) -> Self {
        match descriptor {
            Descriptor::MessageDescriptor(d) => d.into(),
            Descriptor::ServiceDescriptor(d) => d.into(),
            Descriptor::EnumDescriptor(d) => d.into(),
            Descriptor::ExtensionDescriptor(d) => d.into(),
            Descriptor::MethodDescriptor(d) => d.into(),
        }
    }
}

impl From<ServiceDescriptor> for FormattedString {
    fn from(service: ServiceDescriptor) -> Self {
        let mut out = format!("{} {} {{", "service".cyan(), service.full_name().green());
        for method in service.methods() {
            let _ = write!(out, "\n  {}", FormattedString::from(method).0);
        }
        out.push_str("\n}");
        FormattedString(out)
    }
}

impl From<MethodDescriptor> for FormattedString {
    fn from(method: MethodDescriptor) -> Self {
        let stream = |streaming: bool| {
            if streaming {
                format!("{} ", "stream".cyan())
            } else {
                String::new()
            }
        };

        FormattedString(format!(
            "{} {}({}{}) {} ({}{});",
            "rpc".cyan(),
            method.name().green(),
            stream(method.is_client_streaming()),
            method.input().full_name().yellow(),
            "returns".cyan(),
            stream(method.is_server_streaming()),
            method.output().full_name().yellow()
        ))
    }
}

impl From<MessageDescriptor> for FormattedString {
    fn from(message: MessageDescriptor) -> Self {
        let mut out = format!("{} {} {{", "message".cyan(), message.full_name().green());
        for field in message.fields() {
            let _ = write!(out, "\n  {}", field_line(&field));
        }
        out.push_str("\n}");

        let extensions: Vec<ExtensionDescriptor> = message.extensions().collect();
        if !extensions.is_empty() {
            let _ = write!(out, "\n{} {} {{", "extend".cyan(), message.full_name().green());
            for extension in extensions {
                let _ = write!(
                    out,
                    "\n  {} {} = {};",
                    kind_name(&extension.kind()).yellow(),
                    extension.full_name(),
                    extension.number()
                );
            }
            out.push_str("\n}");
        }

        FormattedString(out)
    }
}

impl From<EnumDescriptor> for FormattedString {
    fn from(enum_desc: EnumDescriptor) -> Self {
        let mut out = format!("{} {} {{", "enum".cyan(), enum_desc.full_name().green());
        for value in enum_desc.values() {
            let _ = write!(
                out,
                "\n  {} = {};",
                value.name(),
                value.number().to_string().purple()
            );
        }
        out.push_str("\n}");
        FormattedString(out)
    }
}

impl From<ExtensionDescriptor> for FormattedString {
    fn from(extension: ExtensionDescriptor) -> Self {
        FormattedString(format!(
            "{} {} {{\n  {} {} = {};\n}}",
            "extend".cyan(),
            extension.containing_message().full_name().green(),
            kind_name(&extension.kind()).yellow(),
            extension.name(),
            extension.number()
        ))
    }
}

fn field_line(field: &FieldDescriptor) -> String {
    let label = if field.is_map() {
        String::new()
    } else if field.is_list() {
        format!("{} ", "repeated".cyan())
    } else {
        String::new()
    };

    let type_name = match field.kind() {
        Kind::Message(entry) if field.is_map() => {
            let key = entry.map_entry_key_field().kind();
            let value = entry.map_entry_value_field().kind();
            format!("map<{}, {}>", kind_name(&key), kind_name(&value))
        }
        kind => kind_name(&kind),
    };

    format!(
        "{label}{} {} = {}; {}",
        type_name.yellow(),
        field.name(),
        field.number(),
        format!("// json: {}", field.json_name()).dimmed()
    )
}

fn kind_name(kind: &Kind) -> String {
    let scalar = match kind {
        Kind::Double => "double",
        Kind::Float => "float",
        Kind::Int32 => "int32",
        Kind::Int64 => "int64",
        Kind::Uint32 => "uint32",
        Kind::Uint64 => "uint64",
        Kind::Sint32 => "sint32",
        Kind::Sint64 => "sint64",
        Kind::Fixed32 => "fixed32",
        Kind::Fixed64 => "fixed64",
        Kind::Sfixed32 => "sfixed32",
        Kind::Sfixed64 => "sfixed64",
        Kind::Bool => "bool",
        Kind::String => "string",
        Kind::Bytes => "bytes",
        Kind::Message(m) => return m.full_name().to_string(),
        Kind::Enum(e) => return e.full_name().to_string(),
    };
    scalar.to_string()
}
