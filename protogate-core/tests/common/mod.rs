//! Schema fixtures and an in-process echo upstream shared by the integration tests.
#![allow(dead_code)]

use bytes::{Buf, BufMut, Bytes};
use prost::Message;
use prost_types::{
    DescriptorProto, FieldDescriptorProto, FileDescriptorProto, FileDescriptorSet,
    MethodDescriptorProto, ServiceDescriptorProto,
    descriptor_proto::ExtensionRange,
    field_descriptor_proto::{Label, Type},
};
use std::convert::Infallible;
use std::future::{Future, Ready, ready};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};
use tonic::Status;
use tonic::codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder};

pub const ECHO_SERVICE: &str = "echo.EchoService";
pub const TREE_SERVICE: &str = "tree.TreeService";

/// Knobs for the echo schema, so tests can produce distinct generations.
#[derive(Debug, Clone, Copy)]
pub struct EchoSchema {
    /// Name of field 1 of both request and response.
    pub text_field: &'static str,
    /// Whether `echo.Detail`, the type packed into `Any` payloads, is declared.
    pub with_detail: bool,
}

impl Default for EchoSchema {
    fn default() -> Self {
        Self {
            text_field: "message",
            with_detail: true,
        }
    }
}

impl EchoSchema {
    pub fn files(self) -> Vec<FileDescriptorProto> {
        vec![common_file(), self.echo_file()]
    }

    pub fn set(self) -> FileDescriptorSet {
        FileDescriptorSet { file: self.files() }
    }

    pub fn bytes(self) -> Vec<u8> {
        self.set().encode_to_vec()
    }

    fn echo_file(self) -> FileDescriptorProto {
        let payload = |name: &str| DescriptorProto {
            name: Some(name.to_string()),
            field: vec![
                field(self.text_field, 1, Type::String, Label::Optional),
                field("count", 2, Type::Int32, Label::Optional),
                field("tags", 3, Type::String, Label::Repeated),
                message_field("meta", 4, ".common.Meta", Label::Optional),
                message_field("detail", 5, ".google.protobuf.Any", Label::Optional),
            ],
            ..Default::default()
        };

        let mut messages = vec![payload("EchoRequest"), payload("EchoResponse")];
        if self.with_detail {
            messages.push(DescriptorProto {
                name: Some("Detail".to_string()),
                field: vec![field("note", 1, Type::String, Label::Optional)],
                ..Default::default()
            });
        }

        FileDescriptorProto {
            name: Some("echo.proto".to_string()),
            package: Some("echo".to_string()),
            dependency: vec![
                "common.proto".to_string(),
                "google/protobuf/any.proto".to_string(),
            ],
            message_type: messages,
            service: vec![ServiceDescriptorProto {
                name: Some("EchoService".to_string()),
                method: vec![
                    method("UnaryEcho", ".echo.EchoRequest", ".echo.EchoResponse", false),
                    method("Ping", ".echo.EchoRequest", ".echo.EchoResponse", false),
                    method("Fail", ".echo.EchoRequest", ".echo.EchoResponse", false),
                    method(
                        "ServerStreamingEcho",
                        ".echo.EchoRequest",
                        ".echo.EchoResponse",
                        true,
                    ),
                ],
                ..Default::default()
            }],
            syntax: Some("proto3".to_string()),
            ..Default::default()
        }
    }
}

pub fn echo_bytes() -> Vec<u8> {
    EchoSchema::default().bytes()
}

fn common_file() -> FileDescriptorProto {
    FileDescriptorProto {
        name: Some("common.proto".to_string()),
        package: Some("common".to_string()),
        message_type: vec![DescriptorProto {
            name: Some("Meta".to_string()),
            field: vec![field("trace_id", 1, Type::String, Label::Optional)],
            ..Default::default()
        }],
        syntax: Some("proto3".to_string()),
        ..Default::default()
    }
}

/// A proto2 schema whose `Node` references itself and is extended twice, once
/// with a message type that points back at `Node`.
pub fn tree_set() -> FileDescriptorSet {
    let node = DescriptorProto {
        name: Some("Node".to_string()),
        field: vec![
            field("name", 1, Type::String, Label::Optional),
            message_field("children", 2, ".tree.Node", Label::Repeated),
            message_field("parent", 3, ".tree.Node", Label::Optional),
        ],
        extension_range: vec![ExtensionRange {
            start: Some(100),
            end: Some(200),
            options: None,
        }],
        ..Default::default()
    };

    let annotation = DescriptorProto {
        name: Some("Annotation".to_string()),
        field: vec![
            field("note", 1, Type::String, Label::Optional),
            message_field("origin", 2, ".tree.Node", Label::Optional),
        ],
        ..Default::default()
    };

    let mut annotation_ext = message_field("annotation", 100, ".tree.Annotation", Label::Optional);
    annotation_ext.extendee = Some(".tree.Node".to_string());
    let mut weight_ext = field("weight", 101, Type::Int32, Label::Optional);
    weight_ext.extendee = Some(".tree.Node".to_string());

    let file = FileDescriptorProto {
        name: Some("tree.proto".to_string()),
        package: Some("tree".to_string()),
        message_type: vec![node, annotation],
        extension: vec![annotation_ext, weight_ext],
        service: vec![ServiceDescriptorProto {
            name: Some("TreeService".to_string()),
            method: vec![method("Walk", ".tree.Node", ".tree.Node", false)],
            ..Default::default()
        }],
        syntax: Some("proto2".to_string()),
        ..Default::default()
    };

    FileDescriptorSet { file: vec![file] }
}

/// A service with `count` unary methods, for exercising the type cache.
pub fn wide_set(count: usize) -> FileDescriptorSet {
    let mut files = EchoSchema::default().files();
    files.push(FileDescriptorProto {
        name: Some("wide.proto".to_string()),
        package: Some("wide".to_string()),
        dependency: vec!["echo.proto".to_string()],
        service: vec![ServiceDescriptorProto {
            name: Some("WideService".to_string()),
            method: (0..count)
                .map(|i| {
                    method(
                        &format!("Method{i}"),
                        ".echo.EchoRequest",
                        ".echo.EchoResponse",
                        false,
                    )
                })
                .collect(),
            ..Default::default()
        }],
        syntax: Some("proto3".to_string()),
        ..Default::default()
    });
    FileDescriptorSet { file: files }
}

pub fn field(name: &str, number: i32, ty: Type, label: Label) -> FieldDescriptorProto {
    FieldDescriptorProto {
        name: Some(name.to_string()),
        number: Some(number),
        label: Some(label as i32),
        r#type: Some(ty as i32),
        json_name: Some(json_name(name)),
        ..Default::default()
    }
}

pub fn message_field(name: &str, number: i32, type_name: &str, label: Label) -> FieldDescriptorProto {
    FieldDescriptorProto {
        type_name: Some(type_name.to_string()),
        ..field(name, number, Type::Message, label)
    }
}

fn method(name: &str, input: &str, output: &str, server_streaming: bool) -> MethodDescriptorProto {
    MethodDescriptorProto {
        name: Some(name.to_string()),
        input_type: Some(input.to_string()),
        output_type: Some(output.to_string()),
        server_streaming: Some(server_streaming),
        ..Default::default()
    }
}

fn json_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = false;
    for c in name.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

/// Passes message bytes through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawCodec;

impl Codec for RawCodec {
    type Encode = Bytes;
    type Decode = Bytes;
    type Encoder = RawCodec;
    type Decoder = RawCodec;

    fn encoder(&mut self) -> Self::Encoder {
        RawCodec
    }

    fn decoder(&mut self) -> Self::Decoder {
        RawCodec
    }
}

impl Encoder for RawCodec {
    type Item = Bytes;
    type Error = Status;

    fn encode(&mut self, item: Self::Item, dst: &mut EncodeBuf<'_>) -> Result<(), Self::Error> {
        dst.put(item);
        Ok(())
    }
}

impl Decoder for RawCodec {
    type Item = Bytes;
    type Error = Status;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<Self::Item>, Self::Error> {
        let len = src.remaining();
        Ok(Some(src.copy_to_bytes(len)))
    }
}

/// Upstream answering every unary call with the request bytes, which the client
/// then reads as the response type. `Fail` always answers `NOT_FOUND` and the
/// reflection service is not served at all.
///
/// `x-tenant` request metadata is echoed back as response metadata.
#[derive(Debug, Clone, Default)]
pub struct EchoUpstream {
    calls: Arc<AtomicUsize>,
}

impl EchoUpstream {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl tower_service::Service<http::Request<tonic::body::Body>> for EchoUpstream {
    type Response = http::Response<tonic::body::Body>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<tonic::body::Body>) -> Self::Future {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let path = req.uri().path();
        let failure = if path.starts_with("/grpc.reflection.") {
            Some(Status::unimplemented("reflection is not served"))
        } else if path.ends_with("/Fail") {
            Some(Status::not_found("no such record"))
        } else {
            None
        };

        Box::pin(async move {
            let mut grpc = tonic::server::Grpc::new(RawCodec);
            Ok(grpc.unary(EchoUnary { failure }, req).await)
        })
    }
}

struct EchoUnary {
    failure: Option<Status>,
}

impl tonic::server::UnaryService<Bytes> for EchoUnary {
    type Response = Bytes;
    type Future = Ready<Result<tonic::Response<Bytes>, Status>>;

    fn call(&mut self, request: tonic::Request<Bytes>) -> Self::Future {
        if let Some(status) = self.failure.take() {
            return ready(Err(status));
        }

        let (metadata, _, body) = request.into_parts();
        let mut response = tonic::Response::new(body);
        for value in metadata.get_all("x-tenant").iter() {
            response.metadata_mut().append("x-tenant", value.clone());
        }
        ready(Ok(response))
    }
}
