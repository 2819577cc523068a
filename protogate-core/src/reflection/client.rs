//! # Reflection Client
//!
//! A client for `grpc.reflection.v1`, used to build a schema from a live peer
//! instead of a pushed blob. Development and testing only: production traffic is
//! served from descriptor sets fed through the lifecycle manager.
//!
//! All requests of one fetch travel over a single bidirectional stream, driven as
//! a lock-step session: one request out, one response back. The schema is
//! collected breadth-first, first the files defining the requested symbols, then
//! every import that has not been seen yet.
//!
//! ## References
//!
//! * [gRPC Server Reflection Protocol](https://github.com/grpc/grpc/blob/master/doc/server-reflection.md)
use crate::BoxError;
use futures_util::StreamExt;
use http_body::Body as HttpBody;
use prost::Message;
use prost_types::{FileDescriptorProto, FileDescriptorSet};
use std::collections::{HashSet, VecDeque};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::Channel;
use tonic::{Code, Status, Streaming, client::GrpcService};
use tonic_reflection::pb::v1::{
    ServerReflectionRequest, ServerReflectionResponse,
    server_reflection_client::ServerReflectionClient, server_reflection_request::MessageRequest,
    server_reflection_response::MessageResponse,
};

/// Name of the reflection service itself, never part of a fetched schema.
pub const REFLECTION_SERVICE_NAME: &str = "grpc.reflection.v1.ServerReflection";

#[derive(Debug, thiserror::Error)]
pub enum ReflectionError {
    /// The peer answered the stream with `Unimplemented`.
    #[error("The peer does not support server reflection: '{0}'")]
    Unsupported(#[source] Status),

    #[error("Failed to open the reflection stream: '{0}'")]
    Open(#[source] Status),

    #[error("The reflection stream failed: '{0}'")]
    Stream(#[source] Status),

    #[error("The reflection stream closed before answering")]
    Closed,

    #[error("The peer rejected a reflection request with code {code}: {message}")]
    Rejected { code: i32, message: String },

    #[error("Unexpected reflection response: {0}")]
    Unexpected(&'static str),

    #[error("Failed to decode a file descriptor: {0}")]
    Decode(#[from] prost::DecodeError),
}

#[derive(Debug, Clone)]
pub struct ReflectionClient<T = Channel> {
    client: ServerReflectionClient<T>,
}

impl<S> ReflectionClient<S>
where
    S: GrpcService<tonic::body::Body>,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    pub fn new(channel: S) -> Self {
        Self {
            client: ServerReflectionClient::new(channel),
        }
    }

    /// Every file needed to resolve the services the peer exposes, reflection excluded.
    ///
    /// Files come back in discovery order; callers resolve dependency order themselves.
    pub async fn fetch_schema(&mut self) -> Result<Vec<FileDescriptorProto>, ReflectionError> {
        let mut session = self.open().await?;

        let services: Vec<String> = session
            .list_services()
            .await?
            .into_iter()
            .filter(|s| s != REFLECTION_SERVICE_NAME)
            .collect();

        session.collect_files(services).await
    }

    pub async fn list_services(&mut self) -> Result<Vec<String>, ReflectionError> {
        self.open().await?.list_services().await
    }

    /// The file defining `symbol` together with all its transitive imports.
    pub async fn file_descriptor_set_by_symbol(
        &mut self,
        symbol: &str,
    ) -> Result<FileDescriptorSet, ReflectionError> {
        let file = self
            .open()
            .await?
            .collect_files([symbol.to_string()])
            .await?;

        Ok(FileDescriptorSet { file })
    }

    async fn open(&mut self) -> Result<Session, ReflectionError> {
        // Lock-step: at most one request is ever waiting.
        let (requests, rx) = mpsc::channel(1);

        let responses = self
            .client
            .server_reflection_info(ReceiverStream::new(rx))
            .await
            .map_err(|status| match status.code() {
                Code::Unimplemented => ReflectionError::Unsupported(status),
                _ => ReflectionError::Open(status),
            })?
            .into_inner();

        Ok(Session {
            requests,
            responses,
        })
    }
}

/// One open reflection stream. Dropping it ends the stream.
struct Session {
    requests: mpsc::Sender<ServerReflectionRequest>,
    responses: Streaming<ServerReflectionResponse>,
}

impl Session {
    async fn ask(&mut self, request: MessageRequest) -> Result<MessageResponse, ReflectionError> {
        self.requests
            .send(ServerReflectionRequest {
                host: String::new(),
                message_request: Some(request),
            })
            .await
            .map_err(|_| ReflectionError::Closed)?;

        let response = self
            .responses
            .next()
            .await
            .ok_or(ReflectionError::Closed)?
            .map_err(ReflectionError::Stream)?;

        match response.message_response {
            Some(MessageResponse::ErrorResponse(e)) => Err(ReflectionError::Rejected {
                code: e.error_code,
                message: e.error_message,
            }),
            Some(response) => Ok(response),
            None => Err(ReflectionError::Unexpected("empty response")),
        }
    }

    async fn list_services(&mut self) -> Result<Vec<String>, ReflectionError> {
        match self.ask(MessageRequest::ListServices(String::new())).await? {
            MessageResponse::ListServicesResponse(list) => {
                Ok(list.service.into_iter().map(|s| s.name).collect())
            }
            _ => Err(ReflectionError::Unexpected("expected a service list")),
        }
    }

    async fn files(
        &mut self,
        request: MessageRequest,
    ) -> Result<Vec<FileDescriptorProto>, ReflectionError> {
        match self.ask(request).await? {
            MessageResponse::FileDescriptorResponse(res) => res
                .file_descriptor_proto
                .iter()
                .map(|raw| FileDescriptorProto::decode(raw.as_slice()).map_err(ReflectionError::from))
                .collect(),
            _ => Err(ReflectionError::Unexpected("expected file descriptors")),
        }
    }

    async fn collect_files(
        &mut self,
        symbols: impl IntoIterator<Item = String>,
    ) -> Result<Vec<FileDescriptorProto>, ReflectionError> {
        let mut pending: VecDeque<MessageRequest> = symbols
            .into_iter()
            .map(MessageRequest::FileContainingSymbol)
            .collect();
        let mut collected = Vec::new();
        let mut collected_names: HashSet<String> = HashSet::new();
        // Imports already queued, so shared ones are asked for once.
        let mut requested: HashSet<String> = HashSet::new();

        while let Some(request) = pending.pop_front() {
            for file in self.files(request).await? {
                let Some(name) = file.name.clone() else {
                    continue;
                };
                // Batches may repeat files collected earlier.
                if !collected_names.insert(name) {
                    continue;
                }

                for dependency in &file.dependency {
                    if !collected_names.contains(dependency) && requested.insert(dependency.clone()) {
                        pending.push_back(MessageRequest::FileByFilename(dependency.clone()));
                    }
                }
                collected.push(file);
            }
        }

        tracing::debug!(files = collected.len(), "reflection schema collected");
        Ok(collected)
    }
}
