//! # RPC Channel
//!
//! The engine never talks to the network itself. It hands a schema-typed request
//! to an [`RpcChannel`] supplied by the caller, which performs exactly one unary
//! call. [`GrpcChannel`] is the `tonic` implementation, usable over a real
//! `Channel` or over any in-process `GrpcService`.
use super::codec::DynamicMessageCodec;
use crate::BoxError;
use http_body::Body as HttpBody;
use prost_reflect::{DynamicMessage, MethodDescriptor};
use std::str::FromStr;
use tonic::{
    client::GrpcService,
    transport::{Channel, Endpoint},
};

#[derive(Debug, thiserror::Error)]
pub enum ChannelConnectError {
    #[error("Invalid URL '{0}': {1}")]
    InvalidUrl(String, #[source] tonic::transport::Error),
    #[error("Failed to connect to '{0}': {1}")]
    ConnectionFailed(String, #[source] tonic::transport::Error),
}

/// One unary call against a live connection.
///
/// Errors are returned as the raw [`tonic::Status`]; translating codes is the
/// caller's business.
#[async_trait::async_trait]
pub trait RpcChannel: Send + Sync {
    async fn unary(
        &self,
        method: &MethodDescriptor,
        request: tonic::Request<DynamicMessage>,
    ) -> Result<tonic::Response<DynamicMessage>, tonic::Status>;
}

/// A [`RpcChannel`] backed by a `tonic` gRPC client.
#[derive(Debug, Clone)]
pub struct GrpcChannel<S = Channel> {
    client: tonic::client::Grpc<S>,
}

impl GrpcChannel<Channel> {
    /// Connects to `addr` (e.g. `http://localhost:50051`).
    pub async fn connect(addr: &str) -> Result<Self, ChannelConnectError> {
        let endpoint = Endpoint::new(addr.to_string())
            .map_err(|e| ChannelConnectError::InvalidUrl(addr.to_string(), e))?;

        let channel = endpoint
            .connect()
            .await
            .map_err(|e| ChannelConnectError::ConnectionFailed(addr.to_string(), e))?;

        Ok(Self::new(channel))
    }
}

impl<S> GrpcChannel<S> {
    pub fn new(service: S) -> Self {
        let client = tonic::client::Grpc::new(service);
        Self { client }
    }
}

#[async_trait::async_trait]
impl<S> RpcChannel for GrpcChannel<S>
where
    S: GrpcService<tonic::body::Body> + Clone + Send + Sync + 'static,
    S::Future: Send,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    async fn unary(
        &self,
        method: &MethodDescriptor,
        request: tonic::Request<DynamicMessage>,
    ) -> Result<tonic::Response<DynamicMessage>, tonic::Status> {
        let mut client = self.client.clone();

        client.ready().await.map_err(|e| {
            let e: BoxError = e.into();
            tonic::Status::unavailable(format!("Service was not ready: {e}"))
        })?;

        let codec = DynamicMessageCodec::new(method.output());
        let path = http_path(method)?;

        client.unary(request, path, codec).await
    }
}

fn http_path(method: &MethodDescriptor) -> Result<http::uri::PathAndQuery, tonic::Status> {
    let path = format!("/{}/{}", method.parent_service().full_name(), method.name());
    http::uri::PathAndQuery::from_str(&path)
        .map_err(|e| tonic::Status::internal(format!("Invalid gRPC path '{path}': {e}")))
}
