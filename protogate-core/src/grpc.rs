//! # Generic gRPC Transport
//!
//! Low-level building blocks for performing gRPC calls with messages whose types
//! are resolved at runtime. Unlike standard `tonic` clients which are strongly typed,
//! these components carry `prost_reflect::DynamicMessage` values.
pub mod client;
pub mod codec;
