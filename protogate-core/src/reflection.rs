//! # Server Reflection
//!
//! Interaction with the gRPC Server Reflection Protocol, used by
//! [`crate::descriptor::DescriptorSource::from_reflection`] to build a schema
//! generation from a live peer.
pub mod client;
