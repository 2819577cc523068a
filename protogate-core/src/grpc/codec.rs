//! # DynamicMessage <-> Protobuf Codec
//!
//! Implements `tonic::codec::Codec` for [`DynamicMessage`], so `tonic` can carry
//! messages whose types are only known through runtime descriptors.
//!
//! 1. **Encoder**: writes the message's binary encoding into the gRPC frame buffer.
//!    The message already carries its descriptor, so no schema is needed.
//! 2. **Decoder**: merges the frame into a fresh message of the configured type.
//!    A client decodes responses (the method's output type), a server decodes
//!    requests (the method's input type).
use prost::Message;
use prost_reflect::{DynamicMessage, MessageDescriptor};
use tonic::{
    Status,
    codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder},
};

pub struct DynamicMessageCodec {
    /// Schema of the messages read from the wire.
    decode_as: MessageDescriptor,
}

impl DynamicMessageCodec {
    pub fn new(decode_as: MessageDescriptor) -> Self {
        Self { decode_as }
    }
}

impl Codec for DynamicMessageCodec {
    type Encode = DynamicMessage;
    type Decode = DynamicMessage;

    type Encoder = DynamicMessageEncoder;
    type Decoder = DynamicMessageDecoder;

    fn encoder(&mut self) -> Self::Encoder {
        DynamicMessageEncoder
    }

    fn decoder(&mut self) -> Self::Decoder {
        DynamicMessageDecoder(self.decode_as.clone())
    }
}

pub struct DynamicMessageEncoder;

impl Encoder for DynamicMessageEncoder {
    type Item = DynamicMessage;
    type Error = Status;

    fn encode(&mut self, item: Self::Item, dst: &mut EncodeBuf<'_>) -> Result<(), Self::Error> {
        item.encode_raw(dst);
        Ok(())
    }
}

pub struct DynamicMessageDecoder(MessageDescriptor);

impl Decoder for DynamicMessageDecoder {
    type Item = DynamicMessage;
    type Error = Status;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<Self::Item>, Self::Error> {
        let mut msg = DynamicMessage::new(self.0.clone());
        msg.merge(src).map_err(|e| {
            Status::internal(format!(
                "Failed to decode '{}' from Protobuf bytes: {}",
                self.0.full_name(),
                e
            ))
        })?;

        Ok(Some(msg))
    }
}
